//! Top-level error types for the PQRS API.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
///
/// Returned by configuration loading and by [`crate::api::ApiState::from_config`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Metric store errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A metric with this identity exists with a different kind.
    #[error("metric {metric} is already registered as a {existing}, requested {requested}")]
    RegistrationConflict {
        metric: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("invalid operation on {metric}: {reason}")]
    InvalidMetricOperation { metric: String, reason: String },

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("failed to render metrics: {0}")]
    Render(#[from] std::fmt::Error),
}

/// Durable metric cache errors. Never propagated past the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum DurableError {
    #[error("durable cache unavailable: {0}")]
    Unavailable(String),

    #[error("durable cache call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to decode durable record {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Primary datastore errors.
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("database unreachable: {0}")]
    Unreachable(String),
}
