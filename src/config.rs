//! Configuration loading and validation.

use crate::error::{ConfigError, Result};

use serde::Deserialize;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// PQRS API configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub persistence: PersistenceConfig,
    pub app: AppConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub telemetry: TelemetryConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8000`.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
        }
    }
}

/// Primary datastore settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// sqlx connection URL (`sqlite://...` or `mysql://...`).
    pub url: String,

    pub max_connections: u32,

    /// How long a connectivity probe may wait for a pooled connection.
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://pqrs.db".into(),
            max_connections: 5,
            acquire_timeout_ms: 2_000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Durable metric cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Redis URL. When unset the middleware has nowhere to mirror counters.
    pub redis_url: Option<String>,

    /// Seed the registry from the durable cache at init and touch it on
    /// every registry access (`PROMETHEUS_USE_REDIS`).
    pub enabled: bool,

    /// Upper bound for every individual durable cache call.
    pub timeout_ms: u64,

    /// Prefix for every key written to the durable cache.
    pub key_prefix: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            enabled: false,
            timeout_ms: 250,
            key_prefix: "prometheus".into(),
        }
    }
}

impl PersistenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Application identity, reported through `app_info` and `/health`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub version: String,
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").into(),
            environment: "production".into(),
        }
    }
}

/// Exposition settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Path of the exposition endpoint. Requests to it are never instrumented.
    pub path: String,

    /// Namespace for business metrics.
    pub business_namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: "/metrics".into(),
            business_namespace: "pqrs".into(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Directory for a daily-rolling log file, in addition to stderr.
    pub log_dir: Option<PathBuf>,
}

/// OpenTelemetry span export settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: HashMap<String, String>,
    /// Trace sampling ratio in `[0, 1]`.
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pqrs-api".into(),
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            sample_rate: 1.0,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then the environment.
    ///
    /// Without an explicit path the default location
    /// (`<config_dir>/pqrs-api/config.toml`) is used when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pqrs-api").join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw, path)
    }

    fn from_toml(raw: &str, path: &Path) -> Result<Self> {
        toml::from_str(raw).map_err(|source| {
            ConfigError::Parse {
                path: path.display().to_string(),
                source,
            }
            .into()
        })
    }

    /// Apply environment overrides. Names match the deployment `.env` files.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("PQRS_BIND") {
            self.server.bind = bind;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(value) = lookup("DB_MAX_CONNECTIONS") {
            self.database.max_connections = parse_number("DB_MAX_CONNECTIONS", &value)?;
        }
        if let Some(url) = lookup("REDIS_URL").filter(|url| !url.trim().is_empty()) {
            self.persistence.redis_url = Some(url);
        }
        if let Some(value) = lookup("PROMETHEUS_USE_REDIS") {
            self.persistence.enabled = parse_flag(&value);
        }
        if let Some(value) = lookup("REDIS_TIMEOUT_MS") {
            self.persistence.timeout_ms = parse_number("REDIS_TIMEOUT_MS", &value)?;
        }
        if let Some(version) = lookup("APP_VERSION") {
            self.app.version = version;
        }
        if let Some(environment) = lookup("APP_ENV") {
            self.app.environment = environment;
        }
        if let Some(namespace) = lookup("OTEL_EXPORTER_PROMETHEUS_NAMESPACE")
            .filter(|namespace| !namespace.is_empty())
        {
            self.metrics.business_namespace = namespace;
        }
        if let Some(name) = lookup("OTEL_SERVICE_NAME") {
            self.telemetry.service_name = name;
        }
        if let Some(endpoint) =
            lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|endpoint| !endpoint.is_empty())
        {
            self.telemetry.otlp_endpoint = Some(endpoint);
        }
        if let Some(headers) = lookup("OTEL_EXPORTER_OTLP_HEADERS") {
            self.telemetry.otlp_headers.extend(parse_headers(&headers));
        }
        if let Some(value) = lookup("OTEL_TRACES_SAMPLER_ARG") {
            self.telemetry.sample_rate = parse_number("OTEL_TRACES_SAMPLER_ARG", &value)?;
        }
        if let Some(dir) = lookup("PQRS_LOG_DIR").filter(|dir| !dir.is_empty()) {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if !(0.0..=1.0).contains(&self.telemetry.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "telemetry.sample_rate must be within [0, 1], got {}",
                self.telemetry.sample_rate
            ))
            .into());
        }
        if self.persistence.timeout_ms == 0 {
            return Err(
                ConfigError::Invalid("persistence.timeout_ms must be non-zero".into()).into(),
            );
        }
        if !is_valid_namespace(&self.metrics.business_namespace) {
            return Err(ConfigError::Invalid(format!(
                "metrics.business_namespace '{}' is not a valid metric name prefix",
                self.metrics.business_namespace
            ))
            .into());
        }
        if !self.metrics.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "metrics.path must start with '/', got '{}'",
                self.metrics.path
            ))
            .into());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server.bind.parse().map_err(|error| {
            ConfigError::Invalid(format!(
                "invalid bind address '{}': {}",
                self.server.bind, error
            ))
            .into()
        })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|error| {
        ConfigError::Invalid(format!("{key} has invalid value '{value}': {error}")).into()
    })
}

/// Parse `key=value,key=value` as in `OTEL_EXPORTER_OTLP_HEADERS`.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn is_valid_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        config.validate().expect("defaults should be valid");
        assert_eq!(config.metrics.path, "/metrics");
        assert_eq!(config.metrics.business_namespace, "pqrs");
        assert!(!config.persistence.enabled);
        assert_eq!(config.app.version, "1.0.0");
    }

    #[test]
    fn env_overrides_take_effect() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("REDIS_URL", "redis://cache:6379/2"),
                ("PROMETHEUS_USE_REDIS", "true"),
                ("REDIS_TIMEOUT_MS", "500"),
                ("APP_ENV", "staging"),
                ("OTEL_EXPORTER_OTLP_HEADERS", "x-api-key=abc, x-team = ops"),
            ]))
            .expect("env should apply");

        assert_eq!(
            config.persistence.redis_url.as_deref(),
            Some("redis://cache:6379/2")
        );
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence.timeout(), Duration::from_millis(500));
        assert_eq!(config.app.environment, "staging");
        assert_eq!(config.telemetry.otlp_headers.get("x-team").map(String::as_str), Some("ops"));
        assert_eq!(config.telemetry.otlp_headers.len(), 2);
    }

    #[test]
    fn empty_redis_url_leaves_persistence_unconfigured() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("REDIS_URL", "  ")]))
            .expect("env should apply");
        assert!(config.persistence.redis_url.is_none());
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut config = Config::default();
        let error = config
            .apply_env(env(&[("DB_MAX_CONNECTIONS", "many")]))
            .expect_err("non-numeric value must fail");
        assert!(error.to_string().contains("DB_MAX_CONNECTIONS"));
    }

    #[test]
    fn out_of_range_sample_rate_fails_validation() {
        let mut config = Config::default();
        config.telemetry.sample_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_namespace_fails_validation() {
        let mut config = Config::default();
        config.metrics.business_namespace = "9pqrs-x".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_partial_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile should be created");
        writeln!(
            file,
            r#"
[server]
bind = "127.0.0.1:9100"

[persistence]
redis_url = "redis://localhost"
enabled = true
"#
        )
        .expect("config should be written");

        let config = Config::from_file(file.path()).expect("config should parse");
        assert_eq!(config.server.bind, "127.0.0.1:9100");
        assert!(config.persistence.enabled);
        assert_eq!(config.persistence.key_prefix, "prometheus");
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Config::from_toml("[server]\nport = 80\n", Path::new("inline.toml"))
            .expect_err("unknown key must fail");
        assert!(error.to_string().contains("inline.toml"));
    }
}
