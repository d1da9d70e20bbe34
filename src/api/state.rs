//! Shared state for API handlers.

use crate::config::Config;
use crate::db::{Datastore, SqlDatastore};
use crate::telemetry::{DurableCache, MetricsRegistry, RegistryOptions};

use std::sync::Arc;
use std::time::Instant;

/// State shared across all API handlers.
pub struct ApiState {
    pub registry: Arc<MetricsRegistry>,
    /// Path the exposition endpoint is mounted at.
    pub metrics_path: String,
    /// Reported by `/health`.
    pub version: String,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        metrics_path: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            metrics_path: metrics_path.into(),
            version: version.into(),
            started_at: Instant::now(),
        }
    }

    /// Wire the primary datastore, the optional durable cache and the
    /// metrics registry from configuration.
    ///
    /// A Redis URL that cannot be parsed disables the durable cache with a
    /// warning. The datastore pool connects lazily, so an unreachable
    /// database shows up in `/health` rather than here.
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let datastore: Arc<dyn Datastore> =
            Arc::new(SqlDatastore::connect_lazy(&config.database)?);

        let durable = config.persistence.redis_url.as_deref().and_then(|url| {
            DurableCache::redis(
                url,
                config.persistence.key_prefix.clone(),
                config.persistence.timeout(),
            )
            .map_err(|error| tracing::warn!(%error, "durable metric cache disabled"))
            .ok()
        });

        let registry = Arc::new(MetricsRegistry::new(
            RegistryOptions::from_config(config),
            datastore,
            durable,
        ));
        Ok(Self::new(
            registry,
            config.metrics.path.clone(),
            config.app.version.clone(),
        ))
    }
}
