//! Application-scoped metrics registry.
//!
//! One [`MetricsRegistry`] is built at startup and shared through the API
//! state. The metric store behind it is created on first access, with the
//! fixed catalog registered and, when enabled, counters seeded from the
//! durable cache. Every [`MetricsRegistry::get_registry`] call recomputes
//! the system gauges so a scrape always sees fresh values.

use super::business::BusinessMetrics;
use super::catalog;
use super::durable::DurableCache;
use super::store::{Counter, Gauge, Histogram, MetricStore};
use super::system::{SystemGauges, SystemSampler};
use crate::config::Config;
use crate::db::Datastore;
use crate::error::MetricsError;

use std::sync::Arc;
use std::time::Instant;

/// Settings the registry needs from [`Config`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub app_version: String,
    pub environment: String,
    pub business_namespace: String,
    /// Seed from and touch the durable cache.
    pub durable_enabled: bool,
}

impl RegistryOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_version: config.app.version.clone(),
            environment: config.app.environment.clone(),
            business_namespace: config.metrics.business_namespace.clone(),
            durable_enabled: config.persistence.enabled,
        }
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Request instrumentation handles.
#[derive(Clone)]
pub struct HttpMetrics {
    pub requests_total: Counter,
    pub request_duration: Histogram,
    pub response_size: Histogram,
    pub errors_total: Counter,
    pub middleware_executions: Counter,
    pub responses_by_status: Counter,
    pub request_size: Histogram,
    pub in_flight: Gauge,
}

impl HttpMetrics {
    /// Idempotent: re-registering returns handles to the same series.
    pub fn register(store: &MetricStore) -> Result<Self, MetricsError> {
        Ok(Self {
            requests_total: store.get_or_register_counter(&catalog::HTTP_REQUESTS_TOTAL)?,
            request_duration: store.get_or_register_histogram(
                &catalog::HTTP_REQUEST_DURATION_SECONDS,
                catalog::DURATION_BUCKETS,
            )?,
            response_size: store.get_or_register_histogram(
                &catalog::HTTP_RESPONSE_SIZE_BYTES,
                catalog::SIZE_BUCKETS,
            )?,
            errors_total: store.get_or_register_counter(&catalog::HTTP_ERRORS_TOTAL)?,
            middleware_executions: store.get_or_register_counter(&catalog::MIDDLEWARE_EXECUTIONS)?,
            responses_by_status: store.get_or_register_counter(&catalog::HTTP_RESPONSES_BY_STATUS)?,
            request_size: store.get_or_register_histogram(
                &catalog::HTTP_REQUEST_SIZE_BYTES,
                catalog::SIZE_BUCKETS,
            )?,
            in_flight: store.get_or_register_gauge(&catalog::HTTP_REQUESTS_CONCURRENT)?,
        })
    }
}

/// Handles the exposition endpoint updates about itself.
#[derive(Clone)]
pub struct ExpositionMetrics {
    pub endpoint_calls: Counter,
    pub requests_to_metrics: Counter,
    pub database_connected: Gauge,
    pub errors_total: Gauge,
}

impl ExpositionMetrics {
    fn register(store: &MetricStore) -> Result<Self, MetricsError> {
        Ok(Self {
            endpoint_calls: store.get_or_register_counter(&catalog::METRICS_ENDPOINT_CALLS)?,
            requests_to_metrics: store.get_or_register_counter(&catalog::HTTP_REQUESTS_TO_METRICS)?,
            database_connected: store.get_or_register_gauge(&catalog::DATABASE_CONNECTED)?,
            errors_total: store.get_or_register_gauge(&catalog::METRICS_ERRORS_TOTAL)?,
        })
    }
}

struct Catalog {
    store: Arc<MetricStore>,
    http: HttpMetrics,
    system: SystemGauges,
    cache_hit_rate: Gauge,
    database_connections: Gauge,
    exposition: ExpositionMetrics,
    business: BusinessMetrics,
}

pub struct MetricsRegistry {
    options: RegistryOptions,
    datastore: Arc<dyn Datastore>,
    durable: Option<DurableCache>,
    sampler: Arc<SystemSampler>,
    catalog: tokio::sync::OnceCell<Catalog>,
}

impl MetricsRegistry {
    pub fn new(
        options: RegistryOptions,
        datastore: Arc<dyn Datastore>,
        durable: Option<DurableCache>,
    ) -> Self {
        Self {
            options,
            datastore,
            durable,
            sampler: Arc::new(SystemSampler::new(Instant::now())),
            catalog: tokio::sync::OnceCell::new(),
        }
    }

    /// The metric store, with system gauges refreshed.
    ///
    /// Gauge failures are logged and skipped. When the durable cache is
    /// enabled an access touch is spawned in the background.
    pub async fn get_registry(&self) -> Result<Arc<MetricStore>, MetricsError> {
        let catalog = self.catalog().await?;
        self.refresh_gauges(catalog).await;
        self.touch_durable();
        Ok(catalog.store.clone())
    }

    /// Request instrumentation handles. Initializes the store on first use
    /// but does not refresh gauges.
    pub async fn http(&self) -> Result<&HttpMetrics, MetricsError> {
        Ok(&self.catalog().await?.http)
    }

    pub async fn exposition(&self) -> Result<&ExpositionMetrics, MetricsError> {
        Ok(&self.catalog().await?.exposition)
    }

    pub async fn business(&self) -> Result<&BusinessMetrics, MetricsError> {
        Ok(&self.catalog().await?.business)
    }

    pub fn durable(&self) -> Option<&DurableCache> {
        self.durable.as_ref()
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    async fn catalog(&self) -> Result<&Catalog, MetricsError> {
        self.catalog.get_or_try_init(|| self.initialize()).await
    }

    async fn initialize(&self) -> Result<Catalog, MetricsError> {
        let store = Arc::new(MetricStore::new());

        let http = HttpMetrics::register(&store)?;
        let app_info = store.get_or_register_gauge(&catalog::APP_INFO)?;
        app_info.set(
            &[
                self.options.app_version.as_str(),
                self.options.environment.as_str(),
            ],
            1.0,
        )?;
        let system = SystemGauges::register(&store)?;
        let cache_hit_rate = store.get_or_register_gauge(&catalog::CACHE_HIT_RATE)?;
        let database_connections =
            store.get_or_register_gauge(&catalog::DATABASE_CONNECTIONS_ACTIVE)?;
        let exposition = ExpositionMetrics::register(&store)?;
        let business = BusinessMetrics::register(&store, &self.options.business_namespace)?;

        if let Some(durable) = self.enabled_durable() {
            if durable.is_available().await {
                match durable.load_into(&store).await {
                    Ok(report) => tracing::info!(
                        series = report.series,
                        skipped = report.skipped,
                        "metric counters seeded from durable cache"
                    ),
                    Err(error) => {
                        tracing::warn!(%error, "failed to seed metric counters from durable cache")
                    }
                }
            } else {
                tracing::warn!("durable metric cache enabled but unavailable, starting from zero");
            }
        }

        tracing::debug!(families = store.len(), "metric store initialized");

        Ok(Catalog {
            store,
            http,
            system,
            cache_hit_rate,
            database_connections,
            exposition,
            business,
        })
    }

    async fn refresh_gauges(&self, catalog: &Catalog) {
        let sampler = self.sampler.clone();
        match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(sample) => catalog.system.apply(&sample),
            Err(error) => tracing::debug!(%error, "system sampling task failed"),
        }

        if let Some(rate) = catalog.business.cache_hit_rate()
            && let Err(error) = catalog.cache_hit_rate.set(&[], rate)
        {
            tracing::debug!(%error, "cache hit rate update skipped");
        }

        let connected = match self.datastore.ping().await {
            Ok(()) => 1.0,
            Err(error) => {
                tracing::debug!(%error, "database probe failed");
                0.0
            }
        };
        if let Err(error) = catalog.database_connections.set(&[], connected) {
            tracing::debug!(%error, "database connection gauge update skipped");
        }
    }

    fn touch_durable(&self) {
        let Some(durable) = self.enabled_durable().cloned() else {
            return;
        };
        tokio::spawn(async move {
            if !durable.is_available().await {
                return;
            }
            match durable.touch_access().await {
                Ok(count) => tracing::trace!(count, "durable metric cache touched"),
                Err(error) => tracing::warn!(%error, "durable metric cache touch failed"),
            }
        });
    }

    fn enabled_durable(&self) -> Option<&DurableCache> {
        self.durable
            .as_ref()
            .filter(|_| self.options.durable_enabled)
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("options", &self.options)
            .field("durable", &self.durable)
            .field("initialized", &self.catalog.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::StaticDatastore;
    use crate::telemetry::durable::testing::{MemoryStore, UnreachableStore};
    use crate::telemetry::durable::KeyValueStore;
    use crate::telemetry::store::MetricKey;

    use std::time::Duration;

    fn options(durable_enabled: bool) -> RegistryOptions {
        RegistryOptions {
            durable_enabled,
            ..RegistryOptions::default()
        }
    }

    fn durable(store: Arc<dyn KeyValueStore>) -> DurableCache {
        DurableCache::new(store, "prometheus", Duration::from_millis(100))
    }

    fn value(store: &MetricStore, namespace: &str, name: &str, labels: &[&str]) -> Option<f64> {
        store
            .find(&MetricKey::new(namespace, name))
            .and_then(|family| family.value(labels))
    }

    #[tokio::test]
    async fn registers_the_fixed_catalog() {
        let registry =
            MetricsRegistry::new(options(false), Arc::new(StaticDatastore::new(3, 2)), None);
        let store = registry.get_registry().await.expect("registry should initialize");

        for name in [
            "http_requests_total",
            "http_request_duration_seconds",
            "http_response_size_bytes",
            "http_errors_total",
            "middleware_executions",
            "app_info",
            "php_memory_usage_bytes",
            "php_memory_peak_bytes",
            "php_memory_limit_bytes",
            "process_uptime_seconds",
            "process_cpu_usage_percent",
            "system_load_average",
            "php_opcache_hit_rate",
            "database_connections_active",
        ] {
            assert!(store.contains(&MetricKey::new("", name)), "{name} should be registered");
        }
        assert!(store.contains(&MetricKey::new("pqrs", "total_pqrs_count")));
        assert!(store.contains(&MetricKey::new("pqrs", "total_users_count")));

        assert_eq!(value(&store, "", "app_info", &["1.0.0", "production"]), Some(1.0));
        assert_eq!(value(&store, "", "database_connections_active", &[]), Some(1.0));
    }

    #[tokio::test]
    async fn store_is_created_once() {
        let registry =
            MetricsRegistry::new(options(false), Arc::new(StaticDatastore::new(0, 0)), None);
        let first = registry.get_registry().await.expect("registry should initialize");
        let second = registry.get_registry().await.expect("registry should be reused");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn database_gauge_follows_reachability() {
        let datastore = Arc::new(StaticDatastore::new(0, 0));
        let registry = MetricsRegistry::new(options(false), datastore.clone(), None);

        let store = registry.get_registry().await.expect("registry should initialize");
        assert_eq!(value(&store, "", "database_connections_active", &[]), Some(1.0));

        datastore.set_reachable(false);
        registry.get_registry().await.expect("registry should refresh");
        assert_eq!(value(&store, "", "database_connections_active", &[]), Some(0.0));
    }

    #[tokio::test]
    async fn unreachable_durable_cache_still_yields_a_store() {
        let registry = MetricsRegistry::new(
            options(true),
            Arc::new(StaticDatastore::new(0, 0)),
            Some(durable(Arc::new(UnreachableStore))),
        );

        let store = registry.get_registry().await.expect("registry must not fail");
        let http = registry.http().await.expect("handles should be available");
        http.requests_total
            .inc(&["GET", "200", "root"])
            .expect("increment should succeed");
        assert_eq!(value(&store, "", "http_requests_total", &["GET", "200", "root"]), Some(1.0));
    }

    #[tokio::test]
    async fn enabled_durable_cache_seeds_counters_once() {
        let memory = Arc::new(MemoryStore::default());
        memory.hset("prometheus:http_requests_total", r#"["GET","200","api_pqrs"]"#, "7");
        memory.set("prometheus:middleware_executions", "7");

        let registry = MetricsRegistry::new(
            options(true),
            Arc::new(StaticDatastore::new(0, 0)),
            Some(durable(memory)),
        );
        let store = registry.get_registry().await.expect("registry should initialize");
        registry.get_registry().await.expect("registry should be reused");

        assert_eq!(
            value(&store, "", "http_requests_total", &["GET", "200", "api_pqrs"]),
            Some(7.0)
        );
        assert_eq!(value(&store, "", "middleware_executions", &[]), Some(7.0));
    }

    #[tokio::test]
    async fn disabled_durable_cache_is_not_loaded() {
        let memory = Arc::new(MemoryStore::default());
        memory.hset("prometheus:http_requests_total", r#"["GET","200","api_pqrs"]"#, "7");

        let registry = MetricsRegistry::new(
            options(false),
            Arc::new(StaticDatastore::new(0, 0)),
            Some(durable(memory.clone())),
        );
        let store = registry.get_registry().await.expect("registry should initialize");

        assert_eq!(value(&store, "", "http_requests_total", &["GET", "200", "api_pqrs"]), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(memory.string("prometheus:metrics_access_count"), None);
    }

    #[tokio::test]
    async fn access_touch_reaches_durable_cache() {
        let memory = Arc::new(MemoryStore::default());
        let registry = MetricsRegistry::new(
            options(true),
            Arc::new(StaticDatastore::new(0, 0)),
            Some(durable(memory.clone())),
        );
        registry.get_registry().await.expect("registry should initialize");

        let mut touched = None;
        for _ in 0..50 {
            touched = memory.string("prometheus:metrics_access_count");
            if touched.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(touched.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn cache_hit_rate_is_reported_after_lookups() {
        let registry =
            MetricsRegistry::new(options(false), Arc::new(StaticDatastore::new(0, 0)), None);
        let store = registry.get_registry().await.expect("registry should initialize");
        assert_eq!(value(&store, "", "php_opcache_hit_rate", &[]), Some(0.0));

        let business = registry.business().await.expect("business handles should exist");
        business.record_cache_hit("users:1", None).expect("record should succeed");
        business.record_cache_miss("users:2", None).expect("record should succeed");

        registry.get_registry().await.expect("registry should refresh");
        assert_eq!(value(&store, "", "php_opcache_hit_rate", &[]), Some(50.0));
    }

    #[tokio::test]
    async fn uptime_gauge_is_refreshed() {
        let registry =
            MetricsRegistry::new(options(false), Arc::new(StaticDatastore::new(0, 0)), None);
        let store = registry.get_registry().await.expect("registry should initialize");
        let first =
            value(&store, "", "process_uptime_seconds", &[]).expect("uptime should be set");

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.get_registry().await.expect("registry should refresh");
        let second =
            value(&store, "", "process_uptime_seconds", &[]).expect("uptime should be set");
        assert!(second > first);
    }
}
