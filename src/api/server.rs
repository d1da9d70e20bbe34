//! HTTP server setup: router and listener.

use super::state::ApiState;
use super::{metrics, system};
use crate::telemetry::{Instrumentation, track_http};

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use std::net::SocketAddr;
use std::sync::Arc;

/// Build the API router. The exposition endpoint is mounted at
/// `state.metrics_path` and is the only route the request metrics skip.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let instrumentation = Instrumentation::new(state.registry.clone(), &state.metrics_path);

    Router::new()
        .route(&state.metrics_path, get(metrics::metrics))
        .route("/health", get(system::health))
        .route("/status", get(system::status))
        .layer(axum::middleware::from_fn_with_state(instrumentation, track_http))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the given address.
///
/// The server shuts down gracefully when `shutdown_rx` flips to `true`.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Datastore;
    use crate::db::testing::StaticDatastore;
    use crate::telemetry::durable::testing::{MemoryStore, UnreachableStore};
    use crate::telemetry::{DurableCache, KeyValueStore, MetricsRegistry, RegistryOptions};

    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use axum::response::Response;
    use tower::ServiceExt as _;

    use std::time::Duration;

    struct Harness {
        app: Router,
        datastore: Arc<StaticDatastore>,
    }

    impl Harness {
        fn new() -> Self {
            Self::build(None)
        }

        fn with_durable(store: Arc<dyn KeyValueStore>) -> Self {
            Self::build(Some(DurableCache::new(
                store,
                "prometheus",
                Duration::from_millis(50),
            )))
        }

        fn build(durable: Option<DurableCache>) -> Self {
            let datastore = Arc::new(StaticDatastore::new(12, 4));
            let shared: Arc<dyn Datastore> = datastore.clone();
            let registry = Arc::new(MetricsRegistry::new(
                RegistryOptions::default(),
                shared,
                durable,
            ));
            let state = Arc::new(ApiState::new(registry, "/metrics", "1.0.0"));
            Self {
                app: router(state),
                datastore,
            }
        }

        async fn get(&self, uri: &str) -> Response {
            self.app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(uri)
                        .body(Body::empty())
                        .expect("request should build"),
                )
                .await
                .expect("router is infallible")
        }

        async fn text(&self, uri: &str) -> (StatusCode, String) {
            let response = self.get(uri).await;
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body should be readable");
            (status, String::from_utf8(body.to_vec()).expect("body should be UTF-8"))
        }

        async fn json(&self, uri: &str) -> (StatusCode, serde_json::Value) {
            let (status, text) = self.text(uri).await;
            (status, serde_json::from_str(&text).expect("body should be JSON"))
        }

        async fn scrape(&self) -> String {
            let (status, text) = self.text("/metrics").await;
            assert_eq!(status, StatusCode::OK);
            text
        }
    }

    fn sample(text: &str, series: &str) -> Option<f64> {
        text.lines()
            .find_map(|line| line.strip_prefix(series)?.strip_prefix(' '))
            .and_then(|value| value.parse().ok())
    }

    #[tokio::test]
    async fn repeated_requests_accumulate_in_the_request_counter() {
        let harness = Harness::new();
        for _ in 0..3 {
            let response = harness.get("/status").await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let text = harness.scrape().await;
        assert_eq!(
            sample(
                &text,
                "http_requests_total{method=\"GET\",status_code=\"200\",route=\"status\"}"
            ),
            Some(3.0),
            "{text}"
        );
    }

    #[tokio::test]
    async fn not_found_requests_are_errors() {
        let harness = Harness::new();
        let response = harness.get("/api/pqrs/999").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let text = harness.scrape().await;
        assert_eq!(
            sample(&text, "http_errors_total{status_code=\"404\",route=\"api_pqrs_999\"}"),
            Some(1.0)
        );
        assert_eq!(
            sample(
                &text,
                "http_requests_total{method=\"GET\",status_code=\"404\",route=\"api_pqrs_999\"}"
            ),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn unreachable_database_makes_health_unhealthy() {
        let harness = Harness::new();
        harness.datastore.set_reachable(false);

        let (status, body) = harness.json("/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["services"]["database"], "unhealthy");
        assert_eq!(body["services"]["application"], "healthy");
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|error| error.starts_with("Database connection failed"))
        );
    }

    #[tokio::test]
    async fn healthy_database_reports_healthy() {
        let harness = Harness::new();

        let (status, body) = harness.json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["database"], "healthy");
        assert_eq!(body["version"], "1.0.0");
        assert!(body.get("error").is_none());
        assert!(body["services"].get("cache").is_none());
        assert!(
            chrono::DateTime::parse_from_rfc3339(body["timestamp"].as_str().unwrap_or_default())
                .is_ok()
        );
    }

    #[tokio::test]
    async fn health_reports_cache_without_affecting_status() {
        let harness = Harness::with_durable(Arc::new(UnreachableStore));

        let (status, body) = harness.json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["cache"], "unhealthy");
    }

    #[tokio::test]
    async fn scraping_does_not_count_as_middleware_execution() {
        let harness = Harness::new();

        let first = sample(&harness.scrape().await, "middleware_executions");
        let second = sample(&harness.scrape().await, "middleware_executions");
        assert_eq!(first, Some(0.0));
        assert_eq!(second, Some(0.0));

        harness.get("/status").await;
        harness.get("/health").await;
        let third = sample(&harness.scrape().await, "middleware_executions");
        assert_eq!(third, Some(2.0));
    }

    #[tokio::test]
    async fn scrape_counts_itself_directly() {
        let harness = Harness::new();
        harness.scrape().await;
        let text = harness.scrape().await;

        assert_eq!(sample(&text, "metrics_endpoint_calls"), Some(2.0));
        assert_eq!(sample(&text, "http_requests_to_metrics"), Some(2.0));
        assert!(!text.contains("route=\"metrics\""));
    }

    #[tokio::test]
    async fn scrape_reports_business_totals() {
        let harness = Harness::new();
        harness.get("/status").await;
        let text = harness.scrape().await;

        assert_eq!(sample(&text, "pqrs_total_pqrs_count"), Some(12.0));
        assert_eq!(sample(&text, "pqrs_total_users_count"), Some(4.0));
        assert_eq!(sample(&text, "database_connected"), Some(1.0));
        assert_eq!(sample(&text, "metrics_errors_total"), Some(0.0));
        assert_eq!(
            sample(&text, "app_info{version=\"1.0.0\",environment=\"production\"}"),
            Some(1.0)
        );
        assert!(text.contains("# TYPE http_request_duration_seconds histogram\n"));
    }

    #[tokio::test]
    async fn scrape_survives_datastore_failure() {
        let harness = Harness::new();
        harness.datastore.set_reachable(false);

        let text = harness.scrape().await;
        assert_eq!(sample(&text, "database_connected"), Some(0.0));
        assert_eq!(sample(&text, "metrics_errors_total"), Some(1.0));
        assert_eq!(sample(&text, "database_connections_active"), Some(0.0));
    }

    #[tokio::test]
    async fn scrape_error_gauge_clears_after_datastore_recovers() {
        let harness = Harness::new();
        harness.datastore.set_reachable(false);
        let text = harness.scrape().await;
        assert_eq!(sample(&text, "metrics_errors_total"), Some(1.0));

        harness.datastore.set_reachable(true);
        let text = harness.scrape().await;
        assert_eq!(sample(&text, "database_connected"), Some(1.0));
        assert_eq!(sample(&text, "metrics_errors_total"), Some(0.0));
        assert_eq!(sample(&text, "pqrs_total_pqrs_count"), Some(12.0));
    }

    #[tokio::test]
    async fn scrape_output_keeps_registration_order() {
        let harness = Harness::new();
        harness.get("/status").await;
        let text = harness.scrape().await;

        let position = |name: &str| {
            text.find(&format!("# TYPE {name} "))
                .unwrap_or_else(|| panic!("{name} should be rendered"))
        };
        assert!(position("http_requests_total") < position("app_info"));
        assert!(position("app_info") < position("php_memory_usage_bytes"));
        assert!(position("php_memory_usage_bytes") < position("pqrs_total_pqrs_count"));
    }

    #[tokio::test]
    async fn requests_are_mirrored_but_scrapes_are_not() {
        let memory = Arc::new(MemoryStore::default());
        let harness = Harness::with_durable(memory.clone());

        harness.get("/status").await;
        harness.scrape().await;

        let requests = memory.hash("prometheus:http_requests_total");
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests.get(r#"["GET","200","status"]"#).map(String::as_str),
            Some("1")
        );
    }

    #[tokio::test]
    async fn status_reports_running_process() {
        let harness = Harness::new();
        let (status, body) = harness.json("/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["pid"], std::process::id());
    }
}
