use super::state::ApiState;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::SecondsFormat;
use serde::Serialize;

use std::sync::Arc;

const HEALTHY: &str = "healthy";
const UNHEALTHY: &str = "unhealthy";

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    timestamp: String,
    services: ServiceHealth,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServiceHealth {
    database: &'static str,
    application: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<&'static str>,
}

#[derive(Serialize)]
pub(super) struct StatusResponse {
    status: &'static str,
    version: &'static str,
    pid: u32,
    uptime_seconds: u64,
}

/// Overall status follows the primary datastore only. The durable cache is
/// reported when configured but never makes the service unhealthy.
pub(super) async fn health(
    State(state): State<Arc<ApiState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let registry = &state.registry;
    let (database, cache) = tokio::join!(registry.datastore().ping(), async {
        match registry.durable() {
            Some(durable) => Some(durable.is_available().await),
            None => None,
        }
    });

    let error = database.err().map(|error| {
        tracing::warn!(%error, "health check: database unreachable");
        format!("Database connection failed: {error}")
    });
    let status = if error.is_none() { HEALTHY } else { UNHEALTHY };
    let code = if error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status,
        timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        services: ServiceHealth {
            database: status,
            application: HEALTHY,
            cache: cache.map(|available| if available { HEALTHY } else { UNHEALTHY }),
        },
        version: state.version.clone(),
        error,
    };

    (code, Json(response))
}

pub(super) async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let uptime = state.started_at.elapsed();
    Json(StatusResponse {
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
        pid: std::process::id(),
        uptime_seconds: uptime.as_secs(),
    })
}
