//! Prometheus exposition endpoint.

use super::state::ApiState;
use crate::error::{DatastoreError, MetricsError};
use crate::telemetry::registry::{ExpositionMetrics, HttpMetrics};
use crate::telemetry::{MetricsRegistry, render};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use std::sync::Arc;
use std::time::Instant;

pub(super) async fn metrics(State(state): State<Arc<ApiState>>) -> Response {
    exposition_response(collect(&state.registry).await)
}

fn exposition_response(result: Result<String, MetricsError>) -> Response {
    match result {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, render::CONTENT_TYPE)],
            text,
        )
            .into_response(),
        Err(error) => {
            tracing::warn!(%error, "failed to generate metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                format!("Error generating metrics: {error}"),
            )
                .into_response()
        }
    }
}

async fn collect(registry: &MetricsRegistry) -> Result<String, MetricsError> {
    let store = registry.get_registry().await?;
    let exposition = registry.exposition().await?;
    exposition.endpoint_calls.inc(&[])?;

    // Idempotent: hands back the series the middleware writes to.
    HttpMetrics::register(&store)?;
    exposition.requests_to_metrics.inc(&[])?;

    refresh_business_gauges(registry, exposition).await?;

    render::render(&store.snapshot())
}

/// Ticket and user totals. A datastore failure is reported through
/// `database_connected` and `metrics_errors_total` rather than failing the
/// scrape. Both reflect the latest scrape only.
async fn refresh_business_gauges(
    registry: &MetricsRegistry,
    exposition: &ExpositionMetrics,
) -> Result<(), MetricsError> {
    let business = registry.business().await?;
    let datastore = registry.datastore();

    let counts = async {
        let started = Instant::now();
        let pqrs = datastore.count_pqrs().await?;
        business.record_database_query("count", "pqrs", started.elapsed().as_secs_f64())?;

        let started = Instant::now();
        let users = datastore.count_users().await?;
        business.record_database_query("count", "users", started.elapsed().as_secs_f64())?;

        Ok::<_, CountError>((pqrs, users))
    }
    .await;

    match counts {
        Ok((pqrs, users)) => {
            business.set_totals(pqrs, users)?;
            exposition.database_connected.set(&[], 1.0)?;
            exposition.errors_total.set(&[], 0.0)?;
        }
        Err(CountError::Datastore(error)) => {
            tracing::warn!(%error, "failed to count business records");
            exposition.database_connected.set(&[], 0.0)?;
            exposition.errors_total.set(&[], 1.0)?;
        }
        Err(CountError::Metrics(error)) => return Err(error),
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum CountError {
    #[error(transparent)]
    Datastore(#[from] DatastoreError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
