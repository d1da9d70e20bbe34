//! HTTP instrumentation middleware.
//!
//! Wraps every request once. Recording happens after the downstream
//! response is produced and can never change it. Requests to the
//! exposition path are passed through untouched.

use super::durable::RequestRecord;
use super::registry::{HttpMetrics, MetricsRegistry};
use super::store::Gauge;
use crate::error::MetricsError;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use http_body::Body as _;

use std::sync::Arc;
use std::time::Instant;

/// Middleware state: `axum::middleware::from_fn_with_state(instrumentation, track_http)`.
#[derive(Clone)]
pub struct Instrumentation {
    registry: Arc<MetricsRegistry>,
    skip_path: Arc<str>,
}

impl Instrumentation {
    /// `skip_path` is the exposition endpoint path, matched exactly.
    pub fn new(registry: Arc<MetricsRegistry>, skip_path: &str) -> Self {
        Self {
            registry,
            skip_path: Arc::from(skip_path),
        }
    }
}

/// Record one request after the downstream response is produced.
///
/// The route label comes from the matched route template when axum has one,
/// so `/api/pqrs/17` under `/api/pqrs/{id}` is labelled `api_pqrs_{id}`
/// rather than `api_pqrs_17`. Unmatched requests use the normalized raw path.
pub async fn track_http(
    State(instrumentation): State<Instrumentation>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == &*instrumentation.skip_path {
        return next.run(request).await;
    }

    let method = request.method().as_str().to_owned();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| route_label(request.uri().path()), |path| route_label(path.as_str()));
    let request_bytes = content_length(request.headers());

    let http = match instrumentation.registry.http().await {
        Ok(http) => Some(http),
        Err(error) => {
            tracing::warn!(%error, "request metrics unavailable");
            None
        }
    };
    let in_flight = http.map(|http| InFlight::enter(&http.in_flight));

    let started = Instant::now();
    let response = next.run(request).await;
    let duration_seconds = started.elapsed().as_secs_f64();
    drop(in_flight);

    let status_code = response.status().as_u16();
    let response_bytes = content_length(response.headers())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0);

    let observation = Observation {
        method: &method,
        route: &route,
        status_code,
        duration_seconds,
        response_bytes,
        request_bytes,
    };

    if let Some(http) = http
        && let Err(error) = observation.record(http)
    {
        tracing::warn!(%error, %method, %route, "failed to record request metrics");
    }

    if let Some(durable) = instrumentation.registry.durable()
        && let Err(error) = durable.persist(&observation.durable_record()).await
    {
        tracing::warn!(%error, %method, %route, "failed to mirror request metrics");
    }

    response
}

/// Holds one slot of the in-flight gauge. Released on drop, so a cancelled
/// or panicking request does not leave the gauge raised.
struct InFlight<'a> {
    gauge: &'a Gauge,
}

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a Gauge) -> Self {
        if let Err(error) = gauge.inc(&[], 1.0) {
            tracing::debug!(%error, "in-flight gauge update skipped");
        }
        Self { gauge }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.gauge.dec(&[], 1.0) {
            tracing::debug!(%error, "in-flight gauge update skipped");
        }
    }
}

struct Observation<'a> {
    method: &'a str,
    route: &'a str,
    status_code: u16,
    duration_seconds: f64,
    response_bytes: u64,
    request_bytes: Option<u64>,
}

impl Observation<'_> {
    fn record(&self, http: &HttpMetrics) -> Result<(), MetricsError> {
        let status = self.status_code.to_string();

        http.requests_total
            .inc(&[self.method, &status, self.route])?;
        http.request_duration
            .observe(&[self.method, self.route], self.duration_seconds)?;
        http.response_size
            .observe(&[self.method, self.route], self.response_bytes as f64)?;
        http.responses_by_status.inc(&[&status, self.route])?;
        http.middleware_executions.inc(&[])?;
        if self.status_code >= 400 {
            http.errors_total.inc(&[&status, self.route])?;
        }
        if let Some(bytes) = self.request_bytes {
            http.request_size
                .observe(&[self.method, self.route], bytes as f64)?;
        }
        Ok(())
    }

    fn durable_record(&self) -> RequestRecord<'_> {
        RequestRecord {
            method: self.method,
            status_code: self.status_code,
            route: self.route,
            duration_seconds: self.duration_seconds,
            response_bytes: self.response_bytes,
        }
    }
}

/// `/api/pqrs/17` becomes `api_pqrs_17`; `/` becomes `root`.
pub fn route_label(path: &str) -> String {
    let cleaned = path.trim_start_matches('/').replace('/', "_");
    if cleaned.is_empty() {
        "root".into()
    } else {
        cleaned
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
