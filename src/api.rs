//! HTTP API for the PQRS operator surface.
//!
//! Serves the Prometheus exposition endpoint, the JSON health snapshot and
//! process status. Every other route is wrapped by the request
//! instrumentation middleware.

mod metrics;
mod server;
mod state;
mod system;

pub use server::{router, start_http_server};
pub use state::ApiState;
