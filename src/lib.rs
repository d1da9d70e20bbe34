//! PQRS API: operator surface for the PQRS ticketing backend.
//!
//! Request instrumentation, a Prometheus exposition endpoint backed by an
//! in-process metric store with an optional Redis mirror, and a health
//! endpoint probing the primary datastore.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod telemetry;

pub use error::{Error, Result};
