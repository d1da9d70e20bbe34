//! Metrics collection, persistence and exposition.

pub mod business;
pub mod catalog;
pub mod durable;
pub mod middleware;
pub mod registry;
pub mod render;
pub mod store;
pub mod system;

pub use business::{BusinessMetrics, Resolution};
pub use durable::{DurableCache, KeyValueStore, RedisStore};
pub use middleware::{Instrumentation, track_http};
pub use registry::{MetricsRegistry, RegistryOptions};
pub use store::{Counter, Gauge, Histogram, MetricDesc, MetricKey, MetricKind, MetricStore};
