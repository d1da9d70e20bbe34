//! Business event recorder.
//!
//! Every event updates its metrics under the business namespace and opens a
//! short span named after the event, so it also reaches the trace exporter.

use super::catalog;
use super::store::{Counter, Gauge, Histogram, MetricDesc, MetricStore};
use crate::error::MetricsError;

const DEFAULT_PRIORITY: &str = "normal";
const DEFAULT_CITY: &str = "unknown";
const DEFAULT_RESOLUTION: &str = "satisfactory";
const DEFAULT_LOGIN_METHOD: &str = "credentials";
const DEFAULT_REGISTRATION_METHOD: &str = "web";
const DEFAULT_CACHE_STORE: &str = "default";

/// A resolved ticket.
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    pub ticket_type: &'a str,
    pub resolved_by: &'a str,
    /// Defaults to `satisfactory`.
    pub resolution: Option<&'a str>,
    /// Time from creation to resolution, in hours.
    pub resolution_time_hours: Option<f64>,
}

/// Handles for the business metric family.
#[derive(Clone)]
pub struct BusinessMetrics {
    total_pqrs: Gauge,
    total_users: Gauge,
    pqrs_created: Counter,
    pqrs_resolved: Counter,
    resolution_time: Histogram,
    pqrs_active: Gauge,
    user_logins: Counter,
    user_registrations: Counter,
    users_active: Gauge,
    database_queries: Counter,
    database_query_duration: Histogram,
    cache_hits: Counter,
    cache_misses: Counter,
}

impl BusinessMetrics {
    pub fn register(store: &MetricStore, namespace: &str) -> Result<Self, MetricsError> {
        let ns = |desc: MetricDesc<'static>| desc.in_namespace(namespace);
        Ok(Self {
            total_pqrs: store.get_or_register_gauge(&ns(catalog::TOTAL_PQRS_COUNT))?,
            total_users: store.get_or_register_gauge(&ns(catalog::TOTAL_USERS_COUNT))?,
            pqrs_created: store.get_or_register_counter(&ns(catalog::PQRS_CREATED_TOTAL))?,
            pqrs_resolved: store.get_or_register_counter(&ns(catalog::PQRS_RESOLVED_TOTAL))?,
            resolution_time: store.get_or_register_histogram(
                &ns(catalog::PQRS_RESOLUTION_TIME_SECONDS),
                catalog::RESOLUTION_BUCKETS,
            )?,
            pqrs_active: store.get_or_register_gauge(&ns(catalog::PQRS_ACTIVE_TOTAL))?,
            user_logins: store.get_or_register_counter(&ns(catalog::USER_LOGINS_TOTAL))?,
            user_registrations: store
                .get_or_register_counter(&ns(catalog::USER_REGISTRATIONS_TOTAL))?,
            users_active: store.get_or_register_gauge(&ns(catalog::USERS_ACTIVE_TOTAL))?,
            database_queries: store.get_or_register_counter(&ns(catalog::DATABASE_QUERIES_TOTAL))?,
            database_query_duration: store.get_or_register_histogram(
                &ns(catalog::DATABASE_QUERY_DURATION_SECONDS),
                catalog::DURATION_BUCKETS,
            )?,
            cache_hits: store.get_or_register_counter(&ns(catalog::CACHE_HITS_TOTAL))?,
            cache_misses: store.get_or_register_counter(&ns(catalog::CACHE_MISSES_TOTAL))?,
        })
    }

    /// Live ticket and user counts, as reported by the datastore.
    pub fn set_totals(&self, pqrs: u64, users: u64) -> Result<(), MetricsError> {
        self.total_pqrs.set(&[], pqrs as f64)?;
        self.total_users.set(&[], users as f64)
    }

    pub fn record_pqrs_created(
        &self,
        ticket_type: &str,
        priority: Option<&str>,
        city: Option<&str>,
    ) -> Result<(), MetricsError> {
        let priority = priority.unwrap_or(DEFAULT_PRIORITY);
        let city = city.unwrap_or(DEFAULT_CITY);
        let _span = tracing::info_span!("pqrs.created", ticket_type, priority, city).entered();

        self.pqrs_created.inc(&[ticket_type, priority, city])
    }

    pub fn record_pqrs_resolved(&self, resolved: &Resolution<'_>) -> Result<(), MetricsError> {
        let resolution = resolved.resolution.unwrap_or(DEFAULT_RESOLUTION);
        let _span = tracing::info_span!(
            "pqrs.resolved",
            ticket_type = resolved.ticket_type,
            resolved_by = resolved.resolved_by,
            resolution,
            resolution_time_hours = resolved.resolution_time_hours,
        )
        .entered();

        let labels = [resolved.ticket_type, resolved.resolved_by, resolution];
        self.pqrs_resolved.inc(&labels)?;
        if let Some(hours) = resolved.resolution_time_hours {
            self.resolution_time.observe(&labels, hours * 3_600.0)?;
        }
        Ok(())
    }

    pub fn set_active_pqrs(&self, count: u64) -> Result<(), MetricsError> {
        self.pqrs_active.set(&[], count as f64)
    }

    pub fn record_user_login(
        &self,
        role: &str,
        method: Option<&str>,
        successful: bool,
    ) -> Result<(), MetricsError> {
        let method = method.unwrap_or(DEFAULT_LOGIN_METHOD);
        let _span = tracing::info_span!("user.login", role, method, successful).entered();

        let successful = if successful { "true" } else { "false" };
        self.user_logins.inc(&[role, method, successful])
    }

    pub fn record_user_registration(
        &self,
        role: &str,
        method: Option<&str>,
    ) -> Result<(), MetricsError> {
        let method = method.unwrap_or(DEFAULT_REGISTRATION_METHOD);
        let _span = tracing::info_span!("user.registration", role, method).entered();

        self.user_registrations.inc(&[role, method])
    }

    pub fn set_active_users(&self, count: u64) -> Result<(), MetricsError> {
        self.users_active.set(&[], count as f64)
    }

    pub fn record_database_query(
        &self,
        operation: &str,
        table: &str,
        duration_seconds: f64,
    ) -> Result<(), MetricsError> {
        self.database_queries.inc(&[operation, table])?;
        self.database_query_duration
            .observe(&[operation, table], duration_seconds)
    }

    pub fn record_cache_hit(&self, key: &str, store: Option<&str>) -> Result<(), MetricsError> {
        self.cache_hits
            .inc(&[store.unwrap_or(DEFAULT_CACHE_STORE), key_prefix(key)])
    }

    pub fn record_cache_miss(&self, key: &str, store: Option<&str>) -> Result<(), MetricsError> {
        self.cache_misses
            .inc(&[store.unwrap_or(DEFAULT_CACHE_STORE), key_prefix(key)])
    }

    /// Percentage of cache lookups that hit, across every store and prefix.
    /// `None` until the first lookup is recorded.
    pub fn cache_hit_rate(&self) -> Option<f64> {
        let hits = self.cache_hits.total();
        let lookups = hits + self.cache_misses.total();
        (lookups > 0.0).then(|| hits / lookups * 100.0)
    }
}

/// `users:42:profile` is grouped under `users`.
fn key_prefix(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}
