//! Durable metric cache backed by Redis.
//!
//! Request counters are mirrored into Redis so totals survive restarts:
//!
//! - `{prefix}:http_requests_total`: hash, field `["GET","200","root"]`
//! - `{prefix}:http_responses_by_status`: hash, field `["200","root"]`
//! - `{prefix}:http_errors_total`: hash, field `["500","root"]`
//! - `{prefix}:middleware_executions`: integer
//! - `{prefix}:durations:{method}:{route}`: list of the last 100 durations
//! - `{prefix}:sizes:{method}:{route}`: list of the last 100 response sizes
//!
//! Every call is bounded by a timeout. Nothing here is allowed to fail a
//! request: callers log the returned errors and carry on.

use super::catalog;
use super::store::{MetricDesc, MetricStore};
use crate::error::DurableError;

use async_trait::async_trait;
use redis::AsyncCommands as _;
use redis::aio::ConnectionManager;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Entries kept per rolling duration/size list.
pub const ROLLING_WINDOW: isize = 100;

/// Rolling lists expire after an hour without traffic.
pub const ROLLING_TTL_SECS: i64 = 3_600;

const PING_PROBE_KEY: &str = "__prometheus_ping_probe__";

/// Minimal key-value surface the durable cache needs.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), DurableError>;
    async fn get(&self, key: &str) -> Result<Option<String>, DurableError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, DurableError>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, DurableError>;
    async fn incr(&self, key: &str) -> Result<i64, DurableError>;
    async fn lpush(&self, key: &str, value: &str) -> Result<(), DurableError>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), DurableError>;
    async fn expire(&self, key: &str, seconds: i64) -> Result<(), DurableError>;
}

/// Redis-backed [`KeyValueStore`]. Connects on first use and reconnects
/// through the connection manager afterwards.
pub struct RedisStore {
    client: redis::Client,
    connection: tokio::sync::OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, DurableError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: tokio::sync::OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, DurableError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<(), DurableError> {
        let mut connection = self.connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut connection).await?;
        if reply.eq_ignore_ascii_case("pong") {
            Ok(())
        } else {
            Err(DurableError::Unavailable(format!(
                "unexpected PING reply: {reply}"
            )))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DurableError> {
        let mut connection = self.connection().await?;
        let value: Option<String> = connection.get(key).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, DurableError> {
        let mut connection = self.connection().await?;
        let values: HashMap<String, String> = connection.hgetall(key).await?;
        Ok(values)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, DurableError> {
        let mut connection = self.connection().await?;
        let value: i64 = connection.hincr(key, field, delta).await?;
        Ok(value)
    }

    async fn incr(&self, key: &str) -> Result<i64, DurableError> {
        let mut connection = self.connection().await?;
        let value: i64 = connection.incr(key, 1).await?;
        Ok(value)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), DurableError> {
        let mut connection = self.connection().await?;
        let _: i64 = connection.lpush(key, value).await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), DurableError> {
        let mut connection = self.connection().await?;
        let _: () = connection.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), DurableError> {
        let mut connection = self.connection().await?;
        let _: bool = connection.expire(key, seconds).await?;
        Ok(())
    }
}

/// One completed request, as mirrored into the durable cache.
#[derive(Debug, Clone)]
pub struct RequestRecord<'a> {
    pub method: &'a str,
    pub status_code: u16,
    pub route: &'a str,
    pub duration_seconds: f64,
    pub response_bytes: u64,
}

/// Outcome of seeding a store from the durable cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Series restored across all hash-backed counters.
    pub series: usize,
    /// Records that could not be decoded and were skipped.
    pub skipped: usize,
}

/// Counters that are aggregated in Redis hashes, with their key suffix.
const MIRRORED_HASHES: [(&str, MetricDesc<'static>); 3] = [
    ("http_requests_total", catalog::HTTP_REQUESTS_TOTAL),
    ("http_responses_by_status", catalog::HTTP_RESPONSES_BY_STATUS),
    ("http_errors_total", catalog::HTTP_ERRORS_TOTAL),
];

/// Adapter between the metric store and a [`KeyValueStore`].
#[derive(Clone)]
pub struct DurableCache {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    timeout: Duration,
}

impl DurableCache {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            timeout,
        }
    }

    /// Connect to Redis at `url`. Connection errors surface later, through
    /// [`DurableCache::is_available`].
    pub fn redis(
        url: &str,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DurableError> {
        Ok(Self::new(Arc::new(RedisStore::open(url)?), prefix, timeout))
    }

    /// Liveness probe. Falls back to a harmless GET when PING fails; any
    /// error or timeout means unavailable.
    pub async fn is_available(&self) -> bool {
        let ping = match self.bounded(self.store.ping()).await {
            Ok(()) => return true,
            Err(error) => error,
        };

        match self.bounded(self.store.get(PING_PROBE_KEY)).await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(%ping, probe = %error, "durable metric cache unavailable");
                false
            }
        }
    }

    /// Seed the mirrored counters in `store` with the persisted totals.
    ///
    /// Every key is read before anything is applied, so a failed read
    /// leaves `store` untouched. Only counters are restored. Duration and
    /// size lists are write-only history and are not replayed into
    /// histograms.
    pub async fn load_into(&self, store: &MetricStore) -> Result<LoadReport, DurableError> {
        let mut hashes = Vec::with_capacity(MIRRORED_HASHES.len());
        for (suffix, desc) in MIRRORED_HASHES {
            let key = self.key(suffix);
            let records = self.bounded(self.store.hgetall(&key)).await?;
            hashes.push((key, desc, records));
        }
        let executions_key = self.key("middleware_executions");
        let executions = self.bounded(self.store.get(&executions_key)).await?;

        let mut report = LoadReport::default();

        for (key, desc, records) in &hashes {
            let counter = store
                .get_or_register_counter(desc)
                .map_err(|error| DurableError::Decode {
                    key: key.to_owned(),
                    reason: error.to_string(),
                })?;

            for (field, value) in records {
                match decode_record(field, value, desc.labels.len()) {
                    Ok((labels, count)) => {
                        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                        match counter.inc_by(&labels, count as f64) {
                            Ok(()) => report.series += 1,
                            Err(error) => {
                                tracing::warn!(%key, %field, %error, "skipping durable record");
                                report.skipped += 1;
                            }
                        }
                    }
                    Err(reason) => {
                        tracing::warn!(%key, %field, %reason, "skipping durable record");
                        report.skipped += 1;
                    }
                }
            }
        }

        if let Some(raw) = executions {
            let counter = store
                .get_or_register_counter(&catalog::MIDDLEWARE_EXECUTIONS)
                .map_err(|error| DurableError::Decode {
                    key: executions_key.clone(),
                    reason: error.to_string(),
                })?;
            match raw.trim().parse::<u64>() {
                Ok(count) => {
                    if let Err(error) = counter.inc_by(&[], count as f64) {
                        tracing::warn!(key = %executions_key, %error, "skipping durable record");
                        report.skipped += 1;
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        key = %executions_key,
                        value = %raw,
                        %error,
                        "skipping durable record"
                    );
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Mirror one completed request. Stops at the first failed write.
    pub async fn persist(&self, record: &RequestRecord<'_>) -> Result<(), DurableError> {
        let status = record.status_code.to_string();

        let field = encode_field(&[record.method, &status, record.route]);
        self.bounded(self.store.hincrby(&self.key("http_requests_total"), &field, 1))
            .await?;

        let field = encode_field(&[&status, record.route]);
        self.bounded(self.store.hincrby(&self.key("http_responses_by_status"), &field, 1))
            .await?;
        if record.status_code >= 400 {
            self.bounded(self.store.hincrby(&self.key("http_errors_total"), &field, 1))
                .await?;
        }

        self.bounded(self.store.incr(&self.key("middleware_executions")))
            .await?;

        let durations = self.key(&format!("durations:{}:{}", record.method, record.route));
        self.push_rolling(&durations, &record.duration_seconds.to_string())
            .await?;
        let sizes = self.key(&format!("sizes:{}:{}", record.method, record.route));
        self.push_rolling(&sizes, &record.response_bytes.to_string())
            .await?;

        Ok(())
    }

    /// Count an exposition access. Returns the new access count.
    pub async fn touch_access(&self) -> Result<i64, DurableError> {
        self.bounded(self.store.incr(&self.key("metrics_access_count")))
            .await
    }

    async fn push_rolling(&self, key: &str, value: &str) -> Result<(), DurableError> {
        self.bounded(self.store.lpush(key, value)).await?;
        self.bounded(self.store.ltrim(key, 0, ROLLING_WINDOW - 1))
            .await?;
        self.bounded(self.store.expire(key, ROLLING_TTL_SECS)).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, DurableError>>,
    ) -> Result<T, DurableError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| DurableError::Timeout(self.timeout))?
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }
}

impl std::fmt::Debug for DurableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableCache")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Hash fields are JSON arrays of label values in declared order.
fn encode_field(labels: &[&str]) -> String {
    serde_json::to_string(labels).unwrap_or_default()
}

fn decode_record(field: &str, value: &str, arity: usize) -> Result<(Vec<String>, u64), String> {
    let labels: Vec<String> =
        serde_json::from_str(field).map_err(|error| format!("invalid field: {error}"))?;
    if labels.len() != arity {
        return Err(format!("expected {arity} label values, found {}", labels.len()));
    }
    let count = value
        .trim()
        .parse::<u64>()
        .map_err(|error| format!("invalid count {value:?}: {error}"))?;
    Ok((labels, count))
}
