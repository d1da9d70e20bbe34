//! Fixed metric catalog.
//!
//! HTTP and system metrics live in the empty namespace. Business metrics are
//! declared without a namespace and placed under the configured business
//! namespace at registration.

use super::store::MetricDesc;

// -- HTTP --

pub const HTTP_REQUESTS_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_requests_total",
    "Total HTTP requests",
    &["method", "status_code", "route"],
);

pub const HTTP_REQUEST_DURATION_SECONDS: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_request_duration_seconds",
    "HTTP request duration in seconds",
    &["method", "route"],
);

pub const HTTP_RESPONSES_BY_STATUS: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_responses_by_status",
    "HTTP responses by status code",
    &["status_code", "route"],
);

pub const HTTP_RESPONSE_SIZE_BYTES: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_response_size_bytes",
    "HTTP response size in bytes",
    &["method", "route"],
);

pub const HTTP_REQUEST_SIZE_BYTES: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_request_size_bytes",
    "HTTP request size in bytes",
    &["method", "route"],
);

pub const HTTP_ERRORS_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_errors_total",
    "Total HTTP errors",
    &["status_code", "route"],
);

pub const MIDDLEWARE_EXECUTIONS: MetricDesc<'static> = MetricDesc::new(
    "",
    "middleware_executions",
    "Number of middleware executions",
    &[],
);

pub const HTTP_REQUESTS_CONCURRENT: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_requests_concurrent",
    "Number of concurrent HTTP requests",
    &[],
);

// -- Application and system --

pub const APP_INFO: MetricDesc<'static> = MetricDesc::new(
    "",
    "app_info",
    "Application information",
    &["version", "environment"],
);

pub const MEMORY_USAGE_BYTES: MetricDesc<'static> = MetricDesc::new(
    "",
    "php_memory_usage_bytes",
    "Process memory usage in bytes",
    &[],
);

pub const MEMORY_PEAK_BYTES: MetricDesc<'static> = MetricDesc::new(
    "",
    "php_memory_peak_bytes",
    "Process peak memory usage in bytes",
    &[],
);

pub const MEMORY_LIMIT_BYTES: MetricDesc<'static> = MetricDesc::new(
    "",
    "php_memory_limit_bytes",
    "Memory available to the process in bytes",
    &[],
);

pub const PROCESS_UPTIME_SECONDS: MetricDesc<'static> = MetricDesc::new(
    "",
    "process_uptime_seconds",
    "Process uptime in seconds",
    &[],
);

pub const PROCESS_CPU_USAGE_PERCENT: MetricDesc<'static> = MetricDesc::new(
    "",
    "process_cpu_usage_percent",
    "Process CPU usage percentage",
    &[],
);

pub const PROCESS_OPEN_FILES: MetricDesc<'static> = MetricDesc::new(
    "",
    "process_open_files",
    "Number of open file descriptors",
    &[],
);

pub const SYSTEM_LOAD_AVERAGE: MetricDesc<'static> = MetricDesc::new(
    "",
    "system_load_average",
    "System load average",
    &["period"],
);

pub const CACHE_HIT_RATE: MetricDesc<'static> = MetricDesc::new(
    "",
    "php_opcache_hit_rate",
    "Application cache hit rate percentage",
    &[],
);

pub const DATABASE_CONNECTIONS_ACTIVE: MetricDesc<'static> = MetricDesc::new(
    "",
    "database_connections_active",
    "Number of active database connections",
    &[],
);

// -- Exposition endpoint --

pub const METRICS_ENDPOINT_CALLS: MetricDesc<'static> = MetricDesc::new(
    "",
    "metrics_endpoint_calls",
    "Number of times metrics endpoint was called",
    &[],
);

pub const HTTP_REQUESTS_TO_METRICS: MetricDesc<'static> = MetricDesc::new(
    "",
    "http_requests_to_metrics",
    "Requests to metrics endpoint",
    &[],
);

pub const DATABASE_CONNECTED: MetricDesc<'static> = MetricDesc::new(
    "",
    "database_connected",
    "Database connection status",
    &[],
);

pub const METRICS_ERRORS_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "metrics_errors_total",
    "Total metrics collection errors",
    &[],
);

// -- Business (namespace applied at registration) --

pub const TOTAL_PQRS_COUNT: MetricDesc<'static> =
    MetricDesc::new("", "total_pqrs_count", "Total number of PQRS records", &[]);

pub const TOTAL_USERS_COUNT: MetricDesc<'static> =
    MetricDesc::new("", "total_users_count", "Total number of users", &[]);

pub const PQRS_CREATED_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "pqrs_created_total",
    "Total number of PQRS created",
    &["type", "priority", "city"],
);

pub const PQRS_RESOLVED_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "pqrs_resolved_total",
    "Total number of PQRS resolved",
    &["type", "resolved_by", "resolution"],
);

pub const PQRS_RESOLUTION_TIME_SECONDS: MetricDesc<'static> = MetricDesc::new(
    "",
    "pqrs_resolution_time_seconds",
    "Time taken to resolve PQRS in seconds",
    &["type", "resolved_by", "resolution"],
);

pub const PQRS_ACTIVE_TOTAL: MetricDesc<'static> =
    MetricDesc::new("", "pqrs_active_total", "Number of active PQRS", &[]);

pub const USER_LOGINS_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "user_logins_total",
    "Total number of user logins",
    &["role", "method", "successful"],
);

pub const USER_REGISTRATIONS_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "user_registrations_total",
    "Total number of user registrations",
    &["role", "method"],
);

pub const USERS_ACTIVE_TOTAL: MetricDesc<'static> =
    MetricDesc::new("", "users_active_total", "Number of active users", &[]);

pub const DATABASE_QUERIES_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "database_queries_total",
    "Total number of database queries",
    &["operation", "table"],
);

pub const DATABASE_QUERY_DURATION_SECONDS: MetricDesc<'static> = MetricDesc::new(
    "",
    "database_query_duration_seconds",
    "Duration of database queries in seconds",
    &["operation", "table"],
);

pub const CACHE_HITS_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "cache_hits_total",
    "Total number of cache hits",
    &["store", "key_prefix"],
);

pub const CACHE_MISSES_TOTAL: MetricDesc<'static> = MetricDesc::new(
    "",
    "cache_misses_total",
    "Total number of cache misses",
    &["store", "key_prefix"],
);

// -- Buckets --

/// Latency buckets in seconds.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

/// Payload size buckets in bytes.
pub const SIZE_BUCKETS: &[f64] = &[
    100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0, 1_000_000.0,
    5_000_000.0,
];

/// Ticket resolution buckets in seconds, from one hour to thirty days.
pub const RESOLUTION_BUCKETS: &[f64] = &[
    3_600.0, 14_400.0, 28_800.0, 86_400.0, 172_800.0, 432_000.0, 864_000.0, 1_296_000.0,
    2_592_000.0,
];
