//! In-process metric store with typed handles.
//!
//! Metrics are identified by a `(namespace, name)` [`MetricKey`]. Each
//! registration returns a handle of the requested kind; handles are cheap
//! to clone (Arc internally) and every clone mutates the same series. The
//! underlying primitives are prometheus vectors, which serialize updates
//! with atomics so concurrent handlers never lose increments.
//!
//! Snapshots list families in registration order and samples sorted by
//! label values, with label values in declared label order.

use crate::error::MetricsError;

use parking_lot::RwLock;
use prometheus::core::Collector as _;
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts};

use std::collections::HashMap;
use std::sync::Arc;

/// Identity of a metric family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// Empty for system and HTTP metrics, e.g. `pqrs` for business metrics.
    pub namespace: String,
    pub name: String,
}

impl MetricKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Name as exposed to scrapers: `<namespace>_<name>` or just `<name>`.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}_{}", self.namespace, self.name)
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}_{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static description of a metric family, used for registration.
#[derive(Debug, Clone, Copy)]
pub struct MetricDesc<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub help: &'a str,
    pub labels: &'a [&'a str],
}

impl<'a> MetricDesc<'a> {
    pub const fn new(
        namespace: &'a str,
        name: &'a str,
        help: &'a str,
        labels: &'a [&'a str],
    ) -> Self {
        Self {
            namespace,
            name,
            help,
            labels,
        }
    }

    /// Same description under another namespace.
    pub const fn in_namespace<'b>(self, namespace: &'b str) -> MetricDesc<'b>
    where
        'a: 'b,
    {
        MetricDesc {
            namespace,
            name: self.name,
            help: self.help,
            labels: self.labels,
        }
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.namespace, self.name)
    }

    fn opts(&self) -> Opts {
        let opts = Opts::new(self.name, self.help);
        if self.namespace.is_empty() {
            opts
        } else {
            opts.namespace(self.namespace)
        }
    }

    fn histogram_opts(&self, buckets: &[f64]) -> HistogramOpts {
        let opts = HistogramOpts::new(self.name, self.help).buckets(buckets.to_vec());
        if self.namespace.is_empty() {
            opts
        } else {
            opts.namespace(self.namespace)
        }
    }
}

/// Monotonic counter handle.
#[derive(Clone)]
pub struct Counter {
    name: Arc<str>,
    label_names: Arc<[String]>,
    inner: CounterVec,
}

impl Counter {
    pub fn inc(&self, labels: &[&str]) -> Result<(), MetricsError> {
        self.inc_by(labels, 1.0)
    }

    /// Add `delta` to the series. Negative or NaN deltas are rejected and
    /// leave the series unchanged.
    pub fn inc_by(&self, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        if delta.is_nan() || delta < 0.0 {
            return Err(MetricsError::InvalidMetricOperation {
                metric: self.name.to_string(),
                reason: format!("counter delta must be non-negative, got {delta}"),
            });
        }
        self.inner.get_metric_with_label_values(labels)?.inc_by(delta);
        Ok(())
    }

    /// Current value of one series, without creating it.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        scalar_value(&self.inner.collect(), &self.label_names, labels)
    }

    /// Sum over every series of this counter.
    pub fn total(&self) -> f64 {
        self.inner
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_counter().get_value())
            .sum()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Freely settable gauge handle.
#[derive(Clone)]
pub struct Gauge {
    name: Arc<str>,
    label_names: Arc<[String]>,
    inner: GaugeVec,
}

impl Gauge {
    pub fn set(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        self.inner.get_metric_with_label_values(labels)?.set(value);
        Ok(())
    }

    pub fn inc(&self, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        self.inner.get_metric_with_label_values(labels)?.add(delta);
        Ok(())
    }

    pub fn dec(&self, labels: &[&str], delta: f64) -> Result<(), MetricsError> {
        self.inner.get_metric_with_label_values(labels)?.sub(delta);
        Ok(())
    }

    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        scalar_value(&self.inner.collect(), &self.label_names, labels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Bucketed distribution handle.
#[derive(Clone)]
pub struct Histogram {
    name: Arc<str>,
    inner: HistogramVec,
}

impl Histogram {
    /// Record `value` in the first bucket whose upper bound is `>= value`,
    /// plus the implicit `+Inf` bucket, sum and count.
    pub fn observe(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        self.inner.get_metric_with_label_values(labels)?.observe(value);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// -- Snapshots --

#[derive(Debug, Clone, PartialEq)]
pub struct FamilySnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    pub samples: Vec<Sample>,
}

impl FamilySnapshot {
    /// Scalar value of a counter or gauge series.
    pub fn value(&self, labels: &[&str]) -> Option<f64> {
        self.sample(labels).and_then(|sample| match &sample.value {
            SampleValue::Scalar(value) => Some(*value),
            SampleValue::Histogram(_) => None,
        })
    }

    pub fn sample(&self, labels: &[&str]) -> Option<&Sample> {
        self.samples.iter().find(|sample| {
            sample.label_values.len() == labels.len()
                && sample
                    .label_values
                    .iter()
                    .zip(labels)
                    .all(|(have, want)| have == want)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Values in declared label-name order.
    pub label_values: Vec<String>,
    pub value: SampleValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Scalar(f64),
    Histogram(HistogramSample),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSample {
    /// `(upper bound, cumulative count)` per finite bucket, ascending.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

// -- Store --

#[derive(Clone)]
enum Collector {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
}

impl Collector {
    fn kind(&self) -> MetricKind {
        match self {
            Collector::Counter(_) => MetricKind::Counter,
            Collector::Gauge(_) => MetricKind::Gauge,
            Collector::Histogram(_) => MetricKind::Histogram,
        }
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self {
            Collector::Counter(inner) => inner.collect(),
            Collector::Gauge(inner) => inner.collect(),
            Collector::Histogram(inner) => inner.collect(),
        }
    }

    /// Label-less families get their single series up front so they render
    /// as zero before the first update.
    fn materialize_unlabeled(&self) -> Result<(), MetricsError> {
        match self {
            Collector::Counter(inner) => {
                inner.get_metric_with_label_values(&[])?;
            }
            Collector::Gauge(inner) => {
                inner.get_metric_with_label_values(&[])?;
            }
            Collector::Histogram(inner) => {
                inner.get_metric_with_label_values(&[])?;
            }
        }
        Ok(())
    }
}

struct Family {
    key: MetricKey,
    full_name: Arc<str>,
    help: String,
    label_names: Arc<[String]>,
    collector: Collector,
}

#[derive(Default)]
struct Families {
    ordered: Vec<Family>,
    index: HashMap<MetricKey, usize>,
}

struct Registered {
    full_name: Arc<str>,
    label_names: Arc<[String]>,
    collector: Collector,
}

/// Registry of metric families for one process.
#[derive(Default)]
pub struct MetricStore {
    families: RwLock<Families>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_register_counter(&self, desc: &MetricDesc<'_>) -> Result<Counter, MetricsError> {
        let registered = self.get_or_register(desc, MetricKind::Counter, |desc| {
            Ok(Collector::Counter(CounterVec::new(desc.opts(), desc.labels)?))
        })?;
        match registered.collector {
            Collector::Counter(inner) => Ok(Counter {
                name: registered.full_name,
                label_names: registered.label_names,
                inner,
            }),
            other => Err(conflict(desc, other.kind(), MetricKind::Counter)),
        }
    }

    pub fn get_or_register_gauge(&self, desc: &MetricDesc<'_>) -> Result<Gauge, MetricsError> {
        let registered = self.get_or_register(desc, MetricKind::Gauge, |desc| {
            Ok(Collector::Gauge(GaugeVec::new(desc.opts(), desc.labels)?))
        })?;
        match registered.collector {
            Collector::Gauge(inner) => Ok(Gauge {
                name: registered.full_name,
                label_names: registered.label_names,
                inner,
            }),
            other => Err(conflict(desc, other.kind(), MetricKind::Gauge)),
        }
    }

    /// Buckets only apply on first registration.
    pub fn get_or_register_histogram(
        &self,
        desc: &MetricDesc<'_>,
        buckets: &[f64],
    ) -> Result<Histogram, MetricsError> {
        let registered = self.get_or_register(desc, MetricKind::Histogram, |desc| {
            Ok(Collector::Histogram(HistogramVec::new(
                desc.histogram_opts(buckets),
                desc.labels,
            )?))
        })?;
        match registered.collector {
            Collector::Histogram(inner) => Ok(Histogram {
                name: registered.full_name,
                inner,
            }),
            other => Err(conflict(desc, other.kind(), MetricKind::Histogram)),
        }
    }

    fn get_or_register(
        &self,
        desc: &MetricDesc<'_>,
        requested: MetricKind,
        build: impl FnOnce(&MetricDesc<'_>) -> Result<Collector, MetricsError>,
    ) -> Result<Registered, MetricsError> {
        let key = desc.key();

        if let Some(registered) = self.lookup(&key, desc, requested) {
            return Ok(registered);
        }

        let mut families = self.families.write();
        // Another handler may have registered it between the two locks.
        if let Some(&index) = families.index.get(&key) {
            return Ok(Self::reuse(&families.ordered[index], desc, requested));
        }

        let collector = build(desc)?;
        if desc.labels.is_empty() {
            collector.materialize_unlabeled()?;
        }

        let family = Family {
            full_name: Arc::from(key.full_name()),
            key: key.clone(),
            help: desc.help.to_string(),
            label_names: desc.labels.iter().map(|label| label.to_string()).collect(),
            collector,
        };
        let registered = Registered {
            full_name: family.full_name.clone(),
            label_names: family.label_names.clone(),
            collector: family.collector.clone(),
        };

        let index = families.ordered.len();
        families.ordered.push(family);
        families.index.insert(key, index);
        Ok(registered)
    }

    fn lookup(
        &self,
        key: &MetricKey,
        desc: &MetricDesc<'_>,
        requested: MetricKind,
    ) -> Option<Registered> {
        let families = self.families.read();
        let index = *families.index.get(key)?;
        Some(Self::reuse(&families.ordered[index], desc, requested))
    }

    fn reuse(family: &Family, desc: &MetricDesc<'_>, requested: MetricKind) -> Registered {
        let same_labels = family.label_names.len() == desc.labels.len()
            && family
                .label_names
                .iter()
                .zip(desc.labels)
                .all(|(have, want)| have == want);
        if family.collector.kind() == requested && !same_labels {
            tracing::warn!(
                metric = %family.key,
                registered = ?family.label_names,
                requested = ?desc.labels,
                "metric re-registered with different labels, reusing the first registration"
            );
        }
        Registered {
            full_name: family.full_name.clone(),
            label_names: family.label_names.clone(),
            collector: family.collector.clone(),
        }
    }

    pub fn contains(&self, key: &MetricKey) -> bool {
        self.families.read().index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.families.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every family. Does not mutate any series.
    pub fn snapshot(&self) -> Vec<FamilySnapshot> {
        let families = self.families.read();
        families.ordered.iter().map(snapshot_family).collect()
    }

    /// Snapshot of a single family by identity.
    pub fn find(&self, key: &MetricKey) -> Option<FamilySnapshot> {
        let families = self.families.read();
        let index = *families.index.get(key)?;
        Some(snapshot_family(&families.ordered[index]))
    }
}

fn conflict(desc: &MetricDesc<'_>, existing: MetricKind, requested: MetricKind) -> MetricsError {
    MetricsError::RegistrationConflict {
        metric: desc.key().full_name(),
        existing: existing.as_str(),
        requested: requested.as_str(),
    }
}

fn snapshot_family(family: &Family) -> FamilySnapshot {
    let kind = family.collector.kind();
    let mut samples: Vec<Sample> = family
        .collector
        .collect()
        .iter()
        .flat_map(|proto| proto.get_metric())
        .map(|metric| {
            let label_values = ordered_label_values(metric, &family.label_names);
            let value = match kind {
                MetricKind::Counter => SampleValue::Scalar(metric.get_counter().get_value()),
                MetricKind::Gauge => SampleValue::Scalar(metric.get_gauge().get_value()),
                MetricKind::Histogram => {
                    let histogram = metric.get_histogram();
                    SampleValue::Histogram(HistogramSample {
                        buckets: histogram
                            .get_bucket()
                            .iter()
                            .map(|bucket| (bucket.get_upper_bound(), bucket.get_cumulative_count()))
                            .collect(),
                        sum: histogram.get_sample_sum(),
                        count: histogram.get_sample_count(),
                    })
                }
            };
            Sample {
                label_values,
                value,
            }
        })
        .collect();
    samples.sort_by(|a, b| a.label_values.cmp(&b.label_values));

    FamilySnapshot {
        name: family.full_name.to_string(),
        help: family.help.clone(),
        kind,
        label_names: family.label_names.to_vec(),
        samples,
    }
}

/// Prometheus keeps label pairs sorted by name; put them back in declared order.
fn ordered_label_values(metric: &prometheus::proto::Metric, label_names: &[String]) -> Vec<String> {
    let pairs: HashMap<&str, &str> = metric
        .get_label()
        .iter()
        .map(|pair| (pair.get_name(), pair.get_value()))
        .collect();
    label_names
        .iter()
        .map(|name| pairs.get(name.as_str()).copied().unwrap_or_default().to_string())
        .collect()
}

fn scalar_value(families: &[MetricFamily], label_names: &[String], labels: &[&str]) -> Option<f64> {
    families
        .iter()
        .flat_map(|family| family.get_metric())
        .find(|metric| {
            let values = ordered_label_values(metric, label_names);
            values.len() == labels.len()
                && values.iter().zip(labels).all(|(have, want)| have == want)
        })
        .map(|metric| {
            if metric.has_counter() {
                metric.get_counter().get_value()
            } else {
                metric.get_gauge().get_value()
            }
        })
}
