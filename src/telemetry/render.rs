//! Prometheus text exposition rendering.

use super::store::{FamilySnapshot, SampleValue};
use crate::error::MetricsError;

use std::fmt::Write as _;

/// Content type for the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render families in the given order. Families without samples are skipped.
pub fn render(families: &[FamilySnapshot]) -> Result<String, MetricsError> {
    let mut out = String::new();

    for family in families {
        if family.samples.is_empty() {
            continue;
        }

        writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help))?;
        writeln!(out, "# TYPE {} {}", family.name, family.kind)?;

        for sample in &family.samples {
            match &sample.value {
                SampleValue::Scalar(value) => {
                    write_line(
                        &mut out,
                        &family.name,
                        &family.label_names,
                        &sample.label_values,
                        None,
                        *value,
                    )?;
                }
                SampleValue::Histogram(histogram) => {
                    let bucket_name = format!("{}_bucket", family.name);
                    for (upper_bound, count) in &histogram.buckets {
                        write_line(
                            &mut out,
                            &bucket_name,
                            &family.label_names,
                            &sample.label_values,
                            Some(&format_value(*upper_bound)),
                            *count as f64,
                        )?;
                    }
                    write_line(
                        &mut out,
                        &bucket_name,
                        &family.label_names,
                        &sample.label_values,
                        Some("+Inf"),
                        histogram.count as f64,
                    )?;
                    write_line(
                        &mut out,
                        &format!("{}_sum", family.name),
                        &family.label_names,
                        &sample.label_values,
                        None,
                        histogram.sum,
                    )?;
                    write_line(
                        &mut out,
                        &format!("{}_count", family.name),
                        &family.label_names,
                        &sample.label_values,
                        None,
                        histogram.count as f64,
                    )?;
                }
            }
        }
    }

    Ok(out)
}

fn write_line(
    out: &mut String,
    name: &str,
    label_names: &[String],
    label_values: &[String],
    le: Option<&str>,
    value: f64,
) -> std::fmt::Result {
    out.push_str(name);

    if !label_names.is_empty() || le.is_some() {
        out.push('{');
        let mut first = true;
        for (label, label_value) in label_names.iter().zip(label_values) {
            if !first {
                out.push(',');
            }
            first = false;
            write!(out, "{}=\"{}\"", label, escape_label_value(label_value))?;
        }
        if let Some(le) = le {
            if !first {
                out.push(',');
            }
            write!(out, "le=\"{le}\"")?;
        }
        out.push('}');
    }

    writeln!(out, " {}", format_value(value))
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value == f64::INFINITY {
        "+Inf".into()
    } else if value == f64::NEG_INFINITY {
        "-Inf".into()
    } else {
        format!("{value}")
    }
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::store::{MetricDesc, MetricStore};

    #[test]
    fn renders_counters_with_declared_label_order() {
        let store = MetricStore::new();
        let counter = store
            .get_or_register_counter(&MetricDesc::new(
                "",
                "http_requests_total",
                "Total HTTP requests",
                &["method", "status_code", "route"],
            ))
            .expect("counter should register");
        for _ in 0..3 {
            counter.inc(&["GET", "200", "api_pqrs"]).expect("increment should succeed");
        }

        let text = render(&store.snapshot()).expect("render should succeed");
        assert_eq!(
            text,
            "# HELP http_requests_total Total HTTP requests\n\
             # TYPE http_requests_total counter\n\
             http_requests_total{method=\"GET\",status_code=\"200\",route=\"api_pqrs\"} 3\n"
        );
    }

    #[test]
    fn renders_histogram_buckets_sum_and_count() {
        let store = MetricStore::new();
        let histogram = store
            .get_or_register_histogram(
                &MetricDesc::new(
                    "",
                    "http_response_size_bytes",
                    "HTTP response size in bytes",
                    &["method", "route"],
                ),
                &[100.0, 1000.0],
            )
            .expect("histogram should register");
        histogram.observe(&["GET", "root"], 250.0).expect("observe should succeed");

        let text = render(&store.snapshot()).expect("render should succeed");
        let expected = "# HELP http_response_size_bytes HTTP response size in bytes\n\
# TYPE http_response_size_bytes histogram\n\
http_response_size_bytes_bucket{method=\"GET\",route=\"root\",le=\"100\"} 0\n\
http_response_size_bytes_bucket{method=\"GET\",route=\"root\",le=\"1000\"} 1\n\
http_response_size_bytes_bucket{method=\"GET\",route=\"root\",le=\"+Inf\"} 1\n\
http_response_size_bytes_sum{method=\"GET\",route=\"root\"} 250\n\
http_response_size_bytes_count{method=\"GET\",route=\"root\"} 1\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn unlabeled_gauge_has_no_braces() {
        let store = MetricStore::new();
        let gauge = store
            .get_or_register_gauge(&MetricDesc::new(
                "pqrs",
                "total_users_count",
                "Total number of users",
                &[],
            ))
            .expect("gauge should register");
        gauge.set(&[], 12.0).expect("set should succeed");

        let text = render(&store.snapshot()).expect("render should succeed");
        assert!(text.contains("\npqrs_total_users_count 12\n"));
    }

    #[test]
    fn skips_families_without_samples() {
        let store = MetricStore::new();
        store
            .get_or_register_counter(&MetricDesc::new(
                "",
                "http_errors_total",
                "Total HTTP errors",
                &["status_code", "route"],
            ))
            .expect("counter should register");

        assert_eq!(render(&store.snapshot()).expect("render should succeed"), "");
    }

    #[test]
    fn escapes_label_values_and_help() {
        let store = MetricStore::new();
        let gauge = store
            .get_or_register_gauge(&MetricDesc::new(
                "",
                "app_info",
                "Application\ninformation",
                &["version"],
            ))
            .expect("gauge should register");
        gauge.set(&["1.0 \"beta\"\\x"], 1.0).expect("set should succeed");

        let text = render(&store.snapshot()).expect("render should succeed");
        assert!(text.contains("# HELP app_info Application\\ninformation\n"));
        assert!(text.contains("app_info{version=\"1.0 \\\"beta\\\"\\\\x\"} 1\n"));
    }

    #[test]
    fn special_float_values() {
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(0.25), "0.25");
    }

    #[test]
    fn rendering_unchanged_state_is_byte_identical() {
        let store = MetricStore::new();
        let counter = store
            .get_or_register_counter(&MetricDesc::new(
                "",
                "http_requests_total",
                "Total HTTP requests",
                &["method", "status_code", "route"],
            ))
            .expect("counter should register");
        for route in ["users", "pqrs", "answers", "roles"] {
            counter.inc(&["GET", "200", route]).expect("increment should succeed");
        }

        let first = render(&store.snapshot()).expect("render should succeed");
        let second = render(&store.snapshot()).expect("render should succeed");
        assert_eq!(first, second);
    }
}
