//! Scraped metric values and their line-oriented rendering.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write;

use serde_json::Number;

use crate::naming::format_labels;
use crate::scraper::{RawValue, ScrapedMetric};

/// Label under which free-text values are exposed.
pub const TEXT_VALUE_LABEL: &str = "value";

/// Value reported for a metric which carries its text in a label.
pub const TEXT_SENTINEL: i64 = 1;

/// The value of one formatted metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A numeric field, kept in its JSON representation.
    Number(Number),
    /// A dummy-coded categorical string, or the free-text sentinel.
    Index(i64),
}

impl MetricValue {
    /// The value as a float.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Number(n) => n.as_f64().unwrap_or(f64::NAN),
            Self::Index(i) => *i as f64,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Number(v.into())
    }
}

/// Fully formatted metric names (including any `{labels}`) mapped to values.
pub type MetricsMap = BTreeMap<String, MetricValue>;

/// Format scraped metrics into a metrics map.
///
/// Free-text values move into a `value` label and report [`TEXT_SENTINEL`].
pub fn into_metrics_map(metrics: Vec<ScrapedMetric>) -> MetricsMap {
    metrics
        .into_iter()
        .map(|metric| {
            let ScrapedMetric {
                name,
                mut labels,
                value,
                ..
            } = metric;

            let value = match value {
                RawValue::Number(n) => MetricValue::Number(n),
                RawValue::Index(i) => MetricValue::Index(i),
                RawValue::Text(text) => {
                    labels.push((TEXT_VALUE_LABEL.to_string(), text));
                    MetricValue::Index(TEXT_SENTINEL)
                }
            };

            (format!("{}{}", name, format_labels(&labels)), value)
        })
        .collect()
}

/// Render a metrics map as `name{labels} value` lines, sorted by name.
pub fn format_metric_lines(metrics: &MetricsMap) -> String {
    let mut output = String::with_capacity(metrics.len() * 64);
    for (name, value) in metrics {
        writeln!(output, "{} {}", name, value).ok();
    }
    output
}
