//! Walks a JSON response guided by a selector tree.

use serde_json::{Map, Number, Value};
use tracing::trace;

use crate::naming::snake_case;
use crate::selector::{Selector, TYPE_FIELD_NAME};

/// Field wrapping the members of a collection: `{"items": [...]}`.
pub const ITEMS_FIELD: &str = "items";

/// A captured value before formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(Number),
    /// Index of a categorical string within its accepted list, or -1.
    Index(i64),
    /// Free text, captured only by selectors that accept strings.
    Text(String),
}

/// One metric produced by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedMetric {
    /// The response field the value came from.
    pub field: String,
    /// The metric name: optional prefix plus field name, in the configured case.
    pub name: String,
    /// Qualifier labels, outermost first.
    pub labels: Vec<(String, String)>,
    pub value: RawValue,
}

/// Scrapes metrics from management API responses.
#[derive(Debug, Clone, Default)]
pub struct MetricsScraper {
    snake_case: bool,
    global_labels: Vec<(String, String)>,
}

impl MetricsScraper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert prefixes and field names to snake case.
    pub fn with_snake_case(mut self, snake_case: bool) -> Self {
        self.snake_case = snake_case;
        self
    }

    /// Add a label appended to every metric.
    pub fn with_global_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.global_labels.push((name.into(), value.into()));
        self
    }

    /// Scrape `response` according to `selector`.
    ///
    /// Missing fields, type mismatches and values which cannot be expressed as
    /// numbers are skipped.
    pub fn scrape(&self, selector: &Selector, response: &Value) -> Vec<ScrapedMetric> {
        let mut metrics = Vec::new();
        if let Value::Object(object) = response {
            self.scrape_item(object, selector, &[], &mut metrics);
        }

        if !self.global_labels.is_empty() {
            for metric in &mut metrics {
                metric.labels.extend(self.global_labels.iter().cloned());
            }
        }

        metrics
    }

    fn scrape_item_list(
        &self,
        wrapper: &Map<String, Value>,
        selector: &Selector,
        parent_labels: &[(String, String)],
        metrics: &mut Vec<ScrapedMetric>,
    ) {
        match wrapper.get(ITEMS_FIELD) {
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(object) = item {
                        self.scrape_item(object, selector, parent_labels, metrics);
                    }
                }
            }
            _ => self.scrape_item(wrapper, selector, parent_labels, metrics),
        }
    }

    fn scrape_item(
        &self,
        object: &Map<String, Value>,
        selector: &Selector,
        parent_labels: &[(String, String)],
        metrics: &mut Vec<ScrapedMetric>,
    ) {
        if excluded_by_type(object, selector) || excluded_by_key(object, selector) {
            return;
        }

        let labels = item_labels(object, selector, parent_labels);

        let fields: Vec<&str> = if selector.use_all_values() {
            object.keys().map(String::as_str).collect()
        } else {
            selector.query_values()
        };

        for field in fields {
            if selector.key() == Some(field) {
                continue;
            }
            let Some(value) = object.get(field) else {
                continue;
            };
            if let Some(value) = metric_value(selector, field, value) {
                metrics.push(ScrapedMetric {
                    field: field.to_string(),
                    name: self.metric_name(selector, field),
                    labels: labels.clone(),
                    value,
                });
            }
        }

        for (name, child) in selector.children() {
            match object.get(name) {
                Some(Value::Object(nested)) => {
                    self.scrape_item_list(nested, child, &labels, metrics)
                }
                Some(other) => trace!(field = name, value = %other, "Nested field is not an object"),
                None => {}
            }
        }
    }

    fn metric_name(&self, selector: &Selector, field: &str) -> String {
        let mut name = String::new();
        if let Some(prefix) = selector.prefix() {
            name.push_str(&self.with_case(prefix));
        }
        name.push_str(&self.with_case(field));
        name
    }

    fn with_case(&self, name: &str) -> String {
        if self.snake_case {
            snake_case(name)
        } else {
            name.to_string()
        }
    }
}

fn excluded_by_type(object: &Map<String, Value>, selector: &Selector) -> bool {
    match (selector.type_filter(), object.get(TYPE_FIELD_NAME)) {
        (Some(filter), Some(actual)) => scalar_label(actual).is_none_or(|actual| actual != filter),
        _ => false,
    }
}

/// True if the object's key value is rejected by the selector's key patterns.
///
/// Servers which ignore the key filter in a query still return every member,
/// so the patterns are applied here as well.
fn excluded_by_key(object: &Map<String, Value>, selector: &Selector) -> bool {
    if !selector.has_key_filter() {
        return false;
    }
    selector
        .key()
        .and_then(|key| object.get(key))
        .and_then(scalar_label)
        .is_some_and(|value| !selector.selects_key(&value))
}

/// Append this object's key label, if any, to the parent labels.
///
/// A label name already present earlier in the chain gets a `2` suffix. The
/// suffix is applied once: a third level reusing the name also becomes
/// `name2`, which yields a duplicate label name that Prometheus rejects.
fn item_labels(
    object: &Map<String, Value>,
    selector: &Selector,
    parent_labels: &[(String, String)],
) -> Vec<(String, String)> {
    let mut labels = parent_labels.to_vec();

    let (Some(key), Some(label_name)) = (selector.key(), selector.key_name()) else {
        return labels;
    };
    let Some(value) = object.get(key).and_then(scalar_label) else {
        return labels;
    };

    let label_name = if labels.iter().any(|(name, _)| name == label_name) {
        format!("{}2", label_name)
    } else {
        label_name.to_string()
    };
    labels.push((label_name, value));
    labels
}

fn scalar_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn metric_value(selector: &Selector, field: &str, value: &Value) -> Option<RawValue> {
    match value {
        Value::Number(n) => Some(RawValue::Number(n.clone())),
        Value::String(s) => {
            if let Some(index) = selector.string_metric_value(field, s) {
                Some(RawValue::Index(index))
            } else if selector.query_type().accepts_strings() {
                Some(RawValue::Text(s.clone()))
            } else {
                trace!(field, "Skipping string value");
                None
            }
        }
        _ => None,
    }
}
