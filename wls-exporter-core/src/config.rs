//! The exporter configuration: naming settings plus the forest of top-level
//! selectors, loaded from a JSON5 queries document.

use std::fmt;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ConfigError, NO_QUERY_SYNC_URL, NOT_A_MAPPING, Result};
use crate::keys::SelectedKeys;
use crate::metrics::{MetricsMap, into_metrics_map};
use crate::query::{FORBIDDEN_FIELDS, QueryDocument};
use crate::scraper::MetricsScraper;
use crate::selector::Selector;

pub const SNAKE_CASE_KEY: &str = "metricsNameSnakeCase";
pub const DOMAIN_QUALIFIER_KEY: &str = "domainQualifier";
pub const REST_PORT_KEY: &str = "restPort";
pub const QUERY_SYNC_KEY: &str = "query_sync";
pub const QUERIES_KEY: &str = "queries";

const URL_KEY: &str = "url";
const INTERVAL_KEY: &str = "interval";

/// Label carrying the discovered domain name.
pub const DOMAIN_LABEL: &str = "domain";

/// Default refresh interval for configuration sync, in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

const TRUE_VALUES: &[&str] = &["true", "t", "yes", "on", "y"];
const FALSE_VALUES: &[&str] = &["false", "f", "no", "off", "n"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Where peers exchange configuration updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySyncConfig {
    pub url: String,
    pub interval_secs: u64,
}

impl QuerySyncConfig {
    fn from_document(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(ConfigError::invalid(NO_QUERY_SYNC_URL));
        };
        let url = match map.get(URL_KEY) {
            Some(Value::String(url)) => url.clone(),
            Some(Value::Null) | None => return Err(ConfigError::invalid(NO_QUERY_SYNC_URL)),
            Some(other) => other.to_string(),
        };
        let interval_secs = match map.get(INTERVAL_KEY) {
            Some(value) => parse_integer(INTERVAL_KEY, value)?,
            None => DEFAULT_SYNC_INTERVAL_SECS,
        };
        Ok(Self { url, interval_secs })
    }

    fn to_document(&self) -> Value {
        let mut map = Map::new();
        map.insert(URL_KEY.to_string(), Value::String(self.url.clone()));
        map.insert(INTERVAL_KEY.to_string(), Value::from(self.interval_secs));
        Value::Object(map)
    }
}

/// The exporter configuration.
///
/// Everything except the discovered domain name is fixed once built; changes
/// are made by building a new configuration (see [`crate::LiveConfiguration`]).
#[derive(Debug, Default)]
pub struct ExporterConfig {
    queries: Vec<Selector>,
    metrics_name_snake_case: bool,
    use_domain_qualifier: bool,
    rest_port: Option<u16>,
    query_sync: Option<QuerySyncConfig>,
    domain_name: RwLock<Option<String>>,
}

impl Clone for ExporterConfig {
    fn clone(&self) -> Self {
        Self {
            queries: self.queries.clone(),
            metrics_name_snake_case: self.metrics_name_snake_case,
            use_domain_qualifier: self.use_domain_qualifier,
            rest_port: self.rest_port,
            query_sync: self.query_sync.clone(),
            domain_name: RwLock::new(self.domain_name.read().clone()),
        }
    }
}

impl ExporterConfig {
    /// Parse a JSON5 queries document. Blank text yields an empty configuration.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let document: Value = json5::from_str(content)?;
        Self::from_document(&document)
    }

    /// Load a queries document from a file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Build a configuration from an already-parsed document.
    pub fn from_document(document: &Value) -> Result<Self> {
        let map = match document {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::default()),
            _ => return Err(ConfigError::invalid(NOT_A_MAPPING)),
        };

        let mut config = Self::default();
        for (key, value) in map {
            match key.as_str() {
                SNAKE_CASE_KEY => config.metrics_name_snake_case = parse_bool(key, value)?,
                DOMAIN_QUALIFIER_KEY => config.use_domain_qualifier = parse_bool(key, value)?,
                REST_PORT_KEY => config.rest_port = Some(parse_integer(key, value)?),
                QUERY_SYNC_KEY => config.query_sync = Some(QuerySyncConfig::from_document(value)?),
                QUERIES_KEY => {
                    for selector in parse_queries(value)? {
                        config.append_query(selector);
                    }
                }
                _ => debug!(key = %key, "Ignoring unrecognized configuration key"),
            }
        }

        Ok(config)
    }

    /// Add a top-level selector, merging it into a compatible existing one.
    ///
    /// An existing query is compatible when it has exactly the same child names
    /// and each same-named child pair may be merged.
    pub fn append_query(&mut self, selector: Selector) {
        match self
            .queries
            .iter_mut()
            .find(|query| is_mergeable_top_level(query, &selector))
        {
            Some(existing) => {
                debug!("Merging query into existing top-level selector");
                *existing = existing.merge(&selector);
            }
            None => {
                debug!("Adding new top-level selector");
                self.queries.push(selector);
            }
        }
    }

    /// Fold every query of `other` into this configuration.
    ///
    /// Naming and labelling settings are left as they are.
    pub fn append(&mut self, other: &ExporterConfig) {
        for query in &other.queries {
            self.append_query(query.clone());
        }
    }

    /// Take the queries and settings of `other`, forgetting the discovered domain.
    ///
    /// The sync location is deployment-level and stays unchanged.
    pub fn replace(&mut self, other: &ExporterConfig) {
        self.queries = other.queries.clone();
        self.metrics_name_snake_case = other.metrics_name_snake_case;
        self.use_domain_qualifier = other.use_domain_qualifier;
        self.rest_port = other.rest_port;
        *self.domain_name.get_mut() = None;
    }

    /// The configured top-level selectors.
    pub fn queries(&self) -> &[Selector] {
        &self.queries
    }

    /// True if at least one query is configured.
    pub fn has_queries(&self) -> bool {
        !self.queries.is_empty()
    }

    /// The selectors to run on a scrape, with the domain-name query first while
    /// the domain is still unknown and qualification is enabled.
    pub fn effective_queries(&self) -> Vec<&Selector> {
        let mut queries = Vec::with_capacity(self.queries.len() + 1);
        if self.use_domain_qualifier && self.domain_name.read().is_none() {
            queries.push(Selector::domain_name_selector());
        }
        queries.extend(self.queries.iter());
        queries
    }

    /// The query document to send for `selector`.
    pub fn request_for(&self, selector: &Selector) -> QueryDocument {
        selector.to_restricted_query_document(FORBIDDEN_FIELDS)
    }

    /// The query document for `selector`, limited to the keys its patterns accepted.
    pub fn request_with_keys(&self, selector: &Selector, keys: &SelectedKeys) -> QueryDocument {
        let mut document = self.request_for(selector);
        keys.apply_to(selector, &mut document);
        document
    }

    /// Scrape a response for `selector` and run the selector's post-scrape hook.
    ///
    /// A domain name found by the hook labels every later scrape.
    pub fn scrape(&self, selector: &Selector, response: &Value) -> MetricsMap {
        let mut scraper = MetricsScraper::new().with_snake_case(self.metrics_name_snake_case);
        if let Some(domain) = self.domain_name() {
            scraper = scraper.with_global_label(DOMAIN_LABEL, domain);
        }

        let mut metrics = scraper.scrape(selector, response);
        if let Some(domain) = selector.query_type().post_process(&mut metrics) {
            info!(domain = %domain, "Discovered domain name");
            *self.domain_name.write() = Some(domain);
        }

        into_metrics_map(metrics)
    }

    pub fn metrics_name_snake_case(&self) -> bool {
        self.metrics_name_snake_case
    }

    pub fn use_domain_qualifier(&self) -> bool {
        self.use_domain_qualifier
    }

    /// Port of the management API, when it differs from the scraped server's port.
    pub fn rest_port(&self) -> Option<u16> {
        self.rest_port
    }

    pub fn query_sync(&self) -> Option<&QuerySyncConfig> {
        self.query_sync.as_ref()
    }

    /// The discovered domain name, if any.
    pub fn domain_name(&self) -> Option<String> {
        self.domain_name.read().clone()
    }

    /// Serialize to a document accepted by [`ExporterConfig::from_document`].
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        if let Some(sync) = &self.query_sync {
            map.insert(QUERY_SYNC_KEY.to_string(), sync.to_document());
        }
        if self.metrics_name_snake_case {
            map.insert(SNAKE_CASE_KEY.to_string(), Value::Bool(true));
        }
        if self.use_domain_qualifier {
            map.insert(DOMAIN_QUALIFIER_KEY.to_string(), Value::Bool(true));
        }
        if let Some(port) = self.rest_port {
            map.insert(REST_PORT_KEY.to_string(), Value::from(port));
        }
        map.insert(
            QUERIES_KEY.to_string(),
            Value::Array(self.queries.iter().map(Selector::to_document).collect()),
        );
        Value::Object(map)
    }
}

impl fmt::Display for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self.to_document()).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

fn is_mergeable_top_level(existing: &Selector, incoming: &Selector) -> bool {
    if existing.child_names() != incoming.child_names() {
        return false;
    }
    existing.children().all(|(name, child)| {
        incoming
            .child(name)
            .is_some_and(|other| child.may_merge_with(other))
    })
}

fn parse_queries(value: &Value) -> Result<Vec<Selector>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) if items.iter().all(Value::is_object) => {
            items.iter().map(Selector::from_document).collect()
        }
        _ => Err(ConfigError::bad_type(QUERIES_KEY, value, "a list of structures")),
    }
}

fn parse_bool(key: &str, value: &Value) -> Result<bool> {
    let text = match value {
        Value::Bool(b) => return Ok(*b),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    if TRUE_VALUES.iter().any(|v| v.eq_ignore_ascii_case(&text)) {
        Ok(true)
    } else if FALSE_VALUES.iter().any(|v| v.eq_ignore_ascii_case(&text)) {
        Ok(false)
    } else {
        Err(ConfigError::invalid(format!(
            "Unable to interpret '{}' as a boolean value",
            text
        ))
        .with_context(key))
    }
}

fn parse_integer<T>(key: &str, value: &Value) -> Result<T>
where
    T: TryFrom<u64>,
{
    let number = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    number
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| ConfigError::bad_type(key, value, "an integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;
    use serde_json::json;

    const SERVLETS_CONFIG: &str = r#"
    {
        metricsNameSnakeCase: true,
        queries: [
            {
                applicationRuntimes: {
                    key: 'name',
                    componentRuntimes: {
                        type: 'WebAppComponentRuntime',
                        prefix: 'webapp_config_',
                        key: 'name',
                        values: ['deploymentState', 'contextRoot'],
                        servlets: {
                            prefix: 'weblogic_servlet_',
                            key: 'servletName',
                            values: ['invocationTotalCount'],
                        },
                    },
                },
            },
        ],
    }
    "#;

    #[test]
    fn test_parse_settings_and_queries() {
        let config = ExporterConfig::parse(SERVLETS_CONFIG).unwrap();

        assert!(config.metrics_name_snake_case());
        assert!(!config.use_domain_qualifier());
        assert_eq!(config.queries().len(), 1);
        let apps = config.queries()[0].child("applicationRuntimes").unwrap();
        assert_eq!(apps.key(), Some("name"));
    }

    #[test]
    fn test_blank_document_is_empty_config() {
        let config = ExporterConfig::parse("  \n").unwrap();
        assert!(!config.has_queries());
        assert!(config.effective_queries().is_empty());
    }

    #[test]
    fn test_boolean_strings() {
        for (text, expected) in [("yes", true), ("ON", true), ("n", false), ("False", false)] {
            let config =
                ExporterConfig::from_document(&json!({"domainQualifier": text})).unwrap();
            assert_eq!(config.use_domain_qualifier(), expected, "{}", text);
        }
    }

    #[test]
    fn test_bad_boolean_reports_key() {
        let error =
            ExporterConfig::from_document(&json!({"metricsNameSnakeCase": "maybe"})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Unable to interpret 'maybe' as a boolean value at metricsNameSnakeCase"
        );
    }

    #[test]
    fn test_rest_port_accepts_numeric_string() {
        let config = ExporterConfig::from_document(&json!({"restPort": "7001"})).unwrap();
        assert_eq!(config.rest_port(), Some(7001));

        let error = ExporterConfig::from_document(&json!({"restPort": "abc"})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Illegal value for restPort: \"abc\". Value must be an integer"
        );
    }

    #[test]
    fn test_query_sync() {
        let config = ExporterConfig::parse("{ query_sync: { url: 'http://sync:8999/' } }").unwrap();
        assert_eq!(
            config.query_sync(),
            Some(&QuerySyncConfig {
                url: "http://sync:8999/".to_string(),
                interval_secs: DEFAULT_SYNC_INTERVAL_SECS
            })
        );

        let config =
            ExporterConfig::parse("{ query_sync: { url: 'http://sync/', interval: 3 } }").unwrap();
        assert_eq!(config.query_sync().unwrap().interval_secs, 3);

        let error = ExporterConfig::parse("{ query_sync: { interval: 3 } }").unwrap_err();
        assert_eq!(error.to_string(), NO_QUERY_SYNC_URL);
    }

    #[test]
    fn test_non_mapping_document() {
        let error = ExporterConfig::parse("['a', 'b']").unwrap_err();
        assert_eq!(error.to_string(), NOT_A_MAPPING);
    }

    #[test]
    fn test_syntax_error() {
        let error = ExporterConfig::parse("{ queries: [ ").unwrap_err();
        assert!(matches!(error, ConfigError::Syntax(_)));
    }

    #[test]
    fn test_queries_must_be_list_of_structures() {
        let error = ExporterConfig::from_document(&json!({"queries": ["a"]})).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Illegal value for queries: [\"a\"]. Value must be a list of structures"
        );
    }

    #[test]
    fn test_compatible_queries_merge_on_load() {
        let config = ExporterConfig::from_document(&json!({"queries": [
            {"applicationRuntimes": {"key": "name", "values": ["a"]}},
            {"applicationRuntimes": {"key": "name", "values": ["b"]}}
        ]}))
        .unwrap();

        assert_eq!(config.queries().len(), 1);
        assert_eq!(
            config.queries()[0].child("applicationRuntimes").unwrap().values(),
            ["a", "b"]
        );
    }

    #[test]
    fn test_incompatible_child_key_adds_sibling() {
        let mut config = ExporterConfig::from_document(&json!({"queries": [
            {"applicationRuntimes": {"key": "name", "values": ["a"]}}
        ]}))
        .unwrap();
        let other = ExporterConfig::from_document(&json!({"queries": [
            {"applicationRuntimes": {"key": "id", "values": ["b"]}}
        ]}))
        .unwrap();

        config.append(&other);

        assert_eq!(config.queries().len(), 2);
    }

    #[test]
    fn test_different_child_names_add_sibling() {
        let mut config = ExporterConfig::default();
        config.append_query(Selector::from_document(&json!({"a": {"values": ["x"]}})).unwrap());
        config.append_query(Selector::from_document(&json!({"b": {"values": ["x"]}})).unwrap());

        assert_eq!(config.queries().len(), 2);
    }

    #[test]
    fn test_append_keeps_settings() {
        let mut config = ExporterConfig::from_document(&json!({"metricsNameSnakeCase": true})).unwrap();
        let other = ExporterConfig::from_document(&json!({
            "metricsNameSnakeCase": false,
            "queries": [{"values": ["a"]}]
        }))
        .unwrap();

        config.append(&other);

        assert!(config.metrics_name_snake_case());
        assert_eq!(config.queries().len(), 1);
    }

    #[test]
    fn test_replace_is_idempotent_and_clears_domain() {
        let mut config = ExporterConfig::parse(SERVLETS_CONFIG).unwrap();
        *config.domain_name.write() = Some("mydomain".to_string());
        let before = config.to_document();

        let copy = config.clone();
        config.replace(&copy);

        assert_eq!(config.to_document(), before);
        assert_eq!(config.domain_name(), None);
    }

    #[test]
    fn test_effective_queries_with_domain_qualifier() {
        let config = ExporterConfig::from_document(&json!({
            "domainQualifier": true,
            "queries": [{"values": ["a"]}]
        }))
        .unwrap();

        let effective = config.effective_queries();
        assert_eq!(effective.len(), 2);
        assert_eq!(effective[0], Selector::domain_name_selector());

        config.scrape(effective[0], &json!({"name": "mydomain"}));

        assert_eq!(config.domain_name().as_deref(), Some("mydomain"));
        assert_eq!(config.effective_queries().len(), 1);
    }

    #[test]
    fn test_domain_label_appended_after_discovery() {
        let config = ExporterConfig::from_document(&json!({
            "domainQualifier": true,
            "queries": [{"key": "name", "values": ["count"]}]
        }))
        .unwrap();

        let domain_metrics = config.scrape(Selector::domain_name_selector(), &json!({"name": "base"}));
        assert!(domain_metrics.is_empty());

        let metrics = config.scrape(&config.queries()[0], &json!({"name": "ms1", "count": 4}));
        assert_eq!(
            metrics.get("count{name=\"ms1\",domain=\"base\"}"),
            Some(&MetricValue::from(4))
        );
    }

    #[test]
    fn test_scrape_uses_snake_case_setting() {
        let config = ExporterConfig::from_document(&json!({
            "metricsNameSnakeCase": true,
            "queries": [{"values": ["deploymentState"]}]
        }))
        .unwrap();

        let metrics = config.scrape(&config.queries()[0], &json!({"deploymentState": 2}));
        assert_eq!(metrics.get("deployment_state"), Some(&MetricValue::from(2)));
    }

    #[test]
    fn test_request_excludes_forbidden_fields() {
        let config = ExporterConfig::from_document(&json!({"queries": [{
            "JDBCServiceRuntime": {
                "JDBCDataSourceRuntimeMBeans": {"key": "name", "values": ["properties"]}
            }
        }]}))
        .unwrap();

        let request = config.request_for(&config.queries()[0]).to_value();
        let node = &request["children"]["JDBCServiceRuntime"]["children"]["JDBCDataSourceRuntimeMBeans"];
        assert_eq!(node["excludeFields"], json!(["properties"]));
        assert_eq!(node["fields"], json!(["name"]));
    }

    #[test]
    fn test_document_round_trip() {
        let config = ExporterConfig::parse(SERVLETS_CONFIG).unwrap();
        let reparsed = ExporterConfig::parse(&config.to_string()).unwrap();
        assert_eq!(reparsed.to_document(), config.to_document());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.json5");
        std::fs::write(&path, SERVLETS_CONFIG).unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.queries().len(), 1);

        let missing = ExporterConfig::load_from_file(dir.path().join("missing.json5"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level, "info");
        assert_eq!(logging.format, LogFormat::Text);
    }
}
