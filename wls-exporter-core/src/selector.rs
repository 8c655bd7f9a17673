//! Hierarchical description of the management API fields to capture.
//!
//! A [`Selector`] describes one level of a JSON response: an optional `type`
//! filter, an optional metric-name `prefix`, an optional `key` field whose value
//! becomes a label, optional `includedKeyValues`/`excludedKeyValues` patterns
//! restricting which keys are reported, the numeric `values` to capture,
//! categorical `stringValues`, and named child selectors for nested collections.
//!
//! Selectors are immutable once built. [`Selector::merge`] produces a new one.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::classification::{DOMAIN_NAME_FIELD, QueryType};
use crate::error::{ConfigError, NOT_A_MAPPING, Result};

pub const TYPE_KEY: &str = "type";
pub const PREFIX_KEY: &str = "prefix";
pub const KEY_KEY: &str = "key";
pub const KEY_NAME_KEY: &str = "keyName";
pub const INCLUDED_KEYS_KEY: &str = "includedKeyValues";
pub const EXCLUDED_KEYS_KEY: &str = "excludedKeyValues";
pub const VALUES_KEY: &str = "values";
pub const STRING_VALUES_KEY: &str = "stringValues";

/// Name of the response field checked by a `type` filter.
pub const TYPE_FIELD_NAME: &str = "type";

/// The implicit query used to discover the domain name.
pub static DOMAIN_NAME_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector {
    values: vec![DOMAIN_NAME_FIELD.to_string()],
    query_type: QueryType::Configuration,
    ..Selector::default()
});

/// A regular expression which must match a whole key value.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", source))
            .map_err(|e| ConfigError::invalid(format!("Invalid key pattern '{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A node in a selector tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    type_filter: Option<String>,
    prefix: Option<String>,
    key: Option<String>,
    key_name: Option<String>,
    included_keys: Option<KeyPattern>,
    excluded_keys: Option<KeyPattern>,
    values: Vec<String>,
    string_values: Vec<(String, Vec<String>)>,
    query_type: QueryType,
    children: Vec<(String, Selector)>,
}

impl Selector {
    /// Build a selector tree from a parsed document fragment.
    pub fn from_document(document: &Value) -> Result<Self> {
        match document {
            Value::Object(map) => Self::from_map(map),
            _ => Err(ConfigError::invalid(NOT_A_MAPPING)),
        }
    }

    /// Build a selector tree from a JSON5 text fragment.
    pub fn parse(content: &str) -> Result<Self> {
        let document: Value = json5::from_str(content)?;
        Self::from_document(&document)
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let mut selector = Self::default();

        for (name, value) in map {
            match name.as_str() {
                TYPE_KEY => selector.type_filter = scalar_text(value),
                PREFIX_KEY => selector.prefix = scalar_text(value),
                KEY_KEY => selector.key = scalar_text(value),
                KEY_NAME_KEY => selector.key_name = scalar_text(value),
                INCLUDED_KEYS_KEY => selector.included_keys = key_pattern(value)?,
                EXCLUDED_KEYS_KEY => selector.excluded_keys = key_pattern(value)?,
                VALUES_KEY => selector.values = parse_values(value)?,
                STRING_VALUES_KEY => selector.string_values = parse_string_values(value)?,
                _ => {
                    let Value::Object(child) = value else {
                        return Err(ConfigError::bad_type(name, value, "a structure"));
                    };
                    let child = Self::from_map(child).map_err(|e| e.with_context(name))?;
                    selector.children.push((name.clone(), child));
                }
            }
        }

        if selector.key.is_none() {
            if selector.included_keys.is_some() {
                return Err(ConfigError::invalid(
                    "Included key values specified without key field",
                ));
            }
            if selector.excluded_keys.is_some() {
                return Err(ConfigError::invalid(
                    "Excluded key values specified without key field",
                ));
            }
        }

        Ok(selector)
    }

    /// The implicit domain-discovery query.
    pub fn domain_name_selector() -> &'static Selector {
        &DOMAIN_NAME_SELECTOR
    }

    /// Return this selector with a different request classification.
    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    /// The `type` value an object must carry to be processed.
    pub fn type_filter(&self) -> Option<&str> {
        self.type_filter.as_deref()
    }

    /// The string prepended to metric names.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The field whose value labels every metric of this selector and its children.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The label name to use for the key. Defaults to the key itself.
    pub fn key_name(&self) -> Option<&str> {
        match self.key_name.as_deref() {
            Some(name) if !name.is_empty() => Some(name),
            _ => self.key(),
        }
    }

    /// Pattern a key value must match to be reported.
    pub fn included_keys(&self) -> Option<&str> {
        self.included_keys.as_ref().map(KeyPattern::as_str)
    }

    /// Pattern of key values which are never reported.
    pub fn excluded_keys(&self) -> Option<&str> {
        self.excluded_keys.as_ref().map(KeyPattern::as_str)
    }

    /// True if this node restricts its keys.
    pub fn has_key_filter(&self) -> bool {
        self.key.is_some() && (self.included_keys.is_some() || self.excluded_keys.is_some())
    }

    /// True if this node or any descendant restricts its keys.
    pub fn needs_keys(&self) -> bool {
        self.has_key_filter() || self.children.iter().any(|(_, child)| child.needs_keys())
    }

    /// Whether a key value passes the include and exclude patterns.
    pub fn selects_key(&self, value: &str) -> bool {
        self.included_keys.as_ref().is_none_or(|p| p.matches(value))
            && !self.excluded_keys.as_ref().is_some_and(|p| p.matches(value))
    }

    /// The declared numeric fields.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// The accepted labels of a categorical field, if the field is registered.
    pub fn string_values(&self, field: &str) -> Option<&[String]> {
        self.string_values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, labels)| labels.as_slice())
    }

    /// The request classification.
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Nested selectors in declaration order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &Selector)> {
        self.children.iter().map(|(name, child)| (name.as_str(), child))
    }

    /// Look up a nested selector by name.
    pub fn child(&self, name: &str) -> Option<&Selector> {
        self.children
            .iter()
            .find(|(child_name, _)| child_name == name)
            .map(|(_, child)| child)
    }

    /// Names of the nested selectors.
    pub fn child_names(&self) -> HashSet<&str> {
        self.children.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// True when every field of the matched objects is captured: a prefix was
    /// declared without any explicit `values`.
    pub fn use_all_values(&self) -> bool {
        self.prefix.is_some() && self.values.is_empty()
    }

    /// All field names whose values are captured: `values` then the `stringValues` fields.
    pub fn query_values(&self) -> Vec<&str> {
        self.values
            .iter()
            .map(String::as_str)
            .chain(self.string_values.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    /// Dummy-code a categorical string.
    ///
    /// Returns `None` if the field is not registered in `stringValues`, otherwise
    /// the case-insensitive position of `value` in the accepted list, or -1.
    pub fn string_metric_value(&self, field: &str, value: &str) -> Option<i64> {
        let labels = self.string_values(field)?;
        Some(
            labels
                .iter()
                .position(|label| label.eq_ignore_ascii_case(value))
                .map_or(-1, |index| index as i64),
        )
    }

    /// Returns true if this selector and `other` describe the same shape and may
    /// be combined.
    ///
    /// `keyName`, `key`, `type` and `prefix` must be equal, and children present
    /// in both selectors must themselves be mergeable. Children present on only
    /// one side never block a merge.
    pub fn may_merge_with(&self, other: &Selector) -> bool {
        if self.key_name != other.key_name
            || self.key != other.key
            || self.type_filter != other.type_filter
            || self.prefix != other.prefix
        {
            return false;
        }

        self.children.iter().all(|(name, child)| {
            other
                .child(name)
                .is_none_or(|other_child| child.may_merge_with(other_child))
        })
    }

    /// Combine this selector with another, returning the result.
    ///
    /// Scalars come from `self`; values are the union of both sides; string
    /// value lists from `other` replace those of `self` for the same field; and
    /// children present on both sides are merged recursively.
    pub fn merge(&self, other: &Selector) -> Selector {
        let mut values = self.values.clone();
        for value in &other.values {
            if !values.contains(value) {
                values.push(value.clone());
            }
        }

        let mut string_values = self.string_values.clone();
        for (field, labels) in &other.string_values {
            match string_values.iter_mut().find(|(name, _)| name == field) {
                Some(entry) => entry.1 = labels.clone(),
                None => string_values.push((field.clone(), labels.clone())),
            }
        }

        let mut children = self.children.clone();
        for (name, other_child) in &other.children {
            match children.iter_mut().find(|(child_name, _)| child_name == name) {
                Some(entry) => entry.1 = entry.1.merge(other_child),
                None => children.push((name.clone(), other_child.clone())),
            }
        }

        Selector {
            type_filter: self.type_filter.clone(),
            prefix: self.prefix.clone(),
            key: self.key.clone(),
            key_name: self.key_name.clone(),
            included_keys: self.included_keys.clone(),
            excluded_keys: self.excluded_keys.clone(),
            values,
            string_values,
            query_type: self.query_type,
            children,
        }
    }

    /// Serialize back to a document fragment accepted by [`Selector::from_document`].
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();

        let scalars = [
            (TYPE_KEY, &self.type_filter),
            (PREFIX_KEY, &self.prefix),
            (KEY_KEY, &self.key),
            (KEY_NAME_KEY, &self.key_name),
        ];
        for (name, value) in scalars {
            if let Some(value) = value {
                map.insert(name.to_string(), Value::String(value.clone()));
            }
        }

        let patterns = [
            (INCLUDED_KEYS_KEY, &self.included_keys),
            (EXCLUDED_KEYS_KEY, &self.excluded_keys),
        ];
        for (name, pattern) in patterns {
            if let Some(pattern) = pattern {
                map.insert(name.to_string(), Value::String(pattern.as_str().to_string()));
            }
        }

        if !self.values.is_empty() {
            map.insert(VALUES_KEY.to_string(), string_array(&self.values));
        }

        if !self.string_values.is_empty() {
            let string_values = self
                .string_values
                .iter()
                .map(|(field, labels)| (field.clone(), string_array(labels)))
                .collect();
            map.insert(STRING_VALUES_KEY.to_string(), Value::Object(string_values));
        }

        for (name, child) in &self.children {
            map.insert(name.clone(), child.to_document());
        }

        Value::Object(map)
    }
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

/// Render a scalar document value as text. Null yields `None`.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn key_pattern(value: &Value) -> Result<Option<KeyPattern>> {
    scalar_text(value).map(|source| KeyPattern::new(&source)).transpose()
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Array(_) | Value::Object(_) | Value::Null => {
                    Err(ConfigError::bad_type(key, value, "an array of strings"))
                }
                scalar => Ok(scalar_text(scalar).unwrap_or_default()),
            })
            .collect(),
        Value::Object(_) | Value::Null => Err(ConfigError::bad_type(key, value, "an array of strings")),
        scalar => Ok(scalar_text(scalar).into_iter().collect()),
    }
}

/// Entries which repeat an earlier entry, in order of appearance.
fn duplicates(values: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|value| !seen.insert(value.as_str()))
        .map(String::as_str)
        .collect()
}

fn parse_values(value: &Value) -> Result<Vec<String>> {
    let values = string_list(VALUES_KEY, value)?;
    if values.is_empty() {
        return Err(ConfigError::invalid("Values specified as empty array"));
    }

    let duplicates = duplicates(&values);
    if !duplicates.is_empty() {
        return Err(ConfigError::invalid(format!(
            "Duplicate values for [{}]",
            duplicates.join(", ")
        )));
    }

    Ok(values)
}

fn parse_string_values(value: &Value) -> Result<Vec<(String, Vec<String>)>> {
    let Value::Object(map) = value else {
        return Err(ConfigError::bad_type(STRING_VALUES_KEY, value, "a structure"));
    };

    map.iter()
        .map(|(field, labels)| {
            let labels = string_list(field, labels)?;
            let duplicates = duplicates(&labels);
            if !duplicates.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "Duplicate string values [{}] for {}",
                    duplicates.join(", "),
                    field
                )));
            }
            Ok((field.clone(), labels))
        })
        .collect()
}
