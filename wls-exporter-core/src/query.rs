//! Outbound query documents derived from selectors.

use serde_json::{Map, Value};

use crate::selector::{Selector, TYPE_FIELD_NAME};

/// Dotted paths of fields never requested from the management API.
///
/// Requesting these privileged fields makes the search endpoint fail the whole
/// query, so they are excluded from every query regardless of selector content.
pub const FORBIDDEN_FIELDS: &[&str] = &["JDBCServiceRuntime.JDBCDataSourceRuntimeMBeans.properties"];

/// A projection request for one node of the management API tree.
///
/// `fields` of `None` leaves the node's fields unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDocument {
    fields: Option<Vec<String>>,
    exclude_fields: Vec<String>,
    key_filter: Option<(String, Vec<String>)>,
    children: Vec<(String, QueryDocument)>,
}

impl QueryDocument {
    /// A node which requests every field.
    pub fn all_fields() -> Self {
        Self::default()
    }

    /// A node which requests only the listed fields.
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut document = Self {
            fields: Some(Vec::new()),
            ..Self::default()
        };
        for field in fields {
            document.add_field(field.into());
        }
        document
    }

    fn add_field(&mut self, field: String) {
        let fields = self.fields.get_or_insert_with(Vec::new);
        if !fields.contains(&field) {
            fields.push(field);
        }
    }

    /// Add a nested query for the named collection.
    pub fn add_child(&mut self, name: impl Into<String>, child: QueryDocument) {
        self.children.push((name.into(), child));
    }

    /// Requested fields, or `None` if unconstrained.
    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    /// Fields explicitly excluded from this node.
    pub fn exclude_fields(&self) -> &[String] {
        &self.exclude_fields
    }

    /// Restrict the collection to members whose `key` field is one of `keys`.
    pub fn set_key_filter(&mut self, key: impl Into<String>, keys: Vec<String>) {
        self.key_filter = Some((key.into(), keys));
    }

    /// The key field and accepted values, if the collection is restricted.
    pub fn key_filter(&self) -> Option<(&str, &[String])> {
        self.key_filter
            .as_ref()
            .map(|(key, keys)| (key.as_str(), keys.as_slice()))
    }

    /// The nested query for the named collection.
    pub fn child(&self, name: &str) -> Option<&QueryDocument> {
        self.children
            .iter()
            .find(|(child_name, _)| child_name == name)
            .map(|(_, child)| child)
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut QueryDocument> {
        self.children
            .iter_mut()
            .find(|(child_name, _)| child_name == name)
            .map(|(_, child)| child)
    }

    /// Exclude the field at a dotted path (`child.child.field`).
    ///
    /// Returns false, leaving the document unchanged, if the path's parent
    /// nodes are not part of this query.
    pub fn exclude_path(&mut self, path: &str) -> bool {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(field) = segments.pop() else {
            return false;
        };

        let mut node = self;
        for segment in segments {
            match node.child_mut(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }

        if let Some(fields) = node.fields.as_mut() {
            fields.retain(|f| f != field);
        }
        if !node.exclude_fields.iter().any(|f| f == field) {
            node.exclude_fields.push(field.to_string());
        }
        true
    }

    /// Convert to the JSON shape accepted by the search endpoint.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("links".to_string(), Value::Array(Vec::new()));

        if let Some(fields) = &self.fields {
            map.insert("fields".to_string(), string_array(fields));
        }
        if !self.exclude_fields.is_empty() {
            map.insert("excludeFields".to_string(), string_array(&self.exclude_fields));
        }
        if let Some((key, keys)) = &self.key_filter {
            map.insert(key.clone(), string_array(keys));
        }
        if !self.children.is_empty() {
            let children = self
                .children
                .iter()
                .map(|(name, child)| (name.clone(), child.to_value()))
                .collect();
            map.insert("children".to_string(), Value::Object(children));
        }

        Value::Object(map)
    }

    /// Compact request body.
    pub fn to_request(&self) -> String {
        self.to_value().to_string()
    }

    /// Indented rendering for display.
    pub fn to_printable_request(&self) -> String {
        serde_json::to_string_pretty(&self.to_value()).unwrap_or_else(|_| self.to_request())
    }
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

impl Selector {
    /// Derive the query document which fetches everything this selector captures.
    ///
    /// In capture-everything mode the node's fields are left unconstrained.
    /// Otherwise the node requests the key, the `type` field when filtering by
    /// type, and the declared values.
    pub fn to_query_document(&self) -> QueryDocument {
        let mut document = if self.use_all_values() {
            QueryDocument::all_fields()
        } else {
            let mut fields: Vec<&str> = Vec::new();
            fields.extend(self.key());
            if self.type_filter().is_some() {
                fields.push(TYPE_FIELD_NAME);
            }
            fields.extend(self.query_values());
            QueryDocument::with_fields(fields)
        };

        for (name, child) in self.children() {
            document.add_child(name, child.to_query_document());
        }

        document
    }

    /// Derive the query which lists the keys of every node that filters them.
    ///
    /// Filtering nodes request their key. Every other node requests nothing.
    pub fn to_key_query_document(&self) -> QueryDocument {
        let mut document = match self.key() {
            Some(key) if self.has_key_filter() => QueryDocument::with_fields([key]),
            _ => QueryDocument::with_fields(std::iter::empty::<String>()),
        };

        for (name, child) in self.children() {
            document.add_child(name, child.to_key_query_document());
        }

        document
    }

    /// Derive the query document and exclude every reachable forbidden field.
    pub fn to_restricted_query_document(&self, forbidden: &[&str]) -> QueryDocument {
        let mut document = self.to_query_document();
        for path in forbidden {
            document.exclude_path(path);
        }
        document
    }
}
