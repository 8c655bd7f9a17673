//! Keys selected by `includedKeyValues` and `excludedKeyValues` patterns.
//!
//! A selector which filters its keys is scraped in two steps. A key query lists
//! the key values present on the server, the patterns pick the accepted ones,
//! and the main query then names those keys so the server returns only the
//! matching members. The accepted keys are cached per selector and refreshed
//! once they are older than [`KEY_UPDATE_INTERVAL`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::query::QueryDocument;
use crate::scraper::ITEMS_FIELD;
use crate::selector::Selector;

/// How long a set of selected keys stays current.
pub const KEY_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Key values accepted at each filtering node of a selector tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectedKeys {
    keys: Vec<String>,
    children: Vec<(String, SelectedKeys)>,
}

impl SelectedKeys {
    /// Collect the accepted keys from the response to a key query.
    ///
    /// Keys which are not strings are ignored.
    pub fn from_response(selector: &Selector, response: &Value) -> Self {
        let mut selected = Self::default();
        if let Value::Object(object) = response {
            selected.offer_member(selector, object);
        }
        selected
    }

    /// Accepted keys at this node, in order of appearance.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Accepted keys below the named child selector.
    pub fn child(&self, name: &str) -> Option<&SelectedKeys> {
        self.children
            .iter()
            .find(|(child_name, _)| child_name == name)
            .map(|(_, child)| child)
    }

    /// Name the accepted keys in the matching nodes of a query document.
    ///
    /// A node whose patterns accepted nothing is left unfiltered.
    pub fn apply_to(&self, selector: &Selector, document: &mut QueryDocument) {
        if let Some(key) = selector.key() {
            if selector.has_key_filter() && !self.keys.is_empty() {
                document.set_key_filter(key, self.keys.clone());
            }
        }

        for (name, selected) in &self.children {
            if let (Some(child), Some(child_document)) =
                (selector.child(name), document.child_mut(name))
            {
                selected.apply_to(child, child_document);
            }
        }
    }

    fn offer_member(&mut self, selector: &Selector, object: &Map<String, Value>) {
        if selector.has_key_filter() {
            let key = selector
                .key()
                .and_then(|key| object.get(key))
                .and_then(Value::as_str);
            if let Some(key) = key {
                if selector.selects_key(key) && !self.keys.iter().any(|k| k == key) {
                    self.keys.push(key.to_string());
                }
            }
        }

        for (name, child) in selector.children() {
            if let Some(Value::Object(nested)) = object.get(name) {
                self.child_entry(name).offer_collection(child, nested);
            }
        }
    }

    fn offer_collection(&mut self, selector: &Selector, wrapper: &Map<String, Value>) {
        match wrapper.get(ITEMS_FIELD) {
            Some(Value::Array(items)) => {
                for item in items {
                    if let Value::Object(object) = item {
                        self.offer_member(selector, object);
                    }
                }
            }
            _ => self.offer_member(selector, wrapper),
        }
    }

    fn child_entry(&mut self, name: &str) -> &mut SelectedKeys {
        let index = match self.children.iter().position(|(child_name, _)| child_name == name) {
            Some(index) => index,
            None => {
                self.children.push((name.to_string(), SelectedKeys::default()));
                self.children.len() - 1
            }
        };
        &mut self.children[index].1
    }
}

#[derive(Debug)]
struct CachedKeys {
    fetched: Instant,
    keys: Arc<SelectedKeys>,
}

/// Selected keys per selector, shared by concurrent scrapes.
#[derive(Debug)]
pub struct KeyCache {
    interval: Duration,
    entries: Mutex<HashMap<String, CachedKeys>>,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(KEY_UPDATE_INTERVAL)
    }
}

impl KeyCache {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True if the selector filters keys and has none, or only stale ones, cached.
    pub fn needs_refresh(&self, selector: &Selector) -> bool {
        if !selector.needs_keys() {
            return false;
        }
        self.entries
            .lock()
            .get(&cache_key(selector))
            .is_none_or(|entry| entry.fetched.elapsed() >= self.interval)
    }

    /// Store the keys accepted from a key query response.
    pub fn offer(&self, selector: &Selector, response: &Value) -> Arc<SelectedKeys> {
        let keys = Arc::new(SelectedKeys::from_response(selector, response));
        debug!(keys = keys.keys().len(), "Refreshed selected keys");
        self.entries.lock().insert(
            cache_key(selector),
            CachedKeys {
                fetched: Instant::now(),
                keys: keys.clone(),
            },
        );
        keys
    }

    /// The cached keys for a selector, fresh or not.
    pub fn get(&self, selector: &Selector) -> Option<Arc<SelectedKeys>> {
        self.entries
            .lock()
            .get(&cache_key(selector))
            .map(|entry| entry.keys.clone())
    }

    /// Drop entries for selectors no longer configured.
    pub fn retain<'a>(&self, selectors: impl IntoIterator<Item = &'a Selector>) {
        let live: Vec<String> = selectors.into_iter().map(cache_key).collect();
        self.entries.lock().retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(selector: &Selector) -> String {
    selector.to_document().to_string()
}
