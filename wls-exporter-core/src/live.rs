//! The installed configuration, shared between concurrent scrapes and the
//! rare writers that replace or extend it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ExporterConfig;
use crate::error::{ConfigError, Result};
use crate::metrics::MetricsMap;
use crate::selector::Selector;
use crate::update::{ConfigurationUpdate, current_timestamp_millis};

/// How far ahead of the local clock a peer's timestamp may be.
pub const MAX_FUTURE_SKEW_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Shared handle to the installed configuration.
///
/// Readers take a snapshot without locking. Writers build a new configuration
/// off to the side and publish it with a single swap while holding the writer
/// lock, which also guards the installed timestamp.
#[derive(Debug)]
pub struct LiveConfiguration {
    current: ArcSwap<ExporterConfig>,
    timestamp: Mutex<i64>,
}

impl Default for LiveConfiguration {
    fn default() -> Self {
        Self::new(ExporterConfig::default())
    }
}

impl LiveConfiguration {
    /// Install an initial configuration with timestamp zero.
    pub fn new(config: ExporterConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            timestamp: Mutex::new(0),
        }
    }

    /// The configuration installed right now.
    pub fn snapshot(&self) -> Arc<ExporterConfig> {
        self.current.load_full()
    }

    /// Timestamp of the installed configuration.
    pub fn timestamp(&self) -> i64 {
        *self.timestamp.lock()
    }

    /// Replace the installed queries and settings with those of a document.
    ///
    /// Returns the update to share with peers. Nothing is installed if the
    /// document is invalid.
    pub fn replace(&self, content: &str) -> Result<ConfigurationUpdate> {
        let incoming = ExporterConfig::parse(content)?;
        Ok(self.install_local(|config| config.replace(&incoming)))
    }

    /// Append the queries of a document to the installed configuration.
    pub fn append(&self, content: &str) -> Result<ConfigurationUpdate> {
        let incoming = ExporterConfig::parse(content)?;
        Ok(self.install_local(|config| config.append(&incoming)))
    }

    /// Install an update received from a peer.
    ///
    /// Returns `Ok(false)` and leaves the configuration alone if the update is
    /// not strictly newer than the installed one. An update stamped more than
    /// [`MAX_FUTURE_SKEW_MILLIS`] ahead of the local clock is rejected.
    pub fn apply_update(&self, update: &ConfigurationUpdate) -> Result<bool> {
        let limit = current_timestamp_millis().saturating_add(MAX_FUTURE_SKEW_MILLIS);
        if update.timestamp > limit {
            return Err(ConfigError::invalid(format!(
                "Configuration update timestamp {} is too far in the future",
                update.timestamp
            )));
        }
        let incoming = ExporterConfig::parse(&update.configuration)?;

        let mut timestamp = self.timestamp.lock();
        if update.timestamp <= *timestamp {
            debug!(
                installed = *timestamp,
                received = update.timestamp,
                "Discarding stale configuration update"
            );
            return Ok(false);
        }

        let mut config = ExporterConfig::clone(&self.current.load());
        config.replace(&incoming);
        self.current.store(Arc::new(config));
        *timestamp = update.timestamp;

        info!(timestamp = update.timestamp, "Installed configuration update");
        Ok(true)
    }

    /// Scrape a response against the installed configuration.
    pub fn scrape(&self, selector: &Selector, response: &Value) -> MetricsMap {
        self.current.load().scrape(selector, response)
    }

    fn install_local(&self, change: impl FnOnce(&mut ExporterConfig)) -> ConfigurationUpdate {
        let mut timestamp = self.timestamp.lock();

        let mut config = ExporterConfig::clone(&self.current.load());
        change(&mut config);
        let update = ConfigurationUpdate::new(
            current_timestamp_millis().max(timestamp.saturating_add(1)),
            config.to_string(),
        );
        self.current.store(Arc::new(config));
        *timestamp = update.timestamp;

        info!(
            timestamp = update.timestamp,
            queries = self.current.load().queries().len(),
            "Installed configuration"
        );
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const FIRST: &str = "{ queries: [{ applicationRuntimes: { key: 'name', values: ['a'] } }] }";
    const SECOND: &str = "{ queries: [{ applicationRuntimes: { key: 'name', values: ['b'] } }] }";

    fn values(live: &LiveConfiguration) -> Vec<String> {
        live.snapshot().queries()[0]
            .child("applicationRuntimes")
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn test_replace_then_append() {
        let live = LiveConfiguration::default();

        let first = live.replace(FIRST).unwrap();
        let second = live.append(SECOND).unwrap();

        assert!(second.timestamp > first.timestamp);
        assert_eq!(live.timestamp(), second.timestamp);
        assert_eq!(values(&live), ["a", "b"]);
    }

    #[test]
    fn test_invalid_document_installs_nothing() {
        let live = LiveConfiguration::default();
        live.replace(FIRST).unwrap();
        let before = live.timestamp();

        assert!(live.append("{ queries: [{ values: [] }] }").is_err());
        assert!(live.replace("{ queries: ").is_err());

        assert_eq!(live.timestamp(), before);
        assert_eq!(values(&live), ["a"]);
    }

    #[test]
    fn test_stale_update_discarded() {
        let live = LiveConfiguration::default();

        assert!(live.apply_update(&ConfigurationUpdate::new(200, FIRST)).unwrap());
        assert!(!live.apply_update(&ConfigurationUpdate::new(100, SECOND)).unwrap());
        assert!(!live.apply_update(&ConfigurationUpdate::new(200, SECOND)).unwrap());

        assert_eq!(live.timestamp(), 200);
        assert_eq!(values(&live), ["a"]);
    }

    #[test]
    fn test_far_future_update_rejected() {
        let live = LiveConfiguration::default();
        live.replace(FIRST).unwrap();
        let before = live.timestamp();

        let result = live.apply_update(&ConfigurationUpdate::new(i64::MAX, SECOND));

        assert!(result.unwrap_err().to_string().contains("too far in the future"));
        assert_eq!(live.timestamp(), before);
        assert_eq!(values(&live), ["a"]);
    }

    #[test]
    fn test_local_update_after_maximal_timestamp() {
        let live = LiveConfiguration::default();
        *live.timestamp.lock() = i64::MAX;

        let update = live.replace(SECOND).unwrap();

        assert_eq!(update.timestamp, i64::MAX);
        assert_eq!(values(&live), ["b"]);
    }

    #[test]
    fn test_malformed_update_rejected() {
        let live = LiveConfiguration::default();
        live.apply_update(&ConfigurationUpdate::new(100, FIRST)).unwrap();

        let result = live.apply_update(&ConfigurationUpdate::new(300, "[1, 2]"));

        assert!(result.is_err());
        assert_eq!(live.timestamp(), 100);
    }

    #[test]
    fn test_local_update_round_trips_to_peer() {
        let source = LiveConfiguration::default();
        let update = source.replace(FIRST).unwrap();

        let peer = LiveConfiguration::default();
        assert!(peer.apply_update(&update).unwrap());

        assert_eq!(
            peer.snapshot().to_document(),
            source.snapshot().to_document()
        );
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let live = LiveConfiguration::default();
        live.replace(FIRST).unwrap();

        let snapshot = live.snapshot();
        live.replace(SECOND).unwrap();

        assert_eq!(
            snapshot.queries()[0].child("applicationRuntimes").unwrap().values(),
            ["a"]
        );
        assert_eq!(values(&live), ["b"]);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let live = Arc::new(LiveConfiguration::default());
        live.replace("{ queries: [{ applicationRuntimes: { key: 'name', values: ['base'] } }] }")
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let live = Arc::clone(&live);
                thread::spawn(move || {
                    let document = format!(
                        "{{ queries: [{{ applicationRuntimes: {{ key: 'name', values: ['v{}'] }} }}] }}",
                        i
                    );
                    live.append(&document).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(values(&live).len(), 9);
    }
}
