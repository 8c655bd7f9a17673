//! Request classification: which management endpoint a selector targets and
//! how its results are treated.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scraper::{RawValue, ScrapedMetric};

/// Path of the live-state search endpoint.
pub const RUNTIME_PATH: &str = "/management/weblogic/latest/serverRuntime/search";

/// Path of the static-configuration search endpoint.
pub const CONFIGURATION_PATH: &str = "/management/weblogic/latest/serverConfig/search";

/// Field holding the domain name in a configuration query result.
pub const DOMAIN_NAME_FIELD: &str = "name";

/// Scheme used to reach the management API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    /// Select the protocol from a secure-connection flag.
    pub fn from_secure(secure: bool) -> Self {
        if secure { Self::Https } else { Self::Http }
    }

    /// URL scheme string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// The two fixed request classifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Live server state. String leaves are dropped.
    #[default]
    Runtime,
    /// Static configuration. String leaves are exported as labelled metrics,
    /// and a `name` field feeds domain discovery.
    Configuration,
}

impl QueryType {
    /// The endpoint path this classification targets.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Runtime => RUNTIME_PATH,
            Self::Configuration => CONFIGURATION_PATH,
        }
    }

    /// Build the full search URL for the given host.
    pub fn url(&self, protocol: Protocol, host: &str, port: u16) -> String {
        format!("{}://{}:{}{}", protocol.as_str(), host, port, self.path())
    }

    /// Whether string-typed leaf values are exported.
    pub fn accepts_strings(&self) -> bool {
        matches!(self, Self::Configuration)
    }

    /// Inspect freshly scraped metrics before they are formatted.
    ///
    /// For configuration queries, a top-level textual `name` field is removed
    /// from the metrics and returned as the discovered domain name.
    pub fn post_process(&self, metrics: &mut Vec<ScrapedMetric>) -> Option<String> {
        match self {
            Self::Runtime => None,
            Self::Configuration => {
                let index = metrics.iter().position(|m| {
                    m.field == DOMAIN_NAME_FIELD && matches!(m.value, RawValue::Text(_))
                })?;
                match metrics.remove(index).value {
                    RawValue::Text(name) => {
                        debug!(domain = %name, "Extracted domain name from configuration query");
                        Some(name)
                    }
                    _ => None,
                }
            }
        }
    }
}
