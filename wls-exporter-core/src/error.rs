use thiserror::Error;

/// Message reported when a document parses but is not a mapping.
pub const NOT_A_MAPPING: &str = "Configuration is not in the expected format";

/// Message reported when `query_sync` lacks its `url`.
pub const NO_QUERY_SYNC_URL: &str = "query_sync defined without url";

/// Errors raised while building a configuration or one of its selectors.
///
/// `Invalid` covers every shape problem in an otherwise well-formed document and
/// carries the dotted path of selector keys leading to the failure. `Syntax` is
/// reported when the text could not be parsed at all.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{message}{}", path_suffix(.context))]
    Invalid {
        message: String,
        context: Vec<String>,
    },

    #[error("Configuration format has errors: {0}")]
    Syntax(#[from] json5::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

fn path_suffix(context: &[String]) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" at {}", context.join("."))
    }
}

impl ConfigError {
    /// Create a shape error with no path context yet.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Create the error reported when a value has the wrong type.
    pub fn bad_type(key: &str, value: &serde_json::Value, expected: &str) -> Self {
        Self::invalid(format!(
            "Illegal value for {}: {}. Value must be {}",
            key, value, expected
        ))
    }

    /// Prepend the name of an enclosing element to the error path.
    ///
    /// Only shape errors carry a path; other kinds are returned unchanged.
    pub fn with_context(mut self, parent: &str) -> Self {
        if let Self::Invalid { context, .. } = &mut self {
            context.insert(0, parent.to_string());
        }
        self
    }

    /// The dotted path at which the error was detected, if any.
    pub fn path(&self) -> Option<String> {
        match self {
            Self::Invalid { context, .. } if !context.is_empty() => Some(context.join(".")),
            _ => None,
        }
    }
}

/// Result type alias using [`ConfigError`].
pub type Result<T> = std::result::Result<T, ConfigError>;
