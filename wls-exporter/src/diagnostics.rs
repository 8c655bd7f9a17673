//! Recent management API exchanges and errors, kept for troubleshooting.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Number of exchanges retained.
pub const MAX_EXCHANGES: usize = 50;

/// Number of errors retained.
pub const MAX_ERRORS: usize = 50;

/// Body of the error page when nothing went wrong.
pub const NO_ERRORS: &str = "No errors reported.\n";

const TIME_FORMAT: &str = "%H:%M:%S%.3f UTC";

/// One request sent to the management API and what came back.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub request: String,
    pub requested_at: DateTime<Utc>,
    /// The response body, or the error which prevented one.
    pub reply: String,
    pub replied_at: DateTime<Utc>,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "At {}, REQUEST to {}:",
            self.requested_at.format(TIME_FORMAT),
            self.url
        )?;
        writeln!(f, "{}", self.request)?;
        writeln!(f, "REPLY at {}:", self.replied_at.format(TIME_FORMAT))?;
        writeln!(f, "{}", self.reply)
    }
}

/// A failure worth showing on the error page.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.at.format(TIME_FORMAT), self.message)
    }
}

/// Bounded logs of exchanges and errors, oldest first.
#[derive(Debug)]
pub struct Diagnostics {
    exchanges: Mutex<VecDeque<Exchange>>,
    errors: Mutex<VecDeque<ErrorEntry>>,
    max_exchanges: usize,
    max_errors: usize,
}

/// Shared reference to the diagnostic logs.
pub type SharedDiagnostics = Arc<Diagnostics>;

impl Default for Diagnostics {
    fn default() -> Self {
        Self::with_capacity(MAX_EXCHANGES, MAX_ERRORS)
    }
}

impl Diagnostics {
    pub fn with_capacity(max_exchanges: usize, max_errors: usize) -> Self {
        Self {
            exchanges: Mutex::new(VecDeque::with_capacity(max_exchanges)),
            errors: Mutex::new(VecDeque::with_capacity(max_errors)),
            max_exchanges,
            max_errors,
        }
    }

    /// Record a completed exchange, dropping the oldest when full.
    pub fn record_exchange(
        &self,
        url: &str,
        request: &str,
        requested_at: DateTime<Utc>,
        reply: impl Into<String>,
    ) {
        let exchange = Exchange {
            url: url.to_string(),
            request: request.to_string(),
            requested_at,
            reply: reply.into(),
            replied_at: Utc::now(),
        };
        push_bounded(&mut self.exchanges.lock(), exchange, self.max_exchanges);
    }

    /// Record an error message, dropping the oldest when full.
    pub fn record_error(&self, message: impl Into<String>) {
        let entry = ErrorEntry {
            at: Utc::now(),
            message: message.into(),
        };
        push_bounded(&mut self.errors.lock(), entry, self.max_errors);
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.lock().iter().cloned().collect()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.errors.lock().iter().cloned().collect()
    }

    /// All retained exchanges, separated by blank lines.
    pub fn render_exchanges(&self) -> String {
        self.exchanges
            .lock()
            .iter()
            .map(|exchange| format!("{}\n", exchange))
            .collect()
    }

    /// All retained errors, one per line.
    pub fn render_errors(&self) -> String {
        let errors = self.errors.lock();
        if errors.is_empty() {
            return NO_ERRORS.to_string();
        }
        errors.iter().map(|entry| format!("{}\n", entry)).collect()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    if max == 0 {
        return;
    }
    while queue.len() >= max {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchanges_are_bounded() {
        let diagnostics = Diagnostics::default();

        for i in 0..MAX_EXCHANGES + 5 {
            diagnostics.record_exchange("http://wls/search", &format!("{{\"n\":{}}}", i), Utc::now(), "{}");
        }

        let exchanges = diagnostics.exchanges();
        assert_eq!(exchanges.len(), MAX_EXCHANGES);
        assert_eq!(exchanges[0].request, "{\"n\":5}");
        assert_eq!(exchanges[MAX_EXCHANGES - 1].request, format!("{{\"n\":{}}}", MAX_EXCHANGES + 4));
    }

    #[test]
    fn test_exchange_rendering() {
        let diagnostics = Diagnostics::default();
        diagnostics.record_exchange("http://wls/search", "{\"fields\":[]}", Utc::now(), "{\"name\":\"ms1\"}");

        let text = diagnostics.render_exchanges();

        assert!(text.starts_with("At "));
        assert!(text.contains(", REQUEST to http://wls/search:\n{\"fields\":[]}\nREPLY at "));
        assert!(text.ends_with("UTC:\n{\"name\":\"ms1\"}\n\n"));
    }

    #[test]
    fn test_errors_rendering() {
        let diagnostics = Diagnostics::with_capacity(10, 2);
        assert_eq!(diagnostics.render_errors(), NO_ERRORS);

        diagnostics.record_error("first");
        diagnostics.record_error("second");
        diagnostics.record_error("third");

        let text = diagnostics.render_errors();
        assert!(!text.contains("first"));
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|line| line.contains(" UTC ")));
        assert!(text.ends_with("third\n"));
    }
}
