//! One pass over the configured queries, producing the metrics page.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};
use wls_exporter_core::{
    ExporterConfig, KeyCache, LiveConfiguration, Protocol, QueryDocument, Selector, format_labels,
    format_metric_lines,
};

use crate::client::{ClientError, RestClient};
use crate::diagnostics::SharedDiagnostics;
use crate::settings::TargetSettings;

/// Body returned when no queries are configured.
pub const NO_CONFIGURATION: &str = "# No configuration defined.\n";

pub const SCRAPE_COUNT_METRIC: &str = "wls_scrape_mbeans_count_total";
pub const SCRAPE_DURATION_METRIC: &str = "wls_scrape_duration_seconds";

/// Collects metrics from the management API using the live configuration.
pub struct MetricCollector {
    live: Arc<LiveConfiguration>,
    client: RestClient,
    keys: KeyCache,
    protocol: Protocol,
    host: String,
    port: u16,
    instance: String,
}

/// Shared reference to a collector.
pub type SharedCollector = Arc<MetricCollector>;

impl MetricCollector {
    pub fn new(live: Arc<LiveConfiguration>, client: RestClient, target: &TargetSettings) -> Self {
        Self {
            live,
            client,
            keys: KeyCache::default(),
            protocol: target.protocol(),
            host: target.host.clone(),
            port: target.port,
            instance: target.instance(),
        }
    }

    /// The shared configuration this collector reads.
    pub fn live(&self) -> &Arc<LiveConfiguration> {
        &self.live
    }

    /// The logs of recent exchanges and errors.
    pub fn diagnostics(&self) -> &SharedDiagnostics {
        self.client.diagnostics()
    }

    /// Run every effective query and render the metrics page.
    ///
    /// A query rejected by the server is reported as a comment and does not
    /// stop the pass. Any other failure aborts it and, unless it is an
    /// authentication challenge, is added to the error log.
    pub async fn collect(&self, authorization: Option<&str>) -> Result<String, ClientError> {
        let result = self.run_queries(authorization).await;
        if let Err(e) = &result {
            if !matches!(e, ClientError::Unauthorized { .. }) {
                self.diagnostics().record_error(format!("Scrape failed: {}", e));
            }
        }
        result
    }

    async fn run_queries(&self, authorization: Option<&str>) -> Result<String, ClientError> {
        let config = self.live.snapshot();
        self.keys.retain(config.queries());
        if !config.has_queries() {
            return Ok(NO_CONFIGURATION.to_string());
        }

        let start = Instant::now();
        let port = config.rest_port().unwrap_or(self.port);
        let mut output = String::new();
        let mut count = 0usize;

        for selector in config.effective_queries() {
            let url = selector.query_type().url(self.protocol, &self.host, port);
            let request = self.request(&config, selector, &url, authorization).await?;

            match self.client.search(&url, &request, authorization).await {
                Ok(Some(response)) => {
                    let metrics = config.scrape(selector, &response);
                    count += metrics.len();
                    output.push_str(&format_metric_lines(&metrics));
                }
                Ok(None) => {}
                Err(ClientError::BadRequest { .. }) => {
                    warn!(url = %url, "Management API rejected query");
                    output.push_str(&rejected_query_comment(&request.to_printable_request()));
                }
                Err(e) => return Err(e),
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        debug!(metrics = count, elapsed_secs = elapsed, "Scrape complete");
        self.write_self_metrics(&mut output, count, elapsed);
        Ok(output)
    }

    /// The query for `selector`, first refreshing its selected keys if needed.
    ///
    /// A rejected key query leaves the main query unfiltered.
    async fn request(
        &self,
        config: &ExporterConfig,
        selector: &Selector,
        url: &str,
        authorization: Option<&str>,
    ) -> Result<QueryDocument, ClientError> {
        if !selector.needs_keys() {
            return Ok(config.request_for(selector));
        }

        if self.keys.needs_refresh(selector) {
            let key_query = selector.to_key_query_document();
            match self.client.search(url, &key_query, authorization).await {
                Ok(response) => {
                    self.keys
                        .offer(selector, response.as_ref().unwrap_or(&Value::Null));
                }
                Err(ClientError::BadRequest { .. }) => {
                    warn!(url = %url, "Management API rejected key query");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(match self.keys.get(selector) {
            Some(keys) => config.request_with_keys(selector, &keys),
            None => config.request_for(selector),
        })
    }

    fn write_self_metrics(&self, output: &mut String, count: usize, elapsed_secs: f64) {
        let labels = format_labels(&[("instance".to_string(), self.instance.clone())]);
        writeln!(output, "{}{} {}", SCRAPE_COUNT_METRIC, labels, count).ok();
        writeln!(output, "{}{} {:.2}", SCRAPE_DURATION_METRIC, labels, elapsed_secs).ok();
    }
}

fn rejected_query_comment(printable_request: &str) -> String {
    let message = format!(
        "REST service was unable to handle this query and returned a 400\n{}",
        printable_request
    );
    with_comment_markers(&message)
}

/// Prefix every line with `# `.
fn with_comment_markers(text: &str) -> String {
    text.lines().map(|line| format!("# {}\n", line)).collect()
}
