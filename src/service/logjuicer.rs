//! Retrieval of the LogJuicer errors report of a build.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument};

use crate::{
    base::types::{EventKind, Res},
    model::errors::ErrorsReport,
    service::sf::SfClient,
    worker::Worker,
};

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: u32 = 360;

/// Client of the LogJuicer API hosted on the software factory.
#[derive(Clone)]
pub struct LogJuicerClient {
    sf: SfClient,
    poll_interval: Duration,
}

impl LogJuicerClient {
    pub fn new(sf: SfClient) -> Self {
        Self { sf, poll_interval: POLL_INTERVAL }
    }

    /// Change the delay between two status checks of a pending report.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Request the report creation, returning its id and status.
    async fn request_report(&self, build_url: &str) -> Res<(u64, String)> {
        let response = self
            .sf
            .put("logjuicer/api/report/new")
            .query(&[("target", build_url), ("errors", "true")])
            .send()
            .await?
            .error_for_status()?;

        let (report_id, status): (u64, Value) = response.json().await?;

        // The status is either a plain string, or an object for the error variants.
        let status = match status {
            Value::String(status) => status,
            other => other.to_string(),
        };

        Ok((report_id, status))
    }

    /// Get the errors report of a build, waiting for LogJuicer to create it when needed.
    #[instrument(skip(self, worker))]
    pub async fn get_report(&self, build_url: &str, worker: Option<&Worker>) -> Res<ErrorsReport> {
        info!("{}: Requesting errors report", build_url);
        let (report_id, mut status) = self.request_report(build_url).await?;

        if let Some(worker) = worker {
            worker.emit(EventKind::LogjuicerUrl, self.sf.url(&format!("logjuicer/report/{report_id}"))).await;
        }

        let mut polls = 0;
        loop {
            match status.as_str() {
                "Completed" => break,
                "Pending" => {
                    if polls >= MAX_POLLS {
                        return Err(anyhow::anyhow!("{build_url}: report {report_id} is still pending, giving up."));
                    }
                    polls += 1;
                    info!("{}: Waiting for errors report {}", build_url, report_id);
                    tokio::time::sleep(self.poll_interval).await;

                    // Requesting the same target again returns the progress of the existing report.
                    let (_, next) = self.request_report(build_url).await?;
                    if let Some(worker) = worker {
                        let message = if next == status {
                            format!("Waiting for the LogJuicer report ({}s)...", (self.poll_interval * polls).as_secs())
                        } else {
                            format!("LogJuicer report is {next}")
                        };
                        worker.progress(message).await;
                    }
                    status = next;
                }
                error => return Err(anyhow::anyhow!("{build_url}: report creation failed: {error}")),
            }
        }

        let report: Value = self.sf.get(&format!("logjuicer/api/report/{report_id}/json")).send().await?.error_for_status()?.json().await?;

        ErrorsReport::from_logjuicer(&report)
    }
}
