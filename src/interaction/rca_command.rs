//! The `/rca <build url> [workflow]` chat command.

use tracing::{Instrument, error, info, instrument};

use crate::{
    base::types::{Event, EventKind, Res, Void},
    model::{is_build_url, report::Report},
    runtime::Runtime,
    service::chat::ChatClient,
    workflow::{RcaJob, Workflow, get_or_submit_rca},
};

const USAGE: &str = "Usage: `/rca <build url> [react|predict]`";

/// Parse the command arguments, the workflow defaults to `react`.
pub fn parse_command(text: &str) -> Res<(String, Workflow)> {
    let mut args = text.split_whitespace();

    let Some(url) = args.next() else {
        return Err(anyhow::anyhow!("Missing build URL."));
    };

    // Slack formats links as `<url>` or `<url|label>`.
    let url = url.trim_start_matches('<').trim_end_matches('>');
    let url = url.split('|').next().unwrap_or(url);
    if !is_build_url(url) {
        return Err(anyhow::anyhow!("`{url}` is not a Zuul build URL."));
    }

    let workflow = match args.next() {
        Some(name) => name.parse()?,
        None => Workflow::React,
    };

    Ok((url.to_string(), workflow))
}

/// The chat message of a finished analysis.
pub fn report_message(build: &str, report_url: &str, events: &[Event]) -> String {
    let report = events
        .iter()
        .rev()
        .find(|event| event.kind() == EventKind::Report)
        .and_then(|event| serde_json::from_value::<Report>(event.data().clone()).ok());

    if let Some(report) = report {
        return format!("*Root cause analysis of <{build}|the build>* (<{report_url}|details>)\n\n{}", report.to_markdown());
    }

    match events.iter().rev().find(|event| event.kind() == EventKind::Status) {
        Some(status) => format!("<{build}|The build> analysis did not complete: {}", status.data().as_str().unwrap_or_default()),
        None => format!("No report is available for <{build}|the build>."),
    }
}

/// Handle the command, returning the immediate reply.
///
/// The report is posted in the channel once available.
#[instrument(skip(runtime, chat))]
pub async fn handle_rca_command(text: &str, channel_id: &str, runtime: &Runtime, chat: &ChatClient) -> String {
    let (build, workflow) = match parse_command(text) {
        Ok(parsed) => parsed,
        Err(err) => return format!("{err}\n{USAGE}"),
    };

    let cached = match get_or_submit_rca(runtime, workflow, &build).await {
        Ok(cached) => cached,
        Err(err) => {
            error!("{}: couldn't start the analysis: {}", build, err);
            return format!("Couldn't start the analysis: {err}");
        }
    };

    let report_url = runtime.config.report_url(&build, workflow.as_str());
    let reply = if cached.is_some() {
        format!("The analysis of <{build}|the build> is available at {report_url}")
    } else {
        info!("{}: analysis submitted", build);
        format!("Analyzing <{build}|the build> with the {workflow} workflow, follow the progress at {report_url}")
    };

    post_report(build, workflow, channel_id.to_string(), cached, runtime.clone(), chat.clone());

    reply
}

/// Post the report in the channel, once the analysis is done.
#[instrument(skip_all)]
pub fn post_report(build: String, workflow: Workflow, channel_id: String, cached: Option<Vec<Event>>, runtime: Runtime, chat: ChatClient) {
    tokio::spawn(async move {
        // Process the report.
        let result = post_report_internal(&build, workflow, &channel_id, cached, &runtime, &chat).in_current_span().await;

        // Log any errors.
        if let Err(err) = &result {
            error!("Error while posting the report: {}", err);
        }
    });
}

async fn post_report_internal(build: &str, workflow: Workflow, channel_id: &str, cached: Option<Vec<Event>>, runtime: &Runtime, chat: &ChatClient) -> Void {
    let events = match cached {
        Some(events) => events,
        None => {
            if let Some(mut watcher) = runtime.pool.watch(&RcaJob::key(workflow, build)).await {
                while watcher.recv().await.is_some() {}
            }

            runtime
                .db
                .get_report(workflow.as_str(), build)
                .await?
                .ok_or_else(|| anyhow::anyhow!("{build}: the analysis events are missing"))?
        }
    };

    let report_url = runtime.config.report_url(build, workflow.as_str());
    chat.send_message(channel_id, &report_message(build, &report_url, &events)).await
}

// Tests.
