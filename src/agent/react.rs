//! Tool-using analysis: the agent reads the errors as needed.

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;

use super::{REPORT_FORMAT, emit_usage, extract_json, job_prompt, predict::RcaAnswer};
use crate::{
    base::{prompts::REACT_AGENT_SYSTEM_DIRECTIVE, types::Res},
    model::{Job, errors::ErrorsReport, report::Report},
    service::llm::{AgentRequest, BoxedToolHandler, LlmClient, ModelChoice, ToolCall, ToolSpec},
    worker::Worker,
};

fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "read_errors",
            "Read the errors contained in a source log, including the lines before and after each error.",
            json!({
                "type": "object",
                "properties": {"source": {"type": "string", "description": "The log file name, as given in the list of log files."}},
                "required": ["source"]
            }),
        ),
        ToolSpec::new(
            "search_errors",
            "Search the error lines of every log with a case insensitive regular expression. Returns the matching lines of each log file.",
            json!({
                "type": "object",
                "properties": {"regex": {"type": "string", "description": "The regular expression."}},
                "required": ["regex"]
            }),
        ),
    ]
}

/// Execute a tool on the errors report.
async fn handle_tool(errors: &ErrorsReport, worker: &Worker, call: ToolCall) -> Res<String> {
    match call.name.as_str() {
        "read_errors" => {
            let source = call.arg_str("source")?;
            worker.progress(format!("Checking {source}")).await;

            Ok(serde_json::to_string(errors.read_errors(source))?)
        }
        "search_errors" => {
            let regex = call.arg_str("regex")?;
            worker.progress(format!("Search {regex}")).await;

            let reg = regex::RegexBuilder::new(regex).case_insensitive(true).build()?;
            let matches: Vec<_> = errors
                .search_errors(regex)?
                .into_iter()
                .map(|logfile| {
                    let lines: Vec<&str> = logfile.errors.iter().map(|e| e.line.as_str()).filter(|line| reg.is_match(line)).collect();
                    json!({"source": logfile.name(), "matches": lines})
                })
                .collect();

            Ok(serde_json::to_string(&matches)?)
        }
        other => Err(anyhow::anyhow!("Unknown tool `{other}`.")),
    }
}

#[instrument(skip_all, fields(job = %errors.target))]
pub async fn call_agent(llm: &LlmClient, job: Option<&Job>, errors: Arc<ErrorsReport>, worker: &Worker) -> Res<Report> {
    worker.progress("Calling RCAAccelerator").await;

    let mut description = job_prompt(job);
    if let Some(log_url) = &errors.log_url {
        description.push_str(&format!("\n\nBuild Log URL: {log_url}"));
    }

    let counts = errors.error_counts().into_iter().map(|(source, count)| format!("- {source}: {count}")).collect::<Vec<_>>().join("\n");

    let mut request = AgentRequest::new("react", ModelChoice::Main, REACT_AGENT_SYSTEM_DIRECTIVE)
        .input("Job", description)
        .input("Log files (source: error count)", counts)
        .input("Output format", REPORT_FORMAT)
        .json();
    for tool in tools() {
        request = request.tool(tool);
    }

    let handler: BoxedToolHandler = {
        let worker = worker.clone();
        Box::new(move |call| {
            let errors = errors.clone();
            let worker = worker.clone();
            Box::pin(async move { handle_tool(&errors, &worker, call).await })
        })
    };

    let response = llm.run_agent(request, handler).await?;
    emit_usage(worker, &response.usage).await;

    let answer: RcaAnswer = extract_json(&response.content)?;

    Ok(answer.into())
}
