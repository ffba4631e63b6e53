//! One-shot analysis of every error of the build.

use serde::Deserialize;
use tracing::instrument;

use super::{REPORT_FORMAT, emit_usage, extract_json, job_prompt};
use crate::{
    base::{prompts::PREDICT_AGENT_SYSTEM_DIRECTIVE, types::Res},
    model::{
        Job,
        errors::ErrorsReport,
        report::{PossibleRootCause, Report},
    },
    service::llm::{AgentRequest, LlmClient, ModelChoice, no_tools},
    worker::Worker,
};

#[derive(Debug, Deserialize)]
pub(crate) struct RcaAnswer {
    pub summary: String,
    #[serde(default)]
    pub possible_root_causes: Vec<PossibleRootCause>,
}

impl From<RcaAnswer> for Report {
    fn from(answer: RcaAnswer) -> Self {
        Report {
            summary: answer.summary,
            possible_root_causes: answer.possible_root_causes,
            ..Default::default()
        }
    }
}

#[instrument(skip_all, fields(job = %errors.target))]
pub async fn call_agent(llm: &LlmClient, job: Option<&Job>, errors: &ErrorsReport, worker: &Worker) -> Res<Report> {
    worker.progress("Calling RCAPredict").await;

    let request = AgentRequest::new("predict", ModelChoice::Main, PREDICT_AGENT_SYSTEM_DIRECTIVE)
        .input("Job", job_prompt(job))
        .input("Errors", errors.to_prompt())
        .input("Output format", REPORT_FORMAT)
        .json();

    let response = llm.run_agent(request, no_tools()).await?;
    emit_usage(worker, &response.usage).await;

    let answer: RcaAnswer = extract_json(&response.content)?;

    Ok(answer.into())
}
