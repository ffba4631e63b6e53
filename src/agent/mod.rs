//! The LLM agents.
//!
//! Each agent builds an [`AgentRequest`](crate::service::llm::AgentRequest) with its directive,
//! its inputs and its tools, runs it with the [`LlmClient`](crate::service::llm::LlmClient), and
//! parses the JSON answer.  The token usage is reported on the worker.

pub mod chat;
pub mod job;
pub mod predict;
pub mod react;
pub mod related;

use serde::de::DeserializeOwned;

use crate::{
    base::types::{EventKind, Res, Usage},
    model::Job,
    worker::Worker,
};

/// The expected answer of the RCA agents.
pub(crate) const REPORT_FORMAT: &str = r#"Answer with a single JSON object, without any other text:

```json
{
  "summary": "<markdown summary>",
  "possible_root_causes": [
    {"cause": "<the root cause>", "evidences": [{"error": "<the error line>", "source": "<the log file>"}]}
  ]
}
```"#;

/// Parse the JSON object of an answer, ignoring the surrounding text and code fences.
pub fn extract_json<T: DeserializeOwned>(content: &str) -> Res<T> {
    let start = content.find('{');
    let end = content.rfind('}');

    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return Err(anyhow::anyhow!("The answer does not contain a JSON object: {}", content)),
    };

    serde_json::from_str(json).map_err(|e| anyhow::anyhow!("Invalid answer: {e}"))
}

/// Emit one usage event per model.
pub async fn emit_usage(worker: &Worker, usage: &[Usage]) {
    for usage in usage {
        match serde_json::to_value(usage) {
            Ok(value) => worker.emit(EventKind::Usage, value).await,
            Err(err) => tracing::warn!("Couldn't serialize usage: {}", err),
        }
    }
}

/// Render the job description for a prompt.
pub fn job_prompt(job: Option<&Job>) -> String {
    let Some(job) = job else {
        return "No description available.".to_string();
    };

    let mut prompt = job.description.trim().to_string();
    if !job.actions.is_empty() {
        prompt.push_str("\n\nActions:\n");
        for action in &job.actions {
            prompt.push_str(&format!("- {action}\n"));
        }
    }

    prompt
}

// Tests.
