//! Follow-up questions on a report.

use serde::Deserialize;
use tracing::instrument;

use super::extract_json;
use crate::{
    base::{
        prompts::CHAT_AGENT_SYSTEM_DIRECTIVE,
        types::{Res, Usage},
    },
    model::report::Report,
    service::llm::{AgentRequest, LlmClient, ModelChoice, no_tools},
};

const CHAT_FORMAT: &str = r#"Answer with a single JSON object, without any other text:

```json
{"answer": "<markdown answer>"}
```"#;

#[derive(Debug, Deserialize)]
struct ChatAnswer {
    answer: String,
}

/// Answer a question about a report, returning the answer and the token usage.
#[instrument(skip(llm, report))]
pub async fn call_agent(llm: &LlmClient, report: &Report, question: &str) -> Res<(String, Vec<Usage>)> {
    let question = question.trim();
    if question.is_empty() {
        return Err(anyhow::anyhow!("The question is empty."));
    }

    let request = AgentRequest::new("chat", ModelChoice::Fast, CHAT_AGENT_SYSTEM_DIRECTIVE)
        .input("Analysis", report.to_markdown())
        .input("Question", question)
        .input("Output format", CHAT_FORMAT)
        .json();

    let response = llm.run_agent(request, no_tools()).await?;
    let answer: ChatAnswer = extract_json(&response.content)?;

    Ok((answer.answer, response.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{ScriptedLlm, Step};

    #[tokio::test]
    async fn test_chat_answers() {
        let llm = ScriptedLlm::new(vec![Step::Answer(r#"{"answer": "Retry the job, the registry was down."}"#.to_string())]);
        let report = Report {
            summary: "The registry timed out.".to_string(),
            ..Default::default()
        };

        let (answer, usage) = call_agent(&llm.client(), &report, "What should I do?").await.unwrap();

        assert_eq!(answer, "Retry the job, the registry was down.");
        assert_eq!(usage.len(), 1);

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].model, ModelChoice::Fast);
        let message = requests[0].user_message();
        assert!(message.contains("The registry timed out."));
        assert!(message.contains("## Question\n\nWhat should I do?"));
    }

    #[tokio::test]
    async fn test_empty_question() {
        let llm = ScriptedLlm::new(vec![]);

        assert!(call_agent(&llm.client(), &Report::default(), "  ").await.is_err());
        assert!(llm.requests.lock().unwrap().is_empty());
    }
}
