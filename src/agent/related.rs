//! Search of the Jira issues and Slack threads related to a failure.

use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::{emit_usage, extract_json};
use crate::{
    base::{
        prompts::RELATED_AGENT_SYSTEM_DIRECTIVE,
        types::{EventKind, Res},
    },
    model::report::{JiraTicket, PossibleRootCause, SlackThread},
    service::{
        jira::JiraClient,
        llm::{AgentRequest, BoxedToolHandler, LlmClient, ModelChoice, ToolCall, ToolSpec},
        slack_search::SlackSearchClient,
    },
    worker::Worker,
};

const MAX_JIRA_RESULTS: u32 = 20;
const MAX_SLACK_RESULTS: u32 = 20;

const RELATED_FORMAT: &str = r#"Answer with a single JSON object, without any other text:

```json
{
  "jira_tickets": [{"key": "<key>", "url": "<url>", "summary": "<summary>"}],
  "slack_threads": [{"permalink": "<permalink>", "text": "<text>", "channel": "<channel>"}]
}
```"#;

/// The related items found by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Related {
    #[serde(default)]
    pub jira_tickets: Vec<JiraTicket>,
    #[serde(default)]
    pub slack_threads: Vec<SlackThread>,
}

/// The available search backends.
#[derive(Clone, Default)]
pub struct Searchers {
    pub jira: Option<JiraClient>,
    pub slack: Option<SlackSearchClient>,
}

impl Searchers {
    pub fn is_empty(&self) -> bool {
        self.jira.is_none() && self.slack.is_none()
    }

    fn tools(&self) -> Vec<ToolSpec> {
        let mut tools = Vec::new();

        if self.jira.is_some() {
            tools.push(ToolSpec::new(
                "search_jira_issues",
                "Search Jira issues with a JQL query. Returns the issues key, url, summary, status and description. \
                 Use the `~` operator with quoted strings for text searches, e.g. `text ~ \"error message\"`.",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string", "description": "The JQL query."}},
                    "required": ["query"]
                }),
            ));
        }

        if self.slack.is_some() {
            tools.push(ToolSpec::new(
                "search_slack_messages",
                "Search the Slack messages of the CI channels. Returns the messages text, permalink and channel.",
                json!({
                    "type": "object",
                    "properties": {"query": {"type": "string", "description": "A few distinctive keywords."}},
                    "required": ["query"]
                }),
            ));
        }

        tools
    }

    async fn handle_tool(&self, worker: &Worker, call: ToolCall) -> Res<String> {
        let query = call.arg_str("query")?;

        match (call.name.as_str(), &self.jira, &self.slack) {
            ("search_jira_issues", Some(jira), _) => {
                worker.progress(format!("Searching issues with query: {query}")).await;
                Ok(serde_json::to_string(&jira.search_issues(query, MAX_JIRA_RESULTS).await)?)
            }
            ("search_slack_messages", _, Some(slack)) => {
                worker.progress(format!("Searching slack messages with query: {query}")).await;
                Ok(serde_json::to_string(&slack.search_messages(query, MAX_SLACK_RESULTS).await)?)
            }
            (other, _, _) => {
                worker.emit(EventKind::Error, format!("The `{other}` search is not available.")).await;
                Err(anyhow::anyhow!("Unknown tool `{other}`."))
            }
        }
    }
}

fn causes_prompt(causes: &[PossibleRootCause]) -> String {
    let mut prompt = String::new();

    for (idx, cause) in causes.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", idx + 1, cause.cause.trim()));
        for evidence in &cause.evidences {
            prompt.push_str(&format!("   - {}: {}\n", evidence.source, evidence.error.trim()));
        }
    }

    prompt
}

/// Search the related items, when at least one search backend is available.
#[instrument(skip_all)]
pub async fn call_agent(llm: &LlmClient, searchers: &Searchers, causes: &[PossibleRootCause], worker: &Worker) -> Res<Related> {
    if searchers.is_empty() || causes.is_empty() {
        return Ok(Related::default());
    }

    worker.progress("Searching related issues").await;

    let mut request = AgentRequest::new("related", ModelChoice::Fast, RELATED_AGENT_SYSTEM_DIRECTIVE)
        .input("Possible root causes", causes_prompt(causes))
        .input("Output format", RELATED_FORMAT)
        .json();
    for tool in searchers.tools() {
        request = request.tool(tool);
    }

    let handler: BoxedToolHandler = {
        let searchers = searchers.clone();
        let worker = worker.clone();
        Box::new(move |call| {
            let searchers = searchers.clone();
            let worker = worker.clone();
            Box::pin(async move { searchers.handle_tool(&worker, call).await })
        })
    };

    let response = llm.run_agent(request, handler).await?;
    emit_usage(worker, &response.usage).await;

    extract_json(&response.content)
}
