pub mod openai;

use std::{ops::Deref, pin::Pin, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base::types::{Res, Usage};

// Types.

/// Callback executing a tool requested by the model, returning its output.
pub type BoxedToolHandler = Box<dyn Fn(ToolCall) -> Pin<Box<dyn Future<Output = Res<String>> + Send>> + Send + Sync>;

/// Which of the configured models serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelChoice {
    /// The model used for the root cause analysis.
    Main,
    /// The cheaper model used by the auxiliary agents.
    Fast,
}

/// A tool offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// The JSON schema of the arguments.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Get a string argument.
    pub fn arg_str(&self, name: &str) -> Res<&str> {
        self.arguments[name].as_str().ok_or_else(|| anyhow::anyhow!("Tool `{}`: missing string argument `{}`.", self.name, name))
    }
}

/// The context of an agent call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    /// The agent name, for the logs.
    pub name: String,
    pub model: ModelChoice,
    /// The system directive.
    pub directive: String,
    /// The input sections, as `(title, content)`.
    pub inputs: Vec<(String, String)>,
    pub tools: Vec<ToolSpec>,
    /// Ask for a JSON object answer.
    pub json_output: bool,
}

impl AgentRequest {
    pub fn new(name: &str, model: ModelChoice, directive: &str) -> Self {
        Self {
            name: name.to_string(),
            model,
            directive: directive.to_string(),
            inputs: Vec::new(),
            tools: Vec::new(),
            json_output: false,
        }
    }

    pub fn input(mut self, title: &str, content: impl Into<String>) -> Self {
        self.inputs.push((title.to_string(), content.into()));
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// The user message, made of the input sections.
    pub fn user_message(&self) -> String {
        self.inputs.iter().map(|(title, content)| format!("## {title}\n\n{content}\n\n")).collect()
    }
}

/// The final answer of an agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    /// The token usage, one entry per model.
    pub usage: Vec<Usage>,
}

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// This allows different LLM providers to be used for the agents.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Run an agent until the model answers without requesting a tool.
    ///
    /// Every tool call is executed by the `tool_handler`, and its output is given back to the model.
    /// A failing tool is reported to the model as an error message, so that it can recover.
    async fn run_agent(&self, request: AgentRequest, tool_handler: BoxedToolHandler) -> Res<AgentResponse>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

/// A tool handler for agents without tools.
pub fn no_tools() -> BoxedToolHandler {
    Box::new(|call: ToolCall| Box::pin(async move { Err(anyhow::anyhow!("Unknown tool `{}`.", call.name)) }))
}

/// Merge the usage of the same model.
pub fn merge_usage(usage: &mut Vec<Usage>, new: Usage) {
    match usage.iter_mut().find(|u| u.model == new.model) {
        Some(existing) => {
            existing.input += new.input;
            existing.output += new.output;
        }
        None => usage.push(new),
    }
}

// Tests.
