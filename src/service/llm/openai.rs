//! Integration with OpenAI compatible chat completion services.
//!
//! Gemini exposes such an endpoint, which is the default configuration.
//! The agent loop is implemented with function calling: every tool call of the
//! model is executed, and the conversation goes on until a final answer.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, FunctionObjectArgs, ResponseFormat,
    },
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::{AgentRequest, AgentResponse, BoxedToolHandler, GenericLlmClient, LlmClient, ModelChoice, ToolCall, ToolSpec, merge_usage};
use crate::{
    base::{
        config::Config,
        types::{Res, Usage},
    },
    service::sf::http_client_builder,
};

const MAX_RETRIES: u32 = 3;
const TIMEOUT: u64 = 300; // Thinking models can be slow with large inputs.
const RETRY_DELAY_MS: u64 = 1000;

const FINAL_ANSWER_REQUEST: &str = "You used all the available steps. Stop using tools and give your final answer now.";

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(config: &Config) -> Res<Self> {
        let client = OpenAiLlmClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Specific implementations.

/// OpenAI compatible LLM client implementation.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    config: Config,
    retry_delay: Duration,
}

impl OpenAiLlmClient {
    /// Create a new OpenAI compatible LLM client.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config) -> Res<Self> {
        let cfg = OpenAIConfig::new().with_api_key(config.llm_api_key.clone()).with_api_base(config.llm_base_url.trim_end_matches('/'));
        let http = http_client_builder(config)?.build()?;

        Ok(Self {
            client: Client::with_config(cfg).with_http_client(http),
            config: config.clone(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Change the base delay between two attempts.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn model(&self, choice: ModelChoice) -> &str {
        match choice {
            ModelChoice::Main => &self.config.llm_model,
            ModelChoice::Fast => &self.config.llm_fast_model,
        }
    }

    /// Build the initial conversation.
    fn build_messages(&self, request: &AgentRequest) -> Res<Vec<ChatCompletionRequestMessage>> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default().content(request.directive.trim().to_string()).build()?.into(),
            ChatCompletionRequestUserMessageArgs::default().content(request.user_message()).build()?.into(),
        ])
    }

    /// Helper function to make the API calls with retry logic and timeout handling.
    async fn call_api(&self, request_builder: &CreateChatCompletionRequestArgs) -> Res<CreateChatCompletionResponse> {
        let mut retries = 0;

        loop {
            let request = request_builder.build()?;
            let result = timeout(Duration::from_secs(TIMEOUT), self.client.chat().create(request)).await;

            match result {
                Ok(Ok(response)) => {
                    info!("LLM API call succeeded after {} attempts", retries + 1);
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("LLM API call failed after {MAX_RETRIES} retries: {err}"));
                    }
                    retries += 1;
                    warn!("LLM API call failed, retrying {retries}/{MAX_RETRIES}: {err}");

                    tokio::time::sleep(self.retry_delay * 2_u32.pow(retries - 1)).await;
                }
                Err(_) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("LLM API call timed out after {MAX_RETRIES} attempts"));
                    }
                    retries += 1;
                    warn!("LLM API call timed out, retrying {retries}/{MAX_RETRIES}");

                    tokio::time::sleep(self.retry_delay * 2_u32.pow(retries - 1)).await;
                }
            }
        }
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::run_agent", skip_all, fields(agent = %request.name))]
    async fn run_agent(&self, request: AgentRequest, tool_handler: BoxedToolHandler) -> Res<AgentResponse> {
        let model = self.model(request.model).to_string();
        let tools = build_tools(&request.tools)?;
        let mut messages = self.build_messages(&request)?;
        let mut usage = Vec::new();
        let max_steps = self.config.llm_max_steps as usize;

        for step in 0..=max_steps {
            let last_step = step == max_steps;
            if last_step && !tools.is_empty() {
                messages.push(ChatCompletionRequestUserMessageArgs::default().content(FINAL_ANSWER_REQUEST).build()?.into());
            }

            let mut builder = CreateChatCompletionRequestArgs::default();
            #[allow(deprecated)]
            builder
                .model(&model)
                .messages(messages.clone())
                .temperature(self.config.llm_temperature)
                .max_tokens(self.config.llm_max_tokens);

            if !tools.is_empty() && !last_step {
                builder.tools(tools.clone());
            }

            if request.json_output {
                builder.response_format(ResponseFormat::JsonObject);
            }

            let response = self.call_api(&builder).await?;

            if let Some(u) = &response.usage {
                merge_usage(
                    &mut usage,
                    Usage {
                        model: model.clone(),
                        input: u.prompt_tokens as u64,
                        output: u.completion_tokens as u64,
                    },
                );
            }

            let message = response.choices.into_iter().next().map(|choice| choice.message).ok_or_else(|| anyhow::anyhow!("The LLM returned no choices."))?;

            let tool_calls = message.tool_calls.unwrap_or_default();
            if tool_calls.is_empty() {
                let content = message.content.unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(anyhow::anyhow!("The LLM returned an empty answer."));
                }

                info!("Agent `{}` answered after {} steps.", request.name, step + 1);
                return Ok(AgentResponse { content, usage });
            }

            // Record the assistant request before the tool outputs.
            let mut assistant = ChatCompletionRequestAssistantMessageArgs::default();
            assistant.tool_calls(tool_calls.clone());
            if let Some(content) = message.content {
                assistant.content(content);
            }
            messages.push(assistant.build()?.into());

            for call in tool_calls {
                let output = run_tool(&tool_handler, &call).await;
                messages.push(ChatCompletionRequestToolMessageArgs::default().content(output).tool_call_id(call.id).build()?.into());
            }
        }

        Err(anyhow::anyhow!("Agent `{}` did not answer after {} steps.", request.name, max_steps))
    }
}

/// Execute a tool call, turning errors into a message for the model.
async fn run_tool(tool_handler: &BoxedToolHandler, call: &ChatCompletionMessageToolCall) -> String {
    let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
        Ok(arguments) => arguments,
        Err(err) => return format!("Error: invalid JSON arguments: {err}"),
    };

    let tool_call = ToolCall {
        id: call.id.clone(),
        name: call.function.name.clone(),
        arguments,
    };

    info!("Calling tool `{}` with {}", tool_call.name, tool_call.arguments);

    match tool_handler(tool_call).await {
        Ok(output) => output,
        Err(err) => {
            warn!("Tool `{}` failed: {}", call.function.name, err);
            format!("Error: {err}")
        }
    }
}

fn build_tools(tools: &[ToolSpec]) -> Res<Vec<ChatCompletionTool>> {
    tools
        .iter()
        .map(|tool| {
            Ok(ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(&tool.name)
                        .description(&tool.description)
                        .parameters(tool.parameters.clone())
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

// Tests.
