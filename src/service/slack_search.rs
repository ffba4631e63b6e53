//! Search of related Slack threads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, instrument};

use crate::{
    base::{config::Config, types::Res},
    service::sf::http_client_builder,
};

const SLACK_API_URL: &str = "https://slack.com/api";

/// A message found in the searched channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackMessage {
    pub text: Option<String>,
    pub user: Option<String>,
    pub permalink: String,
    pub channel: Option<String>,
}

/// Client of the Slack `search.messages` API.
///
/// This needs a user token, bot tokens are not allowed to search.
#[derive(Clone)]
pub struct SlackSearchClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    channels: Vec<String>,
}

impl SlackSearchClient {
    /// Create the client when the search is configured.
    pub fn from_config(config: &Config) -> Res<Option<Self>> {
        let Some(token) = &config.slack_search_token else {
            return Ok(None);
        };

        Ok(Some(Self {
            http: http_client_builder(config)?.build()?,
            api_url: SLACK_API_URL.to_string(),
            token: token.clone(),
            channels: config.slack_channels(),
        }))
    }

    /// Use another Slack API endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Search the messages in every channel, deduplicated by permalink.
    #[instrument(skip(self))]
    pub async fn search_messages(&self, query: &str, count: u32) -> Vec<SlackMessage> {
        let mut result: Vec<SlackMessage> = Vec::new();

        for channel in &self.channels {
            let channel = channel.trim().trim_start_matches('#');
            if channel.is_empty() {
                continue;
            }

            let matches = match self.search_channel(&format!("{query} in:#{channel}"), count).await {
                Ok(matches) => matches,
                Err(err) => {
                    error!("Error searching slack in channel {}: {}", channel, err);
                    continue;
                }
            };

            for message in matches {
                if !result.iter().any(|m| m.permalink == message.permalink) {
                    result.push(message);
                }
            }
        }

        result
    }

    async fn search_channel(&self, query: &str, count: u32) -> Res<Vec<SlackMessage>> {
        let response: Value = self
            .http
            .get(format!("{}/search.messages", self.api_url))
            .bearer_auth(&self.token)
            .query(&[("query", query), ("count", &count.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response["ok"].as_bool() != Some(true) {
            return Err(anyhow::anyhow!("Slack API error: {}", response["error"].as_str().unwrap_or("unknown")));
        }

        let matches = response.pointer("/messages/matches").and_then(Value::as_array).cloned().unwrap_or_default();

        Ok(matches
            .iter()
            .filter_map(|m| {
                Some(SlackMessage {
                    text: m["text"].as_str().map(str::to_string),
                    user: m["user"].as_str().map(str::to_string),
                    permalink: m["permalink"].as_str()?.to_string(),
                    channel: m.pointer("/channel/name").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect())
    }
}
