//! Slack integration of eodbot.
//!
//! The bot listens to the `/rca` slash command in socket mode, and posts the
//! reports in the channel where the analysis was requested.

use crate::{
    base::types::{Res, Void},
    interaction,
    runtime::Runtime,
};
use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use slack_morphism::prelude::*;
use tracing::{info, instrument, warn};

use std::sync::Arc;

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates the Slack chat client, when the tokens are configured.
    pub async fn slack(runtime: Runtime) -> Res<Option<Self>> {
        let (Some(app_token), Some(bot_token)) = (runtime.config.slack_app_token.clone(), runtime.config.slack_bot_token.clone()) else {
            return Ok(None);
        };

        let client = SlackChatClient::new(app_token, bot_token, runtime).await?;
        Ok(Some(Self { inner: Arc::new(client) }))
    }
}

impl From<SlackChatClient> for ChatClient {
    fn from(client: SlackChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    runtime: Runtime,
    chat: ChatClient,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub client: Arc<FullClient>,
    pub runtime: Runtime,
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(app_token: String, bot_token: String, runtime: Runtime) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(app_token));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(bot_token));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Check the bot token.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;

        info!("Slack bot user ID: {}", bot_user.user_id.0);

        Ok(Self {
            app_token,
            bot_token,
            client,
            runtime,
        })
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    async fn start(&self) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_command_events(handle_command_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            runtime: self.runtime.clone(),
            chat: ChatClient::from(self.clone()),
        }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register the app token to listen for events.
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Serve until Ctrl-C.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel_id: &str, text: &str) -> Void {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), message).with_link_names(true);

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(())
    }
}

// Socket mode listener callbacks for Slack.

/// Handles command events from Slack.
#[instrument(skip_all)]
async fn handle_command_event(
    event: SlackCommandEvent,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> Result<SlackCommandEventResponse, Box<dyn std::error::Error + Send + Sync>> {
    let (runtime, chat) = {
        let states = states.read().await;
        let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;
        (user_state.runtime.clone(), user_state.chat.clone())
    };

    let reply = match event.command.0.as_str() {
        "/rca" => {
            let text = event.text.as_deref().unwrap_or_default();
            interaction::rca_command::handle_rca_command(text, &event.channel_id.0, &runtime, &chat).await
        }
        other => {
            warn!("[COMMAND] unsupported command {}", other);
            format!("The `{other}` command is not supported.")
        }
    };

    Ok(SlackCommandEventResponse::new(SlackMessageContent::new().with_text(reply)))
}
