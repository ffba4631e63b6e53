//! Runtime services and shared state for the RCA service.

use std::time::Duration;

use tracing::{info, instrument};

use crate::{
    agent::related::Searchers,
    api,
    base::{
        config::Config,
        types::{Res, Void},
    },
    service::{
        chat::ChatClient,
        db::DbClient,
        git::GitWorkspace,
        jira::JiraClient,
        llm::LlmClient,
        logjuicer::LogJuicerClient,
        sf::{SfClient, http_client_builder},
        slack_search::SlackSearchClient,
        zuul::ZuulInfoCache,
    },
    worker::Pool,
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the service clients, the worker pool, and the configuration.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The database client instance.
    pub db: DbClient,
    /// The LLM client instance.
    pub llm: LlmClient,
    /// Plain HTTP client, honoring the CA bundle.
    pub http: reqwest::Client,
    pub logjuicer: LogJuicerClient,
    pub zuul: ZuulInfoCache,
    pub git: GitWorkspace,
    /// The related items search backends.
    pub searchers: Searchers,
    /// The analysis workers.
    pub pool: Pool,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(name = "Runtime::new", skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        let db = DbClient::surreal(&config).await?;

        // Initialize the LLM client.
        let llm = LlmClient::openai(&config)?;

        Self::from_parts(config, db, llm)
    }

    /// Create a runtime with the given database and LLM clients.
    ///
    /// This must be called from within a tokio runtime.
    pub fn from_parts(config: Config, db: DbClient, llm: LlmClient) -> Res<Self> {
        let sf = SfClient::new(&config)?;
        let http = http_client_builder(&config)?.build()?;

        let searchers = Searchers {
            jira: JiraClient::from_config(&config)?,
            slack: SlackSearchClient::from_config(&config)?,
        };
        if searchers.is_empty() {
            info!("Related issues search is disabled");
        }

        Ok(Self {
            logjuicer: LogJuicerClient::new(sf.clone()),
            zuul: ZuulInfoCache::new(sf, Duration::from_secs(config.zuul_info_ttl_secs)),
            git: GitWorkspace::new(config.git_workspace.clone()),
            pool: Pool::new(config.workers),
            searchers,
            http,
            config,
            db,
            llm,
        })
    }

    /// Serve the HTTP API, and the chat bot when configured.
    pub async fn start(&self) -> Void {
        let Some(chat) = ChatClient::slack(self.clone()).await? else {
            info!("Slack tokens are not configured, eodbot is disabled");
            return api::serve(self.clone()).await;
        };

        tokio::try_join!(api::serve(self.clone()), chat.start())?;

        Ok(())
    }

    /// Stop the workers.
    pub async fn stop(&self) {
        self.pool.stop().await;
    }
}
