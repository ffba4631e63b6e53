//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, path::PathBuf, sync::Arc};

use serde::Deserialize;

use super::types::Res;

/// Default OpenAI-compatible endpoint (Gemini).
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

/// Default model for the RCA agents.
fn default_llm_model() -> String {
    "gemini-2.5-pro".to_string()
}

/// Default model for the cheaper agents (job description, related search, chat).
fn default_llm_fast_model() -> String {
    "gemini-2.5-flash".to_string()
}

/// Default sampling temperature.
fn default_llm_temperature() -> f32 {
    0.5
}

/// Default max output tokens.
fn default_llm_max_tokens() -> u32 {
    65536
}

/// Default bound on the number of tool rounds per agent call.
fn default_llm_max_steps() -> u32 {
    32
}

fn default_db_endpoint() -> String {
    "mem://".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_git_workspace() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache")).join("rca").join("gits")
}

fn default_zuul_info_ttl_secs() -> u64 {
    24 * 3600
}

/// Configuration for the RCA service.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// LLM API key (`RCAV2_LLM_API_KEY`).
    pub llm_api_key: String,
    /// Base URL of the OpenAI-compatible LLM API (`RCAV2_LLM_BASE_URL`).
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    /// Model used for the root cause analysis (`RCAV2_LLM_MODEL`).
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// Model used for auxiliary agents (`RCAV2_LLM_FAST_MODEL`).
    #[serde(default = "default_llm_fast_model")]
    pub llm_fast_model: String,
    /// Sampling temperature, between 0 and 2 (`RCAV2_LLM_TEMPERATURE`).
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,
    /// Max output tokens (`RCAV2_LLM_MAX_TOKENS`).
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,
    /// Max number of tool rounds for a single agent call (`RCAV2_LLM_MAX_STEPS`).
    #[serde(default = "default_llm_max_steps")]
    pub llm_max_steps: u32,
    /// Software factory URL hosting LogJuicer and the weeder export (`RCAV2_SF_URL`).
    pub sf_url: String,
    /// OIDC session cookie for the software factory (`RCAV2_SF_COOKIE`).
    #[serde(default)]
    pub sf_cookie: Option<String>,
    /// File holding the OIDC session cookie (`RCAV2_COOKIE_FILE`).
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    /// Extra CA bundle used for every outgoing request (`RCAV2_CA_BUNDLE_PATH`).
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
    /// Jira server (`RCAV2_JIRA_URL`).
    #[serde(default)]
    pub jira_url: Option<String>,
    /// Jira personal access token (`RCAV2_JIRA_API_KEY`).
    #[serde(default)]
    pub jira_api_key: Option<String>,
    /// Comma separated Jira projects searched for related issues (`RCAV2_JIRA_RCA_PROJECTS`).
    #[serde(default)]
    pub jira_rca_projects: Option<String>,
    /// Slack app token for the eodbot socket mode listener (`RCAV2_SLACK_APP_TOKEN`).
    #[serde(default)]
    pub slack_app_token: Option<String>,
    /// Slack bot token for eodbot (`RCAV2_SLACK_BOT_TOKEN`).
    #[serde(default)]
    pub slack_bot_token: Option<String>,
    /// Slack user token allowed to call `search.messages` (`RCAV2_SLACK_SEARCH_TOKEN`).
    #[serde(default)]
    pub slack_search_token: Option<String>,
    /// Comma separated channels searched for related threads (`RCAV2_SLACK_SEARCH_CHANNELS`).
    #[serde(default)]
    pub slack_search_channels: Option<String>,
    /// Database endpoint, e.g. `mem://` or `ws://localhost:8000` (`RCAV2_DB_ENDPOINT`).
    #[serde(default = "default_db_endpoint")]
    pub db_endpoint: String,
    /// Database username (`RCAV2_DB_USERNAME`).
    #[serde(default)]
    pub db_username: Option<String>,
    /// Database password (`RCAV2_DB_PASSWORD`).
    #[serde(default)]
    pub db_password: Option<String>,
    /// Additional job description, a local path or an http(s) URL (`RCAV2_JOB_DESCRIPTION_FILE`).
    #[serde(default)]
    pub job_description_file: Option<String>,
    /// Number of concurrent analysis workers (`RCAV2_WORKERS`).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// HTTP listen address (`RCAV2_LISTEN`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Public URL of the web interface, used in links (`RCAV2_PUBLIC_URL`).
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Directory of the web interface static files (`RCAV2_STATIC_DIR`).
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// Where the Zuul config repositories are cloned (`RCAV2_GIT_WORKSPACE`).
    #[serde(default = "default_git_workspace")]
    pub git_workspace: PathBuf,
    /// How long the weeder export is cached (`RCAV2_ZUUL_INFO_TTL_SECS`).
    #[serde(default = "default_zuul_info_ttl_secs")]
    pub zuul_info_ttl_secs: u64,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_base_url: default_llm_base_url(),
            llm_model: default_llm_model(),
            llm_fast_model: default_llm_fast_model(),
            llm_temperature: default_llm_temperature(),
            llm_max_tokens: default_llm_max_tokens(),
            llm_max_steps: default_llm_max_steps(),
            sf_url: String::new(),
            sf_cookie: None,
            cookie_file: None,
            ca_bundle_path: None,
            jira_url: None,
            jira_api_key: None,
            jira_rca_projects: None,
            slack_app_token: None,
            slack_bot_token: None,
            slack_search_token: None,
            slack_search_channels: None,
            db_endpoint: default_db_endpoint(),
            db_username: None,
            db_password: None,
            job_description_file: None,
            workers: default_workers(),
            listen: default_listen(),
            public_url: default_public_url(),
            static_dir: None,
            git_workspace: default_git_workspace(),
            zuul_info_ttl_secs: default_zuul_info_ttl_secs(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("RCAV2"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Check the value ranges.
    pub fn validate(&self) -> Res<()> {
        if self.llm_temperature < 0.0 || self.llm_temperature > 2.0 {
            return Err(anyhow::anyhow!("LLM temperature must be between 0 and 2."));
        }

        if self.llm_max_tokens < 1 || self.llm_max_tokens > 1024 * 1024 {
            return Err(anyhow::anyhow!("LLM max tokens must be between 1 and 1048576."));
        }

        if self.llm_max_steps < 1 {
            return Err(anyhow::anyhow!("LLM max steps must be at least 1."));
        }

        if self.workers < 1 {
            return Err(anyhow::anyhow!("At least one worker is required."));
        }

        if !self.sf_url.starts_with("http://") && !self.sf_url.starts_with("https://") {
            return Err(anyhow::anyhow!("The software factory URL must be an http(s) URL, got `{}`.", self.sf_url));
        }

        Ok(())
    }

    /// The software factory URL without trailing slash.
    pub fn sf_base(&self) -> &str {
        self.sf_url.trim_end_matches('/')
    }

    /// The Jira projects searched for related issues.
    pub fn jira_projects(&self) -> Vec<String> {
        split_list(self.jira_rca_projects.as_deref())
    }

    /// The Slack channels searched for related threads.
    pub fn slack_channels(&self) -> Vec<String> {
        split_list(self.slack_search_channels.as_deref())
    }

    /// Link to the web report of a build.
    pub fn report_url(&self, build: &str, workflow: &str) -> String {
        let base = format!("{}/", self.public_url.trim_end_matches('/'));

        match url::Url::parse_with_params(&base, &[("build", build), ("workflow", workflow)]) {
            Ok(url) => url.to_string(),
            Err(_) => base,
        }
    }
}

/// Split a comma separated list, dropping blank items.
pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(inner: ConfigInner) -> Config {
        Config { inner: Arc::new(inner) }
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(Some("OSPRH, OSPCIX,,")), vec!["OSPRH", "OSPCIX"]);
        assert!(split_list(None).is_empty());
        assert!(split_list(Some(" ")).is_empty());
    }

    #[test]
    fn test_validate_ranges() {
        let valid = ConfigInner {
            sf_url: "https://sf.example.com".to_string(),
            ..Default::default()
        };
        assert!(config(valid.clone()).validate().is_ok());

        let hot = ConfigInner { llm_temperature: 2.5, ..valid.clone() };
        assert!(config(hot).validate().is_err());

        let no_workers = ConfigInner { workers: 0, ..valid.clone() };
        assert!(config(no_workers).validate().is_err());

        let bad_url = ConfigInner {
            sf_url: "sf.example.com".to_string(),
            ..valid
        };
        assert!(config(bad_url).validate().is_err());
    }

    #[test]
    fn test_report_url_is_encoded() {
        let cfg = config(ConfigInner {
            public_url: "https://rca.example.com/".to_string(),
            ..Default::default()
        });

        assert_eq!(
            cfg.report_url("https://zuul.example.com/t/x/build/abc", "react"),
            "https://rca.example.com/?build=https%3A%2F%2Fzuul.example.com%2Ft%2Fx%2Fbuild%2Fabc&workflow=react"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
llm_api_key = "key"
sf_url = "https://sf.example.com/"
jira_rca_projects = "OSPRH,OSPCIX"
workers = 4
"#,
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();

        assert_eq!(cfg.sf_base(), "https://sf.example.com");
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.jira_projects(), vec!["OSPRH", "OSPCIX"]);
        assert_eq!(cfg.llm_model, "gemini-2.5-pro");
    }
}
