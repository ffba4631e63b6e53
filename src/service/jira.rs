//! Search of related Jira issues.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::{
    base::{config::Config, types::Res},
    service::sf::http_client_builder,
};

/// A Jira issue, as given to the agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    pub url: String,
    pub summary: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
}

/// Jira REST client limited to a set of projects.
#[derive(Clone)]
pub struct JiraClient {
    http: reqwest::Client,
    server: String,
    token: String,
    projects: Vec<String>,
}

impl JiraClient {
    /// Create the client when Jira is configured.
    pub fn from_config(config: &Config) -> Res<Option<Self>> {
        let (Some(server), Some(token)) = (&config.jira_url, &config.jira_api_key) else {
            return Ok(None);
        };

        Ok(Some(Self {
            http: http_client_builder(config)?.build()?,
            server: server.trim_end_matches('/').to_string(),
            token: token.clone(),
            projects: config.jira_projects(),
        }))
    }

    /// Restrict a JQL query to the configured projects.
    pub fn scoped_query(&self, query: &str) -> String {
        match self.projects.as_slice() {
            [] => query.to_string(),
            [project] => format!("project = {project} AND ({query})"),
            projects => format!("project IN ({}) AND ({query})", projects.join(", ")),
        }
    }

    /// Search issues with a JQL query, errors are logged and yield no issues.
    #[instrument(skip(self))]
    pub async fn search_issues(&self, query: &str, max_results: u32) -> Vec<JiraIssue> {
        let query = self.scoped_query(query);
        info!("Searching JIRA: {}", query);

        match self.search(&query, max_results).await {
            Ok(issues) => issues,
            Err(err) => {
                error!("Failed to search issues with query '{}': {}", query, err);
                Vec::new()
            }
        }
    }

    async fn search(&self, query: &str, max_results: u32) -> Res<Vec<JiraIssue>> {
        let response: Value = self
            .http
            .get(format!("{}/rest/api/2/search", self.server))
            .bearer_auth(&self.token)
            .query(&[("jql", query), ("maxResults", &max_results.to_string()), ("fields", "summary,status,description")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let issues = response["issues"].as_array().ok_or_else(|| anyhow::anyhow!("Invalid search response: missing `issues`."))?;

        Ok(issues
            .iter()
            .filter_map(|issue| {
                let key = issue["key"].as_str()?;
                let fields = &issue["fields"];
                Some(JiraIssue {
                    key: key.to_string(),
                    url: format!("{}/browse/{key}", self.server),
                    summary: fields["summary"].as_str().map(str::to_string),
                    status: fields.pointer("/status/name").and_then(Value::as_str).map(str::to_string),
                    description: fields["description"].as_str().map(str::to_string),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::base::config::ConfigInner;

    fn client(server: &MockServer, projects: &str) -> JiraClient {
        let config = Config {
            inner: Arc::new(ConfigInner {
                jira_url: Some(format!("{}/", server.base_url())),
                jira_api_key: Some("token".to_string()),
                jira_rca_projects: Some(projects.to_string()),
                ..Default::default()
            }),
        };
        JiraClient::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn test_disabled_without_credentials() {
        let config = Config {
            inner: Arc::new(ConfigInner {
                jira_url: Some("https://issues.example.com".to_string()),
                ..Default::default()
            }),
        };
        assert!(JiraClient::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scoped_query() {
        let server = MockServer::start_async().await;

        assert_eq!(client(&server, "").scoped_query("text ~ \"oom\""), "text ~ \"oom\"");
        assert_eq!(client(&server, "OSPRH").scoped_query("text ~ \"oom\""), "project = OSPRH AND (text ~ \"oom\")");
        assert_eq!(
            client(&server, "OSPRH,OSPCIX").scoped_query("text ~ \"oom\""),
            "project IN (OSPRH, OSPCIX) AND (text ~ \"oom\")"
        );
    }

    #[tokio::test]
    async fn test_search_issues() {
        let server = MockServer::start_async().await;
        let search = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/api/2/search")
                    .header("authorization", "Bearer token")
                    .query_param("jql", "project = OSPRH AND (text ~ \"oom\")")
                    .query_param("maxResults", "5");
                then.status(200).json_body(json!({
                    "issues": [
                        {"key": "OSPRH-1", "fields": {"summary": "OOM in podman", "status": {"name": "Open"}, "description": null}}
                    ]
                }));
            })
            .await;

        let issues = client(&server, "OSPRH").search_issues("text ~ \"oom\"", 5).await;

        search.assert_async().await;
        assert_eq!(
            issues,
            vec![JiraIssue {
                key: "OSPRH-1".to_string(),
                url: format!("{}/browse/OSPRH-1", server.base_url()),
                summary: Some("OOM in podman".to_string()),
                status: Some("Open".to_string()),
                description: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_search_errors_yield_no_issues() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/rest/api/2/search");
                then.status(400).json_body(json!({"errorMessages": ["bad jql"]}));
            })
            .await;

        assert!(client(&server, "").search_issues("bad", 5).await.is_empty());
    }
}
