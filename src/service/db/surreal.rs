//! SurrealDB implementation of the storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::{
    Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
};
use tracing::{info, instrument};

use super::{DbClient, GenericDbClient};
use crate::{
    base::{
        config::Config,
        types::{Event, Res, Void},
    },
    model::report::{Feedback, Vote},
};

const REPORT_TABLE: &str = "report";
const JOB_TABLE: &str = "job";
const FEEDBACK_TABLE: &str = "feedback";

/// Job descriptions older than this are ignored.
const JOB_MAX_AGE_SECS: i64 = 24 * 3600;

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Connect to the configured SurrealDB endpoint.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }

    /// Use an in-memory database.
    pub async fn surreal_memory() -> Res<Self> {
        let client = SurrealDbClient::connect("mem://", None).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Records.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReportRecord {
    workflow: String,
    build: String,
    created_at: i64,
    /// The JSON list of events, `None` until the analysis is done.
    events: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobRecord {
    name: String,
    created_at: i64,
    body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeedbackRecord {
    workflow: String,
    build: String,
    created_at: i64,
    vote: Vote,
    comment: Option<String>,
}

// Specific implementations.

/// SurrealDB client implementation.
#[derive(Clone)]
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

impl SurrealDbClient {
    #[instrument(name = "SurrealDbClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        let credentials = match (&config.db_username, &config.db_password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        };

        Self::connect(&config.db_endpoint, credentials).await
    }

    async fn connect(endpoint: &str, credentials: Option<(&str, &str)>) -> Res<Self> {
        let db = any::connect(endpoint).await?;

        if let Some((username, password)) = credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns("rca").use_db("rca").await?;

        info!("Database `{}` initialized successfully.", endpoint);

        Ok(Self { db })
    }
}

fn report_id(workflow: &str, build: &str) -> String {
    format!("{workflow}|{build}")
}

fn encode_events(events: &[Event]) -> Res<String> {
    Ok(serde_json::to_string(events)?)
}

fn decode_events(body: Option<String>) -> Res<Option<Vec<Event>>> {
    body.map(|body| serde_json::from_str(&body)).transpose().map_err(Into::into)
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    #[instrument(skip(self))]
    async fn get_report(&self, workflow: &str, build: &str) -> Res<Option<Vec<Event>>> {
        let id = report_id(workflow, build);
        let record: Option<ReportRecord> = self.db.select((REPORT_TABLE, id.as_str())).await?;

        match record {
            Some(record) => decode_events(record.events),
            None => {
                info!("Report `{}` not found, registering it.", id);
                let placeholder = ReportRecord {
                    workflow: workflow.to_string(),
                    build: build.to_string(),
                    created_at: Utc::now().timestamp(),
                    events: None,
                };
                let _: Option<ReportRecord> = self.db.upsert((REPORT_TABLE, id.as_str())).content(placeholder).await?;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, events))]
    async fn set_report(&self, workflow: &str, build: &str, events: &[Event]) -> Void {
        let id = report_id(workflow, build);
        let record = ReportRecord {
            workflow: workflow.to_string(),
            build: build.to_string(),
            created_at: Utc::now().timestamp(),
            events: Some(encode_events(events)?),
        };

        let _: Option<ReportRecord> = self.db.upsert((REPORT_TABLE, id.as_str())).content(record).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_job(&self, name: &str) -> Res<Option<Vec<Event>>> {
        let record: Option<JobRecord> = self.db.select((JOB_TABLE, name)).await?;

        match record {
            Some(record) if Utc::now().timestamp() - record.created_at > JOB_MAX_AGE_SECS => {
                info!("Ignoring the outdated description of `{}`.", name);
                Ok(None)
            }
            Some(record) => decode_events(record.body),
            None => {
                let placeholder = JobRecord {
                    name: name.to_string(),
                    created_at: Utc::now().timestamp(),
                    body: None,
                };
                let _: Option<JobRecord> = self.db.upsert((JOB_TABLE, name)).content(placeholder).await?;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, events))]
    async fn set_job(&self, name: &str, events: &[Event]) -> Void {
        let record = JobRecord {
            name: name.to_string(),
            created_at: Utc::now().timestamp(),
            body: Some(encode_events(events)?),
        };

        let _: Option<JobRecord> = self.db.upsert((JOB_TABLE, name)).content(record).await?;

        Ok(())
    }

    #[instrument(skip(self, feedback))]
    async fn add_feedback(&self, workflow: &str, build: &str, feedback: &Feedback) -> Void {
        let record = FeedbackRecord {
            workflow: workflow.to_string(),
            build: build.to_string(),
            created_at: Utc::now().timestamp_micros(),
            vote: feedback.vote,
            comment: feedback.comment.clone(),
        };

        self.db.query(format!("CREATE {FEEDBACK_TABLE} CONTENT $record")).bind(("record", record)).await?.check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_feedback(&self, workflow: &str, build: &str) -> Res<Vec<Feedback>> {
        let mut response = self
            .db
            .query(format!("SELECT * FROM {FEEDBACK_TABLE} WHERE workflow = $workflow AND build = $build ORDER BY created_at"))
            .bind(("workflow", workflow.to_string()))
            .bind(("build", build.to_string()))
            .await?;

        let records: Vec<FeedbackRecord> = response.take(0)?;

        Ok(records.into_iter().map(|r| Feedback { vote: r.vote, comment: r.comment }).collect())
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::base::types::EventKind;

    const BUILD: &str = "https://zuul.example.com/t/tenant/build/abc";

    #[tokio::test]
    async fn test_reports() {
        let db = DbClient::surreal_memory().await.unwrap();

        // The first get registers the report.
        assert_eq!(db.get_report("react", BUILD).await.unwrap(), None);
        assert_eq!(db.get_report("react", BUILD).await.unwrap(), None);

        let events = vec![Event::new(EventKind::Workflow, "react"), Event::new(EventKind::Report, json!({"summary": "oom"}))];
        db.set_report("react", BUILD, &events).await.unwrap();

        assert_eq!(db.get_report("react", BUILD).await.unwrap(), Some(events));
        assert_eq!(db.get_report("predict", BUILD).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_jobs() {
        let db = DbClient::surreal_memory().await.unwrap();

        assert_eq!(db.get_job("podified-deploy").await.unwrap(), None);

        let events = vec![Event::new(EventKind::Job, json!({"description": "deploys", "actions": []}))];
        db.set_job("podified-deploy", &events).await.unwrap();

        assert_eq!(db.get_job("podified-deploy").await.unwrap(), Some(events));
    }

    #[tokio::test]
    async fn test_outdated_jobs_are_ignored() {
        let client = SurrealDbClient::connect("mem://", None).await.unwrap();
        let record = JobRecord {
            name: "old".to_string(),
            created_at: Utc::now().timestamp() - JOB_MAX_AGE_SECS - 10,
            body: Some("[]".to_string()),
        };
        let _: Option<JobRecord> = client.db.upsert((JOB_TABLE, "old")).content(record).await.unwrap();

        assert_eq!(client.get_job("old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_feedback() {
        let db = DbClient::surreal_memory().await.unwrap();

        db.add_feedback("react", BUILD, &Feedback { vote: Vote::Up, comment: None }).await.unwrap();
        db.add_feedback("react", BUILD, &Feedback { vote: Vote::Down, comment: Some("wrong cause".to_string()) }).await.unwrap();
        db.add_feedback("predict", BUILD, &Feedback { vote: Vote::Up, comment: None }).await.unwrap();

        let feedback = db.list_feedback("react", BUILD).await.unwrap();

        assert_eq!(feedback.len(), 2);
        assert_eq!(feedback[0].vote, Vote::Up);
        assert_eq!(feedback[1].comment.as_deref(), Some("wrong cause"));
    }
}
