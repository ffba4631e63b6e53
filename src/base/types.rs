use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// The kind of an event emitted by a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The name of the workflow being run.
    Workflow,
    /// Human readable progress message.
    Progress,
    /// Link to the LogJuicer report used as input.
    LogjuicerUrl,
    /// The job description.
    Job,
    /// The final RCA report.
    Report,
    /// LLM token usage.
    Usage,
    /// A non fatal error.
    Error,
    /// Terminal status of the job.
    Status,
    /// The job is no longer pending, the client should reload.
    Redirect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Workflow => "workflow",
            EventKind::Progress => "progress",
            EventKind::LogjuicerUrl => "logjuicer_url",
            EventKind::Job => "job",
            EventKind::Report => "report",
            EventKind::Usage => "usage",
            EventKind::Error => "error",
            EventKind::Status => "status",
            EventKind::Redirect => "redirect",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by a job, serialized as a `[kind, data]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event(pub EventKind, pub Value);

impl Event {
    pub fn new(kind: EventKind, data: impl Into<Value>) -> Self {
        Self(kind, data.into())
    }

    pub fn kind(&self) -> EventKind {
        self.0
    }

    pub fn data(&self) -> &Value {
        &self.1
    }
}

/// Token usage reported by one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub model: String,
    pub input: u64,
    pub output: u64,
}

/// Status returned when submitting a job to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Completed,
    /// The pool is stopped, the job was dropped.
    Stopped,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_event_serializes_as_pair() {
        let event = Event::new(EventKind::LogjuicerUrl, "https://sf/logjuicer/report/42");

        assert_eq!(serde_json::to_value(&event).unwrap(), json!(["logjuicer_url", "https://sf/logjuicer/report/42"]));

        let back: Event = serde_json::from_value(json!(["status", "completed"])).unwrap();
        assert_eq!(back.kind(), EventKind::Status);
        assert_eq!(back.data(), &json!("completed"));
    }

    #[test]
    fn test_job_status_serialization() {
        assert_eq!(serde_json::to_value(JobStatus::Pending).unwrap(), json!("PENDING"));
    }
}
