//! The RCA report and its feedback.

use std::fmt::Write;

use serde::{Deserialize, Deserializer, Serialize};

/// An error line supporting a root cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub error: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PossibleRootCause {
    pub cause: String,
    #[serde(default)]
    pub evidences: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JiraTicket {
    pub key: String,
    pub url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackThread {
    pub permalink: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default)]
    pub channel: Option<String>,
}

/// The LLM sometimes answers `null` for the free text fields.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The result of an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub summary: String,
    /// Ordered by likelihood, most likely first.
    pub possible_root_causes: Vec<PossibleRootCause>,
    #[serde(default)]
    pub jira_tickets: Vec<JiraTicket>,
    #[serde(default)]
    pub slack_threads: Vec<SlackThread>,
}

impl Report {
    /// Render the report for a chat message.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "*Summary*\n{}", self.summary.trim());

        if !self.possible_root_causes.is_empty() {
            let _ = writeln!(out, "\n*Possible root causes*");
            for (idx, cause) in self.possible_root_causes.iter().enumerate() {
                let _ = writeln!(out, "{}. {}", idx + 1, cause.cause.trim());
                for evidence in &cause.evidences {
                    let _ = writeln!(out, "    • `{}`: {}", evidence.source, evidence.error.trim());
                }
            }
        }

        if !self.jira_tickets.is_empty() {
            let _ = writeln!(out, "\n*Related Jira issues*");
            for ticket in &self.jira_tickets {
                let _ = writeln!(out, "• <{}|{}> {}", ticket.url, ticket.key, ticket.summary);
            }
        }

        if !self.slack_threads.is_empty() {
            let _ = writeln!(out, "\n*Related Slack threads*");
            for thread in &self.slack_threads {
                let _ = writeln!(out, "• <{}|{}>", thread.permalink, first_line(&thread.text, 80));
            }
        }

        out.trim_end().to_string()
    }
}

/// The first line of a text, truncated to `max` characters.
fn first_line(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max {
        format!("{}…", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

/// User feedback on a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub vote: Vote,
    #[serde(default)]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_to_markdown() {
        let report = Report {
            summary: "The controller could not pull images.\n".to_string(),
            possible_root_causes: vec![PossibleRootCause {
                cause: "Registry timeout".to_string(),
                evidences: vec![Evidence {
                    error: "Connection timed out".to_string(),
                    source: "controller/podman.log".to_string(),
                }],
            }],
            jira_tickets: vec![JiraTicket {
                key: "OSPCIX-1".to_string(),
                url: "https://jira/browse/OSPCIX-1".to_string(),
                summary: "Registry flaky".to_string(),
            }],
            slack_threads: vec![],
        };

        let md = report.to_markdown();

        assert!(md.starts_with("*Summary*\nThe controller could not pull images."));
        assert!(md.contains("1. Registry timeout"));
        assert!(md.contains("`controller/podman.log`: Connection timed out"));
        assert!(md.contains("<https://jira/browse/OSPCIX-1|OSPCIX-1> Registry flaky"));
        assert!(!md.contains("Slack threads"));
    }

    #[test]
    fn test_first_line_truncation() {
        assert_eq!(first_line("short\nsecond", 10), "short");
        assert_eq!(first_line("abcdef", 3), "abc…");
    }

    #[test]
    fn test_links_without_text() {
        let report: Report = serde_json::from_str(
            r#"{
                "summary": "s",
                "possible_root_causes": [],
                "jira_tickets": [{"key": "OSPRH-1", "url": "https://jira/browse/OSPRH-1", "summary": null}],
                "slack_threads": [{"permalink": "https://slack/p1", "text": null}, {"permalink": "https://slack/p2"}]
            }"#,
        )
        .unwrap();

        assert_eq!(report.jira_tickets[0].summary, "");
        assert_eq!(report.slack_threads.len(), 2);
        assert_eq!(report.slack_threads[1].text, "");
        assert!(report.to_markdown().contains("<https://jira/browse/OSPRH-1|OSPRH-1>"));
    }

    #[test]
    fn test_report_defaults_on_missing_links() {
        let report: Report = serde_json::from_str(r#"{"summary": "s", "possible_root_causes": []}"#).unwrap();
        assert!(report.jira_tickets.is_empty());
        assert!(report.slack_threads.is_empty());
    }
}
