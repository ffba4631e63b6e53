//! The LogJuicer errors report, pre-processed for the LLM agents.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base::types::Res;

/// Where a log file comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    /// The path relative to the build logs root.
    pub log_name: String,
    /// The absolute URL (of the archive, when `archive` is set).
    pub log_url: String,
    /// The log is a member of a tarball.
    pub archive: bool,
}

/// An error line with its context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogError {
    pub before: Vec<String>,
    pub line: String,
    pub pos: u64,
    pub after: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    pub source: LogSource,
    pub errors: Vec<LogError>,
}

impl LogFile {
    pub fn name(&self) -> &str {
        &self.source.log_name
    }

    fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.errors.first().and_then(|e| e.timestamp)
    }
}

/// The errors found in a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorsReport {
    /// The job name.
    pub target: String,
    /// The build logs URL.
    pub log_url: Option<String>,
    /// The log files, sorted by the timestamp of their first error.
    pub logfiles: Vec<LogFile>,
}

/// Order optional timestamps with the missing ones last.
fn cmp_timestamps(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl ErrorsReport {
    /// Read the JSON report produced by LogJuicer.
    pub fn from_logjuicer(report: &Value) -> Res<Self> {
        let target = &report["target"];
        let log_reports = report["log_reports"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid LogJuicer report: missing `log_reports`."))?;

        let mut logfiles = log_reports.iter().map(read_logfile).collect::<Res<Vec<_>>>()?;

        for logfile in logfiles.iter_mut() {
            logfile.errors.sort_by(|a, b| cmp_timestamps(&a.timestamp, &b.timestamp).then(a.pos.cmp(&b.pos)));
        }
        logfiles.sort_by(|a, b| cmp_timestamps(&a.first_timestamp(), &b.first_timestamp()).then_with(|| a.name().cmp(b.name())));

        Ok(Self {
            target: read_target(target),
            log_url: read_log_url(target),
            logfiles,
        })
    }

    /// Render every error as a markdown prompt.
    pub fn to_prompt(&self) -> String {
        let mut lines = vec![format!("The following errors are from a Zuul job named {}:", self.target), String::new()];

        for logfile in &self.logfiles {
            lines.push(format!("## {}", logfile.name()));
            for error in &logfile.errors {
                lines.extend(error.before.iter().cloned());
                lines.push(error.line.clone());
                lines.extend(error.after.iter().cloned());
            }
        }

        lines.join("\n")
    }

    /// The error count of each log file, in chronological order.
    pub fn error_counts(&self) -> Vec<(String, usize)> {
        self.logfiles.iter().map(|l| (l.name().to_string(), l.errors.len())).collect()
    }

    /// The total number of errors.
    pub fn error_count(&self) -> usize {
        self.logfiles.iter().map(|l| l.errors.len()).sum()
    }

    /// The errors of one log file.
    pub fn read_errors(&self, source: &str) -> &[LogError] {
        self.logfiles.iter().find(|l| l.name() == source).map(|l| l.errors.as_slice()).unwrap_or_default()
    }

    /// The log files having at least one error line matching the (case insensitive) regex.
    pub fn search_errors(&self, regex: &str) -> Res<Vec<&LogFile>> {
        let reg = RegexBuilder::new(regex).case_insensitive(true).build()?;

        Ok(self.logfiles.iter().filter(|l| l.errors.iter().any(|e| reg.is_match(&e.line))).collect())
    }
}

fn read_source(source: &Value) -> LogSource {
    if let Some([pos, url]) = source.pointer("/RawFile/Remote").and_then(Value::as_array).map(Vec::as_slice)
        && let (Some(pos), Some(url)) = (pos.as_u64(), url.as_str())
    {
        return LogSource {
            log_name: url.get(pos as usize..).unwrap_or(url).to_string(),
            log_url: url.to_string(),
            archive: false,
        };
    }

    if let Some([tar, _, name]) = source.get("TarFile").and_then(Value::as_array).map(Vec::as_slice)
        && let (Some(tar_url), Some(name)) = (tar.pointer("/Remote/1").and_then(Value::as_str), name.as_str())
    {
        return LogSource {
            log_name: name.to_string(),
            log_url: tar_url.to_string(),
            archive: true,
        };
    }

    LogSource {
        log_name: format!("Unknown source: {source}"),
        log_url: String::new(),
        archive: false,
    }
}

fn read_target(target: &Value) -> String {
    match target.pointer("/Zuul/job_name").and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => format!("Unknown target: {target}"),
    }
}

fn read_log_url(target: &Value) -> Option<String> {
    target.pointer("/Zuul/log_url").and_then(Value::as_str).map(str::to_string)
}

fn read_lines(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|lines| lines.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Timestamps are either RFC 3339 strings or epochs (seconds, or milliseconds for large values).
fn read_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => {
            let epoch = n.as_i64()?;
            if epoch.unsigned_abs() > 20_000_000_000 {
                DateTime::from_timestamp_millis(epoch)
            } else {
                DateTime::from_timestamp(epoch, 0)
            }
        }
        _ => None,
    }
}

fn read_error(anomaly: &Value) -> Res<LogError> {
    let line = anomaly
        .pointer("/anomaly/line")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("Invalid LogJuicer anomaly: missing line."))?;

    let timestamp = anomaly.pointer("/anomaly/timestamp").and_then(read_timestamp);

    Ok(LogError {
        before: read_lines(&anomaly["before"]),
        line: line.to_string(),
        pos: anomaly.pointer("/anomaly/pos").and_then(Value::as_u64).unwrap_or_default(),
        after: read_lines(&anomaly["after"]),
        timestamp,
    })
}

fn read_logfile(log_report: &Value) -> Res<LogFile> {
    let errors = log_report["anomalies"].as_array().map(|a| a.iter().map(read_error).collect::<Res<Vec<_>>>()).transpose()?.unwrap_or_default();

    Ok(LogFile {
        source: read_source(&log_report["source"]),
        errors,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn sample_logjuicer_report() -> Value {
        json!({
            "target": {"Zuul": {"job_name": "tox", "log_url": "https://logserver/build"}},
            "log_reports": [
                {
                    "source": {"RawFile": {"Remote": [12, "example.com/job-output.txt"]}},
                    "anomalies": [
                        {"before": ["TASK [run tests]"], "anomaly": {"line": "FAILED: 3 tests", "pos": 90, "timestamp": "2025-01-01T10:05:00Z"}, "after": []},
                        {"before": [], "anomaly": {"line": "ERROR: job failed", "pos": 120, "timestamp": "2025-01-01T10:06:00Z"}, "after": ["end"]}
                    ]
                },
                {
                    "source": {"TarFile": [{"Remote": [12, "example.com/logs.tar.gz"]}, "x", "controller/podman.log"]},
                    "anomalies": [
                        {"before": [], "anomaly": {"line": "Connection timed out", "pos": 3, "timestamp": "2025-01-01T10:00:00Z"}, "after": []}
                    ]
                },
                {
                    "source": {"RawFile": {"Remote": [12, "example.com/zuul/overcloud.log"]}},
                    "anomalies": [
                        {"before": [], "anomaly": {"line": "oops", "pos": 42}, "after": []}
                    ]
                }
            ]
        })
    }

    #[test]
    fn test_read_source() {
        let raw = read_source(&json!({"RawFile": {"Remote": [12, "example.com/zuul/overcloud.log"]}}));
        assert_eq!(raw.log_name, "zuul/overcloud.log");
        assert_eq!(raw.log_url, "example.com/zuul/overcloud.log");
        assert!(!raw.archive);

        let tar = read_source(&json!({"TarFile": [{"Remote": [12, "example.com/logs.tar.gz"]}, "x", "podman.log"]}));
        assert_eq!(tar.log_name, "podman.log");
        assert_eq!(tar.log_url, "example.com/logs.tar.gz");
        assert!(tar.archive);

        let unknown = read_source(&json!({"Local": "/tmp/log"}));
        assert!(unknown.log_name.starts_with("Unknown source:"));
    }

    #[test]
    fn test_read_target() {
        assert_eq!(read_target(&json!({"Zuul": {"job_name": "tox"}})), "tox");
        assert!(read_target(&json!({"Local": {}})).starts_with("Unknown target:"));
        assert_eq!(read_log_url(&json!({"Zuul": {"job_name": "tox"}})), None);
    }

    #[test]
    fn test_report_is_sorted_chronologically() {
        let report = ErrorsReport::from_logjuicer(&sample_logjuicer_report()).unwrap();

        assert_eq!(report.target, "tox");
        assert_eq!(report.log_url.as_deref(), Some("https://logserver/build"));
        assert_eq!(
            report.error_counts(),
            vec![
                ("controller/podman.log".to_string(), 1),
                ("job-output.txt".to_string(), 2),
                ("zuul/overcloud.log".to_string(), 1),
            ]
        );
        assert_eq!(report.error_count(), 4);
        assert_eq!(report.read_errors("job-output.txt")[0].line, "FAILED: 3 tests");
    }

    #[test]
    fn test_errors_without_timestamp_come_last() {
        let report = ErrorsReport::from_logjuicer(&json!({
            "target": {"Zuul": {"job_name": "tox"}},
            "log_reports": [{
                "source": {"RawFile": {"Remote": [0, "a.log"]}},
                "anomalies": [
                    {"before": [], "anomaly": {"line": "late", "pos": 1}, "after": []},
                    {"before": [], "anomaly": {"line": "second", "pos": 9, "timestamp": "2025-01-01T10:00:01Z"}, "after": []},
                    {"before": [], "anomaly": {"line": "first", "pos": 10, "timestamp": "2025-01-01T10:00:00Z"}, "after": []}
                ]
            }]
        }))
        .unwrap();

        let lines: Vec<_> = report.read_errors("a.log").iter().map(|e| e.line.as_str()).collect();
        assert_eq!(lines, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_to_prompt() {
        let report = ErrorsReport::from_logjuicer(&json!({
            "target": {"Zuul": {"job_name": "tox"}},
            "log_reports": [{
                "source": {"RawFile": {"Remote": [12, "example.com/zuul/overcloud.log"]}},
                "anomalies": [{"before": [], "anomaly": {"line": "oops", "pos": 42}, "after": []}]
            }]
        }))
        .unwrap();

        assert_eq!(report.to_prompt(), "The following errors are from a Zuul job named tox:\n\n## zuul/overcloud.log\noops");
    }

    #[test]
    fn test_search_errors_is_case_insensitive() {
        let report = ErrorsReport::from_logjuicer(&sample_logjuicer_report()).unwrap();

        let found = report.search_errors("connection TIMED").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "controller/podman.log");

        assert!(report.search_errors("nothing-like-this").unwrap().is_empty());
        assert!(report.search_errors("(unclosed").is_err());
        assert!(report.read_errors("missing.log").is_empty());
    }

    #[test]
    fn test_read_timestamp() {
        let secs = read_timestamp(&json!(1735725600)).unwrap();
        let millis = read_timestamp(&json!(1735725600000i64)).unwrap();
        let text = read_timestamp(&json!("2025-01-01T10:00:00Z")).unwrap();

        assert_eq!(secs, millis);
        assert_eq!(secs, text);
        assert_eq!(read_timestamp(&Value::Null), None);
        assert_eq!(read_timestamp(&json!(i64::MIN)), None);
        assert_eq!(read_timestamp(&json!(i64::MAX)), None);
    }

    #[test]
    fn test_missing_log_reports_is_an_error() {
        assert!(ErrorsReport::from_logjuicer(&json!({"target": {}})).is_err());
    }
}
