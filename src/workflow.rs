//! The RCA workflows, and the jobs running them on the worker pool.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::{
    agent,
    base::types::{Event, EventKind, JobStatus, Res, Void},
    model::Job,
    runtime::Runtime,
    service::zuul::job_playbooks,
    worker::{self, Worker},
};

/// Timeout of the additional description download.
const DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(30);

/// The available analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    /// A single call with every error.
    Predict,
    /// An agent reading the errors with tools.
    React,
}

impl Workflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Workflow::Predict => "predict",
            Workflow::React => "react",
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Workflow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Res<Self> {
        match s {
            "predict" => Ok(Workflow::Predict),
            "react" => Ok(Workflow::React),
            other => Err(anyhow::anyhow!("Unknown workflow `{other}`, expected `predict` or `react`.")),
        }
    }
}

/// Describe a job with the job agent, from its definition files.
#[instrument(skip(rt, worker))]
pub async fn job_from_model(rt: &Runtime, name: &str, worker: &Worker) -> Res<Option<Job>> {
    worker.progress("Reading job plays...").await;

    let info = rt.zuul.get().await?;
    let plays = job_playbooks(&rt.git, &info, name).await?;
    if plays.is_empty() {
        worker.emit(EventKind::Error, format!("Couldn't find job {name}")).await;
        return Ok(None);
    }

    worker.progress("Analyzing job...").await;
    let job = agent::job::call_agent(&rt.llm, rt.git.root(), &plays, worker).await?;

    Ok(Some(job))
}

/// The job description stored by a previous run, when still fresh.
async fn job_from_db(rt: &Runtime, name: &str, worker: &Worker) -> Res<Option<Job>> {
    let Some(events) = rt.db.get_job(name).await? else {
        return Ok(None);
    };

    let Some(Event(_, data)) = events.into_iter().find(|event| event.kind() == EventKind::Job) else {
        return Ok(None);
    };

    worker.progress("Found a description in the cache").await;

    Ok(Some(serde_json::from_value(data)?))
}

/// Load the additional description, from a local file or an http(s) URL.
async fn load_job_description_file(rt: &Runtime) -> Option<String> {
    let location = rt.config.job_description_file.as_deref()?;

    let content = if location.starts_with("http://") || location.starts_with("https://") {
        let response = rt.http.get(location).timeout(DESCRIPTION_TIMEOUT).send().await.and_then(|r| r.error_for_status());
        match response {
            Ok(response) => response.text().await.map_err(anyhow::Error::from),
            Err(err) => Err(err.into()),
        }
    } else {
        tokio::fs::read_to_string(location).await.map_err(anyhow::Error::from)
    };

    match content {
        Ok(content) if !content.trim().is_empty() => Some(content.trim().to_string()),
        Ok(_) => None,
        Err(err) => {
            warn!("Error loading the job description from {}: {}", location, err);
            None
        }
    }
}

/// Describe a job: from the cache, or with the job agent, completed by the additional description.
///
/// Failing to describe the job is not fatal, the analysis can be done without a description.
#[instrument(skip(rt, worker))]
pub async fn describe_job(rt: &Runtime, name: &str, worker: &Worker) -> Option<Job> {
    let cached = match job_from_db(rt, name, worker).await {
        Ok(cached) => cached,
        Err(err) => {
            warn!("{}: invalid cached description: {}", name, err);
            None
        }
    };

    let mut job = match cached {
        Some(job) => Some(job),
        None => match job_from_model(rt, name, worker).await {
            Ok(job) => job,
            Err(err) => {
                error!("{}: couldn't describe the job: {}", name, err);
                worker.emit(EventKind::Error, format!("Couldn't describe job {name}: {err}")).await;
                None
            }
        },
    };

    if let Some(additional) = load_job_description_file(rt).await {
        if let Some(location) = &rt.config.job_description_file {
            worker.progress(format!("Loaded additional job description from {location}")).await;
        }
        match &mut job {
            Some(job) => job.description.push_str(&format!("\n\nAdditional Context:\n{additional}")),
            None => {
                job = Some(Job {
                    description: additional,
                    actions: Vec::new(),
                })
            }
        }
    }

    job
}

async fn rca(rt: &Runtime, workflow: Workflow, build: &str, worker: &Worker) -> Void {
    worker.emit(EventKind::Workflow, workflow.as_str()).await;
    worker.progress("Fetching build errors...").await;
    let errors = rt.logjuicer.get_report(build, Some(worker)).await?;
    worker.progress(format!("Found {} errors in {} log files", errors.error_count(), errors.logfiles.len())).await;

    worker.progress(format!("Describing job {}...", errors.target)).await;
    let job = describe_job(rt, &errors.target, worker).await;
    if let Some(job) = &job {
        worker.emit(EventKind::Job, serde_json::to_value(job)?).await;
    }

    let mut report = match workflow {
        Workflow::Predict => agent::predict::call_agent(&rt.llm, job.as_ref(), &errors, worker).await?,
        Workflow::React => agent::react::call_agent(&rt.llm, job.as_ref(), Arc::new(errors), worker).await?,
    };

    match agent::related::call_agent(&rt.llm, &rt.searchers, &report.possible_root_causes, worker).await {
        Ok(related) => {
            report.jira_tickets = related.jira_tickets;
            report.slack_threads = related.slack_threads;
        }
        Err(err) => {
            error!("{}: related search failed: {}", build, err);
            worker.emit(EventKind::Error, format!("Couldn't search related issues: {err}")).await;
        }
    }

    worker.emit(EventKind::Report, serde_json::to_value(&report)?).await;

    Ok(())
}

/// Analyze a build with a single call of the predict agent.
#[instrument(skip(rt, worker))]
pub async fn rca_predict(rt: &Runtime, build: &str, worker: &Worker) -> Void {
    rca(rt, Workflow::Predict, build, worker).await
}

/// Analyze a build with the react agent.
#[instrument(skip(rt, worker))]
pub async fn rca_react(rt: &Runtime, build: &str, worker: &Worker) -> Void {
    rca(rt, Workflow::React, build, worker).await
}

/// Run a workflow by name.
pub async fn run_workflow(rt: &Runtime, workflow: Workflow, build: &str, worker: &Worker) -> Void {
    match workflow {
        Workflow::Predict => rca_predict(rt, build, worker).await,
        Workflow::React => rca_react(rt, build, worker).await,
    }
}

/// The events worth keeping once a job is done.
fn stored_events(history: Vec<Event>) -> Vec<Event> {
    history.into_iter().filter(|event| event.kind() != EventKind::Progress).collect()
}

// Jobs.

/// Analyze a build, and store the resulting events.
pub struct RcaJob {
    pub runtime: Runtime,
    pub workflow: Workflow,
    pub build: String,
}

impl RcaJob {
    pub fn key(workflow: Workflow, build: &str) -> String {
        format!("{workflow}-{build}")
    }
}

#[async_trait]
impl worker::Job for RcaJob {
    fn job_key(&self) -> String {
        Self::key(self.workflow, &self.build)
    }

    async fn run(&self, worker: &Worker) {
        match run_workflow(&self.runtime, self.workflow, &self.build, worker).await {
            Ok(()) => worker.emit(EventKind::Status, "completed").await,
            Err(err) => {
                error!("{}: analysis failed: {:#}", self.build, err);
                worker.emit(EventKind::Status, format!("Analysis failed: {err}")).await;
            }
        }

        let events = stored_events(worker.history().await);
        if let Err(err) = self.runtime.db.set_report(self.workflow.as_str(), &self.build, &events).await {
            error!("{}: couldn't store the report: {}", self.build, err);
        }
    }
}

/// Describe a job, and store the resulting events.
pub struct JobDescriptionJob {
    pub runtime: Runtime,
    pub name: String,
}

#[async_trait]
impl worker::Job for JobDescriptionJob {
    fn job_key(&self) -> String {
        self.name.clone()
    }

    async fn run(&self, worker: &Worker) {
        match job_from_model(&self.runtime, &self.name, worker).await {
            Ok(Some(job)) => match serde_json::to_value(&job) {
                Ok(value) => worker.emit(EventKind::Job, value).await,
                Err(err) => error!("{}: {}", self.name, err),
            },
            Ok(None) => info!("{}: no description", self.name),
            Err(err) => {
                error!("{}: description failed: {:#}", self.name, err);
                worker.emit(EventKind::Status, format!("Analysis failed: {err}")).await;
            }
        }

        let events = stored_events(worker.history().await);
        if let Err(err) = self.runtime.db.set_job(&self.name, &events).await {
            error!("{}: couldn't store the description: {}", self.name, err);
        }
    }
}

// Submission.

/// Get the stored events of an analysis, submitting it when unknown.
///
/// Returns `None` while the analysis is pending.
pub async fn get_or_submit_rca(rt: &Runtime, workflow: Workflow, build: &str) -> Res<Option<Vec<Event>>> {
    let key = RcaJob::key(workflow, build);
    if rt.pool.is_pending(&key).await {
        return Ok(None);
    }

    if let Some(events) = rt.db.get_report(workflow.as_str(), build).await? {
        return Ok(Some(events));
    }

    let job = || RcaJob {
        runtime: rt.clone(),
        workflow,
        build: build.to_string(),
    };
    let mut status = rt.pool.submit(job()).await;
    if status == JobStatus::Completed {
        // The events were lost, run it again.
        warn!("{}: completed without events, submitting again", key);
        rt.pool.forget(&key).await;
        status = rt.pool.submit(job()).await;
    }
    ensure_submitted(status)?;

    Ok(None)
}

/// Get the stored events of a job description, submitting it when unknown.
///
/// Returns `None` while the description is pending.
pub async fn get_or_submit_job(rt: &Runtime, name: &str) -> Res<Option<Vec<Event>>> {
    if rt.pool.is_pending(name).await {
        return Ok(None);
    }

    if let Some(events) = rt.db.get_job(name).await? {
        return Ok(Some(events));
    }

    let job = || JobDescriptionJob {
        runtime: rt.clone(),
        name: name.to_string(),
    };
    let mut status = rt.pool.submit(job()).await;
    if status == JobStatus::Completed {
        // The description expired.
        rt.pool.forget(name).await;
        status = rt.pool.submit(job()).await;
    }
    ensure_submitted(status)?;

    Ok(None)
}

fn ensure_submitted(status: JobStatus) -> Void {
    match status {
        JobStatus::Stopped => Err(anyhow::anyhow!("The worker pool is stopped")),
        JobStatus::Pending | JobStatus::Completed => Ok(()),
    }
}

// Tests.
