//! Library root for `rcav2`.
//!
//! RCAv2 performs the root cause analysis of failed Zuul builds with LLMs:
//! - Collects the build errors with LogJuicer
//! - Describes the job from its Zuul definition
//! - Asks an agent for the possible root causes, with their evidences
//! - Searches the related Jira issues and Slack threads
//!
//! The reports are served by an HTTP API for the web interface, and posted
//! on Slack by eodbot. The architecture is built around extensible traits
//! that allow for different implementations of each service.

pub mod agent;
pub mod api;
pub mod base;
pub mod interaction;
pub mod model;
pub mod runtime;
pub mod service;
pub mod worker;
pub mod workflow;

use base::{
    config::Config,
    types::{Event, Res, Void},
};
use rustls::crypto;
use tracing::{debug, info};

use crate::{
    model::{is_build_url, zuul::ZuulInfo},
    service::{sf::SfClient, zuul::fetch_export},
    worker::Worker,
    workflow::Workflow,
};

/// Install the process wide crypto provider.
fn install_crypto_provider() {
    if crypto::ring::default_provider().install_default().is_err() {
        debug!("The crypto provider is already installed");
    }
}

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the rcav2 runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, LLM, and worker pool
/// - Serves the HTTP API, and eodbot when configured
pub async fn start(config: Config) -> Void {
    info!("Starting rcav2 ...");

    // Start the crypto provider.
    install_crypto_provider();

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}

/// Analyze a build without the worker pool, returning the emitted events.
///
/// The events are logged as they come.
pub async fn analyze(config: Config, build: &str, workflow: Workflow) -> Res<Vec<Event>> {
    if !is_build_url(build) {
        return Err(anyhow::anyhow!("`{build}` is not a Zuul build URL."));
    }

    install_crypto_provider();

    let runtime = runtime::Runtime::new(config).await?;
    let worker = Worker::new();

    let mut watcher = worker.add_watcher().await;
    let logger = tokio::spawn(async move {
        while let Some(event) = watcher.recv().await {
            info!("[{}] {}", event.kind(), event.data());
        }
    });

    let result = workflow::run_workflow(&runtime, workflow, build, &worker).await;
    worker.close().await;
    let _ = logger.await;
    runtime.stop().await;

    result?;

    Ok(worker.history().await)
}

/// The definition URLs of a job and of its parents.
pub async fn zuul_urls(config: Config, job_name: &str) -> Res<Vec<(String, String)>> {
    install_crypto_provider();

    let sf = SfClient::new(&config)?;
    let info = ZuulInfo::from_weeder_export(&fetch_export(&sf).await?)?;

    let chain = info.job_chain(job_name);
    if chain.is_empty() {
        return Err(anyhow::anyhow!("Unknown job `{job_name}`."));
    }

    Ok(chain
        .iter()
        .filter_map(|job| info.job_url(&job.name, None).map(|url| (job.name.clone(), url)))
        .collect())
}
