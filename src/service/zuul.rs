//! Access to the Zuul configuration: the weeder export and the job definitions.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::{
    base::types::Res,
    model::zuul::ZuulInfo,
    service::{git::GitWorkspace, sf::SfClient},
};

/// Fetch the raw weeder export.
#[instrument(skip_all)]
pub async fn fetch_export(sf: &SfClient) -> Res<Value> {
    let export = sf.get("weeder/export").send().await?.error_for_status()?.json().await?;
    Ok(export)
}

/// The parsed weeder export, refreshed once expired.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ZuulInfoCache {
    sf: SfClient,
    ttl: Duration,
    state: Arc<RwLock<Option<(Instant, Arc<ZuulInfo>)>>>,
}

impl ZuulInfoCache {
    pub fn new(sf: SfClient, ttl: Duration) -> Self {
        Self {
            sf,
            ttl,
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// The current info, fetching the export when missing or expired.
    pub async fn get(&self) -> Res<Arc<ZuulInfo>> {
        if let Some((loaded, info)) = &*self.state.read().await
            && loaded.elapsed() < self.ttl
        {
            return Ok(info.clone());
        }

        let mut state = self.state.write().await;

        // Another task may have refreshed the info while waiting for the lock.
        if let Some((loaded, info)) = &*state
            && loaded.elapsed() < self.ttl
        {
            return Ok(info.clone());
        }

        info!("Fetching the weeder export");
        let info = Arc::new(ZuulInfo::from_weeder_export(&fetch_export(&self.sf).await?)?);
        *state = Some((Instant::now(), info.clone()));

        Ok(info)
    }
}

/// The definition files of a job and of its parents, relative to the workspace.
///
/// The repositories are cloned when needed.
#[instrument(skip(workspace, info))]
pub async fn job_playbooks(workspace: &GitWorkspace, info: &ZuulInfo, job_name: &str) -> Res<Vec<String>> {
    let mut result = Vec::new();

    for job in info.job_chain(job_name) {
        let Some(url) = info.project_git(&job.project) else {
            warn!("{}: unknown git url for project `{}`", job.name, job.project);
            continue;
        };

        let repo = match workspace.ensure_repo(&url, false).await {
            Ok(repo) => repo,
            Err(err) => {
                warn!("{}: couldn't get the project `{}`: {}", job.name, job.project, err);
                continue;
            }
        };

        let path = repo.join(&job.path);
        if !path.exists() {
            warn!("{}: missing definition file {}", job.name, path.display());
            continue;
        }

        if let Ok(relative) = path.strip_prefix(workspace.root()) {
            let relative = relative.to_string_lossy().to_string();
            if !result.contains(&relative) {
                result.push(relative);
            }
        }
    }

    Ok(result)
}
