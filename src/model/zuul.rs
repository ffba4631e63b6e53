//! Knowledge about the Zuul jobs, read from the weeder export.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::base::types::Res;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub parent: Option<String>,
    /// The definition file, relative to the project.
    pub path: String,
    pub project: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub branch: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub url: String,
    /// One of `GitlabUrl`, `GithubUrl`, `GerritUrl` or `GitUrl`.
    pub kind: String,
}

const OPENDEV_GERRIT: &str = "https://review.opendev.org";
const OPENDEV_GIT: &str = "https://opendev.org";

impl ProviderInfo {
    /// The web URL of a file.
    pub fn http_url(&self, project: &str, branch: &str, path: &str) -> Option<String> {
        let opendev = || format!("{OPENDEV_GIT}/{project}/src/branch/{branch}/{path}");

        match self.kind.as_str() {
            "GitlabUrl" => Some(format!("{}/{project}/-/blob/{branch}/{path}", self.url)),
            "GithubUrl" => Some(format!("{}/{project}/blob/{branch}/{path}", self.url)),
            "GerritUrl" if self.url == OPENDEV_GERRIT => Some(opendev()),
            "GerritUrl" => Some(format!("{}/cgit/{project}/tree/{path}?h={branch}", strip_gerrit_prefix(&self.url))),
            "GitUrl" if self.url == OPENDEV_GIT => Some(opendev()),
            "GitUrl" => None,
            _ => {
                warn!("Unknown provider: {:?}", self);
                None
            }
        }
    }

    /// The clone URL of a project.
    pub fn git_url(&self, project: &str) -> Option<String> {
        match self.kind.as_str() {
            "GitlabUrl" | "GithubUrl" | "GerritUrl" => {
                let host = strip_gerrit_prefix(&self.url);
                let host = host.trim_start_matches("https://").trim_start_matches("http://").trim_end_matches('/');
                Some(format!("git@{host}:{project}.git"))
            }
            "GitUrl" => Some(format!("{}/{project}", self.url.trim_end_matches('/'))),
            _ => {
                warn!("Unknown provider: {:?}", self);
                None
            }
        }
    }
}

/// Gerrit is often served under `/r`.
fn strip_gerrit_prefix(url: &str) -> &str {
    let url = url.trim_end_matches('/');
    url.strip_suffix("/r").unwrap_or(url)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZuulInfo {
    pub jobs: HashMap<String, JobInfo>,
    pub projects: HashMap<String, ProjectInfo>,
    pub providers: HashMap<String, ProviderInfo>,
}

impl ZuulInfo {
    /// Read the weeder export, keeping the variant defined on the main branch of each job.
    pub fn from_weeder_export(export: &Value) -> Res<Self> {
        let jobs = export["jobs"].as_object().ok_or_else(|| anyhow::anyhow!("Invalid weeder export: missing `jobs`."))?;

        let mut result = Self::default();

        for (job, variants) in jobs {
            let main = variants.as_array().and_then(|variants| {
                variants.iter().find(|v| matches!(v.pointer("/0/branch").and_then(Value::as_str), Some("main" | "master")))
            });
            let Some(variant) = main else {
                continue;
            };

            let (loc, info) = (&variant[0], &variant[1]);
            let (Some(project_name), Some(provider), Some(branch), Some(path)) = (
                loc.pointer("/project/project").and_then(Value::as_str),
                loc.pointer("/project/provider").and_then(Value::as_str),
                loc["branch"].as_str(),
                loc["path"].as_str(),
            ) else {
                warn!("Skipping job `{}` with an incomplete location.", job);
                continue;
            };

            if !result.projects.contains_key(project_name) {
                result.projects.insert(
                    project_name.to_string(),
                    ProjectInfo {
                        name: project_name.to_string(),
                        branch: branch.to_string(),
                        provider: provider.to_string(),
                    },
                );
                result.providers.entry(provider.to_string()).or_insert_with(|| ProviderInfo {
                    name: provider.to_string(),
                    url: loc.pointer("/url/contents").and_then(Value::as_str).unwrap_or_default().trim_end_matches('/').to_string(),
                    kind: loc.pointer("/url/tag").and_then(Value::as_str).unwrap_or_default().to_string(),
                });
            }

            result.jobs.insert(
                job.clone(),
                JobInfo {
                    name: job.clone(),
                    parent: info["parent"].as_str().map(str::to_string),
                    path: path.to_string(),
                    project: project_name.to_string(),
                },
            );
        }

        Ok(result)
    }

    /// The web URL of a job definition (or of another file in the job project).
    pub fn job_url(&self, job_name: &str, path: Option<&str>) -> Option<String> {
        let job = self.jobs.get(job_name)?;
        let project = self.projects.get(&job.project)?;
        let provider = self.providers.get(&project.provider)?;

        provider.http_url(&job.project, &project.branch, path.unwrap_or(&job.path))
    }

    /// The clone URL of a project.
    pub fn project_git(&self, project_name: &str) -> Option<String> {
        let project = self.projects.get(project_name)?;
        self.providers.get(&project.provider)?.git_url(project_name)
    }

    /// The job followed by its known parents.
    pub fn job_chain(&self, job_name: &str) -> Vec<&JobInfo> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.jobs.get(job_name);

        while let Some(job) = current {
            if !seen.insert(job.name.as_str()) {
                break;
            }
            chain.push(job);
            current = job.parent.as_deref().and_then(|p| self.jobs.get(p));
        }

        chain
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn sample_weeder_export() -> Value {
        json!({
            "jobs": {
                "podified-deploy": [
                    [{"branch": "stable", "path": "zuul.d/old.yaml", "project": {"project": "ci/config", "provider": "gitlab"}, "url": {"contents": "https://gitlab.local/", "tag": "GitlabUrl"}}, {"parent": "base"}],
                    [{"branch": "main", "path": "zuul.d/jobs.yaml", "project": {"project": "ci/config", "provider": "gitlab"}, "url": {"contents": "https://gitlab.local/", "tag": "GitlabUrl"}}, {"parent": "base"}]
                ],
                "base": [
                    [{"branch": "master", "path": "zuul.d/base.yaml", "project": {"project": "zuul/base-jobs", "provider": "opendev"}, "url": {"contents": "https://review.opendev.org", "tag": "GerritUrl"}}, {}]
                ],
                "feature-only": [
                    [{"branch": "feature", "path": "zuul.yaml", "project": {"project": "x", "provider": "gitlab"}, "url": {"contents": "https://gitlab.local", "tag": "GitlabUrl"}}, {}]
                ]
            }
        })
    }

    #[test]
    fn test_read_weeder_export() {
        let info = ZuulInfo::from_weeder_export(&sample_weeder_export()).unwrap();

        assert_eq!(info.jobs.len(), 2);
        assert!(!info.jobs.contains_key("feature-only"));

        let job = &info.jobs["podified-deploy"];
        assert_eq!(job.path, "zuul.d/jobs.yaml");
        assert_eq!(job.parent.as_deref(), Some("base"));
        assert_eq!(info.providers["gitlab"].url, "https://gitlab.local");
    }

    #[test]
    fn test_job_url() {
        let info = ZuulInfo::from_weeder_export(&sample_weeder_export()).unwrap();

        assert_eq!(info.job_url("podified-deploy", None).as_deref(), Some("https://gitlab.local/ci/config/-/blob/main/zuul.d/jobs.yaml"));
        assert_eq!(
            info.job_url("base", None).as_deref(),
            Some("https://opendev.org/zuul/base-jobs/src/branch/master/zuul.d/base.yaml")
        );
        assert_eq!(info.job_url("missing", None), None);
    }

    #[test]
    fn test_provider_urls() {
        let gerrit = ProviderInfo {
            name: "internal".to_string(),
            url: "https://review.example.com/r".to_string(),
            kind: "GerritUrl".to_string(),
        };
        assert_eq!(
            gerrit.http_url("ci/jobs", "main", "zuul.yaml").as_deref(),
            Some("https://review.example.com/cgit/ci/jobs/tree/zuul.yaml?h=main")
        );
        assert_eq!(gerrit.git_url("ci/jobs").as_deref(), Some("git@review.example.com:ci/jobs.git"));

        let git = ProviderInfo {
            name: "plain".to_string(),
            url: "https://git.example.com/".to_string(),
            kind: "GitUrl".to_string(),
        };
        assert_eq!(git.http_url("p", "main", "f"), None);
        assert_eq!(git.git_url("p").as_deref(), Some("https://git.example.com/p"));

        let unknown = ProviderInfo {
            name: "svn".to_string(),
            url: "https://svn".to_string(),
            kind: "SvnUrl".to_string(),
        };
        assert_eq!(unknown.git_url("p"), None);
    }

    #[test]
    fn test_job_chain_stops_on_cycles() {
        let mut info = ZuulInfo::from_weeder_export(&sample_weeder_export()).unwrap();

        let chain: Vec<_> = info.job_chain("podified-deploy").iter().map(|j| j.name.clone()).collect();
        assert_eq!(chain, vec!["podified-deploy", "base"]);

        info.jobs.get_mut("base").unwrap().parent = Some("podified-deploy".to_string());
        assert_eq!(info.job_chain("base").len(), 2);
        assert!(info.job_chain("missing").is_empty());
    }
}
