//! Local clones of the Zuul configuration repositories.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, instrument};

use crate::base::types::{Res, Void};

/// A directory holding the git clones, one per `<host>/<project>`.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    root: PathBuf,
}

impl GitWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a git url into a local path.
    pub fn url_to_path(&self, url: &str) -> Res<PathBuf> {
        // Scp-like syntax, e.g. `git@gitlab.local:my/project`.
        let normalized = match url.split_once("://") {
            Some(_) => url.to_string(),
            None => match url.split_once(':') {
                Some((host, path)) => format!("ssh://{host}/{path}"),
                None => return Err(anyhow::anyhow!("{url}: invalid git url")),
            },
        };

        let parsed = url::Url::parse(&normalized).map_err(|e| anyhow::anyhow!("{url}: invalid git url: {e}"))?;
        // Local repositories have no host.
        let host = match parsed.host_str().filter(|h| !h.is_empty()) {
            Some(host) => host,
            None if parsed.scheme() == "file" => "localhost",
            None => return Err(anyhow::anyhow!("{url}: invalid git url: missing host")),
        };
        let path = parsed.path().trim_start_matches('/').trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);

        if path.is_empty() || path.split('/').any(|part| part == "..") {
            return Err(anyhow::anyhow!("{url}: invalid git url: bad path"));
        }

        Ok(self.root.join(host).join(path))
    }

    /// Clone the repository when missing, otherwise optionally update it.
    #[instrument(skip(self))]
    pub async fn ensure_repo(&self, url: &str, update: bool) -> Res<PathBuf> {
        let path = self.url_to_path(url)?;

        if path.join(".git").exists() {
            if update {
                info!("Updating {} ...", path.display());
                run_check(&["git", "fetch"], Some(&path)).await?;
                run_check(&["git", "reset", "--hard", "FETCH_HEAD"], Some(&path)).await?;
            }
        } else {
            info!("Cloning {} ...", path.display());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let target = path.to_string_lossy().to_string();
            run_check(&["git", "clone", "--depth", "1", url, &target], None).await?;
        }

        Ok(path)
    }
}

/// Run a command, failing on a non zero exit code.
async fn run_check(args: &[&str], cwd: Option<&Path>) -> Void {
    let (program, rest) = args.split_first().ok_or_else(|| anyhow::anyhow!("Empty command"))?;

    let mut command = Command::new(program);
    command.args(rest).kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let status = command.status().await?;
    if !status.success() {
        return Err(anyhow::anyhow!("Command failed: {}", args.join(" ")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_to_path() {
        let ws = GitWorkspace::new("/cache/gits");

        assert_eq!(ws.url_to_path("git@gitlab.local:my/project").unwrap(), PathBuf::from("/cache/gits/gitlab.local/my/project"));
        assert_eq!(ws.url_to_path("https://gitlab.local/my/project").unwrap(), PathBuf::from("/cache/gits/gitlab.local/my/project"));
        assert_eq!(ws.url_to_path("git@gitlab.local:my/project.git").unwrap(), PathBuf::from("/cache/gits/gitlab.local/my/project"));
        assert_eq!(ws.url_to_path("file:///srv/git/config.git").unwrap(), PathBuf::from("/cache/gits/localhost/srv/git/config"));
    }

    #[test]
    fn test_invalid_urls() {
        let ws = GitWorkspace::new("/cache/gits");

        assert!(ws.url_to_path("not-a-url").is_err());
        assert!(ws.url_to_path("https://gitlab.local/").is_err());
        assert!(ws.url_to_path("https://gitlab.local/.git").is_err());
    }

    fn git(cwd: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=rca", "-c", "user.email=rca@example.com"])
            .args(args)
            .current_dir(cwd)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn test_ensure_repo_clones_then_updates() {
        let origin = tempfile::tempdir().unwrap();
        git(origin.path(), &["init", "--quiet"]);
        std::fs::write(origin.path().join("jobs.yaml"), "- job: one\n").unwrap();
        git(origin.path(), &["add", "jobs.yaml"]);
        git(origin.path(), &["commit", "--quiet", "-m", "first"]);

        let root = tempfile::tempdir().unwrap();
        let ws = GitWorkspace::new(root.path());
        let url = format!("file://{}", origin.path().display());

        let clone = ws.ensure_repo(&url, false).await.unwrap();
        assert!(clone.starts_with(root.path().join("localhost")));
        assert_eq!(std::fs::read_to_string(clone.join("jobs.yaml")).unwrap(), "- job: one\n");

        std::fs::write(origin.path().join("jobs.yaml"), "- job: two\n").unwrap();
        git(origin.path(), &["commit", "--quiet", "-am", "second"]);

        // Without update the checkout is kept as is.
        assert_eq!(ws.ensure_repo(&url, false).await.unwrap(), clone);
        assert_eq!(std::fs::read_to_string(clone.join("jobs.yaml")).unwrap(), "- job: one\n");

        ws.ensure_repo(&url, true).await.unwrap();
        assert_eq!(std::fs::read_to_string(clone.join("jobs.yaml")).unwrap(), "- job: two\n");
    }

    #[tokio::test]
    async fn test_run_check_reports_failures() {
        assert!(run_check(&["true"], None).await.is_ok());
        assert!(run_check(&["false"], None).await.is_err());
        assert!(run_check(&[], None).await.is_err());
    }
}
