//! Description of a Zuul job from its playbooks.

use std::path::{Component, Path, PathBuf};

use serde_json::json;
use tracing::instrument;

use super::{emit_usage, extract_json};
use crate::{
    base::{prompts::JOB_AGENT_SYSTEM_DIRECTIVE, types::Res},
    model::Job,
    service::llm::{AgentRequest, BoxedToolHandler, LlmClient, ModelChoice, ToolCall, ToolSpec},
    worker::Worker,
};

/// Files are truncated to this size.
const MAX_FILE_SIZE: usize = 64 * 1024;

const JOB_FORMAT: &str = r#"Answer with a single JSON object, without any other text:

```json
{"description": "<what the job does>", "actions": ["<first action>", "<second action>"]}
```"#;

fn tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(
            "read_file",
            "Read a file content.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "The file path, relative to the workspace."}},
                "required": ["path"]
            }),
        ),
        ToolSpec::new(
            "list_files",
            "List the content of a directory, sub directories end with a `/`.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "The directory path, relative to the workspace."}},
                "required": ["path"]
            }),
        ),
    ]
}

/// Resolve a path of the model, which must stay within the workspace.
fn resolve(root: &Path, path: &str) -> Res<PathBuf> {
    let relative = Path::new(path.trim_start_matches("./"));

    if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
        return Err(anyhow::anyhow!("{path}: only paths relative to the workspace are allowed."));
    }

    Ok(root.join(relative))
}

async fn handle_tool(root: &Path, worker: &Worker, call: ToolCall) -> Res<String> {
    let path = call.arg_str("path")?;
    let resolved = resolve(root, path)?;

    match call.name.as_str() {
        "read_file" => {
            worker.progress(format!("Reading file {path}")).await;

            let mut content = tokio::fs::read_to_string(&resolved).await.map_err(|e| anyhow::anyhow!("{path}: read error {e}"))?;
            if content.len() > MAX_FILE_SIZE {
                let mut end = MAX_FILE_SIZE;
                while !content.is_char_boundary(end) {
                    end -= 1;
                }
                content.truncate(end);
                content.push_str("\n[truncated]");
            }

            Ok(content)
        }
        "list_files" => {
            worker.progress(format!("Listing {path}")).await;

            let mut entries = tokio::fs::read_dir(&resolved).await.map_err(|e| anyhow::anyhow!("{path}: list error {e}"))?;
            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    names.push(format!("{name}/"));
                } else {
                    names.push(name);
                }
            }
            names.sort();

            Ok(names.join("\n"))
        }
        other => Err(anyhow::anyhow!("Unknown tool `{other}`.")),
    }
}

/// Describe a job, given the paths of its definition files relative to `root`.
#[instrument(skip(llm, root, worker))]
pub async fn call_agent(llm: &LlmClient, root: &Path, playbooks: &[String], worker: &Worker) -> Res<Job> {
    worker.progress("Calling JobAgent").await;

    let mut request = AgentRequest::new("job", ModelChoice::Fast, JOB_AGENT_SYSTEM_DIRECTIVE)
        .input("Job definition files", playbooks.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n"))
        .input("Output format", JOB_FORMAT)
        .json();
    for tool in tools() {
        request = request.tool(tool);
    }

    let handler: BoxedToolHandler = {
        let root = root.to_path_buf();
        let worker = worker.clone();
        Box::new(move |call| {
            let root = root.clone();
            let worker = worker.clone();
            Box::pin(async move { handle_tool(&root, &worker, call).await })
        })
    };

    let response = llm.run_agent(request, handler).await?;
    emit_usage(worker, &response.usage).await;

    extract_json(&response.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tests::{ScriptedLlm, Step};

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("gitlab.local/ci/config");
        std::fs::create_dir_all(repo.join("playbooks")).unwrap();
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::write(repo.join("zuul.yaml"), "- job:\n    name: deploy\n    run: playbooks/deploy.yaml\n").unwrap();
        std::fs::write(repo.join("playbooks/deploy.yaml"), "- hosts: all\n  roles: [deploy]\n").unwrap();
        dir
    }

    #[test]
    fn test_resolve_stays_in_workspace() {
        let root = Path::new("/ws");

        assert_eq!(resolve(root, "gitlab.local/ci/zuul.yaml").unwrap(), PathBuf::from("/ws/gitlab.local/ci/zuul.yaml"));
        assert_eq!(resolve(root, "./a/b").unwrap(), PathBuf::from("/ws/a/b"));
        assert!(resolve(root, "/etc/passwd").is_err());
        assert!(resolve(root, "a/../../etc").is_err());
    }

    #[tokio::test]
    async fn test_job_agent_reads_the_playbooks() {
        let dir = workspace();
        let llm = ScriptedLlm::new(vec![
            Step::Tools(vec![
                ("read_file", json!({"path": "gitlab.local/ci/config/zuul.yaml"})),
                ("list_files", json!({"path": "gitlab.local/ci/config"})),
                ("read_file", json!({"path": "../outside"})),
            ]),
            Step::Answer(r#"{"description": "Deploys the cloud.", "actions": ["deploy"]}"#.to_string()),
        ]);
        let worker = Worker::new();

        let job = call_agent(&llm.client(), dir.path(), &["gitlab.local/ci/config/zuul.yaml".to_string()], &worker).await.unwrap();

        assert_eq!(
            job,
            Job {
                description: "Deploys the cloud.".to_string(),
                actions: vec!["deploy".to_string()],
            }
        );

        let outputs = llm.tool_outputs.lock().unwrap().clone();
        assert!(outputs[0].contains("run: playbooks/deploy.yaml"));
        assert_eq!(outputs[1], "playbooks/\nzuul.yaml");
        assert!(outputs[2].starts_with("Error:"));

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests[0].model, ModelChoice::Fast);
        assert_eq!(requests[0].tools.len(), 2);
    }
}
