//! Local sandbox backend — temp directory plus child processes

use crate::path::resolve_workspace_path;
use crate::provider::{
    redact_token, tokenized_clone_url, CommandOutput, Sandbox, SandboxError, SandboxProvider,
    SandboxResult,
};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

const DIR_LISTING_CAP: usize = 50;

/// Runs everything in a temp directory on the host. Commands are children of
/// this process inheriting its environment, overlaid with the sandbox env map.
#[derive(Default)]
pub struct LocalSandbox;

impl LocalSandbox {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl SandboxProvider for LocalSandbox {
    async fn create(&self, repo_url: &str, token: Option<&str>) -> SandboxResult<Sandbox> {
        let root = tempfile::Builder::new()
            .prefix("patchwright_")
            .tempdir()?
            .keep();
        let clone_url = tokenized_clone_url(repo_url, token);

        let output = Command::new("git")
            .args(["clone", "--depth", "1"])
            .arg(&clone_url)
            .arg(root.join("repo"))
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                let _ = fs::remove_dir_all(&root).await;
                return Err(SandboxError::CloneFailed(e.to_string()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = fs::remove_dir_all(&root).await;
            return Err(SandboxError::CloneFailed(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                redact_token(stderr.trim(), token)
            )));
        }

        debug!("cloned {} into {}", repo_url, root.display());
        Ok(Sandbox::new(root.join("repo")))
    }

    async fn run_command(
        &self,
        sandbox: &Sandbox,
        cmd: &str,
        timeout: Duration,
    ) -> SandboxResult<CommandOutput> {
        debug!("run: {}", &cmd[..cmd.len().min(120)]);

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(cmd)
            .current_dir(&sandbox.workspace)
            .envs(&sandbox.env)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Backend(format!("failed to spawn: {}", e)))?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // Drain both pipes while waiting so a chatty child can't fill the
        // pipe buffer and deadlock against wait().
        let waited = tokio::time::timeout(timeout, async {
            let (stdout, stderr, status) = tokio::join!(
                read_pipe(stdout_pipe),
                read_pipe(stderr_pipe),
                child.wait()
            );
            (stdout, stderr, status)
        })
        .await;

        match waited {
            Ok((stdout, stderr, Ok(status))) => Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            }),
            Ok((_, _, Err(e))) => Err(SandboxError::Backend(format!("wait failed: {}", e))),
            Err(_) => {
                let _ = child.kill().await;
                Ok(CommandOutput::timed_out())
            }
        }
    }

    async fn read_file(&self, sandbox: &Sandbox, path: &str) -> SandboxResult<String> {
        let target = resolve_workspace_path(&sandbox.workspace, path)?;

        let metadata = match fs::metadata(&target).await {
            Ok(m) => m,
            Err(_) => return Err(SandboxError::NotFound(path.to_string())),
        };

        if metadata.is_dir() {
            let listing = directory_listing(&sandbox.workspace, &target).await?;
            return Err(SandboxError::IsADirectory {
                path: path.to_string(),
                listing: listing[..listing.len().min(DIR_LISTING_CAP)].join("\n"),
            });
        }

        let bytes = fs::read(&target).await?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => Ok(format!("[binary file, {} bytes]", e.as_bytes().len())),
        }
    }

    async fn write_file(&self, sandbox: &Sandbox, path: &str, content: &str) -> SandboxResult<()> {
        let target = resolve_workspace_path(&sandbox.workspace, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, content).await?;
        Ok(())
    }

    async fn list_dir(&self, sandbox: &Sandbox, path: &str) -> SandboxResult<Vec<String>> {
        let target = resolve_workspace_path(&sandbox.workspace, path)?;
        if !target.exists() {
            return Err(SandboxError::NotFound(path.to_string()));
        }
        directory_listing(&sandbox.workspace, &target).await
    }

    async fn destroy(&self, sandbox: &Sandbox) -> SandboxResult<()> {
        // The repo is cloned one level below the temp root; remove the root.
        let root = if sandbox.workspace.ends_with("repo") {
            sandbox
                .workspace
                .parent()
                .unwrap_or(&sandbox.workspace)
                .to_path_buf()
        } else {
            sandbox.workspace.clone()
        };
        if let Err(e) = fs::remove_dir_all(&root).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove workspace {}: {}", root.display(), e);
            }
        }
        Ok(())
    }
}

/// Entries relative to the workspace root, directories marked with a
/// trailing separator, lexicographic order.
async fn directory_listing(workspace: &Path, target: &Path) -> SandboxResult<Vec<String>> {
    let mut entries = Vec::new();
    let mut dir = fs::read_dir(target).await?;
    while let Some(entry) = dir.next_entry().await? {
        let rel = entry
            .path()
            .strip_prefix(workspace)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| entry.file_name().to_string_lossy().to_string());
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(if is_dir { format!("{}/", rel) } else { rel });
    }
    entries.sort();
    Ok(entries)
}

async fn read_pipe(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    use tokio::io::AsyncReadExt;
    match pipe {
        Some(mut pipe) => {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        }
        None => String::new(),
    }
}
