//! Container sandbox backend — ephemeral docker container, remote exec
//!
//! The image is expected to ship git, python3, and a headless chromium
//! toolchain. Every operation resolves paths locally first so the escape
//! semantics match the local backend exactly.

use crate::path::resolve_lexical;
use crate::provider::{
    redact_token, tokenized_clone_url, CommandOutput, Sandbox, SandboxError, SandboxProvider,
    SandboxResult,
};
use base64::Engine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const CONTAINER_WORKSPACE: &str = "/repo";
const DIR_LISTING_CAP: usize = 50;

pub struct ContainerSandbox {
    image: String,
    docker_host: Option<String>,
}

impl ContainerSandbox {
    pub fn new(image: impl Into<String>, docker_host: Option<String>) -> Self {
        Self {
            image: image.into(),
            docker_host,
        }
    }

    fn docker(&self) -> Command {
        let mut cmd = Command::new("docker");
        if let Some(host) = &self.docker_host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }

    /// Run `bash -c script` inside the container with the sandbox env
    /// overlaid, bounded by `timeout`.
    async fn exec(
        &self,
        sandbox: &Sandbox,
        script: &str,
        timeout: Duration,
    ) -> SandboxResult<CommandOutput> {
        let container = sandbox
            .handle
            .as_deref()
            .ok_or_else(|| SandboxError::Backend("container handle missing".to_string()))?;

        let mut cmd = self.docker();
        cmd.arg("exec");
        cmd.arg("-w").arg(&sandbox.workspace);
        for (key, value) in &sandbox.env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        cmd.arg(container).arg("bash").arg("-c").arg(script);
        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::Backend(format!("failed to spawn docker exec: {}", e)))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(SandboxError::Backend(format!("docker exec failed: {}", e))),
            Err(_) => Ok(CommandOutput::timed_out()),
        }
    }
}

#[async_trait::async_trait]
impl SandboxProvider for ContainerSandbox {
    async fn create(&self, repo_url: &str, token: Option<&str>) -> SandboxResult<Sandbox> {
        let output = self
            .docker()
            .args(["run", "-d"])
            .arg(&self.image)
            .args(["sleep", "infinity"])
            .output()
            .await
            .map_err(|e| SandboxError::Backend(format!("docker run failed: {}", e)))?;

        if !output.status.success() {
            return Err(SandboxError::Backend(format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let container = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("provisioned container {} from {}", container, self.image);

        let clone_url = tokenized_clone_url(repo_url, token);
        let mut sandbox = Sandbox::new(PathBuf::from(CONTAINER_WORKSPACE));
        sandbox.handle = Some(container.clone());

        // Clone from the container root; the workspace doesn't exist yet so
        // exec with -w would fail.
        let clone = self
            .docker()
            .arg("exec")
            .arg(&container)
            .args(["git", "clone", "--depth", "1"])
            .arg(&clone_url)
            .arg(CONTAINER_WORKSPACE)
            .output()
            .await
            .map_err(|e| SandboxError::Backend(format!("docker exec failed: {}", e)))?;

        if !clone.status.success() {
            let stderr = String::from_utf8_lossy(&clone.stderr);
            let _ = self
                .docker()
                .args(["rm", "-f"])
                .arg(&container)
                .output()
                .await;
            return Err(SandboxError::CloneFailed(redact_token(
                stderr.trim(),
                token,
            )));
        }

        Ok(sandbox)
    }

    async fn run_command(
        &self,
        sandbox: &Sandbox,
        cmd: &str,
        timeout: Duration,
    ) -> SandboxResult<CommandOutput> {
        self.exec(sandbox, cmd, timeout).await
    }

    async fn read_file(&self, sandbox: &Sandbox, path: &str) -> SandboxResult<String> {
        let target = resolve_container_path(&sandbox.workspace, path)?;
        let quoted = sh_quote(&target.to_string_lossy());

        let probe = self
            .exec(
                sandbox,
                &format!("test -d {q} && echo dir || (test -e {q} && echo file || echo missing)", q = quoted),
                Duration::from_secs(10),
            )
            .await?;

        match probe.stdout.trim() {
            "missing" => return Err(SandboxError::NotFound(path.to_string())),
            "dir" => {
                let listing = self
                    .exec(
                        sandbox,
                        &format!("LC_ALL=C ls -1p {} | head -{}", quoted, DIR_LISTING_CAP),
                        Duration::from_secs(10),
                    )
                    .await?;
                return Err(SandboxError::IsADirectory {
                    path: path.to_string(),
                    listing: listing.stdout.trim_end().to_string(),
                });
            }
            _ => {}
        }

        // Ship the bytes out base64-encoded so binary content survives the
        // exec transport, then apply the same UTF-8 sentinel as the local
        // backend.
        let encoded = self
            .exec(sandbox, &format!("base64 {}", quoted), Duration::from_secs(30))
            .await?;
        if encoded.exit_code != 0 {
            return Err(SandboxError::Backend(format!(
                "read failed: {}",
                encoded.stderr.trim()
            )));
        }

        let compact: String = encoded
            .stdout
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| SandboxError::Backend(format!("base64 decode failed: {}", e)))?;

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => Ok(format!("[binary file, {} bytes]", e.as_bytes().len())),
        }
    }

    async fn write_file(&self, sandbox: &Sandbox, path: &str, content: &str) -> SandboxResult<()> {
        let target = resolve_container_path(&sandbox.workspace, path)?;
        let quoted = sh_quote(&target.to_string_lossy());
        let parent = target
            .parent()
            .map(|p| sh_quote(&p.to_string_lossy()))
            .unwrap_or_else(|| "/".to_string());

        let encoded = base64::engine::general_purpose::STANDARD.encode(content.as_bytes());
        let script = format!(
            "mkdir -p {} && printf '%s' '{}' | base64 -d > {}",
            parent, encoded, quoted
        );

        let result = self.exec(sandbox, &script, Duration::from_secs(30)).await?;
        if result.exit_code != 0 {
            return Err(SandboxError::Backend(format!(
                "write failed: {}",
                result.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn list_dir(&self, sandbox: &Sandbox, path: &str) -> SandboxResult<Vec<String>> {
        let target = resolve_container_path(&sandbox.workspace, path)?;
        let quoted = sh_quote(&target.to_string_lossy());

        let result = self
            .exec(
                sandbox,
                &format!("LC_ALL=C ls -1p {}", quoted),
                Duration::from_secs(10),
            )
            .await?;
        if result.exit_code != 0 {
            return Err(SandboxError::NotFound(path.to_string()));
        }

        // Match the local backend: entries relative to the workspace root.
        let prefix = target
            .strip_prefix(&sandbox.workspace)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| format!("{}/", p.to_string_lossy()));

        let mut entries: Vec<String> = result
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| match &prefix {
                Some(prefix) => format!("{}{}", prefix, line),
                None => line.to_string(),
            })
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn destroy(&self, sandbox: &Sandbox) -> SandboxResult<()> {
        if let Some(container) = &sandbox.handle {
            let result = self
                .docker()
                .args(["rm", "-f"])
                .arg(container)
                .output()
                .await;
            if let Err(e) = result {
                warn!("failed to remove container {}: {}", container, e);
            }
        }
        Ok(())
    }
}

/// Same escape check as the local backend, applied before any remote exec
/// is issued. The workspace lives inside the container, so only the lexical
/// pass applies here.
fn resolve_container_path(workspace: &Path, path: &str) -> SandboxResult<PathBuf> {
    resolve_lexical(workspace, path)
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
