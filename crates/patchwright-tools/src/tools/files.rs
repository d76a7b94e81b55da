//! File tools — read, write, create, delete inside the sandbox workspace

use crate::registry::{Tool, ToolResult};
use patchwright_sandbox::{Sandbox, SandboxProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const UTILITY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReadFileTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

impl ReadFileTool {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox: Arc<Sandbox>) -> Self {
        Self { provider, sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the repository. Use relative paths from repo root."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative file path"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let path = match args["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: path"),
        };
        debug!("read_file: {}", path);
        match self.provider.read_file(&self.sandbox, path).await {
            Ok(content) => ToolResult::text(content),
            Err(e) => ToolResult::error(e),
        }
    }
}

pub struct WriteFileTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

impl WriteFileTool {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox: Arc<Sandbox>) -> Self {
        Self { provider, sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write/overwrite a file in the workspace."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let (path, content) = match (args["path"].as_str(), args["content"].as_str()) {
            (Some(p), Some(c)) => (p, c),
            _ => return ToolResult::error("Missing required parameters: path, content"),
        };
        debug!("write_file: {} ({} chars)", path, content.len());
        match self.provider.write_file(&self.sandbox, path, content).await {
            Ok(()) => ToolResult::text(format!("Wrote {} chars to {}", content.len(), path)),
            Err(e) => ToolResult::error(e),
        }
    }
}

pub struct CreateFileTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

impl CreateFileTool {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox: Arc<Sandbox>) -> Self {
        Self { provider, sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file. Parent directories created automatically."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let (path, content) = match (args["path"].as_str(), args["content"].as_str()) {
            (Some(p), Some(c)) => (p, c),
            _ => return ToolResult::error("Missing required parameters: path, content"),
        };
        match self.provider.write_file(&self.sandbox, path, content).await {
            Ok(()) => ToolResult::text(format!("Created {} ({} chars)", path, content.len())),
            Err(e) => ToolResult::error(e),
        }
    }
}

pub struct DeleteFileTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

impl DeleteFileTool {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox: Arc<Sandbox>) -> Self {
        Self { provider, sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the workspace."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let path = match args["path"].as_str() {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: path"),
        };

        // Validate before touching anything; the removal itself goes through
        // the backend so both sandboxes behave the same.
        if let Err(e) = patchwright_sandbox::resolve_lexical(&self.sandbox.workspace, path) {
            return ToolResult::error(e);
        }

        let quoted = format!("'{}'", path.replace('\'', r"'\''"));
        let script = format!(
            "if [ -e {q} ]; then rm -f {q} && echo deleted; else echo missing; fi",
            q = quoted
        );
        match self
            .provider
            .run_command(&self.sandbox, &script, UTILITY_TIMEOUT)
            .await
        {
            Ok(output) if output.stdout.trim() == "deleted" => {
                ToolResult::text(format!("Deleted {}", path))
            }
            Ok(output) if output.stdout.trim() == "missing" => {
                ToolResult::text(format!("{} not found", path))
            }
            Ok(output) => ToolResult::error(format!("delete failed: {}", output.stderr.trim())),
            Err(e) => ToolResult::error(e),
        }
    }
}
