//! List-directory tool

use crate::registry::{Tool, ToolResult};
use patchwright_sandbox::{Sandbox, SandboxProvider};
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ListDirectoryTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

impl ListDirectoryTool {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox: Arc<Sandbox>) -> Self {
        Self { provider, sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and subdirectories. Use '.' for root."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "default": "."}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let path = args["path"].as_str().unwrap_or(".");
        match self.provider.list_dir(&self.sandbox, path).await {
            Ok(entries) => ToolResult::text(entries.join("\n")),
            Err(e) => ToolResult::error(e),
        }
    }
}
