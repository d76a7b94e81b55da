//! Tool trait, result variants, and the per-agent registry

use patchwright_core::ArtifactKind;
use patchwright_llm::{LlmTool, ResultBlock, ToolResultContent};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What a tool handler hands back to the executor: a plain string, a
/// structured value, an ordered multimodal block list, or a recoverable
/// error the decision-maker gets to see.
#[derive(Clone, Debug)]
pub enum ToolResult {
    Text(String),
    Json(Value),
    Media(Vec<ResultBlock>),
    Error(String),
}

impl ToolResult {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn json(v: Value) -> Self {
        Self::Json(v)
    }

    pub fn error(s: impl ToString) -> Self {
        Self::Error(s.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Content placed in the tool-result block of the next user turn.
    pub fn to_result_content(&self) -> ToolResultContent {
        match self {
            Self::Text(s) => ToolResultContent::Text(s.clone()),
            Self::Json(v) => {
                ToolResultContent::Text(serde_json::to_string(v).unwrap_or_default())
            }
            Self::Media(blocks) => ToolResultContent::Blocks(blocks.clone()),
            Self::Error(e) => ToolResultContent::Text(format!("Error: {}", e)),
        }
    }

    /// Short textual form for events and logs.
    pub fn preview(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => serde_json::to_string(v).unwrap_or_default(),
            Self::Media(_) => "[media content]".to_string(),
            Self::Error(e) => format!("Error: {}", e),
        }
    }
}

/// One capability exposed to the decision-maker.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique within the owning agent's registry.
    fn name(&self) -> &str;

    /// Human-readable description sent with the tool schema.
    fn description(&self) -> &str;

    /// JSON Schema for the input object.
    fn input_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> ToolResult;

    /// Execute with cancellation. Default races `execute` against the token;
    /// tools that own child processes should override to kill them.
    async fn execute_cancellable(&self, args: Value, cancel: CancellationToken) -> ToolResult {
        tokio::select! {
            result = self.execute(args) => result,
            _ = cancel.cancelled() => ToolResult::text("[cancelled]"),
        }
    }

    fn to_llm_tool(&self) -> LlmTool {
        LlmTool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Ordered set of tools bound to one agent instance. Registration order is
/// the order the schema is presented in.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub async fn execute_cancellable(
        &self,
        name: &str,
        args: Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute_cancellable(args, cancel).await,
            None => ToolResult::Error(format!("unknown tool '{}'", name)),
        }
    }

    pub fn definitions(&self) -> Vec<LlmTool> {
        self.tools.iter().map(|t| t.to_llm_tool()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Receives raw artifact bytes produced inside a tool (e.g. screenshots) and
/// makes them durable. Implemented by the session layer.
#[async_trait::async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Returns the artifact id on success.
    async fn save(
        &self,
        kind: ArtifactKind,
        name: &str,
        bytes: &[u8],
        metadata: Option<Value>,
    ) -> Result<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back."
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, args: Value) -> ToolResult {
            ToolResult::text(args["text"].as_str().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .execute_cancellable("echo", json!({"text": "hi"}), CancellationToken::new())
            .await;
        assert_eq!(result.preview(), "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable_error() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute_cancellable("nope", json!({}), CancellationToken::new())
            .await;
        assert!(result.is_error());
        assert!(result.preview().contains("unknown tool"));
    }

    #[test]
    fn definitions_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[test]
    fn error_result_renders_with_prefix() {
        let result = ToolResult::error("boom");
        match result.to_result_content() {
            ToolResultContent::Text(s) => assert_eq!(s, "Error: boom"),
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn media_result_previews_as_placeholder() {
        let result = ToolResult::Media(vec![ResultBlock::Text { text: "t".into() }]);
        assert_eq!(result.preview(), "[media content]");
    }
}
