//! The agent loop — history, tool dispatch, events, interruption

use crate::parse::parse_final_text;
use patchwright_core::{AgentEvent, EventType};
use patchwright_llm::{
    ContentBlock, LlmContent, LlmError, LlmMessage, LlmProvider, LlmRequest,
};
use patchwright_tools::{Tool, ToolRegistry, ToolResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Truncation applied to tool-result previews in events.
const RESULT_PREVIEW_CAP: usize = 5_000;

pub type EventCallback = Arc<dyn Fn(AgentEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("decision-maker failure: {0}")]
    Llm(#[from] LlmError),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Completion state shared between the executor and the sentinel `complete`
/// tool, plus the interruption flag the controller flips.
pub struct AgentState {
    done: AtomicBool,
    interrupted: AtomicBool,
    result: Mutex<Value>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            result: Mutex::new(Value::Null),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Called by the `complete` tool handler to fix the final result.
    pub fn mark_done(&self, result: Value) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = result;
        }
        self.done.store(true, Ordering::SeqCst);
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
    }

    fn clear_done(&self) {
        self.done.store(false, Ordering::SeqCst);
    }

    fn set_result(&self, result: Value) {
        if let Ok(mut slot) = self.result.lock() {
            *slot = result;
        }
    }

    pub fn result(&self) -> Value {
        self.result
            .lock()
            .map(|v| v.clone())
            .unwrap_or(Value::Null)
    }
}

pub struct AgentOutput {
    pub role: String,
    pub result: Value,
    pub events: Vec<AgentEvent>,
}

/// Generic conversational loop around the decision-maker.
///
/// Seeds the history with the caller-supplied context, dispatches any
/// tool-use blocks the decision-maker produces, and terminates when a
/// response carries no tool use or the sentinel `complete` tool fires.
/// All mutation goes through interior locks so a shared handle can be
/// resumed and interrupted concurrently.
pub struct AgentExecutor {
    role: String,
    system_prompt: String,
    model: String,
    max_iterations: usize,
    provider: Arc<dyn LlmProvider>,
    tools: ToolRegistry,
    state: Arc<AgentState>,
    callback: Mutex<Option<EventCallback>>,
    messages: tokio::sync::Mutex<Vec<LlmMessage>>,
    events: Mutex<Vec<AgentEvent>>,
    cancel: CancellationToken,
}

impl AgentExecutor {
    pub fn new(
        role: impl Into<String>,
        system_prompt: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        tools: ToolRegistry,
        state: Arc<AgentState>,
        max_iterations: usize,
    ) -> Self {
        Self {
            role: role.into(),
            system_prompt: system_prompt.into(),
            model: DEFAULT_MODEL.to_string(),
            max_iterations,
            provider,
            tools,
            state,
            callback: Mutex::new(None),
            messages: tokio::sync::Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    /// Snapshot of the conversation history.
    pub async fn history(&self) -> Vec<LlmMessage> {
        self.messages.lock().await.clone()
    }

    pub fn on_event(&self, callback: EventCallback) {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(callback);
        }
    }

    /// Interrupt the loop. Takes effect at the next check, which is at most
    /// one decision-maker round-trip plus one tool call away; the in-flight
    /// decision-maker call is dropped via the cancellation token.
    pub fn interrupt(&self) {
        self.state.interrupt();
        self.cancel.cancel();
    }

    fn emit(&self, kind: EventType, data: Value) {
        let event = AgentEvent::new(self.role.clone(), kind, data);
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if let Ok(callback) = self.callback.lock() {
            if let Some(callback) = callback.as_ref() {
                callback(event);
            }
        }
    }

    fn drain_output(&self) -> AgentOutput {
        AgentOutput {
            role: self.role.clone(),
            result: self.state.result(),
            events: self
                .events
                .lock()
                .map(|e| e.clone())
                .unwrap_or_default(),
        }
    }

    /// Run with a fresh history seeded from the serialized context.
    pub async fn run(&self, context: Value) -> AgentResult<AgentOutput> {
        {
            let mut messages = self.messages.lock().await;
            messages.clear();
            messages.push(LlmMessage::user(context.to_string()));
        }
        self.state.clear_done();
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
        self.emit(
            EventType::StatusChange,
            json!({"status": format!("{}_started", self.role)}),
        );
        self.run_loop().await
    }

    /// Continue the conversation with a follow-up message. The follow-up is
    /// folded into the last user turn when there is one, so the history
    /// stays alternating.
    pub async fn resume(&self, user_message: &str) -> AgentResult<AgentOutput> {
        {
            let mut messages = self.messages.lock().await;
            match messages.last_mut() {
                Some(last) if last.role == "user" => match &mut last.content {
                    LlmContent::Blocks(blocks) => blocks.push(ContentBlock::Text {
                        text: user_message.to_string(),
                    }),
                    LlmContent::Text(text) => {
                        text.push_str("\n\n");
                        text.push_str(user_message);
                    }
                },
                _ => messages.push(LlmMessage::user(user_message)),
            }
        }
        self.state.clear_done();
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
        self.emit(
            EventType::StatusChange,
            json!({"status": format!("{}_resumed", self.role)}),
        );
        self.run_loop().await
    }

    async fn run_loop(&self) -> AgentResult<AgentOutput> {
        let tools_schema = if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.definitions())
        };

        let mut iterations = 0;

        while iterations < self.max_iterations && !self.state.is_done() {
            if self.state.is_interrupted() {
                self.state
                    .mark_done(json!({"status": "interrupted", "summary": "Run interrupted"}));
                break;
            }

            iterations += 1;

            let request = LlmRequest {
                model: self.model.clone(),
                messages: self.messages.lock().await.clone(),
                tools: tools_schema.clone(),
                max_tokens: Some(16384),
                system: Some(self.system_prompt.clone()),
            };

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("{} interrupted before decision-maker returned", self.role);
                    self.state
                        .mark_done(json!({"status": "interrupted", "summary": "Run interrupted"}));
                    break;
                }
                response = self.provider.complete(request) => response?,
            };

            // Re-check immediately: interruption during the call must win
            // before any tool runs.
            if self.state.is_interrupted() {
                self.state
                    .mark_done(json!({"status": "interrupted", "summary": "Run interrupted"}));
                break;
            }

            let has_tool_use = response.has_tool_use();
            let mut text_parts: Vec<String> = Vec::new();
            let mut tool_results: Vec<ContentBlock> = Vec::new();

            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => {
                        text_parts.push(text.clone());
                        self.emit(EventType::AgentMessage, json!({"content": text}));
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        self.emit(
                            EventType::ToolCall,
                            json!({"tool": name, "input": input, "id": id}),
                        );

                        let result = self
                            .tools
                            .execute_cancellable(name, input.clone(), self.cancel.child_token())
                            .await;
                        if result.is_error() {
                            warn!("tool {} failed: {}", name, result.preview());
                        }

                        self.emit(
                            EventType::ToolResult,
                            json!({
                                "tool": name,
                                "id": id,
                                "result": truncate(&result.preview(), RESULT_PREVIEW_CAP),
                            }),
                        );

                        tool_results.push(ContentBlock::ToolResult {
                            tool_use_id: id.clone(),
                            content: result.to_result_content(),
                            is_error: None,
                        });
                    }
                    ContentBlock::ToolResult { .. } => {}
                }
            }

            if has_tool_use {
                let mut messages = self.messages.lock().await;
                messages.push(LlmMessage::assistant(response.content.clone()));
                messages.push(LlmMessage::user(tool_results));
                continue;
            }

            // No tool use — the decision-maker is signaling completion.
            let final_text = text_parts.join("\n");
            if !self.state.is_done() {
                self.state.set_result(parse_final_text(&final_text));
            }
            self.emit(
                EventType::StatusChange,
                json!({"status": format!("{}_completed", self.role)}),
            );
            info!("{} completed after {} iterations", self.role, iterations);
            return Ok(self.drain_output());
        }

        if self.state.is_done() {
            // Terminated by the `complete` tool. An interrupted run ends
            // without a terminal completion event.
            if !self.state.is_interrupted() {
                self.emit(
                    EventType::StatusChange,
                    json!({"status": format!("{}_completed", self.role)}),
                );
            }
            return Ok(self.drain_output());
        }

        self.emit(
            EventType::Error,
            json!({"message": format!("Max iterations ({}) reached", self.max_iterations)}),
        );
        self.state.set_result(json!({"error": "max_iterations_reached"}));
        Ok(self.drain_output())
    }
}

/// Sentinel tool: fixes the result to its arguments and flips the done flag,
/// so the loop exits at the top of the next iteration.
pub struct CompleteTool {
    state: Arc<AgentState>,
}

impl CompleteTool {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl Tool for CompleteTool {
    fn name(&self) -> &str {
        "complete"
    }

    fn description(&self) -> &str {
        "Signal that you are done. Call this when you have finished the entire task. \
         Include a summary and any relevant output."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Summary of what was accomplished"
                },
                "pr_url": {
                    "type": "string",
                    "description": "PR URL if one was created"
                },
                "pr_number": {
                    "type": "integer",
                    "description": "PR number if one was created"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        self.state.mark_done(args);
        ToolResult::text("Session complete.")
    }
}

fn truncate(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
