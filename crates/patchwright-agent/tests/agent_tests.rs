//! Tests for the agent executor: loop termination, tool dispatch, events,
//! interruption, and resume

use patchwright_agent::{AgentExecutor, AgentState, CompleteTool, EventCallback};
use patchwright_core::EventType;
use patchwright_llm::{
    ContentBlock, LlmContent, LlmError, LlmProvider, LlmRequest, LlmResponse, LlmResult,
};
use patchwright_tools::{Tool, ToolRegistry, ToolResult};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Decision-maker double that plays back a fixed script of responses and
/// records every request it sees.
struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> LlmRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: LlmRequest) -> LlmResult<LlmResponse> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::RequestFailed("script exhausted".into()))
    }
}

fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        stop_reason: Some("end_turn".into()),
        usage: None,
    }
}

fn tool_response(id: &str, name: &str, input: Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }],
        stop_reason: Some("tool_use".into()),
        usage: None,
    }
}

struct UppercaseTool;

#[async_trait::async_trait]
impl Tool for UppercaseTool {
    fn name(&self) -> &str {
        "uppercase"
    }
    fn description(&self) -> &str {
        "Uppercase the given text."
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
    }
    async fn execute(&self, args: Value) -> ToolResult {
        match args["text"].as_str() {
            Some(text) => ToolResult::text(text.to_uppercase()),
            None => ToolResult::error("Missing required parameter: text"),
        }
    }
}

fn collecting_callback() -> (EventCallback, Arc<Mutex<Vec<patchwright_core::AgentEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: EventCallback = Arc::new(move |event| {
        sink.lock().unwrap().push(event);
    });
    (callback, seen)
}

fn make_agent(
    provider: Arc<ScriptedProvider>,
    tools: ToolRegistry,
    max_iterations: usize,
) -> AgentExecutor {
    AgentExecutor::new(
        "orchestrator",
        "test preamble",
        provider,
        tools,
        Arc::new(AgentState::new()),
        max_iterations,
    )
}

#[tokio::test]
async fn completes_on_response_without_tool_use() {
    let provider = ScriptedProvider::new(vec![text_response("The repo uses axum.")]);
    let agent = make_agent(provider.clone(), ToolRegistry::new(), 10);

    let output = agent.run(json!({"prompt": "what framework?"})).await.unwrap();
    assert_eq!(output.result["summary"], "The repo uses axum.");
    assert_eq!(provider.request_count(), 1);

    // started, agent_message, completed — in order.
    let kinds: Vec<EventType> = output.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::StatusChange,
            EventType::AgentMessage,
            EventType::StatusChange
        ]
    );
    assert_eq!(
        output.events.last().unwrap().data["status"],
        "orchestrator_completed"
    );
}

#[tokio::test]
async fn empty_final_text_yields_empty_summary() {
    let provider = ScriptedProvider::new(vec![LlmResponse {
        content: vec![],
        stop_reason: Some("end_turn".into()),
        usage: None,
    }]);
    let agent = make_agent(provider, ToolRegistry::new(), 10);

    let output = agent.run(json!({})).await.unwrap();
    assert_eq!(output.result, json!({"summary": ""}));
}

#[tokio::test]
async fn dispatches_tools_and_feeds_results_back() {
    let provider = ScriptedProvider::new(vec![
        tool_response("call-1", "uppercase", json!({"text": "hi"})),
        text_response("done"),
    ]);
    let mut tools = ToolRegistry::new();
    tools.register(UppercaseTool);
    let agent = make_agent(provider.clone(), tools, 10);

    let output = agent.run(json!({"prompt": "x"})).await.unwrap();
    assert_eq!(output.result["summary"], "done");
    assert_eq!(provider.request_count(), 2);

    // The second request carries the assistant turn plus the tool results
    // as the next user turn, keyed by the originating id.
    let second = provider.request(1);
    let last = second.messages.last().unwrap();
    assert_eq!(last.role, "user");
    match &last.content {
        LlmContent::Blocks(blocks) => match &blocks[0] {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                assert_eq!(tool_use_id, "call-1");
                match content {
                    patchwright_llm::ToolResultContent::Text(s) => assert_eq!(s, "HI"),
                    other => panic!("unexpected content: {:?}", other),
                }
            }
            other => panic!("expected tool_result, got {:?}", other),
        },
        other => panic!("expected blocks, got {:?}", other),
    }

    // tool_call and tool_result events bracket the dispatch with the same id.
    let tool_call = output
        .events
        .iter()
        .find(|e| e.kind == EventType::ToolCall)
        .unwrap();
    let tool_result = output
        .events
        .iter()
        .find(|e| e.kind == EventType::ToolResult)
        .unwrap();
    assert_eq!(tool_call.data["id"], tool_result.data["id"]);
    assert_eq!(tool_result.data["result"], "HI");
}

#[tokio::test]
async fn unknown_tool_becomes_recoverable_error_result() {
    let provider = ScriptedProvider::new(vec![
        tool_response("call-1", "no_such_tool", json!({})),
        text_response("recovered"),
    ]);
    let agent = make_agent(provider.clone(), ToolRegistry::new(), 10);

    let output = agent.run(json!({})).await.unwrap();
    assert_eq!(output.result["summary"], "recovered");

    let second = provider.request(1);
    match &second.messages.last().unwrap().content {
        LlmContent::Blocks(blocks) => match &blocks[0] {
            ContentBlock::ToolResult { content, .. } => match content {
                patchwright_llm::ToolResultContent::Text(s) => {
                    assert!(s.starts_with("Error: unknown tool"));
                }
                other => panic!("unexpected content: {:?}", other),
            },
            other => panic!("expected tool_result, got {:?}", other),
        },
        other => panic!("expected blocks, got {:?}", other),
    }
}

#[tokio::test]
async fn complete_tool_fixes_result_and_stops_loop() {
    let provider = ScriptedProvider::new(vec![tool_response(
        "call-1",
        "complete",
        json!({"summary": "all done", "pr_url": "https://github.com/acme/app/pull/7", "pr_number": 7}),
    )]);

    let state = Arc::new(AgentState::new());
    let mut tools = ToolRegistry::new();
    tools.register(CompleteTool::new(state.clone()));
    let agent = AgentExecutor::new("orchestrator", "p", provider.clone(), tools, state, 10);

    let output = agent.run(json!({})).await.unwrap();
    assert_eq!(output.result["summary"], "all done");
    assert_eq!(output.result["pr_number"], 7);
    // The loop exits at the top of the next iteration; only one call made.
    assert_eq!(provider.request_count(), 1);
    assert_eq!(
        output.events.last().unwrap().data["status"],
        "orchestrator_completed"
    );
}

#[tokio::test]
async fn iteration_cap_yields_error_result() {
    let responses: Vec<LlmResponse> = (0..5)
        .map(|i| tool_response(&format!("call-{}", i), "uppercase", json!({"text": "x"})))
        .collect();
    let provider = ScriptedProvider::new(responses);
    let mut tools = ToolRegistry::new();
    tools.register(UppercaseTool);
    let agent = make_agent(provider.clone(), tools, 3);

    let output = agent.run(json!({})).await.unwrap();
    assert_eq!(output.result, json!({"error": "max_iterations_reached"}));
    assert_eq!(provider.request_count(), 3);

    let last = output.events.last().unwrap();
    assert_eq!(last.kind, EventType::Error);
    assert!(last.data["message"]
        .as_str()
        .unwrap()
        .contains("Max iterations (3)"));
}

#[tokio::test]
async fn interrupt_before_run_short_circuits() {
    let provider = ScriptedProvider::new(vec![text_response("never seen")]);
    let agent = make_agent(provider.clone(), ToolRegistry::new(), 10);

    agent.interrupt();
    let output = agent.run(json!({})).await.unwrap();
    assert_eq!(output.result["status"], "interrupted");
    assert_eq!(provider.request_count(), 0);
}

#[tokio::test]
async fn decision_maker_failure_bubbles_out() {
    let provider = ScriptedProvider::new(vec![]);
    let agent = make_agent(provider, ToolRegistry::new(), 10);
    assert!(agent.run(json!({})).await.is_err());
}

#[tokio::test]
async fn resume_appends_fresh_user_turn_after_assistant() {
    let provider = ScriptedProvider::new(vec![
        text_response("first answer"),
        text_response("second answer"),
    ]);
    let agent = make_agent(provider.clone(), ToolRegistry::new(), 10);

    agent.run(json!({"prompt": "q1"})).await.unwrap();
    let output = agent.resume("Also add a /ready endpoint").await.unwrap();
    assert_eq!(output.result["summary"], "second answer");

    // The resumed request history ends user("Also add...") before the reply.
    let second = provider.request(1);
    let user_turns: Vec<_> = second
        .messages
        .iter()
        .filter(|m| m.role == "user")
        .collect();
    match &user_turns.last().unwrap().content {
        LlmContent::Text(text) => assert_eq!(text, "Also add a /ready endpoint"),
        other => panic!("expected text content, got {:?}", other),
    }

    // Resume starts a fresh event buffer with a resumed marker first.
    assert_eq!(
        output.events.first().unwrap().data["status"],
        "orchestrator_resumed"
    );
}

#[tokio::test]
async fn resume_folds_into_trailing_user_turn() {
    let provider = ScriptedProvider::new(vec![text_response("answer")]);
    let agent = make_agent(provider.clone(), ToolRegistry::new(), 10);

    // Seed a history that ends in a user turn, then resume.
    agent.interrupt();
    let _ = agent.run(json!({"prompt": "q1"})).await.unwrap();

    let _ = agent.resume("follow-up").await;
    let history = agent.history().await;
    let first = &history[0];
    assert_eq!(first.role, "user");
    match &first.content {
        LlmContent::Text(text) => {
            assert!(text.contains("q1"));
            assert!(text.ends_with("follow-up"));
        }
        other => panic!("expected text content, got {:?}", other),
    }
}

#[tokio::test]
async fn events_forward_to_subscriber_in_emission_order() {
    let provider = ScriptedProvider::new(vec![
        tool_response("call-1", "uppercase", json!({"text": "a"})),
        text_response("bye"),
    ]);
    let mut tools = ToolRegistry::new();
    tools.register(UppercaseTool);
    let agent = make_agent(provider, tools, 10);

    let (callback, seen) = collecting_callback();
    agent.on_event(callback);

    let output = agent.run(json!({})).await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), output.events.len());
    for (live, buffered) in seen.iter().zip(output.events.iter()) {
        assert_eq!(live.kind, buffered.kind);
        assert_eq!(live.timestamp, buffered.timestamp);
    }
}
