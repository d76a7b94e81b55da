//! End-to-end scenarios: controller + runner + agents over a real local
//! sandbox, with a scripted decision-maker

use patchwright_agent::{build_implementer, build_verifier};
use patchwright_core::{Config, EventType, RunStatus, SessionStatus};
use patchwright_llm::{ContentBlock, LlmError, LlmProvider, LlmRequest, LlmResponse, LlmResult};
use patchwright_sandbox::{
    CommandOutput, LocalSandbox, Sandbox, SandboxProvider, SandboxResult,
};
use patchwright_session::{MemoryStore, SessionController, Store};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test doubles ────────────────────────────────────────────────────────────

struct ScriptedProvider {
    responses: Mutex<VecDeque<LlmResponse>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: LlmRequest) -> LlmResult<LlmResponse> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::RequestFailed("script exhausted".into()))
    }
}

fn text(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        stop_reason: Some("end_turn".into()),
        usage: None,
    }
}

fn tool(id: &str, name: &str, input: Value) -> LlmResponse {
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

/// Local sandbox wrapper that records created workspaces so tests can check
/// reuse and teardown.
struct RecordingSandboxes {
    inner: LocalSandbox,
    created: Mutex<Vec<PathBuf>>,
}

impl RecordingSandboxes {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalSandbox::new(),
            created: Mutex::new(Vec::new()),
        })
    }

    fn created(&self) -> Vec<PathBuf> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SandboxProvider for RecordingSandboxes {
    async fn create(&self, repo_url: &str, token: Option<&str>) -> SandboxResult<Sandbox> {
        let sandbox = self.inner.create(repo_url, token).await?;
        self.created.lock().unwrap().push(sandbox.workspace.clone());
        Ok(sandbox)
    }

    async fn run_command(
        &self,
        sandbox: &Sandbox,
        cmd: &str,
        timeout: Duration,
    ) -> SandboxResult<CommandOutput> {
        self.inner.run_command(sandbox, cmd, timeout).await
    }

    async fn read_file(&self, sandbox: &Sandbox, path: &str) -> SandboxResult<String> {
        self.inner.read_file(sandbox, path).await
    }

    async fn write_file(&self, sandbox: &Sandbox, path: &str, content: &str) -> SandboxResult<()> {
        self.inner.write_file(sandbox, path, content).await
    }

    async fn list_dir(&self, sandbox: &Sandbox, path: &str) -> SandboxResult<Vec<String>> {
        self.inner.list_dir(sandbox, path).await
    }

    async fn destroy(&self, sandbox: &Sandbox) -> SandboxResult<()> {
        self.inner.destroy(sandbox).await
    }
}

// ── Fixtures ────────────────────────────────────────────────────────────────

/// A seed repo with a bare clone acting as `origin`, so pushes work.
fn seed_remote(files: &[(&str, &str)]) -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();

    let git = |args: &[&str], cwd: &std::path::Path| {
        let status = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_AUTHOR_NAME", "seed")
            .env("GIT_AUTHOR_EMAIL", "seed@example.com")
            .env("GIT_COMMITTER_NAME", "seed")
            .env("GIT_COMMITTER_EMAIL", "seed@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    };

    git(&["init", "-q", "-b", "main"], &work);
    for (name, content) in files {
        let path = work.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    git(&["add", "-A"], &work);
    git(&["commit", "-q", "-m", "seed"], &work);

    let bare = dir.path().join("origin.git");
    git(
        &["clone", "-q", "--bare", work.to_str().unwrap(), bare.to_str().unwrap()],
        dir.path(),
    );

    let url = format!("file://{}", bare.display());
    (dir, url)
}

struct Harness {
    controller: SessionController,
    store: Arc<MemoryStore>,
    sandboxes: Arc<RecordingSandboxes>,
    _artifacts_dir: tempfile::TempDir,
}

fn harness(script: Vec<LlmResponse>) -> Harness {
    let artifacts_dir = tempfile::tempdir().unwrap();
    let config = Config {
        artifacts_dir: artifacts_dir.path().to_path_buf(),
        ..Config::default()
    };
    let store = Arc::new(MemoryStore::new());
    let sandboxes = RecordingSandboxes::new();
    let controller = SessionController::new(
        config,
        ScriptedProvider::new(script),
        store.clone() as Arc<dyn Store>,
    )
    .with_sandbox_provider(sandboxes.clone());
    Harness {
        controller,
        store,
        sandboxes,
        _artifacts_dir: artifacts_dir,
    }
}

async fn run_to_completion(h: &Harness, repo_url: &str, prompt: &str) -> String {
    let session = h.controller.create_session(repo_url, prompt).await.unwrap();
    h.controller.start_run(&session.id).await.unwrap();
    h.controller.wait_for_idle(&session.id).await;
    session.id
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn read_only_analysis_completes_without_diff() {
    let (_repo, url) = seed_remote(&[("requirements.txt", "fastapi\nuvicorn\n")]);
    let h = harness(vec![
        tool("t1", "read_file", json!({"path": "requirements.txt"})),
        tool("t2", "list_directory", json!({"path": "."})),
        tool(
            "t3",
            "complete",
            json!({"summary": "This repo uses FastAPI (declared in requirements.txt)."}),
        ),
    ]);

    let session_id = run_to_completion(&h, &url, "What HTTP framework does this repo use?").await;

    let session = h.store.get_session(&session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    let run = h.store.latest_run(&session_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.pr_url.is_none());

    // No diff artifact for a read-only run.
    assert!(h.store.artifacts().is_empty());

    let events = h.store.events_for_session(&session_id).await.unwrap();
    let tools_called: Vec<&str> = events
        .iter()
        .filter(|e| e.kind == EventType::ToolCall)
        .filter_map(|e| e.data["tool"].as_str())
        .collect();
    assert!(tools_called.contains(&"read_file"));
    assert!(tools_called.contains(&"list_directory"));
    assert!(!tools_called.contains(&"run_implementer"));

    // Completion summary lands as an agent message.
    let messages = h.store.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].content.contains("FastAPI"));
}

#[tokio::test]
async fn code_change_produces_diff_artifact_and_nested_events() {
    let (_repo, url) = seed_remote(&[("server.py", "app = make_app()\n")]);
    let h = harness(vec![
        // orchestrator explores, then delegates
        tool("t1", "read_file", json!({"path": "server.py"})),
        tool(
            "t2",
            "run_implementer",
            json!({"task": "Add a /health endpoint", "context": "app = make_app()"}),
        ),
        // implementer runs inside the tool call
        tool(
            "i1",
            "write_file",
            json!({"path": "server.py", "content": "app = make_app()\n\n@app.route('/health')\ndef health():\n    return {'status': 'ok'}\n"}),
        ),
        text(r#"{"changed_files": ["server.py"], "created_files": [], "deleted_files": [], "summary": "Added /health endpoint"}"#),
        // back in the orchestrator: verify
        tool("t3", "run_verifier", json!({"test_command": "echo ok"})),
        tool("v1", "run_command", json!({"command": "echo ok"})),
        text("```json\n{\"passed\": true, \"test_summary\": \"echo ok succeeded\", \"failure_reason\": null}\n```"),
        tool("t4", "complete", json!({"summary": "Added /health endpoint"})),
    ]);

    let session_id = run_to_completion(&h, &url, "Add a /health endpoint").await;

    let run = h.store.latest_run(&session_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    // The uncommitted modification shows up as a non-empty diff artifact.
    let artifacts = h.store.artifacts();
    assert_eq!(artifacts.len(), 1);
    let diff = &artifacts[0];
    assert_eq!(diff.name, "changes");
    assert!(diff.path.ends_with("changes.patch"));
    let content = std::fs::read_to_string(&diff.path).unwrap();
    assert!(content.contains("/health"));
    assert_eq!(diff.size_bytes, content.len() as u64);
    assert_eq!(diff.metadata.as_ref().unwrap()["summary"], "Added /health endpoint");

    // Nested agents stream into the same run, attributable by role.
    let events = h.store.events_for_session(&session_id).await.unwrap();
    let roles: Vec<&str> = events.iter().map(|e| e.role.as_str()).collect();
    assert!(roles.contains(&"orchestrator"));
    assert!(roles.contains(&"implementer"));
    assert!(roles.contains(&"verifier"));

    // Event ids are strictly increasing in emission order.
    let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
    assert!(ids.windows(2).all(|w| w[1] > w[0]));
}

#[tokio::test]
async fn git_flow_pushes_branch_and_records_pr() {
    let (repo, url) = seed_remote(&[("server.py", "app = make_app()\n")]);
    let h = harness(vec![
        tool("t1", "create_branch", json!({"branch_name": "patchwright/health"})),
        tool(
            "t2",
            "run_implementer",
            json!({"task": "Add /health"}),
        ),
        tool(
            "i1",
            "write_file",
            json!({"path": "server.py", "content": "app = make_app()  # health\n"}),
        ),
        text(r#"{"changed_files": ["server.py"], "created_files": [], "deleted_files": [], "summary": "done"}"#),
        tool("t3", "commit_and_push", json!({"message": "Add /health endpoint"})),
        tool(
            "t4",
            "complete",
            json!({
                "summary": "Opened PR",
                "pr_url": "https://github.com/acme/app/pull/5",
                "pr_number": 5
            }),
        ),
    ]);

    let session_id = run_to_completion(&h, &url, "Add a /health endpoint").await;

    // The branch landed on the remote.
    let bare = repo.path().join("origin.git");
    let output = Command::new("git")
        .args(["--git-dir", bare.to_str().unwrap(), "show-ref"])
        .output()
        .unwrap();
    let refs = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(
        refs.contains("refs/heads/patchwright/health"),
        "remote refs: {}",
        refs
    );

    // PR locator from the agent result is written back onto the run.
    let run = h.store.latest_run(&session_id).await.unwrap().unwrap();
    assert_eq!(run.pr_url.as_deref(), Some("https://github.com/acme/app/pull/5"));
    assert_eq!(run.pr_number, Some(5));
}

#[tokio::test]
async fn interruption_mid_tool_leaves_clean_resumable_state() {
    let (_repo, url) = seed_remote(&[("README.md", "# seed\n")]);
    let h = harness(vec![tool(
        "t1",
        "run_command",
        json!({"command": "sleep 30"}),
    )]);

    let session = h
        .controller
        .create_session(&url, "long running task")
        .await
        .unwrap();
    let mut sub = h
        .controller
        .bus()
        .subscribe_with_keepalive(&session.id, Duration::from_millis(200));
    h.controller.start_run(&session.id).await.unwrap();

    // Wait for the first tool call to start, then interrupt.
    let started = std::time::Instant::now();
    loop {
        let event = sub.next().await;
        if event["type"] == "tool_call" {
            break;
        }
        assert!(started.elapsed() < Duration::from_secs(30), "no tool_call seen");
    }
    assert!(h.controller.interrupt(&session.id).await);
    h.controller.wait_for_idle(&session.id).await;
    assert!(started.elapsed() < Duration::from_secs(20));

    // Terminal statuses are the clean resumable pair.
    let stored_session = h.store.get_session(&session.id).await.unwrap();
    assert_eq!(stored_session.status, SessionStatus::Completed);
    let run = h.store.latest_run(&session.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    let events = h.store.events_for_session(&session.id).await.unwrap();
    assert!(events.iter().any(|e| {
        e.kind == EventType::StatusChange && e.data["status"] == "interrupted"
    }));
    // An interrupted run never records a terminal completion for the agent.
    assert!(!events.iter().any(|e| {
        e.kind == EventType::StatusChange && e.data["status"] == "orchestrator_completed"
    }));
    // Only the one tool call ever ran.
    let tool_calls = events
        .iter()
        .filter(|e| e.kind == EventType::ToolCall)
        .count();
    assert_eq!(tool_calls, 1);

    // The sandbox directory is gone.
    let created = h.sandboxes.created();
    assert_eq!(created.len(), 1);
    assert!(!created[0].exists());
}

#[tokio::test]
async fn follow_up_reuses_sandbox_and_writes_followup_diff() {
    let (_repo, url) = seed_remote(&[("README.md", "# app\n")]);
    let h = harness(vec![
        // run 1: read-only answer
        tool("t1", "complete", json!({"summary": "Initial analysis done"})),
        // follow-up: delegate a README change
        tool("t2", "run_implementer", json!({"task": "Expand the README"})),
        tool(
            "i1",
            "write_file",
            json!({"path": "README.md", "content": "# app\n\nNow with more docs.\n"}),
        ),
        text(r#"{"changed_files": ["README.md"], "created_files": [], "deleted_files": [], "summary": "README expanded"}"#),
        tool("t3", "complete", json!({"summary": "README updated"})),
    ]);

    let session_id = run_to_completion(&h, &url, "Describe this repo").await;
    h.controller
        .send_message(&session_id, "Also expand the README")
        .await
        .unwrap();
    h.controller.wait_for_idle(&session_id).await;

    // Same sandbox served both runs.
    assert_eq!(h.sandboxes.created().len(), 1);

    // The follow-up is its own run: two records, both completed, and the
    // first run's (empty) PR bookkeeping doesn't leak into the second.
    let runs = h.store.runs();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
    assert_ne!(runs[0].id, runs[1].id);
    assert!(runs[1].finished_at.is_some());

    // The follow-up diff gets its own artifact name, attached to the
    // follow-up's run.
    let artifacts = h.store.artifacts();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "changes_followup");
    assert_eq!(artifacts[0].run_id, runs[1].id);

    // User message durably recorded, agent summaries for both runs.
    let messages = h.store.messages();
    let user: Vec<_> = messages
        .iter()
        .filter(|m| matches!(m.role, patchwright_core::MessageRole::User))
        .collect();
    assert_eq!(user.len(), 1);
    assert_eq!(user[0].content, "Also expand the README");
    let agent: Vec<_> = messages
        .iter()
        .filter(|m| matches!(m.role, patchwright_core::MessageRole::Agent))
        .collect();
    assert_eq!(agent.len(), 2);

    // The follow-up's user message is in the durable event log too.
    let events = h.store.events_for_session(&session_id).await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.kind == EventType::UserMessage && e.data["content"] == "Also expand the README"));
}

#[tokio::test]
async fn replay_then_subscribe_yields_tagged_events_once() {
    let (_repo, url) = seed_remote(&[("requirements.txt", "flask\n")]);
    let h = harness(vec![tool(
        "t1",
        "complete",
        json!({"summary": "Uses Flask"}),
    )]);

    let session_id = run_to_completion(&h, &url, "framework?").await;

    let replay = h.controller.replay_events(&session_id).await.unwrap();
    assert!(!replay.is_empty());
    for event in &replay {
        assert_eq!(event["replayed"], true);
        assert!(event["timestamp"].as_str().is_some());
    }
    let ids: Vec<i64> = replay.iter().map(|e| e["id"].as_i64().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[1] > w[0]));

    // Live subscription after replay sees no duplicates, just keepalives
    // until something new happens.
    let mut sub = h
        .controller
        .bus()
        .subscribe_with_keepalive(&session_id, Duration::from_millis(100));
    assert_eq!(sub.next().await["type"], "keepalive");
}

// ── Verifier and implementer edges (scripted, shared sandbox) ───────────────

#[tokio::test]
async fn verifier_refuses_forbidden_commands() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(Sandbox::new(dir.path()));
    let provider: Arc<dyn SandboxProvider> = Arc::new(LocalSandbox::new());
    let llm = ScriptedProvider::new(vec![
        tool("v1", "run_command", json!({"command": "git push origin main"})),
        text(r#"{"passed": false, "test_summary": "blocked", "failure_reason": "safety policy forbids git push"}"#),
    ]);

    let verifier = build_verifier(llm, provider, sandbox, None, Some("pytest"), None, None);
    let output = verifier
        .run(json!({"install_command": null, "test_command": "pytest", "verification_goal": null}))
        .await
        .unwrap();

    assert_eq!(output.result["passed"], false);
    assert!(output.result["failure_reason"]
        .as_str()
        .unwrap()
        .contains("safety policy"));

    let blocked = output
        .events
        .iter()
        .find(|e| e.kind == EventType::ToolResult)
        .unwrap();
    let result_text = blocked.data["result"].as_str().unwrap();
    assert!(result_text.contains("\"exit_code\":2"));
    assert!(result_text.contains("not allowed"));
}

#[tokio::test]
async fn implementer_path_escape_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Arc::new(Sandbox::new(dir.path()));
    let provider: Arc<dyn SandboxProvider> = Arc::new(LocalSandbox::new());
    let llm = ScriptedProvider::new(vec![
        tool(
            "i1",
            "write_file",
            json!({"path": "../../etc/passwd", "content": "x"}),
        ),
        text(r#"{"changed_files": [], "created_files": [], "deleted_files": [], "summary": "nothing written"}"#),
    ]);

    let implementer = build_implementer(llm, provider, sandbox, "write somewhere bad", "");
    let output = implementer.run(json!({"task": "escape"})).await.unwrap();

    let result = output
        .events
        .iter()
        .find(|e| e.kind == EventType::ToolResult)
        .unwrap();
    assert!(result.data["result"]
        .as_str()
        .unwrap()
        .contains("escapes workspace"));
    assert_eq!(output.result["changed_files"].as_array().unwrap().len(), 0);
}
