//! Per-session runner — drives one orchestrator end-to-end

use crate::artifacts::ArtifactFileStore;
use crate::bus::EventBus;
use crate::controller::ControllerError;
use crate::store::Store;
use patchwright_agent::{build_orchestrator, AgentExecutor, AgentOutput, EventCallback, GitHubClient};
use patchwright_core::{
    AgentEvent, ArtifactKind, Config, EventType, RunStatus, SessionStatus,
};
use patchwright_llm::LlmProvider;
use patchwright_sandbox::{Sandbox, SandboxProvider};
use patchwright_tools::ArtifactSink;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

const DIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// What a run (initial or follow-up) came to.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub status: String,
    pub summary: Option<String>,
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub error: Option<String>,
}

impl RunOutcome {
    fn completed(result: &Value) -> Self {
        Self {
            status: "completed".to_string(),
            summary: result["summary"].as_str().map(String::from),
            pr_url: result["pr_url"].as_str().map(String::from),
            pr_number: result["pr_number"].as_u64(),
            error: None,
        }
    }

    fn interrupted() -> Self {
        Self {
            status: "interrupted".to_string(),
            summary: None,
            pr_url: None,
            pr_number: None,
            error: Some("Run interrupted by user".to_string()),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            status: "failed".to_string(),
            summary: None,
            pr_url: None,
            pr_number: None,
            error: Some(message),
        }
    }
}

/// Owns the sandbox and the live orchestrator for one session. The runner
/// outlives a single run so follow-ups reuse the same agent and workspace;
/// each invocation (initial or follow-up) gets its own run id.
pub struct SessionRunner {
    session_id: String,
    run_id: Arc<StdMutex<String>>,
    config: Config,
    llm: Arc<dyn LlmProvider>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    store: Arc<dyn Store>,
    bus: EventBus,
    artifacts: ArtifactFileStore,
    github: Arc<GitHubClient>,
    sandbox: Mutex<Option<Arc<Sandbox>>>,
    agent: Mutex<Option<Arc<AgentExecutor>>>,
    interrupted: AtomicBool,
    finished: AtomicBool,
}

impl SessionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: String,
        run_id: String,
        config: Config,
        llm: Arc<dyn LlmProvider>,
        sandbox_provider: Arc<dyn SandboxProvider>,
        store: Arc<dyn Store>,
        bus: EventBus,
        github: Arc<GitHubClient>,
    ) -> Self {
        let artifacts = ArtifactFileStore::new(
            config.artifacts_dir.clone(),
            config.max_artifact_size_bytes(),
        );
        Self {
            session_id,
            run_id: Arc::new(StdMutex::new(run_id)),
            config,
            llm,
            sandbox_provider,
            store,
            bus,
            artifacts,
            github,
            sandbox: Mutex::new(None),
            agent: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run id of the current invocation.
    pub fn run_id(&self) -> String {
        self.run_id.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Interrupt the in-flight run: flag the runner, stop the agent loop,
    /// and tear down the sandbox so any long-running command fails fast.
    pub async fn request_interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.emit_live("orchestrator", EventType::StatusChange, json!({"status": "interrupt_requested"}));

        if let Some(agent) = self.agent.lock().await.as_ref() {
            agent.interrupt();
        }
        if let Some(sandbox) = self.sandbox.lock().await.as_ref() {
            if let Err(e) = self.sandbox_provider.destroy(sandbox).await {
                warn!("failed to destroy sandbox during interrupt: {}", e);
            }
        }
    }

    fn emit_live(&self, role: &str, kind: EventType, data: Value) {
        let event = AgentEvent::new(role, kind, data);
        self.bus.publish(&self.session_id, event.to_wire());
    }

    async fn persist_event(&self, role: &str, kind: EventType, data: Value) {
        let event = AgentEvent::new(role, kind, data);
        if let Err(e) = self.store.insert_events(&self.run_id(), &[event]).await {
            error!("failed to persist event: {}", e);
        }
    }

    /// Initial run: allocate the sandbox, build the orchestrator, pump its
    /// loop, persist everything it produced.
    pub async fn run(self: &Arc<Self>, repo_url: &str, prompt: &str) -> RunOutcome {
        let outcome = match self.run_inner(repo_url, prompt).await {
            Ok(outcome) => outcome,
            Err(e) => self.wind_down_failure(e).await,
        };
        self.finished.store(true, Ordering::SeqCst);
        outcome
    }

    async fn run_inner(
        self: &Arc<Self>,
        repo_url: &str,
        prompt: &str,
    ) -> Result<RunOutcome, ControllerError> {
        self.store
            .update_run_status(&self.run_id(), RunStatus::Running)
            .await?;
        self.store
            .update_session_status(&self.session_id, SessionStatus::Running)
            .await?;
        self.emit_live("orchestrator", EventType::StatusChange, json!({"status": "starting"}));

        self.emit_live("orchestrator", EventType::StatusChange, json!({"status": "cloning_repo"}));
        let token = if self.config.github_token.is_empty() {
            None
        } else {
            Some(self.config.github_token.as_str())
        };
        let mut sandbox = self.sandbox_provider.create(repo_url, token).await?;

        // Inject host secrets into the sandbox environment.
        if !self.config.github_token.is_empty() {
            sandbox
                .env
                .insert("GITHUB_TOKEN".to_string(), self.config.github_token.clone());
        }
        if !self.config.anthropic_api_key.is_empty() {
            sandbox.env.insert(
                "ANTHROPIC_API_KEY".to_string(),
                self.config.anthropic_api_key.clone(),
            );
        }
        let sandbox = Arc::new(sandbox);
        *self.sandbox.lock().await = Some(sandbox.clone());

        let callback = self.event_callback();
        let sink: Arc<dyn ArtifactSink> = Arc::new(RunnerArtifactSink {
            artifacts: self.artifacts.clone(),
            store: self.store.clone(),
            run_id: self.run_id.clone(),
        });

        let agent = build_orchestrator(
            self.llm.clone(),
            self.sandbox_provider.clone(),
            sandbox,
            repo_url,
            self.github.clone(),
            Some(callback),
            Some(sink),
        );
        *self.agent.lock().await = Some(agent.clone());

        let output = agent
            .run(json!({"prompt": prompt, "repo_url": repo_url}))
            .await?;

        self.finish_run(output, "changes").await
    }

    /// Follow-up: resume the stored agent over the same sandbox, under a
    /// fresh run id created by the controller for this invocation.
    pub async fn continue_run(self: &Arc<Self>, run_id: String, user_message: &str) -> RunOutcome {
        self.finished.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.run_id.lock() {
            *slot = run_id;
        }
        let outcome = match self.continue_inner(user_message).await {
            Ok(outcome) => outcome,
            Err(e) => self.wind_down_failure(e).await,
        };
        self.finished.store(true, Ordering::SeqCst);
        outcome
    }

    async fn continue_inner(
        self: &Arc<Self>,
        user_message: &str,
    ) -> Result<RunOutcome, ControllerError> {
        let agent = self
            .agent
            .lock()
            .await
            .clone()
            .ok_or_else(|| ControllerError::NoActiveAgent(self.session_id.clone()))?;

        self.store
            .update_run_status(&self.run_id(), RunStatus::Running)
            .await?;
        self.store
            .update_session_status(&self.session_id, SessionStatus::Running)
            .await?;

        self.emit_live("orchestrator", EventType::StatusChange, json!({"status": "running"}));
        self.emit_live("user", EventType::UserMessage, json!({"content": user_message}));
        self.persist_event("user", EventType::UserMessage, json!({"content": user_message}))
            .await;

        let output = agent.resume(user_message).await?;

        self.finish_run(output, "changes_followup").await
    }

    /// Common tail of both run paths: persist the event batch, record the
    /// diff artifact, copy PR info onto the run, transition statuses.
    async fn finish_run(
        &self,
        output: AgentOutput,
        diff_name: &str,
    ) -> Result<RunOutcome, ControllerError> {
        let run_id = self.run_id();
        self.store.insert_events(&run_id, &output.events).await?;

        let was_interrupted = self.interrupted.load(Ordering::SeqCst)
            || output.result["status"] == json!("interrupted");

        if was_interrupted {
            self.persist_event(
                "orchestrator",
                EventType::StatusChange,
                json!({"status": "interrupted"}),
            )
            .await;
            self.emit_live(
                "orchestrator",
                EventType::StatusChange,
                json!({"status": "interrupted"}),
            );
            self.store
                .update_run_status(&run_id, RunStatus::Completed)
                .await?;
            self.store
                .update_session_status(&self.session_id, SessionStatus::Completed)
                .await?;
            info!("run {} interrupted", run_id);
            return Ok(RunOutcome::interrupted());
        }

        if let Some(diff) = self.current_diff().await {
            if !diff.is_empty() {
                let metadata = json!({"summary": output.result["summary"].as_str().unwrap_or("")});
                match self
                    .artifacts
                    .save(
                        &run_id,
                        ArtifactKind::Diff,
                        diff_name,
                        diff.as_bytes(),
                        Some(metadata),
                    )
                    .await
                {
                    Ok(record) => self.store.insert_artifact(&record).await?,
                    Err(e) => warn!("failed to save diff artifact: {}", e),
                }
            }
        }

        let pr_url = output.result["pr_url"].as_str().map(String::from);
        let pr_number = output.result["pr_number"].as_u64();
        if pr_url.is_some() || pr_number.is_some() {
            self.store
                .set_run_pr(&run_id, pr_url.clone(), pr_number)
                .await?;
        }

        if output.result["error"] == json!("max_iterations_reached") {
            self.store
                .update_run_status(&run_id, RunStatus::Failed)
                .await?;
            self.store
                .update_session_status(&self.session_id, SessionStatus::Failed)
                .await?;
            return Ok(RunOutcome::failed("max_iterations_reached".to_string()));
        }

        self.store
            .update_run_status(&run_id, RunStatus::Completed)
            .await?;
        self.store
            .update_session_status(&self.session_id, SessionStatus::Completed)
            .await?;
        self.emit_live("orchestrator", EventType::StatusChange, json!({"status": "completed"}));
        info!("run {} completed", run_id);

        Ok(RunOutcome::completed(&output.result))
    }

    /// Failure tail: demote to a clean interrupted terminal when the
    /// interrupt was requested, otherwise record the failure.
    async fn wind_down_failure(&self, e: ControllerError) -> RunOutcome {
        let run_id = self.run_id();
        if self.interrupted.load(Ordering::SeqCst) {
            self.emit_live(
                "orchestrator",
                EventType::StatusChange,
                json!({"status": "interrupted"}),
            );
            self.persist_event(
                "orchestrator",
                EventType::StatusChange,
                json!({"status": "interrupted"}),
            )
            .await;
            let _ = self
                .store
                .update_run_status(&run_id, RunStatus::Completed)
                .await;
            let _ = self
                .store
                .update_session_status(&self.session_id, SessionStatus::Completed)
                .await;
            return RunOutcome::interrupted();
        }

        error!("run {} failed: {}", run_id, e);
        self.emit_live("orchestrator", EventType::Error, json!({"message": e.to_string()}));
        self.persist_event("orchestrator", EventType::Error, json!({"message": e.to_string()}))
            .await;
        let _ = self
            .store
            .update_run_status(&run_id, RunStatus::Failed)
            .await;
        let _ = self
            .store
            .update_session_status(&self.session_id, SessionStatus::Failed)
            .await;
        RunOutcome::failed(e.to_string())
    }

    fn event_callback(&self) -> EventCallback {
        let bus = self.bus.clone();
        let session_id = self.session_id.clone();
        Arc::new(move |event: AgentEvent| {
            bus.publish(&session_id, event.to_wire());
        })
    }

    async fn current_diff(&self) -> Option<String> {
        let sandbox = self.sandbox.lock().await.clone()?;
        match self
            .sandbox_provider
            .run_command(&sandbox, "git diff HEAD", DIFF_TIMEOUT)
            .await
        {
            Ok(output) => Some(output.stdout),
            Err(e) => {
                warn!("diff collection failed: {}", e);
                None
            }
        }
    }
}

/// Bridges screenshot bytes from inside a tool to the artifact store and the
/// durable record. Shares the runner's run-id cell so captures made during a
/// follow-up land on that follow-up's run.
struct RunnerArtifactSink {
    artifacts: ArtifactFileStore,
    store: Arc<dyn Store>,
    run_id: Arc<StdMutex<String>>,
}

#[async_trait::async_trait]
impl ArtifactSink for RunnerArtifactSink {
    async fn save(
        &self,
        kind: ArtifactKind,
        name: &str,
        bytes: &[u8],
        metadata: Option<Value>,
    ) -> Result<String, String> {
        let run_id = self.run_id.lock().map(|r| r.clone()).unwrap_or_default();
        let record = self
            .artifacts
            .save(&run_id, kind, name, bytes, metadata)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .insert_artifact(&record)
            .await
            .map_err(|e| e.to_string())?;
        Ok(record.id)
    }
}
