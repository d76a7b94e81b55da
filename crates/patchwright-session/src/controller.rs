//! Session controller — registries of live runners, run triggering,
//! follow-ups, interruption, and merges

use crate::bus::{EventBus, Subscription};
use crate::runner::SessionRunner;
use crate::store::{Store, StoreError};
use dashmap::DashMap;
use patchwright_agent::{extract_repo_full_name, AgentError, GitHubClient};
use patchwright_core::{Config, MessageRole, RunRecord, SessionRecord};
use patchwright_llm::LlmProvider;
use patchwright_sandbox::{ContainerSandbox, LocalSandbox, SandboxError, SandboxProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no active agent session: {0}")]
    NoActiveAgent(String),

    #[error("no pull request to merge for session: {0}")]
    NoPullRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Core(#[from] patchwright_core::Error),
}

/// Process-wide owner of live sessions. Each session id maps to at most one
/// running task and, after a completed run, a kept-alive runner whose agent
/// and sandbox serve follow-up messages.
pub struct SessionController {
    config: Config,
    llm: Arc<dyn LlmProvider>,
    store: Arc<dyn Store>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    github: Arc<GitHubClient>,
    bus: EventBus,
    active: Arc<DashMap<String, Arc<SessionRunner>>>,
    running: Arc<DashMap<String, Arc<SessionRunner>>>,
    tasks: Arc<DashMap<String, JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(config: Config, llm: Arc<dyn LlmProvider>, store: Arc<dyn Store>) -> Self {
        let sandbox_provider: Arc<dyn SandboxProvider> = if config.use_container {
            Arc::new(ContainerSandbox::new(
                config.container_image.clone(),
                config.docker_host.clone(),
            ))
        } else {
            Arc::new(LocalSandbox::new())
        };
        let github = Arc::new(GitHubClient::new(config.github_token.clone()));
        Self {
            config,
            llm,
            store,
            sandbox_provider,
            github,
            bus: EventBus::new(),
            active: Arc::new(DashMap::new()),
            running: Arc::new(DashMap::new()),
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Swap the sandbox backend (tests, embedders).
    pub fn with_sandbox_provider(mut self, provider: Arc<dyn SandboxProvider>) -> Self {
        self.sandbox_provider = provider;
        self
    }

    /// Swap the hosting client (tests point this at a stub server).
    pub fn with_github(mut self, github: Arc<GitHubClient>) -> Self {
        self.github = github;
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn create_session(
        &self,
        repo_url: &str,
        prompt: &str,
    ) -> Result<SessionRecord, ControllerError> {
        let session = SessionRecord::new(repo_url, prompt);
        self.store.insert_session(&session).await?;
        info!("session {} created for {}", session.id, repo_url);
        Ok(session)
    }

    /// Start a run for the session's stored prompt. Returns the run id
    /// immediately; the run itself proceeds on a background task.
    pub async fn start_run(&self, session_id: &str) -> Result<String, ControllerError> {
        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(|_| ControllerError::SessionNotFound(session_id.to_string()))?;

        let run = RunRecord::new(session_id);
        self.store.insert_run(&run).await?;

        let runner = Arc::new(SessionRunner::new(
            session_id.to_string(),
            run.id.clone(),
            self.config.clone(),
            self.llm.clone(),
            self.sandbox_provider.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.github.clone(),
        ));
        self.running.insert(session_id.to_string(), runner.clone());
        self.spawn_deadline_watchdog(runner.clone(), run.id.clone());

        let store = self.store.clone();
        let active = self.active.clone();
        let running = self.running.clone();
        let session_key = session_id.to_string();
        let task_runner = runner;

        let handle = tokio::spawn(async move {
            let outcome = task_runner
                .run(&session.repo_url, &session.prompt)
                .await;
            running.remove(&session_key);
            if outcome.status == "completed" {
                // Keep the agent and sandbox alive for follow-ups.
                active.insert(session_key.clone(), task_runner);
                if let Some(summary) = outcome.summary.filter(|s| !s.trim().is_empty()) {
                    if let Err(e) = store
                        .insert_message(&session_key, MessageRole::Agent, &summary)
                        .await
                    {
                        warn!("failed to save agent message: {}", e);
                    }
                }
            }
        });
        self.tasks.insert(session_id.to_string(), handle);

        Ok(run.id)
    }

    /// Send a follow-up message into the kept-alive agent conversation.
    /// Each follow-up gets its own run record; returns the new run id.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<String, ControllerError> {
        self.store
            .get_session(session_id)
            .await
            .map_err(|_| ControllerError::SessionNotFound(session_id.to_string()))?;
        self.store
            .insert_message(session_id, MessageRole::User, content)
            .await?;

        let runner = self
            .active
            .get(session_id)
            .map(|r| r.clone())
            .ok_or_else(|| ControllerError::NoActiveAgent(session_id.to_string()))?;

        let run = RunRecord::new(session_id);
        self.store.insert_run(&run).await?;

        self.running.insert(session_id.to_string(), runner.clone());
        self.spawn_deadline_watchdog(runner.clone(), run.id.clone());

        let store = self.store.clone();
        let running = self.running.clone();
        let session_key = session_id.to_string();
        let message = content.to_string();
        let run_id = run.id.clone();

        let handle = tokio::spawn(async move {
            let outcome = runner.continue_run(run_id, &message).await;
            running.remove(&session_key);
            if outcome.status == "completed" {
                if let Some(summary) = outcome.summary.filter(|s| !s.trim().is_empty()) {
                    if let Err(e) = store
                        .insert_message(&session_key, MessageRole::Agent, &summary)
                        .await
                    {
                        warn!("failed to save agent message: {}", e);
                    }
                }
            }
        });
        self.tasks.insert(session_id.to_string(), handle);

        Ok(run.id)
    }

    /// Interrupt the session's in-flight run. Returns false when nothing is
    /// running. Terminal statuses land within one decision-maker round-trip
    /// plus one tool timeout.
    pub async fn interrupt(&self, session_id: &str) -> bool {
        // Clone out of the map before awaiting; the shard guard must not be
        // held across request_interrupt.
        let runner = self.running.get(session_id).map(|r| r.clone());
        match runner {
            Some(runner) => {
                runner.request_interrupt().await;
                true
            }
            None => false,
        }
    }

    /// Merge the latest run's pull request and record the outcome.
    pub async fn merge_latest(&self, session_id: &str) -> Result<Value, ControllerError> {
        let run = self
            .store
            .latest_run(session_id)
            .await?
            .ok_or_else(|| ControllerError::NoPullRequest(session_id.to_string()))?;
        let pr_number = run
            .pr_number
            .ok_or_else(|| ControllerError::NoPullRequest(session_id.to_string()))?;

        let session = self
            .store
            .get_session(session_id)
            .await
            .map_err(|_| ControllerError::SessionNotFound(session_id.to_string()))?;
        let repo_full_name = extract_repo_full_name(&session.repo_url)?;

        let result = self.github.merge_pull(&repo_full_name, pr_number).await?;
        self.store
            .set_run_merge(
                &run.id,
                result["sha"].as_str().map(String::from),
                chrono::Utc::now(),
            )
            .await?;

        Ok(json!({"merged": result["merged"], "sha": result["sha"]}))
    }

    /// Persisted events for the session, in wire form tagged `replayed`.
    pub async fn replay_events(&self, session_id: &str) -> Result<Vec<Value>, ControllerError> {
        let events = self.store.events_for_session(session_id).await?;
        Ok(events.iter().map(|e| e.to_replay_wire()).collect())
    }

    /// Live subscription to the session's event stream. Callers wanting the
    /// full picture read `replay_events` first, then poll this.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        self.bus.subscribe(session_id)
    }

    /// Await the session's in-flight background task, if any.
    pub async fn wait_for_idle(&self, session_id: &str) {
        if let Some((_, handle)) = self.tasks.remove(session_id) {
            let _ = handle.await;
        }
    }

    /// Overruns of the configured deadline take the interrupt path, leaving
    /// a clean resumable terminal instead of a failure. The watchdog is
    /// armed per invocation and stands down if a later run has taken over.
    fn spawn_deadline_watchdog(&self, runner: Arc<SessionRunner>, guarded_run: String) {
        let deadline = Duration::from_secs(self.config.max_runtime_seconds.max(1));
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if !runner.is_finished() && runner.run_id() == guarded_run {
                warn!(
                    "run {} exceeded {}s deadline, interrupting",
                    guarded_run,
                    deadline.as_secs()
                );
                runner.request_interrupt().await;
            }
        });
    }
}
