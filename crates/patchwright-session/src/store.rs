//! Durable-store seam
//!
//! The core only names the objects it writes; the backing schema belongs to
//! the store adapter behind this trait.

use chrono::{DateTime, Utc};
use patchwright_core::{
    AgentEvent, ArtifactRecord, MessageRole, RunRecord, RunStatus, SessionRecord, SessionStatus,
    StoredEvent,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Writes performed by the core, plus the reads replay needs. One scoped
/// call per persistence step; nothing is held across decision-maker calls.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn insert_session(&self, session: &SessionRecord) -> StoreResult<()>;

    async fn get_session(&self, session_id: &str) -> StoreResult<SessionRecord>;

    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<()>;

    async fn insert_run(&self, run: &RunRecord) -> StoreResult<()>;

    /// Terminal statuses also stamp `finished_at`.
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> StoreResult<()>;

    async fn set_run_pr(
        &self,
        run_id: &str,
        pr_url: Option<String>,
        pr_number: Option<u64>,
    ) -> StoreResult<()>;

    async fn set_run_merge(
        &self,
        run_id: &str,
        sha: Option<String>,
        merged_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn latest_run(&self, session_id: &str) -> StoreResult<Option<RunRecord>>;

    /// Persist a batch of events for a run, assigning monotonic ids in
    /// emission order. Returns the assigned ids.
    async fn insert_events(&self, run_id: &str, events: &[AgentEvent]) -> StoreResult<Vec<i64>>;

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> StoreResult<()>;

    async fn insert_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> StoreResult<i64>;

    /// All persisted events across the session's runs, ordered by id.
    async fn events_for_session(&self, session_id: &str) -> StoreResult<Vec<StoredEvent>>;
}
