//! In-memory store — the in-process durable-store writer used by tests and
//! single-node deployments without a database

use crate::store::{Store, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use patchwright_core::{
    AgentEvent, ArtifactRecord, MessageRecord, MessageRole, RunRecord, RunStatus, SessionRecord,
    SessionStatus, StoredEvent,
};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    runs: Vec<RunRecord>,
    events: Vec<StoredEvent>,
    artifacts: Vec<ArtifactRecord>,
    messages: Vec<MessageRecord>,
    next_event_id: i64,
    next_message_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }

    pub fn artifacts(&self) -> Vec<ArtifactRecord> {
        self.lock().map(|i| i.artifacts.clone()).unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.lock().map(|i| i.messages.clone()).unwrap_or_default()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.lock().map(|i| i.runs.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn insert_session(&self, session: &SessionRecord) -> StoreResult<()> {
        self.lock()?
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<SessionRecord> {
        self.lock()?
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.lock()?.runs.push(run.clone());
        Ok(())
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        run.status = status;
        if matches!(status, RunStatus::Completed | RunStatus::Failed) {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_run_pr(
        &self,
        run_id: &str,
        pr_url: Option<String>,
        pr_number: Option<u64>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        run.pr_url = pr_url;
        run.pr_number = pr_number;
        Ok(())
    }

    async fn set_run_merge(
        &self,
        run_id: &str,
        sha: Option<String>,
        merged_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        run.merge_sha = sha;
        run.merged_at = Some(merged_at);
        Ok(())
    }

    async fn latest_run(&self, session_id: &str) -> StoreResult<Option<RunRecord>> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .filter(|r| r.session_id == session_id)
            .last()
            .cloned())
    }

    async fn insert_events(&self, run_id: &str, events: &[AgentEvent]) -> StoreResult<Vec<i64>> {
        let mut inner = self.lock()?;
        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            inner.next_event_id += 1;
            let id = inner.next_event_id;
            inner.events.push(StoredEvent {
                id,
                run_id: run_id.to_string(),
                role: event.role.clone(),
                kind: event.kind,
                data: event.data.clone(),
                timestamp: event.timestamp,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_artifact(&self, artifact: &ArtifactRecord) -> StoreResult<()> {
        self.lock()?.artifacts.push(artifact.clone());
        Ok(())
    }

    async fn insert_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> StoreResult<i64> {
        let mut inner = self.lock()?;
        inner.next_message_id += 1;
        let id = inner.next_message_id;
        inner.messages.push(MessageRecord {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn events_for_session(&self, session_id: &str) -> StoreResult<Vec<StoredEvent>> {
        let inner = self.lock()?;
        let run_ids: Vec<&str> = inner
            .runs
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.id.as_str())
            .collect();
        let mut events: Vec<StoredEvent> = inner
            .events
            .iter()
            .filter(|e| run_ids.contains(&e.run_id.as_str()))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }
}
