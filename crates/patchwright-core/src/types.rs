//! Durable object shapes and event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fresh 32-char hex id for sessions, runs, and artifacts.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Diff,
    Log,
    Screenshot,
    Report,
}

impl ArtifactKind {
    /// File extension used by the on-disk artifact layout.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Diff => ".patch",
            Self::Log => ".log",
            Self::Screenshot => ".png",
            Self::Report => ".md",
        }
    }
}

/// Event categories emitted by agents and the session controller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentMessage,
    ToolCall,
    ToolResult,
    StatusChange,
    Error,
    UserMessage,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AgentMessage => "agent_message",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::StatusChange => "status_change",
            Self::Error => "error",
            Self::UserMessage => "user_message",
        };
        write!(f, "{}", s)
    }
}

/// A single structured event emitted while an agent runs.
///
/// `role` tags the emitter (orchestrator, implementer, verifier, user) so
/// nested agents stay attributable inside one totally-ordered stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEvent {
    pub role: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(role: impl Into<String>, kind: EventType, data: Value) -> Self {
        Self {
            role: role.into(),
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Wire form sent to subscribers: RFC 3339 UTC timestamp.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "role": self.role,
            "type": self.kind.to_string(),
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
        })
    }
}

// ── Durable records ─────────────────────────────────────────────────────────
//
// These are the shapes the core writes through the `Store` seam. The backing
// schema lives with the store implementation, not here.

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub repo_url: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(repo_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            repo_url: repo_url.into(),
            prompt: prompt.into(),
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub session_id: String,
    pub status: RunStatus,
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub merge_sha: Option<String>,
    pub merged_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            session_id: session_id.into(),
            status: RunStatus::Pending,
            pr_url: None,
            pr_number: None,
            merge_sha: None,
            merged_at: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }
}

/// Persisted event: the store assigns the monotonic id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub run_id: String,
    pub role: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl StoredEvent {
    /// Replay form: wire shape plus the `replayed` tag.
    pub fn to_replay_wire(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "role": self.role,
            "type": self.kind.to_string(),
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
            "replayed": true,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub run_id: String,
    pub kind: ArtifactKind,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// Conversation message spanning a session's runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_32_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn event_type_display_matches_serde() {
        for kind in [
            EventType::AgentMessage,
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::StatusChange,
            EventType::Error,
            EventType::UserMessage,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str().unwrap(), kind.to_string());
        }
    }

    #[test]
    fn artifact_extensions() {
        assert_eq!(ArtifactKind::Diff.extension(), ".patch");
        assert_eq!(ArtifactKind::Screenshot.extension(), ".png");
        assert_eq!(ArtifactKind::Report.extension(), ".md");
        assert_eq!(ArtifactKind::Log.extension(), ".log");
    }

    #[test]
    fn agent_event_wire_shape() {
        let event = AgentEvent::new(
            "orchestrator",
            EventType::StatusChange,
            serde_json::json!({"status": "starting"}),
        );
        let wire = event.to_wire();
        assert_eq!(wire["role"], "orchestrator");
        assert_eq!(wire["type"], "status_change");
        assert_eq!(wire["data"]["status"], "starting");
        assert!(wire["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn replay_wire_is_tagged() {
        let stored = StoredEvent {
            id: 7,
            run_id: "r1".into(),
            role: "verifier".into(),
            kind: EventType::ToolCall,
            data: serde_json::json!({"tool": "run_command"}),
            timestamp: Utc::now(),
        };
        let wire = stored.to_replay_wire();
        assert_eq!(wire["replayed"], true);
        assert_eq!(wire["id"], 7);
    }
}
