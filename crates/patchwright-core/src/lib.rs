//! Core types shared across the Patchwright workspace

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::{
    new_id, AgentEvent, ArtifactKind, ArtifactRecord, EventType, MessageRecord, MessageRole,
    RunRecord, RunStatus, SessionRecord, SessionStatus, StoredEvent,
};
