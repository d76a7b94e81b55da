//! Patchwright — autonomous coding-agent runtime
//!
//! Given a repository URL and a prompt, Patchwright runs a hierarchical team
//! of LLM-driven agents (orchestrator → implementer/verifier) inside a
//! sandboxed clone of the repo, streams structured events to subscribers,
//! persists runs/events/artifacts, and proposes changes as pull requests.
//!
//! This crate is a facade over the workspace members:
//! - [`patchwright_core`] — shared types and configuration
//! - [`patchwright_llm`] — decision-maker protocol and client
//! - [`patchwright_sandbox`] — isolated workspaces (local and container)
//! - [`patchwright_tools`] — the tool trait and sandbox-bound tools
//! - [`patchwright_agent`] — the agent loop and the three agent roles
//! - [`patchwright_session`] — session/run lifecycle and the event bus

pub use patchwright_agent as agent;
pub use patchwright_llm as llm;
pub use patchwright_sandbox as sandbox;
pub use patchwright_session as session;
pub use patchwright_tools as tools;

pub use patchwright_core::{Config, SessionStatus};
pub use patchwright_llm::AnthropicProvider;
pub use patchwright_session::{init_tracing, MemoryStore, SessionController};
