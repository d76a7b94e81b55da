//! Agent executor and the three agent roles
//!
//! `AgentExecutor` is the generic conversational loop; the factories in
//! `orchestrator`, `implementer`, and `verifier` specialize it with a tool
//! set and a system preamble. `hosting` is the repository-hosting adapter
//! the orchestrator's git/PR tools drive.

pub mod executor;
pub mod hosting;
pub mod implementer;
pub mod orchestrator;
pub mod parse;
pub mod verifier;

pub use executor::{
    AgentError, AgentExecutor, AgentOutput, AgentResult, AgentState, CompleteTool, EventCallback,
};
pub use hosting::{extract_repo_full_name, GitHubClient};
pub use implementer::build_implementer;
pub use orchestrator::build_orchestrator;
pub use parse::parse_final_text;
pub use verifier::build_verifier;
