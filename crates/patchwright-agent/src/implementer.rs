//! Implementer agent — file mutation under a task from the orchestrator

use crate::executor::{AgentExecutor, AgentState};
use patchwright_llm::LlmProvider;
use patchwright_sandbox::{Sandbox, SandboxProvider};
use patchwright_tools::{
    CreateFileTool, DeleteFileTool, ListDirectoryTool, ReadFileTool, RunCommandTool, ToolRegistry,
    WriteFileTool,
};
use std::sync::Arc;
use std::time::Duration;

const IMPLEMENTER_MAX_ITERATIONS: usize = 40;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Sub-agent spawned by the orchestrator to implement code changes. Shares
/// the orchestrator's sandbox; the task and pre-read context ride in the
/// system preamble.
pub fn build_implementer(
    llm: Arc<dyn LlmProvider>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    task: &str,
    context: &str,
) -> Arc<AgentExecutor> {
    let state = Arc::new(AgentState::new());

    let mut tools = ToolRegistry::new();
    tools.register(ReadFileTool::new(
        sandbox_provider.clone(),
        sandbox.clone(),
    ));
    tools.register(WriteFileTool::new(
        sandbox_provider.clone(),
        sandbox.clone(),
    ));
    tools.register(CreateFileTool::new(
        sandbox_provider.clone(),
        sandbox.clone(),
    ));
    tools.register(DeleteFileTool::new(
        sandbox_provider.clone(),
        sandbox.clone(),
    ));
    tools.register(
        RunCommandTool::new(sandbox_provider.clone(), sandbox.clone())
            .with_description("Run a shell command in the workspace.")
            .with_timeout(COMMAND_TIMEOUT),
    );
    tools.register(ListDirectoryTool::new(sandbox_provider, sandbox));

    Arc::new(AgentExecutor::new(
        "implementer",
        implementer_prompt(task, context),
        llm,
        tools,
        state,
        IMPLEMENTER_MAX_ITERATIONS,
    ))
}

fn implementer_prompt(task: &str, context: &str) -> String {
    format!(
        r#"You are an Implementer agent. You make code changes in a repository workspace.

Task from orchestrator:
{task}

Context (files already read by orchestrator):
{context}

Your job:
1. Read any additional files you need (the orchestrator already read some for you).
2. Write/create/modify files to accomplish the task.
3. Run commands to verify your changes compile/pass basic checks.

When done, output valid JSON:
{{
  "changed_files": ["list of modified files"],
  "created_files": ["list of new files"],
  "deleted_files": ["list of deleted files"],
  "summary": "what was changed and why"
}}

Write clean, production code. Handle edge cases."#
    )
}
