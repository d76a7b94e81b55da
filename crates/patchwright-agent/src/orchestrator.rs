//! Orchestrator agent — decides the workflow and delegates
//!
//! Direct tools explore the repo and drive git/GitHub; agent tools spawn the
//! implementer and verifier over the same sandbox, inheriting the parent's
//! event callback so nested events land in one ordered stream.

use crate::executor::{AgentExecutor, AgentState, CompleteTool, EventCallback};
use crate::hosting::{self, extract_repo_full_name, GitHubClient};
use crate::implementer::build_implementer;
use crate::verifier::build_verifier;
use patchwright_llm::LlmProvider;
use patchwright_sandbox::{Sandbox, SandboxProvider};
use patchwright_tools::{
    ArtifactSink, ListDirectoryTool, ReadFileTool, RunCommandTool, Tool, ToolRegistry, ToolResult,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const ORCHESTRATOR_MAX_ITERATIONS: usize = 60;
const EXPLORATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the main orchestrator agent with its full tool set.
#[allow(clippy::too_many_arguments)]
pub fn build_orchestrator(
    llm: Arc<dyn LlmProvider>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    repo_url: &str,
    github: Arc<GitHubClient>,
    event_callback: Option<EventCallback>,
    artifact_sink: Option<Arc<dyn ArtifactSink>>,
) -> Arc<AgentExecutor> {
    let state = Arc::new(AgentState::new());

    let mut tools = ToolRegistry::new();

    // Exploration
    tools.register(ReadFileTool::new(
        sandbox_provider.clone(),
        sandbox.clone(),
    ));
    tools.register(ListDirectoryTool::new(
        sandbox_provider.clone(),
        sandbox.clone(),
    ));
    tools.register(
        RunCommandTool::new(sandbox_provider.clone(), sandbox.clone())
            .with_timeout(EXPLORATION_TIMEOUT),
    );

    // Sub-agents
    tools.register(RunImplementerTool {
        llm: llm.clone(),
        sandbox_provider: sandbox_provider.clone(),
        sandbox: sandbox.clone(),
        event_callback: event_callback.clone(),
    });
    tools.register(RunVerifierTool {
        llm: llm.clone(),
        sandbox_provider: sandbox_provider.clone(),
        sandbox: sandbox.clone(),
        event_callback: event_callback.clone(),
        artifact_sink,
    });

    // Repository ops
    tools.register(CreateBranchTool {
        sandbox_provider: sandbox_provider.clone(),
        sandbox: sandbox.clone(),
    });
    tools.register(CommitAndPushTool {
        sandbox_provider: sandbox_provider.clone(),
        sandbox: sandbox.clone(),
    });
    tools.register(CreatePrTool {
        sandbox_provider,
        sandbox,
        github,
        repo_url: repo_url.to_string(),
    });

    // Meta
    tools.register(CompleteTool::new(state.clone()));

    let agent = Arc::new(AgentExecutor::new(
        "orchestrator",
        orchestrator_prompt(repo_url),
        llm,
        tools,
        state,
        ORCHESTRATOR_MAX_ITERATIONS,
    ));
    if let Some(callback) = event_callback {
        agent.on_event(callback);
    }
    agent
}

// ── Sub-agent tools ─────────────────────────────────────────────────────────

struct RunImplementerTool {
    llm: Arc<dyn LlmProvider>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    event_callback: Option<EventCallback>,
}

#[async_trait::async_trait]
impl Tool for RunImplementerTool {
    fn name(&self) -> &str {
        "run_implementer"
    }

    fn description(&self) -> &str {
        "Spawn an implementer sub-agent to make code changes. Pass a clear task \
         description and any relevant file contents you've already read as context."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Detailed task description for the implementer"
                },
                "context": {
                    "type": "string",
                    "description": "File contents or other context the implementer needs",
                    "default": ""
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let task = match args["task"].as_str() {
            Some(t) => t,
            None => return ToolResult::error("Missing required parameter: task"),
        };
        let context = args["context"].as_str().unwrap_or("");

        let agent = build_implementer(
            self.llm.clone(),
            self.sandbox_provider.clone(),
            self.sandbox.clone(),
            task,
            context,
        );
        if let Some(callback) = &self.event_callback {
            agent.on_event(callback.clone());
        }

        match agent.run(json!({"task": task})).await {
            Ok(output) => ToolResult::json(output.result),
            Err(e) => ToolResult::error(e),
        }
    }
}

struct RunVerifierTool {
    llm: Arc<dyn LlmProvider>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    event_callback: Option<EventCallback>,
    artifact_sink: Option<Arc<dyn ArtifactSink>>,
}

#[async_trait::async_trait]
impl Tool for RunVerifierTool {
    fn name(&self) -> &str {
        "run_verifier"
    }

    fn description(&self) -> &str {
        "Spawn a verifier sub-agent to test changes and visual behavior against user intent."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "install_command": {
                    "type": "string",
                    "description": "Command to install dependencies (e.g. 'npm install')"
                },
                "test_command": {
                    "type": "string",
                    "description": "Command to run tests (e.g. 'pytest')"
                },
                "verification_goal": {
                    "type": "string",
                    "description": "What the final behavior/UI should look like from the user's perspective"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let install_command = args["install_command"].as_str();
        let test_command = args["test_command"].as_str();
        let verification_goal = args["verification_goal"].as_str();

        let agent = build_verifier(
            self.llm.clone(),
            self.sandbox_provider.clone(),
            self.sandbox.clone(),
            install_command,
            test_command,
            verification_goal,
            self.artifact_sink.clone(),
        );
        if let Some(callback) = &self.event_callback {
            agent.on_event(callback.clone());
        }

        let context = json!({
            "install_command": install_command,
            "test_command": test_command,
            "verification_goal": verification_goal,
        });
        match agent.run(context).await {
            Ok(output) => ToolResult::json(output.result),
            Err(e) => ToolResult::error(e),
        }
    }
}

// ── Repository ops ──────────────────────────────────────────────────────────

struct CreateBranchTool {
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

#[async_trait::async_trait]
impl Tool for CreateBranchTool {
    fn name(&self) -> &str {
        "create_branch"
    }

    fn description(&self) -> &str {
        "Create and checkout a new git branch."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "branch_name": {"type": "string"}
            },
            "required": ["branch_name"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let branch_name = match args["branch_name"].as_str() {
            Some(b) => b,
            None => return ToolResult::error("Missing required parameter: branch_name"),
        };
        match hosting::create_branch(self.sandbox_provider.as_ref(), &self.sandbox, branch_name)
            .await
        {
            Ok(result) => ToolResult::json(result),
            Err(e) => ToolResult::error(e),
        }
    }
}

struct CommitAndPushTool {
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
}

#[async_trait::async_trait]
impl Tool for CommitAndPushTool {
    fn name(&self) -> &str {
        "commit_and_push"
    }

    fn description(&self) -> &str {
        "Stage all changes, commit, and push to remote."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "Commit message"}
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let message = match args["message"].as_str() {
            Some(m) => m,
            None => return ToolResult::error("Missing required parameter: message"),
        };
        match hosting::commit_and_push(self.sandbox_provider.as_ref(), &self.sandbox, message)
            .await
        {
            Ok(result) => ToolResult::json(result),
            Err(e) => ToolResult::error(e),
        }
    }
}

struct CreatePrTool {
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    github: Arc<GitHubClient>,
    repo_url: String,
}

#[async_trait::async_trait]
impl Tool for CreatePrTool {
    fn name(&self) -> &str {
        "create_pr"
    }

    fn description(&self) -> &str {
        "Create a GitHub pull request."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "body": {
                    "type": "string",
                    "description": "PR body with description of changes"
                }
            },
            "required": ["title", "body"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let (title, body) = match (args["title"].as_str(), args["body"].as_str()) {
            (Some(t), Some(b)) => (t, b),
            _ => return ToolResult::error("Missing required parameters: title, body"),
        };
        let repo_full_name = match extract_repo_full_name(&self.repo_url) {
            Ok(name) => name,
            Err(e) => return ToolResult::error(e),
        };
        match hosting::create_pr(
            self.sandbox_provider.as_ref(),
            &self.sandbox,
            &self.github,
            &repo_full_name,
            title,
            body,
        )
        .await
        {
            Ok(result) => ToolResult::json(result),
            Err(e) => ToolResult::error(e),
        }
    }
}

fn orchestrator_prompt(repo_url: &str) -> String {
    format!(
        r#"You are Patchwright, an autonomous coding agent that works on GitHub repositories.

Repository: {repo_url}
The repo is cloned into your workspace. Use relative paths.

You have two types of capabilities:

**Direct tools** — you execute these yourself:
- read_file, list_directory, run_command: explore the codebase
- create_branch, commit_and_push, create_pr: push changes to GitHub
- complete: signal you're done

**Agent tools** — these spawn specialized sub-agents:
- run_implementer: spawns an agent with file write access to implement changes. Pass it a clear task + any file contents you've already read as context.
- run_verifier: spawns an agent to run install/test commands and report pass/fail.

## Workflow

Decide your workflow based on the user's request:

**For code changes** (add feature, fix bug, refactor):
1. Read relevant files to understand the codebase
2. Call run_implementer with a specific task + context
3. Call run_verifier with test commands; include verification_goal when UI/UX behavior is involved
4. Create a branch, commit, push, and create a PR
    - PR body MUST include a Visual Verification section.
    - If screenshots exist from verification, include screenshot evidence in the PR body using markdown image links to repo paths when available.
5. Call complete

**For read-only tasks** (explain, analyze, review):
1. Read relevant files
2. Call complete with your analysis as the summary

**For questions about the repo**:
1. Read what you need
2. Call complete with your answer

## Rules
- Do NOT call run_implementer for read-only tasks
- Do NOT create PRs if no files were changed
- For code changes with file edits, always perform git/GitHub flow (`create_branch` → `commit_and_push` → `create_pr`)
- PR descriptions for UI/front-end changes must contain visual verification evidence (routes checked, screenshot details, and image links when available)
- When calling run_implementer, pass the file contents you've already read as context so it doesn't re-read them
- Be efficient — don't read files you don't need
- ALWAYS use the native tools (`create_branch`, `commit_and_push`, `create_pr`) for git operations. Do NOT use `run_command` to execute `git` or `curl` against the GitHub API. This is strictly forbidden.
- Always call complete when done"#
    )
}
