//! Verifier agent — read-only command execution plus screenshot capture

use crate::executor::{AgentExecutor, AgentState};
use patchwright_llm::LlmProvider;
use patchwright_sandbox::{Sandbox, SandboxProvider};
use patchwright_tools::{
    ArtifactSink, CommandPolicy, RunCommandTool, ScreenshotTool, ToolRegistry,
};
use std::sync::Arc;
use std::time::Duration;

const VERIFIER_MAX_ITERATIONS: usize = 10;
const VERIFY_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Version-control mutations and hosting-API invocations the verifier must
/// never execute. Matched against the trimmed, lowercased command.
const FORBIDDEN_COMMAND_PATTERNS: &[&str] = &[
    r"(^|\s)git\s",
    r"gh\s",
    r"gitkraken",
    r"commit",
    r"push",
    r"create\s+pr",
];

const SAFETY_BANNER: &str =
    "Verifier safety policy: git/PR/push commands are not allowed during verification.";

/// Sub-agent spawned by the orchestrator to verify changes.
pub fn build_verifier(
    llm: Arc<dyn LlmProvider>,
    sandbox_provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    install_command: Option<&str>,
    test_command: Option<&str>,
    verification_goal: Option<&str>,
    artifact_sink: Option<Arc<dyn ArtifactSink>>,
) -> Arc<AgentExecutor> {
    let state = Arc::new(AgentState::new());

    let mut tools = ToolRegistry::new();
    tools.register(
        RunCommandTool::new(sandbox_provider.clone(), sandbox.clone())
            .with_description("Run a verification command (install, test, build, lint).")
            .with_timeout(VERIFY_COMMAND_TIMEOUT)
            .with_policy(CommandPolicy::new(FORBIDDEN_COMMAND_PATTERNS, SAFETY_BANNER)),
    );
    tools.register(ScreenshotTool::new(sandbox_provider, sandbox, artifact_sink));

    Arc::new(AgentExecutor::new(
        "verifier",
        verifier_prompt(install_command, test_command, verification_goal),
        llm,
        tools,
        state,
        VERIFIER_MAX_ITERATIONS,
    ))
}

fn verifier_prompt(
    install_command: Option<&str>,
    test_command: Option<&str>,
    verification_goal: Option<&str>,
) -> String {
    let mut cmds = Vec::new();
    if let Some(install) = install_command {
        cmds.push(format!("- Install: {}", install));
    }
    if let Some(test) = test_command {
        cmds.push(format!("- Test: {}", test));
    }
    let cmd_text = if cmds.is_empty() {
        "No specific commands provided. Try common ones (npm test, pytest, make test).".to_string()
    } else {
        cmds.join("\n")
    };

    let goal_text = verification_goal
        .unwrap_or("No explicit user visual intent provided. Validate behavior from task context.");

    format!(
        r#"You are a Verifier agent. Run commands to check that code changes work.

Commands to run:
{cmd_text}

User's intended outcome to verify against:
{goal_text}

Steps:
1. Establish install commands deterministically from repository manifests unless install_command is explicitly provided.
    - Use lockfiles/manifests in priority order: `pnpm-lock.yaml` -> `pnpm install --frozen-lockfile`; `yarn.lock` -> `yarn install --frozen-lockfile`; `package-lock.json` -> `npm ci`; `package.json` -> `npm install`; `requirements.txt` -> `pip install -r requirements.txt`; `pyproject.toml` -> `pip install -e .`.
    - Handle repo subdirectories (`frontend/`, `backend/`) when manifests are there.
2. Run the install command(s).
3. Run the test command if specified, else infer from manifests (`npm test`, `pytest`, etc.) and execute.
4. Proactively determine if browser verification is needed. If frontend indicators exist (e.g., `frontend/`, `package.json`, `vite.config`, `next.config`, `src/` UI code, HTML/CSS/TSX changes), you MUST run browser verification without waiting for additional user instruction.
5. For browser verification, start the app server in background, wait for readiness, and capture screenshots using `take_screenshot` for sensible default routes (`/`, and any obvious route in code).
6. Try common local ports if needed (5173, 3000, 8080) and continue on failure with clear evidence.
7. Compare screenshots against the user's intended outcome and explicitly state whether the visual result matches, partially matches, or does not match.
8. Report pass/fail with evidence.

Rules:
- Do NOT run any git/github commands (no add/commit/push/branch/pr).
- Do NOT modify product files. Only run verification commands and capture evidence.
- Keep verification generic across repos; do not assume specific frameworks unless command output confirms it.
- If browser verification is applicable, do not skip it just because the user did not explicitly request screenshots.
- Do NOT install arbitrary new packages unless required by repository manifests or required to run the repository's own declared commands.

Output valid JSON:
{{
  "passed": true/false,
  "test_summary": "brief summary of test results or visual verification",
  "failure_reason": null or "why it failed"
}}"#
    )
}
