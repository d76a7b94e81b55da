//! Shell command tool with timeout, truncation, and an optional safety policy

use crate::registry::{Tool, ToolResult};
use patchwright_sandbox::{Sandbox, SandboxProvider};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const STDOUT_CAP: usize = 50_000;
const STDERR_CAP: usize = 10_000;

/// Command filter applied before anything is spawned. A match produces a
/// synthetic result with exit code 2 and the banner as stderr, so the
/// decision-maker can recover without the command ever running.
#[derive(Clone)]
pub struct CommandPolicy {
    patterns: Vec<Regex>,
    banner: String,
}

impl CommandPolicy {
    pub fn new(patterns: &[&str], banner: impl Into<String>) -> Self {
        Self {
            patterns: patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
            banner: banner.into(),
        }
    }

    /// Match against the trimmed, lowercased command.
    pub fn forbids(&self, command: &str) -> bool {
        let normalized = command.trim().to_lowercase();
        self.patterns.iter().any(|p| p.is_match(&normalized))
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }
}

pub struct RunCommandTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    description: String,
    timeout: Duration,
    policy: Option<CommandPolicy>,
}

impl RunCommandTool {
    pub fn new(provider: Arc<dyn SandboxProvider>, sandbox: Arc<Sandbox>) -> Self {
        Self {
            provider,
            sandbox,
            description:
                "Run a shell command in the repository workspace (read-only exploration, grep, find, etc.)."
                    .to_string(),
            timeout: Duration::from_secs(60),
            policy: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

#[async_trait::async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let command = match args["command"].as_str() {
            Some(c) => c,
            None => return ToolResult::error("Missing required parameter: command"),
        };

        if let Some(policy) = &self.policy {
            if policy.forbids(command) {
                warn!("command refused by policy: {}", command);
                return ToolResult::json(json!({
                    "exit_code": 2,
                    "stdout": "",
                    "stderr": policy.banner(),
                }));
            }
        }

        debug!("run_command: {}", &command[..command.len().min(120)]);
        match self
            .provider
            .run_command(&self.sandbox, command, self.timeout)
            .await
        {
            Ok(output) => ToolResult::json(json!({
                "exit_code": output.exit_code,
                "stdout": truncate(&output.stdout, STDOUT_CAP),
                "stderr": truncate(&output.stderr, STDERR_CAP),
            })),
            Err(e) => ToolResult::error(e),
        }
    }
}

fn truncate(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_matches_normalized_commands() {
        let policy = CommandPolicy::new(&[r"(^|\s)git\s", r"push"], "not allowed");
        assert!(policy.forbids("git status"));
        assert!(policy.forbids("  GIT push origin main"));
        assert!(policy.forbids("npm run push-release"));
        assert!(!policy.forbids("cargo test"));
        assert!(!policy.forbids("grep -r gitignore ."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate(s, 3);
        assert!(t.len() <= 3);
        assert!(s.starts_with(&t));
        assert_eq!(truncate("short", 100), "short");
    }
}
