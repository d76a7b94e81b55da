//! Repository-hosting adapter — git plumbing through the sandbox plus the
//! GitHub REST API for pull requests

use patchwright_core::{Error, Result};
use patchwright_sandbox::{Sandbox, SandboxProvider};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

const GITHUB_API_URL: &str = "https://api.github.com";
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

const COMMITTER_NAME: &str = "Patchwright Agent";
const COMMITTER_EMAIL: &str = "agent@patchwright.dev";

/// Extract `owner/repo` from a GitHub URL.
pub fn extract_repo_full_name(repo_url: &str) -> Result<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"github\.com[/:](.+?)(?:\.git)?$").ok())
        .as_ref()
        .ok_or_else(|| Error::Internal("repo URL pattern failed to compile".to_string()))?;
    re.captures(repo_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches('/').to_string())
        .ok_or_else(|| Error::hosting(format!("cannot parse repo name from URL: {}", repo_url)))
}

/// Create and check out a new branch in the sandbox clone.
pub async fn create_branch(
    provider: &dyn SandboxProvider,
    sandbox: &Sandbox,
    branch_name: &str,
) -> Result<Value> {
    let result = provider
        .run_command(
            sandbox,
            &format!("git checkout -b {}", branch_name),
            GIT_TIMEOUT,
        )
        .await
        .map_err(|e| Error::hosting(e.to_string()))?;
    if result.exit_code != 0 {
        return Err(Error::hosting(format!(
            "git checkout -b failed: {}",
            result.stderr
        )));
    }
    Ok(json!({"branch_name": branch_name, "status": "created"}))
}

/// Stage everything, commit, and push the current branch. Configures the
/// canonical committer identity first since fresh containers have none.
pub async fn commit_and_push(
    provider: &dyn SandboxProvider,
    sandbox: &Sandbox,
    message: &str,
) -> Result<Value> {
    let safe_message = message.replace('"', "\\\"");

    for cmd in [
        format!("git config user.email \"{}\"", COMMITTER_EMAIL),
        format!("git config user.name \"{}\"", COMMITTER_NAME),
    ] {
        let _ = provider.run_command(sandbox, &cmd, GIT_TIMEOUT).await;
    }

    for cmd in [
        "git add -A".to_string(),
        format!("git commit -m \"{}\"", safe_message),
    ] {
        let result = provider
            .run_command(sandbox, &cmd, GIT_TIMEOUT)
            .await
            .map_err(|e| Error::hosting(e.to_string()))?;
        if result.exit_code != 0 && !cmd.starts_with("git add") {
            return Err(Error::hosting(format!("{} failed: {}", cmd, result.stderr)));
        }
    }

    let branch = current_branch(provider, sandbox).await?;

    let push = provider
        .run_command(
            sandbox,
            &format!("git push -u origin {}", branch),
            GIT_TIMEOUT,
        )
        .await
        .map_err(|e| Error::hosting(e.to_string()))?;
    if push.exit_code != 0 {
        return Err(Error::hosting(format!("git push failed: {}", push.stderr)));
    }

    let sha = provider
        .run_command(sandbox, "git rev-parse HEAD", GIT_TIMEOUT)
        .await
        .map_err(|e| Error::hosting(e.to_string()))?
        .stdout
        .trim()
        .to_string();

    info!("pushed {} to origin/{}", sha, branch);
    Ok(json!({"commit_sha": sha, "branch": branch, "status": "pushed"}))
}

/// Open a pull request for the current branch against the repo's default
/// branch. The branch must exist on the remote; if it doesn't yet, one push
/// attempt is made before giving up.
pub async fn create_pr(
    provider: &dyn SandboxProvider,
    sandbox: &Sandbox,
    github: &GitHubClient,
    repo_full_name: &str,
    title: &str,
    body: &str,
) -> Result<Value> {
    let branch = current_branch(provider, sandbox).await?;

    let remote_check = provider
        .run_command(
            sandbox,
            &format!("git ls-remote --heads origin {}", branch),
            GIT_TIMEOUT,
        )
        .await
        .map_err(|e| Error::hosting(e.to_string()))?;
    if remote_check.stdout.trim().is_empty() {
        info!("branch {} not on remote, pushing before PR", branch);
        let push = provider
            .run_command(
                sandbox,
                &format!("git push -u origin {}", branch),
                GIT_TIMEOUT,
            )
            .await
            .map_err(|e| Error::hosting(e.to_string()))?;
        if push.exit_code != 0 {
            return Err(Error::hosting(format!(
                "branch {} is not on remote and push failed: {}",
                branch, push.stderr
            )));
        }
    }

    let base = github.default_branch(repo_full_name).await?;
    github
        .create_pull(repo_full_name, title, body, &branch, &base)
        .await
}

async fn current_branch(provider: &dyn SandboxProvider, sandbox: &Sandbox) -> Result<String> {
    let result = provider
        .run_command(sandbox, "git rev-parse --abbrev-ref HEAD", GIT_TIMEOUT)
        .await
        .map_err(|e| Error::hosting(e.to_string()))?;
    if result.exit_code != 0 {
        return Err(Error::hosting(format!(
            "could not determine current branch: {}",
            result.stderr
        )));
    }
    Ok(result.stdout.trim().to_string())
}

/// Thin GitHub REST client for the operations the runtime consumes.
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: GITHUB_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("github {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("authorization", format!("Bearer {}", self.token))
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "patchwright");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::hosting(e.to_string()))?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            let message = payload["message"].as_str().unwrap_or("unknown error");
            return Err(Error::hosting(format!("{}: {}", status, message)));
        }
        Ok(payload)
    }

    pub async fn default_branch(&self, repo_full_name: &str) -> Result<String> {
        let repo = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{}", repo_full_name),
                None,
            )
            .await?;
        repo["default_branch"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::hosting("repository has no default branch"))
    }

    pub async fn create_pull(
        &self,
        repo_full_name: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Value> {
        let pr = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{}/pulls", repo_full_name),
                Some(json!({"title": title, "body": body, "head": head, "base": base})),
            )
            .await?;
        Ok(json!({
            "pr_url": pr["html_url"],
            "pr_number": pr["number"],
            "status": "created",
        }))
    }

    pub async fn merge_pull(&self, repo_full_name: &str, pr_number: u64) -> Result<Value> {
        let result = self
            .request(
                reqwest::Method::PUT,
                &format!("/repos/{}/pulls/{}/merge", repo_full_name, pr_number),
                Some(json!({})),
            )
            .await?;
        Ok(json!({
            "merged": result["merged"],
            "sha": result["sha"],
            "message": result["message"],
        }))
    }

    pub async fn post_issue_comment(
        &self,
        repo_full_name: &str,
        pr_number: u64,
        body: &str,
    ) -> Result<()> {
        self.request(
            reqwest::Method::POST,
            &format!("/repos/{}/issues/{}/comments", repo_full_name, pr_number),
            Some(json!({"body": body})),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_owner_repo_forms() {
        assert_eq!(
            extract_repo_full_name("https://github.com/acme/app").unwrap(),
            "acme/app"
        );
        assert_eq!(
            extract_repo_full_name("https://github.com/acme/app.git").unwrap(),
            "acme/app"
        );
        assert_eq!(
            extract_repo_full_name("git@github.com:acme/app.git").unwrap(),
            "acme/app"
        );
        assert_eq!(
            extract_repo_full_name("https://github.com/acme/app/").unwrap(),
            "acme/app"
        );
    }

    #[test]
    fn rejects_non_github_urls() {
        assert!(extract_repo_full_name("https://example.com/acme/app").is_err());
    }
}
