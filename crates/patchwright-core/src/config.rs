//! Runtime configuration
//!
//! Pure types and loading only. Every field can come from the environment;
//! unset variables fall back to the defaults below.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database connector URL consumed by the durable-store adapter.
    pub database_url: String,
    pub github_token: String,
    pub anthropic_api_key: String,
    /// Deadline for a single run; overruns take the interrupt path.
    pub max_runtime_seconds: u64,
    pub max_iterations: usize,
    pub max_artifact_size_mb: u64,
    pub artifacts_dir: PathBuf,
    /// Container backend toggle; off means the local process-tree backend.
    pub use_container: bool,
    pub container_image: String,
    /// Remote engine endpoint for the container backend (DOCKER_HOST form).
    pub docker_host: Option<String>,
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./patchwright.db".to_string(),
            github_token: String::new(),
            anthropic_api_key: String::new(),
            max_runtime_seconds: 300,
            max_iterations: 50,
            max_artifact_size_mb: 10,
            artifacts_dir: PathBuf::from("./artifacts"),
            use_container: false,
            container_image: "patchwright/sandbox:latest".to_string(),
            docker_host: None,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DATABASE_URL") {
            config.database_url = v;
        }
        if let Ok(v) = std::env::var("GITHUB_TOKEN") {
            config.github_token = v;
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            config.anthropic_api_key = v;
        }
        if let Some(v) = parse_env("MAX_RUNTIME_SECONDS") {
            config.max_runtime_seconds = v;
        }
        if let Some(v) = parse_env("MAX_ITERATIONS") {
            config.max_iterations = v;
        }
        if let Some(v) = parse_env("MAX_ARTIFACT_SIZE_MB") {
            config.max_artifact_size_mb = v;
        }
        if let Ok(v) = std::env::var("ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("USE_CONTAINER") {
            config.use_container = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CONTAINER_IMAGE") {
            config.container_image = v;
        }
        if let Ok(v) = std::env::var("DOCKER_HOST") {
            config.docker_host = Some(v);
        }
        if let Ok(v) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    pub fn max_artifact_size_bytes(&self) -> u64 {
        self.max_artifact_size_mb * 1024 * 1024
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
