//! Screenshot tool — headless browser capture inside the sandbox
//!
//! Writes a short Playwright runner into a hidden workspace directory,
//! executes it against the requested URL, and returns a multimodal result:
//! a metadata summary plus the PNG as an inline image block. Every failure
//! mode comes back as a structured result so the agent can retry.

use crate::registry::{ArtifactSink, Tool, ToolResult};
use base64::Engine;
use patchwright_core::ArtifactKind;
use patchwright_llm::{ImageSource, ResultBlock};
use patchwright_sandbox::{Sandbox, SandboxProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CAPTURE_DIR: &str = ".patchwright_verify";
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);
const UTILITY_TIMEOUT: Duration = Duration::from_secs(10);
const META_MARKER: &str = "__SCREENSHOT_META__";

const CAPTURE_SCRIPT: &str = r#"
import sys
import json
from playwright.sync_api import sync_playwright

def main():
    url = sys.argv[1]
    out = sys.argv[2]
    metadata = {
        "requested_url": url,
        "final_url": None,
        "title": None,
        "http_status": None,
        "navigation_error": None,
        "body_excerpt": None,
        "screenshot_file": out,
    }
    with sync_playwright() as p:
        b = p.chromium.launch()
        page = b.new_page(viewport={"width": 1280, "height": 800})
        try:
            response = page.goto(url, wait_until="networkidle", timeout=15000)
            page.wait_for_timeout(1000)
            metadata["http_status"] = response.status if response else None
        except Exception as e:
            metadata["navigation_error"] = str(e)

        try:
            metadata["final_url"] = page.url
            metadata["title"] = page.title()
            body_text = page.locator("body").inner_text()
            metadata["body_excerpt"] = (body_text or "")[:500]
        except Exception as e:
            if not metadata["navigation_error"]:
                metadata["navigation_error"] = f"Metadata capture error: {e}"

        page.screenshot(path=out)
        b.close()

    print("__SCREENSHOT_META__" + json.dumps(metadata))

if __name__ == "__main__":
    main()
"#;

pub struct ScreenshotTool {
    provider: Arc<dyn SandboxProvider>,
    sandbox: Arc<Sandbox>,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl ScreenshotTool {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        sandbox: Arc<Sandbox>,
        sink: Option<Arc<dyn ArtifactSink>>,
    ) -> Self {
        Self {
            provider,
            sandbox,
            sink,
        }
    }
}

#[async_trait::async_trait]
impl Tool for ScreenshotTool {
    fn name(&self) -> &str {
        "take_screenshot"
    }

    fn description(&self) -> &str {
        "Take a screenshot of a URL inside the sandbox using a headless browser. \
         Use this to visually verify UI changes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "e.g., http://localhost:5173"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let url = match args["url"].as_str() {
            Some(u) => u,
            None => return ToolResult::error("Missing required parameter: url"),
        };

        let ts = chrono::Utc::now().timestamp();
        let script_path = format!("{}/screenshot_runner_{}.py", CAPTURE_DIR, ts);
        let screenshot_path = format!("{}/screenshot_{}.png", CAPTURE_DIR, ts);

        if let Err(e) = self
            .provider
            .run_command(
                &self.sandbox,
                &format!("mkdir -p {}", CAPTURE_DIR),
                UTILITY_TIMEOUT,
            )
            .await
        {
            return ToolResult::json(json!({"error": format!("Failed to prepare capture dir: {}", e)}));
        }

        if let Err(e) = self
            .provider
            .write_file(&self.sandbox, &script_path, CAPTURE_SCRIPT)
            .await
        {
            return ToolResult::json(json!({"error": format!("Failed to write capture script: {}", e)}));
        }

        let capture = self
            .provider
            .run_command(
                &self.sandbox,
                &format!(
                    "python3 {} {} {}",
                    sh_quote(&script_path),
                    sh_quote(url),
                    sh_quote(&screenshot_path)
                ),
                SCRIPT_TIMEOUT,
            )
            .await;

        let _ = self
            .provider
            .run_command(
                &self.sandbox,
                &format!("rm -f {}", sh_quote(&script_path)),
                UTILITY_TIMEOUT,
            )
            .await;

        let capture = match capture {
            Ok(output) => output,
            Err(e) => {
                return ToolResult::json(json!({"error": format!("Failed to take screenshot: {}", e)}))
            }
        };
        if capture.exit_code != 0 {
            return ToolResult::json(json!({
                "error": format!(
                    "Failed to take screenshot: {}\n{}",
                    capture.stderr, capture.stdout
                )
            }));
        }

        let mut metadata = json!({"requested_url": url});
        for line in capture.stdout.lines() {
            if let Some(rest) = line.strip_prefix(META_MARKER) {
                metadata = serde_json::from_str(rest).unwrap_or_else(|_| {
                    json!({
                        "requested_url": url,
                        "parse_error": "failed_to_parse_screenshot_metadata",
                    })
                });
                break;
            }
        }
        metadata["repo_relative_path"] = json!(screenshot_path);

        let encoded = match self
            .provider
            .run_command(
                &self.sandbox,
                &format!("base64 {}", sh_quote(&screenshot_path)),
                SCRIPT_TIMEOUT,
            )
            .await
        {
            Ok(output) if output.exit_code == 0 => output
                .stdout
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>(),
            Ok(output) => {
                return ToolResult::json(
                    json!({"error": format!("Failed to read screenshot: {}", output.stderr)}),
                )
            }
            Err(e) => {
                return ToolResult::json(json!({"error": format!("Failed to read screenshot: {}", e)}))
            }
        };

        // Hand the raw bytes to the artifact sink so the capture is durable.
        if let Some(sink) = &self.sink {
            match base64::engine::general_purpose::STANDARD.decode(&encoded) {
                Ok(bytes) => {
                    let name = format!("screenshot_{}", chrono::Utc::now().timestamp());
                    if let Err(e) = sink
                        .save(
                            ArtifactKind::Screenshot,
                            &name,
                            &bytes,
                            Some(metadata.clone()),
                        )
                        .await
                    {
                        warn!("failed to save screenshot artifact: {}", e);
                    }
                }
                Err(e) => warn!("screenshot payload was not valid base64: {}", e),
            }
        }

        debug!("screenshot captured: {}", screenshot_path);
        ToolResult::Media(vec![
            ResultBlock::Text {
                text: format!(
                    "Screenshot captured. requested={} final={} status={} title={} path={}",
                    field(&metadata, "requested_url"),
                    field(&metadata, "final_url"),
                    field(&metadata, "http_status"),
                    field(&metadata, "title"),
                    screenshot_path
                ),
            },
            ResultBlock::Image {
                source: ImageSource::base64_png(encoded),
            },
        ])
    }
}

fn field(metadata: &Value, key: &str) -> String {
    match &metadata[key] {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
