//! Web fetch for workers. Plain GET with a timeout and a response cap.

use std::time::Duration;

use async_trait::async_trait;

use super::{str_arg, Tool, ToolResult};

/// Maximum bytes of body returned to the model.
const BODY_CAP: usize = 128 * 1024;

pub struct FetchUrlTool {
    client: reqwest::Client,
    timeout: Duration,
}

impl FetchUrlTool {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch a URL (GET) and return the response body as text."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "url": { "type": "string" } },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let url = match str_arg(&input, "url") {
            Ok(u) => u,
            Err(e) => return e,
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::error("only http(s) URLs are supported");
        }
        let response = self.client.get(url).timeout(self.timeout).send().await;
        match response {
            Ok(resp) => {
                let status = resp.status();
                match resp.text().await {
                    Ok(mut body) => {
                        if body.len() > BODY_CAP {
                            let cut = (0..=BODY_CAP)
                                .rev()
                                .find(|i| body.is_char_boundary(*i))
                                .unwrap_or(0);
                            body.truncate(cut);
                            body.push_str("\n… (truncated)");
                        }
                        if status.is_success() {
                            ToolResult::success(body)
                        } else {
                            ToolResult::error(format!("HTTP {status}: {body}"))
                        }
                    }
                    Err(e) => ToolResult::error(format!("body read failed: {e}")),
                }
            }
            Err(e) => ToolResult::error(format!("fetch failed: {e}")),
        }
    }
}
