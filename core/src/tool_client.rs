//! Tool Invocation Client.
//!
//! Turns one [`ToolCallRequest`] into one `POST /execute` against the tool
//! service and always hands back a [`ToolCallResult`]. Transport faults, error
//! statuses and malformed bodies become `is_error` results at this boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::ToolCatalog;
use crate::model::{ToolCallRequest, ToolCallResult};

/// Output text for a tool name the catalog does not know.
pub const UNKNOWN_TOOL: &str = "unknown tool";

/// Anything that can answer a single tool call. Implementations never fail.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, request: &ToolCallRequest) -> ToolCallResult;
}

#[derive(Debug, Error)]
enum ToolInvocationError {
    #[error("tool service unreachable: {0}")]
    Transport(String),

    #[error("tool service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("tool service returned a malformed body: {0}")]
    MalformedBody(String),

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    tool_name: &'a str,
    arguments: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<Value>,
}

/// HTTP client for the tool service's execute endpoint.
#[derive(Clone)]
pub struct HttpToolClient {
    http: reqwest::Client,
    execute_url: String,
    catalog: Arc<ToolCatalog>,
}

impl HttpToolClient {
    pub fn new(base_url: &str, catalog: Arc<ToolCatalog>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url, catalog))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, catalog: Arc<ToolCatalog>) -> Self {
        Self {
            http,
            execute_url: format!("{}/execute", base_url.trim_end_matches('/')),
            catalog,
        }
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<String, ToolInvocationError> {
        let response = self
            .http
            .post(&self.execute_url)
            .json(&ExecuteRequest {
                tool_name,
                arguments,
            })
            .send()
            .await
            .map_err(|e| ToolInvocationError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolInvocationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ToolInvocationError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let parsed: ExecuteResponse = serde_json::from_str(&body)
            .map_err(|e| ToolInvocationError::MalformedBody(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(ToolInvocationError::Tool {
                tool: tool_name.to_string(),
                message: value_text(&err),
            });
        }

        serde_json::to_string(&parsed.result)
            .map_err(|e| ToolInvocationError::MalformedBody(e.to_string()))
    }
}

#[async_trait]
impl ToolInvoker for HttpToolClient {
    async fn invoke(&self, request: &ToolCallRequest) -> ToolCallResult {
        if !self.catalog.contains(&request.tool_name) {
            warn!(tool = %request.tool_name, "tool not in catalog, skipping call");
            return ToolCallResult::error(&request.call_id, UNKNOWN_TOOL);
        }

        let empty = Map::new();
        let arguments = request.arguments.as_object().unwrap_or(&empty);

        debug!(tool = %request.tool_name, call_id = %request.call_id, "executing tool");
        match self.execute(&request.tool_name, arguments).await {
            Ok(output) => {
                debug!(tool = %request.tool_name, bytes = output.len(), "tool returned");
                ToolCallResult::success(&request.call_id, output)
            }
            Err(e) => {
                warn!(tool = %request.tool_name, error = %e, "tool invocation failed");
                ToolCallResult::error(&request.call_id, e.to_string())
            }
        }
    }
}

// Error bodies look like {"error": "..."}; fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(value_text))
        .unwrap_or_else(|| body.trim().to_string())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
