//! Contract between the run controller and the conversational model service.
//!
//! The controller only ever talks to a [`ModelService`]. Production wires in
//! [`crate::llm::AssistantRuns`]; tests feed a scripted sequence of snapshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelServiceError;
use crate::registry::AgentRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One message of a thread context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ThreadMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    AwaitingToolOutputs,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::AwaitingToolOutputs => "awaiting_tool_outputs",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A tool execution the model asked for while paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    /// Decoded argument object. If the model sent something that is not valid
    /// JSON the raw string is kept here as a `Value::String`.
    pub arguments: Value,
}

/// Answer to exactly one [`ToolCallRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: message.into(),
            is_error: true,
        }
    }
}

/// Identifies a run on the model service side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub thread_id: String,
    pub run_id: String,
}

/// What one status poll returned.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub status: RunStatus,
    /// Populated when `status == AwaitingToolOutputs`.
    pub pending_tool_calls: Vec<ToolCallRequest>,
    /// Terminal assistant message, populated when `status == Completed`.
    pub final_text: Option<String>,
    /// Reason reported for `Failed` / `Cancelled`.
    pub failure_reason: Option<String>,
}

impl RunSnapshot {
    pub fn in_progress() -> Self {
        Self::with_status(RunStatus::InProgress)
    }

    pub fn awaiting(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            pending_tool_calls: calls,
            ..Self::with_status(RunStatus::AwaitingToolOutputs)
        }
    }

    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            final_text: Some(text.into()),
            ..Self::with_status(RunStatus::Completed)
        }
    }

    pub fn failed(status: RunStatus, reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::with_status(status)
        }
    }

    fn with_status(status: RunStatus) -> Self {
        Self {
            status,
            pending_tool_calls: Vec::new(),
            final_text: None,
            failure_reason: None,
        }
    }
}

/// Run lifecycle of a hosted assistant service.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Create a run for `role` over a fresh thread seeded with `thread_context`.
    async fn start_run(
        &self,
        role: &AgentRole,
        thread_context: &[ThreadMessage],
    ) -> Result<RunHandle, ModelServiceError>;

    async fn poll_run(&self, run: &RunHandle) -> Result<RunSnapshot, ModelServiceError>;

    /// Resume a paused run with one result per pending call.
    async fn submit_tool_outputs(
        &self,
        run: &RunHandle,
        outputs: Vec<ToolCallResult>,
    ) -> Result<(), ModelServiceError>;

    /// Best-effort abort of an in-flight run.
    async fn cancel_run(&self, run: &RunHandle) -> Result<(), ModelServiceError>;
}
