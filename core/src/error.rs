//! Error types shared by the controller, the sequencer and the registry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::RunStatus;

/// Terminal outcome of a run that did not complete.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunFailure {
    /// The model service broke the pause/resume contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The run outlived its deadline and a cancellation was requested.
    #[error("run timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// The model service reported the run as failed or cancelled, or could not
    /// be reached to start or resume it. `status` is the last known status.
    #[error("model service failure ({status}): {reason}")]
    ModelService { status: RunStatus, reason: String },
}

impl RunFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunFailure::Protocol(_) => FailureKind::ProtocolError,
            RunFailure::Timeout { .. } => FailureKind::Timeout,
            RunFailure::ModelService { .. } => FailureKind::ModelServiceFailure,
        }
    }
}

/// Serializable discriminant of a [`RunFailure`], recorded in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProtocolError,
    Timeout,
    ModelServiceFailure,
}

/// Transport or API errors raised by a [`crate::model::ModelService`] adapter.
#[derive(Debug, thiserror::Error)]
pub enum ModelServiceError {
    #[error("no assistant bound for role '{0}'")]
    UnboundRole(String),

    #[error("model service request failed: {0}")]
    Api(String),
}

impl From<async_openai::error::OpenAIError> for ModelServiceError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        ModelServiceError::Api(err.to_string())
    }
}

/// Fatal configuration errors detected while building the role registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("role '{role}' references tool '{tool}' which is not in the catalog")]
    UnknownTool { role: String, tool: String },

    #[error("role '{0}' is defined more than once")]
    DuplicateRole(String),

    #[error("unknown role '{0}'")]
    UnknownRole(String),

    #[error("role sequence is empty")]
    EmptySequence,
}

/// An analysis window that cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("days must be positive, got {0}")]
    NonPositiveDays(i64),

    #[error("a {0}-day window is out of range")]
    OutOfRange(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_matches_variant() {
        assert_eq!(
            RunFailure::Protocol("x".into()).kind(),
            FailureKind::ProtocolError
        );
        assert_eq!(
            RunFailure::Timeout {
                elapsed: Duration::from_secs(1)
            }
            .kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            RunFailure::ModelService {
                status: RunStatus::Failed,
                reason: "rate_limit_exceeded".into()
            }
            .kind(),
            FailureKind::ModelServiceFailure
        );
    }

    #[test]
    fn model_service_failure_message_keeps_reason_verbatim() {
        let failure = RunFailure::ModelService {
            status: RunStatus::Failed,
            reason: "server_error: The server had an error".into(),
        };
        assert!(failure
            .to_string()
            .ends_with("server_error: The server had an error"));
    }
}
