//! Workflow Sequencer.
//!
//! Runs an ordered list of roles against one merchant, one at a time. Each
//! role starts from the subject brief plus the narrative (final texts) of the
//! roles before it. The first failure halts the chain.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{FailureKind, WindowError};
use crate::model::ThreadMessage;
use crate::registry::AgentRole;
use crate::runtime::RunExecutor;

const ISO_SECONDS: &str = "%Y-%m-%dT%H:%M:%S";

/// The merchant under analysis and the window its transactions are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub merchant_id: String,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
}

impl Subject {
    /// The last `days` days up to now.
    pub fn trailing_days(merchant_id: impl Into<String>, days: i64) -> Result<Self, WindowError> {
        Self::trailing_days_until(merchant_id, days, Local::now().naive_local())
    }

    /// The `days` days ending at `window_end`.
    pub fn trailing_days_until(
        merchant_id: impl Into<String>,
        days: i64,
        window_end: NaiveDateTime,
    ) -> Result<Self, WindowError> {
        if days <= 0 {
            return Err(WindowError::NonPositiveDays(days));
        }
        let window_start = chrono::Duration::try_days(days)
            .and_then(|span| window_end.checked_sub_signed(span))
            .ok_or(WindowError::OutOfRange(days))?;
        Ok(Self::between(merchant_id, window_start, window_end))
    }

    pub fn between(
        merchant_id: impl Into<String>,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            window_start,
            window_end,
        }
    }

    /// Seed message for the first role. Dates use the ISO form the tools parse.
    pub fn brief(&self) -> String {
        format!(
            "Please gather data for merchant '{}' from {} to {}.",
            self.merchant_id,
            self.window_start.format(ISO_SECONDS),
            self.window_end.format(ISO_SECONDS),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoleOutcome {
    Completed { final_text: String },
    Failed { kind: FailureKind, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleReport {
    pub role_name: String,
    #[serde(flatten)]
    pub outcome: RoleOutcome,
}

/// Everything one end-to-end analysis produced, in role order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub subject_id: String,
    pub entries: Vec<RoleReport>,
}

impl WorkflowReport {
    fn new(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            entries: Vec::new(),
        }
    }

    /// True when every attempted role completed. An empty report counts as complete.
    pub fn is_complete(&self) -> bool {
        self.failure().is_none()
    }

    /// The failed entry, if the chain halted.
    pub fn failure(&self) -> Option<&RoleReport> {
        self.entries
            .iter()
            .find(|e| matches!(e.outcome, RoleOutcome::Failed { .. }))
    }

    /// Final text of the last role, when the whole chain completed.
    pub fn final_text(&self) -> Option<&str> {
        match self.entries.last().map(|e| &e.outcome) {
            Some(RoleOutcome::Completed { final_text }) if self.is_complete() => {
                Some(final_text.as_str())
            }
            _ => None,
        }
    }
}

/// Chains roles through a [`RunExecutor`].
pub struct WorkflowSequencer {
    executor: Arc<dyn RunExecutor>,
    run_deadline: Duration,
}

impl WorkflowSequencer {
    pub fn new(executor: Arc<dyn RunExecutor>, run_deadline: Duration) -> Self {
        Self {
            executor,
            run_deadline,
        }
    }

    #[instrument(skip_all, fields(subject = %subject.merchant_id, roles = roles.len()))]
    pub async fn run_workflow(&self, subject: &Subject, roles: &[AgentRole]) -> WorkflowReport {
        let mut report = WorkflowReport::new(&subject.merchant_id);
        let seed = ThreadMessage::user(subject.brief());
        // (role name, final text) of every completed role so far
        let mut narrative: Vec<(String, String)> = Vec::new();

        for role in roles {
            let context = thread_context_for(&seed, &narrative);
            info!(role = %role.name, messages = context.len(), "starting role");

            match self
                .executor
                .execute_run(role, context, self.run_deadline)
                .await
            {
                Ok(final_text) => {
                    info!(role = %role.name, "role completed");
                    report.entries.push(RoleReport {
                        role_name: role.name.clone(),
                        outcome: RoleOutcome::Completed {
                            final_text: final_text.clone(),
                        },
                    });
                    narrative.push((role.name.clone(), final_text));
                }
                Err(failure) => {
                    warn!(role = %role.name, error = %failure, "role failed, halting workflow");
                    report.entries.push(RoleReport {
                        role_name: role.name.clone(),
                        outcome: RoleOutcome::Failed {
                            kind: failure.kind(),
                            reason: failure.to_string(),
                        },
                    });
                    break;
                }
            }
        }

        report
    }
}

// Subject brief first, then each prior role's output wrapped as a user message.
fn thread_context_for(seed: &ThreadMessage, narrative: &[(String, String)]) -> Vec<ThreadMessage> {
    std::iter::once(seed.clone())
        .chain(
            narrative
                .iter()
                .map(|(role, text)| ThreadMessage::user(format!("Output from {}:\n{}", role, text))),
        )
        .collect()
}
