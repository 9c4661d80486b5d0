use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{info, instrument, warn};

use crate::error::RunFailure;
use crate::model::{
    ModelService, RunHandle, RunStatus, ThreadMessage, ToolCallRequest, ToolCallResult,
};
use crate::registry::AgentRole;
use crate::tool_client::ToolInvoker;

/// Output sent back for a call to a tool outside the role's permission set.
pub const TOOL_NOT_PERMITTED: &str = "tool not permitted for this role";
/// Output sent back when the model's arguments are not a JSON object.
pub const INVALID_ARGUMENTS: &str = "invalid arguments JSON";

// How often we ask the model service "are you done yet?"
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    // Random extra delay added to every poll, 0..=jitter
    pub jitter: Duration,
    // Wait after a failed status query before trying again
    pub error_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            jitter: Duration::from_millis(250),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Local view of one run. Only the controller mutates it.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub id: Option<String>,
    pub role: AgentRole,
    pub thread_context: Vec<ThreadMessage>,
    pub status: RunStatus,
    pub pending_tool_calls: Vec<ToolCallRequest>,
    pub final_text: Option<String>,
}

impl RunSession {
    pub fn new(role: AgentRole, thread_context: Vec<ThreadMessage>) -> Self {
        Self {
            id: None,
            role,
            thread_context,
            status: RunStatus::Queued,
            pending_tool_calls: Vec::new(),
            final_text: None,
        }
    }

    fn started(&mut self, handle: &RunHandle) {
        self.id = Some(handle.run_id.clone());
        self.status = RunStatus::InProgress;
    }

    fn paused(&mut self, calls: Vec<ToolCallRequest>) {
        self.status = RunStatus::AwaitingToolOutputs;
        self.pending_tool_calls = calls;
    }

    fn resumed(&mut self) {
        self.status = RunStatus::InProgress;
        self.pending_tool_calls.clear();
    }

    fn finished(&mut self, status: RunStatus, final_text: Option<String>) {
        self.status = status;
        self.pending_tool_calls.clear();
        self.final_text = final_text;
    }
}

/// Drives one role's run to a terminal state.
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute_run(
        &self,
        role: &AgentRole,
        thread_context: Vec<ThreadMessage>,
        deadline: Duration,
    ) -> Result<String, RunFailure>;
}

/// The Run Controller: polls the model service, answers every tool-call pause
/// and returns the final assistant text.
#[derive(Clone)]
pub struct RunController {
    model: Arc<dyn ModelService>,
    tools: Arc<dyn ToolInvoker>,
    poll: PollPolicy,
}

impl RunController {
    pub fn new(model: Arc<dyn ModelService>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            model,
            tools,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    // The polling state machine. Returns only on a terminal status; the
    // deadline is enforced by the caller.
    async fn drive(
        &self,
        session: &mut RunSession,
        handle: &RunHandle,
    ) -> Result<String, RunFailure> {
        loop {
            let snapshot = match self.model.poll_run(handle).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(run_id = %handle.run_id, error = %e, "status poll failed, backing off");
                    sleep(self.poll.error_backoff).await;
                    continue;
                }
            };

            match snapshot.status {
                RunStatus::Queued | RunStatus::InProgress => {}

                RunStatus::AwaitingToolOutputs => {
                    if snapshot.pending_tool_calls.is_empty() {
                        session.finished(RunStatus::Failed, None);
                        return Err(RunFailure::Protocol(
                            "run paused without pending tool calls".into(),
                        ));
                    }

                    session.paused(snapshot.pending_tool_calls);
                    info!(calls = session.pending_tool_calls.len(), "run requires tool outputs");

                    let outputs = self
                        .answer_tool_calls(&session.role, &session.pending_tool_calls)
                        .await;

                    info!(outputs = outputs.len(), "submitting tool outputs");
                    if let Err(e) = self.model.submit_tool_outputs(handle, outputs).await {
                        session.finished(RunStatus::Failed, None);
                        return Err(RunFailure::ModelService {
                            status: RunStatus::AwaitingToolOutputs,
                            reason: e.to_string(),
                        });
                    }
                    session.resumed();
                }

                RunStatus::Completed => {
                    let Some(text) = snapshot.final_text else {
                        session.finished(RunStatus::Failed, None);
                        return Err(RunFailure::Protocol(
                            "run completed without an assistant message".into(),
                        ));
                    };
                    session.finished(RunStatus::Completed, Some(text.clone()));
                    return Ok(text);
                }

                status @ (RunStatus::Failed | RunStatus::Cancelled) => {
                    session.finished(status, None);
                    let reason = snapshot
                        .failure_reason
                        .unwrap_or_else(|| "no reason reported".to_string());
                    return Err(RunFailure::ModelService { status, reason });
                }
            }

            sleep(self.poll.next_delay()).await;
        }
    }

    // One result per call, in call order. Siblings never cancel each other.
    async fn answer_tool_calls(
        &self,
        role: &AgentRole,
        calls: &[ToolCallRequest],
    ) -> Vec<ToolCallResult> {
        let answers = calls.iter().map(|call| async move {
            if !role.allows(&call.tool_name) {
                warn!(tool = %call.tool_name, role = %role.name, "rejecting tool outside role permissions");
                return ToolCallResult::error(&call.call_id, TOOL_NOT_PERMITTED);
            }
            if !call.arguments.is_object() {
                warn!(tool = %call.tool_name, "model sent unparseable arguments");
                return ToolCallResult::error(&call.call_id, INVALID_ARGUMENTS);
            }

            info!(tool = %call.tool_name, call_id = %call.call_id, "invoking tool");
            let mut result = self.tools.invoke(call).await;
            result.call_id = call.call_id.clone();
            result
        });

        join_all(answers).await
    }
}

#[async_trait]
impl RunExecutor for RunController {
    #[instrument(skip_all, fields(role = %role.name))]
    async fn execute_run(
        &self,
        role: &AgentRole,
        thread_context: Vec<ThreadMessage>,
        deadline: Duration,
    ) -> Result<String, RunFailure> {
        let started = Instant::now();
        let expires_at = started + deadline;
        let mut session = RunSession::new(role.clone(), thread_context);

        // 1. Submit the run
        let handle = match timeout_at(
            expires_at,
            self.model.start_run(role, &session.thread_context),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(RunFailure::ModelService {
                    status: RunStatus::Queued,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RunFailure::Timeout {
                    elapsed: started.elapsed(),
                })
            }
        };
        session.started(&handle);
        info!(run_id = %handle.run_id, "run started");

        // 2. Drive it until it finishes or the deadline passes
        match timeout_at(expires_at, self.drive(&mut session, &handle)).await {
            Ok(outcome) => {
                match &outcome {
                    Ok(text) => info!(run_id = %handle.run_id, chars = text.len(), "run completed"),
                    Err(e) => warn!(run_id = %handle.run_id, error = %e, "run failed"),
                }
                outcome
            }
            Err(_) => {
                warn!(run_id = %handle.run_id, ?deadline, "run deadline exceeded, cancelling");
                // The cancel gets one poll interval of grace.
                match timeout(self.poll.interval, self.model.cancel_run(&handle)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(run_id = %handle.run_id, error = %e, "cancel request failed")
                    }
                    Err(_) => warn!(
                        run_id = %handle.run_id,
                        grace = ?self.poll.interval,
                        "cancel request timed out"
                    ),
                }
                Err(RunFailure::Timeout {
                    elapsed: started.elapsed(),
                })
            }
        }
    }
}
