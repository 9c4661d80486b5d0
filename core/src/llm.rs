use std::collections::HashMap;

use anyhow::{Context, Result};
use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        AssistantTools, AssistantToolsFunction, ChatCompletionRequestMessage,
        ChatCompletionRequestUserMessageArgs, CreateAssistantRequestArgs,
        CreateChatCompletionRequestArgs, CreateMessageRequest, CreateMessageRequestArgs,
        CreateRunRequestArgs, CreateThreadRequestArgs, FunctionObjectArgs, MessageContent,
        MessageRole as OpenAiMessageRole, RunObject, RunStatus as OpenAiRunStatus,
        SubmitToolOutputsRunRequest, ToolsOutputs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::ToolCatalog;
use crate::error::ModelServiceError;
use crate::model::{
    MessageRole, ModelService, RunHandle, RunSnapshot, RunStatus, ThreadMessage,
    ToolCallRequest, ToolCallResult,
};
use crate::registry::AgentRole;

pub struct Brain {
    client: Client<OpenAIConfig>,
    model: String,
}

impl Brain {
    pub fn new() -> Result<Self> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY must be set in .env")?;
        let model = std::env::var("OPENAI_MODEL")
            .unwrap_or_else(|_| "gpt-4o".to_string());

        let config = OpenAIConfig::new().with_api_key(api_key);
        let client = Client::with_config(config);

        info!("Brain connected. Model: {}", model);
        Ok(Self { client, model })
    }

    pub async fn say_hello(&self) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content("Hello! Reply with 'System Online'.")
                        .build()?
                )
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    // Registers a role as a hosted assistant. Only the role's own tools are
    // put on the menu.
    pub async fn create_assistant(&self, role: &AgentRole, catalog: &ToolCatalog) -> Result<String> {
        // 1. Convert catalog entries -> function tools
        let mut tools = Vec::new();
        for name in &role.allowed_tools {
            let entry = catalog
                .get(name)
                .with_context(|| format!("Tool '{}' missing from catalog", name))?;

            let function = FunctionObjectArgs::default()
                .name(&entry.name)
                .description(&entry.description)
                .parameters(entry.json_schema())
                .build()?;
            tools.push(AssistantTools::Function(AssistantToolsFunction { function }));
        }

        // 2. Create the assistant
        let request = CreateAssistantRequestArgs::default()
            .name(&role.name)
            .instructions(&role.instructions)
            .model(&self.model)
            .tools(tools)
            .build()?;

        let assistant = self.client.assistants().create(request).await?;
        info!("Created assistant for '{}': {}", role.name, assistant.id);
        Ok(assistant.id)
    }

    /// `Ok(false)` only when the service says the id is gone. Any other error
    /// is returned so a flaky network never looks like a deleted assistant.
    pub async fn assistant_exists(&self, assistant_id: &str) -> Result<bool> {
        match self.client.assistants().retrieve(assistant_id).await {
            Ok(_) => Ok(true),
            Err(OpenAIError::ApiError(e)) if is_missing_assistant(&e) => Ok(false),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to look up assistant {}", assistant_id))
            }
        }
    }
}

/// [`ModelService`] over the Assistants API, one assistant per role.
pub struct AssistantRuns {
    brain: Brain,
    // role name -> assistant id
    bindings: HashMap<String, String>,
}

impl AssistantRuns {
    pub fn new(brain: Brain, bindings: HashMap<String, String>) -> Self {
        Self { brain, bindings }
    }

    async fn latest_assistant_text(&self, thread_id: &str) -> Result<Option<String>, ModelServiceError> {
        let messages = self
            .brain
            .client
            .threads()
            .messages(thread_id)
            .list(&[("order", "desc"), ("limit", "1")])
            .await?;

        let Some(message) = messages.data.into_iter().next() else {
            return Ok(None);
        };
        if !matches!(message.role, OpenAiMessageRole::Assistant) {
            return Ok(None);
        }

        let text: Vec<String> = message
            .content
            .into_iter()
            .filter_map(|block| match block {
                MessageContent::Text(t) => Some(t.text.value),
                _ => None,
            })
            .collect();

        Ok(if text.is_empty() { None } else { Some(text.join("\n")) })
    }
}

#[async_trait]
impl ModelService for AssistantRuns {
    async fn start_run(
        &self,
        role: &AgentRole,
        thread_context: &[ThreadMessage],
    ) -> Result<RunHandle, ModelServiceError> {
        let assistant_id = self
            .bindings
            .get(&role.name)
            .ok_or_else(|| ModelServiceError::UnboundRole(role.name.clone()))?;

        // 1. Fresh thread holding only the context we were handed
        let messages = thread_context
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;
        let thread = self
            .brain
            .client
            .threads()
            .create(CreateThreadRequestArgs::default().messages(messages).build()?)
            .await?;

        // 2. Start the role's assistant on it
        let run = self
            .brain
            .client
            .threads()
            .runs(&thread.id)
            .create(
                CreateRunRequestArgs::default()
                    .assistant_id(assistant_id)
                    .build()?,
            )
            .await?;

        debug!(thread_id = %thread.id, run_id = %run.id, "assistant run created");
        Ok(RunHandle {
            thread_id: thread.id,
            run_id: run.id,
        })
    }

    async fn poll_run(&self, run: &RunHandle) -> Result<RunSnapshot, ModelServiceError> {
        let object = self
            .brain
            .client
            .threads()
            .runs(&run.thread_id)
            .retrieve(&run.run_id)
            .await?;

        let final_text = if matches!(object.status, OpenAiRunStatus::Completed) {
            self.latest_assistant_text(&run.thread_id).await?
        } else {
            None
        };
        Ok(snapshot_from_run(object, final_text))
    }

    async fn submit_tool_outputs(
        &self,
        run: &RunHandle,
        outputs: Vec<ToolCallResult>,
    ) -> Result<(), ModelServiceError> {
        // The API has no error flag; failed calls carry their message as output.
        let tool_outputs = outputs
            .into_iter()
            .map(|r| ToolsOutputs {
                tool_call_id: Some(r.call_id),
                output: Some(r.output),
            })
            .collect();

        self.brain
            .client
            .threads()
            .runs(&run.thread_id)
            .submit_tool_outputs(
                &run.run_id,
                SubmitToolOutputsRunRequest {
                    tool_outputs,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn cancel_run(&self, run: &RunHandle) -> Result<(), ModelServiceError> {
        self.brain
            .client
            .threads()
            .runs(&run.thread_id)
            .cancel(&run.run_id)
            .await?;
        Ok(())
    }
}

fn to_openai_message(message: &ThreadMessage) -> Result<CreateMessageRequest, ModelServiceError> {
    let role = match message.role {
        MessageRole::User => OpenAiMessageRole::User,
        MessageRole::Assistant => OpenAiMessageRole::Assistant,
    };
    Ok(CreateMessageRequestArgs::default()
        .role(role)
        .content(message.content.clone())
        .build()?)
}

// `final_text` is fetched separately; the run object only says "completed".
fn snapshot_from_run(run: RunObject, final_text: Option<String>) -> RunSnapshot {
    let last_error = run
        .last_error
        .map(|e| format!("{:?}: {}", e.code, e.message));

    match run.status {
        OpenAiRunStatus::Queued => RunSnapshot {
            status: RunStatus::Queued,
            ..RunSnapshot::in_progress()
        },
        OpenAiRunStatus::InProgress | OpenAiRunStatus::Cancelling => RunSnapshot::in_progress(),
        OpenAiRunStatus::RequiresAction => {
            let calls = run
                .required_action
                .map(|action| action.submit_tool_outputs.tool_calls)
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCallRequest {
                    call_id: call.id,
                    tool_name: call.function.name,
                    arguments: parse_arguments(&call.function.arguments),
                })
                .collect();
            RunSnapshot::awaiting(calls)
        }
        OpenAiRunStatus::Completed => RunSnapshot {
            status: RunStatus::Completed,
            final_text,
            ..RunSnapshot::in_progress()
        },
        OpenAiRunStatus::Cancelled => RunSnapshot::failed(
            RunStatus::Cancelled,
            last_error.unwrap_or_else(|| "run cancelled".into()),
        ),
        OpenAiRunStatus::Failed => RunSnapshot::failed(
            RunStatus::Failed,
            last_error.unwrap_or_else(|| "run failed".into()),
        ),
        // expired, incomplete
        other => RunSnapshot::failed(
            RunStatus::Failed,
            last_error.unwrap_or_else(|| format!("run ended as {:?}", other)),
        ),
    }
}

fn is_missing_assistant(err: &ApiError) -> bool {
    err.message.starts_with("No assistant found")
}

// Arguments arrive as a JSON string. Keep the raw text when it does not parse
// so the controller can tell the model.
fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_are_decoded() {
        assert_eq!(
            parse_arguments(r#"{"merchant_id":"M1001"}"#),
            json!({ "merchant_id": "M1001" })
        );
    }

    #[test]
    fn broken_arguments_keep_raw_text() {
        let value = parse_arguments(r#"{"merchant_id": "M10"#);
        assert_eq!(value, Value::String(r#"{"merchant_id": "M10"#.into()));
        assert!(!value.is_object());
    }

    fn run(status: &str, extra: Value) -> RunObject {
        let mut body = json!({
            "id": "run_1",
            "object": "thread.run",
            "created_at": 1_710_000_000,
            "thread_id": "thread_1",
            "assistant_id": "asst_1",
            "status": status,
            "model": "gpt-4o",
            "instructions": "Screen the merchant.",
            "tools": [],
            "parallel_tool_calls": true
        });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn queued_and_cancelling_runs_keep_polling() {
        let queued = snapshot_from_run(run("queued", json!({})), None);
        assert_eq!(queued.status, RunStatus::Queued);

        let cancelling = snapshot_from_run(run("cancelling", json!({})), None);
        assert_eq!(cancelling.status, RunStatus::InProgress);
        assert!(cancelling.failure_reason.is_none());
    }

    #[test]
    fn requires_action_lists_every_call() {
        let snapshot = snapshot_from_run(
            run(
                "requires_action",
                json!({
                    "required_action": {
                        "type": "submit_tool_outputs",
                        "submit_tool_outputs": { "tool_calls": [
                            { "id": "call_a", "type": "function",
                              "function": { "name": "get_merchant_profile", "arguments": "{\"merchant_id\":\"M1001\"}" } },
                            { "id": "call_b", "type": "function",
                              "function": { "name": "get_anomalous_transactions", "arguments": "not json" } }
                        ] }
                    }
                }),
            ),
            None,
        );

        assert_eq!(snapshot.status, RunStatus::AwaitingToolOutputs);
        assert_eq!(snapshot.pending_tool_calls.len(), 2);
        assert_eq!(snapshot.pending_tool_calls[0].call_id, "call_a");
        assert_eq!(
            snapshot.pending_tool_calls[0].arguments,
            json!({ "merchant_id": "M1001" })
        );
        assert_eq!(snapshot.pending_tool_calls[1].tool_name, "get_anomalous_transactions");
        assert!(!snapshot.pending_tool_calls[1].arguments.is_object());
    }

    #[test]
    fn requires_action_without_details_is_an_empty_pause() {
        let snapshot = snapshot_from_run(run("requires_action", json!({})), None);
        assert_eq!(snapshot.status, RunStatus::AwaitingToolOutputs);
        assert!(snapshot.pending_tool_calls.is_empty());
    }

    #[test]
    fn completed_run_carries_fetched_text() {
        let snapshot = snapshot_from_run(run("completed", json!({})), Some("LOW_RISK".into()));
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.final_text.as_deref(), Some("LOW_RISK"));
    }

    #[test]
    fn failed_run_reports_last_error() {
        let snapshot = snapshot_from_run(
            run(
                "failed",
                json!({ "last_error": { "code": "rate_limit_exceeded", "message": "Slow down." } }),
            ),
            None,
        );
        assert_eq!(snapshot.status, RunStatus::Failed);
        assert_eq!(
            snapshot.failure_reason.as_deref(),
            Some("RateLimitExceeded: Slow down.")
        );

        let bare = snapshot_from_run(run("failed", json!({})), None);
        assert_eq!(bare.failure_reason.as_deref(), Some("run failed"));
    }

    #[test]
    fn cancelled_run_is_terminal() {
        let snapshot = snapshot_from_run(run("cancelled", json!({})), None);
        assert_eq!(snapshot.status, RunStatus::Cancelled);
        assert_eq!(snapshot.failure_reason.as_deref(), Some("run cancelled"));
    }

    #[test]
    fn expired_and_incomplete_runs_fail_with_a_reason() {
        let expired = snapshot_from_run(run("expired", json!({})), None);
        assert_eq!(expired.status, RunStatus::Failed);
        assert_eq!(expired.failure_reason.as_deref(), Some("run ended as Expired"));

        let incomplete = snapshot_from_run(run("incomplete", json!({})), None);
        assert_eq!(incomplete.status, RunStatus::Failed);
        assert_eq!(
            incomplete.failure_reason.as_deref(),
            Some("run ended as Incomplete")
        );
    }

    #[test]
    fn only_not_found_means_the_assistant_is_gone() {
        let missing: ApiError = serde_json::from_value(json!({
            "message": "No assistant found with id 'asst_1'.",
            "type": "invalid_request_error",
            "param": null,
            "code": null
        }))
        .unwrap();
        assert!(is_missing_assistant(&missing));

        let overloaded: ApiError = serde_json::from_value(json!({
            "message": "The server had an error while processing your request.",
            "type": "server_error",
            "param": null,
            "code": null
        }))
        .unwrap();
        assert!(!is_missing_assistant(&overloaded));
    }

    #[test]
    fn user_message_maps_to_openai_user() {
        let message = to_openai_message(&ThreadMessage::user("Please gather data")).unwrap();
        assert!(matches!(message.role, OpenAiMessageRole::User));
    }
}
