//! riskflow core: drives a chain of assistant roles over one merchant.
//!
//! - [`sequencer`] chains roles and collects the [`sequencer::WorkflowReport`]
//! - [`runtime`] is the run controller (polling, tool-call pauses, deadlines)
//! - [`tool_client`] calls the tool service
//! - [`registry`] and [`catalog`] hold the startup-validated roles and tools
//! - [`llm`] adapts the OpenAI Assistants API to [`model::ModelService`]

pub mod catalog;
pub mod config;
pub mod error;
pub mod llm;
pub mod model;
pub mod registry;
pub mod runtime;
pub mod sequencer;
pub mod tool_client;

pub use catalog::{ToolCatalog, ToolCatalogEntry};
pub use config::OrchestratorConfig;
pub use error::{FailureKind, RegistryError, RunFailure, WindowError};
pub use model::{ModelService, ThreadMessage, ToolCallRequest, ToolCallResult};
pub use registry::{AgentRole, RoleRegistry};
pub use runtime::{PollPolicy, RunController, RunExecutor};
pub use sequencer::{Subject, WorkflowReport, WorkflowSequencer};
pub use tool_client::{HttpToolClient, ToolInvoker};
