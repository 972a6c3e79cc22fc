//! Interfaces of the collaborators a turn talks to: the language model, the
//! script catalog, the script executor and the host's element validator.

pub mod timeout;

use crate::catalog::{CatalogError, ParameterDefinition, ScriptDescriptor, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use timeout::call_with_timeout;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{collaborator} did not answer within {timeout_ms}ms")]
    Timeout { collaborator: String, timeout_ms: u64 },
    #[error("{collaborator} call failed: {reason}")]
    Failed { collaborator: String, reason: String },
    #[error("{collaborator} worker exited without answering")]
    Disconnected { collaborator: String },
}

impl CollaboratorError {
    pub fn failed(collaborator: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            collaborator: collaborator.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call: Some(call),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call: None,
            tool_call_id: Some(call_id.to_string()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// A model reply is either prose for the user or exactly one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    Text(String),
    ToolCall { name: String, arguments: Value },
}

pub trait LanguageModel: Send + Sync {
    fn complete(&self, request: &ModelRequest) -> Result<AssistantReply, CollaboratorError>;
}

pub trait ScriptCatalog: Send + Sync {
    fn list_scripts(&self) -> Result<Vec<ScriptDescriptor>, CatalogError>;

    /// Manifest-backed catalogs already carry parameters on the descriptor.
    fn read_parameters(
        &self,
        descriptor: &ScriptDescriptor,
    ) -> Result<Vec<ParameterDefinition>, CatalogError> {
        Ok(descriptor.parameters.clone())
    }
}

/// One parameter as handed to the executor: name plus its string rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptArgument {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub structured_output: Option<Value>,
}

impl ExecutionResult {
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error_message: Some(error_message.into()),
            structured_output: None,
        }
    }
}

pub trait ScriptExecutor: Send + Sync {
    fn run(
        &self,
        descriptor: &ScriptDescriptor,
        arguments: &[ScriptArgument],
    ) -> Result<ExecutionResult, CollaboratorError>;
}

pub trait HostValidator: Send + Sync {
    /// Returns the subset of `ids` that still exist in the host document.
    fn still_exist(&self, ids: &[i64]) -> Result<Vec<i64>, CollaboratorError>;
}
