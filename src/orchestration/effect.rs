use crate::catalog::ScriptDescriptor;
use crate::collab::{ModelRequest, ScriptArgument, ToolCall};
use serde::{Deserialize, Serialize};

/// What a transition asks the outside world to do. The engine performs
/// `Local` effects itself; approvals and forwards are handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Reply(String),
    Local(LocalEffect),
    ApprovalRequired(ApprovalRequest),
    ForwardToCaller(ForwardRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalEffect {
    ConsultModel { round: u8, request: ModelRequest },
    FetchParameters { script: ScriptDescriptor },
}

/// A state-changing script run waiting for the user's explicit yes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub generation: u64,
    pub call: ToolCall,
    pub script: ScriptDescriptor,
    pub arguments: Vec<ScriptArgument>,
    pub is_final_approval: bool,
}

impl ApprovalRequest {
    /// Payload shown to the approving user and recorded in the audit log.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "callId": self.call.id,
            "scriptName": self.script.name,
            "toolId": self.script.tool_id,
            "absolutePath": self.script.absolute_path,
            "type": self.script.kind.as_str(),
            "parameters": self.arguments,
            "is_final_approval": self.is_final_approval,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ForwardRequest {
    GetUiParameters {
        generation: u64,
        call_id: String,
        #[serde(default)]
        tool_id: Option<String>,
    },
}

impl ForwardRequest {
    pub fn call_id(&self) -> &str {
        match self {
            Self::GetUiParameters { call_id, .. } => call_id,
        }
    }
}
