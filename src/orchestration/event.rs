use crate::catalog::ParameterDefinition;
use crate::collab::{AssistantReply, ExecutionResult};
use crate::working_set::ValidationOutcome;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything that can move a conversation forward. The first four arrive from
/// the caller; the rest are produced inside a turn as local effects complete.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    UserMessage {
        text: String,
        /// Snapshot of the parameters panel sent along with the message.
        ui_values: BTreeMap<String, Value>,
    },
    /// The caller ran (or failed to run) an approved script.
    ExecutionNotice {
        generation: u64,
        call_id: String,
        result: ExecutionResult,
    },
    ApprovalRejected {
        generation: u64,
        call_id: String,
    },
    /// Answer to a forwarded `get_ui_parameters` call.
    UiParameters {
        generation: u64,
        call_id: String,
        values: BTreeMap<String, Value>,
    },
    WorkingSetValidated(ValidationOutcome),
    ModelReplied {
        generation: u64,
        round: u8,
        reply: Result<AssistantReply, String>,
    },
    ParametersFetched {
        generation: u64,
        result: Result<Vec<ParameterDefinition>, String>,
    },
}

impl TurnEvent {
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserMessage {
            text: text.into(),
            ui_values: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::ExecutionNotice { .. } => "execution_notice",
            Self::ApprovalRejected { .. } => "approval_rejected",
            Self::UiParameters { .. } => "ui_parameters",
            Self::WorkingSetValidated(_) => "working_set_validated",
            Self::ModelReplied { .. } => "model_replied",
            Self::ParametersFetched { .. } => "parameters_fetched",
        }
    }
}
