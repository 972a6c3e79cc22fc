use crate::catalog::{ParameterDefinition, ScriptDescriptor};
use crate::collab::{ChatMessage, ExecutionResult};
use crate::orchestration::error::OrchestratorError;
use crate::params::ParameterValue;
use crate::shared::ids::ThreadId;
use crate::working_set::WorkingSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    #[default]
    Idle,
    Discovering,
    AskForScriptConfirmation,
    PresentParameters,
    ConfirmExecution,
    Executing,
    Summarizing,
    Error,
}

impl NextAction {
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next || next == NextAction::Error {
            return true;
        }
        matches!(
            (self, next),
            (NextAction::Idle, NextAction::Discovering)
                | (NextAction::Discovering, NextAction::Idle)
                | (NextAction::Discovering, NextAction::AskForScriptConfirmation)
                | (NextAction::Discovering, NextAction::PresentParameters)
                | (NextAction::AskForScriptConfirmation, NextAction::Idle)
                | (NextAction::AskForScriptConfirmation, NextAction::PresentParameters)
                | (NextAction::PresentParameters, NextAction::ConfirmExecution)
                | (NextAction::PresentParameters, NextAction::Executing)
                | (NextAction::ConfirmExecution, NextAction::Idle)
                | (NextAction::ConfirmExecution, NextAction::Executing)
                | (NextAction::Executing, NextAction::ConfirmExecution)
                | (NextAction::Executing, NextAction::Summarizing)
                | (NextAction::Summarizing, NextAction::Idle)
                | (NextAction::Error, NextAction::Idle)
        )
    }

    /// States in which a plain user reply continues the current task instead
    /// of starting a new one.
    pub fn awaits_reply(self) -> bool {
        matches!(
            self,
            NextAction::AskForScriptConfirmation | NextAction::ConfirmExecution
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::Idle => "idle",
            NextAction::Discovering => "discovering",
            NextAction::AskForScriptConfirmation => "ask_for_script_confirmation",
            NextAction::PresentParameters => "present_parameters",
            NextAction::ConfirmExecution => "confirm_execution",
            NextAction::Executing => "executing",
            NextAction::Summarizing => "summarizing",
            NextAction::Error => "error",
        }
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the engine is waiting on the caller for live UI values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiPullPurpose {
    /// The model asked; the answer goes back to it as a tool result.
    ForModel { round: u8 },
    /// Run intent was given; the approval is emitted once values arrive.
    BeforeRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPull {
    pub call_id: String,
    pub purpose: UiPullPurpose,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub thread_id: Option<ThreadId>,
    /// Bumped whenever a new task wipes the state; async results carry the
    /// generation they were requested under.
    pub generation: u64,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub current_task_description: Option<String>,
    #[serde(default)]
    pub identified_candidates: Vec<ScriptDescriptor>,
    #[serde(default)]
    pub recommended_tool_id: Option<String>,
    #[serde(default)]
    pub selected_script: Option<ScriptDescriptor>,
    #[serde(default)]
    pub parameter_definitions: Vec<ParameterDefinition>,
    /// Values negotiated so far for the selected script.
    #[serde(default)]
    pub parameter_values: Vec<ParameterValue>,
    #[serde(default)]
    pub pending_ui_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub pending_chat_edits: Option<String>,
    /// Arguments from a model-issued `run_<tool_id>` call, applied once the
    /// script's parameters are known.
    #[serde(default)]
    pub pending_run_arguments: Option<Map<String, Value>>,
    #[serde(default)]
    pub final_parameters: Vec<ParameterValue>,
    #[serde(default)]
    pub pending_call_id: Option<String>,
    #[serde(default)]
    pub awaiting_ui: Option<UiPull>,
    /// False while a script with parameter sets waits for the user to pick a mode.
    #[serde(default)]
    pub parameter_set_reviewed: bool,
    #[serde(default)]
    pub next_action: NextAction,
    #[serde(default)]
    pub working_set: WorkingSet,
    #[serde(default)]
    pub execution_result: Option<ExecutionResult>,
}

impl ConversationState {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id: Some(thread_id),
            ..Self::default()
        }
    }

    pub fn advance(&mut self, next: NextAction) -> Result<(), OrchestratorError> {
        let from = self.next_action;
        if !from.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition { from, to: next });
        }
        if from != next {
            tracing::debug!(from = from.as_str(), to = next.as_str(), "next action");
        }
        self.next_action = next;
        Ok(())
    }

    /// Starts a new task: every selection, parameter and execution field is
    /// dropped and the generation moves on. History and the working set stay.
    pub fn begin_task(&mut self, description: &str) {
        self.generation += 1;
        self.clear_task();
        self.current_task_description = Some(description.trim().to_string());
    }

    /// Clears task-scoped fields and returns to idle.
    pub fn clear_task(&mut self) {
        self.current_task_description = None;
        self.identified_candidates.clear();
        self.recommended_tool_id = None;
        self.clear_selection();
        self.next_action = NextAction::Idle;
    }

    fn clear_selection(&mut self) {
        self.selected_script = None;
        self.parameter_definitions.clear();
        self.parameter_values.clear();
        self.pending_ui_values.clear();
        self.pending_chat_edits = None;
        self.pending_run_arguments = None;
        self.final_parameters.clear();
        self.pending_call_id = None;
        self.awaiting_ui = None;
        self.parameter_set_reviewed = false;
        self.execution_result = None;
    }

    pub fn select(&mut self, script: ScriptDescriptor) {
        self.clear_selection();
        self.identified_candidates.clear();
        self.recommended_tool_id = None;
        self.selected_script = Some(script);
    }

    /// The selected script with the parameter definitions read for it.
    pub fn selected_with_parameters(&self) -> Option<ScriptDescriptor> {
        self.selected_script.as_ref().map(|script| {
            let mut script = script.clone();
            script.parameters = self.parameter_definitions.clone();
            script
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            NextAction::Idle,
            NextAction::Discovering,
            NextAction::AskForScriptConfirmation,
            NextAction::PresentParameters,
            NextAction::ConfirmExecution,
            NextAction::Executing,
            NextAction::Summarizing,
            NextAction::Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn execution_cannot_be_reached_from_idle() {
        assert!(!NextAction::Idle.can_transition_to(NextAction::Executing));
        assert!(!NextAction::Discovering.can_transition_to(NextAction::Executing));
        assert!(NextAction::Summarizing.can_transition_to(NextAction::Error));
        assert!(NextAction::Error.can_transition_to(NextAction::Idle));
    }

    #[test]
    fn begin_task_bumps_generation_and_keeps_working_set() {
        let mut state = ConversationState::default();
        state.working_set.add("Walls", &[1]);
        state.next_action = NextAction::Executing;
        state.final_parameters.clear();
        state.pending_call_id = Some("call-1".to_string());
        state.begin_task("create walls");
        assert_eq!(state.generation, 1);
        assert_eq!(state.next_action, NextAction::Idle);
        assert_eq!(state.pending_call_id, None);
        assert_eq!(state.current_task_description.as_deref(), Some("create walls"));
        assert_eq!(state.working_set.len(), 1);
    }
}
