//! The caller's half of the approval gate: runs an approved script and turns
//! the outcome into the notice fed back into the conversation.

use crate::collab::{call_with_timeout, ExecutionResult, ScriptExecutor};
use crate::orchestration::effect::ApprovalRequest;
use crate::orchestration::event::TurnEvent;
use std::sync::Arc;
use std::time::Duration;

/// Invokes the executor for an approved request. Timeouts and executor errors
/// come back as a failed result; they are never retried.
pub fn execute_approved(
    executor: Arc<dyn ScriptExecutor>,
    request: &ApprovalRequest,
    timeout: Duration,
) -> ExecutionResult {
    let script = request.script.clone();
    let arguments = request.arguments.clone();
    tracing::info!(
        script = script.name.as_str(),
        call_id = request.call.id.as_str(),
        arguments = arguments.len(),
        "running approved script"
    );
    match call_with_timeout("executor", timeout, move || {
        executor.run(&script, &arguments)
    }) {
        Ok(Ok(result)) => result,
        Ok(Err(err)) | Err(err) => {
            tracing::warn!(error = %err, "script execution failed");
            ExecutionResult::failed(err.to_string())
        }
    }
}

pub fn execution_notice(request: &ApprovalRequest, result: ExecutionResult) -> TurnEvent {
    TurnEvent::ExecutionNotice {
        generation: request.generation,
        call_id: request.call.id.clone(),
        result,
    }
}

pub fn rejection_notice(request: &ApprovalRequest) -> TurnEvent {
    TurnEvent::ApprovalRejected {
        generation: request.generation,
        call_id: request.call.id.clone(),
    }
}
