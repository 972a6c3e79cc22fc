use crate::catalog::ScriptRegistry;
use crate::collab::{call_with_timeout, LanguageModel, ModelRequest, Role};
use crate::config::EngineSettings;
use crate::orchestration::conversation_context::{
    append_audit_record, render_recent_thread_context, AuditKind, AuditRecord,
    ThreadContextLimits,
};
use crate::orchestration::effect::{ApprovalRequest, Effect, ForwardRequest, LocalEffect};
use crate::orchestration::error::OrchestratorError;
use crate::orchestration::event::TurnEvent;
use crate::orchestration::state::{ConversationState, NextAction};
use crate::orchestration::transitions::{settle, transition, CallIdSource, TransitionContext};
use crate::params::Negotiator;
use crate::shared::ids::generate_call_id;
use crate::shared::logging::append_engine_event;
use crate::working_set::{Reconciler, ValidationOutcome};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Events one turn may process, counting the ones local effects feed back.
const MAX_TURN_STEPS: usize = 12;
const APOLOGY: &str =
    "Sorry, something went wrong while handling that. Nothing was changed; please try again.";
const FALLBACK_REPLY: &str = "I'm not sure how to continue. Could you rephrase that?";

/// Call ids from the clock plus `getrandom`; a counter stands in if the
/// platform has no randomness.
#[derive(Debug, Default)]
pub struct RandomCallIds {
    fallback: AtomicU64,
}

impl CallIdSource for RandomCallIds {
    fn next_call_id(&self) -> String {
        let now = chrono::Utc::now().timestamp();
        generate_call_id(now).unwrap_or_else(|err| {
            tracing::warn!(error = err.as_str(), "falling back to counter call ids");
            format!(
                "call-{now}-{}",
                self.fallback.fetch_add(1, Ordering::Relaxed)
            )
        })
    }
}

/// Everything the caller needs after a turn: what to show, what to ask the
/// user to approve, and which tool calls it has to answer.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    pub replies: Vec<String>,
    pub approvals: Vec<ApprovalRequest>,
    pub forwards: Vec<ForwardRequest>,
    pub next_action: NextAction,
    pub generation: u64,
    /// Last recoverable problem, or the internal fault that rolled the turn back.
    pub error: Option<OrchestratorError>,
    pub discarded: bool,
}

pub struct TurnEngine {
    registry: Arc<ScriptRegistry>,
    model: Arc<dyn LanguageModel>,
    reconciler: Reconciler,
    negotiator: Negotiator,
    settings: EngineSettings,
    call_ids: Arc<dyn CallIdSource>,
}

impl TurnEngine {
    pub fn new(
        settings: EngineSettings,
        registry: Arc<ScriptRegistry>,
        model: Arc<dyn LanguageModel>,
        reconciler: Reconciler,
    ) -> Self {
        let negotiator = Negotiator::new(settings.name_match_threshold);
        Self {
            registry,
            model,
            reconciler,
            negotiator,
            settings,
            call_ids: Arc::new(RandomCallIds::default()),
        }
    }

    pub fn with_call_ids(mut self, call_ids: Arc<dyn CallIdSource>) -> Self {
        self.call_ids = call_ids;
        self
    }

    pub fn with_negotiator(mut self, negotiator: Negotiator) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    pub fn refresh_catalog(&self) -> Result<usize, OrchestratorError> {
        let count = self.registry.refresh()?;
        let mut fields = Map::new();
        fields.insert("count".to_string(), Value::from(count));
        self.log_event("info", "catalog.refreshed", "script catalog reloaded", fields);
        Ok(count)
    }

    fn context_limits(&self) -> ThreadContextLimits {
        ThreadContextLimits {
            max_turns: self.settings.context_max_turns,
            max_chars: self.settings.context_max_chars,
        }
    }

    /// Runs one turn to completion. Never fails: recoverable problems end in a
    /// reply, and an internal fault restores the state the turn started from.
    pub fn run_turn(&self, state: &mut ConversationState, event: TurnEvent) -> TurnOutcome {
        let snapshot = state.clone();
        let inbound = event.clone();
        let mut outcome = TurnOutcome::default();

        let driven = catch_unwind(AssertUnwindSafe(|| {
            self.drive(snapshot.clone(), event, &mut outcome)
        }));
        let fault = match driven {
            Ok(Ok(next)) => {
                *state = next;
                None
            }
            Ok(Err(err)) => Some(err),
            Err(panic) => Some(OrchestratorError::Internal(panic_message(panic.as_ref()))),
        };
        if let Some(err) = fault {
            tracing::error!(error = %err, event = inbound.kind(), "turn rolled back");
            let mut fields = Map::new();
            fields.insert("eventKind".to_string(), Value::from(inbound.kind()));
            self.log_event("error", "turn.internal_fault", &err.to_string(), fields);
            *state = snapshot.clone();
            outcome = TurnOutcome {
                replies: vec![APOLOGY.to_string()],
                error: Some(err),
                ..TurnOutcome::default()
            };
        }

        if outcome.replies.is_empty() {
            outcome.replies.push(FALLBACK_REPLY.to_string());
        }
        outcome.next_action = state.next_action;
        outcome.generation = state.generation;
        if outcome.discarded {
            let mut fields = Map::new();
            fields.insert("eventKind".to_string(), Value::from(inbound.kind()));
            self.log_event("info", "turn.discarded", "stale result discarded", fields);
        }
        self.audit_turn(&snapshot, state, &inbound, &outcome);
        outcome
    }

    fn drive(
        &self,
        state: ConversationState,
        event: TurnEvent,
        outcome: &mut TurnOutcome,
    ) -> Result<ConversationState, OrchestratorError> {
        let validation = self.reconciler.validate(&state.working_set);
        if let ValidationOutcome::FailedOpen { reason, .. } = &validation {
            self.log_event(
                "warn",
                "working_set.fail_open",
                reason,
                Map::new(),
            );
        }

        let catalog = self.registry.catalog().map_err(OrchestratorError::from);
        let ctx = TransitionContext {
            catalog: &catalog,
            negotiator: &self.negotiator,
            call_ids: self.call_ids.as_ref(),
            max_candidates: self.settings.max_candidates,
            pull_ui_before_run: self.settings.pull_ui_before_run,
            context_limits: self.context_limits(),
        };

        let mut queue = VecDeque::from([TurnEvent::WorkingSetValidated(validation), event]);
        let mut state = state;
        let mut steps = 0usize;
        while let Some(event) = queue.pop_front() {
            steps += 1;
            if steps > MAX_TURN_STEPS {
                return Err(OrchestratorError::Internal(format!(
                    "turn did not settle within {MAX_TURN_STEPS} steps"
                )));
            }
            tracing::debug!(event = event.kind(), next_action = %state.next_action, "turn step");
            let step = transition(state, event, &ctx)?;
            state = step.state;
            if let Some(issue) = step.issue {
                outcome.error = Some(issue);
            }
            outcome.discarded |= step.discarded;
            for effect in step.effects {
                match effect {
                    Effect::Reply(text) => outcome.replies.push(text),
                    Effect::Local(local) => queue.push_back(self.perform(&state, local)),
                    Effect::ApprovalRequired(request) => outcome.approvals.push(request),
                    Effect::ForwardToCaller(request) => outcome.forwards.push(request),
                }
            }
        }
        settle(&mut state);
        Ok(state)
    }

    /// Executes a local effect and returns its result as the next event.
    fn perform(&self, state: &ConversationState, effect: LocalEffect) -> TurnEvent {
        let generation = state.generation;
        match effect {
            LocalEffect::ConsultModel { round, mut request } => {
                self.inject_thread_context(state, &mut request);
                let model = Arc::clone(&self.model);
                let reply = call_with_timeout("model", self.settings.timeouts.model(), move || {
                    model.complete(&request)
                })
                .and_then(|reply| reply)
                .map_err(|err| err.to_string());
                TurnEvent::ModelReplied {
                    generation,
                    round,
                    reply,
                }
            }
            LocalEffect::FetchParameters { script } => TurnEvent::ParametersFetched {
                generation,
                result: self
                    .registry
                    .read_parameters(&script)
                    .map_err(|err| err.to_string()),
            },
        }
    }

    /// A thread resumed without in-memory history gets its audit tail instead.
    fn inject_thread_context(&self, state: &ConversationState, request: &mut ModelRequest) {
        let earlier = request
            .messages
            .iter()
            .filter(|message| message.role == Role::User)
            .count();
        if earlier > 1 {
            return;
        }
        let Some(thread_id) = state.thread_id.as_ref() else {
            return;
        };
        match render_recent_thread_context(
            &self.settings.state_root,
            thread_id.as_str(),
            self.context_limits(),
        ) {
            Ok(Some(context)) => {
                request.system_prompt.push_str("\n\nEarlier in this thread:\n");
                request.system_prompt.push_str(&context);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "failed to read thread history"),
        }
    }

    fn audit_turn(
        &self,
        before: &ConversationState,
        after: &ConversationState,
        inbound: &TurnEvent,
        outcome: &TurnOutcome,
    ) {
        let Some(thread_id) = after.thread_id.as_ref().or(before.thread_id.as_ref()) else {
            return;
        };
        let generation = after.generation;
        let mut records = Vec::new();
        match inbound {
            TurnEvent::UserMessage { text, .. } => {
                records.push(AuditRecord::new(AuditKind::Inbound, generation, text.clone()))
            }
            TurnEvent::ExecutionNotice {
                call_id, result, ..
            } => records.push(
                AuditRecord::new(
                    AuditKind::ExecutionNotice,
                    generation,
                    if result.success {
                        "execution succeeded"
                    } else {
                        "execution failed"
                    },
                )
                .with_call(call_id, serde_json::to_value(result).ok()),
            ),
            TurnEvent::ApprovalRejected { call_id, .. } => records.push(
                AuditRecord::new(AuditKind::ApprovalRejected, generation, "")
                    .with_call(call_id, None),
            ),
            TurnEvent::UiParameters {
                call_id, values, ..
            } => records.push(
                AuditRecord::new(AuditKind::UiParameters, generation, "")
                    .with_call(call_id, serde_json::to_value(values).ok()),
            ),
            TurnEvent::WorkingSetValidated(_)
            | TurnEvent::ModelReplied { .. }
            | TurnEvent::ParametersFetched { .. } => {}
        }

        let fresh = after.messages.get(before.messages.len()..).unwrap_or(&[]);
        for call in fresh.iter().filter_map(|message| message.tool_call.as_ref()) {
            if outcome
                .approvals
                .iter()
                .any(|request| request.call.id == call.id)
            {
                continue;
            }
            records.push(
                AuditRecord::new(AuditKind::ToolCall, generation, call.name.clone())
                    .with_call(&call.id, Some(call.arguments.clone())),
            );
        }
        for reply in &outcome.replies {
            records.push(AuditRecord::new(AuditKind::Outbound, generation, reply.clone()));
        }
        for request in &outcome.approvals {
            records.push(
                AuditRecord::new(AuditKind::ApprovalRequest, generation, request.script.name.clone())
                    .with_call(&request.call.id, Some(request.payload())),
            );
        }

        for record in records {
            if let Err(err) =
                append_audit_record(&self.settings.state_root, thread_id.as_str(), &record)
            {
                tracing::warn!(error = %err, thread = thread_id.as_str(), "failed to append audit record");
                return;
            }
        }
    }

    fn log_event(&self, level: &str, event: &str, message: &str, mut fields: Map<String, Value>) {
        fields.insert("level".to_string(), Value::from(level));
        fields.insert("message".to_string(), Value::from(message));
        if let Err(err) = append_engine_event(&self.settings.state_root, event, fields) {
            tracing::warn!(error = %err, event, "failed to append engine log");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        return format!("panic: {text}");
    }
    if let Some(text) = panic.downcast_ref::<String>() {
        return format!("panic: {text}");
    }
    "panic during turn".to_string()
}
