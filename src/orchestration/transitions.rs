//! The turn state machine as a pure function: `(state, event) -> (state, effects)`.
//! Nothing in here performs I/O; the engine executes the returned effects and
//! feeds their results back in as further events.

use crate::catalog::{resolve_in, search_in, tool_definitions, Resolution, ScriptDescriptor};
use crate::collab::{
    AssistantReply, ChatMessage, ExecutionResult, ModelRequest, ScriptArgument, ToolCall,
};
use crate::orchestration::conversation_context::ThreadContextLimits;
use crate::orchestration::dispatcher::{
    route_tool_call, working_set_details, Dispatch, ForwardTool, LocalTool,
};
use crate::orchestration::effect::{ApprovalRequest, Effect, ForwardRequest, LocalEffect};
use crate::orchestration::error::OrchestratorError;
use crate::orchestration::event::TurnEvent;
use crate::orchestration::prompt_render::{recent_messages, render_system_prompt, PromptInputs};
use crate::orchestration::state::{ConversationState, NextAction, UiPull, UiPullPurpose};
use crate::orchestration::summary::summarize_execution;
use crate::params::intent::{has_run_intent, is_affirmation, is_decline, is_proceed, words};
use crate::params::{
    has_conditional_parameters, parameter_summary, parse_reply, Negotiator, ParameterValue,
    Unresolved,
};
use crate::working_set::{apply_delta, apply_output, DeltaOutcome, ValidationOutcome};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Model consultations allowed per turn before falling back to keyword results.
pub const MAX_MODEL_ROUNDS: u8 = 3;
const NOT_FOUND_NAME_LIMIT: usize = 10;
const ORDINALS: &[&str] = &["first", "second", "third", "fourth", "fifth", "sixth"];
const SELECTION_FILLER: &[&str] = &[
    "the", "a", "one", "script", "use", "please", "pick", "choose", "i", "want", "lets", "go",
    "with", "option", "number",
];

pub trait CallIdSource: Send + Sync {
    fn next_call_id(&self) -> String;
}

pub struct TransitionContext<'a> {
    pub catalog: &'a Result<Arc<Vec<ScriptDescriptor>>, OrchestratorError>,
    pub negotiator: &'a Negotiator,
    pub call_ids: &'a dyn CallIdSource,
    pub max_candidates: usize,
    pub pull_ui_before_run: bool,
    pub context_limits: ThreadContextLimits,
}

#[derive(Debug)]
pub struct Step {
    pub state: ConversationState,
    pub effects: Vec<Effect>,
    /// Recoverable problem met while handling the event, for diagnostics.
    pub issue: Option<OrchestratorError>,
    /// The event belonged to an earlier task and was ignored.
    pub discarded: bool,
}

impl Step {
    fn new(state: ConversationState) -> Self {
        Self {
            state,
            effects: Vec::new(),
            issue: None,
            discarded: false,
        }
    }

    fn say(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.state.messages.push(ChatMessage::assistant(text.clone()));
        self.effects.push(Effect::Reply(text));
    }

    fn fail(
        &mut self,
        message: impl Into<String>,
        issue: OrchestratorError,
    ) -> Result<(), OrchestratorError> {
        tracing::warn!(error = %issue, "turn ended in error");
        self.say(message);
        self.issue = Some(issue);
        self.state.advance(NextAction::Error)
    }

    fn discard(&mut self, what: &str, generation: u64) {
        tracing::info!(
            what,
            generation,
            current = self.state.generation,
            "discarded result for a superseded request"
        );
        self.discarded = true;
        self.say("I ignored a result that belonged to an earlier request.");
    }

    /// Replies produced so far, in order.
    pub fn replies(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Reply(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Surfaces an error state and returns to idle with the task cleared.
pub fn settle(state: &mut ConversationState) {
    if state.next_action == NextAction::Error {
        state.clear_task();
    }
}

fn catalog_issue(err: &OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::NotFound { query } => OrchestratorError::NotFound {
            query: query.clone(),
        },
        other => OrchestratorError::Catalog(other.to_string()),
    }
}

fn missing_selection() -> OrchestratorError {
    OrchestratorError::Internal("no script is selected".to_string())
}

pub fn transition(
    state: ConversationState,
    event: TurnEvent,
    ctx: &TransitionContext<'_>,
) -> Result<Step, OrchestratorError> {
    let mut step = Step::new(state);
    match event {
        TurnEvent::WorkingSetValidated(outcome) => on_validated(&mut step, outcome),
        TurnEvent::UserMessage { text, ui_values } => {
            on_user_message(&mut step, text, ui_values, ctx)?
        }
        TurnEvent::ModelReplied {
            generation,
            round,
            reply,
        } => {
            if generation != step.state.generation
                || step.state.next_action != NextAction::Discovering
            {
                step.discard("model reply", generation);
            } else {
                on_model_reply(&mut step, round, reply, ctx)?;
            }
        }
        TurnEvent::ParametersFetched { generation, result } => {
            if generation != step.state.generation
                || step.state.next_action != NextAction::PresentParameters
            {
                step.discard("parameter definitions", generation);
            } else {
                on_parameters_fetched(&mut step, result, ctx)?;
            }
        }
        TurnEvent::ExecutionNotice {
            generation,
            call_id,
            result,
        } => {
            if !awaiting_execution(&step.state, generation, &call_id) {
                step.discard("execution notice", generation);
            } else {
                on_execution_notice(&mut step, &call_id, result)?;
            }
        }
        TurnEvent::ApprovalRejected {
            generation,
            call_id,
        } => {
            if !awaiting_execution(&step.state, generation, &call_id) {
                step.discard("approval rejection", generation);
            } else {
                on_approval_rejected(&mut step, &call_id)?;
            }
        }
        TurnEvent::UiParameters {
            generation,
            call_id,
            values,
        } => {
            let pull = step
                .state
                .awaiting_ui
                .clone()
                .filter(|pull| pull.call_id == call_id);
            match pull {
                Some(pull) if generation == step.state.generation => {
                    step.state.awaiting_ui = None;
                    on_ui_parameters(&mut step, pull, values, ctx)?;
                }
                _ => step.discard("ui parameters", generation),
            }
        }
    }
    Ok(step)
}

fn awaiting_execution(state: &ConversationState, generation: u64, call_id: &str) -> bool {
    generation == state.generation
        && state.next_action == NextAction::Executing
        && state.pending_call_id.as_deref() == Some(call_id)
}

fn on_validated(step: &mut Step, outcome: ValidationOutcome) {
    let current = std::mem::take(&mut step.state.working_set);
    step.state.working_set = outcome.into_set(current);
}

fn on_user_message(
    step: &mut Step,
    text: String,
    ui_values: BTreeMap<String, Value>,
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let text = text.trim().to_string();
    step.state.messages.push(ChatMessage::user(text.clone()));
    if !step.state.next_action.awaits_reply() {
        step.state.begin_task(&text);
    }
    step.state.pending_ui_values.extend(ui_values);
    step.state.pending_chat_edits = Some(text.clone());

    match step.state.next_action {
        NextAction::AskForScriptConfirmation => on_selection_reply(step),
        NextAction::ConfirmExecution => on_confirmation_reply(step, ctx),
        _ if text.is_empty() => {
            step.state.pending_chat_edits = None;
            step.say("What would you like to do?");
            Ok(())
        }
        _ => discover(step, ctx),
    }
}

fn discover(step: &mut Step, ctx: &TransitionContext<'_>) -> Result<(), OrchestratorError> {
    step.state.pending_chat_edits = None;
    let catalog = match ctx.catalog {
        Ok(catalog) => Arc::clone(catalog),
        Err(err) => {
            return step.fail(
                format!("I couldn't read the script catalog ({err}). Please check it and try again."),
                catalog_issue(err),
            );
        }
    };
    let task = step
        .state
        .current_task_description
        .clone()
        .unwrap_or_default();
    step.state.identified_candidates = search_in(&catalog, &task, ctx.max_candidates)
        .into_iter()
        .map(|scored| scored.script)
        .collect();
    step.state.advance(NextAction::Discovering)?;
    consult_model(step, 0, &catalog, ctx)
}

fn consult_model(
    step: &mut Step,
    round: u8,
    catalog: &[ScriptDescriptor],
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let state = &step.state;
    let system_prompt = render_system_prompt(PromptInputs {
        task: state.current_task_description.as_deref(),
        candidates: &state.identified_candidates,
        catalog,
        working_set: &state.working_set,
    })?;
    let exposed = if state.identified_candidates.is_empty() {
        catalog
    } else {
        state.identified_candidates.as_slice()
    };
    let request = ModelRequest {
        system_prompt,
        messages: recent_messages(&state.messages, ctx.context_limits),
        tools: tool_definitions(exposed),
    };
    step.effects
        .push(Effect::Local(LocalEffect::ConsultModel { round, request }));
    Ok(())
}

fn continue_model(
    step: &mut Step,
    round: u8,
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let catalog = match ctx.catalog {
        Ok(catalog) => Arc::clone(catalog),
        Err(err) => {
            return step.fail(
                format!("I couldn't read the script catalog ({err})."),
                catalog_issue(err),
            )
        }
    };
    if round + 1 < MAX_MODEL_ROUNDS {
        return consult_model(step, round + 1, &catalog, ctx);
    }
    tracing::warn!(rounds = MAX_MODEL_ROUNDS, "model round limit reached; using keyword candidates");
    conclude_discovery(step, None, &catalog)
}

#[derive(Debug, Deserialize)]
struct Ranking {
    script_ids: Vec<String>,
    #[serde(default)]
    recommended: Option<String>,
}

/// Accepts a ranking the model wrote as text instead of calling `select_script`.
fn parse_ranking(text: &str) -> Option<Ranking> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    if !body.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Ranking>(body).ok()
}

fn on_model_reply(
    step: &mut Step,
    round: u8,
    reply: Result<AssistantReply, String>,
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let catalog = match ctx.catalog {
        Ok(catalog) => Arc::clone(catalog),
        Err(err) => {
            return step.fail(
                format!("I couldn't read the script catalog ({err})."),
                catalog_issue(err),
            )
        }
    };
    match reply {
        Err(reason) => {
            tracing::warn!(reason = reason.as_str(), "model unavailable; using keyword candidates");
            step.issue = Some(OrchestratorError::Model(reason));
            conclude_discovery(step, None, &catalog)
        }
        Ok(AssistantReply::Text(text)) => match parse_ranking(&text) {
            Some(ranking) => apply_ranking(step, ranking.script_ids, ranking.recommended, &catalog),
            None => {
                step.say(text);
                step.state.identified_candidates.clear();
                step.state.advance(NextAction::Idle)
            }
        },
        Ok(AssistantReply::ToolCall { name, arguments }) => {
            on_model_tool_call(step, round, name, arguments, &catalog, ctx)
        }
    }
}

fn tool_result(step: &mut Step, call_id: &str, content: impl Into<String>) {
    step.state
        .messages
        .push(ChatMessage::tool_result(call_id, content));
}

fn on_model_tool_call(
    step: &mut Step,
    round: u8,
    name: String,
    arguments: Value,
    catalog: &[ScriptDescriptor],
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let call = ToolCall {
        id: ctx.call_ids.next_call_id(),
        name: name.clone(),
        arguments: arguments.clone(),
    };
    step.state
        .messages
        .push(ChatMessage::assistant_tool_call(call.clone()));
    tracing::debug!(tool = name.as_str(), call_id = call.id.as_str(), "model tool call");

    match route_tool_call(&name, &arguments) {
        Dispatch::Local(LocalTool::SelectScript {
            script_ids,
            recommended,
        }) => {
            tool_result(step, &call.id, "Ranking received.");
            apply_ranking(step, script_ids, recommended, catalog)
        }
        Dispatch::Local(LocalTool::GetParameters { script_id }) => {
            match resolve_in(catalog, &script_id) {
                Resolution::Found { script, .. } => {
                    tool_result(step, &call.id, format!("Selected {}.", script.name));
                    select_and_fetch(step, script)
                }
                resolution => {
                    tool_result(step, &call.id, format!("No single script matches `{script_id}`."));
                    unresolved_script(step, &script_id, resolution, catalog)
                }
            }
        }
        Dispatch::Local(LocalTool::EditWorkingSet(delta)) => {
            step.state.working_set = apply_delta(&step.state.working_set, &delta);
            let message = format!("{} {}", delta.message(), step.state.working_set.summary());
            tool_result(step, &call.id, message);
            continue_model(step, round, ctx)
        }
        Dispatch::Local(LocalTool::ClearWorkingSet) => {
            step.state.working_set.clear();
            tool_result(step, &call.id, "Working set cleared.");
            continue_model(step, round, ctx)
        }
        Dispatch::Local(LocalTool::GetWorkingSetDetails) => {
            let details = working_set_details(&step.state.working_set).to_string();
            tool_result(step, &call.id, details);
            continue_model(step, round, ctx)
        }
        Dispatch::Approval { tool_id, arguments } => match resolve_in(catalog, &tool_id) {
            Resolution::Found { script, .. } => {
                tool_result(step, &call.id, "Waiting for the user to approve the run.");
                select_and_fetch(step, script)?;
                step.state.pending_run_arguments = Some(arguments);
                Ok(())
            }
            resolution => {
                tool_result(step, &call.id, format!("No single script matches `{tool_id}`."));
                unresolved_script(step, &tool_id, resolution, catalog)
            }
        },
        Dispatch::Forward(ForwardTool::GetUiParameters) => {
            step.state.awaiting_ui = Some(UiPull {
                call_id: call.id.clone(),
                purpose: UiPullPurpose::ForModel { round },
            });
            step.effects
                .push(Effect::ForwardToCaller(ForwardRequest::GetUiParameters {
                    generation: step.state.generation,
                    call_id: call.id,
                    tool_id: step
                        .state
                        .selected_script
                        .as_ref()
                        .map(|script| script.tool_id.to_string()),
                }));
            step.say("Let me check the values in the parameters panel.");
            Ok(())
        }
        Dispatch::Unknown(tool) => {
            tool_result(step, &call.id, format!("Unknown tool `{tool}`."));
            step.fail(
                "I tried to use a tool that isn't available. Could you rephrase the request?",
                OrchestratorError::UnknownTool { tool },
            )
        }
        Dispatch::Invalid { tool, source } => {
            tool_result(step, &call.id, format!("Invalid arguments: {source}"));
            step.fail(
                "I couldn't understand the tool request I produced. Could you rephrase the request?",
                OrchestratorError::Json { tool, source },
            )
        }
    }
}

fn unresolved_script(
    step: &mut Step,
    query: &str,
    resolution: Resolution,
    catalog: &[ScriptDescriptor],
) -> Result<(), OrchestratorError> {
    match resolution {
        Resolution::Ambiguous { candidates, .. } => {
            step.issue = Some(OrchestratorError::Ambiguous {
                query: query.to_string(),
                candidates: candidates
                    .iter()
                    .map(|script| script.tool_id.to_string())
                    .collect(),
            });
            step.state.identified_candidates = candidates;
            step.state.recommended_tool_id = None;
            step.state.advance(NextAction::AskForScriptConfirmation)?;
            let prompt = candidate_prompt(&step.state);
            step.say(format!("`{query}` matches more than one script.\n\n{prompt}"));
            Ok(())
        }
        _ => {
            step.issue = Some(OrchestratorError::NotFound {
                query: query.to_string(),
            });
            step.say(not_found_message(catalog));
            step.state.identified_candidates.clear();
            step.state.advance(NextAction::Idle)
        }
    }
}

fn apply_ranking(
    step: &mut Step,
    script_ids: Vec<String>,
    recommended: Option<String>,
    catalog: &[ScriptDescriptor],
) -> Result<(), OrchestratorError> {
    let found = |id: &str| match resolve_in(catalog, id) {
        Resolution::Found { script, .. } => Some(script),
        _ => None,
    };
    let mut ranked: Vec<ScriptDescriptor> = Vec::new();
    for id in &script_ids {
        if let Some(script) = found(id) {
            if !ranked.iter().any(|known| known.tool_id == script.tool_id) {
                ranked.push(script);
            }
        }
    }
    let recommended = recommended.as_deref().and_then(found);
    if let Some(script) = &recommended {
        if !ranked.iter().any(|known| known.tool_id == script.tool_id) {
            ranked.insert(0, script.clone());
        }
    }

    if script_ids.is_empty() && recommended.is_none() {
        step.state.identified_candidates.clear();
    } else if ranked.is_empty() {
        tracing::info!(
            ids = script_ids.join(","),
            "model ranking named no known script; keeping keyword candidates"
        );
    } else {
        step.state.identified_candidates = ranked;
    }
    conclude_discovery(
        step,
        recommended.map(|script| script.tool_id.to_string()),
        catalog,
    )
}

fn conclude_discovery(
    step: &mut Step,
    recommended: Option<String>,
    catalog: &[ScriptDescriptor],
) -> Result<(), OrchestratorError> {
    match step.state.identified_candidates.len() {
        0 => {
            step.issue = Some(OrchestratorError::NotFound {
                query: step
                    .state
                    .current_task_description
                    .clone()
                    .unwrap_or_default(),
            });
            step.say(not_found_message(catalog));
            step.state.advance(NextAction::Idle)
        }
        1 => {
            let only = step.state.identified_candidates.remove(0);
            select_and_fetch(step, only)
        }
        _ => {
            step.state.recommended_tool_id = recommended;
            step.state.advance(NextAction::AskForScriptConfirmation)?;
            let prompt = candidate_prompt(&step.state);
            step.say(prompt);
            Ok(())
        }
    }
}

fn not_found_message(catalog: &[ScriptDescriptor]) -> String {
    if catalog.is_empty() {
        return "I couldn't find a script for that, and the script catalog is empty.".to_string();
    }
    let mut names = catalog
        .iter()
        .take(NOT_FOUND_NAME_LIMIT)
        .map(|script| script.name.clone())
        .collect::<Vec<_>>();
    if catalog.len() > NOT_FOUND_NAME_LIMIT {
        names.push(format!("and {} more", catalog.len() - NOT_FOUND_NAME_LIMIT));
    }
    format!(
        "I couldn't find a script for that. Available scripts: {}.",
        names.join(", ")
    )
}

fn candidate_prompt(state: &ConversationState) -> String {
    let mut lines = vec!["I found several scripts that could help:".to_string()];
    for (idx, script) in state.identified_candidates.iter().enumerate() {
        let mut line = format!("{}. **{}** (`{}`)", idx + 1, script.name, script.tool_id);
        let description = script.description.trim();
        if !description.is_empty() {
            line.push_str(&format!(" - {description}"));
        }
        lines.push(line);
    }
    let recommended = state.recommended_tool_id.as_deref().and_then(|tool_id| {
        state
            .identified_candidates
            .iter()
            .find(|script| script.tool_id.as_str() == tool_id)
    });
    lines.push(String::new());
    match recommended {
        Some(script) => lines.push(format!(
            "I'd suggest **{}**. Say yes to use it, or reply with a number or name.",
            script.name
        )),
        None => lines.push("Reply with a number or name to choose one.".to_string()),
    }
    lines.join("\n")
}

fn select_and_fetch(step: &mut Step, script: ScriptDescriptor) -> Result<(), OrchestratorError> {
    step.state.select(script.clone());
    step.state.advance(NextAction::PresentParameters)?;
    step.effects
        .push(Effect::Local(LocalEffect::FetchParameters { script }));
    Ok(())
}

enum Choice {
    One(ScriptDescriptor),
    Several(Vec<ScriptDescriptor>),
    Nothing,
}

fn choose_by_index(reply_words: &[String], candidates: &[ScriptDescriptor]) -> Option<usize> {
    let position = reply_words.iter().find_map(|word| {
        let word = word.trim_start_matches('#');
        if let Ok(number) = word.parse::<usize>() {
            return Some(number);
        }
        if word == "last" {
            return Some(candidates.len());
        }
        ORDINALS
            .iter()
            .position(|ordinal| *ordinal == word)
            .map(|idx| idx + 1)
    })?;
    (1..=candidates.len())
        .contains(&position)
        .then_some(position - 1)
}

fn choose_candidate(
    reply: &str,
    candidates: &[ScriptDescriptor],
    recommended: Option<&str>,
) -> Choice {
    let reply_words = words(reply);
    if let Some(idx) = choose_by_index(&reply_words, candidates) {
        return Choice::One(candidates[idx].clone());
    }
    match resolve_in(candidates, reply) {
        Resolution::Found { script, .. } => return Choice::One(script),
        Resolution::Ambiguous { candidates, .. } => return Choice::Several(candidates),
        Resolution::NotFound => {}
    }

    let query = reply_words
        .iter()
        .filter(|word| !SELECTION_FILLER.contains(&word.as_str()))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    if query.chars().count() >= 3 {
        let partial = candidates
            .iter()
            .filter(|script| {
                let spoken = words(&script.spoken_name()).join(" ");
                spoken.contains(&query) || query.contains(&spoken)
            })
            .cloned()
            .collect::<Vec<_>>();
        match partial.len() {
            0 => {}
            1 => return Choice::One(partial[0].clone()),
            _ => return Choice::Several(partial),
        }
    }

    if is_affirmation(reply) {
        if let Some(script) = recommended.and_then(|tool_id| {
            candidates
                .iter()
                .find(|script| script.tool_id.as_str() == tool_id)
        }) {
            return Choice::One(script.clone());
        }
    }
    Choice::Nothing
}

fn on_selection_reply(step: &mut Step) -> Result<(), OrchestratorError> {
    let reply = step.state.pending_chat_edits.take().unwrap_or_default();
    if is_decline(&reply) {
        step.say("Okay, I won't run anything. What else can I help with?");
        step.state.clear_task();
        return Ok(());
    }
    let candidates = step.state.identified_candidates.clone();
    match choose_candidate(&reply, &candidates, step.state.recommended_tool_id.as_deref()) {
        Choice::One(script) => select_and_fetch(step, script),
        Choice::Several(matches) => {
            step.issue = Some(OrchestratorError::Ambiguous {
                query: reply.clone(),
                candidates: matches
                    .iter()
                    .map(|script| script.tool_id.to_string())
                    .collect(),
            });
            let prompt = candidate_prompt(&step.state);
            step.say(format!("That matches more than one script.\n\n{prompt}"));
            Ok(())
        }
        Choice::Nothing => {
            step.issue = Some(OrchestratorError::NotFound { query: reply });
            let prompt = candidate_prompt(&step.state);
            step.say(format!("I didn't catch which script you meant.\n\n{prompt}"));
            Ok(())
        }
    }
}

fn on_parameters_fetched(
    step: &mut Step,
    result: Result<Vec<crate::catalog::ParameterDefinition>, String>,
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let name = step
        .state
        .selected_script
        .as_ref()
        .map(|script| script.name.clone())
        .ok_or_else(missing_selection)?;
    let definitions = match result {
        Ok(definitions) => definitions,
        Err(reason) => {
            return step.fail(
                format!("I couldn't read the parameters of **{name}**: {reason}"),
                OrchestratorError::Catalog(reason),
            );
        }
    };

    let ui_values = std::mem::take(&mut step.state.pending_ui_values);
    step.state.parameter_values = ctx.negotiator.overlay(&definitions, &ui_values);
    step.state.parameter_definitions = definitions;

    if let Some(arguments) = step.state.pending_run_arguments.take() {
        let arguments = arguments.into_iter().collect::<BTreeMap<_, _>>();
        let merged = ctx.negotiator.merge_onto(
            &step.state.parameter_values,
            &step.state.parameter_definitions,
            &arguments,
            "",
        );
        step.state.parameter_values = merged.parameters;
        step.state.parameter_set_reviewed = true;
        return request_approval(step, ctx);
    }

    step.state.parameter_set_reviewed =
        !has_conditional_parameters(&step.state.parameter_definitions);
    step.state.advance(NextAction::ConfirmExecution)?;
    let descriptor = step
        .state
        .selected_with_parameters()
        .ok_or_else(missing_selection)?;
    let presentation = ctx
        .negotiator
        .present(&descriptor, &step.state.parameter_values);
    step.say(presentation);
    Ok(())
}

fn unresolved_issue(unresolved: &Unresolved) -> OrchestratorError {
    match unresolved {
        Unresolved::Clarification(needed) => OrchestratorError::TypeMismatch {
            parameter: needed.parameter.clone(),
            message: needed.message.clone(),
        },
        Unresolved::AmbiguousName { phrase, candidates } => OrchestratorError::Ambiguous {
            query: phrase.clone(),
            candidates: candidates.clone(),
        },
    }
}

fn backticked(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("`{name}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn on_confirmation_reply(
    step: &mut Step,
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    let reply = step.state.pending_chat_edits.take().unwrap_or_default();
    let ui_values = std::mem::take(&mut step.state.pending_ui_values);
    let parsed = parse_reply(&reply);
    // intent is read only from clauses that set no parameter
    let command = parsed.command_text();
    let descriptor = step
        .state
        .selected_with_parameters()
        .ok_or_else(missing_selection)?;

    if is_decline(&command) && parsed.edits.is_empty() {
        step.say(format!(
            "Okay, I cancelled **{}**. Nothing was run.",
            descriptor.name
        ));
        step.state.clear_task();
        return Ok(());
    }

    if descriptor.parameters.is_empty() {
        if has_run_intent(&command) || is_affirmation(&command) {
            return request_approval(step, ctx);
        }
        step.say(format!(
            "Do you want to run **{}**? Say yes to run it or no to cancel.",
            descriptor.name
        ));
        return Ok(());
    }

    let outcome = ctx.negotiator.merge_onto(
        &step.state.parameter_values,
        &descriptor.parameters,
        &ui_values,
        &reply,
    );
    step.state.parameter_values = outcome.parameters.clone();
    if let Some(first) = outcome.unresolved.first() {
        step.issue = Some(unresolved_issue(first));
        let questions = outcome
            .unresolved
            .iter()
            .map(Unresolved::message)
            .collect::<Vec<_>>()
            .join("\n");
        step.say(questions);
        return Ok(());
    }

    let first_review = !step.state.parameter_set_reviewed;
    step.state.parameter_set_reviewed = true;
    if first_review && is_proceed(&command) {
        step.say(parameter_summary(&descriptor, &step.state.parameter_values));
        return Ok(());
    }

    if has_run_intent(&command) || (outcome.applied.is_empty() && is_affirmation(&command)) {
        if ctx.pull_ui_before_run {
            return pull_ui_for_run(step, ctx, &descriptor);
        }
        return request_approval(step, ctx);
    }

    let mut reply_text = String::new();
    if !outcome.applied.is_empty() {
        reply_text.push_str(&format!("Updated {}.\n\n", backticked(&outcome.applied)));
    }
    if !outcome.dropped.is_empty() {
        reply_text.push_str(&format!(
            "I couldn't match {} to a parameter of **{}**, so I left it out.\n\n",
            backticked(&outcome.dropped),
            descriptor.name
        ));
    }
    if outcome.applied.is_empty() && outcome.dropped.is_empty() && ui_values.is_empty() {
        reply_text.push_str("I didn't find any parameter changes in that.\n\n");
    }
    reply_text.push_str(&parameter_summary(&descriptor, &step.state.parameter_values));
    step.say(reply_text);
    Ok(())
}

fn pull_ui_for_run(
    step: &mut Step,
    ctx: &TransitionContext<'_>,
    descriptor: &ScriptDescriptor,
) -> Result<(), OrchestratorError> {
    let call_id = ctx.call_ids.next_call_id();
    step.state.awaiting_ui = Some(UiPull {
        call_id: call_id.clone(),
        purpose: UiPullPurpose::BeforeRun,
    });
    step.effects
        .push(Effect::ForwardToCaller(ForwardRequest::GetUiParameters {
            generation: step.state.generation,
            call_id,
            tool_id: Some(descriptor.tool_id.to_string()),
        }));
    step.say("Reading the latest values from the parameters panel before running.");
    Ok(())
}

fn on_ui_parameters(
    step: &mut Step,
    pull: UiPull,
    values: BTreeMap<String, Value>,
    ctx: &TransitionContext<'_>,
) -> Result<(), OrchestratorError> {
    match pull.purpose {
        UiPullPurpose::BeforeRun => {
            if step.state.next_action != NextAction::ConfirmExecution {
                step.discard("ui parameters", step.state.generation);
                return Ok(());
            }
            let merged = ctx.negotiator.merge_onto(
                &step.state.parameter_values,
                &step.state.parameter_definitions,
                &values,
                "",
            );
            step.state.parameter_values = merged.parameters;
            request_approval(step, ctx)
        }
        UiPullPurpose::ForModel { round } => {
            if step.state.next_action != NextAction::Discovering {
                step.discard("ui parameters", step.state.generation);
                return Ok(());
            }
            let content = serde_json::to_string(&values)
                .map_err(|err| OrchestratorError::Internal(err.to_string()))?;
            tool_result(step, &pull.call_id, content);
            step.state.pending_ui_values.extend(values);
            continue_model(step, round, ctx)
        }
    }
}

fn approval_prompt(script: &ScriptDescriptor, arguments: &[ScriptArgument]) -> String {
    if arguments.is_empty() {
        return format!(
            "Ready to run **{}** (no parameters). Please approve or reject the run.",
            script.name
        );
    }
    let lines = arguments
        .iter()
        .map(|argument| format!("- {}: {}", argument.name, argument.value))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Ready to run **{}** with:\n{lines}\n\nPlease approve or reject the run.",
        script.name
    )
}

/// Emits the run as a tool call for the caller to approve. Nothing executes here.
fn request_approval(step: &mut Step, ctx: &TransitionContext<'_>) -> Result<(), OrchestratorError> {
    let script = step
        .state
        .selected_with_parameters()
        .ok_or_else(missing_selection)?;
    let final_parameters = step.state.parameter_values.clone();
    let arguments = final_parameters
        .iter()
        .map(ParameterValue::to_argument)
        .collect::<Vec<_>>();
    let call = ToolCall {
        id: ctx.call_ids.next_call_id(),
        name: script.run_tool_name(),
        arguments: Value::Object(
            arguments
                .iter()
                .map(|argument| (argument.name.clone(), Value::String(argument.value.clone())))
                .collect(),
        ),
    };

    step.state.advance(NextAction::Executing)?;
    step.state
        .messages
        .push(ChatMessage::assistant_tool_call(call.clone()));
    step.state.final_parameters = final_parameters;
    step.state.pending_call_id = Some(call.id.clone());
    step.say(approval_prompt(&script, &arguments));
    step.effects.push(Effect::ApprovalRequired(ApprovalRequest {
        generation: step.state.generation,
        call,
        script,
        arguments,
        is_final_approval: true,
    }));
    Ok(())
}

fn execution_tool_result(result: &ExecutionResult) -> String {
    if result.success {
        result.output.clone()
    } else {
        format!(
            "Execution failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        )
    }
}

fn on_execution_notice(
    step: &mut Step,
    call_id: &str,
    result: ExecutionResult,
) -> Result<(), OrchestratorError> {
    let name = step
        .state
        .selected_script
        .as_ref()
        .map(|script| script.name.clone())
        .ok_or_else(missing_selection)?;
    tool_result(step, call_id, execution_tool_result(&result));
    step.state.advance(NextAction::Summarizing)?;

    let mut reply = summarize_execution(&name, &result);
    if result.success {
        let mut output = result.output.clone();
        if let Some(structured) = &result.structured_output {
            output.push('\n');
            match structured {
                Value::String(text) => output.push_str(text),
                other => output.push_str(&other.to_string()),
            }
        }
        if let DeltaOutcome::Applied { set, messages, .. } =
            apply_output(&step.state.working_set, &output)
        {
            step.state.working_set = set;
            reply.push_str("\n\n");
            reply.push_str(&messages.join("\n"));
        }
    } else {
        step.issue = Some(OrchestratorError::TransientHost(
            result
                .error_message
                .clone()
                .unwrap_or_else(|| "execution failed".to_string()),
        ));
    }
    step.state.execution_result = Some(result);
    step.say(reply);
    step.state.clear_task();
    Ok(())
}

fn on_approval_rejected(step: &mut Step, call_id: &str) -> Result<(), OrchestratorError> {
    let name = step
        .state
        .selected_script
        .as_ref()
        .map(|script| script.name.clone())
        .ok_or_else(missing_selection)?;
    tool_result(step, call_id, "The user rejected this run.");
    step.state.final_parameters.clear();
    step.state.pending_call_id = None;
    step.state.advance(NextAction::ConfirmExecution)?;
    step.say(format!(
        "Okay, I didn't run **{name}**. Change any parameter or say 'run' when you're ready."
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rankings_written_as_text_are_recognized() {
        let ranking = parse_ranking("```json\n{\"script_ids\": [\"a\", \"b\"], \"recommended\": \"b\"}\n```")
            .expect("ranking");
        assert_eq!(ranking.script_ids, vec!["a", "b"]);
        assert_eq!(ranking.recommended.as_deref(), Some("b"));
        assert!(parse_ranking("Here are some options").is_none());
    }

    #[test]
    fn index_replies_pick_by_position() {
        let scripts = ["A.cs", "B.cs"]
            .iter()
            .map(|name| ScriptDescriptor::new(name, name, (*name).into()).expect("descriptor"))
            .collect::<Vec<_>>();
        assert_eq!(choose_by_index(&words("2"), &scripts), Some(1));
        assert_eq!(choose_by_index(&words("the first one"), &scripts), Some(0));
        assert_eq!(choose_by_index(&words("#3"), &scripts), None);
    }
}
