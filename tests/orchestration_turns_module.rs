use hostpilot::catalog::{
    CatalogError, ManifestCatalog, ParamType, ParameterDefinition, ScriptDescriptor,
    ScriptRegistry,
};
use hostpilot::collab::{
    AssistantReply, CollaboratorError, ExecutionResult, HostValidator, LanguageModel,
    ModelRequest, ScriptArgument, ScriptCatalog,
};
use hostpilot::config::EngineSettings;
use hostpilot::orchestration::conversation_context::{read_audit_records, AuditKind};
use hostpilot::orchestration::{
    execution_notice, rejection_notice, CallIdSource, CheckpointError, CheckpointStore,
    ConversationHub, FileCheckpointStore, ForwardRequest, InMemoryCheckpointStore, NextAction,
    OrchestratorError, TurnEngine, TurnEvent, TurnOutcome,
};
use hostpilot::shared::ids::ThreadId;
use hostpilot::working_set::{Reconciler, WorkingSet};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

struct ScriptedModel {
    replies: Mutex<VecDeque<Result<AssistantReply, CollaboratorError>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<AssistantReply, CollaboratorError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, request: &ModelRequest) -> Result<AssistantReply, CollaboratorError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Ok(AssistantReply::Text("Nothing else to do.".to_string())))
    }
}

struct StaticCatalog(Vec<ScriptDescriptor>);

impl ScriptCatalog for StaticCatalog {
    fn list_scripts(&self) -> Result<Vec<ScriptDescriptor>, CatalogError> {
        Ok(self.0.clone())
    }
}

struct EverythingExists;

impl HostValidator for EverythingExists {
    fn still_exist(&self, ids: &[i64]) -> Result<Vec<i64>, CollaboratorError> {
        Ok(ids.to_vec())
    }
}

#[derive(Default)]
struct SequentialCallIds(AtomicU64);

impl CallIdSource for SequentialCallIds {
    fn next_call_id(&self) -> String {
        format!("call-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

fn tool_call(name: &str, arguments: Value) -> Result<AssistantReply, CollaboratorError> {
    Ok(AssistantReply::ToolCall {
        name: name.to_string(),
        arguments,
    })
}

fn create_walls() -> ScriptDescriptor {
    let mut script = ScriptDescriptor::new(
        "Create_Walls.cs",
        "Walls/Create_Walls.cs",
        "/scripts/Walls/Create_Walls.cs".into(),
    )
    .expect("descriptor");
    script.description = "Creates straight walls".to_string();
    script.categories = vec!["Walls".to_string()];
    script.parameters = vec![
        ParameterDefinition::new("heightInMeters", ParamType::Number, json!(3.0)),
        ParameterDefinition::new("levelName", ParamType::String, json!("Level 1")),
    ];
    script
}

fn create_floors() -> ScriptDescriptor {
    let mut script = ScriptDescriptor::new(
        "Create_Floors.cs",
        "Floors/Create_Floors.cs",
        "/scripts/Floors/Create_Floors.cs".into(),
    )
    .expect("descriptor");
    script.parameters = vec![ParameterDefinition::new(
        "thicknessInMm",
        ParamType::Number,
        json!(200),
    )];
    script
}

fn purge_views() -> ScriptDescriptor {
    ScriptDescriptor::new(
        "Purge_Unused_Views.cs",
        "Cleanup/Purge_Unused_Views.cs",
        "/scripts/Cleanup/Purge_Unused_Views.cs".into(),
    )
    .expect("descriptor")
}

fn offset_levels() -> ScriptDescriptor {
    let mut script = ScriptDescriptor::new(
        "Offset_Levels.cs",
        "Levels/Offset_Levels.cs",
        "/scripts/Levels/Offset_Levels.cs".into(),
    )
    .expect("descriptor");
    script.parameters = vec![
        ParameterDefinition::new("startLevel", ParamType::String, json!("Level 1")),
        ParameterDefinition::new("flipped", ParamType::Boolean, json!(false)),
    ];
    script
}

fn rename_level() -> ScriptDescriptor {
    let mut script = ScriptDescriptor::new(
        "Rename_Level.cs",
        "Levels/Rename_Level.cs",
        "/scripts/Levels/Rename_Level.cs".into(),
    )
    .expect("descriptor");
    script.parameters = vec![ParameterDefinition::new(
        "levelName",
        ParamType::String,
        json!("Level 1"),
    )];
    script
}

struct Harness {
    hub: ConversationHub,
    model: Arc<ScriptedModel>,
    thread: ThreadId,
    temp: TempDir,
}

fn engine(
    state_root: &Path,
    catalog: Arc<dyn ScriptCatalog>,
    model: Arc<ScriptedModel>,
    pull_ui_before_run: bool,
) -> TurnEngine {
    let settings = EngineSettings {
        state_root: state_root.to_path_buf(),
        pull_ui_before_run,
        ..EngineSettings::default()
    };
    let registry = Arc::new(ScriptRegistry::new(catalog, Duration::from_secs(2)));
    let reconciler = Reconciler::new(Arc::new(EverythingExists), Duration::from_secs(2));
    TurnEngine::new(settings, registry, model, reconciler)
        .with_call_ids(Arc::new(SequentialCallIds::default()))
}

fn harness_with(
    scripts: Vec<ScriptDescriptor>,
    replies: Vec<Result<AssistantReply, CollaboratorError>>,
    pull_ui_before_run: bool,
) -> Harness {
    let temp = tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModel::new(replies));
    let engine = engine(
        temp.path(),
        Arc::new(StaticCatalog(scripts)),
        Arc::clone(&model),
        pull_ui_before_run,
    );
    Harness {
        hub: ConversationHub::new(Arc::new(engine), Arc::new(InMemoryCheckpointStore::default())),
        model,
        thread: ThreadId::parse("thread-1").expect("thread id"),
        temp,
    }
}

fn harness(
    scripts: Vec<ScriptDescriptor>,
    replies: Vec<Result<AssistantReply, CollaboratorError>>,
) -> Harness {
    harness_with(scripts, replies, false)
}

impl Harness {
    fn say(&self, text: &str) -> TurnOutcome {
        self.hub.submit(&self.thread, TurnEvent::user(text))
    }

    fn submit(&self, event: TurnEvent) -> TurnOutcome {
        self.hub.submit(&self.thread, event)
    }

    fn state(&self) -> hostpilot::orchestration::ConversationState {
        self.hub.snapshot(&self.thread).expect("thread state")
    }
}

fn select(ids: &[&str]) -> Result<AssistantReply, CollaboratorError> {
    tool_call("select_script", json!({ "script_ids": ids }))
}

fn last_reply(outcome: &TurnOutcome) -> &str {
    outcome.replies.last().map(String::as_str).unwrap_or_default()
}

#[test]
fn selecting_editing_and_approving_a_script() {
    let h = harness(
        vec![create_walls(), create_floors()],
        vec![select(&["walls_create_walls"])],
    );

    let presented = h.say("create walls");
    assert_eq!(presented.next_action, NextAction::ConfirmExecution);
    assert!(presented.error.is_none(), "{:?}", presented.error);
    assert!(presented.approvals.is_empty());
    assert_eq!(
        last_reply(&presented),
        "Here are the parameters for **Create_Walls.cs**:\n- heightInMeters (number): 3.0\n- levelName (string): Level 1\n\nSay 'run' to execute with these values, or tell me what to change."
    );

    let requests = h.model.requests();
    assert_eq!(requests.len(), 1);
    let offered = requests[0]
        .tools
        .iter()
        .map(|tool| tool.name.as_str())
        .collect::<Vec<_>>();
    assert!(offered.contains(&"run_walls_create_walls"));
    assert!(offered.contains(&"select_script"));
    assert!(requests[0].system_prompt.contains("walls_create_walls"));

    let edited = h.say("set heightInMeters to 2.5");
    assert_eq!(edited.next_action, NextAction::ConfirmExecution);
    assert!(last_reply(&edited).starts_with("Updated `heightInMeters`."));
    assert!(last_reply(&edited).contains("- heightInMeters (number): 2.5"));

    let gated = h.say("run it");
    assert_eq!(gated.next_action, NextAction::Executing);
    assert_eq!(gated.approvals.len(), 1);
    let request = gated.approvals[0].clone();
    assert_eq!(request.call.id, "call-2");
    assert_eq!(request.call.name, "run_walls_create_walls");
    assert_eq!(
        request.arguments,
        vec![
            ScriptArgument {
                name: "heightInMeters".to_string(),
                value: "2.5".to_string(),
            },
            ScriptArgument {
                name: "levelName".to_string(),
                value: "Level 1".to_string(),
            },
        ]
    );
    let payload = request.payload();
    assert_eq!(payload["is_final_approval"], json!(true));
    assert_eq!(payload["toolId"], json!("walls_create_walls"));
    assert_eq!(
        last_reply(&gated),
        "Ready to run **Create_Walls.cs** with:\n- heightInMeters: 2.5\n- levelName: Level 1\n\nPlease approve or reject the run."
    );
    assert_eq!(h.state().pending_call_id.as_deref(), Some("call-2"));

    let output = concat!(
        "SUMMARY: Created 2 walls\n",
        "{\"paracore_output_type\":\"working_set_elements\",\"operation\":\"add\",",
        "\"elements_by_category\":{\"Walls\":[11,12]},\"display_message\":\"Added 2 walls to the working set.\"}"
    );
    let finished = h.submit(execution_notice(
        &request,
        ExecutionResult {
            success: true,
            output: output.to_string(),
            error_message: None,
            structured_output: None,
        },
    ));
    assert_eq!(finished.next_action, NextAction::Idle);
    assert_eq!(
        finished.replies,
        vec![
            "✅ **Create_Walls.cs** finished. Created 2 walls\n\nAdded 2 walls to the working set."
                .to_string()
        ]
    );
    let state = h.state();
    assert_eq!(state.working_set.get("Walls"), Some(&[11, 12][..]));
    assert_eq!(state.selected_script, None);
    assert_eq!(h.model.requests().len(), 1);
}

#[test]
fn failed_runs_are_summarized_and_end_the_task() {
    let h = harness(vec![create_walls()], vec![select(&["walls_create_walls"])]);
    h.say("create walls");
    let gated = h.say("run");
    let request = gated.approvals[0].clone();

    let finished = h.submit(execution_notice(
        &request,
        ExecutionResult::failed("Level 1 is locked"),
    ));
    assert_eq!(finished.next_action, NextAction::Idle);
    assert_eq!(
        finished.replies,
        vec!["❌ **Create_Walls.cs** failed: Level 1 is locked".to_string()]
    );
    assert!(matches!(
        finished.error,
        Some(OrchestratorError::TransientHost(_))
    ));
}

#[test]
fn a_parameterless_script_goes_straight_to_approval() {
    let h = harness(
        vec![purge_views()],
        vec![tool_call(
            "get_parameters",
            json!({ "script_id": "purge_unused_views" }),
        )],
    );

    let presented = h.say("purge unused views");
    assert_eq!(presented.next_action, NextAction::ConfirmExecution);
    assert!(last_reply(&presented).contains("doesn't need any parameters"));

    let gated = h.say("do it");
    assert_eq!(gated.next_action, NextAction::Executing);
    assert_eq!(gated.approvals.len(), 1);
    assert!(gated.approvals[0].arguments.is_empty());
    assert_eq!(
        gated.approvals[0].call.name,
        "run_cleanup_purge_unused_views"
    );
    assert_eq!(
        last_reply(&gated),
        "Ready to run **Purge_Unused_Views.cs** (no parameters). Please approve or reject the run."
    );
}

#[test]
fn a_value_that_does_not_fit_the_type_asks_instead_of_running() {
    let h = harness(vec![create_walls()], vec![select(&["walls_create_walls"])]);
    h.say("create walls");

    let outcome = h.say("set heightInMeters to four feet");
    assert_eq!(outcome.next_action, NextAction::ConfirmExecution);
    assert!(outcome.approvals.is_empty());
    match &outcome.error {
        Some(OrchestratorError::TypeMismatch { parameter, .. }) => {
            assert_eq!(parameter, "heightInMeters")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(last_reply(&outcome).contains("`heightInMeters` needs a number"));
    assert_eq!(h.state().parameter_values[0].value, json!(3.0));

    let cancelled = h.say("cancel");
    assert_eq!(cancelled.next_action, NextAction::Idle);
    assert_eq!(
        cancelled.replies,
        vec!["Okay, I cancelled **Create_Walls.cs**. Nothing was run.".to_string()]
    );
}

#[test]
fn several_candidates_are_offered_until_one_is_picked() {
    let h = harness(
        vec![create_walls(), create_floors()],
        vec![tool_call(
            "select_script",
            json!({
                "script_ids": ["walls_create_walls", "floors_create_floors"],
                "recommended": "floors_create_floors"
            }),
        )],
    );

    let offered = h.say("create");
    assert_eq!(offered.next_action, NextAction::AskForScriptConfirmation);
    let prompt = last_reply(&offered);
    assert!(prompt.contains("1. **Create_Walls.cs** (`walls_create_walls`)"), "{prompt}");
    assert!(prompt.contains("2. **Create_Floors.cs** (`floors_create_floors`)"), "{prompt}");
    assert!(prompt.contains("I'd suggest **Create_Floors.cs**"), "{prompt}");

    let unclear = h.say("hmm");
    assert_eq!(unclear.next_action, NextAction::AskForScriptConfirmation);
    assert!(last_reply(&unclear).starts_with("I didn't catch which script you meant."));

    let chosen = h.say("yes");
    assert_eq!(chosen.next_action, NextAction::ConfirmExecution);
    assert_eq!(
        h.state().selected_script.map(|script| script.name),
        Some("Create_Floors.cs".to_string())
    );
}

#[test]
fn candidates_can_be_picked_by_position() {
    let h = harness(
        vec![create_walls(), create_floors()],
        vec![select(&["walls_create_walls", "floors_create_floors"])],
    );
    let offered = h.say("create");
    assert!(last_reply(&offered).ends_with("Reply with a number or name to choose one."));

    h.say("the second one");
    assert_eq!(
        h.state().selected_script.map(|script| script.tool_id.to_string()),
        Some("floors_create_floors".to_string())
    );
}

#[test]
fn an_unavailable_model_falls_back_to_keyword_candidates() {
    let h = harness(
        vec![create_walls(), create_floors()],
        vec![Err(CollaboratorError::failed("model", "503 from upstream"))],
    );
    let outcome = h.say("create walls");
    assert_eq!(outcome.next_action, NextAction::AskForScriptConfirmation);
    assert!(matches!(outcome.error, Some(OrchestratorError::Model(_))));
    assert_eq!(h.state().identified_candidates.len(), 2);
}

#[test]
fn a_missing_catalog_ends_the_turn_idle_with_an_explanation() {
    let temp = tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModel::new(Vec::new()));
    let engine = engine(
        temp.path(),
        Arc::new(ManifestCatalog::new(temp.path().join("absent.json"))),
        Arc::clone(&model),
        false,
    );
    let hub = ConversationHub::new(Arc::new(engine), Arc::new(InMemoryCheckpointStore::default()));
    let thread = ThreadId::parse("thread-missing").expect("thread id");

    let outcome = hub.submit(&thread, TurnEvent::user("create walls"));
    assert_eq!(outcome.next_action, NextAction::Idle);
    assert!(last_reply(&outcome).starts_with("I couldn't read the script catalog"));
    assert!(matches!(
        outcome.error,
        Some(OrchestratorError::NotFound { .. })
    ));
    assert!(model.requests().is_empty());
}

#[test]
fn rejecting_the_run_returns_to_confirmation() {
    let h = harness(vec![create_walls()], vec![select(&["walls_create_walls"])]);
    h.say("create walls");
    let gated = h.say("run");
    let request = gated.approvals[0].clone();

    let rejected = h.submit(rejection_notice(&request));
    assert_eq!(rejected.next_action, NextAction::ConfirmExecution);
    assert_eq!(
        rejected.replies,
        vec!["Okay, I didn't run **Create_Walls.cs**. Change any parameter or say 'run' when you're ready.".to_string()]
    );
    assert_eq!(h.state().pending_call_id, None);

    let again = h.say("levelName = 2 and run it");
    assert_eq!(again.approvals.len(), 1);
    assert_eq!(again.approvals[0].call.id, "call-3");
    assert_eq!(again.approvals[0].arguments[1].value, "Level 2");

    let stale = h.submit(execution_notice(
        &request,
        ExecutionResult::failed("should be ignored"),
    ));
    assert!(stale.discarded);
    assert_eq!(stale.next_action, NextAction::Executing);
}

#[test]
fn results_for_a_superseded_task_are_discarded() {
    let h = harness(vec![create_walls()], vec![select(&["walls_create_walls"])]);
    h.say("create walls");
    let request = h.say("run").approvals[0].clone();
    let before = h.state().generation;

    let moved_on = h.say("what else can you do?");
    assert_eq!(moved_on.next_action, NextAction::Idle);
    assert_eq!(moved_on.replies, vec!["Nothing else to do.".to_string()]);
    assert_eq!(moved_on.generation, before + 1);

    let stale = h.submit(execution_notice(
        &request,
        ExecutionResult {
            success: true,
            output: "{\"output_type\":\"working_set_elements\",\"operation\":\"add\",\"element_ids\":[1]}"
                .to_string(),
            error_message: None,
            structured_output: None,
        },
    ));
    assert!(stale.discarded);
    assert_eq!(
        stale.replies,
        vec!["I ignored a result that belonged to an earlier request.".to_string()]
    );
    assert_eq!(h.state().working_set, WorkingSet::new());
}

#[test]
fn ui_values_are_pulled_before_the_approval_when_configured() {
    let h = harness_with(vec![create_walls()], vec![select(&["walls_create_walls"])], true);
    h.say("create walls");

    let pulling = h.say("run");
    assert!(pulling.approvals.is_empty());
    assert_eq!(
        last_reply(&pulling),
        "Reading the latest values from the parameters panel before running."
    );
    let ForwardRequest::GetUiParameters {
        generation,
        call_id,
        tool_id,
    } = pulling.forwards[0].clone();
    assert_eq!(tool_id.as_deref(), Some("walls_create_walls"));

    let values = BTreeMap::from([("levelName".to_string(), json!("Level 3"))]);
    let gated = h.submit(TurnEvent::UiParameters {
        generation,
        call_id,
        values,
    });
    assert_eq!(gated.approvals.len(), 1);
    assert_eq!(gated.approvals[0].arguments[1].value, "Level 3");
}

#[test]
fn the_model_can_read_the_parameters_panel_during_discovery() {
    let h = harness(
        vec![create_walls()],
        vec![
            tool_call("get_ui_parameters", json!({})),
            select(&["walls_create_walls"]),
        ],
    );

    let asked = h.say("create walls");
    assert_eq!(asked.next_action, NextAction::Discovering);
    assert_eq!(
        asked.replies,
        vec!["Let me check the values in the parameters panel.".to_string()]
    );
    assert_eq!(asked.forwards.len(), 1);
    assert_eq!(asked.forwards[0].call_id(), "call-1");

    let answered = h.submit(TurnEvent::UiParameters {
        generation: asked.generation,
        call_id: "call-1".to_string(),
        values: BTreeMap::from([("heightInMeters".to_string(), json!(4.5))]),
    });
    assert_eq!(answered.next_action, NextAction::ConfirmExecution);
    assert!(last_reply(&answered).contains("- heightInMeters (number): 4.5"));

    let requests = h.model.requests();
    assert_eq!(requests.len(), 2);
    let tool_answer = requests[1]
        .messages
        .iter()
        .find(|message| message.tool_call_id.as_deref() == Some("call-1"))
        .expect("tool result for the panel read");
    assert_eq!(tool_answer.content, "{\"heightInMeters\":4.5}");
}

#[test]
fn working_set_tools_run_locally_and_the_model_continues() {
    let h = harness(
        vec![create_walls()],
        vec![
            tool_call(
                "add_to_working_set",
                json!({ "element_ids": [7, 8], "category": "Walls" }),
            ),
            Ok(AssistantReply::Text("Added them.".to_string())),
        ],
    );
    let outcome = h.say("add walls 7 and 8 to my selection");
    assert_eq!(outcome.replies, vec!["Added them.".to_string()]);
    assert_eq!(outcome.next_action, NextAction::Idle);
    assert_eq!(h.state().working_set.get("Walls"), Some(&[7, 8][..]));
}

#[test]
fn turns_are_audited_per_thread() {
    let h = harness(vec![create_walls()], vec![select(&["walls_create_walls"])]);
    h.say("create walls");
    h.say("run");

    let records = read_audit_records(h.temp.path(), h.thread.as_str()).expect("audit records");
    let kinds = records.iter().map(|record| record.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            AuditKind::Inbound,
            AuditKind::ToolCall,
            AuditKind::Outbound,
            AuditKind::Inbound,
            AuditKind::Outbound,
            AuditKind::ApprovalRequest,
        ]
    );
    assert_eq!(records[1].message, "select_script");
    let approval = records.last().expect("approval record");
    assert_eq!(approval.call_id.as_deref(), Some("call-2"));
    assert_eq!(
        approval.payload.as_ref().map(|payload| payload["scriptName"].clone()),
        Some(json!("Create_Walls.cs"))
    );
}

#[test]
fn checkpoints_let_a_new_hub_resume_the_thread() {
    let temp = tempdir().expect("tempdir");
    let thread = ThreadId::parse("resumable").expect("thread id");
    let store = Arc::new(FileCheckpointStore::new(temp.path()));

    let first_model = Arc::new(ScriptedModel::new(vec![select(&["walls_create_walls"])]));
    let first = ConversationHub::new(
        Arc::new(engine(
            temp.path(),
            Arc::new(StaticCatalog(vec![create_walls()])),
            first_model,
            false,
        )),
        store.clone(),
    );
    first.submit(&thread, TurnEvent::user("create walls"));
    assert!(store.path_for(&thread).exists());
    drop(first);

    let saved = store.load(&thread).expect("load").expect("saved state");
    assert_eq!(saved.next_action, NextAction::ConfirmExecution);

    let second = ConversationHub::new(
        Arc::new(engine(
            temp.path(),
            Arc::new(StaticCatalog(vec![create_walls()])),
            Arc::new(ScriptedModel::new(Vec::new())),
            false,
        )),
        store,
    );
    let resumed = second.submit(&thread, TurnEvent::user("set levelName to Level 2"));
    assert_eq!(resumed.next_action, NextAction::ConfirmExecution);
    assert!(last_reply(&resumed).starts_with("Updated `levelName`."));
}

#[test]
fn run_words_inside_an_edit_do_not_start_a_run() {
    let h = harness(vec![offset_levels()], vec![select(&["levels_offset_levels"])]);
    h.say("offset levels");

    let edited = h.say("set start level to Level 2");
    assert_eq!(edited.next_action, NextAction::ConfirmExecution);
    assert!(edited.approvals.is_empty());
    assert!(last_reply(&edited).starts_with("Updated `startLevel`."));

    let gated = h.say("set flipped to no and run it");
    assert_eq!(gated.next_action, NextAction::Executing);
    assert_eq!(gated.approvals.len(), 1);
    assert_eq!(
        gated.approvals[0].arguments,
        vec![
            ScriptArgument {
                name: "startLevel".to_string(),
                value: "Level 2".to_string(),
            },
            ScriptArgument {
                name: "flipped".to_string(),
                value: "false".to_string(),
            },
        ]
    );
}

#[test]
fn a_question_is_not_taken_as_the_value_of_a_lone_parameter() {
    let h = harness(vec![rename_level()], vec![select(&["levels_rename_level"])]);
    h.say("rename level");

    let asked = h.say("what does this script do?");
    assert_eq!(asked.next_action, NextAction::ConfirmExecution);
    assert!(asked.approvals.is_empty());
    assert!(
        last_reply(&asked).contains("is a new value for `levelName`"),
        "{}",
        last_reply(&asked)
    );
    assert!(matches!(
        asked.error,
        Some(OrchestratorError::TypeMismatch { .. })
    ));
    assert_eq!(h.state().parameter_values[0].value, json!("Level 1"));

    let answered = h.say("Level 3");
    assert!(last_reply(&answered).starts_with("Updated `levelName`."));
    assert_eq!(h.state().parameter_values[0].value, json!("Level 3"));
}

#[test]
fn saved_threads_leave_memory_and_reload_from_the_store() {
    let h = harness(vec![create_walls()], vec![select(&["walls_create_walls"])]);
    h.say("create walls");
    assert_eq!(h.hub.resident_threads(), 0);
    assert_eq!(h.state().next_action, NextAction::ConfirmExecution);
    assert_eq!(h.hub.resident_threads(), 0);

    let edited = h.say("set levelName to Level 4");
    assert!(last_reply(&edited).starts_with("Updated `levelName`."));
    assert_eq!(h.hub.resident_threads(), 0);
}

struct ReadOnlyStore;

impl CheckpointStore for ReadOnlyStore {
    fn load(
        &self,
        _thread_id: &ThreadId,
    ) -> Result<Option<hostpilot::orchestration::ConversationState>, CheckpointError> {
        Ok(None)
    }

    fn save(
        &self,
        _thread_id: &ThreadId,
        _state: &hostpilot::orchestration::ConversationState,
    ) -> Result<(), CheckpointError> {
        Err(CheckpointError::Write {
            path: "threads/read-only.json".to_string(),
            source: std::io::Error::other("read-only file system"),
        })
    }
}

#[test]
fn threads_that_fail_to_save_stay_in_memory() {
    let temp = tempdir().expect("tempdir");
    let thread = ThreadId::parse("unsaved").expect("thread id");
    let hub = ConversationHub::new(
        Arc::new(engine(
            temp.path(),
            Arc::new(StaticCatalog(vec![create_walls()])),
            Arc::new(ScriptedModel::new(vec![select(&["walls_create_walls"])])),
            false,
        )),
        Arc::new(ReadOnlyStore),
    );

    hub.submit(&thread, TurnEvent::user("create walls"));
    assert_eq!(hub.resident_threads(), 1);
    let gated = hub.submit(&thread, TurnEvent::user("run"));
    assert_eq!(gated.next_action, NextAction::Executing);
    assert_eq!(gated.approvals.len(), 1);
}
