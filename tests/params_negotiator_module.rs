use hostpilot::catalog::{ParamType, ParameterDefinition, ScriptDescriptor};
use hostpilot::params::{
    extract_edits, is_visible, parameter_summary, ChatEdit, Negotiator, Provenance, Unresolved,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn definition(name: &str, param_type: ParamType, default_value: Value) -> ParameterDefinition {
    ParameterDefinition::new(name, param_type, default_value)
}

fn wall_parameters() -> Vec<ParameterDefinition> {
    vec![
        definition("heightInMeters", ParamType::Number, json!(3.0)),
        definition("levelName", ParamType::String, json!("Level 1")),
        definition("wallCount", ParamType::Integer, json!(1)),
    ]
}

fn ui(values: &[(&str, Value)]) -> BTreeMap<String, Value> {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn value_of<'a>(values: &'a [hostpilot::params::ParameterValue], name: &str) -> &'a Value {
    &values
        .iter()
        .find(|value| value.name == name)
        .expect("parameter present")
        .value
}

#[test]
fn merge_without_chat_equals_the_ui_overlay() {
    let negotiator = Negotiator::new(0.82);
    let definitions = wall_parameters();
    let panel = ui(&[("levelName", json!("Level 3")), ("wallCount", json!("4"))]);

    let merged = negotiator.merge(&definitions, &panel, "");
    assert_eq!(merged.parameters, negotiator.overlay(&definitions, &panel));
    assert!(merged.is_clean());
    assert_eq!(value_of(&merged.parameters, "levelName"), &json!("Level 3"));
    assert_eq!(value_of(&merged.parameters, "wallCount"), &json!(4));
    assert_eq!(value_of(&merged.parameters, "heightInMeters"), &json!(3.0));
    assert_eq!(merged.parameters[1].provenance, Provenance::Ui);
    assert_eq!(merged.parameters[0].provenance, Provenance::Default);
}

#[test]
fn chat_edits_override_ui_values() {
    let negotiator = Negotiator::new(0.82);
    let panel = ui(&[("heightInMeters", json!(4.0))]);
    let merged = negotiator.merge(&wall_parameters(), &panel, "set heightInMeters to 2.5");
    assert!(merged.is_clean());
    assert_eq!(merged.applied, vec!["heightInMeters".to_string()]);
    assert_eq!(value_of(&merged.parameters, "heightInMeters"), &json!(2.5));
    assert_eq!(merged.parameters[0].provenance, Provenance::Chat);
}

#[test]
fn text_for_a_number_asks_for_clarification() {
    let negotiator = Negotiator::new(0.82);
    let merged = negotiator.merge(&wall_parameters(), &BTreeMap::new(), "heightInMeters: four feet");
    assert!(merged.applied.is_empty());
    assert_eq!(merged.unresolved.len(), 1);
    let message = merged.unresolved[0].message();
    assert!(message.contains("`heightInMeters` needs a number"), "{message}");
    assert!(message.contains("four feet"), "{message}");
    assert_eq!(value_of(&merged.parameters, "heightInMeters"), &json!(3.0));
}

#[test]
fn a_bare_number_fills_the_numeric_slot_of_a_text_default() {
    let negotiator = Negotiator::new(0.82);
    let merged = negotiator.merge(&wall_parameters(), &BTreeMap::new(), "levelName = 2");
    assert!(merged.is_clean());
    assert_eq!(value_of(&merged.parameters, "levelName"), &json!("Level 2"));
}

#[test]
fn unknown_parameter_names_are_dropped_not_guessed() {
    let negotiator = Negotiator::new(0.82);
    let merged = negotiator.merge(&wall_parameters(), &BTreeMap::new(), "set colour to red");
    assert!(merged.is_clean());
    assert!(merged.applied.is_empty());
    assert_eq!(merged.dropped, vec!["colour".to_string()]);
}

#[test]
fn close_names_that_fit_two_parameters_are_ambiguous() {
    let negotiator = Negotiator::new(0.82);
    let definitions = vec![
        definition("heightInMeters", ParamType::Number, json!(3.0)),
        definition("heightInFeet", ParamType::Number, json!(10.0)),
    ];
    let merged = negotiator.merge(&definitions, &BTreeMap::new(), "set height to 4");
    match merged.unresolved.as_slice() {
        [Unresolved::AmbiguousName { phrase, candidates }] => {
            assert_eq!(phrase, "height");
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("unexpected unresolved edits: {other:?}"),
    }
}

#[test]
fn a_bare_value_goes_to_the_only_visible_parameter() {
    let negotiator = Negotiator::new(0.82);
    let definitions = vec![definition("gridSpacing", ParamType::Number, json!(1.0))];
    let merged = negotiator.merge(&definitions, &BTreeMap::new(), "2.5");
    assert_eq!(merged.applied, vec!["gridSpacing".to_string()]);
    assert_eq!(value_of(&merged.parameters, "gridSpacing"), &json!(2.5));

    let control = negotiator.merge(&definitions, &BTreeMap::new(), "yes");
    assert!(control.applied.is_empty());
}

#[test]
fn questions_and_sentences_are_not_bare_values() {
    let negotiator = Negotiator::new(0.82);
    let mut mode = definition("levelName", ParamType::String, json!("Level 1"));
    mode.options = vec!["Level 1".to_string(), "Level 2 Mezzanine East Wing".to_string()];
    let definitions = vec![mode];

    for message in [
        "what does this script do?",
        "Which level does it use",
        "I think we should talk about the roof first",
    ] {
        let merged = negotiator.merge(&definitions, &BTreeMap::new(), message);
        assert!(merged.applied.is_empty(), "{message}");
        assert_eq!(value_of(&merged.parameters, "levelName"), &json!("Level 1"));
        match merged.unresolved.as_slice() {
            [Unresolved::Clarification(needed)] => {
                assert_eq!(needed.parameter, "levelName");
                assert!(needed.message.contains("`levelName = <value>`"), "{}", needed.message);
            }
            other => panic!("expected one clarification for {message:?}, got {other:?}"),
        }
    }

    let listed = negotiator.merge(&definitions, &BTreeMap::new(), "level 2 mezzanine east wing");
    assert_eq!(listed.applied, vec!["levelName".to_string()]);
    assert!(listed.unresolved.is_empty());
}

#[test]
fn multi_clause_messages_yield_one_edit_per_clause() {
    assert_eq!(
        extract_edits("set heightInMeters to 4 and levelName should be 'Level 2'"),
        vec![
            ChatEdit {
                name_phrase: "heightInMeters".to_string(),
                value_text: "4".to_string(),
            },
            ChatEdit {
                name_phrase: "levelName".to_string(),
                value_text: "'Level 2'".to_string(),
            },
        ]
    );
}

#[test]
fn conditional_parameters_follow_the_current_mode() {
    let negotiator = Negotiator::new(0.82);
    let mut spacing = definition("spacing", ParamType::Number, json!(1.0));
    spacing.visible_when = Some("mode == 'Grid'".to_string());
    let mut radius = definition("radius", ParamType::Number, json!(2.0));
    radius.visible_when = Some("mode != 'Grid'".to_string());
    let mut mode = definition("mode", ParamType::String, json!("Grid"));
    mode.options = vec!["Grid".to_string(), "Radial".to_string()];
    let definitions = vec![mode, spacing, radius];

    let grid = negotiator.overlay(&definitions, &BTreeMap::new());
    assert!(is_visible(&definitions[1], &grid));
    assert!(!is_visible(&definitions[2], &grid));

    let radial = negotiator.overlay(&definitions, &ui(&[("mode", json!("Radial"))]));
    assert!(!is_visible(&definitions[1], &radial));
    assert!(is_visible(&definitions[2], &radial));

    let mut descriptor =
        ScriptDescriptor::new("Place_Columns.cs", "Columns/Place_Columns.cs", "/s/p.cs".into())
            .expect("descriptor");
    descriptor.parameters = definitions;
    let summary = parameter_summary(&descriptor, &radial);
    assert!(summary.contains("- radius (number): 2.0"), "{summary}");
    assert!(!summary.contains("spacing"), "{summary}");
}

#[test]
fn presenting_a_parameterless_script_offers_to_run_it() {
    let negotiator = Negotiator::new(0.82);
    let descriptor = ScriptDescriptor::new("Purge_Views.cs", "Purge_Views.cs", "/s/p.cs".into())
        .expect("descriptor");
    let text = negotiator.present(&descriptor, &[]);
    assert!(text.contains("doesn't need any parameters"), "{text}");
}
