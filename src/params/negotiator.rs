use super::coerce::{ClarificationNeeded, HeuristicCoercer, ValueCoercer};
use super::extract::{extract_edits, match_parameter, ChatEdit, NameMatch};
use super::intent::{is_control_phrase, is_question};
use super::visibility::{has_conditional_parameters, visible_definitions};
use crate::catalog::{ParamType, ParameterDefinition, ScriptDescriptor};
use crate::collab::ScriptArgument;
use crate::shared::serde_ext::value_to_param_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Default,
    Ui,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValue {
    pub name: String,
    pub param_type: ParamType,
    pub value: Value,
    pub provenance: Provenance,
}

impl ParameterValue {
    pub fn to_argument(&self) -> ScriptArgument {
        ScriptArgument {
            name: self.name.clone(),
            value: value_to_param_string(&self.value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Clarification(ClarificationNeeded),
    AmbiguousName {
        phrase: String,
        candidates: Vec<String>,
    },
}

impl Unresolved {
    pub fn message(&self) -> String {
        match self {
            Self::Clarification(needed) => needed.message.clone(),
            Self::AmbiguousName { phrase, candidates } => format!(
                "`{phrase}` could mean {}. Which one did you mean?",
                candidates
                    .iter()
                    .map(|name| format!("`{name}`"))
                    .collect::<Vec<_>>()
                    .join(" or ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub parameters: Vec<ParameterValue>,
    pub unresolved: Vec<Unresolved>,
    /// Names of parameters changed from chat.
    pub applied: Vec<String>,
    /// Chat phrases that matched no parameter.
    pub dropped: Vec<String>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
    }
}

pub fn defaults(definitions: &[ParameterDefinition]) -> Vec<ParameterValue> {
    definitions
        .iter()
        .map(|definition| ParameterValue {
            name: definition.name.clone(),
            param_type: definition.param_type,
            value: definition.default_value.clone(),
            provenance: Provenance::Default,
        })
        .collect()
}

fn set_value(values: &mut [ParameterValue], name: &str, value: Value, provenance: Provenance) {
    if let Some(slot) = values.iter_mut().find(|slot| slot.name == name) {
        slot.value = value;
        slot.provenance = provenance;
    }
}

const BARE_VALUE_MAX_WORDS: usize = 3;

/// Merges declared definitions with UI values and free-text chat edits.
pub struct Negotiator {
    coercer: Arc<dyn ValueCoercer>,
    name_threshold: f64,
}

impl Negotiator {
    pub fn new(name_threshold: f64) -> Self {
        Self::with_coercer(Arc::new(HeuristicCoercer), name_threshold)
    }

    pub fn with_coercer(coercer: Arc<dyn ValueCoercer>, name_threshold: f64) -> Self {
        Self {
            coercer,
            name_threshold,
        }
    }

    /// Defaults overlaid with the UI snapshot.
    pub fn overlay(
        &self,
        definitions: &[ParameterDefinition],
        ui_values: &BTreeMap<String, Value>,
    ) -> Vec<ParameterValue> {
        let mut values = defaults(definitions);
        self.apply_ui(&mut values, definitions, ui_values);
        values
    }

    pub fn merge(
        &self,
        definitions: &[ParameterDefinition],
        ui_values: &BTreeMap<String, Value>,
        chat: &str,
    ) -> MergeOutcome {
        self.merge_onto(&defaults(definitions), definitions, ui_values, chat)
    }

    /// Like `merge`, starting from the values already negotiated in earlier turns.
    pub fn merge_onto(
        &self,
        base: &[ParameterValue],
        definitions: &[ParameterDefinition],
        ui_values: &BTreeMap<String, Value>,
        chat: &str,
    ) -> MergeOutcome {
        let mut values = base.to_vec();
        for definition in definitions {
            if !values.iter().any(|value| value.name == definition.name) {
                values.extend(defaults(std::slice::from_ref(definition)));
            }
        }
        values.retain(|value| {
            definitions
                .iter()
                .any(|definition| definition.name == value.name)
        });
        self.apply_ui(&mut values, definitions, ui_values);

        let mut outcome = MergeOutcome {
            parameters: Vec::new(),
            unresolved: Vec::new(),
            applied: Vec::new(),
            dropped: Vec::new(),
        };
        let edits = match self.chat_edits(definitions, &values, chat) {
            Ok(edits) => edits,
            Err(needed) => {
                outcome.unresolved.push(Unresolved::Clarification(needed));
                Vec::new()
            }
        };
        for edit in edits {
            match match_parameter(&edit.name_phrase, definitions, self.name_threshold) {
                NameMatch::Unique(idx) => {
                    let definition = &definitions[idx];
                    match self.coercer.coerce(definition, &edit.value_text) {
                        Ok(value) => {
                            set_value(&mut values, &definition.name, value, Provenance::Chat);
                            outcome.applied.push(definition.name.clone());
                        }
                        Err(needed) => {
                            tracing::info!(
                                parameter = definition.name.as_str(),
                                raw = edit.value_text.as_str(),
                                "chat value needs clarification"
                            );
                            outcome.unresolved.push(Unresolved::Clarification(needed));
                        }
                    }
                }
                NameMatch::Ambiguous(candidates) => {
                    outcome.unresolved.push(Unresolved::AmbiguousName {
                        phrase: edit.name_phrase,
                        candidates,
                    });
                }
                NameMatch::NoMatch => {
                    tracing::warn!(
                        phrase = edit.name_phrase.as_str(),
                        "chat edit matched no parameter; dropped"
                    );
                    outcome.dropped.push(edit.name_phrase);
                }
            }
        }
        outcome.parameters = values;
        outcome
    }

    fn apply_ui(
        &self,
        values: &mut [ParameterValue],
        definitions: &[ParameterDefinition],
        ui_values: &BTreeMap<String, Value>,
    ) {
        for definition in definitions {
            let Some(raw) = ui_values.get(&definition.name) else {
                continue;
            };
            let value = match raw {
                Value::String(text) if definition.param_type != ParamType::String => {
                    match self.coercer.coerce(definition, text) {
                        Ok(value) => value,
                        Err(needed) => {
                            tracing::warn!(
                                parameter = definition.name.as_str(),
                                reason = needed.message.as_str(),
                                "ignored UI value that does not fit the declared type"
                            );
                            continue;
                        }
                    }
                }
                other => other.clone(),
            };
            set_value(values, &definition.name, value, Provenance::Ui);
        }
    }

    /// Structured edits, or the whole message as the value of the only visible
    /// parameter when the reply reads as a bare value. Anything else aimed at a
    /// single-parameter script is a question back to the user.
    fn chat_edits(
        &self,
        definitions: &[ParameterDefinition],
        values: &[ParameterValue],
        chat: &str,
    ) -> Result<Vec<ChatEdit>, ClarificationNeeded> {
        let chat = chat.trim();
        if chat.is_empty() {
            return Ok(Vec::new());
        }
        let edits = extract_edits(chat);
        if !edits.is_empty() || is_control_phrase(chat) {
            return Ok(edits);
        }
        let visible = visible_definitions(definitions, values);
        let [only] = visible.as_slice() else {
            return Ok(Vec::new());
        };
        let value_text = chat.trim_end_matches(['.', '!']).trim();
        if looks_like_value(only, value_text) {
            return Ok(vec![ChatEdit {
                name_phrase: only.name.clone(),
                value_text: value_text.to_string(),
            }]);
        }
        tracing::info!(
            parameter = only.name.as_str(),
            "reply does not read as a value; asking instead"
        );
        Err(ClarificationNeeded {
            parameter: only.name.clone(),
            message: format!(
                "I'm not sure if \"{value_text}\" is a new value for `{}`. Say `{} = <value>` to change it, or 'run' to use the current values.",
                only.name, only.name
            ),
        })
    }

    pub fn present(&self, descriptor: &ScriptDescriptor, values: &[ParameterValue]) -> String {
        let definitions = &descriptor.parameters;
        if definitions.is_empty() {
            return format!(
                "The script **{}** doesn't need any parameters.\n\nDo you want to run it?",
                descriptor.name
            );
        }
        if has_conditional_parameters(definitions) {
            return format!(
                "I've selected **{}**. This script has several parameter sets (modes). Pick the mode in the Parameters panel, then say 'proceed' to continue.",
                descriptor.name
            );
        }
        parameter_summary(descriptor, values)
    }
}

/// Short replies and listed options pass; questions and sentences do not.
fn looks_like_value(definition: &ParameterDefinition, text: &str) -> bool {
    if text.is_empty() || is_question(text) {
        return false;
    }
    definition
        .options
        .iter()
        .any(|option| option.eq_ignore_ascii_case(text))
        || text.split_whitespace().count() <= BARE_VALUE_MAX_WORDS
}

/// The visible parameters as a table, ignoring any mode-selection step.
pub fn parameter_summary(descriptor: &ScriptDescriptor, values: &[ParameterValue]) -> String {
    let lines = parameter_lines(&descriptor.parameters, values);
    if lines.is_empty() {
        return format!(
            "**{}** has no parameters to set in this mode.\n\nSay 'run' to execute it.",
            descriptor.name
        );
    }
    format!(
        "Here are the parameters for **{}**:\n{lines}\n\nSay 'run' to execute with these values, or tell me what to change.",
        descriptor.name
    )
}

/// One bullet per visible parameter: `- name (type): value unit`.
pub fn parameter_lines(definitions: &[ParameterDefinition], values: &[ParameterValue]) -> String {
    visible_definitions(definitions, values)
        .into_iter()
        .map(|definition| {
            let current = values
                .iter()
                .find(|value| value.name == definition.name)
                .map(|value| value_to_param_string(&value.value))
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "(not set)".to_string());
            let unit = definition
                .unit
                .as_deref()
                .map(|unit| format!(" {unit}"))
                .unwrap_or_default();
            format!("- {} ({}): {current}{unit}", definition.name, definition.param_type)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
