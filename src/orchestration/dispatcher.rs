use crate::catalog::schema::{
    ADD_TO_WORKING_SET, CLEAR_WORKING_SET, GET_PARAMETERS, GET_UI_PARAMETERS,
    GET_WORKING_SET_DETAILS, REMOVE_FROM_WORKING_SET, REPLACE_WORKING_SET, RUN_TOOL_PREFIX,
    SELECT_SCRIPT,
};
use crate::working_set::{DeltaOperation, ElementId, WorkingSet, WorkingSetDelta};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalTool {
    SelectScript {
        script_ids: Vec<String>,
        recommended: Option<String>,
    },
    GetParameters {
        script_id: String,
    },
    EditWorkingSet(WorkingSetDelta),
    ClearWorkingSet,
    GetWorkingSetDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardTool {
    GetUiParameters,
}

/// Where a model-issued tool call goes.
#[derive(Debug)]
pub enum Dispatch {
    Local(LocalTool),
    /// `run_<tool_id>`: never executed here, only surfaced for approval.
    Approval {
        tool_id: String,
        arguments: Map<String, Value>,
    },
    Forward(ForwardTool),
    Unknown(String),
    Invalid {
        tool: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct SelectScriptArgs {
    #[serde(default)]
    script_ids: Vec<String>,
    #[serde(default)]
    recommended: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetParametersArgs {
    #[serde(alias = "tool_id", alias = "name")]
    script_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct WorkingSetArgs {
    #[serde(default)]
    element_ids: Vec<ElementId>,
    #[serde(default)]
    elements_by_category: BTreeMap<String, Vec<ElementId>>,
    #[serde(default)]
    category: Option<String>,
}

impl WorkingSetArgs {
    fn into_delta(self, operation: DeltaOperation) -> WorkingSetDelta {
        let mut delta = WorkingSetDelta::new(operation);
        for (category, ids) in &self.elements_by_category {
            delta = delta.with_category(category, ids);
        }
        if self.element_ids.is_empty() {
            return delta;
        }
        match self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|category| !category.is_empty())
        {
            Some(category) => delta.with_category(category, &self.element_ids),
            None => delta.with_flat_ids(&self.element_ids),
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(
    tool: &str,
    arguments: &Value,
) -> Result<T, Dispatch> {
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        // some models send arguments as an encoded JSON string
        Value::String(text) => serde_json::from_str(text).map_err(|source| Dispatch::Invalid {
            tool: tool.to_string(),
            source,
        })?,
        other => other.clone(),
    };
    serde_json::from_value(arguments).map_err(|source| Dispatch::Invalid {
        tool: tool.to_string(),
        source,
    })
}

fn working_set_edit(tool: &str, arguments: &Value, operation: DeltaOperation) -> Dispatch {
    match parse_args::<WorkingSetArgs>(tool, arguments) {
        Ok(args) => Dispatch::Local(LocalTool::EditWorkingSet(args.into_delta(operation))),
        Err(invalid) => invalid,
    }
}

pub fn route_tool_call(name: &str, arguments: &Value) -> Dispatch {
    let name = name.trim();
    match name {
        SELECT_SCRIPT => match parse_args::<SelectScriptArgs>(name, arguments) {
            Ok(args) => Dispatch::Local(LocalTool::SelectScript {
                script_ids: args.script_ids,
                recommended: args.recommended.filter(|id| !id.trim().is_empty()),
            }),
            Err(invalid) => invalid,
        },
        GET_PARAMETERS => match parse_args::<GetParametersArgs>(name, arguments) {
            Ok(args) => Dispatch::Local(LocalTool::GetParameters {
                script_id: args.script_id,
            }),
            Err(invalid) => invalid,
        },
        GET_UI_PARAMETERS => Dispatch::Forward(ForwardTool::GetUiParameters),
        ADD_TO_WORKING_SET => working_set_edit(name, arguments, DeltaOperation::Add),
        REMOVE_FROM_WORKING_SET => working_set_edit(name, arguments, DeltaOperation::Remove),
        REPLACE_WORKING_SET => working_set_edit(name, arguments, DeltaOperation::Replace),
        CLEAR_WORKING_SET => Dispatch::Local(LocalTool::ClearWorkingSet),
        GET_WORKING_SET_DETAILS => Dispatch::Local(LocalTool::GetWorkingSetDetails),
        _ => match name.strip_prefix(RUN_TOOL_PREFIX) {
            Some(tool_id) if !tool_id.is_empty() => {
                match parse_args::<Map<String, Value>>(name, arguments) {
                    Ok(arguments) => Dispatch::Approval {
                        tool_id: tool_id.to_string(),
                        arguments,
                    },
                    Err(invalid) => invalid,
                }
            }
            _ => Dispatch::Unknown(name.to_string()),
        },
    }
}

/// Tool result for `get_working_set_details`.
pub fn working_set_details(set: &WorkingSet) -> Value {
    let counts = set
        .categories()
        .map(|(category, ids)| (category.to_string(), Value::from(ids.len())))
        .collect::<Map<String, Value>>();
    json!({
        "total": set.len(),
        "counts": counts,
        "element_ids": set.flatten(),
        "summary": set.summary(),
    })
}
