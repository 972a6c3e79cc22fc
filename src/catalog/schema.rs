use super::descriptor::{ParamType, ParameterDefinition, ScriptDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const SELECT_SCRIPT: &str = "select_script";
pub const GET_PARAMETERS: &str = "get_parameters";
pub const GET_UI_PARAMETERS: &str = "get_ui_parameters";
pub const ADD_TO_WORKING_SET: &str = "add_to_working_set";
pub const REMOVE_FROM_WORKING_SET: &str = "remove_from_working_set";
pub const REPLACE_WORKING_SET: &str = "replace_working_set";
pub const CLEAR_WORKING_SET: &str = "clear_working_set";
pub const GET_WORKING_SET_DETAILS: &str = "get_working_set_details";
pub const RUN_TOOL_PREFIX: &str = "run_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub fn parameter_schema(parameter: &ParameterDefinition) -> Value {
    let mut description = parameter.description.trim().to_string();
    if let Some(unit) = parameter.unit.as_deref() {
        if description.is_empty() {
            description = format!("Unit: {unit}");
        } else {
            description = format!("{description} (unit: {unit})");
        }
    }

    let mut schema = if !parameter.options.is_empty() {
        let choices = json!({ "type": "string", "enum": parameter.options });
        if parameter.multi_select {
            json!({ "type": "array", "items": choices })
        } else {
            choices
        }
    } else if parameter.param_type == ParamType::Array {
        json!({ "type": "array", "items": { "type": "string" } })
    } else {
        json!({ "type": parameter.param_type.as_str() })
    };
    if let Some(object) = schema.as_object_mut() {
        if !description.is_empty() {
            object.insert("description".to_string(), Value::from(description));
        }
        if !parameter.default_value.is_null() {
            object.insert("default".to_string(), parameter.default_value.clone());
        }
    }
    schema
}

pub fn run_tool_definition(descriptor: &ScriptDescriptor) -> ToolDefinition {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for parameter in &descriptor.parameters {
        properties.insert(parameter.name.clone(), parameter_schema(parameter));
        if parameter.required {
            required.push(Value::from(parameter.name.clone()));
        }
    }
    let description = if descriptor.description.trim().is_empty() {
        format!("Run the script {}", descriptor.name)
    } else {
        format!("Run the script {}: {}", descriptor.name, descriptor.description.trim())
    };
    ToolDefinition {
        name: descriptor.run_tool_name(),
        description,
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn working_set_args_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "element_ids": {
                "type": "array",
                "items": { "type": "integer" },
                "description": "Element ids without a category"
            },
            "elements_by_category": {
                "type": "object",
                "additionalProperties": { "type": "array", "items": { "type": "integer" } },
                "description": "Element ids grouped by category"
            },
            "category": {
                "type": "string",
                "description": "Category for `element_ids`; defaults to Unknown"
            }
        }
    })
}

pub fn utility_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SELECT_SCRIPT.to_string(),
            description: "Choose the scripts that fit the user's task, best first".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "script_ids": { "type": "array", "items": { "type": "string" } },
                    "recommended": { "type": "string" }
                },
                "required": ["script_ids"]
            }),
        },
        ToolDefinition {
            name: GET_PARAMETERS.to_string(),
            description: "Select one script and show its parameters".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "script_id": { "type": "string" } },
                "required": ["script_id"]
            }),
        },
        ToolDefinition {
            name: GET_UI_PARAMETERS.to_string(),
            description: "Read the current values from the parameters panel".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: ADD_TO_WORKING_SET.to_string(),
            description: "Add elements to the working set".to_string(),
            input_schema: working_set_args_schema(),
        },
        ToolDefinition {
            name: REMOVE_FROM_WORKING_SET.to_string(),
            description: "Remove elements from the working set".to_string(),
            input_schema: working_set_args_schema(),
        },
        ToolDefinition {
            name: REPLACE_WORKING_SET.to_string(),
            description: "Replace the working set with the given elements".to_string(),
            input_schema: working_set_args_schema(),
        },
        ToolDefinition {
            name: CLEAR_WORKING_SET.to_string(),
            description: "Empty the working set".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: GET_WORKING_SET_DETAILS.to_string(),
            description: "Report the working set contents per category".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Full tool surface: utility calls followed by one `run_<tool_id>` per script.
pub fn tool_definitions(scripts: &[ScriptDescriptor]) -> Vec<ToolDefinition> {
    let mut tools = utility_tool_definitions();
    tools.extend(scripts.iter().map(run_tool_definition));
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_render_as_enum_and_units_extend_description() {
        let mut level = ParameterDefinition::new("levelName", ParamType::String, json!("Level 1"));
        level.options = vec!["Level 1".to_string(), "Level 2".to_string()];
        assert_eq!(
            parameter_schema(&level),
            json!({ "type": "string", "enum": ["Level 1", "Level 2"], "default": "Level 1" })
        );

        let mut height = ParameterDefinition::new("heightInMeters", ParamType::Number, json!(3.0));
        height.description = "Wall height".to_string();
        height.unit = Some("m".to_string());
        assert_eq!(
            parameter_schema(&height),
            json!({ "type": "number", "description": "Wall height (unit: m)", "default": 3.0 })
        );
    }

    #[test]
    fn multi_select_options_become_enum_arrays() {
        let mut categories =
            ParameterDefinition::new("categories", ParamType::Array, Value::Null);
        categories.options = vec!["Walls".to_string(), "Doors".to_string()];
        categories.multi_select = true;
        assert_eq!(
            parameter_schema(&categories),
            json!({ "type": "array", "items": { "type": "string", "enum": ["Walls", "Doors"] } })
        );
    }
}
