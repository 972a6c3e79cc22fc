use crate::shared::ids::ToolId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
}

impl ParamType {
    /// Maps a host-declared type name (`int`, `double`, `List<string>`, ...) onto
    /// the schema type family.
    pub fn from_declared(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.contains("list") || lowered.contains("[]") || lowered.contains("array") {
            Self::Array
        } else if lowered.contains("int") || lowered.contains("long") {
            Self::Integer
        } else if lowered.contains("double")
            || lowered.contains("float")
            || lowered.contains("number")
            || lowered.contains("decimal")
        {
            Self::Number
        } else if lowered.contains("bool") {
            Self::Boolean
        } else {
            Self::String
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptKind {
    #[default]
    SingleFile,
    MultiFile,
}

impl ScriptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleFile => "single-file",
            Self::MultiFile => "multi-file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,
    pub param_type: ParamType,
    /// Type name exactly as the host declared it.
    pub declared_type: String,
    pub default_value: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub visible_when: Option<String>,
    #[serde(default)]
    pub multi_select: bool,
    #[serde(default)]
    pub unit: Option<String>,
}

impl ParameterDefinition {
    pub fn new(name: &str, param_type: ParamType, default_value: Value) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            declared_type: param_type.as_str().to_string(),
            default_value,
            description: String::new(),
            options: Vec::new(),
            required: false,
            visible_when: None,
            multi_select: false,
            unit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptDescriptor {
    pub name: String,
    pub tool_id: ToolId,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub kind: ScriptKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

impl ScriptDescriptor {
    /// Builds a descriptor whose tool id is derived from `relative_path`.
    pub fn new(name: &str, relative_path: &str, absolute_path: PathBuf) -> Result<Self, String> {
        Ok(Self {
            name: name.to_string(),
            tool_id: derive_tool_id(relative_path)?,
            relative_path: relative_path.to_string(),
            absolute_path,
            kind: ScriptKind::SingleFile,
            description: String::new(),
            categories: Vec::new(),
            parameters: Vec::new(),
        })
    }

    /// Display name without the file extension, underscores read as spaces.
    pub fn spoken_name(&self) -> String {
        let stem = self
            .name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.name);
        stem.replace('_', " ").to_ascii_lowercase()
    }

    pub fn run_tool_name(&self) -> String {
        format!("run_{}", self.tool_id)
    }
}

/// Normalizes a path or name into the stable tool-id form.
pub fn normalize_tool_id(raw: &str) -> String {
    let mut lowered = raw.trim().to_ascii_lowercase();
    for extension in [".cs", ".ptool"] {
        if let Some(stripped) = lowered.strip_suffix(extension) {
            lowered = stripped.to_string();
            break;
        }
    }
    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    out
}

pub fn derive_tool_id(raw: &str) -> Result<ToolId, String> {
    ToolId::parse(&normalize_tool_id(raw))
}

pub fn segment_count(tool_id: &str) -> usize {
    tool_id.split('_').count()
}
