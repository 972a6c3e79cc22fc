use super::descriptor::{
    derive_tool_id, ParamType, ParameterDefinition, ScriptDescriptor, ScriptKind,
};
use super::CatalogError;
use crate::collab::ScriptCatalog;
use crate::shared::serde_ext::null_as_default;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    relative_path: Option<String>,
    #[serde(default)]
    absolute_path: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    categories: Vec<String>,
    #[serde(default)]
    metadata: Option<ManifestMetadata>,
    #[serde(default, deserialize_with = "null_as_default")]
    parameters: Vec<ManifestParameter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestMetadata {
    #[serde(default)]
    relative_path: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestParameter {
    name: String,
    #[serde(default, rename = "type")]
    declared_type: Option<String>,
    #[serde(default)]
    default_value_json: Option<String>,
    #[serde(default)]
    default_value: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    options: Vec<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    visible_when: Option<String>,
    #[serde(default)]
    multi_select: bool,
    #[serde(default)]
    unit: Option<String>,
}

/// Script catalog backed by a JSON manifest written by the host's script scanner.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    manifest_path: PathBuf,
}

impl ManifestCatalog {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    fn read_entries(&self) -> Result<Vec<ManifestEntry>, CatalogError> {
        let path = self.manifest_path.display().to_string();
        let raw = match fs::read_to_string(&self.manifest_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CatalogError::ManifestMissing { path })
            }
            Err(source) => return Err(CatalogError::ManifestRead { path, source }),
        };
        serde_json::from_str(&raw).map_err(|source| CatalogError::ManifestParse { path, source })
    }
}

impl ScriptCatalog for ManifestCatalog {
    fn list_scripts(&self) -> Result<Vec<ScriptDescriptor>, CatalogError> {
        let base = self
            .manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let scripts = self
            .read_entries()?
            .into_iter()
            .filter_map(|entry| match descriptor_from_entry(entry, &base) {
                Ok(script) => Some(script),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping manifest entry");
                    None
                }
            })
            .collect();
        Ok(scripts)
    }
}

fn descriptor_from_entry(entry: ManifestEntry, base: &Path) -> Result<ScriptDescriptor, CatalogError> {
    let metadata = entry.metadata.unwrap_or_default();
    let relative_path = metadata
        .relative_path
        .or(entry.relative_path)
        .or(entry.path)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| entry.name.clone());
    let tool_id = derive_tool_id(&relative_path).map_err(|reason| CatalogError::InvalidEntry {
        name: entry.name.clone(),
        reason,
    })?;
    let absolute_path = entry
        .absolute_path
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| base.join(&relative_path));
    let kind = match entry.kind.as_deref() {
        Some("multi-file") => ScriptKind::MultiFile,
        Some("single-file") | None => ScriptKind::SingleFile,
        Some(other) => {
            return Err(CatalogError::InvalidEntry {
                name: entry.name,
                reason: format!("unknown script type `{other}`"),
            })
        }
    };
    let description = metadata
        .description
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(entry.description);
    let categories = metadata.categories.unwrap_or(entry.categories);
    let parameters = entry
        .parameters
        .into_iter()
        .map(parameter_from_manifest)
        .collect();

    Ok(ScriptDescriptor {
        name: entry.name,
        tool_id,
        relative_path,
        absolute_path,
        kind,
        description,
        categories,
        parameters,
    })
}

fn parameter_from_manifest(raw: ManifestParameter) -> ParameterDefinition {
    let declared_type = raw.declared_type.unwrap_or_else(|| "string".to_string());
    // `defaultValueJson` holds a serialized value; text that is not valid JSON is
    // kept as a plain string.
    let default_value = match (raw.default_value_json, raw.default_value) {
        (Some(json), _) if !json.trim().is_empty() => {
            serde_json::from_str(&json).unwrap_or(Value::String(json))
        }
        (_, Some(value)) => value,
        _ => Value::Null,
    };
    ParameterDefinition {
        name: raw.name,
        param_type: ParamType::from_declared(&declared_type),
        declared_type,
        default_value,
        description: raw.description,
        options: raw.options,
        required: raw.required,
        visible_when: raw.visible_when.filter(|value| !value.trim().is_empty()),
        multi_select: raw.multi_select,
        unit: raw.unit.filter(|value| !value.trim().is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(raw: Value) -> ManifestEntry {
        serde_json::from_value(raw).expect("manifest entry")
    }

    #[test]
    fn unknown_script_types_are_invalid_entries() {
        match descriptor_from_entry(
            entry(json!({ "name": "X.cs", "path": "X.cs", "type": "plugin" })),
            Path::new("/scripts"),
        ) {
            Err(CatalogError::InvalidEntry { name, reason }) => {
                assert_eq!(name, "X.cs");
                assert!(reason.contains("plugin"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn default_value_json_is_decoded_with_string_fallback() {
        let parsed = parameter_from_manifest(ManifestParameter {
            name: "levelName".to_string(),
            declared_type: Some("string".to_string()),
            default_value_json: Some("\"Level 1\"".to_string()),
            default_value: None,
            description: String::new(),
            options: Vec::new(),
            required: false,
            visible_when: None,
            multi_select: false,
            unit: None,
        });
        assert_eq!(parsed.default_value, json!("Level 1"));

        let raw_text = parameter_from_manifest(ManifestParameter {
            name: "mark".to_string(),
            declared_type: None,
            default_value_json: Some("A-1".to_string()),
            default_value: None,
            description: String::new(),
            options: Vec::new(),
            required: false,
            visible_when: Some("  ".to_string()),
            multi_select: false,
            unit: None,
        });
        assert_eq!(raw_text.default_value, json!("A-1"));
        assert_eq!(raw_text.param_type, ParamType::String);
        assert_eq!(raw_text.visible_when, None);
    }
}
