use super::{ElementId, WorkingSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const UNKNOWN_CATEGORY: &str = "Unknown";
pub const OUTPUT_TYPE_MARKER: &str = "working_set_elements";
const MARKER_KEYS: [&str; 2] = ["paracore_output_type", "output_type"];
const DEFAULT_DISPLAY_MESSAGE: &str = "Working set updated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOperation {
    Add,
    Remove,
    Replace,
    None,
}

impl DeltaOperation {
    /// Unknown or missing operations leave the set untouched.
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("add") => Self::Add,
            Some("remove") => Self::Remove,
            Some("replace") => Self::Replace,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSetDelta {
    pub operation: DeltaOperation,
    #[serde(default)]
    pub elements_by_category: BTreeMap<String, Vec<ElementId>>,
    /// Ids without a category.
    #[serde(default)]
    pub element_ids: Vec<ElementId>,
    #[serde(default)]
    pub display_message: Option<String>,
}

impl WorkingSetDelta {
    pub fn new(operation: DeltaOperation) -> Self {
        Self {
            operation,
            elements_by_category: BTreeMap::new(),
            element_ids: Vec::new(),
            display_message: None,
        }
    }

    pub fn with_category(mut self, category: &str, ids: &[ElementId]) -> Self {
        self.elements_by_category
            .entry(category.to_string())
            .or_default()
            .extend_from_slice(ids);
        self
    }

    pub fn with_flat_ids(mut self, ids: &[ElementId]) -> Self {
        self.element_ids.extend_from_slice(ids);
        self
    }

    fn from_block(block: &serde_json::Map<String, Value>) -> Self {
        let operation = DeltaOperation::parse(block.get("operation").and_then(Value::as_str));
        let mut elements_by_category = BTreeMap::new();
        if let Some(categories) = block.get("elements_by_category").and_then(Value::as_object) {
            for (category, ids) in categories {
                elements_by_category.insert(category.clone(), element_ids_from(ids));
            }
        }
        let element_ids = block
            .get("element_ids")
            .map(element_ids_from)
            .unwrap_or_default();
        let display_message = block
            .get("display_message")
            .and_then(Value::as_str)
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty());
        Self {
            operation,
            elements_by_category,
            element_ids,
            display_message,
        }
    }

    pub fn message(&self) -> &str {
        self.display_message
            .as_deref()
            .unwrap_or(DEFAULT_DISPLAY_MESSAGE)
    }
}

/// Ids arrive as JSON numbers or numeric strings; anything else is skipped.
fn element_ids_from(value: &Value) -> Vec<ElementId> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Number(number) => number.as_i64(),
                    Value::String(text) => text.trim().parse::<ElementId>().ok(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_delta_block(block: &serde_json::Map<String, Value>) -> bool {
    MARKER_KEYS.iter().any(|key| {
        block
            .get(*key)
            .and_then(Value::as_str)
            .is_some_and(|value| value == OUTPUT_TYPE_MARKER)
    })
}

fn collect_from_value(value: &Value, deltas: &mut Vec<WorkingSetDelta>) {
    match value {
        Value::Object(block) if is_delta_block(block) => {
            deltas.push(WorkingSetDelta::from_block(block));
        }
        Value::Object(block) => {
            for nested in block.values() {
                collect_from_value(nested, deltas);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_from_value(item, deltas);
            }
        }
        Value::String(text) => deltas.extend(parse_deltas(text)),
        _ => {}
    }
}

/// Finds every delta block embedded in `text`, in order of appearance.
pub fn parse_deltas(text: &str) -> Vec<WorkingSetDelta> {
    let mut deltas = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find('{') {
        let start = cursor + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                collect_from_value(&value, &mut deltas);
                cursor = start + stream.byte_offset();
            }
            _ => cursor = start + 1,
        }
    }
    deltas
}

pub fn apply_delta(current: &WorkingSet, delta: &WorkingSetDelta) -> WorkingSet {
    let mut next = current.clone();
    match delta.operation {
        DeltaOperation::Replace => {
            next.clear();
            for (category, ids) in &delta.elements_by_category {
                next.add(category, ids);
            }
            next.add(UNKNOWN_CATEGORY, &delta.element_ids);
        }
        DeltaOperation::Add => {
            for (category, ids) in &delta.elements_by_category {
                next.add(category, ids);
            }
            next.add(UNKNOWN_CATEGORY, &delta.element_ids);
        }
        DeltaOperation::Remove => {
            for (category, ids) in &delta.elements_by_category {
                next.remove_from(category, ids);
            }
            if !delta.element_ids.is_empty() {
                next.remove_everywhere(&delta.element_ids);
            }
        }
        DeltaOperation::None => {}
    }
    next
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    NoDelta,
    Applied {
        set: WorkingSet,
        messages: Vec<String>,
        applied: usize,
    },
}

/// Applies every delta found in `text`, strictly in order.
pub fn apply_output(current: &WorkingSet, text: &str) -> DeltaOutcome {
    let deltas = parse_deltas(text);
    if deltas.is_empty() {
        return DeltaOutcome::NoDelta;
    }
    let mut set = current.clone();
    let mut messages = Vec::with_capacity(deltas.len());
    for delta in &deltas {
        set = apply_delta(&set, delta);
        messages.push(delta.message().to_string());
    }
    DeltaOutcome::Applied {
        set,
        messages,
        applied: deltas.len(),
    }
}
