use crate::catalog::{ParamType, ParameterDefinition};
use crate::shared::serde_ext::strip_wrapping_quotes;
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClarificationNeeded {
    pub parameter: String,
    pub message: String,
}

impl ClarificationNeeded {
    fn new(parameter: &str, message: impl Into<String>) -> Self {
        Self {
            parameter: parameter.to_string(),
            message: message.into(),
        }
    }
}

/// Turns free text into a typed parameter value, or asks for clarification.
pub trait ValueCoercer: Send + Sync {
    fn coerce(
        &self,
        definition: &ParameterDefinition,
        raw: &str,
    ) -> Result<Value, ClarificationNeeded>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCoercer;

impl ValueCoercer for HeuristicCoercer {
    fn coerce(
        &self,
        definition: &ParameterDefinition,
        raw: &str,
    ) -> Result<Value, ClarificationNeeded> {
        coerce_value(definition, raw)
    }
}

/// Byte ranges of every run of ASCII digits (with an optional decimal part).
fn numeric_runs(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut runs = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx].is_ascii_digit() {
            let start = idx;
            while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                idx += 1;
            }
            if idx + 1 < bytes.len() && bytes[idx] == b'.' && bytes[idx + 1].is_ascii_digit() {
                idx += 1;
                while idx < bytes.len() && bytes[idx].is_ascii_digit() {
                    idx += 1;
                }
            }
            runs.push((start, idx));
        } else {
            idx += 1;
        }
    }
    runs
}

fn is_bare_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty() && numeric_runs(digits) == vec![(0, digits.len())]
}

/// `Level 1` + `2` -> `Level 2`. `None` when the template has no single
/// numeric slot to fill.
pub fn substitute_number(template: &str, replacement: &str) -> Result<Option<String>, usize> {
    let runs = numeric_runs(template);
    match runs.as_slice() {
        [] => Ok(None),
        [(start, end)] => Ok(Some(format!(
            "{}{}{}",
            &template[..*start],
            replacement,
            &template[*end..]
        ))),
        many => Err(many.len()),
    }
}

fn strip_unit<'a>(text: &'a str, unit: Option<&str>) -> &'a str {
    let Some(unit) = unit.map(str::trim).filter(|unit| !unit.is_empty()) else {
        return text;
    };
    let lowered = text.to_ascii_lowercase();
    match lowered.strip_suffix(&unit.to_ascii_lowercase()) {
        Some(rest) => text[..rest.len()].trim_end(),
        None => text,
    }
}

fn parse_number(text: &str, definition: &ParameterDefinition) -> Option<f64> {
    let candidate = strip_unit(text, definition.unit.as_deref());
    candidate
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn match_option(definition: &ParameterDefinition, text: &str) -> Option<String> {
    if let Some(exact) = definition
        .options
        .iter()
        .find(|option| option.eq_ignore_ascii_case(text))
    {
        return Some(exact.clone());
    }
    // A bare number picks the option whose only number equals it (`2` -> `Level 2`).
    if is_bare_number(text) {
        let numbered = definition
            .options
            .iter()
            .filter(|option| {
                let runs = numeric_runs(option);
                runs.len() == 1 && &option[runs[0].0..runs[0].1] == text
            })
            .collect::<Vec<_>>();
        if let [only] = numbered.as_slice() {
            return Some((*only).clone());
        }
    }
    None
}

fn options_list(definition: &ParameterDefinition) -> String {
    definition
        .options
        .iter()
        .map(|option| format!("'{option}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn coerce_value(
    definition: &ParameterDefinition,
    raw: &str,
) -> Result<Value, ClarificationNeeded> {
    let name = definition.name.as_str();
    let text = strip_wrapping_quotes(raw).trim();
    if text.is_empty() {
        return Err(ClarificationNeeded::new(
            name,
            format!("What value should `{name}` have?"),
        ));
    }

    if !definition.options.is_empty() && !definition.multi_select {
        return match_option(definition, text).map(Value::String).ok_or_else(|| {
            ClarificationNeeded::new(
                name,
                format!(
                    "`{text}` is not a valid choice for `{name}`. Choose one of: {}.",
                    options_list(definition)
                ),
            )
        });
    }

    match definition.param_type {
        ParamType::Integer => {
            let parsed = parse_number(text, definition).and_then(|value| {
                (value.fract() == 0.0 && value.abs() < i64::MAX as f64).then_some(value as i64)
            });
            parsed.map(Value::from).ok_or_else(|| {
                ClarificationNeeded::new(
                    name,
                    format!("`{name}` needs a whole number, but I got `{text}`. What number should I use?"),
                )
            })
        }
        ParamType::Number => parse_number(text, definition)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                ClarificationNeeded::new(
                    name,
                    format!("`{name}` needs a number, but I got `{text}`. What number should I use?"),
                )
            }),
        ParamType::Boolean => {
            let lowered = text.to_ascii_lowercase();
            Ok(Value::Bool(matches!(lowered.as_str(), "true" | "1" | "yes")))
        }
        ParamType::Array => coerce_array(definition, text),
        ParamType::String => coerce_string(definition, text),
    }
}

fn coerce_array(definition: &ParameterDefinition, text: &str) -> Result<Value, ClarificationNeeded> {
    let items = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items,
        _ => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(strip_wrapping_quotes(item).to_string()))
            .collect(),
    };
    if definition.options.is_empty() {
        return Ok(Value::Array(items));
    }
    let mut chosen = Vec::with_capacity(items.len());
    for item in items {
        let item_text = match &item {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let option = match_option(definition, &item_text).ok_or_else(|| {
            ClarificationNeeded::new(
                &definition.name,
                format!(
                    "`{item_text}` is not a valid choice for `{}`. Choose from: {}.",
                    definition.name,
                    options_list(definition)
                ),
            )
        })?;
        chosen.push(Value::String(option));
    }
    Ok(Value::Array(chosen))
}

fn coerce_string(definition: &ParameterDefinition, text: &str) -> Result<Value, ClarificationNeeded> {
    let Some(template) = definition.default_value.as_str() else {
        return Ok(Value::String(text.to_string()));
    };
    if !is_bare_number(text) || is_bare_number(template.trim()) {
        return Ok(Value::String(text.to_string()));
    }
    match substitute_number(template, text) {
        Ok(Some(substituted)) => Ok(Value::String(substituted)),
        Ok(None) => Ok(Value::String(text.to_string())),
        Err(slots) => Err(ClarificationNeeded::new(
            &definition.name,
            format!(
                "`{}` defaults to '{template}', which has {slots} numbers in it. Which full value do you mean instead of just `{text}`?",
                definition.name
            ),
        )),
    }
}
