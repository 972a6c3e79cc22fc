use super::negotiator::ParameterValue;
use crate::catalog::ParameterDefinition;
use crate::shared::serde_ext::{strip_wrapping_quotes, value_to_param_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityRule {
    pub parameter: String,
    pub negate: bool,
    pub value: String,
}

/// Parses `name == 'value'` / `name != "value"`.
pub fn parse_rule(raw: &str) -> Option<VisibilityRule> {
    let (left, right, negate) = if let Some((left, right)) = raw.split_once("!=") {
        (left, right, true)
    } else {
        let (left, right) = raw.split_once("==")?;
        (left, right, false)
    };
    let parameter = left.trim();
    if parameter.is_empty() {
        return None;
    }
    Some(VisibilityRule {
        parameter: parameter.to_string(),
        negate,
        value: strip_wrapping_quotes(right).to_string(),
    })
}

/// Parameters without a rule, with an unparseable rule, or whose rule names an
/// unknown parameter are visible.
pub fn is_visible(definition: &ParameterDefinition, values: &[ParameterValue]) -> bool {
    let Some(rule) = definition.visible_when.as_deref().and_then(parse_rule) else {
        return true;
    };
    let Some(current) = values.iter().find(|value| value.name == rule.parameter) else {
        return true;
    };
    let equal = value_to_param_string(&current.value) == rule.value;
    equal != rule.negate
}

pub fn has_conditional_parameters(definitions: &[ParameterDefinition]) -> bool {
    definitions
        .iter()
        .any(|definition| definition.visible_when.is_some())
}

pub fn visible_definitions<'a>(
    definitions: &'a [ParameterDefinition],
    values: &[ParameterValue],
) -> Vec<&'a ParameterDefinition> {
    definitions
        .iter()
        .filter(|definition| is_visible(definition, values))
        .collect()
}
