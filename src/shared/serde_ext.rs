use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accepts `null` as the type's default.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Renders a JSON value the way a host script expects a parameter string:
/// strings unquoted, containers and scalars as compact JSON.
pub fn value_to_param_string(value: &Value) -> String {
    match value {
        Value::String(text) => strip_wrapping_quotes(text).to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn strip_wrapping_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}
