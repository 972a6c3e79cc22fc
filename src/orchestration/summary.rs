use crate::collab::ExecutionResult;
use crate::working_set::delta::OUTPUT_TYPE_MARKER;
use serde_json::Value;

/// Status lines the executor prints around every run.
const BANNER_PREFIXES: &[&str] = &["✅ Code executed", "❌ Code execution"];
const RESULT_MARKERS: &[&str] = &["✅", "❌"];
const SUMMARY_PREFIX: &str = "SUMMARY:";

fn table_rows(item: &Value) -> Option<usize> {
    if item.get("type").and_then(Value::as_str) != Some("table") {
        return None;
    }
    match item.get("data")? {
        Value::Array(rows) => Some(rows.len()),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded).ok()? {
            Value::Array(rows) => Some(rows.len()),
            _ => None,
        },
        _ => None,
    }
}

fn table_row_count(structured: &Value) -> Option<usize> {
    match structured {
        Value::Array(items) => items.iter().find_map(table_rows),
        Value::String(encoded) => serde_json::from_str::<Value>(encoded)
            .ok()
            .and_then(|decoded| table_row_count(&decoded)),
        other => table_rows(other),
    }
}

fn relevant_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !BANNER_PREFIXES.iter().any(|banner| line.starts_with(banner)))
        .filter(|line| !line.contains(OUTPUT_TYPE_MARKER))
        .collect()
}

fn console_summary(output: &str) -> Option<String> {
    let lines = relevant_lines(output);
    if lines.is_empty() {
        return None;
    }
    let summary = lines
        .iter()
        .filter_map(|line| line.trim_start().strip_prefix(SUMMARY_PREFIX))
        .map(str::trim)
        .collect::<Vec<_>>();
    if !summary.is_empty() {
        return Some(summary.join(" "));
    }
    if let Some(marked) = lines
        .iter()
        .find(|line| RESULT_MARKERS.iter().any(|marker| line.starts_with(marker)))
    {
        return Some(marked.to_string());
    }
    Some(match lines.len() {
        1 => lines[0].to_string(),
        count => format!("{count} lines were printed."),
    })
}

/// Short user-facing account of a script run.
pub fn summarize_execution(script_name: &str, result: &ExecutionResult) -> String {
    if !result.success {
        let reason = result
            .error_message
            .as_deref()
            .map(str::trim)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .or_else(|| relevant_lines(&result.output).last().map(|line| line.to_string()))
            .unwrap_or_else(|| "no error message was returned".to_string());
        return format!("❌ **{script_name}** failed: {reason}");
    }

    let detail = result
        .structured_output
        .as_ref()
        .and_then(table_row_count)
        .map(|rows| format!("A table with {rows} rows was generated."))
        .or_else(|| console_summary(&result.output))
        .unwrap_or_else(|| "Action completed successfully.".to_string());
    format!("✅ **{script_name}** finished. {detail}")
}
