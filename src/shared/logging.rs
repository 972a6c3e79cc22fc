use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: Once = Once::new();

pub fn engine_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/engine.log")
}

pub fn append_engine_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = engine_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

/// Appends one JSON object per line: `{"timestamp":..,"event":..,<fields>}`.
pub fn append_engine_event(
    state_root: &Path,
    event: &str,
    fields: Map<String, Value>,
) -> std::io::Result<()> {
    let mut record = Map::new();
    record.insert(
        "timestamp".to_string(),
        Value::from(chrono::Utc::now().timestamp()),
    );
    record.insert("event".to_string(), Value::from(event));
    for (key, value) in fields {
        record.insert(key, value);
    }
    let line = serde_json::to_string(&Value::Object(record)).map_err(std::io::Error::other)?;
    append_engine_log_line(state_root, &line)
}

/// Installs the global `tracing` subscriber once. `RUST_LOG` overrides the
/// configured filter when set.
pub fn init_tracing(default_filter: &str) {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn engine_events_are_appended_as_json_lines() {
        let temp = tempdir().expect("tempdir");
        let mut fields = Map::new();
        fields.insert("threadId".to_string(), Value::from("t1"));
        append_engine_event(temp.path(), "turn.completed", fields.clone()).expect("first");
        append_engine_event(temp.path(), "turn.completed", fields).expect("second");

        let raw = fs::read_to_string(engine_log_path(temp.path())).expect("read log");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(parsed["event"], "turn.completed");
        assert_eq!(parsed["threadId"], "t1");
        assert!(parsed["timestamp"].is_i64());
    }
}
