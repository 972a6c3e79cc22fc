use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadContextLimits {
    pub max_turns: usize,
    pub max_chars: usize,
}

impl Default for ThreadContextLimits {
    fn default() -> Self {
        Self {
            max_turns: 8,
            max_chars: 6000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Inbound,
    Outbound,
    ToolCall,
    ApprovalRequest,
    ApprovalRejected,
    ExecutionNotice,
    UiParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: i64,
    pub kind: AuditKind,
    pub generation: u64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, generation: u64, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            kind,
            generation,
            message: message.into(),
            call_id: None,
            payload: None,
        }
    }

    pub fn with_call(mut self, call_id: &str, payload: Option<Value>) -> Self {
        self.call_id = Some(call_id.to_string());
        self.payload = payload;
        self
    }
}

fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "_".to_string()
    } else {
        out
    }
}

pub fn audit_path(state_root: &Path, thread_id: &str) -> PathBuf {
    state_root
        .join("conversations")
        .join(format!("{}.jsonl", sanitize_component(thread_id)))
}

pub fn append_audit_record(
    state_root: &Path,
    thread_id: &str,
    record: &AuditRecord,
) -> std::io::Result<()> {
    let path = audit_path(state_root, thread_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

pub fn read_audit_records(state_root: &Path, thread_id: &str) -> std::io::Result<Vec<AuditRecord>> {
    let path = audit_path(state_root, thread_id);
    let file = match fs::File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
            records.push(record);
        }
    }
    Ok(records)
}

fn render_record(record: &AuditRecord) -> Option<String> {
    let line = match record.kind {
        AuditKind::Inbound => format!("[user] {}", record.message.trim()),
        AuditKind::Outbound => format!("[assistant] {}", record.message.trim()),
        AuditKind::ApprovalRequest => format!("[approval requested] {}", record.message.trim()),
        AuditKind::ApprovalRejected => "[approval rejected]".to_string(),
        AuditKind::ExecutionNotice => format!("[execution] {}", record.message.trim()),
        AuditKind::ToolCall | AuditKind::UiParameters => return None,
    };
    Some(line)
}

/// The most recent conversational records, oldest first, within both limits.
pub fn render_recent_thread_context(
    state_root: &Path,
    thread_id: &str,
    limits: ThreadContextLimits,
) -> std::io::Result<Option<String>> {
    if limits.max_turns == 0 || limits.max_chars == 0 {
        return Ok(None);
    }
    let mut lines = read_audit_records(state_root, thread_id)?
        .iter()
        .filter_map(render_record)
        .collect::<Vec<_>>();
    if lines.len() > limits.max_turns {
        let keep_from = lines.len() - limits.max_turns;
        lines = lines.split_off(keep_from);
    }

    let mut selected_lines = Vec::<String>::new();
    let mut used = 0usize;
    for line in lines.into_iter().rev() {
        let line_len = line.chars().count();
        let sep = if selected_lines.is_empty() { 0 } else { 1 };
        if used + sep + line_len > limits.max_chars {
            break;
        }
        used += sep + line_len;
        selected_lines.push(line);
    }
    selected_lines.reverse();
    if selected_lines.is_empty() {
        return Ok(None);
    }
    Ok(Some(selected_lines.join("\n")))
}
