pub mod chat;
pub mod cli;

use crate::catalog::{ManifestCatalog, ScriptRegistry};
use crate::config::{load_settings, EngineSettings};
use crate::host::HttpHost;
use crate::orchestration::conversation_context::{read_audit_records, AuditKind};
use crate::orchestration::{ConversationHub, FileCheckpointStore, TurnEngine};
use crate::provider::HttpModel;
use crate::shared::ids::ThreadId;
use crate::shared::logging::init_tracing;
use crate::working_set::Reconciler;
use chat::ChatSession;
use cli::{help_text, parse_cli_verb, parse_options, CliOptions, CliVerb};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }
    let verb = parse_cli_verb(args[0].as_str());
    if matches!(verb, CliVerb::Help) {
        return Ok(help_text());
    }
    if matches!(verb, CliVerb::Unknown) {
        return Err(format!("unknown command `{}`\n\n{}", args[0], help_text()));
    }
    let options = parse_options(&args[1..])?;
    let settings = load_settings(options.config.as_deref()).map_err(|err| err.to_string())?;
    init_tracing(&settings.log_filter);
    match verb {
        CliVerb::Chat => {
            let stdin = io::stdin();
            cmd_chat(settings, &options, stdin.lock(), io::stdout())
        }
        CliVerb::Catalog => cmd_catalog(&settings),
        CliVerb::Tools => cmd_tools(&settings),
        CliVerb::History => cmd_history(&settings, &options),
        CliVerb::Help | CliVerb::Unknown => Ok(help_text()),
    }
}

fn registry(settings: &EngineSettings) -> Arc<ScriptRegistry> {
    Arc::new(ScriptRegistry::new(
        Arc::new(ManifestCatalog::new(&settings.catalog_path)),
        settings.timeouts.catalog(),
    ))
}

fn thread_id(options: &CliOptions) -> Result<ThreadId, String> {
    match options.thread.as_deref() {
        Some(raw) => ThreadId::parse(raw),
        None => ThreadId::parse(&format!("cli-{}", chrono::Utc::now().timestamp())),
    }
}

pub fn cmd_chat<R: BufRead, W: Write>(
    settings: EngineSettings,
    options: &CliOptions,
    input: R,
    output: W,
) -> Result<String, String> {
    let thread_id = thread_id(options)?;
    let model = HttpModel::from_settings(&settings.model).map_err(|err| err.to_string())?;
    let host = Arc::new(HttpHost::new(&settings.host.base_url));
    let reconciler = Reconciler::new(host.clone(), settings.timeouts.host_validation());
    let execution_timeout = settings.timeouts.execution();
    let store = Arc::new(FileCheckpointStore::new(&settings.state_root));
    let engine = TurnEngine::new(settings.clone(), registry(&settings), Arc::new(model), reconciler);
    match engine.refresh_catalog() {
        Ok(count) => tracing::info!(count, "catalog loaded"),
        Err(err) => tracing::warn!(error = %err, "catalog unavailable at startup"),
    }
    let hub = ConversationHub::new(Arc::new(engine), store);

    let mut session = ChatSession {
        hub: &hub,
        executor: host,
        thread_id: thread_id.clone(),
        execution_timeout,
        panel: BTreeMap::new(),
    };
    let sent = session.run(input, output)?;
    Ok(format!("chat ended\nthread_id={thread_id}\nmessages={sent}"))
}

pub fn cmd_catalog(settings: &EngineSettings) -> Result<String, String> {
    let scripts = registry(settings).catalog().map_err(|err| err.to_string())?;
    if scripts.is_empty() {
        return Ok("catalog is empty".to_string());
    }
    let lines = scripts
        .iter()
        .map(|script| {
            let mut line = format!(
                "{}\t{}\t{} parameter(s)",
                script.tool_id,
                script.name,
                script.parameters.len()
            );
            if !script.description.trim().is_empty() {
                line.push('\t');
                line.push_str(script.description.trim());
            }
            line
        })
        .collect::<Vec<_>>();
    Ok(lines.join("\n"))
}

pub fn cmd_tools(settings: &EngineSettings) -> Result<String, String> {
    let tools = registry(settings)
        .tool_definitions()
        .map_err(|err| err.to_string())?;
    serde_json::to_string_pretty(&tools).map_err(|err| format!("failed to encode tools: {err}"))
}

pub fn cmd_history(settings: &EngineSettings, options: &CliOptions) -> Result<String, String> {
    let Some(raw) = options.thread.as_deref() else {
        return Err("usage: history --thread ID".to_string());
    };
    let thread_id = ThreadId::parse(raw)?;
    let records = read_audit_records(&settings.state_root, thread_id.as_str())
        .map_err(|err| format!("failed to read history for {thread_id}: {err}"))?;
    if records.is_empty() {
        return Ok(format!("no history for thread {thread_id}"));
    }
    let lines = records
        .iter()
        .map(|record| {
            let label = match record.kind {
                AuditKind::Inbound => "user",
                AuditKind::Outbound => "assistant",
                AuditKind::ToolCall => "tool call",
                AuditKind::ApprovalRequest => "approval requested",
                AuditKind::ApprovalRejected => "approval rejected",
                AuditKind::ExecutionNotice => "execution",
                AuditKind::UiParameters => "ui parameters",
            };
            format!("[{}] gen={} {label}: {}", record.timestamp, record.generation, record.message)
        })
        .collect::<Vec<_>>();
    Ok(lines.join("\n"))
}
