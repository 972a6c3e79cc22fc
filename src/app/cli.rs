use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Chat,
    Catalog,
    Tools,
    History,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "chat" => CliVerb::Chat,
        "catalog" => CliVerb::Catalog,
        "tools" => CliVerb::Tools,
        "history" => CliVerb::History,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn cli_help_lines() -> Vec<String> {
    vec![
        "Commands:".to_string(),
        "  chat [--config PATH] [--thread ID]   Talk to the engine; approve runs inline".to_string(),
        "  catalog [--config PATH]              List scripts with their tool ids".to_string(),
        "  tools [--config PATH]                Print the tool schemas offered to the model"
            .to_string(),
        "  history --thread ID [--config PATH]  Print the audit trail of a thread".to_string(),
        "  help                                 Show this help".to_string(),
        String::new(),
        "Inside chat:".to_string(),
        "  /panel name=value                    Set a value in the simulated parameters panel"
            .to_string(),
        "  /panel                               Show the panel values".to_string(),
        "  /exit                                Leave the chat".to_string(),
    ]
}

pub fn help_text() -> String {
    cli_help_lines().join("\n")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub thread: Option<String>,
}

pub fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .filter(|value| !value.starts_with("--"))
                .cloned()
                .ok_or_else(|| format!("`{flag}` requires a value"))
        };
        match arg.as_str() {
            "--config" => options.config = Some(PathBuf::from(value_for("--config")?)),
            "--thread" => options.thread = Some(value_for("--thread")?),
            other => return Err(format!("unexpected argument `{other}`")),
        }
    }
    Ok(options)
}
