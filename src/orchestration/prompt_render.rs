use crate::catalog::ScriptDescriptor;
use crate::collab::{ChatMessage, Role};
use crate::orchestration::conversation_context::ThreadContextLimits;
use crate::orchestration::error::OrchestratorError;
use crate::working_set::WorkingSet;

const CATALOG_NAME_LIMIT: usize = 40;

const SYSTEM_TEMPLATE: &str = "You help the user automate work in a live host application by choosing and running pre-authored scripts.\n\
Current task: {{task}}\n\n\
Candidate scripts (best keyword matches first):\n{{candidates}}\n\n\
Working set: {{working_set}}\n\n\
Rules:\n\
- To choose scripts, call `select_script` with `script_ids` (best first) and, when one clearly fits, `recommended`.\n\
- Call `get_parameters` when the user already named exactly one script.\n\
- Use the working-set tools only when the user asks to change which elements they are talking about.\n\
- Never claim a script ran. Running always needs the user's approval.\n\
- If nothing fits, say so briefly and suggest what the user could ask for.";

fn render_template_with_placeholders<F>(
    template: &str,
    mut resolve: F,
) -> Result<String, OrchestratorError>
where
    F: FnMut(&str) -> Result<String, OrchestratorError>,
{
    let mut rendered = String::new();
    let mut cursor = template;

    while let Some(start) = cursor.find("{{") {
        rendered.push_str(&cursor[..start]);
        let after_open = &cursor[start + 2..];
        let Some(close_offset) = after_open.find("}}") else {
            return Err(OrchestratorError::Internal(
                "unclosed placeholder in prompt template".to_string(),
            ));
        };
        let token = after_open[..close_offset].trim();
        if token.is_empty() {
            return Err(OrchestratorError::Internal(
                "empty placeholder in prompt template".to_string(),
            ));
        }
        rendered.push_str(&resolve(token)?);
        cursor = &after_open[close_offset + 2..];
    }

    rendered.push_str(cursor);
    Ok(rendered)
}

fn render_candidate(script: &ScriptDescriptor) -> String {
    let mut line = format!("- `{}`: {}", script.tool_id, script.name);
    if !script.categories.is_empty() {
        line.push_str(&format!(" [{}]", script.categories.join(", ")));
    }
    let description = script.description.trim();
    if !description.is_empty() {
        line.push_str(&format!(" - {description}"));
    }
    line
}

#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    pub task: Option<&'a str>,
    pub candidates: &'a [ScriptDescriptor],
    pub catalog: &'a [ScriptDescriptor],
    pub working_set: &'a WorkingSet,
}

/// When keyword narrowing found nothing the model sees catalog names instead.
pub fn render_system_prompt(inputs: PromptInputs<'_>) -> Result<String, OrchestratorError> {
    render_template_with_placeholders(SYSTEM_TEMPLATE, |token| match token {
        "task" => Ok(inputs
            .task
            .map(str::trim)
            .filter(|task| !task.is_empty())
            .unwrap_or("(none)")
            .to_string()),
        "candidates" if !inputs.candidates.is_empty() => Ok(inputs
            .candidates
            .iter()
            .map(render_candidate)
            .collect::<Vec<_>>()
            .join("\n")),
        "candidates" if inputs.catalog.is_empty() => Ok("(the catalog is empty)".to_string()),
        "candidates" => {
            let mut lines = inputs
                .catalog
                .iter()
                .take(CATALOG_NAME_LIMIT)
                .map(|script| format!("- `{}`: {}", script.tool_id, script.name))
                .collect::<Vec<_>>();
            if inputs.catalog.len() > CATALOG_NAME_LIMIT {
                lines.push(format!(
                    "- ... and {} more",
                    inputs.catalog.len() - CATALOG_NAME_LIMIT
                ));
            }
            Ok(format!("(no keyword matches; full catalog)\n{}", lines.join("\n")))
        }
        "working_set" => Ok(inputs.working_set.summary()),
        other => Err(OrchestratorError::Internal(format!(
            "unknown prompt placeholder `{other}`"
        ))),
    })
}

/// Tail of the history that fits the limits. A tool result is never sent
/// without the call it answers.
pub fn recent_messages(messages: &[ChatMessage], limits: ThreadContextLimits) -> Vec<ChatMessage> {
    if limits.max_turns == 0 || limits.max_chars == 0 {
        return Vec::new();
    }
    // a turn is a user message plus whatever followed it
    let mut turns_seen = 0usize;
    let mut used = 0usize;
    let mut start = messages.len();
    for (idx, message) in messages.iter().enumerate().rev() {
        let len = message.content.chars().count();
        if used + len > limits.max_chars && start < messages.len() {
            break;
        }
        used += len;
        start = idx;
        if message.role == Role::User {
            turns_seen += 1;
            if turns_seen >= limits.max_turns {
                break;
            }
        }
    }
    let mut window = messages[start..].to_vec();
    while window
        .first()
        .is_some_and(|message| message.role == Role::Tool)
    {
        window.remove(0);
    }
    window
}
