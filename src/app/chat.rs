use crate::collab::ScriptExecutor;
use crate::orchestration::{
    execute_approved, execution_notice, rejection_notice, ConversationHub, ForwardRequest,
    TurnEvent, TurnOutcome,
};
use crate::shared::ids::ThreadId;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

pub const CHAT_EXIT_COMMANDS: &[&str] = &["/exit", "exit", "quit"];
const PANEL_COMMAND: &str = "/panel";

pub fn is_chat_exit_command(message: &str) -> bool {
    CHAT_EXIT_COMMANDS
        .iter()
        .any(|command| message.eq_ignore_ascii_case(command))
}

/// A terminal conversation. The panel map stands in for the host's
/// parameters panel: it rides along with every message and answers
/// `get_ui_parameters` pulls.
pub struct ChatSession<'a> {
    pub hub: &'a ConversationHub,
    pub executor: Arc<dyn ScriptExecutor>,
    pub thread_id: ThreadId,
    pub execution_timeout: Duration,
    pub panel: BTreeMap<String, Value>,
}

fn io_err(err: std::io::Error) -> String {
    format!("terminal i/o failed: {err}")
}

/// Panel values are typed the way a UI would send them: JSON when it parses,
/// plain text otherwise.
fn panel_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.trim().to_string()))
}

impl ChatSession<'_> {
    fn panel_command<W: Write>(&mut self, rest: &str, output: &mut W) -> Result<(), String> {
        let rest = rest.trim();
        if rest.is_empty() {
            if self.panel.is_empty() {
                writeln!(output, "panel is empty").map_err(io_err)?;
            }
            for (name, value) in &self.panel {
                writeln!(output, "  {name} = {value}").map_err(io_err)?;
            }
            return Ok(());
        }
        match rest.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                self.panel
                    .insert(name.trim().to_string(), panel_value(value));
                writeln!(output, "panel: {} set", name.trim()).map_err(io_err)
            }
            _ => writeln!(output, "usage: /panel name=value").map_err(io_err),
        }
    }

    /// Shows the outcome and keeps feeding the hub until nothing is pending.
    fn settle_outcome<R: BufRead, W: Write>(
        &mut self,
        first: TurnOutcome,
        input: &mut R,
        output: &mut W,
    ) -> Result<(), String> {
        let mut pending = VecDeque::from([first]);
        while let Some(outcome) = pending.pop_front() {
            for reply in &outcome.replies {
                writeln!(output, "assistant: {reply}").map_err(io_err)?;
            }
            for forward in &outcome.forwards {
                let ForwardRequest::GetUiParameters {
                    generation,
                    call_id,
                    ..
                } = forward;
                let event = TurnEvent::UiParameters {
                    generation: *generation,
                    call_id: call_id.clone(),
                    values: self.panel.clone(),
                };
                pending.push_back(self.hub.submit(&self.thread_id, event));
            }
            for request in &outcome.approvals {
                let payload = serde_json::to_string_pretty(&request.payload())
                    .map_err(|err| format!("failed to render approval: {err}"))?;
                writeln!(output, "approval requested:\n{payload}").map_err(io_err)?;
                write!(output, "approve? [y/N] ").map_err(io_err)?;
                output.flush().map_err(io_err)?;
                let mut answer = String::new();
                input.read_line(&mut answer).map_err(io_err)?;
                let event = if answer.trim().eq_ignore_ascii_case("y") {
                    let result = execute_approved(
                        Arc::clone(&self.executor),
                        request,
                        self.execution_timeout,
                    );
                    execution_notice(request, result)
                } else {
                    rejection_notice(request)
                };
                pending.push_back(self.hub.submit(&self.thread_id, event));
            }
        }
        Ok(())
    }

    /// Runs until end of input or an exit command; returns the number of
    /// messages sent.
    pub fn run<R: BufRead, W: Write>(&mut self, mut input: R, mut output: W) -> Result<usize, String> {
        let mut sent = 0usize;
        loop {
            write!(output, "you: ").map_err(io_err)?;
            output.flush().map_err(io_err)?;
            let mut line = String::new();
            if input.read_line(&mut line).map_err(io_err)? == 0 {
                break;
            }
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            if is_chat_exit_command(message) {
                break;
            }
            if let Some(rest) = message.strip_prefix(PANEL_COMMAND) {
                self.panel_command(rest, &mut output)?;
                continue;
            }
            let outcome = self.hub.submit(
                &self.thread_id,
                TurnEvent::UserMessage {
                    text: message.to_string(),
                    ui_values: self.panel.clone(),
                },
            );
            sent += 1;
            self.settle_outcome(outcome, &mut input, &mut output)?;
        }
        Ok(sent)
    }
}
