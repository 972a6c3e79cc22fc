use super::ProviderError;
use crate::collab::{AssistantReply, ChatMessage, CollaboratorError, LanguageModel, ModelRequest, Role};
use crate::config::ModelSettings;
use serde_json::{json, Map, Value};

/// `LanguageModel` over an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpModel {
    api_base: String,
    model: String,
    api_key: String,
}

impl HttpModel {
    pub fn new(api_base: &str, model: &str, api_key: &str) -> Self {
        Self {
            api_base: api_base.trim().to_string(),
            model: model.trim().to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Reads the api key from the environment variable the settings name.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ProviderError::MissingApiKey(settings.api_key_env.clone()))?;
        Ok(Self::new(&settings.base_url, &settings.model, &api_key))
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    pub fn request_body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
        messages.extend(request.messages.iter().map(wire_message));
        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(self.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema,
                        }
                    })
                })
                .collect::<Vec<_>>();
            body.insert("tools".to_string(), Value::Array(tools));
        }
        Value::Object(body)
    }

    fn send(&self, request: &ModelRequest) -> Result<AssistantReply, ProviderError> {
        let url = self.endpoint();
        let response = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(self.request_body(request))
            .map_err(|err| ProviderError::Request {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        let value = response
            .into_json::<Value>()
            .map_err(|err| ProviderError::ParseFailure(err.to_string()))?;
        parse_chat_completion(&value)
    }
}

impl LanguageModel for HttpModel {
    fn complete(&self, request: &ModelRequest) -> Result<AssistantReply, CollaboratorError> {
        self.send(request)
            .map_err(|err| CollaboratorError::failed("model", err.to_string()))
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        Role::Assistant => match &message.tool_call {
            Some(call) => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                }]
            }),
            None => json!({"role": "assistant", "content": message.content}),
        },
        Role::User => json!({"role": "user", "content": message.content}),
        Role::System => json!({"role": "system", "content": message.content}),
    }
}

/// First tool call of the first choice wins; otherwise its text content.
pub fn parse_chat_completion(value: &Value) -> Result<AssistantReply, ProviderError> {
    let message = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ProviderError::ParseFailure("response has no choices".to_string()))?;

    if let Some(call) = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| calls.first())
    {
        let function = call
            .get("function")
            .ok_or_else(|| ProviderError::ParseFailure("tool call without function".to_string()))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ProviderError::ParseFailure("tool call without name".to_string()))?;
        let arguments = match function.get("arguments") {
            Some(Value::String(raw)) if raw.trim().is_empty() => Value::Object(Map::new()),
            Some(Value::String(raw)) => serde_json::from_str(raw)
                .map_err(|err| ProviderError::ParseFailure(format!("tool arguments: {err}")))?,
            Some(other) => other.clone(),
            None => Value::Object(Map::new()),
        };
        return Ok(AssistantReply::ToolCall {
            name: name.to_string(),
            arguments,
        });
    }

    let text = match message.get("content") {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };
    if text.is_empty() {
        return Err(ProviderError::ParseFailure(
            "response has neither text nor a tool call".to_string(),
        ));
    }
    Ok(AssistantReply::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::utility_tool_definitions;
    use crate::collab::ToolCall;

    #[test]
    fn tool_calls_are_preferred_over_text() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": "picking one",
                    "tool_calls": [{
                        "id": "x",
                        "type": "function",
                        "function": {"name": "select_script", "arguments": "{\"script_ids\":[\"a\"]}"}
                    }]
                }
            }]
        });
        assert_eq!(
            parse_chat_completion(&response).expect("reply"),
            AssistantReply::ToolCall {
                name: "select_script".to_string(),
                arguments: json!({"script_ids": ["a"]}),
            }
        );
    }

    #[test]
    fn content_parts_are_joined() {
        let response = json!({
            "choices": [{"message": {"content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": "there"}]}}]
        });
        assert_eq!(
            parse_chat_completion(&response).expect("reply"),
            AssistantReply::Text("Hello\nthere".to_string())
        );
        assert!(parse_chat_completion(&json!({"choices": []})).is_err());
    }

    #[test]
    fn request_body_carries_tools_and_tool_history() {
        let model = HttpModel::new("https://example.test/v1/", "m", "k");
        assert_eq!(model.endpoint(), "https://example.test/v1/chat/completions");
        let request = ModelRequest {
            system_prompt: "sys".to_string(),
            messages: vec![
                ChatMessage::user("audit walls"),
                ChatMessage::assistant_tool_call(ToolCall {
                    id: "call-1".to_string(),
                    name: "get_working_set_details".to_string(),
                    arguments: json!({}),
                }),
                ChatMessage::tool_result("call-1", "{}"),
            ],
            tools: utility_tool_definitions(),
        };
        let body = model.request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(body["messages"][3]["tool_call_id"], "call-1");
        assert_eq!(body["tools"][0]["type"], "function");
    }
}
