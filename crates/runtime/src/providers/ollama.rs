//! Ollama chat API backend.

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolSpec,
    Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/api/chat";

/// Text used when the provider answers without a message.
pub const EMPTY_REPLY: &str = "No message received.";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl ApiMessage {
    fn new(role: &'static str, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    message: Option<ApiResponseMessage>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaBackendBuilder {
    url: String,
    model: String,
}

impl OllamaBackendBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            model: model.into(),
        }
    }

    /// Full chat endpoint URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn build(self) -> OllamaBackend {
        OllamaBackend {
            client: reqwest::Client::new(),
            url: self.url,
            model: self.model,
        }
    }
}

/// Backend for Ollama's `/api/chat` (and compatible servers).
pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaBackend {
    pub fn builder(model: impl Into<String>) -> OllamaBackendBuilder {
        OllamaBackendBuilder::new(model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// One wire message per transcript message, except that every tool
    /// result becomes its own `tool` message.
    fn message_to_api(msg: &Message) -> Vec<ApiMessage> {
        let mut head = ApiMessage::new(Self::role_to_api(msg.role), msg.text());
        let mut results = Vec::new();

        for part in &msg.parts {
            match part {
                Part::Text(_) => {}
                Part::ToolCall(call) => head.tool_calls.push(ApiToolCall {
                    id: call.id.clone(),
                    function: ApiFunctionCall {
                        name: call.name.clone(),
                        arguments: call.input.clone(),
                    },
                }),
                Part::ToolResult(result) => results.push(ApiMessage {
                    tool_call_id: Some(result.tool_call_id.clone()),
                    tool_name: Some(result.name.clone()),
                    ..ApiMessage::new("tool", result.content.clone())
                }),
            }
        }

        if results.is_empty() || !head.content.is_empty() || !head.tool_calls.is_empty() {
            results.insert(0, head);
        }
        results
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool {
        ApiTool {
            tool_type: "function",
            function: ApiFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.schema.clone(),
            },
        }
    }

    fn response_to_message(message: Option<ApiResponseMessage>) -> Message {
        let Some(message) = message else {
            return Message::assistant(EMPTY_REPLY);
        };

        let mut parts = Vec::new();
        if !message.content.is_empty() {
            parts.push(Part::Text(message.content));
        }
        for call in message.tool_calls {
            parts.push(Part::ToolCall(ToolCall {
                id: call.id.filter(|id| !id.is_empty()),
                input: parse_arguments(&call.function.name, call.function.arguments),
                name: call.function.name,
            }));
        }
        if parts.is_empty() {
            parts.push(Part::Text(String::new()));
        }

        Message {
            role: Role::Assistant,
            parts,
        }
    }
}

/// Arguments arrive either as an object or as a JSON-encoded string.
///
/// A string that does not parse is kept as is; the call is still part of
/// the batch and gets rejected on its own when it is executed.
fn parse_arguments(tool: &str, arguments: Value) -> Value {
    match arguments {
        Value::String(raw) if raw.trim().is_empty() => Value::Object(Default::default()),
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            debug!(tool, error = %e, "tool call arguments are not JSON");
            Value::String(raw)
        }),
        Value::Null => Value::Object(Default::default()),
        other => other,
    }
}

impl std::fmt::Display for OllamaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ollama({}, url={})", self.model, self.url)
    }
}

impl Backend for OllamaBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = ApiRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .flat_map(Self::message_to_api)
                .collect(),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
            stream: false,
        };

        debug!(
            model = %self.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            "calling model"
        );

        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = Usage {
            input_tokens: api_response.prompt_eval_count,
            output_tokens: api_response.eval_count,
        };
        let message = Self::response_to_message(api_response.message);

        Ok(ModelResponse { message, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolResult;
    use serde_json::json;

    fn parse(body: Value) -> Message {
        let response: ApiResponse = serde_json::from_value(body).unwrap();
        OllamaBackend::response_to_message(response.message)
    }

    #[test]
    fn plain_answer() {
        let message = parse(json!({
            "message": {"role": "assistant", "content": "done"},
            "done": true
        }));
        assert_eq!(message.text(), "done");
        assert!(!message.has_tool_calls());
    }

    #[test]
    fn missing_message_uses_placeholder() {
        let message = parse(json!({"done": true}));
        assert_eq!(message.text(), EMPTY_REPLY);
    }

    #[test]
    fn tool_call_arguments_as_object_or_string() {
        let message = parse(json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "read_file", "arguments": {"path": "a.txt"}}},
                    {"id": "c2", "function": {"name": "list_directory", "arguments": "{\"path\": \".\"}"}}
                ]
            }
        }));
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, None);
        assert_eq!(calls[0].input, json!({"path": "a.txt"}));
        assert_eq!(calls[1].id.as_deref(), Some("c2"));
        assert_eq!(calls[1].input, json!({"path": "."}));
    }

    #[test]
    fn unparseable_string_arguments_are_kept_raw() {
        let message = parse(json!({
            "message": {
                "content": "",
                "tool_calls": [
                    {"function": {"name": "list_directory", "arguments": {}}},
                    {"function": {"name": "read_file", "arguments": "{oops"}}
                ]
            }
        }));
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].input, json!({}));
        assert_eq!(calls[1].input, json!("{oops"));
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let call = ToolCall {
            id: Some("c1".into()),
            name: "read_file".into(),
            input: json!({"path": "a.txt"}),
        };
        let assistant = Message {
            role: Role::Assistant,
            parts: vec![Part::ToolCall(call.clone())],
        };
        let tool = Message::tool_result(ToolResult::success(&call, "hello"));

        let wire: Vec<Value> = [assistant, tool]
            .iter()
            .flat_map(OllamaBackend::message_to_api)
            .map(|m| serde_json::to_value(m).unwrap())
            .collect();

        assert_eq!(
            wire,
            vec![
                json!({
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"id": "c1", "function": {"name": "read_file", "arguments": {"path": "a.txt"}}}]
                }),
                json!({
                    "role": "tool",
                    "content": "hello",
                    "tool_call_id": "c1",
                    "tool_name": "read_file"
                }),
            ]
        );
    }

    #[test]
    fn tools_are_advertised_as_functions() {
        let api = OllamaBackend::tool_to_api(&ToolSpec {
            name: "read_file".into(),
            description: "Read a file".into(),
            schema: json!({"type": "object"}),
        });
        assert_eq!(
            serde_json::to_value(api).unwrap(),
            json!({
                "type": "function",
                "function": {
                    "name": "read_file",
                    "description": "Read a file",
                    "parameters": {"type": "object"}
                }
            })
        );
    }

    #[test]
    fn display() {
        let backend = OllamaBackend::builder("llama3.1").build();
        assert_eq!(
            backend.to_string(),
            "ollama(llama3.1, url=http://localhost:11434/api/chat)"
        );
    }
}
