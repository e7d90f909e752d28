//! The tool-call resolution loop.

use std::collections::HashSet;
use std::time::Duration;

use crate::model::{
    Backend, Message, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolResult,
};
use crate::providers::EMPTY_REPLY;
use crate::tools::{ToolError, ToolHost};
use crate::{Error, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Default deadline for one model call.
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default deadline for one tool call, as seen from the driver.
///
/// Longer than the toolhost's own 30 s handler deadline, so a slow tool
/// comes back as the toolhost's flagged result rather than a local timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(35);

/// A conversation with a model that can call tools.
///
/// Each [`chat`](Self::chat) call is one turn: the user message goes into
/// the transcript and the model is queried until it answers without
/// requesting tools.
pub struct Session<B, H> {
    backend: B,
    tools: H,
    messages: Vec<Message>,
    model_timeout: Duration,
    tool_timeout: Duration,
}

impl<B: Backend, H: ToolHost> Session<B, H> {
    pub fn new(backend: B, tools: H) -> Self {
        Self {
            backend,
            tools,
            messages: Vec::new(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the system prompt. It is always the first transcript message.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let message = Message::system(system);
        if self.messages.first().is_some_and(|m| m.role == Role::System) {
            self.messages[0] = message;
        } else {
            self.messages.insert(0, message);
        }
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tools(&self) -> &H {
        &self.tools
    }

    /// Send a user message and resolve tool calls until a plain answer.
    ///
    /// The transcript only grows. When the turn fails, the tool calls and
    /// results it already produced stay, and the turn is closed with a
    /// placeholder assistant reply.
    pub async fn chat(&mut self, user_input: &str) -> Result<String> {
        self.messages.push(Message::user(user_input));

        let outcome = self.resolve().await;
        if outcome.is_err() {
            self.messages.push(Message::assistant(EMPTY_REPLY));
        }
        outcome
    }

    async fn resolve(&mut self) -> Result<String> {
        let mut round = 0usize;
        loop {
            round += 1;
            let response = self.call_model().await?;
            let message = response.message;

            if !message.has_tool_calls() {
                let answer = message.text();
                debug!(
                    round,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "model answered"
                );
                self.messages.push(message);
                return Ok(answer);
            }

            let calls = message.tool_calls();
            check_correlation(&calls)?;
            info!(round, calls = calls.len(), "model requested tools");

            // The assistant's request goes in first, with its text dropped.
            self.messages.push(Message {
                role: message.role,
                parts: message
                    .parts
                    .into_iter()
                    .filter(|part| matches!(part, Part::ToolCall(_)))
                    .collect(),
            });

            for call in &calls {
                let result = self.run_tool(call).await;
                self.messages.push(Message::tool_result(result));
            }
        }
    }

    async fn call_model(&self) -> Result<ModelResponse> {
        let request = ModelRequest {
            messages: &self.messages,
            tools: self.tools.specs(),
        };
        match tokio::time::timeout(self.model_timeout, self.backend.call(request)).await {
            Ok(response) => Ok(response?),
            Err(_) => {
                warn!(timeout = ?self.model_timeout, "model call timed out");
                Err(Error::Timeout {
                    operation: "model call",
                    after: self.model_timeout,
                })
            }
        }
    }

    /// Run one call. Every failure is folded into an error-flagged result.
    async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        let outcome = match check_arguments(call) {
            Ok(()) => tokio::time::timeout(self.tool_timeout, self.tools.execute(call))
                .await
                .unwrap_or(Err(ToolError::Timeout(self.tool_timeout))),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) if result.is_error => {
                debug!(tool = %call.name, "tool reported an error");
                ToolResult::failure(call, result.text_content())
            }
            Ok(result) => ToolResult::success(call, result.text_content()),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                ToolResult::failure(call, format!("Error: {e}"))
            }
        }
    }
}

/// Every result must be attributable to exactly one request.
///
/// Calls without an id are keyed by tool name, which is only unambiguous
/// when no other call in the batch shares that key.
fn check_correlation(calls: &[ToolCall]) -> Result<()> {
    let mut seen = HashSet::new();
    for call in calls {
        if !seen.insert(call.correlation_key()) {
            return Err(Error::InvalidToolCalls(format!(
                "more than one call correlates as {:?}",
                call.correlation_key()
            )));
        }
    }
    Ok(())
}

/// Arguments must be an object, or absent.
fn check_arguments(call: &ToolCall) -> std::result::Result<(), ToolError> {
    match &call.input {
        Value::Null | Value::Object(_) => Ok(()),
        other => Err(ToolError::InvalidInput(format!(
            "arguments for {} are not a JSON object: {other}",
            call.name
        ))),
    }
}
