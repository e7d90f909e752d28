//! Per-session protocol state machine.
//!
//! Parses MCP method calls and routes `tools/*` into the bound registry.

use mcp::{
    CallToolParams, Implementation, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, ServerCapabilities,
    ToolsCapability,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::registry::ToolRegistry;

/// Protocol revisions this transport accepts from clients.
const SUPPORTED_VERSIONS: &[&str] = &[PROTOCOL_VERSION, "2024-11-05"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Ready,
    Closed,
}

/// Fatal transport failures. The session owning the transport is unusable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
}

pub struct Transport {
    state: TransportState,
    protocol_version: Option<String>,
    registry: ToolRegistry,
}

impl Transport {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            state: TransportState::Uninitialized,
            protocol_version: None,
            registry,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == TransportState::Ready
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn close(&mut self) {
        self.state = TransportState::Closed;
    }

    /// Handle one message. Notifications produce no response.
    pub async fn handle(
        &mut self,
        request: JsonRpcRequest,
    ) -> Result<Option<JsonRpcResponse>, TransportError> {
        if self.state == TransportState::Closed {
            return Err(TransportError::Closed);
        }

        if request.is_notification() {
            debug!(method = %request.method, "notification received");
            return Ok(None);
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params),
            _ if self.state == TransportState::Uninitialized => {
                Err(JsonRpcError::not_initialized())
            }
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => to_value(ListToolsResult {
                tools: self.registry.describe(),
            }),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        };

        Ok(Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        }))
    }

    fn initialize(
        &mut self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        if self.state != TransportState::Uninitialized {
            return Err(JsonRpcError::invalid_request(
                "Invalid Request: Server already initialized",
            ));
        }

        let params: InitializeParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("initialize requires params"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            })?;

        // Echo the client's revision when supported, otherwise offer ours.
        let version = if SUPPORTED_VERSIONS.contains(&params.protocol_version.as_str()) {
            params.protocol_version
        } else {
            PROTOCOL_VERSION.to_string()
        };

        info!(
            client = %params.client_info.name,
            protocol = %version,
            "session initialized"
        );
        self.state = TransportState::Ready;
        self.protocol_version = Some(version.clone());

        to_value(InitializeResult {
            protocol_version: version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: Implementation {
                name: "fsagent-toolhost".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
        })
    }

    async fn call_tool(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("tools/call requires params"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            })?;

        debug!(tool = %params.name, "tools/call");
        let result = self.registry.dispatch(&params.name, params.arguments).await;
        to_value(result)
    }
}

fn to_value(value: impl serde::Serialize) -> Result<serde_json::Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
}
