//! MCP-backed tool host.

use super::{ToolError, ToolHost};
use crate::model::{ToolCall, ToolSpec};
use mcp::{CallToolResult, Client, ClientConfig};
use serde_json::Value;
use tracing::debug;

/// Tool host backed by a toolhost session over HTTP.
pub struct McpToolHost {
    client: Client,
    specs: Vec<ToolSpec>,
}

impl McpToolHost {
    /// Open a session and cache the advertised tool specs.
    pub async fn connect(config: ClientConfig) -> Result<Self, mcp::Error> {
        let client = Client::connect(config).await?;
        let specs = client
            .tools()
            .await
            .into_iter()
            .map(ToolSpec::from)
            .collect();
        Ok(Self { client, specs })
    }

    /// Terminate the toolhost session.
    pub async fn close(&self) -> Result<(), mcp::Error> {
        self.client.close().await
    }
}

impl ToolHost for McpToolHost {
    fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    async fn execute(&self, call: &ToolCall) -> Result<CallToolResult, ToolError> {
        let arguments = match &call.input {
            Value::Null => None,
            input => Some(input.clone()),
        };

        debug!(tool = %call.name, "forwarding tool call");
        self.client
            .call_tool(&call.name, arguments)
            .await
            .map_err(|e| ToolError::Transport(e.to_string()))
    }
}
