//! MCP (Model Context Protocol) wire types and HTTP session client.
//!
//! The protocol module is shared by the toolhost (which serves it) and the
//! driver (which consumes it through [`Client`]).
//!
//! # Example
//!
//! ```no_run
//! use mcp::{Client, ClientConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let client = Client::connect(ClientConfig::new("http://127.0.0.1:3333/mcp")).await?;
//!
//! for tool in client.tools().await {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool("read_file", Some(serde_json::json!({ "path": "./README.md" })))
//!     .await?;
//! println!("{}", result.text_content());
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;

pub use client::{Client, ClientConfig, DEFAULT_TIMEOUT, MAX_OUTPUT_SIZE};
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, RequestId,
    SESSION_ID_HEADER, ServerCapabilities, Tool, ToolContent, ToolsCapability,
};
