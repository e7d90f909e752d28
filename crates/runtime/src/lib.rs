//! fsagent runtime: the driver side of the agent.
//!
//! Holds a conversation with a language model, forwards the model's tool
//! calls to a toolhost and feeds the results back until the model gives a
//! plain answer.
//!
//! # Overview
//!
//! - **Session**: the transcript and the tool-call resolution loop.
//! - **Backend**: a trait abstracting model providers (Ollama today).
//! - **ToolHost**: a trait abstracting where tools run; [`McpToolHost`]
//!   talks to a toolhost over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use runtime::{McpToolHost, OllamaBackend, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = OllamaBackend::builder("llama3.1").build();
//! let tools =
//!     McpToolHost::connect(mcp::ClientConfig::new("http://127.0.0.1:3333/mcp")).await?;
//!
//! let mut session = Session::new(backend, tools).with_system("You manage files.");
//! let answer = session.chat("What is in notes.txt?").await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

mod error;
pub mod model;
mod providers;
mod session;
pub mod tools;

pub use error::{Error, Result};
pub use model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolResult,
    ToolSpec, Usage,
};
pub use providers::{DEFAULT_OLLAMA_URL, EMPTY_REPLY, OllamaBackend, OllamaBackendBuilder};
pub use session::{DEFAULT_MODEL_TIMEOUT, DEFAULT_TOOL_TIMEOUT, Session};
pub use tools::{McpToolHost, ToolError, ToolHost};
