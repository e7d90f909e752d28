//! Filesystem toolhost.
//!
//! Exposes single-file operations as schema-validated tools over a
//! session-oriented HTTP transport speaking JSON-RPC 2.0 with the MCP
//! method vocabulary.
//!
//! Each caller gets its own [`Session`]: one transport and one
//! [`ToolRegistry`], looked up by the `Mcp-Session-Id` header.
//!
//! ```no_run
//! use toolhost::{ServerConfig, serve};
//!
//! # async fn run() -> toolhost::Result<()> {
//! serve(ServerConfig::default()).await
//! # }
//! ```

mod error;
mod fs;
mod manager;
mod registry;
mod schema;
mod server;
mod session;
mod transport;

pub use error::{Error, FieldViolation, RegistryError, Result, ToolError, TransportFault};
pub use fs::{FsContext, filesystem_registry};
pub use manager::{Handled, RegistryFactory, SessionManager};
pub use registry::{DEFAULT_TOOL_TIMEOUT, ToolHandler, ToolRegistry};
pub use schema::{Arguments, InputSchema, Param, ParamKind};
pub use server::{ServerConfig, filesystem_manager, router, serve};
pub use session::{Session, SessionId};
pub use transport::{Transport, TransportError, TransportState};
