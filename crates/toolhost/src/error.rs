//! Toolhost error types.

use std::path::PathBuf;
use std::time::Duration;

use mcp::CallToolResult;
use thiserror::Error;

/// A single argument that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Errors raised while running a tool.
///
/// These never cross the dispatch boundary as faults: every variant is
/// folded into an error-flagged [`CallToolResult`] so the model can react
/// to it. The variants exist for logging and tests, not for the driver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    #[error("invalid arguments: {}", join_violations(.0))]
    InvalidArguments(Vec<FieldViolation>),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("is a directory: {}", .0.display())]
    IsADirectory(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("not valid UTF-8: {}", .0.display())]
    NotUtf8(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tool {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
}

impl ToolError {
    /// Shorthand for a single-field validation failure.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments(vec![FieldViolation {
            field: field.into(),
            reason: reason.into(),
        }])
    }

    /// Classify an I/O error on `path` into the distinct filesystem kinds.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            std::io::ErrorKind::IsADirectory => Self::IsADirectory(path),
            std::io::ErrorKind::NotADirectory => Self::NotADirectory(path),
            _ => Self::Io { path, source },
        }
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ToolError> for CallToolResult {
    fn from(err: ToolError) -> Self {
        CallToolResult::error(format!("Error: {err}"))
    }
}

/// Registry construction errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
}

/// Faults at the session/connection layer.
///
/// Unlike [`ToolError`] these are surfaced as HTTP errors, not tool results.
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("malformed JSON-RPC envelope: {0}")]
    Malformed(String),

    #[error("batch requests are not supported")]
    BatchUnsupported,

    #[error("missing {0} header")]
    MissingSession(&'static str),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// A replacement session was closed before it could serve the request.
    #[error("session transport closed")]
    Closed,
}

/// Toolhost process errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
