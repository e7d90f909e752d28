use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while executing a tool call on the driver side.
///
/// None of these end the turn: the loop turns each into an error-flagged
/// tool result for the model to read.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("toolhost unreachable: {0}")]
    Transport(String),
}
