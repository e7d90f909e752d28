use std::time::Duration;
use thiserror::Error;

use crate::model::ModelError;

/// Errors that end a conversation turn.
///
/// None of these are fatal to the process: the caller reports the error and
/// may start another turn on the same session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid tool calls: {0}")]
    InvalidToolCalls(String),
}

pub type Result<T> = std::result::Result<T, Error>;
