//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The toolhost failed to start or stopped with an error.
    #[error(transparent)]
    Toolhost(#[from] toolhost::Error),

    /// The toolhost could not be reached when the chat started.
    #[error("cannot reach toolhost at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: mcp::Error,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
