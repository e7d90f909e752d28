//! LLM provider adapters.
//!
//! Each provider implements the backend trait for its specific API.

mod ollama;

pub use ollama::{DEFAULT_OLLAMA_URL, EMPTY_REPLY, OllamaBackend, OllamaBackendBuilder};
