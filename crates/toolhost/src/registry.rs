//! Tool registry: the fixed vocabulary of operations a session exposes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp::{CallToolResult, Tool};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{RegistryError, ToolError};
use crate::schema::{Arguments, InputSchema};

/// Default deadline for a single handler invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool implementation.
///
/// Handlers receive arguments that already passed schema validation and
/// return the same result shape on success and failure.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError>;
}

struct ToolEntry {
    name: String,
    description: String,
    schema: InputSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Ordered mapping from tool name to its contract and handler.
///
/// Registration needs `&mut self`; once a registry is bound to a session it
/// is only reachable through shared references.
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the per-invocation handler deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Names are unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: InputSchema,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(ToolEntry {
            name,
            description: description.into(),
            schema,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool descriptors in registration order.
    pub fn describe(&self) -> Vec<Tool> {
        self.entries
            .iter()
            .map(|entry| Tool {
                name: entry.name.clone(),
                description: Some(entry.description.clone()),
                input_schema: entry.schema.to_json(),
            })
            .collect()
    }

    /// Run a tool. Never fails: errors come back as flagged results.
    pub async fn dispatch(&self, name: &str, args: Option<Value>) -> CallToolResult {
        match self.try_dispatch(name, args).await {
            Ok(result) => result,
            Err(err) => {
                debug!(tool = name, error = %err, "tool call failed");
                err.into()
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch) but keeps the error kind.
    pub async fn try_dispatch(
        &self,
        name: &str,
        args: Option<Value>,
    ) -> Result<CallToolResult, ToolError> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args = entry.schema.validate(args)?;

        match tokio::time::timeout(self.timeout, entry.handler.call(args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = name, timeout = ?self.timeout, "tool handler timed out");
                Err(ToolError::Timeout {
                    name: name.to_string(),
                    after: self.timeout,
                })
            }
        }
    }
}
