//! Filesystem tool handlers.
//!
//! Six single-file operations plus a directory listing. There is no
//! sandbox: relative paths resolve against the working directory and
//! absolute paths are used as given.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp::CallToolResult;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{RegistryError, ToolError};
use crate::registry::{ToolHandler, ToolRegistry};
use crate::schema::{Arguments, InputSchema, Param, ParamKind};

/// Where relative paths are resolved.
#[derive(Debug, Clone)]
pub struct FsContext {
    workdir: PathBuf,
}

impl FsContext {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

/// Build a registry holding every filesystem tool.
pub fn filesystem_registry(
    ctx: FsContext,
    timeout: Duration,
) -> Result<ToolRegistry, RegistryError> {
    let ctx = Arc::new(ctx);
    let mut registry = ToolRegistry::new().with_timeout(timeout);

    let path = || Param::required("path", ParamKind::String).describe("Path of the file");
    let content = |what: &str| Param::required("content", ParamKind::String).describe(what);

    registry.register(
        "create_file",
        "Create a new file with the given content. Fails if the file already exists \
         or its parent directory is missing.",
        InputSchema::new()
            .param(path())
            .param(content("Content to write")),
        CreateFile(ctx.clone()),
    )?;
    registry.register(
        "read_file",
        "Read the full content of a file.",
        InputSchema::new().param(path()),
        ReadFile(ctx.clone()),
    )?;
    registry.register(
        "update_file",
        "Replace the content of an existing file.",
        InputSchema::new()
            .param(path())
            .param(content("New content of the file")),
        UpdateFile(ctx.clone()),
    )?;
    registry.register(
        "append_file",
        "Append content to the end of an existing file.",
        InputSchema::new()
            .param(path())
            .param(content("Content to append")),
        AppendFile(ctx.clone()),
    )?;
    registry.register(
        "delete_file",
        "Delete a file. Directories are refused.",
        InputSchema::new().param(path()),
        DeleteFile(ctx.clone()),
    )?;
    registry.register(
        "list_directory",
        "List the entries of a directory. Subdirectories end with '/'.",
        InputSchema::new().param(
            Param::optional("path", ParamKind::String)
                .describe("Directory to list")
                .default_value(ctx.workdir().display().to_string()),
        ),
        ListDirectory(ctx),
    )?;

    Ok(registry)
}

async fn metadata(path: &Path) -> Result<std::fs::Metadata, ToolError> {
    tokio::fs::metadata(path)
        .await
        .map_err(|e| ToolError::from_io(path, e))
}

/// Fails unless `path` exists and is a regular file.
async fn existing_file(path: &Path) -> Result<(), ToolError> {
    if metadata(path).await?.is_dir() {
        return Err(ToolError::IsADirectory(path.to_path_buf()));
    }
    Ok(())
}

struct CreateFile(Arc<FsContext>);

#[async_trait]
impl ToolHandler for CreateFile {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError> {
        let raw = args.non_blank("path")?;
        let content = args.str("content").unwrap_or_default();
        let path = self.0.resolve(raw);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !metadata(parent).await?.is_dir() {
                return Err(ToolError::NotADirectory(parent.to_path_buf()));
            }
        }

        // create_new refuses to clobber an existing target atomically.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        file.flush().await.map_err(|e| ToolError::from_io(&path, e))?;

        info!(path = %path.display(), bytes = content.len(), "created file");
        Ok(CallToolResult::text(format!("Created file {raw}")))
    }
}

struct ReadFile(Arc<FsContext>);

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError> {
        let path = self.0.resolve(args.non_blank("path")?);
        existing_file(&path).await?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        let text = String::from_utf8(bytes).map_err(|_| ToolError::NotUtf8(path.clone()))?;
        Ok(CallToolResult::text(text))
    }
}

struct UpdateFile(Arc<FsContext>);

#[async_trait]
impl ToolHandler for UpdateFile {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError> {
        let raw = args.non_blank("path")?;
        let content = args.str("content").unwrap_or_default();
        let path = self.0.resolve(raw);
        existing_file(&path).await?;

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;

        info!(path = %path.display(), bytes = content.len(), "updated file");
        Ok(CallToolResult::text(format!("Updated file {raw}")))
    }
}

struct AppendFile(Arc<FsContext>);

#[async_trait]
impl ToolHandler for AppendFile {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError> {
        let raw = args.non_blank("path")?;
        let content = args.str("content").unwrap_or_default();
        let path = self.0.resolve(raw);
        existing_file(&path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        file.flush().await.map_err(|e| ToolError::from_io(&path, e))?;

        info!(path = %path.display(), bytes = content.len(), "appended to file");
        Ok(CallToolResult::text(format!(
            "Appended {} bytes to {raw}",
            content.len()
        )))
    }
}

struct DeleteFile(Arc<FsContext>);

#[async_trait]
impl ToolHandler for DeleteFile {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError> {
        let raw = args.non_blank("path")?;
        let path = self.0.resolve(raw);

        let meta = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        if meta.is_dir() {
            return Err(ToolError::IsADirectory(path));
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;

        info!(path = %path.display(), "deleted file");
        Ok(CallToolResult::text(format!("Deleted file {raw}")))
    }
}

struct ListDirectory(Arc<FsContext>);

#[async_trait]
impl ToolHandler for ListDirectory {
    async fn call(&self, args: Arguments) -> Result<CallToolResult, ToolError> {
        let path = self.0.resolve(args.non_blank("path")?);
        if !metadata(&path).await?.is_dir() {
            return Err(ToolError::NotADirectory(path));
        }

        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::from_io(&path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::from_io(&path, e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(CallToolResult::text(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(CallToolResult::text(entries.join("\n")))
    }
}
