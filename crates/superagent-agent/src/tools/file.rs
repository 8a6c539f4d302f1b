//! File operation tools.
//!
//! Every path is resolved inside the caller's workspace directory. Absolute
//! paths, `..` components and symlinks leading out of the workspace are
//! rejected as invalid arguments.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use superagent_types::ToolResult;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AgentError, Result};
use crate::tool::{FileWriteParams, ParamExt, Tool, ToolContext};

/// Largest file `file_read` will load.
const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Entries listed before `file_list` stops.
const MAX_LIST_ENTRIES: usize = 1000;

// ─────────────────────────────────────────────────────────────────────────────
// Workspace
// ─────────────────────────────────────────────────────────────────────────────

/// A directory file tools are confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if it does not exist yet and return its canonical form.
    async fn ensure_root(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AgentError::internal(format!("Cannot create workspace: {e}")))?;
        fs::canonicalize(&self.root)
            .await
            .map_err(|e| AgentError::internal(format!("Invalid workspace directory: {e}")))
    }

    /// Resolve a relative path inside the workspace.
    ///
    /// The path is checked lexically first, then the deepest existing
    /// ancestor is canonicalized so a symlink cannot point outside.
    pub async fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let relative = relative.trim();
        let path = Path::new(relative);
        if relative.is_empty() || relative == "." {
            return self.ensure_root().await;
        }

        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir => {
                    return Err(AgentError::invalid_params(format!(
                        "path '{relative}' must not contain '..'"
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::invalid_params(format!(
                        "path '{relative}' must be relative to the workspace"
                    )));
                }
            }
        }

        let root = self.ensure_root().await?;
        let full = root.join(path);

        let mut existing = full.as_path();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        let canonical = fs::canonicalize(existing)
            .await
            .map_err(|e| AgentError::tool(format!("Cannot resolve path: {e}")))?;
        if !canonical.starts_with(&root) {
            return Err(AgentError::invalid_params(format!(
                "path '{relative}' resolves outside the workspace"
            )));
        }

        Ok(full)
    }

    fn display(&self, path: &Path) -> String {
        let root = std::fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        path.strip_prefix(&root)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "string",
        "description": description
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// File Read Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Tool for reading file contents.
#[derive(Debug, Clone)]
pub struct FileReadTool {
    workspace: Workspace,
}

impl FileReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file from your workspace. Returns the file content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_schema("Path of the file, relative to the workspace")
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let raw = params.required_str("path", "provide the file path to read")?;
        let path = self.workspace.resolve(raw).await?;

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AgentError::tool(format!("File not found: {raw}")));
            }
            Err(e) => return Err(AgentError::tool(format!("Cannot stat {raw}: {e}"))),
        };
        if !metadata.is_file() {
            return Err(AgentError::invalid_params(format!("'{raw}' is not a file")));
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(AgentError::tool(format!(
                "File too large: {} bytes (limit {MAX_READ_BYTES})",
                metadata.len()
            )));
        }

        let bytes = fs::read(&path)
            .await
            .map_err(|e| AgentError::tool(format!("Failed to read file: {e}")))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        Ok(ToolResult::data(json!({
            "path": self.workspace.display(&path),
            "size": metadata.len(),
            "content": content,
        })))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Write Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Tool for writing files.
#[derive(Debug, Clone)]
pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text to a file in your workspace. Creates parent directories as needed."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_schema("Path of the file, relative to the workspace"),
                "content": {
                    "type": "string",
                    "description": "The content to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of overwriting (default: false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let params = FileWriteParams::try_from(params)?;
        let path = self.workspace.resolve(&params.path).await?;
        if path.is_dir() {
            return Err(AgentError::invalid_params(format!(
                "'{}' is a directory",
                params.path
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::tool(format!("Failed to create directories: {e}")))?;
        }

        if params.append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| AgentError::tool(format!("Failed to open file: {e}")))?;
            file.write_all(params.content.as_bytes())
                .await
                .map_err(|e| AgentError::tool(format!("Failed to write file: {e}")))?;
            file.flush()
                .await
                .map_err(|e| AgentError::tool(format!("Failed to write file: {e}")))?;
        } else {
            fs::write(&path, &params.content)
                .await
                .map_err(|e| AgentError::tool(format!("Failed to write file: {e}")))?;
        }

        Ok(ToolResult::data(json!({
            "path": self.workspace.display(&path),
            "bytes_written": params.content.len(),
            "appended": params.append,
        })))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File List Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Tool for listing a workspace directory.
#[derive(Debug, Clone)]
pub struct FileListTool {
    workspace: Workspace,
}

impl FileListTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileListTool {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the files and directories in a workspace directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_schema("Directory relative to the workspace (default: the workspace root)")
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let raw = params.optional_str("path").unwrap_or(".");
        let dir = self.workspace.resolve(raw).await?;
        if !dir.is_dir() {
            return Err(AgentError::invalid_params(format!("'{raw}' is not a directory")));
        }

        let mut reader = fs::read_dir(&dir)
            .await
            .map_err(|e| AgentError::tool(format!("Failed to list directory: {e}")))?;
        let mut entries = Vec::new();
        let mut truncated = false;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| AgentError::tool(format!("Failed to list directory: {e}")))?
        {
            if entries.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break;
            }
            let metadata = entry.metadata().await.ok();
            let kind = match &metadata {
                Some(m) if m.is_dir() => "dir",
                Some(m) if m.is_symlink() => "symlink",
                _ => "file",
            };
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": kind,
                "size": metadata.map(|m| m.len()).unwrap_or(0),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(ToolResult::data(json!({
            "path": self.workspace.display(&dir),
            "entries": entries,
            "truncated": truncated,
        })))
    }
}
