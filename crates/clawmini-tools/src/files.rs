//! File tools rooted at the project directory.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use clawmini_protocol::{CoreError, ToolDefinition};
use serde_json::{Value, json};
use tokio::fs;
use tracing::{debug, instrument};

use crate::{Tool, required_str};

fn escape(relative: &str) -> anyhow::Error {
    anyhow!(CoreError::ToolDenied(format!(
        "path escapes project root: {relative}"
    )))
}

/// Resolve `relative` under `root`, refusing anything that lands outside it.
///
/// A leading `/` is read as the project root. `..` is refused outright;
/// symlinks are caught by canonicalizing the deepest existing ancestor.
pub fn rooted_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let normalized = Path::new(relative.trim_start_matches('/'));
    if normalized
        .components()
        .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir))
    {
        return Err(escape(relative));
    }

    let candidate = root.join(normalized);
    let mut ancestor = candidate.clone();
    while ancestor != root && !ancestor.exists() {
        if !ancestor.pop() {
            break;
        }
    }
    if ancestor.exists() {
        let base = root
            .canonicalize()
            .with_context(|| format!("failed canonicalizing root {root:?}"))?;
        let resolved = ancestor
            .canonicalize()
            .with_context(|| format!("failed canonicalizing {ancestor:?}"))?;
        if !resolved.starts_with(&base) {
            return Err(escape(relative));
        }
    }
    Ok(candidate)
}

#[instrument(skip(root), fields(root = %root.display()))]
pub async fn read_rooted(root: &Path, relative: &str) -> Result<String> {
    let absolute = rooted_path(root, relative)?;
    if !fs::try_exists(&absolute).await.unwrap_or(false) {
        return Err(anyhow!(CoreError::NotFound(format!("file {relative}"))));
    }
    fs::read_to_string(&absolute)
        .await
        .with_context(|| format!("failed reading file {absolute:?}"))
}

#[instrument(skip(root, content), fields(root = %root.display(), bytes = content.len()))]
pub async fn write_rooted(root: &Path, relative: &str, content: &str) -> Result<()> {
    let absolute = rooted_path(root, relative)?;
    if let Some(parent) = absolute.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed creating directory {parent:?}"))?;
    }
    fs::write(&absolute, content)
        .await
        .with_context(|| format!("failed writing file {absolute:?}"))?;
    debug!("file written");
    Ok(())
}

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_owned(),
            description: "Read a UTF-8 text file, path relative to the project root".to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to read" }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn call(&self, input: &Value) -> Result<String> {
        let path = required_str(input, "file_path", "read_file")?;
        read_rooted(&self.root, path).await
    }
}

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_owned(),
            description: "Write text to a file, path relative to the project root".to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Path of the file to write" },
                    "text": { "type": "string", "description": "Full new content" }
                },
                "required": ["file_path", "text"]
            }),
        }
    }

    async fn call(&self, input: &Value) -> Result<String> {
        let path = required_str(input, "file_path", "write_file")?;
        let text = required_str(input, "text", "write_file")?;
        write_rooted(&self.root, path, text).await?;
        Ok(format!("File written successfully to {path}."))
    }
}
