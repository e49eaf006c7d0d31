//! Filesystem tools for Femtocode
//!
//! Reading, writing, listing, and editing files. All paths are resolved
//! against the workspace in the tool context and validated to stay inside
//! it. Mutating tools take a pre-mutation backup, describe themselves as an
//! `Operation`, and record it in the undo journal once the mutation
//! succeeds — that is what makes `undo` work.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::error::{FemtoError, Result};
use crate::security::validate_path_in_workspace;
use crate::undo::{Operation, OperationKind};

use super::{Tool, ToolContext, ToolOutcome};

/// Resolve and validate a path relative to the workspace.
fn resolve_path(path: &str, ctx: &ToolContext) -> Result<PathBuf> {
    validate_path_in_workspace(path, &ctx.workspace.to_string_lossy())
}

/// Copy `target` to a fresh backup file next to the undo journal's backup
/// area and return the backup path.
fn take_backup(target: &Path) -> Result<PathBuf> {
    let backup_dir = std::env::temp_dir().join("femtocode-backups");
    std::fs::create_dir_all(&backup_dir)?;
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let backup = backup_dir.join(format!(
        "{}.{}.bak",
        file_name,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    ));
    std::fs::copy(target, &backup)?;
    Ok(backup)
}

/// Tool for reading file contents.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the specified path"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'path' argument".into()))?;

        let full_path = resolve_path(path, ctx)?;
        let content = tokio::fs::read_to_string(&full_path).await.map_err(|e| {
            FemtoError::Tool(format!("Failed to read '{}': {}", full_path.display(), e))
        })?;
        Ok(ToolOutcome::llm_only(content))
    }
}

/// Tool for writing content to a file.
///
/// Creates the file (recording a `Write` operation) or overwrites an
/// existing one (recording an `Edit` operation with a backup so the change
/// can be undone).
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if necessary"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'path' argument".into()))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'content' argument".into()))?;

        let full_path = resolve_path(path, ctx)?;

        let (kind, parameters) = if full_path.exists() {
            let backup = take_backup(&full_path)?;
            (
                OperationKind::Edit,
                json!({"backup_path": backup.to_string_lossy()}),
            )
        } else {
            (OperationKind::Write, json!({}))
        };

        let mut operation = Operation::new(kind, &full_path.to_string_lossy(), parameters);
        operation.approved = true;
        operation.mark_executing();

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::write(&full_path, content).await {
            Ok(()) => {
                operation.mark_succeeded();
                ctx.undo.record(operation);
                Ok(ToolOutcome::user_visible(format!(
                    "Wrote {} bytes to {}",
                    content.len(),
                    full_path.display()
                )))
            }
            Err(e) => {
                operation.mark_failed();
                ctx.undo.record(operation);
                Err(FemtoError::Tool(format!(
                    "Failed to write '{}': {}",
                    full_path.display(),
                    e
                )))
            }
        }
    }
}

/// Tool for editing a file by exact text replacement.
///
/// Records an `Edit` operation with a pre-mutation backup.
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing an exact text snippet with new text"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to replace (must occur in the file)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'path' argument".into()))?;
        let old_text = args
            .get("old_text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'old_text' argument".into()))?;
        let new_text = args
            .get("new_text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'new_text' argument".into()))?;

        let full_path = resolve_path(path, ctx)?;
        let content = tokio::fs::read_to_string(&full_path).await.map_err(|e| {
            FemtoError::Tool(format!("Failed to read '{}': {}", full_path.display(), e))
        })?;

        if !content.contains(old_text) {
            return Ok(ToolOutcome::error(format!(
                "Text not found in {}: {}",
                full_path.display(),
                old_text
            )));
        }

        let backup = take_backup(&full_path)?;
        let mut operation = Operation::new(
            OperationKind::Edit,
            &full_path.to_string_lossy(),
            json!({"backup_path": backup.to_string_lossy()}),
        );
        operation.approved = true;
        operation.mark_executing();

        let updated = content.replacen(old_text, new_text, 1);
        match tokio::fs::write(&full_path, updated).await {
            Ok(()) => {
                operation.mark_succeeded();
                ctx.undo.record(operation);
                Ok(ToolOutcome::user_visible(format!(
                    "Edited {}",
                    full_path.display()
                )))
            }
            Err(e) => {
                operation.mark_failed();
                ctx.undo.record(operation);
                Err(FemtoError::Tool(format!(
                    "Failed to write '{}': {}",
                    full_path.display(),
                    e
                )))
            }
        }
    }
}

/// Tool for listing directory contents.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (defaults to the workspace root)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let full_path = resolve_path(path, ctx)?;

        let mut reader = tokio::fs::read_dir(&full_path).await.map_err(|e| {
            FemtoError::Tool(format!("Failed to list '{}': {}", full_path.display(), e))
        })?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let suffix = match entry.file_type().await {
                Ok(ft) if ft.is_dir() => "/",
                _ => "",
            };
            entries.push(format!("{}{}", name, suffix));
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(ToolOutcome::llm_only("(empty directory)"));
        }
        Ok(ToolOutcome::llm_only(entries.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx_in(dir: &Path) -> ToolContext {
        ToolContext::new(dir.to_path_buf())
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "hello").unwrap();

        let out = ReadFileTool
            .execute(json!({"path": "x.txt"}), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.for_llm, "hello");
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReadFileTool
            .execute(json!({"path": "missing.txt"}), &ctx_in(dir.path()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_records_write_operation() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());

        let out = WriteFileTool
            .execute(json!({"path": "new.txt", "content": "data"}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "data"
        );

        let ops = ctx.undo.list(10);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Write);
        assert!(ops[0].approved);
    }

    #[tokio::test]
    async fn test_overwrite_records_edit_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "original").unwrap();
        let ctx = ctx_in(dir.path());

        WriteFileTool
            .execute(json!({"path": "x.txt", "content": "replaced"}), &ctx)
            .await
            .unwrap();

        let ops = ctx.undo.list(10);
        assert_eq!(ops[0].kind, OperationKind::Edit);
        let backup = ops[0].parameters["backup_path"].as_str().unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "original");

        // Undo restores the original bytes
        ctx.undo.undo_last().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("x.txt")).unwrap(),
            "original"
        );
    }

    #[tokio::test]
    async fn test_undo_write_deletes_created_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());

        WriteFileTool
            .execute(json!({"path": "fresh.txt", "content": "x"}), &ctx)
            .await
            .unwrap();
        assert!(dir.path().join("fresh.txt").exists());

        ctx.undo.undo_last().unwrap();
        assert!(!dir.path().join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn test_edit_replaces_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("code.rs"), "fn old() {}").unwrap();
        let ctx = ctx_in(dir.path());

        let out = EditFileTool
            .execute(
                json!({"path": "code.rs", "old_text": "old", "new_text": "new"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("code.rs")).unwrap(),
            "fn new() {}"
        );
    }

    #[tokio::test]
    async fn test_edit_text_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("code.rs"), "fn main() {}").unwrap();
        let ctx = ctx_in(dir.path());

        let out = EditFileTool
            .execute(
                json!({"path": "code.rs", "old_text": "nope", "new_text": "x"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.is_error);
        // Nothing recorded for a failed match
        assert!(ctx.undo.is_empty());
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let out = ListFilesTool
            .execute(json!({}), &ctx_in(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.for_llm, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ReadFileTool
            .execute(json!({"path": "../../etc/passwd"}), &ctx_in(dir.path()))
            .await;
        assert!(matches!(result, Err(FemtoError::SecurityViolation(_))));
    }

    #[tokio::test]
    async fn test_write_missing_args() {
        let dir = tempfile::tempdir().unwrap();
        let result = WriteFileTool
            .execute(json!({"path": "x.txt"}), &ctx_in(dir.path()))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_tool_metadata() {
        assert_eq!(ReadFileTool.name(), "read_file");
        assert_eq!(WriteFileTool.name(), "write_file");
        assert_eq!(EditFileTool.name(), "edit_file");
        assert_eq!(ListFilesTool.name(), "list_files");
        assert_eq!(
            WriteFileTool.parameters()["required"],
            json!(["path", "content"])
        );
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip_via_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        WriteFileTool
            .execute(json!({"path": "sub/dir/file.txt", "content": "nested"}), &ctx)
            .await
            .unwrap();
        let out = ReadFileTool
            .execute(json!({"path": "sub/dir/file.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.for_llm, "nested");
    }
}
