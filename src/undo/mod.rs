//! Undo journal — operation records, reverse application, durable audit log
//!
//! Every mutating action (file write/edit/delete, command execution) is
//! described by an [`Operation`] created by its handler immediately before
//! the mutation and moved to a terminal status afterwards. The journal owns
//! recorded operations: it keeps a bounded in-memory history for undo
//! (oldest entries evicted past the cap) and appends one JSON object per
//! operation to an unbounded durable log used only for audit/replay.
//!
//! Undo dispatches by kind: a write is undone by deleting the created file;
//! an edit or delete by restoring the pre-mutation backup carried in the
//! operation's parameters. A missing backup is a reported failure, not a
//! panic. Command operations are recorded but not reversible.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FemtoError, Result};

/// The kind of mutating action an operation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A file was created
    Write,
    /// An existing file was modified
    Edit,
    /// A file was deleted
    Delete,
    /// A shell command was executed
    Command,
}

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Executing,
    Succeeded,
    Failed,
}

/// A record of one mutating action, used for undo and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier
    pub id: String,
    /// What kind of mutation this is
    pub kind: OperationKind,
    /// Path or command string
    pub target: String,
    /// Kind-specific parameters (e.g. `backup_path` for edits/deletes)
    pub parameters: serde_json::Value,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: OperationStatus,
    /// True iff this operation was permitted to execute
    pub approved: bool,
    /// Set once the operation has been reversed
    #[serde(default)]
    pub undone: bool,
}

impl Operation {
    /// Create a new pending, unapproved operation.
    ///
    /// # Example
    /// ```
    /// use femtocode::undo::{Operation, OperationKind, OperationStatus};
    /// use serde_json::json;
    ///
    /// let op = Operation::new(OperationKind::Write, "/tmp/x.txt", json!({}));
    /// assert_eq!(op.status, OperationStatus::Pending);
    /// assert!(!op.approved);
    /// ```
    pub fn new(kind: OperationKind, target: &str, parameters: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target: target.to_string(),
            parameters,
            created_at: Utc::now(),
            status: OperationStatus::Pending,
            approved: false,
            undone: false,
        }
    }

    /// Mark the operation as currently executing.
    pub fn mark_executing(&mut self) {
        self.status = OperationStatus::Executing;
    }

    /// Mark the operation as succeeded.
    pub fn mark_succeeded(&mut self) {
        self.status = OperationStatus::Succeeded;
    }

    /// Mark the operation as failed.
    pub fn mark_failed(&mut self) {
        self.status = OperationStatus::Failed;
    }

    /// The backup path parameter, when present.
    fn backup_path(&self) -> Option<PathBuf> {
        self.parameters
            .get("backup_path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
    }
}

/// One line of the durable journal log.
#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    timestamp: DateTime<Utc>,
    r#type: OperationKind,
    path: String,
    status: OperationStatus,
    id: String,
}

/// The undo journal.
///
/// The in-memory history is guarded by a single mutex held only for the
/// mutation itself; file I/O (the durable log, undo restores) happens
/// outside the lock.
pub struct UndoJournal {
    history: Mutex<VecDeque<Operation>>,
    max_history: usize,
    /// Durable append-only log (audit only, never read for undo)
    journal_path: Option<PathBuf>,
}

impl UndoJournal {
    /// Create a journal with the given history cap and optional durable log.
    pub fn new(max_history: usize, journal_path: Option<PathBuf>) -> Self {
        Self {
            history: Mutex::new(VecDeque::new()),
            max_history,
            journal_path,
        }
    }

    /// Create an in-memory journal with the default cap, no durable log.
    pub fn in_memory() -> Self {
        Self::new(50, None)
    }

    /// Record an operation. The journal takes ownership; oldest entries are
    /// evicted past the cap. The durable log line is appended outside the
    /// history lock.
    pub fn record(&self, operation: Operation) {
        let line = JournalLine {
            timestamp: Utc::now(),
            r#type: operation.kind,
            path: operation.target.clone(),
            status: operation.status,
            id: operation.id.clone(),
        };

        {
            let mut history = self.history.lock().expect("undo history lock");
            history.push_back(operation);
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        self.append_line(&line);
    }

    /// Undo the most recent not-yet-undone operation.
    pub fn undo_last(&self) -> Result<Operation> {
        let candidate = {
            let history = self.history.lock().expect("undo history lock");
            history.iter().rev().find(|op| !op.undone).cloned()
        };
        let op = candidate.ok_or_else(|| FemtoError::Undo("Nothing to undo".into()))?;
        self.undo_by_id(&op.id)
    }

    /// Undo a specific operation by id.
    ///
    /// Refuses unapproved operations (they never executed) and operations
    /// that did not succeed.
    pub fn undo_by_id(&self, id: &str) -> Result<Operation> {
        let op = {
            let history = self.history.lock().expect("undo history lock");
            history
                .iter()
                .find(|op| op.id == id)
                .cloned()
                .ok_or_else(|| FemtoError::NotFound(format!("Operation '{}'", id)))?
        };

        if !op.approved {
            return Err(FemtoError::Undo(format!(
                "Operation '{}' was never approved; refusing to reverse it",
                id
            )));
        }
        if op.status != OperationStatus::Succeeded {
            return Err(FemtoError::Undo(format!(
                "Operation '{}' did not succeed; nothing to reverse",
                id
            )));
        }
        if op.undone {
            return Err(FemtoError::Undo(format!(
                "Operation '{}' is already undone",
                id
            )));
        }

        // Reverse-apply outside the lock
        self.apply_reverse(&op)?;

        {
            let mut history = self.history.lock().expect("undo history lock");
            if let Some(entry) = history.iter_mut().find(|o| o.id == id) {
                entry.undone = true;
            }
        }

        debug!(operation = %op.id, kind = ?op.kind, "Operation undone");
        Ok(op)
    }

    /// The most recent operations, newest first, up to `limit`.
    pub fn list(&self, limit: usize) -> Vec<Operation> {
        let history = self.history.lock().expect("undo history lock");
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Number of operations currently held in memory.
    pub fn len(&self) -> usize {
        self.history.lock().expect("undo history lock").len()
    }

    /// True when no operations are recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_reverse(&self, op: &Operation) -> Result<()> {
        match op.kind {
            OperationKind::Write => {
                // A write created the file; undo removes it
                std::fs::remove_file(&op.target).map_err(|e| {
                    FemtoError::Undo(format!("Failed to remove '{}': {}", op.target, e))
                })?;
                Ok(())
            }
            OperationKind::Edit | OperationKind::Delete => {
                let backup = op.backup_path().ok_or_else(|| {
                    FemtoError::Undo(format!(
                        "Operation '{}' carries no backup_path; cannot restore '{}'",
                        op.id, op.target
                    ))
                })?;
                if !backup.exists() {
                    return Err(FemtoError::Undo(format!(
                        "Backup '{}' is missing; cannot restore '{}'",
                        backup.display(),
                        op.target
                    )));
                }
                std::fs::copy(&backup, &op.target).map_err(|e| {
                    FemtoError::Undo(format!("Failed to restore '{}': {}", op.target, e))
                })?;
                Ok(())
            }
            OperationKind::Command => Err(FemtoError::Undo(format!(
                "Command operation '{}' is not reversible",
                op.id
            ))),
        }
    }

    fn append_line(&self, line: &JournalLine) {
        let Some(path) = &self.journal_path else {
            return;
        };
        let serialized = match serde_json::to_string(line) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to serialize journal line");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", serialized));
        if let Err(e) = result {
            // The durable log is best-effort audit; losing a line must not
            // fail the operation that was already applied.
            warn!(error = %e, path = %path.display(), "Failed to append journal line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn succeeded(mut op: Operation) -> Operation {
        op.approved = true;
        op.mark_succeeded();
        op
    }

    #[test]
    fn test_record_and_list() {
        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Command,
            "echo hi",
            json!({}),
        )));
        journal.record(succeeded(Operation::new(
            OperationKind::Write,
            "/tmp/a",
            json!({}),
        )));

        let listed = journal.list(10);
        assert_eq!(listed.len(), 2);
        // Newest first
        assert_eq!(listed[0].kind, OperationKind::Write);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let journal = UndoJournal::new(3, None);
        for i in 0..5 {
            journal.record(succeeded(Operation::new(
                OperationKind::Command,
                &format!("cmd{}", i),
                json!({}),
            )));
        }
        assert_eq!(journal.len(), 3);
        let listed = journal.list(10);
        assert_eq!(listed[2].target, "cmd2");
    }

    #[test]
    fn test_undo_write_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("created.txt");
        std::fs::write(&target, "new content").unwrap();

        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Write,
            target.to_str().unwrap(),
            json!({}),
        )));

        journal.undo_last().unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_undo_edit_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("file.txt");
        let backup = dir.path().join("file.txt.bak");
        std::fs::write(&backup, "original").unwrap();
        std::fs::write(&target, "mutated").unwrap();

        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Edit,
            target.to_str().unwrap(),
            json!({"backup_path": backup.to_str().unwrap()}),
        )));

        journal.undo_last().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn test_undo_missing_backup_reports_failure() {
        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Edit,
            "/tmp/whatever.txt",
            json!({"backup_path": "/nonexistent/backup"}),
        )));

        let err = journal.undo_last().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_undo_edit_without_backup_param() {
        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Edit,
            "/tmp/whatever.txt",
            json!({}),
        )));

        let err = journal.undo_last().unwrap_err();
        assert!(err.to_string().contains("backup_path"));
    }

    #[test]
    fn test_never_undo_unapproved() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("f.txt");
        std::fs::write(&target, "x").unwrap();

        let journal = UndoJournal::in_memory();
        let mut op = Operation::new(OperationKind::Write, target.to_str().unwrap(), json!({}));
        op.mark_succeeded(); // succeeded but approved stays false
        journal.record(op);

        assert!(journal.undo_last().is_err());
        // Side effect must not have happened
        assert!(target.exists());
    }

    #[test]
    fn test_command_not_reversible() {
        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Command,
            "echo hi",
            json!({}),
        )));
        let err = journal.undo_last().unwrap_err();
        assert!(err.to_string().contains("not reversible"));
    }

    #[test]
    fn test_undo_nothing() {
        let journal = UndoJournal::in_memory();
        assert!(journal.undo_last().is_err());
    }

    #[test]
    fn test_undo_last_skips_already_undone() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, "1").unwrap();
        std::fs::write(&second, "2").unwrap();

        let journal = UndoJournal::in_memory();
        journal.record(succeeded(Operation::new(
            OperationKind::Write,
            first.to_str().unwrap(),
            json!({}),
        )));
        journal.record(succeeded(Operation::new(
            OperationKind::Write,
            second.to_str().unwrap(),
            json!({}),
        )));

        journal.undo_last().unwrap();
        assert!(!second.exists());
        journal.undo_last().unwrap();
        assert!(!first.exists());
        assert!(journal.undo_last().is_err());
    }

    #[test]
    fn test_durable_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("journal.jsonl");
        let journal = UndoJournal::new(50, Some(log.clone()));

        journal.record(succeeded(Operation::new(
            OperationKind::Write,
            "/tmp/a",
            json!({}),
        )));
        journal.record(succeeded(Operation::new(
            OperationKind::Command,
            "ls",
            json!({}),
        )));

        let content = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["type"], "write");
        assert_eq!(parsed["path"], "/tmp/a");
        assert!(parsed["id"].is_string());
        assert!(parsed["timestamp"].is_string());
    }
}
