//! Background task tools
//!
//! Thin tools over the [`Supervisor`]: list running tasks, read a task's
//! captured output, and kill a task by id.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FemtoError, Result};
use crate::supervisor::Supervisor;

use super::{Tool, ToolContext, ToolOutcome};

/// List tasks known to the supervisor.
pub struct ListTasksTool {
    supervisor: Arc<Supervisor>,
}

impl ListTasksTool {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List background tasks and their statuses"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "all": {
                    "type": "boolean",
                    "description": "Include finished tasks (default: running only)",
                    "default": false
                }
            }
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let all = args.get("all").and_then(|v| v.as_bool()).unwrap_or(false);
        let tasks = if all {
            self.supervisor.list_all()
        } else {
            self.supervisor.list_running()
        };

        if tasks.is_empty() {
            return Ok(ToolOutcome::llm_only(if all {
                "No background tasks"
            } else {
                "No background tasks running"
            }));
        }

        let mut lines = vec!["Background tasks:".to_string()];
        for task in tasks {
            let mut line = format!(
                "  [{}] pid {}: {} ({})",
                task.task_id, task.pid, task.command, task.status
            );
            if let Some(code) = task.exit_code {
                line.push_str(&format!(" [exit code: {}]", code));
            }
            lines.push(line);
        }
        Ok(ToolOutcome::llm_only(lines.join("\n")))
    }
}

/// Read a task's captured output.
pub struct TaskOutputTool {
    supervisor: Arc<Supervisor>,
}

impl TaskOutputTool {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for TaskOutputTool {
    fn name(&self) -> &str {
        "task_output"
    }

    fn description(&self) -> &str {
        "Read the captured output of a background task"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task id returned when the task started"
                },
                "tail": {
                    "type": "integer",
                    "description": "Only the last N lines (default 100, 0 = all)",
                    "default": 100
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let task_id = args
            .get("task_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'task_id' argument".into()))?;
        let tail = args.get("tail").and_then(|v| v.as_u64()).unwrap_or(100) as usize;

        let task = self
            .supervisor
            .get(task_id)
            .ok_or_else(|| FemtoError::NotFound(format!("Task '{}'", task_id)))?;
        let output = self.supervisor.read_output(task_id, tail)?;

        let mut lines = vec![
            format!("Task {}: {}", task.task_id, task.command),
            format!("Status: {}", task.status),
        ];
        if let Some(code) = task.exit_code {
            lines.push(format!("Exit code: {}", code));
        }
        if output.is_empty() {
            lines.push("(no output captured yet)".to_string());
        } else {
            lines.push(String::new());
            lines.push(output);
        }
        Ok(ToolOutcome::llm_only(lines.join("\n")))
    }
}

/// Kill a background task.
pub struct KillTaskTool {
    supervisor: Arc<Supervisor>,
}

impl KillTaskTool {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl Tool for KillTaskTool {
    fn name(&self) -> &str {
        "kill_task"
    }

    fn description(&self) -> &str {
        "Send a signal to a background task (SIGTERM by default, force-killed after a grace period)"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task id to kill"
                },
                "signal": {
                    "type": "integer",
                    "description": "Signal number (default 15/SIGTERM)",
                    "default": 15
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let task_id = args
            .get("task_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'task_id' argument".into()))?;
        let signal = args.get("signal").and_then(|v| v.as_i64()).unwrap_or(15) as i32;

        self.supervisor.kill(task_id, signal)?;
        let status = self
            .supervisor
            .get(task_id)
            .map(|t| t.status.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ToolOutcome::user_visible(format!(
            "Task {} terminated (status: {})",
            task_id, status
        )))
    }
}
