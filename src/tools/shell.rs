//! Shell tool for Femtocode
//!
//! Runs a command through the [`CommandExecutor`] after clearing the
//! human-approval gate. Subagents auto-confirm (their parents already got
//! approval for the delegation); everyone else suspends on the gate unless
//! a remember-key covers the command prefix. The execution is described as
//! a `Command` operation and recorded in the undo journal for audit.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{FemtoError, Result};
use crate::exec::CommandExecutor;
use crate::undo::{Operation, OperationKind};

use super::{Tool, ToolContext, ToolOutcome};

/// Tool for executing shell commands.
pub struct RunCommandTool {
    executor: Arc<CommandExecutor>,
}

impl RunCommandTool {
    /// Create the tool around a shared executor.
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Long-running servers are \
         moved to the background automatically; set background=true to force it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "background": {
                    "type": "boolean",
                    "description": "Run detached under the task supervisor",
                    "default": false
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'command' argument".into()))?;
        let background = args
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let working_dir = ctx.workspace.clone();
        let mut operation = Operation::new(
            OperationKind::Command,
            command,
            json!({"command": command, "background": background}),
        );

        // Interrupted before the prompt would even render: bail quietly.
        if ctx.is_interrupted() {
            return Ok(ToolOutcome::interrupted());
        }

        let approved = if ctx.is_subagent {
            // The parent's delegation already cleared the gate
            true
        } else {
            ctx.approval
                .request(command, &working_dir.to_string_lossy())
                .await?
                .approved
        };

        if !approved {
            ctx.undo.record(operation);
            let mut outcome = ToolOutcome::interrupted();
            outcome.for_llm = "Command declined by user".to_string();
            return Ok(outcome);
        }
        operation.approved = true;
        operation.mark_executing();

        let ui = Arc::clone(&ctx.ui);
        let stream = move |line: &str, is_stderr: bool| ui.on_command_output(line, is_stderr);

        let result = self
            .executor
            .execute(command, &working_dir, background, &ctx.interrupt, Some(&stream))
            .await;

        if result.success {
            operation.mark_succeeded();
        } else {
            operation.mark_failed();
        }
        ctx.undo.record(operation);

        if result.interrupted {
            return Ok(ToolOutcome::interrupted());
        }

        if result.success {
            let mut output = result.combined_output();
            if output.is_empty() {
                output = "Command executed".to_string();
            }
            let mut outcome = ToolOutcome::llm_only(output);
            if result.background_task.is_some() {
                outcome.for_user = Some(outcome.for_llm.clone());
            }
            Ok(outcome)
        } else {
            let mut parts = Vec::new();
            if let Some(error) = &result.error {
                parts.push(error.clone());
            }
            let combined = result.combined_output();
            if !combined.is_empty() {
                parts.push(combined);
            }
            Ok(ToolOutcome::error(parts.join("\n")))
        }
    }
}
