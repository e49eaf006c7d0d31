//! Task completion tool — explicit loop termination
//!
//! Instead of relying on implicit termination (no tool calls = done), the
//! agent is asked to call this tool to end the loop. It carries a required
//! summary and a status, and its outcome short-circuits the agent loop via
//! the `completion` field.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::Result;

use super::{Completion, CompletionStatus, Tool, ToolContext, ToolOutcome};

/// The explicit completion signal.
pub struct TaskCompleteTool;

#[async_trait]
impl Tool for TaskCompleteTool {
    fn name(&self) -> &str {
        "task_complete"
    }

    fn description(&self) -> &str {
        "Call this tool when you have completed the user's request. You MUST call \
         this tool to end the conversation. Provide a summary of what was accomplished."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Summary of what was accomplished"
                },
                "status": {
                    "type": "string",
                    "enum": ["success", "partial", "failed"],
                    "default": "success",
                    "description": "How the task ended"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let summary = args
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if summary.is_empty() {
            return Ok(ToolOutcome::error(
                "Summary is required for task_complete".to_string(),
            ));
        }

        let status_arg = args
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("success");
        let Some(status) = CompletionStatus::parse(status_arg) else {
            return Ok(ToolOutcome::error(format!(
                "Invalid status '{}'. Must be one of: success, partial, failed",
                status_arg
            )));
        };

        let mut outcome =
            ToolOutcome::llm_only(format!("Task completed ({}): {}", status, summary));
        outcome.completion = Some(Completion {
            status,
            summary: summary.to_string(),
        });
        Ok(outcome)
    }
}
