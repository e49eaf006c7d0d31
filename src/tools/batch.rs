//! Batch executor
//!
//! Runs N independent tool invocations either concurrently (bounded worker
//! pool) or strictly in order, re-entering the dispatcher for each one. The
//! result list always matches the input order and length regardless of
//! completion timing. One invocation's failure is captured as a failed
//! entry and never aborts its siblings — the batch outcome itself reflects
//! only that the batch mechanism ran.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{FemtoError, Result};

use super::{Tool, ToolContext, ToolOutcome, ToolRegistry};

/// Concurrency cap for parallel mode, regardless of invocation count.
const MAX_PARALLEL_WORKERS: usize = 5;

/// One entry of the order-preserving result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub tool: String,
    pub success: bool,
    pub output: String,
}

/// The batch tool.
///
/// Holds a weak reference back to the dispatcher it is registered in; the
/// reference is wired up after the registry is built (the registry owns the
/// tool, so a strong reference would cycle).
pub struct BatchTool {
    registry: Mutex<Option<Weak<ToolRegistry>>>,
    semaphore: Arc<Semaphore>,
}

impl BatchTool {
    /// Create an unwired batch tool; call [`BatchTool::set_registry`] once
    /// the owning registry is behind an `Arc`.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(None),
            semaphore: Arc::new(Semaphore::new(MAX_PARALLEL_WORKERS)),
        }
    }

    /// Wire the dispatcher this tool re-enters.
    pub fn set_registry(&self, registry: Weak<ToolRegistry>) {
        *self.registry.lock().expect("batch registry lock") = Some(registry);
    }

    fn registry(&self) -> Result<Arc<ToolRegistry>> {
        self.registry
            .lock()
            .expect("batch registry lock")
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| FemtoError::Tool("Batch tool is not wired to a registry".into()))
    }

    async fn run_one(&self, registry: &ToolRegistry, invocation: &Value, ctx: &ToolContext) -> BatchEntry {
        let tool = invocation
            .get("tool")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let input = invocation.get("input").cloned().unwrap_or(json!({}));

        if tool.is_empty() {
            return BatchEntry {
                tool,
                success: false,
                output: "Invocation is missing 'tool'".to_string(),
            };
        }

        let outcome = registry.dispatch(&tool, input, ctx).await;
        BatchEntry {
            tool,
            success: !outcome.is_error,
            output: outcome.for_llm,
        }
    }
}

impl Default for BatchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BatchTool {
    fn name(&self) -> &str {
        "batch_tool"
    }

    fn description(&self) -> &str {
        "Execute multiple tool calls in parallel or serial order. Results are \
         returned in input order."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "invocations": {
                    "type": "array",
                    "description": "Tool invocations to run",
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool": { "type": "string" },
                            "input": { "type": "object" }
                        },
                        "required": ["tool"]
                    }
                },
                "mode": {
                    "type": "string",
                    "enum": ["parallel", "serial"],
                    "default": "parallel"
                }
            },
            "required": ["invocations"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let invocations = args
            .get("invocations")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mode = args
            .get("mode")
            .and_then(|v| v.as_str())
            .unwrap_or("parallel");

        if invocations.is_empty() {
            return Ok(ToolOutcome::llm_only("[]"));
        }

        let registry = self.registry()?;
        debug!(count = invocations.len(), mode, "Running batch");

        // When several subagents run in parallel their nested output is
        // noisy; tell the UI so it can render them collectively.
        let spawn_count = invocations
            .iter()
            .filter(|inv| inv.get("tool").and_then(|v| v.as_str()) == Some("spawn_agent"))
            .count();
        let parallel_spawns = mode != "serial" && spawn_count > 1;
        if parallel_spawns {
            ctx.ui.on_parallel_agents_start(spawn_count);
        }

        let results: Vec<BatchEntry> = if mode == "serial" {
            let mut results = Vec::with_capacity(invocations.len());
            for invocation in &invocations {
                results.push(self.run_one(&registry, invocation, ctx).await);
            }
            results
        } else {
            // join_all preserves input order even though completion order
            // depends on the pool
            let futures = invocations.iter().enumerate().map(|(index, invocation)| {
                let semaphore = Arc::clone(&self.semaphore);
                let registry = Arc::clone(&registry);
                async move {
                    let _permit = semaphore.acquire().await.expect("batch semaphore");
                    let entry = self.run_one(&registry, invocation, ctx).await;
                    if parallel_spawns && entry.tool == "spawn_agent" {
                        ctx.ui.on_parallel_agent_complete(index, entry.success);
                    }
                    entry
                }
            });
            futures::future::join_all(futures).await
        };

        if parallel_spawns {
            ctx.ui.on_parallel_agents_done();
        }

        let rendered = serde_json::to_string_pretty(&results)?;
        Ok(ToolOutcome::llm_only(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    struct SleepEchoTool;

    #[async_trait]
    impl Tool for SleepEchoTool {
        fn name(&self) -> &str {
            "sleep_echo"
        }
        fn description(&self) -> &str {
            "Sleeps then echoes"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
            let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            let msg = args.get("message").and_then(|v| v.as_str()).unwrap_or("");
            Ok(ToolOutcome::llm_only(msg))
        }
    }

    struct ThrowingTool;

    #[async_trait]
    impl Tool for ThrowingTool {
        fn name(&self) -> &str {
            "throwing"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
            panic!("unexpected explosion");
        }
    }

    fn wired_registry() -> Arc<ToolRegistry> {
        let batch = Arc::new(BatchTool::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepEchoTool));
        registry.register(Arc::new(ThrowingTool));
        registry.register(Arc::clone(&batch) as Arc<dyn Tool>);
        let registry = Arc::new(registry);
        batch.set_registry(Arc::downgrade(&registry));
        registry
    }

    fn ctx() -> ToolContext {
        ToolContext::new(PathBuf::from("/tmp"))
    }

    fn parse(outcome: &ToolOutcome) -> Vec<BatchEntry> {
        serde_json::from_str(&outcome.for_llm).unwrap()
    }

    #[tokio::test]
    async fn test_parallel_preserves_input_order() {
        let registry = wired_registry();
        // First invocation sleeps longest; order must still match input
        let args = json!({
            "mode": "parallel",
            "invocations": [
                {"tool": "sleep_echo", "input": {"ms": 300, "message": "first"}},
                {"tool": "sleep_echo", "input": {"ms": 100, "message": "second"}},
                {"tool": "sleep_echo", "input": {"ms": 0, "message": "third"}}
            ]
        });
        let out = registry.dispatch("batch_tool", args, &ctx()).await;
        assert!(!out.is_error);

        let results = parse(&out);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].output, "first");
        assert_eq!(results[1].output, "second");
        assert_eq!(results[2].output, "third");
    }

    #[tokio::test]
    async fn test_failure_isolated_from_siblings() {
        let registry = wired_registry();
        let args = json!({
            "mode": "parallel",
            "invocations": [
                {"tool": "sleep_echo", "input": {"message": "a"}},
                {"tool": "throwing", "input": {}},
                {"tool": "sleep_echo", "input": {"message": "c"}}
            ]
        });
        let out = registry.dispatch("batch_tool", args, &ctx()).await;
        // The batch mechanism itself succeeded
        assert!(!out.is_error);

        let results = parse(&out);
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        assert_eq!(results[0].output, "a");
        assert_eq!(results[2].output, "c");
    }

    #[tokio::test]
    async fn test_serial_mode_runs_in_order() {
        let registry = wired_registry();
        let args = json!({
            "mode": "serial",
            "invocations": [
                {"tool": "sleep_echo", "input": {"message": "one"}},
                {"tool": "sleep_echo", "input": {"message": "two"}}
            ]
        });
        let out = registry.dispatch("batch_tool", args, &ctx()).await;
        let results = parse(&out);
        assert_eq!(results[0].output, "one");
        assert_eq!(results[1].output, "two");
    }

    #[tokio::test]
    async fn test_unknown_tool_entry_fails_in_place() {
        let registry = wired_registry();
        let args = json!({
            "invocations": [
                {"tool": "nope", "input": {}},
                {"tool": "sleep_echo", "input": {"message": "ok"}}
            ]
        });
        let out = registry.dispatch("batch_tool", args, &ctx()).await;
        let results = parse(&out);
        assert!(!results[0].success);
        assert!(results[0].output.contains("Unknown tool"));
        assert!(results[1].success);
    }

    #[tokio::test]
    async fn test_empty_invocations() {
        let registry = wired_registry();
        let out = registry
            .dispatch("batch_tool", json!({"invocations": []}), &ctx())
            .await;
        assert!(!out.is_error);
        assert_eq!(out.for_llm, "[]");
    }

    #[tokio::test]
    async fn test_large_batch_exceeding_pool() {
        let registry = wired_registry();
        let invocations: Vec<Value> = (0..20)
            .map(|i| json!({"tool": "sleep_echo", "input": {"ms": 20, "message": i.to_string()}}))
            .collect();
        let out = registry
            .dispatch("batch_tool", json!({"invocations": invocations}), &ctx())
            .await;
        let results = parse(&out);
        assert_eq!(results.len(), 20);
        for (i, entry) in results.iter().enumerate() {
            assert_eq!(entry.output, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_unwired_batch_reports_error() {
        let batch = BatchTool::new();
        let result = batch
            .execute(json!({"invocations": [{"tool": "x"}]}), &ctx())
            .await;
        assert!(result.is_err());
    }
}
