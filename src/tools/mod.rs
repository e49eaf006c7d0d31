//! Tools module - tool definitions and dispatch for LLM function calling
//!
//! This module provides the infrastructure for defining and executing the
//! tools the agent loop drives: the `Tool` trait, the dual-audience
//! `ToolOutcome`, the per-dispatch `ToolContext`, and the `ToolRegistry`
//! dispatcher that routes names to handlers (including protocol-bridged
//! names) under mode and approval constraints.
//!
//! # Built-in tools
//!
//! - `read_file` / `write_file` / `edit_file` / `list_files` — workspace
//!   file operations; mutations are recorded in the undo journal
//! - `run_command` — approval-gated command execution with activity-based
//!   timeouts and background promotion
//! - `list_tasks` / `task_output` / `kill_task` — background task control
//! - `batch_tool` — bounded parallel or serial multi-tool execution
//! - `spawn_agent` / `agent_output` — nested subagents
//! - `search_tools` — protocol-bridge tool discovery
//! - `task_complete` — explicit loop termination
//!
//! # Example
//!
//! ```rust
//! use femtocode::tools::{ToolRegistry, ToolContext, Mode};
//! use std::path::PathBuf;
//!
//! # tokio_test::block_on(async {
//! let registry = ToolRegistry::new();
//! let ctx = ToolContext::new(PathBuf::from("/tmp"));
//!
//! // Unknown tools come back as structured errors, not panics
//! let outcome = registry.dispatch("nope", serde_json::json!({}), &ctx).await;
//! assert!(outcome.is_error);
//! assert!(registry.definitions(Mode::Normal).is_empty());
//! # });
//! ```

pub mod batch;
pub mod filesystem;
pub mod process;
mod registry;
pub mod search;
pub mod shell;
pub mod spawn;
pub mod task_complete;
mod types;

pub use batch::BatchTool;
pub use filesystem::{EditFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use process::{KillTaskTool, ListTasksTool, TaskOutputTool};
pub use registry::ToolRegistry;
pub use search::SearchToolsTool;
pub use shell::RunCommandTool;
pub use spawn::{AgentOutputTool, SpawnAgentTool, SubagentTracker};
pub use task_complete::TaskCompleteTool;
pub use types::{Completion, CompletionStatus, Mode, Tool, ToolContext, ToolOutcome};

use std::sync::Arc;

use crate::bridge::BridgeRegistry;
use crate::config::Config;
use crate::exec::CommandExecutor;
use crate::providers::LLMProvider;
use crate::supervisor::Supervisor;

/// Build the full built-in tool set, wired and ready for the agent loop.
///
/// The batch and spawn tools re-enter the dispatcher, so they receive weak
/// references back to it once the registry is behind an `Arc`.
pub fn standard_registry(
    config: &Config,
    provider: Arc<dyn LLMProvider>,
    supervisor: Arc<Supervisor>,
    executor: Arc<CommandExecutor>,
    bridge: Arc<BridgeRegistry>,
) -> Arc<ToolRegistry> {
    let tracker = Arc::new(SubagentTracker::new());
    let batch = Arc::new(BatchTool::new());
    let spawn = Arc::new(SpawnAgentTool::new(
        config.clone(),
        provider,
        Arc::clone(&tracker),
    ));

    let mut registry = ToolRegistry::with_bridge(Arc::clone(&bridge));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(EditFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(RunCommandTool::new(executor)));
    registry.register(Arc::new(ListTasksTool::new(Arc::clone(&supervisor))));
    registry.register(Arc::new(TaskOutputTool::new(Arc::clone(&supervisor))));
    registry.register(Arc::new(KillTaskTool::new(supervisor)));
    registry.register(Arc::new(SearchToolsTool::new(bridge)));
    registry.register(Arc::new(TaskCompleteTool));
    registry.register(Arc::clone(&batch) as Arc<dyn Tool>);
    registry.register(Arc::clone(&spawn) as Arc<dyn Tool>);
    registry.register(Arc::new(AgentOutputTool::new(tracker)));

    let registry = Arc::new(registry);
    batch.set_registry(Arc::downgrade(&registry));
    spawn.set_registry(Arc::downgrade(&registry));
    registry
}
