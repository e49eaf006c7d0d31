//! Tool dispatcher
//!
//! The single entry point for executing tool calls. Maintains the static
//! name→handler map, routes `bridge__`-prefixed names to the protocol
//! bridge, and enforces the plan-mode read-only allow-list as a hard gate
//! checked before any handler runs. Handler errors (and panics) are caught
//! here and converted to structured outcomes — nothing propagates past this
//! boundary.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::bridge::{BridgeRegistry, BRIDGE_PREFIX};
use crate::providers::ToolDefinition;

use super::{Mode, Tool, ToolContext, ToolOutcome};

/// Tools that remain executable in plan mode. Everything else is rejected
/// with a blocked outcome before its handler runs. Subagents are allowed
/// because they enforce their own restrictions; task completion is always
/// allowed so agents can signal.
const PLAN_ALLOWED_TOOLS: &[&str] = &[
    "read_file",
    "list_files",
    "list_tasks",
    "task_output",
    "search_tools",
    "spawn_agent",
    "agent_output",
    "task_complete",
];

/// The tool dispatcher.
///
/// Owns the handler map and the bridge routing/discovery state. Registries
/// are per-session instances, never globals, so sessions stay isolated.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    bridge: Arc<BridgeRegistry>,
}

impl ToolRegistry {
    /// Create an empty registry with no bridge servers.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            bridge: Arc::new(BridgeRegistry::new()),
        }
    }

    /// Create a registry routing bridged names to `bridge`.
    pub fn with_bridge(bridge: Arc<BridgeRegistry>) -> Self {
        Self {
            tools: HashMap::new(),
            bridge,
        }
    }

    /// Register a tool. A tool with the same name replaces the previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// The bridge routing state shared with discovery tools.
    pub fn bridge(&self) -> Arc<BridgeRegistry> {
        Arc::clone(&self.bridge)
    }

    /// Check if a built-in tool exists.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered built-in tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no built-in tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Names of all registered built-in tools.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Whether a tool name is executable in plan mode.
    pub fn plan_allows(name: &str) -> bool {
        PLAN_ALLOWED_TOOLS.contains(&name)
    }

    /// The active schema set for the LLM: built-ins (restricted to the
    /// allow-list in plan mode) plus discovered bridge tools only.
    pub fn definitions(&self, mode: Mode) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| mode != Mode::Plan || Self::plan_allows(t.name()))
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect();
        if mode != Mode::Plan {
            defs.extend(self.bridge.discovered_definitions());
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool call. Never returns an error and never panics past
    /// this boundary — every failure mode becomes a structured outcome.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        // Plan-mode hard gate, checked before any handler runs. Bridged
        // tools can mutate remote state, so they are gated too.
        if ctx.mode == Mode::Plan && !Self::plan_allows(name) {
            log_audit_event(AuditCategory::PlanMode, AuditSeverity::Warning, name);
            return ToolOutcome::blocked(format!(
                "Plan-only mode blocks '{}'. Switch to normal mode to execute.",
                name
            ));
        }

        if name.starts_with(BRIDGE_PREFIX) {
            return match self.bridge.call(name, args).await {
                Ok(output) => ToolOutcome::llm_only(output),
                Err(e) => {
                    log_audit_event(AuditCategory::Bridge, AuditSeverity::Warning, name);
                    ToolOutcome::error(e.to_string())
                }
            };
        }

        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::error(format!("Unknown tool: {}", name));
        };

        let fut = tool.execute(args, ctx);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) if e.is_interrupt() => ToolOutcome::interrupted(),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Tool execution failed");
                ToolOutcome::error(e.to_string())
            }
            Err(_) => {
                error!(tool = name, "Tool handler panicked");
                ToolOutcome::error(format!("Tool '{}' failed unexpectedly", name))
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
