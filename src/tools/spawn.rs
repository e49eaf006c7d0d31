//! Subagent spawner
//!
//! Spawns an isolated nested agent with no access to the parent's
//! conversation history — the entire task must be self-contained in the
//! prompt. Foreground spawns block the caller and fold the subagent's
//! closing summary into the tool result; background spawns return a task id
//! immediately and `agent_output` polls (or blocks, bounded by a timeout)
//! for completion.
//!
//! Nested tool calls made by the subagent are reported to the UI tagged
//! with nesting depth and parent call id, and are collected onto the
//! originating `ToolCall` for audit. Recursion is depth-bounded: a
//! misbehaving model cannot spawn subagents forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::agent::{AgentLoop, ContextBuilder, RunOutcome};
use crate::config::Config;
use crate::error::{FemtoError, Result};
use crate::providers::LLMProvider;
use crate::ui::{NestedUi, UiCallback};

use super::{CompletionStatus, Tool, ToolContext, ToolOutcome, ToolRegistry};

/// Built-in subagent types: (name, description, system prompt).
const SUBAGENT_TYPES: &[(&str, &str, &str)] = &[
    (
        "general-purpose",
        "Handles arbitrary self-contained coding tasks",
        "You are a focused coding subagent. Complete the task you are given \
         end-to-end using your tools, then call task_complete with a concise \
         summary of what you did and found. You have no access to the parent \
         conversation; everything you need is in the task.",
    ),
    (
        "code-explorer",
        "Reads and maps unfamiliar code, answers questions about it",
        "You are a read-focused exploration subagent. Investigate the \
         codebase with read_file, list_files and background task output, \
         answer the question you were given, and call task_complete with \
         your findings. Avoid modifying anything.",
    ),
    (
        "reviewer",
        "Reviews a change or file set and reports issues",
        "You are a code review subagent. Read the code you are pointed at, \
         identify defects and risky patterns, and call task_complete with a \
         prioritized list of findings.",
    ),
];

/// A background subagent's completion slot.
struct SubagentSlot {
    agent_type: String,
    result: Mutex<Option<RunOutcome>>,
    done: Notify,
}

/// Shared between `spawn_agent` and `agent_output`.
#[derive(Default)]
pub struct SubagentTracker {
    slots: Mutex<HashMap<String, Arc<SubagentSlot>>>,
}

impl SubagentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, task_id: &str, slot: Arc<SubagentSlot>) {
        self.slots
            .lock()
            .expect("tracker lock")
            .insert(task_id.to_string(), slot);
    }

    fn get(&self, task_id: &str) -> Option<Arc<SubagentSlot>> {
        self.slots.lock().expect("tracker lock").get(task_id).cloned()
    }
}

/// Tool to spawn a nested agent.
pub struct SpawnAgentTool {
    config: Config,
    provider: Arc<dyn LLMProvider>,
    registry: Mutex<Option<Weak<ToolRegistry>>>,
    tracker: Arc<SubagentTracker>,
}

impl SpawnAgentTool {
    /// Create an unwired spawner; call [`SpawnAgentTool::set_registry`] once
    /// the dispatcher is behind an `Arc`.
    pub fn new(
        config: Config,
        provider: Arc<dyn LLMProvider>,
        tracker: Arc<SubagentTracker>,
    ) -> Self {
        Self {
            config,
            provider,
            registry: Mutex::new(None),
            tracker,
        }
    }

    /// Wire the dispatcher the subagent re-enters.
    pub fn set_registry(&self, registry: Weak<ToolRegistry>) {
        *self.registry.lock().expect("spawn registry lock") = Some(registry);
    }

    fn registry(&self) -> Result<Arc<ToolRegistry>> {
        self.registry
            .lock()
            .expect("spawn registry lock")
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| FemtoError::Tool("Subagent spawner is not wired to a registry".into()))
    }

    fn build_child(
        &self,
        registry: Arc<ToolRegistry>,
        system_prompt: &str,
        ctx: &ToolContext,
        ui: Arc<dyn UiCallback>,
    ) -> AgentLoop {
        let child_ctx = ctx.for_subagent(ui);
        let builder = ContextBuilder::new()
            .with_system_prompt(system_prompt)
            .with_workspace(&ctx.workspace.to_string_lossy());
        AgentLoop::new(self.config.clone(), Arc::clone(&self.provider), registry, child_ctx)
            .with_context_builder(builder)
    }
}

/// Fold a subagent result into a parent-visible string.
fn format_agent_result(agent_type: &str, outcome: &RunOutcome) -> String {
    if outcome.final_text.is_empty() {
        format!("[{}] Task completed (no output)", agent_type)
    } else {
        format!("[{}] {}", agent_type, outcome.final_text)
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn an ephemeral subagent to handle a self-contained task with isolated \
         context. Include all context in the prompt - the subagent cannot see this \
         conversation. Set run_in_background=true for long tasks and collect the \
         result later with agent_output."
    }

    fn parameters(&self) -> Value {
        let types: Vec<&str> = SUBAGENT_TYPES.iter().map(|(name, _, _)| *name).collect();
        let descriptions: Vec<String> = SUBAGENT_TYPES
            .iter()
            .map(|(name, desc, _)| format!("{}: {}", name, desc))
            .collect();
        json!({
            "type": "object",
            "properties": {
                "description": {
                    "type": "string",
                    "description": "A short (3-5 word) description of the task"
                },
                "prompt": {
                    "type": "string",
                    "description": "The complete, self-contained task for the subagent"
                },
                "agent_type": {
                    "type": "string",
                    "enum": types,
                    "description": descriptions.join("; ")
                },
                "run_in_background": {
                    "type": "boolean",
                    "default": false,
                    "description": "Return a task_id immediately; poll with agent_output"
                }
            },
            "required": ["description", "prompt", "agent_type"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| FemtoError::Tool("Missing 'prompt' argument".into()))?;
        let agent_type = args
            .get("agent_type")
            .and_then(|v| v.as_str())
            .unwrap_or("general-purpose");
        let background = args
            .get("run_in_background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let Some((_, _, system_prompt)) = SUBAGENT_TYPES
            .iter()
            .find(|(name, _, _)| *name == agent_type)
        else {
            let available: Vec<&str> = SUBAGENT_TYPES.iter().map(|(n, _, _)| *n).collect();
            return Ok(ToolOutcome::error(format!(
                "Unknown agent type '{}'. Available: {}",
                agent_type,
                available.join(", ")
            )));
        };

        if ctx.depth >= self.config.agent.max_subagent_depth {
            return Ok(ToolOutcome::error(format!(
                "Maximum subagent nesting depth ({}) reached",
                self.config.agent.max_subagent_depth
            )));
        }

        let registry = self.registry()?;
        let parent_id = ctx.call_id.clone().unwrap_or_else(|| agent_type.to_string());

        if background {
            let task_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
            let slot = Arc::new(SubagentSlot {
                agent_type: agent_type.to_string(),
                result: Mutex::new(None),
                done: Notify::new(),
            });
            self.tracker.insert(&task_id, Arc::clone(&slot));

            // Nested output is suppressed for background spawns; the result
            // arrives through agent_output.
            let child = self.build_child(
                registry,
                system_prompt,
                ctx,
                Arc::new(crate::ui::NoopUi),
            );
            let prompt = prompt.to_string();
            let worker_id = task_id.clone();
            tokio::spawn(async move {
                let outcome = child.run(&prompt).await;
                info!(task_id = %worker_id, status = %outcome.completion_status, "Background subagent finished");
                *slot.result.lock().expect("slot lock") = Some(outcome);
                slot.done.notify_one();
            });

            info!(task_id = %task_id, agent_type, "Spawned background subagent");
            return Ok(ToolOutcome::llm_only(format!(
                "Spawned background subagent '{}' (task_id: {}). Use agent_output to \
                 collect its result.",
                agent_type, task_id
            )));
        }

        // Foreground: block the caller, report nested activity, fold the
        // summary back as the tool result.
        let nested_ui = Arc::new(NestedUi::new(
            Arc::clone(&ctx.ui),
            &parent_id,
            ctx.depth + 1,
        ));
        let child = self.build_child(
            registry,
            system_prompt,
            ctx,
            Arc::clone(&nested_ui) as Arc<dyn UiCallback>,
        );

        info!(agent_type, prompt_len = prompt.len(), "Running foreground subagent");
        let outcome = child.run(prompt).await;
        let nested_calls = nested_ui.take_recorded();

        match outcome.completion_status {
            CompletionStatus::Interrupted => Ok(ToolOutcome::interrupted()),
            CompletionStatus::Failed => {
                warn!(agent_type, "Subagent failed");
                Ok(
                    ToolOutcome::error(format!("[{}] Task failed: {}", agent_type, outcome.final_text))
                        .with_nested_calls(nested_calls),
                )
            }
            _ => Ok(
                ToolOutcome::llm_only(format_agent_result(agent_type, &outcome))
                    .with_nested_calls(nested_calls),
            ),
        }
    }
}

/// Tool to collect a background subagent's result.
pub struct AgentOutputTool {
    tracker: Arc<SubagentTracker>,
}

impl AgentOutputTool {
    pub fn new(tracker: Arc<SubagentTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for AgentOutputTool {
    fn name(&self) -> &str {
        "agent_output"
    }

    fn description(&self) -> &str {
        "Get the result of a background subagent. Blocks up to timeout_ms for \
         completion unless block=false."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task_id returned by spawn_agent"
                },
                "block": {
                    "type": "boolean",
                    "default": true,
                    "description": "Wait for completion instead of returning the current state"
                },
                "timeout_ms": {
                    "type": "integer",
                    "default": 30000,
                    "description": "Maximum time to wait when blocking"
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
        let block = args.get("block").and_then(|v| v.as_bool()).unwrap_or(true);
        let timeout_ms = args
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(30_000);

        let Some(slot) = self.tracker.get(task_id) else {
            return Ok(ToolOutcome::error(format!(
                "No background subagent with task_id '{}'",
                task_id
            )));
        };

        let finished = slot.result.lock().expect("slot lock").is_some();
        if !finished && block {
            // notify_one stores a permit, so a completion that lands between
            // the check above and this await is not lost
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(timeout_ms),
                slot.done.notified(),
            )
            .await;
        }

        let result = slot.result.lock().expect("slot lock");
        match &*result {
            Some(outcome) => {
                let folded = format_agent_result(&slot.agent_type, outcome);
                if outcome.completion_status == CompletionStatus::Failed {
                    Ok(ToolOutcome::error(folded))
                } else {
                    Ok(ToolOutcome::llm_only(folded))
                }
            }
            None => Ok(ToolOutcome::llm_only(format!(
                "Subagent '{}' is still running; try agent_output again later",
                task_id
            ))),
        }
    }
}
