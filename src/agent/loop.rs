//! Agent loop controller
//!
//! The top-level driver: sends conversation state to the LLM, interprets
//! the response (free text vs. tool calls), executes tools through the
//! dispatcher in the order the LLM requested them, appends a tool-result
//! message per call, and decides whether to continue, nudge, or terminate.
//!
//! Termination paths, in order of preference:
//! - the explicit `task_complete` call (status + required summary);
//! - implicit completion — no tool calls after a successful (or absent)
//!   tool result — kept as a fallback for models that stop calling tools
//!   without signaling (configurable via
//!   `agent.require_explicit_completion`);
//! - a bounded nudge ceiling after failures, after which the loop gives up;
//! - the cooperative interrupt flag, checked before each LLM call.
//!
//! Transport or non-200 provider failures terminate the turn immediately
//! with the error surfaced; this layer never retries.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::providers::{ChatOptions, LLMProvider};
use crate::session::{Message, Role, ToolCall};
use crate::tools::{CompletionStatus, ToolContext, ToolRegistry};

use super::ContextBuilder;

use std::sync::Arc;

/// Injected after a failed tool when the model stops calling tools.
const NUDGE_AFTER_FAILURE: &str = "The previous operation failed. Please fix the issue and try \
     again, or call task_complete with status='failed' if you cannot proceed.";

/// Injected in strict mode when the model goes silent without signaling.
const NUDGE_EXPLICIT_COMPLETION: &str = "If the task is finished, call task_complete with a \
     summary; otherwise continue with the next tool call.";

/// Injected after too many consecutive read-only iterations.
const NUDGE_SUMMARIZE: &str = "Based on what you've seen, please summarize your findings and \
     explain what needs to be done next.";

/// Tools that only observe; used for the consecutive-read nudge.
const READ_ONLY_TOOLS: &[&str] = &[
    "read_file",
    "list_files",
    "list_tasks",
    "task_output",
    "search_tools",
];

/// Read-only iterations tolerated before nudging toward a conclusion.
const MAX_CONSECUTIVE_READS: u32 = 5;

/// Result of one agent run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// True only for a `Success` completion
    pub success: bool,
    /// Final assistant text or completion summary
    pub final_text: String,
    /// How the run ended
    pub completion_status: CompletionStatus,
    /// The full conversation accumulated during the run
    pub transcript: Vec<Message>,
}

impl RunOutcome {
    fn finished(status: CompletionStatus, final_text: String, transcript: Vec<Message>) -> Self {
        Self {
            success: status == CompletionStatus::Success,
            final_text,
            completion_status: status,
            transcript,
        }
    }
}

/// The agent loop controller. Single-threaded per session: it never
/// executes two tool calls concurrently except via the batch tool, which is
/// an explicit opt-in parallel region.
pub struct AgentLoop {
    config: Config,
    provider: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    context_builder: ContextBuilder,
    ctx: ToolContext,
    /// Caller-imposed iteration cap (None = unbounded)
    max_iterations: Option<u32>,
}

impl AgentLoop {
    /// Create a loop controller.
    pub fn new(
        config: Config,
        provider: Arc<dyn LLMProvider>,
        registry: Arc<ToolRegistry>,
        ctx: ToolContext,
    ) -> Self {
        let context_builder =
            ContextBuilder::new().with_workspace(&ctx.workspace.to_string_lossy());
        Self {
            config,
            provider,
            registry,
            context_builder,
            ctx,
            max_iterations: None,
        }
    }

    /// Replace the context builder (subagent types carry their own prompts).
    pub fn with_context_builder(mut self, context_builder: ContextBuilder) -> Self {
        self.context_builder = context_builder;
        self
    }

    /// Cap the number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// The execution context this loop dispatches with.
    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    /// Run the loop on a fresh conversation.
    pub async fn run(&self, task: &str) -> RunOutcome {
        self.run_with_history(task, Vec::new()).await
    }

    /// Run the loop, seeding the conversation with prior history.
    pub async fn run_with_history(&self, task: &str, history: Vec<Message>) -> RunOutcome {
        let mut messages = history;
        messages.push(Message::user(task));

        let mut iteration: u32 = 0;
        let mut consecutive_no_tool_calls: u32 = 0;
        let mut consecutive_reads: u32 = 0;

        loop {
            iteration += 1;
            if let Some(cap) = self.max_iterations {
                if iteration > cap {
                    info!(iterations = iteration, "Iteration cap reached");
                    return RunOutcome::finished(
                        CompletionStatus::Partial,
                        format!("Reached the iteration cap of {} without completing", cap),
                        messages,
                    );
                }
            }

            // Cooperative interrupt, checked before each LLM call. The
            // transcript accumulated so far is preserved.
            if self.ctx.is_interrupted() {
                self.ctx.ui.on_interrupt();
                return RunOutcome::finished(
                    CompletionStatus::Interrupted,
                    "Interrupted".to_string(),
                    messages,
                );
            }

            let tools = self.registry.definitions(self.ctx.mode);
            debug!(
                iteration,
                messages = messages.len(),
                tools = tools.len(),
                "Calling LLM"
            );

            let options = ChatOptions::new()
                .with_max_tokens(self.config.agent.max_tokens)
                .with_temperature(self.config.agent.temperature);
            let model = if self.config.agent.model.is_empty() {
                None
            } else {
                Some(self.config.agent.model.as_str())
            };

            // Transport/HTTP failure surfaces immediately; no retry here.
            let response = match self
                .provider
                .chat(self.context_builder.build(messages.clone()), tools, model, options)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "LLM call failed");
                    return RunOutcome::finished(
                        CompletionStatus::Failed,
                        e.to_string(),
                        messages,
                    );
                }
            };

            let content = response.content.trim().to_string();

            if response.tool_calls.is_empty() {
                match self.handle_no_tool_calls(
                    &mut messages,
                    content,
                    &mut consecutive_no_tool_calls,
                ) {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            consecutive_no_tool_calls = 0;

            if !content.is_empty() {
                self.ctx.ui.on_assistant_message(&content);
            }

            let tool_calls: Vec<ToolCall> = response
                .tool_calls
                .iter()
                .map(|c| ToolCall::new(&c.id, &c.name, &c.arguments))
                .collect();
            messages.push(Message::assistant_with_tools(&content, tool_calls.clone()));

            // Preferred termination path: task_complete short-circuits
            // before any sibling call executes.
            if let Some(call) = tool_calls.iter().find(|c| c.name == "task_complete") {
                match self.try_complete(call, &tool_calls, &mut messages).await {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            // Execute sequentially, in the order the LLM returned the calls.
            let mut interrupted = false;
            for call in &tool_calls {
                self.ctx.ui.on_tool_call(&call.name, &call.arguments, &call.id);

                let args: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|e| {
                    warn!(tool = %call.name, error = %e, "Invalid JSON in tool arguments");
                    json!({"_parse_error": format!("Invalid arguments JSON: {}", e)})
                });

                let call_ctx = self.ctx.clone().with_call_id(&call.id);
                let outcome = self.registry.dispatch(&call.name, args, &call_ctx).await;
                // Dual audience: prefer the user-facing rendering when the
                // tool provided one
                let display = outcome.for_user.as_deref().unwrap_or(&outcome.for_llm);
                self.ctx
                    .ui
                    .on_tool_result(&call.name, display, !outcome.is_error, &call.id);

                // Attach a subagent's trace to the originating call for audit
                if !outcome.nested_calls.is_empty() {
                    attach_nested_calls(&mut messages, &call.id, outcome.nested_calls.clone());
                }

                let result_content = if outcome.is_error {
                    format!("Error: {}", outcome.for_llm)
                } else {
                    outcome.for_llm.clone()
                };
                messages.push(Message::tool_result(&call.id, &result_content));

                if outcome.interrupted {
                    interrupted = true;
                    break;
                }
            }

            if interrupted {
                self.ctx.ui.on_interrupt();
                return RunOutcome::finished(
                    CompletionStatus::Interrupted,
                    "Interrupted".to_string(),
                    messages,
                );
            }

            // Nudge an agent that keeps reading without concluding.
            let all_reads = tool_calls
                .iter()
                .all(|c| READ_ONLY_TOOLS.contains(&c.name.as_str()));
            consecutive_reads = if all_reads { consecutive_reads + 1 } else { 0 };
            if consecutive_reads >= MAX_CONSECUTIVE_READS {
                messages.push(Message::user(NUDGE_SUMMARIZE));
                consecutive_reads = 0;
            }
        }
    }

    /// No tool calls in the response: nudge after a failure (bounded),
    /// nudge toward explicit completion in strict mode, or accept implicit
    /// completion. Returns `Some` to terminate, `None` to continue looping.
    fn handle_no_tool_calls(
        &self,
        messages: &mut Vec<Message>,
        content: String,
        consecutive_no_tool_calls: &mut u32,
    ) -> Option<RunOutcome> {
        let last_tool_failed = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.is_error_result())
            .unwrap_or(false);

        if last_tool_failed {
            *consecutive_no_tool_calls += 1;
            if *consecutive_no_tool_calls >= self.config.agent.max_nudges {
                let text = if content.is_empty() {
                    "Warning: could not complete after multiple attempts.".to_string()
                } else {
                    content
                };
                self.ctx.ui.on_assistant_message(&text);
                messages.push(Message::assistant(&text));
                return Some(RunOutcome::finished(
                    CompletionStatus::Failed,
                    text,
                    messages.clone(),
                ));
            }
            if !content.is_empty() {
                self.ctx.ui.on_assistant_message(&content);
                messages.push(Message::assistant(&content));
            }
            messages.push(Message::user(NUDGE_AFTER_FAILURE));
            return None;
        }

        if self.config.agent.require_explicit_completion {
            *consecutive_no_tool_calls += 1;
            if *consecutive_no_tool_calls < self.config.agent.max_nudges {
                if !content.is_empty() {
                    self.ctx.ui.on_assistant_message(&content);
                    messages.push(Message::assistant(&content));
                }
                messages.push(Message::user(NUDGE_EXPLICIT_COMPLETION));
                return None;
            }
            // Ceiling reached: fall through and accept the text as implicit
            // completion rather than looping forever.
        }

        let text = if content.is_empty() {
            "Warning: model returned no reply.".to_string()
        } else {
            content
        };
        self.ctx.ui.on_assistant_message(&text);
        messages.push(Message::assistant(&text));
        Some(RunOutcome::finished(
            CompletionStatus::Success,
            text,
            messages.clone(),
        ))
    }

    /// Dispatch a `task_complete` call. On a valid completion the loop
    /// terminates with its status and summary; on a malformed call the
    /// error (plus skipped-sibling results) is fed back so the model can
    /// correct itself.
    async fn try_complete(
        &self,
        call: &ToolCall,
        siblings: &[ToolCall],
        messages: &mut Vec<Message>,
    ) -> Option<RunOutcome> {
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or(json!({}));
        let outcome = self.registry.dispatch("task_complete", args, &self.ctx).await;

        if let Some(completion) = outcome.completion {
            self.ctx.ui.on_assistant_message(&completion.summary);
            messages.push(Message::tool_result(&call.id, &outcome.for_llm));
            info!(status = %completion.status, "Task completed explicitly");
            return Some(RunOutcome::finished(
                completion.status,
                completion.summary,
                messages.clone(),
            ));
        }

        // Malformed completion: answer every call in the message so the
        // conversation stays well-formed, then let the model retry.
        messages.push(Message::tool_result(
            &call.id,
            &format!("Error: {}", outcome.for_llm),
        ));
        for sibling in siblings.iter().filter(|c| c.id != call.id) {
            messages.push(Message::tool_result(
                &sibling.id,
                "Error: skipped because task_complete in the same turn was invalid",
            ));
        }
        None
    }
}

/// Set `nested_calls` on the matching call of the most recent assistant
/// message.
fn attach_nested_calls(messages: &mut [Message], call_id: &str, nested: Vec<ToolCall>) {
    if let Some(assistant) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Assistant && m.tool_calls.is_some())
    {
        if let Some(calls) = assistant.tool_calls.as_mut() {
            if let Some(call) = calls.iter_mut().find(|c| c.id == call_id) {
                call.nested_calls = nested;
            }
        }
    }
}
