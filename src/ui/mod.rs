//! UI callback boundary
//!
//! The core never renders anything. It reports progress through an
//! [`UiCallback`] trait object: ordered `on_tool_call` / `on_tool_result`
//! pairs per call id, nested variants tagged with depth and parent for
//! subagent activity, command output streaming, background task status
//! changes, and interrupt notification. How these are displayed (or whether
//! they are displayed at all) is the caller's business.

use std::sync::{Arc, Mutex};

use crate::session::ToolCall;
use crate::supervisor::TaskStatus;

/// Callback interface for rendering agent activity.
///
/// All methods have no-op defaults so implementers only override what they
/// render. The core guarantees that `on_tool_call` and `on_tool_result` are
/// invoked in pairs per call id, in the order the LLM requested the calls.
pub trait UiCallback: Send + Sync {
    /// Assistant free-text output.
    fn on_assistant_message(&self, _content: &str) {}

    /// A tool call is about to execute.
    fn on_tool_call(&self, _name: &str, _args: &str, _call_id: &str) {}

    /// A tool call finished; `summary` is the result fed back to the model.
    fn on_tool_result(&self, _name: &str, _summary: &str, _success: bool, _call_id: &str) {}

    /// A nested (subagent) tool call, tagged with nesting depth and the
    /// parent call id so it can be rendered distinctly from top-level calls.
    fn on_nested_tool_call(&self, _depth: u32, _parent_id: &str, _name: &str, _call_id: &str) {}

    /// A nested (subagent) tool result.
    fn on_nested_tool_result(
        &self,
        _depth: u32,
        _parent_id: &str,
        _name: &str,
        _success: bool,
        _call_id: &str,
    ) {
    }

    /// A line of live command output (`is_stderr` distinguishes streams).
    fn on_command_output(&self, _line: &str, _is_stderr: bool) {}

    /// A background task changed status.
    fn on_task_status(&self, _task_id: &str, _status: TaskStatus) {}

    /// Several subagents started running in parallel; nested output may be
    /// suppressed until they complete.
    fn on_parallel_agents_start(&self, _count: usize) {}

    /// One of the parallel subagents finished.
    fn on_parallel_agent_complete(&self, _index: usize, _success: bool) {}

    /// All parallel subagents finished.
    fn on_parallel_agents_done(&self) {}

    /// The run was interrupted cooperatively.
    fn on_interrupt(&self) {}
}

/// A callback that renders nothing. Useful default for tests and subagents
/// whose parents suppress nested output.
pub struct NoopUi;

impl UiCallback for NoopUi {}

/// Wraps a parent callback, re-tagging top-level notifications as nested
/// ones and recording the calls for attachment to the originating
/// `ToolCall`'s audit trace.
pub struct NestedUi {
    parent: Arc<dyn UiCallback>,
    parent_id: String,
    depth: u32,
    recorded: Mutex<Vec<ToolCall>>,
}

impl NestedUi {
    /// Create a nested wrapper one level below `parent`.
    pub fn new(parent: Arc<dyn UiCallback>, parent_id: &str, depth: u32) -> Self {
        Self {
            parent,
            parent_id: parent_id.to_string(),
            depth,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Take the recorded nested calls, clearing the buffer.
    pub fn take_recorded(&self) -> Vec<ToolCall> {
        std::mem::take(&mut self.recorded.lock().expect("nested ui lock"))
    }
}

impl UiCallback for NestedUi {
    fn on_assistant_message(&self, _content: &str) {
        // Subagent chatter is folded into its final summary, not streamed.
    }

    fn on_tool_call(&self, name: &str, args: &str, call_id: &str) {
        self.recorded
            .lock()
            .expect("nested ui lock")
            .push(ToolCall::new(call_id, name, args));
        self.parent
            .on_nested_tool_call(self.depth, &self.parent_id, name, call_id);
    }

    fn on_tool_result(&self, name: &str, _summary: &str, success: bool, call_id: &str) {
        self.parent
            .on_nested_tool_result(self.depth, &self.parent_id, name, success, call_id);
    }

    fn on_nested_tool_call(&self, depth: u32, parent_id: &str, name: &str, call_id: &str) {
        // Deeper levels pass through unchanged so depth stays accurate.
        self.parent
            .on_nested_tool_call(depth, parent_id, name, call_id);
    }

    fn on_nested_tool_result(
        &self,
        depth: u32,
        parent_id: &str,
        name: &str,
        success: bool,
        call_id: &str,
    ) {
        self.parent
            .on_nested_tool_result(depth, parent_id, name, success, call_id);
    }

    fn on_command_output(&self, line: &str, is_stderr: bool) {
        self.parent.on_command_output(line, is_stderr);
    }

    fn on_task_status(&self, task_id: &str, status: TaskStatus) {
        self.parent.on_task_status(task_id, status);
    }

    fn on_interrupt(&self) {
        self.parent.on_interrupt();
    }
}
