//! Tool types for Femtocode
//!
//! This module defines the core types for tool execution: the `Tool` trait
//! that all tools implement, the `ToolOutcome` result every handler returns,
//! the session `Mode`, and the `ToolContext` threaded by reference through
//! one dispatch.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::approval::ApprovalGate;
use crate::error::Result;
use crate::session::ToolCall;
use crate::ui::{NoopUi, UiCallback};
use crate::undo::UndoJournal;

/// Session execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Full tool access
    #[default]
    Normal,
    /// Read-only exploration: only allow-listed tools execute
    Plan,
}

/// Terminal status of an agent run or an explicit completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Partial,
    Failed,
    /// Cooperative interrupt — not conflated with failure
    Interrupted,
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl CompletionStatus {
    /// Parse the status argument of the `task_complete` tool.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An explicit completion signal carried out of a `task_complete` call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: CompletionStatus,
    pub summary: String,
}

/// Dual-audience tool result with side-channel flags.
///
/// `for_llm` is what feeds back into the conversation; `for_user` is what
/// the rendering layer shows (None = silent). The flags distinguish runtime
/// failure (`is_error`), safety rejection (`blocked` — the side effect never
/// happened), and cooperative interrupt (`interrupted` — not an error).
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Content fed back to the LLM as the tool result
    pub for_llm: String,
    /// Content shown to the user (None = silent)
    pub for_user: Option<String>,
    /// The handler ran and failed
    pub is_error: bool,
    /// Rejected before execution (plan mode, safety policy)
    pub blocked: bool,
    /// The run was interrupted while this call executed
    pub interrupted: bool,
    /// Set by the task-completion tool to short-circuit the agent loop
    pub completion: Option<Completion>,
    /// Subagent tool trace for attachment to the originating call
    pub nested_calls: Vec<ToolCall>,
}

impl ToolOutcome {
    /// LLM-only result. User sees nothing.
    pub fn llm_only(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            ..Default::default()
        }
    }

    /// Both LLM and user see the same content.
    pub fn user_visible(content: impl Into<String>) -> Self {
        let s = content.into();
        Self {
            for_llm: s.clone(),
            for_user: Some(s),
            ..Default::default()
        }
    }

    /// Runtime failure. The content is prefixed with `Error:` when fed back
    /// so the model can recognize and self-correct.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            is_error: true,
            ..Default::default()
        }
    }

    /// Safety rejection: reported, never executed. Distinguishable from a
    /// runtime failure via the `blocked` flag.
    pub fn blocked(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            is_error: true,
            blocked: true,
            ..Default::default()
        }
    }

    /// Cooperative interrupt surfaced as a result, not an error.
    pub fn interrupted() -> Self {
        Self {
            for_llm: "Interrupted".to_string(),
            interrupted: true,
            ..Default::default()
        }
    }

    /// Attach a subagent audit trace.
    pub fn with_nested_calls(mut self, nested: Vec<ToolCall>) -> Self {
        self.nested_calls = nested;
        self
    }
}

/// Trait that all tools must implement.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use femtocode::tools::{Tool, ToolContext, ToolOutcome};
/// use femtocode::error::Result;
///
/// struct PingTool;
///
/// #[async_trait]
/// impl Tool for PingTool {
///     fn name(&self) -> &str { "ping" }
///     fn description(&self) -> &str { "Replies with pong" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({ "type": "object", "properties": {}, "required": [] })
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
///         Ok(ToolOutcome::llm_only("pong"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool name the LLM uses to invoke it. Unique within a registry.
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool. Errors are converted to structured outcomes at the
    /// dispatch boundary; handlers may simply propagate with `?`.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

/// Ephemeral execution context passed by reference through one dispatch.
///
/// Shared state (gate, journal, interrupt flag) travels as `Arc`s so the
/// subagent spawner and batch executor can re-enter the dispatcher with a
/// derived context. Never persisted.
#[derive(Clone)]
pub struct ToolContext {
    /// Session mode (plan mode blocks mutating tools)
    pub mode: Mode,
    /// Human-approval gate
    pub approval: Arc<ApprovalGate>,
    /// Undo journal for mutating operations
    pub undo: Arc<UndoJournal>,
    /// Cooperative interrupt flag, checked at executor boundaries
    pub interrupt: Arc<AtomicBool>,
    /// Rendering callback
    pub ui: Arc<dyn UiCallback>,
    /// True inside a spawned subagent (approval auto-confirms)
    pub is_subagent: bool,
    /// Subagent nesting depth (0 = top-level agent)
    pub depth: u32,
    /// The id of the tool call currently being dispatched, when known.
    /// Used to attribute nested subagent activity to its parent call.
    pub call_id: Option<String>,
    /// Workspace directory for file and command tools
    pub workspace: PathBuf,
}

impl ToolContext {
    /// Create a context with fresh shared state and defaults.
    pub fn new(workspace: PathBuf) -> Self {
        Self {
            mode: Mode::Normal,
            approval: Arc::new(ApprovalGate::new(false)),
            undo: Arc::new(UndoJournal::in_memory()),
            interrupt: Arc::new(AtomicBool::new(false)),
            ui: Arc::new(NoopUi),
            is_subagent: false,
            depth: 0,
            call_id: None,
            workspace,
        }
    }

    /// Set the session mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Use a specific approval gate.
    pub fn with_approval(mut self, approval: Arc<ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    /// Use a specific undo journal.
    pub fn with_undo(mut self, undo: Arc<UndoJournal>) -> Self {
        self.undo = undo;
        self
    }

    /// Use a specific interrupt flag.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Use a specific UI callback.
    pub fn with_ui(mut self, ui: Arc<dyn UiCallback>) -> Self {
        self.ui = ui;
        self
    }

    /// Tag the context with the tool call id being dispatched.
    pub fn with_call_id(mut self, call_id: &str) -> Self {
        self.call_id = Some(call_id.to_string());
        self
    }

    /// Derive the context handed to a spawned subagent: one level deeper,
    /// flagged as subagent, sharing the interrupt flag and journal.
    pub fn for_subagent(&self, ui: Arc<dyn UiCallback>) -> Self {
        let mut ctx = self.clone();
        ctx.is_subagent = true;
        ctx.depth += 1;
        ctx.ui = ui;
        ctx
    }

    /// True when the cooperative interrupt flag is set.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}
