//! Agent module - the agent loop controller and conversation context
//!
//! The [`AgentLoop`] drives the tool-calling conversation: it sends state to
//! the LLM provider, executes tool calls through the dispatcher, appends
//! results, and decides whether to continue, nudge, or terminate. The
//! [`ContextBuilder`] assembles the system prompt and message list for each
//! call.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  AgentLoop  │────>│ LLMProvider │     │ ToolRegistry │
//! │  (driver)   │<────│  (Claude)   │     │ (dispatcher) │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        │ tool calls                            ▲
//!        └───────────────────────────────────────┘
//!            approval gate · undo journal · supervisor
//! ```

mod context;
mod r#loop;

pub use context::ContextBuilder;
pub use r#loop::{AgentLoop, RunOutcome};
