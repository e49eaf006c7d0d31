//! Femtocode - Ultra-lightweight interactive coding agent
//!
//! The runtime drives an LLM through a tool-calling loop to read, edit, and
//! execute code on the local machine, optionally delegating sub-tasks to
//! nested agents. The crate is organized around the agent execution engine:
//!
//! - [`agent`] — the loop controller driving LLM turns and tool dispatch
//! - [`tools`] — the dispatcher, execution context, and built-in tools
//! - [`exec`] — single-command execution with activity-based timeouts
//! - [`supervisor`] — background processes with PTY-streamed output
//! - [`approval`] — the human-approval gate
//! - [`undo`] — the operation journal and reverse application
//! - [`bridge`] — protocol-bridged external tools
//! - [`providers`] — LLM provider implementations

pub mod agent;
pub mod approval;
pub mod audit;
pub mod bridge;
pub mod config;
pub mod error;
pub mod exec;
pub mod providers;
pub mod security;
pub mod session;
pub mod supervisor;
pub mod tools;
pub mod ui;
pub mod undo;
pub mod utils;

pub use agent::{AgentLoop, ContextBuilder, RunOutcome};
pub use config::Config;
pub use error::{FemtoError, Result};
pub use providers::{
    ChatOptions, ClaudeProvider, LLMProvider, LLMResponse, LLMToolCall, OpenAiProvider,
    ToolDefinition, Usage,
};
pub use session::{Message, Role, Session, SessionManager, ToolCall};
