//! Context builder for agent conversations
//!
//! Constructs the system prompt and the full message list sent to the LLM
//! each iteration.

use crate::session::{Message, Role};

/// Default system prompt for the Femtocode agent.
const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Femtocode, an ultra-lightweight interactive coding agent.

You have access to tools to read, edit, and execute code in the user's
workspace. Use them to accomplish the task, then call task_complete with a
summary of what you did.

Be concise. Prefer small, verifiable steps."#;

/// Builds the message list for each LLM call.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    workspace: Option<String>,
}

impl ContextBuilder {
    /// Create a builder with the default system prompt.
    ///
    /// # Example
    /// ```
    /// use femtocode::agent::ContextBuilder;
    ///
    /// let builder = ContextBuilder::new();
    /// let messages = builder.build(vec![]);
    /// assert_eq!(messages.len(), 1); // system prompt only
    /// ```
    pub fn new() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            workspace: None,
        }
    }

    /// Replace the system prompt (used by subagent types).
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Append a workspace note to the system prompt.
    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.to_string());
        self
    }

    /// The system message, with runtime details appended.
    pub fn system_message(&self) -> Message {
        let mut prompt = self.system_prompt.clone();
        if let Some(ws) = &self.workspace {
            prompt.push_str(&format!("\n\nWorkspace: {}", ws));
        }
        Message::system(&prompt)
    }

    /// Prepend the system message to the conversation history.
    pub fn build(&self, history: Vec<Message>) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(self.system_message());
        messages.extend(history);
        messages
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
