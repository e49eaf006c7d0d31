//! Session types for Femtocode
//!
//! This module defines the core types for conversation state, including
//! messages, roles, and tool calls. A `ToolCall` additionally carries the
//! nested calls made by a spawned subagent so the full tool trace survives
//! for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompts and instructions
    System,
    /// Messages from the human user (or loop-injected nudges)
    User,
    /// Messages from the LLM
    Assistant,
    /// Tool execution results
    Tool,
}

/// A tool call requested by the LLM.
///
/// Created when the LLM emits a call; immutable once the result has been
/// attached to the conversation. `nested_calls` is populated only when the
/// call spawned a subagent, capturing the subagent's own tool trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to execute
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
    /// Tool calls made by a spawned subagent, for audit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_calls: Vec<ToolCall>,
}

impl ToolCall {
    /// Create a new tool call with no nested trace.
    ///
    /// # Example
    /// ```
    /// use femtocode::session::ToolCall;
    ///
    /// let call = ToolCall::new("call_1", "read_file", r#"{"path":"src/main.rs"}"#);
    /// assert_eq!(call.name, "read_file");
    /// assert!(call.nested_calls.is_empty());
    /// ```
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            nested_calls: Vec::new(),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// The text content of the message
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (for tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new user message.
    ///
    /// # Example
    /// ```
    /// use femtocode::session::{Message, Role};
    ///
    /// let msg = Message::user("Fix the failing test");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message that carries tool calls.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a tool-result message responding to the given call id.
    ///
    /// # Example
    /// ```
    /// use femtocode::session::{Message, Role};
    ///
    /// let msg = Message::tool_result("call_1", "file contents here");
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    /// ```
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    /// True when this is a tool result whose content marks an error.
    ///
    /// Tool failures are fed back to the model as results prefixed with
    /// `Error:` so it can self-correct; the loop controller uses this to
    /// decide whether to nudge.
    pub fn is_error_result(&self) -> bool {
        self.role == Role::Tool && self.content.starts_with("Error:")
    }
}

/// A conversation session containing messages and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    pub key: String,
    /// Ordered list of messages in this conversation
    pub messages: Vec<Message>,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// When this session was last modified
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given key.
    ///
    /// # Example
    /// ```
    /// use femtocode::session::Session;
    ///
    /// let session = Session::new("cli:default");
    /// assert!(session.messages.is_empty());
    /// ```
    pub fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to this session, updating the `updated_at` timestamp.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Clear all messages from this session.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    /// Get the number of messages in this session.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Check if this session is empty (no messages).
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get the last message in this session, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Get the most recent tool-result message, if any.
    pub fn last_tool_result(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("hello").role, Role::Assistant);
        assert_eq!(Message::system("be brief").role, Role::System);
        let tr = Message::tool_result("call_1", "ok");
        assert_eq!(tr.role, Role::Tool);
        assert_eq!(tr.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_error_result_detection() {
        assert!(Message::tool_result("c1", "Error: boom").is_error_result());
        assert!(!Message::tool_result("c1", "fine").is_error_result());
        // Only tool messages count
        assert!(!Message::assistant("Error: boom").is_error_result());
    }

    #[test]
    fn test_tool_call_nested_audit_trace() {
        let mut call = ToolCall::new("call_1", "spawn_agent", "{}");
        call.nested_calls
            .push(ToolCall::new("nested_1", "read_file", r#"{"path":"x"}"#));
        assert_eq!(call.nested_calls.len(), 1);
        assert_eq!(call.nested_calls[0].name, "read_file");
    }

    #[test]
    fn test_tool_call_serde_skips_empty_nested() {
        let call = ToolCall::new("call_1", "echo", "{}");
        let json = serde_json::to_string(&call).unwrap();
        assert!(!json.contains("nested_calls"));

        let mut parent = ToolCall::new("call_2", "spawn_agent", "{}");
        parent.nested_calls.push(call);
        let json = serde_json::to_string(&parent).unwrap();
        assert!(json.contains("nested_calls"));
    }

    #[test]
    fn test_session_add_and_query() {
        let mut session = Session::new("test");
        assert!(session.is_empty());

        session.add_message(Message::user("hello"));
        session.add_message(Message::tool_result("c1", "result"));
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.last_message().unwrap().role, Role::Tool);
        assert_eq!(session.last_tool_result().unwrap().content, "result");
    }

    #[test]
    fn test_session_last_tool_result_skips_later_roles() {
        let mut session = Session::new("test");
        session.add_message(Message::tool_result("c1", "Error: bad"));
        session.add_message(Message::assistant("I'll fix it"));
        let last = session.last_tool_result().unwrap();
        assert!(last.is_error_result());
    }

    #[test]
    fn test_session_clear() {
        let mut session = Session::new("test");
        session.add_message(Message::user("hello"));
        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let back: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Role::Assistant);
    }
}
