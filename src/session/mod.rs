//! Session module - Session and conversation state management
//!
//! Provides in-memory session storage with async access. Femtocode is a
//! per-invocation CLI tool, so sessions live for the process lifetime;
//! the undo journal's durable log is the only state persisted across runs.
//!
//! # Example
//!
//! ```
//! use femtocode::session::{SessionManager, Message};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = SessionManager::new();
//!
//!     let mut session = manager.get_or_create("cli:default").await;
//!     session.add_message(Message::user("Hello!"));
//!     manager.save(&session).await;
//! }
//! ```

pub mod types;

pub use types::{Message, Role, Session, ToolCall};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory session store.
///
/// Uses `Arc<RwLock>` internally, making it safe to clone and share across
/// async tasks.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionManager {
    /// Create a new empty session manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an existing session or create a fresh one under `key`.
    pub async fn get_or_create(&self, key: &str) -> Session {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key))
            .clone()
    }

    /// Get a session by key, if it exists.
    pub async fn get(&self, key: &str) -> Option<Session> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Store the session back, replacing any previous copy.
    pub async fn save(&self, session: &Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.key.clone(), session.clone());
    }

    /// Delete a session. Returns true if one existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.sessions.write().await.remove(key).is_some()
    }

    /// Number of stored sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// True when no sessions are stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
