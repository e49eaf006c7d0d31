//! Protocol bridge — externally-served tools under namespaced names
//!
//! Bridged tools are exposed to the model as `bridge__<server>__<remote-name>`.
//! The dispatcher splits on that delimiter and routes the call to the client
//! registered for `<server>` instead of the built-in handler map.
//!
//! Token-efficiency policy: undiscovered bridged tools are invisible to the
//! model. A tool enters the discovered set when `search_tools` matches it or
//! when the model invokes it directly (auto-discovery); only discovered
//! tools contribute schemas to subsequent LLM calls.
//!
//! The wire transport lives behind the [`BridgeClient`] trait — the runtime
//! ships the routing and discovery layer plus an in-process client used for
//! embedding and tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{FemtoError, Result};
use crate::providers::ToolDefinition;

/// Name prefix marking a bridged tool.
pub const BRIDGE_PREFIX: &str = "bridge__";

/// A client serving tools for one bridge server.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// The server name used in `bridge__<server>__...`.
    fn server_name(&self) -> &str;

    /// Definitions of the tools this server offers, under their remote
    /// (unprefixed) names.
    fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Invoke a remote tool by its remote name.
    async fn call(&self, remote_name: &str, args: Value) -> Result<String>;
}

/// Split a full bridged name into `(server, remote_name)`.
///
/// # Example
/// ```
/// use femtocode::bridge::parse_bridge_name;
///
/// let (server, remote) = parse_bridge_name("bridge__github__create_issue").unwrap();
/// assert_eq!(server, "github");
/// assert_eq!(remote, "create_issue");
/// ```
pub fn parse_bridge_name(name: &str) -> Result<(&str, &str)> {
    let rest = name
        .strip_prefix(BRIDGE_PREFIX)
        .ok_or_else(|| FemtoError::Bridge(format!("Not a bridged tool name: {}", name)))?;
    let (server, remote) = rest
        .split_once("__")
        .ok_or_else(|| FemtoError::Bridge(format!("Invalid bridged tool name: {}", name)))?;
    if server.is_empty() || remote.is_empty() {
        return Err(FemtoError::Bridge(format!(
            "Invalid bridged tool name: {}",
            name
        )));
    }
    Ok((server, remote))
}

/// Compose the full bridged name for a server's remote tool.
pub fn bridge_name(server: &str, remote_name: &str) -> String {
    format!("{}{}__{}", BRIDGE_PREFIX, server, remote_name)
}

/// Routing and discovery state for bridged tools.
///
/// Owned by the tool dispatcher instance — not a global — so concurrent
/// sessions keep independent discovered sets.
#[derive(Default)]
pub struct BridgeRegistry {
    clients: HashMap<String, Arc<dyn BridgeClient>>,
    discovered: Mutex<HashSet<String>>,
}

impl BridgeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its server name.
    pub fn add_client(&mut self, client: Arc<dyn BridgeClient>) {
        self.clients
            .insert(client.server_name().to_string(), client);
    }

    /// Number of connected servers.
    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    /// Mark a full bridged name as discovered so its schema becomes visible
    /// to subsequent LLM calls.
    pub fn discover(&self, full_name: &str) {
        if full_name.starts_with(BRIDGE_PREFIX) {
            let mut discovered = self.discovered.lock().expect("discovered lock");
            if discovered.insert(full_name.to_string()) {
                debug!(tool = full_name, "Discovered bridged tool");
            }
        }
    }

    /// Whether a full bridged name has been discovered.
    pub fn is_discovered(&self, full_name: &str) -> bool {
        self.discovered
            .lock()
            .expect("discovered lock")
            .contains(full_name)
    }

    /// Reset the discovered set (e.g. for a fresh conversation).
    pub fn clear_discovered(&self) {
        self.discovered.lock().expect("discovered lock").clear();
    }

    /// Schemas for discovered tools only, under their full bridged names.
    pub fn discovered_definitions(&self) -> Vec<ToolDefinition> {
        let discovered = self.discovered.lock().expect("discovered lock");
        let mut defs = Vec::new();
        for client in self.clients.values() {
            for tool in client.list_tools() {
                let full = bridge_name(client.server_name(), &tool.name);
                if discovered.contains(&full) {
                    defs.push(ToolDefinition::new(&full, &tool.description, tool.parameters));
                }
            }
        }
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Search all servers' tools by keyword (name or description,
    /// case-insensitive). Matches are marked discovered.
    pub fn search(&self, query: &str) -> Vec<ToolDefinition> {
        let needle = query.to_lowercase();
        let mut matches = Vec::new();
        for client in self.clients.values() {
            for tool in client.list_tools() {
                if tool.name.to_lowercase().contains(&needle)
                    || tool.description.to_lowercase().contains(&needle)
                {
                    let full = bridge_name(client.server_name(), &tool.name);
                    self.discover(&full);
                    matches.push(ToolDefinition::new(&full, &tool.description, tool.parameters));
                }
            }
        }
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches
    }

    /// Route a call to the owning client. Auto-discovers the tool so its
    /// schema is visible from the next LLM call on.
    pub async fn call(&self, full_name: &str, args: Value) -> Result<String> {
        let (server, remote) = parse_bridge_name(full_name)?;

        if !self.is_discovered(full_name) {
            self.discover(full_name);
            info!(
                tool = full_name,
                "Auto-discovered bridged tool on first use; search_tools finds tools up front"
            );
        }

        let client = self
            .clients
            .get(server)
            .ok_or_else(|| FemtoError::Bridge(format!("Unknown bridge server '{}'", server)))?;
        client.call(remote, args).await
    }
}

/// A bridge client holding its tools in-process.
///
/// The minimal [`BridgeClient`] implementation: embedders register closures
/// per tool; the test suite uses it to exercise routing and discovery
/// without a wire protocol.
pub struct InProcessBridge {
    server: String,
    #[allow(clippy::type_complexity)]
    tools: HashMap<String, (ToolDefinition, Box<dyn Fn(Value) -> Result<String> + Send + Sync>)>,
}

impl InProcessBridge {
    /// Create a client for `server`.
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its remote (unprefixed) name.
    pub fn tool<F>(mut self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value) -> Result<String> + Send + Sync + 'static,
    {
        self.tools
            .insert(definition.name.clone(), (definition, Box::new(handler)));
        self
    }
}

#[async_trait]
impl BridgeClient for InProcessBridge {
    fn server_name(&self) -> &str {
        &self.server
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|(def, _)| def.clone()).collect()
    }

    async fn call(&self, remote_name: &str, args: Value) -> Result<String> {
        let (_, handler) = self.tools.get(remote_name).ok_or_else(|| {
            FemtoError::Bridge(format!(
                "Server '{}' has no tool '{}'",
                self.server, remote_name
            ))
        })?;
        handler(args)
    }
}
