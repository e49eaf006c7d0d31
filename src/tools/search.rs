//! Bridge tool discovery
//!
//! The `search_tools` tool lets the model find protocol-bridged tools by
//! keyword without every bridged schema occupying context up front. Matches
//! are marked discovered, which makes their schemas visible to subsequent
//! LLM calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bridge::BridgeRegistry;
use crate::error::{FemtoError, Result};

use super::{Tool, ToolContext, ToolOutcome};

/// Keyword search over connected bridge servers.
pub struct SearchToolsTool {
    bridge: Arc<BridgeRegistry>,
}

impl SearchToolsTool {
    pub fn new(bridge: Arc<BridgeRegistry>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl Tool for SearchToolsTool {
    fn name(&self) -> &str {
        "search_tools"
    }

    fn description(&self) -> &str {
        "Search externally-bridged tools by keyword. Matching tools become \
         available for direct invocation."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keyword to match against tool names and descriptions"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutcome> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FemtoError::Tool("Missing 'query' argument".into()))?;

        if self.bridge.server_count() == 0 {
            return Ok(ToolOutcome::llm_only("No bridge servers are connected"));
        }

        let matches = self.bridge.search(query);
        if matches.is_empty() {
            return Ok(ToolOutcome::llm_only(format!(
                "No bridged tools match '{}'",
                query
            )));
        }

        let mut lines = vec![format!("Found {} tool(s):", matches.len())];
        for tool in matches {
            lines.push(format!("  {} — {}", tool.name, tool.description));
        }
        lines.push("These tools can now be invoked directly.".to_string());
        Ok(ToolOutcome::llm_only(lines.join("\n")))
    }
}
