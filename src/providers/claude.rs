//! Claude (Anthropic) LLM provider implementation
//!
//! This module implements the `LLMProvider` trait for Claude/Anthropic's API,
//! handling message conversion, tool calls, and response parsing.
//!
//! # Example
//!
//! ```rust,ignore
//! use femtocode::providers::{claude::ClaudeProvider, ChatOptions, LLMProvider};
//! use femtocode::session::Message;
//!
//! async fn example() {
//!     let provider = ClaudeProvider::new("your-api-key");
//!
//!     let messages = vec![
//!         Message::system("You are a coding agent."),
//!         Message::user("List the files in src/"),
//!     ];
//!
//!     let response = provider
//!         .chat(messages, vec![], None, ChatOptions::default())
//!         .await
//!         .unwrap();
//!
//!     println!("Claude: {}", response.content);
//! }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{FemtoError, Result};
use crate::session::{Message, Role};

use super::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// The Claude API endpoint URL.
const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// The default Claude model to use.
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude/Anthropic LLM provider.
pub struct ClaudeProvider {
    /// API key for authentication
    api_key: String,
    /// API base URL (overridable for proxies/tests)
    base_url: String,
    /// HTTP client for making requests
    client: Client,
}

impl ClaudeProvider {
    /// Create a new Claude provider with the given API key.
    ///
    /// # Example
    /// ```
    /// use femtocode::providers::claude::ClaudeProvider;
    /// use femtocode::providers::LLMProvider;
    ///
    /// let provider = ClaudeProvider::new("sk-ant-api03-xxx");
    /// assert_eq!(provider.name(), "claude");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: CLAUDE_API_URL.to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Override the API base URL (useful for proxies and tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

#[async_trait]
impl LLMProvider for ClaudeProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL);

        // Convert messages to Claude format, extracting the system prompt
        let (system, claude_messages) = convert_messages(messages);

        let request = ClaudeRequest {
            model: model.to_string(),
            // Claude's token cap parameter is `max_tokens`
            max_tokens: options.max_tokens.unwrap_or(8192),
            messages: claude_messages,
            system,
            tools: if tools.is_empty() {
                None
            } else {
                Some(convert_tools(tools))
            },
            tool_choice: options
                .tool_choice
                .as_deref()
                .map(|t| serde_json::json!({ "type": t })),
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();

            let detail = if let Ok(err) = serde_json::from_str::<ClaudeErrorResponse>(&error_text) {
                format!("{} - {}", err.error.r#type, err.error.message)
            } else {
                error_text
            };

            return Err(FemtoError::Provider(format!(
                "Claude API error (HTTP {}): {}",
                status, detail
            )));
        }

        let claude_response: ClaudeResponse = response.json().await?;
        Ok(convert_response(claude_response))
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "claude"
    }
}

// ============================================================================
// Claude API Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ClaudeTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ClaudeMessage {
    /// "user" or "assistant"
    role: String,
    content: Vec<ClaudeContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ClaudeTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// ============================================================================
// Claude API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeResponseBlock>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Thinking or other block types we don't consume
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorResponse {
    error: ClaudeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorDetail {
    r#type: String,
    message: String,
}

// ============================================================================
// Conversion helpers
// ============================================================================

/// Convert internal messages to Claude's block format, pulling system
/// messages out into the dedicated `system` field.
fn convert_messages(messages: Vec<Message>) -> (Option<String>, Vec<ClaudeMessage>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut out: Vec<ClaudeMessage> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content),
            Role::User => out.push(ClaudeMessage {
                role: "user".to_string(),
                content: vec![ClaudeContentBlock::Text { text: msg.content }],
            }),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !msg.content.is_empty() {
                    blocks.push(ClaudeContentBlock::Text {
                        text: msg.content.clone(),
                    });
                }
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        let input = serde_json::from_str(&call.arguments)
                            .unwrap_or(serde_json::Value::Object(Default::default()));
                        blocks.push(ClaudeContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input,
                        });
                    }
                }
                if blocks.is_empty() {
                    blocks.push(ClaudeContentBlock::Text {
                        text: String::new(),
                    });
                }
                out.push(ClaudeMessage {
                    role: "assistant".to_string(),
                    content: blocks,
                });
            }
            // Claude expects tool results as user-role tool_result blocks
            Role::Tool => out.push(ClaudeMessage {
                role: "user".to_string(),
                content: vec![ClaudeContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.unwrap_or_default(),
                    content: msg.content,
                }],
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, out)
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<ClaudeTool> {
    tools
        .into_iter()
        .map(|t| ClaudeTool {
            name: t.name,
            description: t.description,
            input_schema: t.parameters,
        })
        .collect()
}

fn convert_response(response: ClaudeResponse) -> LLMResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ClaudeResponseBlock::Text { text } => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&text);
            }
            ClaudeResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(LLMToolCall::new(&id, &name, &input.to_string()));
            }
            ClaudeResponseBlock::Other => {}
        }
    }

    let mut result = LLMResponse::with_tools(&content, tool_calls);
    if let Some(usage) = response.usage {
        result = result.with_usage(Usage::new(usage.input_tokens, usage.output_tokens));
    }
    result
}
