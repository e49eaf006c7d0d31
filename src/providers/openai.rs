//! OpenAI provider implementation
//!
//! This module implements the `LLMProvider` trait for OpenAI's Chat
//! Completions API, handling message conversion, tool calls, and response
//! parsing. Note the token cap parameter: OpenAI's current API takes
//! `max_completion_tokens` where Claude takes `max_tokens`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{FemtoError, Result};
use crate::session::{Message, Role};

use super::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

/// The OpenAI chat completions endpoint URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The default OpenAI model to use.
const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI LLM provider.
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new OpenAI provider with the given API key.
    ///
    /// # Example
    /// ```
    /// use femtocode::providers::openai::OpenAiProvider;
    /// use femtocode::providers::LLMProvider;
    ///
    /// let provider = OpenAiProvider::new("sk-xxx");
    /// assert_eq!(provider.name(), "openai");
    /// ```
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: OPENAI_API_URL.to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Override the API base URL (useful for compatible gateways and tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        model: Option<&str>,
        options: ChatOptions,
    ) -> Result<LLMResponse> {
        let model = model.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL);

        let request = OpenAiRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            tools: if tools.is_empty() {
                None
            } else {
                Some(convert_tools(tools))
            },
            tool_choice: options.tool_choice.clone(),
            // OpenAI's token cap parameter is `max_completion_tokens`
            max_completion_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(FemtoError::Provider(format!(
                "OpenAI API error (HTTP {}): {}",
                status, error_text
            )));
        }

        let api_response: OpenAiResponse = response.json().await?;
        convert_response(api_response)
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// OpenAI API Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    /// "system", "user", "assistant", or "tool"
    role: String,
    /// Message content (null for assistant messages that only carry tool calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON-encoded arguments
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunctionDef,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// ============================================================================
// OpenAI API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn convert_messages(messages: Vec<Message>) -> Vec<OpenAiMessage> {
    messages
        .into_iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_calls = msg.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|c| OpenAiToolCall {
                        id: c.id,
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: c.name,
                            arguments: c.arguments,
                        },
                    })
                    .collect()
            });
            OpenAiMessage {
                role: role.to_string(),
                content: Some(msg.content),
                tool_calls,
                tool_call_id: msg.tool_call_id,
            }
        })
        .collect()
}

fn convert_tools(tools: Vec<ToolDefinition>) -> Vec<OpenAiTool> {
    tools
        .into_iter()
        .map(|t| OpenAiTool {
            r#type: "function".to_string(),
            function: OpenAiFunctionDef {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        })
        .collect()
}

fn convert_response(response: OpenAiResponse) -> Result<LLMResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| FemtoError::Provider("OpenAI response contained no choices".into()))?;

    let content = choice.message.content.unwrap_or_default();
    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| LLMToolCall::new(&c.id, &c.function.name, &c.function.arguments))
        .collect();

    let mut result = LLMResponse::with_tools(&content, tool_calls);
    if let Some(usage) = response.usage {
        result = result.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
    }
    Ok(result)
}
