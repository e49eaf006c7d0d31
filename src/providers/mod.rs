//! Providers module - LLM providers (Claude, OpenAI)
//!
//! This module defines the `LLMProvider` trait and common types for
//! interacting with LLM APIs. Each provider implements the trait to give the
//! agent loop a consistent interface; the token cap parameter name varies by
//! model family (`max_tokens` for Claude, `max_completion_tokens` for
//! OpenAI) and is handled inside each implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use femtocode::providers::{LLMProvider, ChatOptions};
//! use femtocode::providers::claude::ClaudeProvider;
//! use femtocode::session::Message;
//!
//! async fn example() {
//!     let provider = ClaudeProvider::new("your-api-key");
//!     let messages = vec![Message::user("Hello!")];
//!     let options = ChatOptions::new().with_max_tokens(1000);
//!
//!     let response = provider.chat(messages, vec![], None, options).await.unwrap();
//!     println!("Response: {}", response.content);
//! }
//! ```

pub mod claude;
pub mod openai;
mod types;

pub use claude::ClaudeProvider;
pub use openai::OpenAiProvider;
pub use types::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition, Usage};

use std::sync::Arc;

use crate::config::Config;
use crate::error::{FemtoError, Result};

/// Build the configured provider from config.
///
/// Selection order: `providers.default` ("claude" or "openai"), otherwise
/// Claude. Errors when the chosen provider has no API key configured.
pub fn provider_from_config(config: &Config) -> Result<Arc<dyn LLMProvider>> {
    let choice = config.providers.default.as_deref().unwrap_or("claude");
    match choice {
        "claude" => {
            let cfg = &config.providers.claude;
            if cfg.api_key.is_empty() {
                return Err(FemtoError::Config(
                    "No Claude API key configured (set ANTHROPIC_API_KEY)".into(),
                ));
            }
            let mut provider = ClaudeProvider::new(&cfg.api_key);
            if let Some(url) = &cfg.base_url {
                provider = provider.with_base_url(url);
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let cfg = &config.providers.openai;
            if cfg.api_key.is_empty() {
                return Err(FemtoError::Config(
                    "No OpenAI API key configured (set OPENAI_API_KEY)".into(),
                ));
            }
            let mut provider = OpenAiProvider::new(&cfg.api_key);
            if let Some(url) = &cfg.base_url {
                provider = provider.with_base_url(url);
            }
            Ok(Arc::new(provider))
        }
        other => Err(FemtoError::Config(format!(
            "Unknown provider '{}'; expected 'claude' or 'openai'",
            other
        ))),
    }
}
