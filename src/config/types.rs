//! Configuration type definitions for Femtocode
//!
//! This module defines all configuration structs used throughout the runtime.
//! All types implement serde traits for JSON serialization and have sensible
//! defaults; missing fields in the config file fall back via `#[serde(default)]`.

use serde::{Deserialize, Serialize};

/// Main configuration struct for Femtocode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent loop configuration (model, tokens, nudge ceiling)
    pub agent: AgentConfig,
    /// Command execution configuration (safety lists, timeouts)
    pub commands: CommandConfig,
    /// Approval gate configuration
    pub approval: ApprovalConfig,
    /// Undo journal configuration
    pub undo: UndoConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// LLM provider configurations (Claude, OpenAI)
    pub providers: ProvidersConfig,
}

/// Agent loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier passed to the provider (empty = provider default)
    pub model: String,
    /// Maximum tokens per completion
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Consecutive no-progress turns after a failed tool before the loop
    /// gives up
    pub max_nudges: u32,
    /// When true, the loop nudges toward an explicit `task_complete` call
    /// instead of accepting implicit completion (no tool calls following a
    /// successful result). Off by default.
    pub require_explicit_completion: bool,
    /// Maximum subagent nesting depth
    pub max_subagent_depth: u32,
    /// Workspace directory for file and command tools ("~" expands to home)
    pub workspace: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 8192,
            temperature: 0.7,
            max_nudges: 3,
            require_explicit_completion: false,
            max_subagent_depth: 3,
            workspace: ".".to_string(),
        }
    }
}

/// Command execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Global command-execution switch. When false every command is rejected
    /// before any process starts.
    pub enabled: bool,
    /// Extra base commands allowed in addition to the built-in safe list
    pub allow_list: Vec<String>,
    /// Additional deny regexes compiled on top of the built-in set
    pub deny_patterns: Vec<String>,
    /// Idle window: a command fails after this many seconds with zero output
    pub idle_timeout_secs: u64,
    /// Absolute ceiling regardless of output activity
    pub max_timeout_secs: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_list: Vec::new(),
            deny_patterns: Vec::new(),
            idle_timeout_secs: 60,
            max_timeout_secs: 600,
        }
    }
}

/// Approval gate configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Resolve every approval request as approved without suspending.
    /// Subagents run with this behavior regardless of the setting.
    pub auto_approve: bool,
}

/// Undo journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// In-memory history cap; oldest operations are evicted past this
    pub max_history: usize,
    /// Durable JSONL log path (None = `~/.femtocode/journal.jsonl`)
    pub journal_file: Option<String>,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            journal_file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty print
    Pretty,
    /// Compact single-line text (default)
    Compact,
    /// Structured JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default level filter when RUST_LOG is unset
    pub level: String,
    /// Optional log file (stderr when None)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Per-provider credentials and overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (empty = read from the provider-specific env var)
    pub api_key: String,
    /// Optional API base URL override
    pub base_url: Option<String>,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Which provider to use: "claude" (default) or "openai"
    pub default: Option<String>,
    pub claude: ProviderConfig,
    pub openai: ProviderConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.max_nudges, 3);
        assert_eq!(config.agent.max_subagent_depth, 3);
        assert!(!config.agent.require_explicit_completion);
        assert!(config.commands.enabled);
        assert_eq!(config.commands.idle_timeout_secs, 60);
        assert_eq!(config.commands.max_timeout_secs, 600);
        assert_eq!(config.undo.max_history, 50);
        assert!(!config.approval.auto_approve);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"agent":{"model":"claude-sonnet-4-5"}}"#).unwrap();
        assert_eq!(config.agent.model, "claude-sonnet-4-5");
        // Everything else falls back to defaults
        assert_eq!(config.agent.max_tokens, 8192);
        assert_eq!(config.commands.idle_timeout_secs, 60);
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.commands.allow_list.push("cargo".to_string());
        config.approval.auto_approve = true;

        let json = serde_json::to_string(&config).unwrap();
        let restored: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.commands.allow_list, vec!["cargo"]);
        assert!(restored.approval.auto_approve);
    }

    #[test]
    fn test_log_format_deserialize() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");
    }

    #[test]
    fn test_unknown_provider_fields_default() {
        let cfg: ProvidersConfig = serde_json::from_str(r#"{"default":"openai"}"#).unwrap();
        assert_eq!(cfg.default.as_deref(), Some("openai"));
        assert!(cfg.claude.api_key.is_empty());
    }
}
