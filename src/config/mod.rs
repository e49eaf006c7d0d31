//! Configuration management for Femtocode
//!
//! This module provides configuration loading and saving. Configuration is
//! loaded from `~/.femtocode/config.json` with environment variable overrides
//! under the `FEMTOCODE_` prefix. There is no global config instance — the
//! loaded `Config` is passed by reference to the components that need it, so
//! multiple sessions can run in isolation.

mod types;

pub use types::*;

use std::path::PathBuf;

use crate::error::Result;

impl Config {
    /// Returns the Femtocode configuration directory path (~/.femtocode)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".femtocode")
    }

    /// Returns the path to the config file (~/.femtocode/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Save configuration to the default path, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(Self::dir())?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::path(), content)?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Variables follow the pattern `FEMTOCODE_SECTION_KEY`. Provider API
    /// keys additionally fall back to the conventional `ANTHROPIC_API_KEY` /
    /// `OPENAI_API_KEY` variables.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FEMTOCODE_AGENT_MODEL") {
            self.agent.model = val;
        }
        if let Ok(val) = std::env::var("FEMTOCODE_AGENT_WORKSPACE") {
            self.agent.workspace = val;
        }
        if let Ok(val) = std::env::var("FEMTOCODE_AGENT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.agent.max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("FEMTOCODE_COMMANDS_ENABLED") {
            if let Ok(v) = val.parse() {
                self.commands.enabled = v;
            }
        }
        if let Ok(val) = std::env::var("FEMTOCODE_COMMANDS_IDLE_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.commands.idle_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("FEMTOCODE_COMMANDS_MAX_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.commands.max_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("FEMTOCODE_APPROVAL_AUTO_APPROVE") {
            if let Ok(v) = val.parse() {
                self.approval.auto_approve = v;
            }
        }
        if self.providers.claude.api_key.is_empty() {
            if let Ok(val) = std::env::var("ANTHROPIC_API_KEY") {
                self.providers.claude.api_key = val;
            }
        }
        if self.providers.openai.api_key.is_empty() {
            if let Ok(val) = std::env::var("OPENAI_API_KEY") {
                self.providers.openai.api_key = val;
            }
        }
    }

    /// Resolve the workspace directory, expanding a leading `~`.
    pub fn workspace_path(&self) -> PathBuf {
        let ws = &self.agent.workspace;
        if let Some(stripped) = ws.strip_prefix('~') {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            let trimmed = stripped.trim_start_matches('/');
            if trimmed.is_empty() {
                home
            } else {
                home.join(trimmed)
            }
        } else {
            PathBuf::from(ws)
        }
    }
}
