//! Shell command safety checks
//!
//! Pre-flight filtering for the command executor: an explicit safe-command
//! list is consulted first, then a compiled set of deny regexes. A match on
//! a deny pattern rejects the command before any process is started.

use regex::Regex;

use crate::error::{FemtoError, Result};

/// Base commands that are generally allowed without further pattern checks.
const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "wc", "echo", "pwd", "which", "whoami", "git",
    "cargo", "rustc", "pytest", "python", "python3", "pip", "node", "npm", "npx", "yarn", "make",
    "cmake",
];

/// Deny patterns compiled at construction. Destructive filesystem operations,
/// privilege escalation, fork bombs, raw disk writes and pipe-to-shell
/// downloads.
const DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+-[rf]{2}\s+/\s*$",
    r"rm\s+-[rf]{2}\s+/\*",
    r"\bsudo\b",
    r"chmod\s+-R\s+777\s+/",
    r":\(\)\s*\{\s*:\|\:&\s*\};:",
    r"mv\s+/\S*\s",
    r">\s*/dev/sd[a-z]",
    r"dd\s+if=.*of=/dev",
    r"curl[^|]*\|\s*(ba)?sh",
    r"wget[^|]*\|\s*(ba)?sh",
    r"mkfs\.",
];

/// Compiled command safety policy.
///
/// # Example
/// ```
/// use femtocode::security::CommandPolicy;
///
/// let policy = CommandPolicy::new(&[], &[]).unwrap();
/// assert!(policy.check("ls -la").is_ok());
/// assert!(policy.check("sudo rm -rf /").is_err());
/// ```
#[derive(Debug)]
pub struct CommandPolicy {
    allow_list: Vec<String>,
    deny: Vec<Regex>,
}

impl CommandPolicy {
    /// Build a policy from extra allow-list entries and extra deny patterns
    /// layered on top of the built-in sets.
    ///
    /// Returns a config error if any user-supplied deny pattern fails to
    /// compile.
    pub fn new(extra_allow: &[String], extra_deny: &[String]) -> Result<Self> {
        let mut allow_list: Vec<String> = SAFE_COMMANDS.iter().map(|s| s.to_string()).collect();
        allow_list.extend(extra_allow.iter().cloned());

        let mut deny = Vec::with_capacity(DANGEROUS_PATTERNS.len() + extra_deny.len());
        for pattern in DANGEROUS_PATTERNS {
            // Built-in patterns are known-good
            deny.push(Regex::new(&format!("(?i){}", pattern)).expect("builtin deny pattern"));
        }
        for pattern in extra_deny {
            let compiled = Regex::new(&format!("(?i){}", pattern)).map_err(|e| {
                FemtoError::Config(format!("Invalid deny pattern '{}': {}", pattern, e))
            })?;
            deny.push(compiled);
        }

        Ok(Self { allow_list, deny })
    }

    /// Check a command against the policy.
    ///
    /// The explicit safe-command list beats the deny patterns: a command
    /// whose base word is allow-listed passes without pattern matching.
    /// Everything else is scanned against the deny set.
    pub fn check(&self, command: &str) -> Result<()> {
        let base = command.split_whitespace().next().unwrap_or("");
        if self.allow_list.iter().any(|a| a == base) {
            return Ok(());
        }

        for pattern in &self.deny {
            if pattern.is_match(command) {
                return Err(FemtoError::SecurityViolation(format!(
                    "Command blocked by pattern '{}': {}",
                    pattern.as_str(),
                    command
                )));
            }
        }

        Ok(())
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(&[], &[]).expect("default policy")
    }
}
