//! Command executor
//!
//! Runs a single shell command to completion, or hands it to the background
//! supervisor. Pre-flight checks run in order: the global enable flag, then
//! the allow-list/deny-pattern policy — a rejection happens before any
//! process is started.
//!
//! Timeouts are activity-based, not wall-clock: an idle timer resets on
//! every line of output, and the command fails only after a configurable
//! idle window with zero output — subject to an absolute safety ceiling
//! regardless of activity. The two timeout classes are reported distinctly
//! so callers can tell them apart.
//!
//! Server-like commands (dev servers, framework run commands) are promoted
//! to background execution even when foreground was requested, since they
//! never exit on their own.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::CommandConfig;
use crate::error::Result;
use crate::security::CommandPolicy;
use crate::supervisor::Supervisor;

/// How long a poll tick sleeps between timeout/interrupt checks.
const POLL_TICK: Duration = Duration::from_millis(100);
/// How long the background path waits for startup output before returning.
const STARTUP_CAPTURE: Duration = Duration::from_millis(500);

/// Commands that behave like servers and are auto-promoted to background.
const SERVER_PATTERNS: &[&str] = &[
    r"flask\s+run",
    r"python.*manage\.py\s+runserver",
    r"django.*runserver",
    r"uvicorn",
    r"gunicorn",
    r"python.*-m\s+http\.server",
    r"npm\s+(run\s+)?(start|dev|serve)",
    r"yarn\s+(run\s+)?(start|dev|serve)",
    r"node.*server",
    r"nodemon",
    r"next\s+(dev|start)",
    r"rails\s+server",
    r"cargo\s+watch",
    r"hugo\s+server",
    r"jekyll\s+serve",
];

/// Which limit a timed-out command hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No output for the idle window
    Idle,
    /// Total runtime exceeded the absolute ceiling
    Absolute,
}

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Set when the command failed on a timeout, classifying it
    pub timeout_kind: Option<TimeoutKind>,
    /// Distinct from failure: the user interrupted the run
    pub interrupted: bool,
    /// Task id when the command was handed to the background supervisor
    pub background_task: Option<String>,
    /// Human-readable failure description
    pub error: Option<String>,
}

impl CommandResult {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            timeout_kind: None,
            interrupted: false,
            background_task: None,
            error: Some(error),
        }
    }

    /// Combined stdout + stderr for feeding back to the model.
    pub fn combined_output(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.is_empty() {
            parts.push(self.stdout.clone());
        }
        if !self.stderr.is_empty() {
            parts.push(self.stderr.clone());
        }
        parts.join("\n")
    }
}

/// Line sink for live output streaming.
pub type OutputCallback = dyn Fn(&str, bool) + Send + Sync;

/// The command executor.
pub struct CommandExecutor {
    enabled: bool,
    policy: CommandPolicy,
    idle_timeout: Duration,
    max_timeout: Duration,
    server_patterns: Vec<Regex>,
    supervisor: Arc<Supervisor>,
}

impl CommandExecutor {
    /// Build an executor from config.
    pub fn from_config(config: &CommandConfig, supervisor: Arc<Supervisor>) -> Result<Self> {
        Ok(Self {
            enabled: config.enabled,
            policy: CommandPolicy::new(&config.allow_list, &config.deny_patterns)?,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_timeout: Duration::from_secs(config.max_timeout_secs),
            server_patterns: SERVER_PATTERNS
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("server pattern"))
                .collect(),
            supervisor,
        })
    }

    /// Override both timeouts (primarily for tests).
    pub fn with_timeouts(mut self, idle: Duration, max: Duration) -> Self {
        self.idle_timeout = idle;
        self.max_timeout = max;
        self
    }

    /// True when the command matches a known dev-server pattern.
    pub fn is_server_command(&self, command: &str) -> bool {
        self.server_patterns.iter().any(|p| p.is_match(command))
    }

    /// Execute a command.
    ///
    /// `background` requests detached execution; server-like commands are
    /// promoted to background regardless. The interrupt flag is polled
    /// between reads and terminates the child with an `interrupted` result
    /// rather than an error.
    pub async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        background: bool,
        interrupt: &AtomicBool,
        output_callback: Option<&OutputCallback>,
    ) -> CommandResult {
        // Pre-flight, in order: enable flag, then safety policy.
        if !self.enabled {
            return CommandResult::failure("Command execution is disabled in configuration".into());
        }
        if let Err(e) = self.policy.check(command) {
            log_audit_event(
                AuditCategory::ShellSecurity,
                AuditSeverity::Critical,
                command,
            );
            return CommandResult::failure(e.to_string());
        }

        let background = background || self.is_server_command(command);
        if background {
            return self.execute_background(command, working_dir).await;
        }

        self.execute_foreground(command, working_dir, interrupt, output_callback)
            .await
    }

    /// Hand the command to the supervisor and return once startup output has
    /// had a moment to accumulate.
    async fn execute_background(&self, command: &str, working_dir: &Path) -> CommandResult {
        let start = Instant::now();
        let task = match self.supervisor.spawn(command, working_dir) {
            Ok(task) => task,
            Err(e) => return CommandResult::failure(format!("Failed to start task: {}", e)),
        };

        tokio::time::sleep(STARTUP_CAPTURE).await;
        let startup = self
            .supervisor
            .read_output(&task.task_id, 50)
            .unwrap_or_default();

        debug!(task_id = %task.task_id, command, "Command promoted to background");
        CommandResult {
            success: true,
            exit_code: None,
            stdout: format!(
                "Started background task {} (pid {}).\n{}",
                task.task_id, task.pid, startup
            ),
            stderr: String::new(),
            duration: start.elapsed(),
            timeout_kind: None,
            interrupted: false,
            background_task: Some(task.task_id),
            error: None,
        }
    }

    async fn execute_foreground(
        &self,
        command: &str,
        working_dir: &Path,
        interrupt: &AtomicBool,
        output_callback: Option<&OutputCallback>,
    ) -> CommandResult {
        let start = Instant::now();

        let spawned = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return CommandResult::failure(format!("Failed to spawn command: {}", e)),
        };

        let mut out_lines = BufReader::new(child.stdout.take().expect("piped stdout")).lines();
        let mut err_lines = BufReader::new(child.stderr.take().expect("piped stderr")).lines();

        let mut stdout_acc: Vec<String> = Vec::new();
        let mut stderr_acc: Vec<String> = Vec::new();
        let mut out_done = false;
        let mut err_done = false;
        let mut exit_status: Option<std::process::ExitStatus> = None;
        let mut last_activity = Instant::now();
        let mut timed_out: Option<TimeoutKind> = None;
        let mut was_interrupted = false;

        loop {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => {
                    match line {
                        Ok(Some(line)) => {
                            last_activity = Instant::now();
                            if let Some(cb) = output_callback {
                                cb(&line, false);
                            }
                            stdout_acc.push(line);
                        }
                        _ => out_done = true,
                    }
                }
                line = err_lines.next_line(), if !err_done => {
                    match line {
                        Ok(Some(line)) => {
                            last_activity = Instant::now();
                            if let Some(cb) = output_callback {
                                cb(&line, true);
                            }
                            stderr_acc.push(line);
                        }
                        _ => err_done = true,
                    }
                }
                status = child.wait(), if exit_status.is_none() => {
                    match status {
                        Ok(status) => exit_status = Some(status),
                        Err(e) => {
                            warn!(error = %e, "wait() failed for foreground command");
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep(POLL_TICK) => {}
            }

            if exit_status.is_some() && out_done && err_done {
                break;
            }

            if interrupt.load(Ordering::SeqCst) {
                was_interrupted = true;
                break;
            }

            // Timeouts only apply while the process is alive; after exit we
            // are just draining the pipes.
            if exit_status.is_none() {
                let now = Instant::now();
                if now.duration_since(start) >= self.max_timeout {
                    timed_out = Some(TimeoutKind::Absolute);
                    break;
                }
                if now.duration_since(last_activity) >= self.idle_timeout {
                    timed_out = Some(TimeoutKind::Idle);
                    break;
                }
            }
        }

        if (timed_out.is_some() || was_interrupted) && exit_status.is_none() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        let duration = start.elapsed();
        let stdout = stdout_acc.join("\n");
        let stderr = stderr_acc.join("\n");

        if was_interrupted {
            return CommandResult {
                success: false,
                exit_code: None,
                stdout,
                stderr,
                duration,
                timeout_kind: None,
                interrupted: true,
                background_task: None,
                error: Some("Command interrupted by user".into()),
            };
        }

        if let Some(kind) = timed_out {
            let error = match kind {
                TimeoutKind::Absolute => format!(
                    "Command exceeded maximum runtime of {} seconds",
                    self.max_timeout.as_secs()
                ),
                TimeoutKind::Idle => format!(
                    "Command timed out after {} seconds of no output",
                    self.idle_timeout.as_secs()
                ),
            };
            return CommandResult {
                success: false,
                exit_code: None,
                stdout,
                stderr,
                duration,
                timeout_kind: Some(kind),
                interrupted: false,
                background_task: None,
                error: Some(error),
            };
        }

        let exit_code = exit_status.as_ref().and_then(|s| s.code());
        let success = exit_status.as_ref().map(|s| s.success()).unwrap_or(false);
        CommandResult {
            success,
            exit_code,
            stdout,
            stderr,
            duration,
            timeout_kind: None,
            interrupted: false,
            background_task: None,
            error: if success {
                None
            } else {
                Some(format!("Command failed with exit code {:?}", exit_code))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_supervisor() -> Arc<Supervisor> {
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        Arc::new(Supervisor::with_output_dir(dir.path().join("tasks")))
    }

    fn executor() -> CommandExecutor {
        CommandExecutor::from_config(&CommandConfig::default(), test_supervisor()).unwrap()
    }

    fn no_interrupt() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[tokio::test]
    async fn test_echo_succeeds() {
        let exec = executor();
        let result = exec
            .execute("echo hello", Path::new("/tmp"), false, &no_interrupt(), None)
            .await;
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello");
        assert!(result.timeout_kind.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let exec = executor();
        let result = exec
            .execute("exit 5", Path::new("/tmp"), false, &no_interrupt(), None)
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(5));
        assert!(result.error.unwrap().contains("exit code"));
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let exec = executor();
        let result = exec
            .execute(
                "echo out && echo err >&2",
                Path::new("/tmp"),
                false,
                &no_interrupt(),
                None,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
        assert!(result.combined_output().contains("out"));
        assert!(result.combined_output().contains("err"));
    }

    #[tokio::test]
    async fn test_dangerous_command_rejected_preflight() {
        let exec = executor();
        let result = exec
            .execute("sudo whoami", Path::new("/tmp"), false, &no_interrupt(), None)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Security violation"));
        // Rejected before any process ran
        assert!(result.stdout.is_empty());
        assert_eq!(result.duration, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_disabled_flag_rejects_everything() {
        let config = CommandConfig {
            enabled: false,
            ..Default::default()
        };
        let exec = CommandExecutor::from_config(&config, test_supervisor()).unwrap();
        let result = exec
            .execute("echo hi", Path::new("/tmp"), false, &no_interrupt(), None)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("disabled"));
    }

    #[tokio::test]
    async fn test_idle_timeout_classification() {
        let exec = executor().with_timeouts(Duration::from_secs(1), Duration::from_secs(30));
        let result = exec
            .execute("sleep 10", Path::new("/tmp"), false, &no_interrupt(), None)
            .await;
        assert!(!result.success);
        assert_eq!(result.timeout_kind, Some(TimeoutKind::Idle));
        assert!(result.error.unwrap().contains("no output"));
    }

    #[tokio::test]
    async fn test_activity_resets_idle_timer() {
        // Total runtime exceeds the 1s idle window, but output arrives
        // every ~400ms so the idle timer keeps resetting.
        let exec = executor().with_timeouts(Duration::from_secs(1), Duration::from_secs(30));
        let result = exec
            .execute(
                "for i in 1 2 3 4 5; do echo tick; sleep 0.4; done",
                Path::new("/tmp"),
                false,
                &no_interrupt(),
                None,
            )
            .await;
        assert!(result.success, "error: {:?}", result.error);
        assert!(result.duration >= Duration::from_secs(1));
        assert_eq!(result.stdout.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_absolute_ceiling_despite_activity() {
        let exec = executor().with_timeouts(Duration::from_secs(10), Duration::from_secs(1));
        let result = exec
            .execute(
                "while true; do echo spin; sleep 0.2; done",
                Path::new("/tmp"),
                false,
                &no_interrupt(),
                None,
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.timeout_kind, Some(TimeoutKind::Absolute));
        assert!(result.error.unwrap().contains("maximum runtime"));
    }

    #[tokio::test]
    async fn test_interrupt_terminates_with_flag() {
        let exec = Arc::new(executor());
        let interrupt = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&interrupt);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result = exec
            .execute("sleep 30", Path::new("/tmp"), false, &interrupt, None)
            .await;
        assert!(!result.success);
        assert!(result.interrupted);
        assert!(result.timeout_kind.is_none());
        assert!(result.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_callback_streams_lines() {
        let exec = executor();
        let collected: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let cb = move |line: &str, is_stderr: bool| {
            sink.lock().unwrap().push((line.to_string(), is_stderr));
        };

        let result = exec
            .execute(
                "echo one && echo two >&2",
                Path::new("/tmp"),
                false,
                &no_interrupt(),
                Some(&cb),
            )
            .await;
        assert!(result.success);
        let lines = collected.lock().unwrap();
        assert!(lines.contains(&("one".to_string(), false)));
        assert!(lines.contains(&("two".to_string(), true)));
    }

    #[tokio::test]
    async fn test_server_command_detection() {
        let exec = executor();
        assert!(exec.is_server_command("npm run dev"));
        assert!(exec.is_server_command("flask run --port 5000"));
        assert!(exec.is_server_command("python -m http.server"));
        assert!(!exec.is_server_command("ls -la"));
        assert!(!exec.is_server_command("cargo test"));
    }

    #[tokio::test]
    async fn test_explicit_background_returns_task_id() {
        let sup = test_supervisor();
        let exec = CommandExecutor::from_config(&CommandConfig::default(), Arc::clone(&sup)).unwrap();

        let result = exec
            .execute("sleep 10", Path::new("/tmp"), true, &no_interrupt(), None)
            .await;
        assert!(result.success);
        let task_id = result.background_task.unwrap();
        assert!(sup.list_running().iter().any(|t| t.task_id == task_id));
        sup.kill(&task_id, libc::SIGTERM).unwrap();
    }

    #[tokio::test]
    async fn test_server_promoted_to_background() {
        let sup = test_supervisor();
        let exec = CommandExecutor::from_config(&CommandConfig::default(), Arc::clone(&sup)).unwrap();

        // Harmless stand-in matching the nodemon pattern
        let result = exec
            .execute(
                "echo nodemon starting && sleep 5",
                Path::new("/tmp"),
                false,
                &no_interrupt(),
                None,
            )
            .await;
        assert!(result.success);
        assert!(result.background_task.is_some());
        sup.cleanup();
    }
}
