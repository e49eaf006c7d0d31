//! Background task supervisor
//!
//! Owns the lifecycle of detached processes. Each registered task gets a
//! dedicated worker thread that streams raw bytes from a pseudo-terminal
//! into an append-only per-task output file (decoding best-effort), checks
//! process liveness after each read, and on process exit drains any
//! remaining buffered bytes before marking terminal status.
//!
//! A single mutex guards the `task_id → task` map and is held only for the
//! mutation itself; listener notification happens outside the lock to avoid
//! re-entrant deadlock, in the order status actually changed. Task entries
//! persist in memory for later querying — they are only torn down by
//! [`Supervisor::cleanup`] at shutdown, which kills every still-running task
//! and stops every worker.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{FemtoError, Result};

/// Poll timeout for the streaming worker.
const POLL_INTERVAL_MS: i32 = 500;
/// Grace period between the requested signal and a forced SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Status of a background task. Transitions only move forward through
/// `Running → {Completed | Failed | Killed}`; no task re-enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// Public snapshot of a background task.
#[derive(Debug, Clone)]
pub struct BackgroundTask {
    /// Short unique token (7-char hex)
    pub task_id: String,
    /// The command being executed
    pub command: String,
    /// Where it runs
    pub working_dir: PathBuf,
    /// OS process id
    pub pid: u32,
    /// Current status
    pub status: TaskStatus,
    /// When the task was registered
    pub started_at: DateTime<Utc>,
    /// When it reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Append-only output file
    pub output_file: PathBuf,
}

impl BackgroundTask {
    /// True while the task has not reached a terminal status.
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }
}

/// Listener invoked on every status change with `(task_id, status)`.
pub type StatusListener = Box<dyn Fn(&str, TaskStatus) + Send + Sync>;

struct TaskEntry {
    task: BackgroundTask,
    child: Arc<Mutex<Child>>,
    stop: Arc<AtomicBool>,
    /// Set when kill() was requested, to classify the terminal status
    kill_requested: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

struct SupervisorInner {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    /// Pending notifications queued under the tasks lock so delivery order
    /// matches the order status actually changed
    pending_notify: Mutex<VecDeque<(String, TaskStatus)>>,
    listeners: Mutex<Vec<StatusListener>>,
}

/// The background task supervisor.
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
    output_dir: PathBuf,
}

impl Supervisor {
    /// Create a supervisor writing task output under
    /// `/tmp/femtocode/<safe-working-dir>/tasks/`.
    pub fn new(working_dir: &Path) -> Self {
        let safe = working_dir.to_string_lossy().replace('/', "-");
        Self::with_output_dir(PathBuf::from(format!("/tmp/femtocode/{}/tasks", safe)))
    }

    /// Create a supervisor with an explicit output directory.
    pub fn with_output_dir(output_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                tasks: Mutex::new(HashMap::new()),
                pending_notify: Mutex::new(VecDeque::new()),
                listeners: Mutex::new(Vec::new()),
            }),
            output_dir,
        }
    }

    /// Add a status change listener.
    pub fn add_listener(&self, listener: StatusListener) {
        self.inner.listeners.lock().expect("listeners lock").push(listener);
    }

    /// Spawn `command` under a fresh pseudo-terminal and register it.
    ///
    /// The PTY makes servers that line-buffer only when attached to a
    /// terminal (Flask, webpack, etc.) flush their startup output.
    pub fn spawn(&self, command: &str, working_dir: &Path) -> Result<BackgroundTask> {
        let (child, master_fd) = spawn_with_pty(command, working_dir)?;
        self.register(command, working_dir, child, Some(master_fd))
    }

    /// Register an already-spawned process, starting its streaming worker
    /// when a PTY master descriptor is supplied.
    pub fn register(
        &self,
        command: &str,
        working_dir: &Path,
        child: Child,
        pty_master: Option<RawFd>,
    ) -> Result<BackgroundTask> {
        std::fs::create_dir_all(&self.output_dir)?;

        let task_id = uuid::Uuid::new_v4().simple().to_string()[..7].to_string();
        let output_file = self.output_dir.join(format!("{}.output", task_id));

        let task = BackgroundTask {
            task_id: task_id.clone(),
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
            pid: child.id(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            exit_code: None,
            output_file: output_file.clone(),
        };

        let child = Arc::new(Mutex::new(child));
        let stop = Arc::new(AtomicBool::new(false));
        let kill_requested = Arc::new(AtomicBool::new(false));

        let entry = TaskEntry {
            task: task.clone(),
            child: Arc::clone(&child),
            stop: Arc::clone(&stop),
            kill_requested,
            worker: None,
        };

        // Insert before starting the worker: even a command that exits
        // instantly finds its entry when the worker finalizes.
        {
            let mut tasks = self.inner.tasks.lock().expect("tasks lock");
            tasks.insert(task_id.clone(), entry);
            self.inner
                .pending_notify
                .lock()
                .expect("notify queue lock")
                .push_back((task_id.clone(), TaskStatus::Running));
        }
        notify_flush(&self.inner);

        if let Some(fd) = pty_master {
            // The worker gets only weak access to the child so the
            // supervisor stays the sole owner of the process handle.
            let child_weak = Arc::downgrade(&child);
            let inner = Arc::clone(&self.inner);
            let stop = Arc::clone(&stop);
            let id = task_id.clone();
            let out = output_file.clone();
            let handle = thread::spawn(move || {
                stream_worker(fd, &out, child_weak, stop);
                finalize_task(&inner, &id);
                notify_flush(&inner);
            });
            let mut tasks = self.inner.tasks.lock().expect("tasks lock");
            if let Some(entry) = tasks.get_mut(&task_id) {
                entry.worker = Some(handle);
            }
        }

        debug!(task_id = %task_id, command, "Registered background task");
        Ok(task)
    }

    /// Get a task snapshot by id, refreshing its status first.
    pub fn get(&self, task_id: &str) -> Option<BackgroundTask> {
        finalize_task(&self.inner, task_id);
        notify_flush(&self.inner);
        let tasks = self.inner.tasks.lock().expect("tasks lock");
        tasks.get(task_id).map(|e| e.task.clone())
    }

    /// All tasks still running, statuses refreshed.
    pub fn list_running(&self) -> Vec<BackgroundTask> {
        self.refresh_all();
        let tasks = self.inner.tasks.lock().expect("tasks lock");
        tasks
            .values()
            .filter(|e| e.task.is_running())
            .map(|e| e.task.clone())
            .collect()
    }

    /// All tasks (running and finished), newest first.
    pub fn list_all(&self) -> Vec<BackgroundTask> {
        self.refresh_all();
        let tasks = self.inner.tasks.lock().expect("tasks lock");
        let mut all: Vec<BackgroundTask> = tasks.values().map(|e| e.task.clone()).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    /// Send `signal` to a task, wait briefly for graceful exit, and
    /// force-kill on timeout. Idempotent against an already-dead process:
    /// killing twice, or killing an exited task, never errors and never
    /// double-transitions status.
    pub fn kill(&self, task_id: &str, signal: i32) -> Result<()> {
        let (child, stop, kill_requested, pid) = {
            let tasks = self.inner.tasks.lock().expect("tasks lock");
            let entry = tasks
                .get(task_id)
                .ok_or_else(|| FemtoError::NotFound(format!("Task '{}'", task_id)))?;
            (
                Arc::clone(&entry.child),
                Arc::clone(&entry.stop),
                Arc::clone(&entry.kill_requested),
                entry.task.pid,
            )
        };

        kill_requested.store(true, Ordering::SeqCst);
        stop.store(true, Ordering::SeqCst);

        let already_dead = {
            let mut guard = child.lock().expect("child lock");
            matches!(guard.try_wait(), Ok(Some(_)))
        };

        if !already_dead {
            // SAFETY: sending a signal to a pid we spawned and still own
            unsafe {
                libc::kill(pid as libc::pid_t, signal);
            }

            let deadline = Instant::now() + KILL_GRACE;
            loop {
                {
                    let mut guard = child.lock().expect("child lock");
                    if matches!(guard.try_wait(), Ok(Some(_))) {
                        break;
                    }
                    if Instant::now() >= deadline {
                        let _ = guard.kill();
                        let _ = guard.wait();
                        break;
                    }
                }
                thread::sleep(Duration::from_millis(100));
            }
        }

        finalize_task(&self.inner, task_id);
        notify_flush(&self.inner);
        Ok(())
    }

    /// Read a task's captured output, returning the last `tail_lines` lines
    /// (0 = everything).
    pub fn read_output(&self, task_id: &str, tail_lines: usize) -> Result<String> {
        let path = {
            let tasks = self.inner.tasks.lock().expect("tasks lock");
            tasks
                .get(task_id)
                .map(|e| e.task.output_file.clone())
                .ok_or_else(|| FemtoError::NotFound(format!("Task '{}'", task_id)))?
        };

        let content = std::fs::read_to_string(&path).unwrap_or_default();
        if tail_lines == 0 {
            return Ok(content);
        }
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= tail_lines {
            return Ok(content);
        }
        Ok(lines[lines.len() - tail_lines..].join("\n"))
    }

    /// Kill every still-running task and stop every worker.
    pub fn cleanup(&self) {
        let ids: Vec<String> = {
            let tasks = self.inner.tasks.lock().expect("tasks lock");
            tasks.keys().cloned().collect()
        };
        for id in &ids {
            let running = {
                let tasks = self.inner.tasks.lock().expect("tasks lock");
                tasks.get(id).map(|e| e.task.is_running()).unwrap_or(false)
            };
            if running {
                if let Err(e) = self.kill(id, libc::SIGTERM) {
                    warn!(task_id = %id, error = %e, "Cleanup kill failed");
                }
            }
        }
        // Join workers so no thread outlives the supervisor
        for id in &ids {
            let worker = {
                let mut tasks = self.inner.tasks.lock().expect("tasks lock");
                tasks.get_mut(id).and_then(|e| {
                    e.stop.store(true, Ordering::SeqCst);
                    e.worker.take()
                })
            };
            if let Some(handle) = worker {
                let _ = handle.join();
            }
        }
    }

    fn refresh_all(&self) {
        let ids: Vec<String> = {
            let tasks = self.inner.tasks.lock().expect("tasks lock");
            tasks
                .iter()
                .filter(|(_, e)| e.task.is_running())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            finalize_task(&self.inner, &id);
        }
        notify_flush(&self.inner);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Spawn `sh -c command` attached to a fresh PTY; returns the child and the
/// master descriptor. The slave side is closed in the parent.
fn spawn_with_pty(command: &str, working_dir: &Path) -> Result<(Child, RawFd)> {
    let mut master: libc::c_int = 0;
    let mut slave: libc::c_int = 0;

    // SAFETY: openpty fills the two descriptors on success
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(FemtoError::Io(std::io::Error::last_os_error()));
    }

    // SAFETY: slave is a valid descriptor; each Stdio takes its own dup
    let spawn_result = unsafe {
        Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(working_dir)
            .stdin(Stdio::from_raw_fd(libc::dup(slave)))
            .stdout(Stdio::from_raw_fd(libc::dup(slave)))
            .stderr(Stdio::from_raw_fd(libc::dup(slave)))
            .spawn()
    };

    // SAFETY: parent keeps only the master side
    unsafe {
        libc::close(slave);
    }

    match spawn_result {
        Ok(child) => Ok((child, master)),
        Err(e) => {
            // SAFETY: master was opened above and is not used on this path
            unsafe {
                libc::close(master);
            }
            Err(FemtoError::Io(e))
        }
    }
}

/// Worker loop: poll the PTY master, append decoded bytes to the output
/// file, watch process liveness, drain after exit.
fn stream_worker(
    master_fd: RawFd,
    output_file: &Path,
    child: Weak<Mutex<Child>>,
    stop: Arc<AtomicBool>,
) {
    let file = OpenOptions::new().create(true).append(true).open(output_file);
    let Ok(mut file) = file else {
        warn!(path = %output_file.display(), "Failed to open task output file");
        // SAFETY: worker owns the master descriptor
        unsafe {
            libc::close(master_fd);
        }
        return;
    };

    let mut buf = [0u8; 4096];

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        match poll_readable(master_fd, POLL_INTERVAL_MS) {
            PollResult::Ready => {
                // SAFETY: master_fd is owned by this worker until close below
                let n = unsafe { libc::read(master_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
                if n > 0 {
                    let text = String::from_utf8_lossy(&buf[..n as usize]);
                    let _ = file.write_all(text.as_bytes());
                    let _ = file.flush();
                } else {
                    // EOF or read error: process side closed the PTY
                    break;
                }
            }
            PollResult::Timeout => {}
            PollResult::Error => break,
        }

        // Revocable access: if the supervisor dropped the entry, stop
        let Some(child) = child.upgrade() else { break };
        let exited = {
            let mut guard = child.lock().expect("child lock");
            matches!(guard.try_wait(), Ok(Some(_)))
        };
        if exited {
            drain_remaining(master_fd, &mut file, &mut buf);
            break;
        }
    }

    // SAFETY: worker owns the master descriptor
    unsafe {
        libc::close(master_fd);
    }
}

/// After process exit, read whatever is still buffered in the PTY.
fn drain_remaining(master_fd: RawFd, file: &mut std::fs::File, buf: &mut [u8]) {
    loop {
        match poll_readable(master_fd, 100) {
            PollResult::Ready => {
                // SAFETY: descriptor still owned by the calling worker
                let n = unsafe { libc::read(master_fd, buf.as_mut_ptr() as *mut _, buf.len()) };
                if n <= 0 {
                    break;
                }
                let text = String::from_utf8_lossy(&buf[..n as usize]);
                let _ = file.write_all(text.as_bytes());
                let _ = file.flush();
            }
            _ => break,
        }
    }
}

enum PollResult {
    Ready,
    Timeout,
    Error,
}

fn poll_readable(fd: RawFd, timeout_ms: i32) -> PollResult {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: fds points at a valid pollfd for the duration of the call
    let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return PollResult::Timeout;
        }
        return PollResult::Error;
    }
    if rc == 0 {
        return PollResult::Timeout;
    }
    if fds.revents & libc::POLLIN != 0 {
        return PollResult::Ready;
    }
    // POLLHUP without POLLIN: nothing left to read
    PollResult::Error
}

/// Move a task to its terminal status if the process has exited. Holds the
/// tasks lock only for the status mutation; the notification is queued under
/// the lock (preserving change order) and delivered by `notify_flush`.
fn finalize_task(inner: &Arc<SupervisorInner>, task_id: &str) {
    let mut tasks = inner.tasks.lock().expect("tasks lock");
    let Some(entry) = tasks.get_mut(task_id) else {
        return;
    };
    if !entry.task.is_running() {
        return;
    }

    let exit_status = {
        let mut guard = entry.child.lock().expect("child lock");
        match guard.try_wait() {
            Ok(Some(status)) => Some(status),
            _ => None,
        }
    };
    let Some(status) = exit_status else { return };

    entry.task.completed_at = Some(Utc::now());
    entry.task.exit_code = status.code();

    let killed = entry.kill_requested.load(Ordering::SeqCst) || status.signal().is_some();
    entry.task.status = if killed {
        TaskStatus::Killed
    } else if status.code() == Some(0) {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    inner
        .pending_notify
        .lock()
        .expect("notify queue lock")
        .push_back((task_id.to_string(), entry.task.status));
}

/// Deliver queued notifications outside the tasks lock.
fn notify_flush(inner: &Arc<SupervisorInner>) {
    loop {
        let next = inner
            .pending_notify
            .lock()
            .expect("notify queue lock")
            .pop_front();
        let Some((id, status)) = next else { break };
        let listeners = inner.listeners.lock().expect("listeners lock");
        for listener in listeners.iter() {
            listener(&id, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn supervisor() -> Supervisor {
        // Leak the TempDir so the output directory survives the helper; the
        // OS cleans /tmp either way.
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        Supervisor::with_output_dir(dir.path().join("tasks"))
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_spawn_and_complete() {
        let sup = supervisor();
        let task = sup.spawn("echo hello-from-task", Path::new("/tmp")).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.task_id.len(), 7);

        assert!(wait_for(
            || sup.get(&task.task_id).unwrap().status == TaskStatus::Completed,
            Duration::from_secs(10)
        ));

        let snapshot = sup.get(&task.task_id).unwrap();
        assert_eq!(snapshot.exit_code, Some(0));
        assert!(snapshot.completed_at.is_some());

        // Output streamed through the PTY into the file
        assert!(wait_for(
            || sup
                .read_output(&task.task_id, 0)
                .unwrap()
                .contains("hello-from-task"),
            Duration::from_secs(5)
        ));
    }

    #[test]
    fn test_failed_exit_code() {
        let sup = supervisor();
        let task = sup.spawn("exit 3", Path::new("/tmp")).unwrap();
        assert!(wait_for(
            || sup.get(&task.task_id).unwrap().status == TaskStatus::Failed,
            Duration::from_secs(10)
        ));
        assert_eq!(sup.get(&task.task_id).unwrap().exit_code, Some(3));
    }

    #[test]
    fn test_kill_infinite_output_task() {
        let sup = supervisor();
        let task = sup.spawn("yes", Path::new("/tmp")).unwrap();

        let running = sup.list_running();
        assert!(running.iter().any(|t| t.task_id == task.task_id));

        sup.kill(&task.task_id, libc::SIGTERM).unwrap();
        let snapshot = sup.get(&task.task_id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Killed);
        assert!(!sup
            .list_running()
            .iter()
            .any(|t| t.task_id == task.task_id));
    }

    #[test]
    fn test_kill_is_idempotent() {
        let sup = supervisor();
        let task = sup.spawn("sleep 30", Path::new("/tmp")).unwrap();

        sup.kill(&task.task_id, libc::SIGTERM).unwrap();
        // Second kill on a dead process: no error, no double transition
        sup.kill(&task.task_id, libc::SIGTERM).unwrap();
        assert_eq!(sup.get(&task.task_id).unwrap().status, TaskStatus::Killed);
    }

    #[test]
    fn test_kill_already_exited_task() {
        let sup = supervisor();
        let task = sup.spawn("true", Path::new("/tmp")).unwrap();
        assert!(wait_for(
            || !sup.get(&task.task_id).unwrap().is_running(),
            Duration::from_secs(10)
        ));

        let before = sup.get(&task.task_id).unwrap().status;
        sup.kill(&task.task_id, libc::SIGTERM).unwrap();
        // Status did not re-transition
        assert_eq!(sup.get(&task.task_id).unwrap().status, before);
    }

    #[test]
    fn test_kill_unknown_task_errors() {
        let sup = supervisor();
        assert!(matches!(
            sup.kill("zzzzzzz", libc::SIGTERM),
            Err(FemtoError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_output_tail() {
        let sup = supervisor();
        let task = sup
            .spawn("printf 'a\\nb\\nc\\nd\\n'", Path::new("/tmp"))
            .unwrap();
        assert!(wait_for(
            || !sup.get(&task.task_id).unwrap().is_running(),
            Duration::from_secs(10)
        ));
        assert!(wait_for(
            || sup.read_output(&task.task_id, 0).unwrap().contains('d'),
            Duration::from_secs(5)
        ));

        let tail = sup.read_output(&task.task_id, 2).unwrap();
        let lines: Vec<&str> = tail.lines().map(|l| l.trim()).collect();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_listener_order_running_then_terminal() {
        let sup = supervisor();
        let (tx, rx) = mpsc::channel();
        sup.add_listener(Box::new(move |id, status| {
            let _ = tx.send((id.to_string(), status));
        }));

        let task = sup.spawn("true", Path::new("/tmp")).unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, (task.task_id.clone(), TaskStatus::Running));

        let second = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(second.0, task.task_id);
        assert_eq!(second.1, TaskStatus::Completed);
    }

    #[test]
    fn test_cleanup_kills_everything() {
        let sup = supervisor();
        let a = sup.spawn("sleep 60", Path::new("/tmp")).unwrap();
        let b = sup.spawn("sleep 60", Path::new("/tmp")).unwrap();

        sup.cleanup();
        assert!(sup.list_running().is_empty());
        assert_eq!(sup.get(&a.task_id).unwrap().status, TaskStatus::Killed);
        assert_eq!(sup.get(&b.task_id).unwrap().status, TaskStatus::Killed);
    }

    #[test]
    fn test_entries_persist_after_completion() {
        let sup = supervisor();
        let task = sup.spawn("true", Path::new("/tmp")).unwrap();
        assert!(wait_for(
            || !sup.get(&task.task_id).unwrap().is_running(),
            Duration::from_secs(10)
        ));
        // Finished tasks stay queryable
        assert_eq!(sup.list_all().len(), 1);
        assert!(sup.get(&task.task_id).is_some());
    }
}
