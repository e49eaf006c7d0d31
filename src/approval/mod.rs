//! Human-approval gate
//!
//! A synchronization point that suspends the calling execution path until a
//! human accepts, declines, or auto-approval applies. The gate is a small
//! state machine: `Idle → Awaiting (options rendered, selection index 0) →
//! resolved(approved|declined) → Idle`. Only one request may be awaiting at
//! a time; a second request while one is pending is a caller error.
//! Resolution is signaled exactly once through a `oneshot` completion slot.
//!
//! "Approve and remember" resolves as approved and additionally records a
//! remember-key (command prefix + working directory) so future
//! identical-prefix commands bypass the gate. Cancellation (e.g. an escape
//! key) is modeled as declined and still releases the slot exactly once.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::error::{FemtoError, Result};

/// The three choices rendered for every approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChoice {
    /// Run this command now.
    ApproveOnce,
    /// Run it and auto-approve future commands with the same prefix in the
    /// same working directory.
    ApproveAndRemember,
    /// Do not run it.
    Decline,
}

impl ApprovalChoice {
    /// Whether this choice permits execution.
    pub fn is_approved(&self) -> bool {
        !matches!(self, ApprovalChoice::Decline)
    }
}

/// One selectable option in the prompt.
#[derive(Debug, Clone)]
pub struct ApprovalOption {
    pub label: String,
    pub description: String,
    pub choice: ApprovalChoice,
}

/// The pending prompt state handed to the rendering layer.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    /// The command awaiting approval
    pub command: String,
    /// Where it would run
    pub working_dir: String,
    /// The three options, in render order
    pub options: Vec<ApprovalOption>,
    /// Currently highlighted option
    pub selected_index: usize,
}

impl PendingApproval {
    fn new(command: &str, working_dir: &str) -> Self {
        let prefix = command.split_whitespace().next().unwrap_or("");
        let remember_desc = if prefix.is_empty() {
            format!("Automatically approve future commands in {}.", working_dir)
        } else {
            format!(
                "Automatically approve commands starting with '{}' in {}.",
                prefix, working_dir
            )
        };
        Self {
            command: command.to_string(),
            working_dir: working_dir.to_string(),
            options: vec![
                ApprovalOption {
                    label: "Yes".to_string(),
                    description: "Run this command now.".to_string(),
                    choice: ApprovalChoice::ApproveOnce,
                },
                ApprovalOption {
                    label: "Yes, and don't ask again".to_string(),
                    description: remember_desc,
                    choice: ApprovalChoice::ApproveAndRemember,
                },
                ApprovalOption {
                    label: "No".to_string(),
                    description: "Cancel and adjust the request.".to_string(),
                    choice: ApprovalChoice::Decline,
                },
            ],
            selected_index: 0,
        }
    }
}

/// The resolved outcome delivered to the waiting caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub approved: bool,
    pub choice: ApprovalChoice,
}

enum GateState {
    Idle,
    Awaiting {
        pending: PendingApproval,
        slot: oneshot::Sender<Decision>,
    },
}

/// The approval gate.
///
/// Owned per session; remember-keys are instance state, not globals, so
/// concurrent sessions stay isolated.
pub struct ApprovalGate {
    state: Mutex<GateState>,
    /// (command prefix, working dir) pairs that bypass the gate
    remembered: Mutex<HashSet<(String, String)>>,
    /// Resolve every request as approved without suspending
    auto_approve: bool,
}

impl ApprovalGate {
    /// Create a gate. With `auto_approve` set, `request` resolves
    /// immediately as approved and never enters the awaiting state.
    pub fn new(auto_approve: bool) -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
            remembered: Mutex::new(HashSet::new()),
            auto_approve,
        }
    }

    /// True while a prompt is awaiting resolution.
    pub fn is_awaiting(&self) -> bool {
        matches!(
            *self.state.lock().expect("gate state lock"),
            GateState::Awaiting { .. }
        )
    }

    /// The pending prompt, if any, for rendering.
    pub fn pending(&self) -> Option<PendingApproval> {
        match &*self.state.lock().expect("gate state lock") {
            GateState::Awaiting { pending, .. } => Some(pending.clone()),
            GateState::Idle => None,
        }
    }

    /// Suspend until a human (or auto-approval) resolves the request.
    ///
    /// Returns an error if another request is already awaiting — at most one
    /// may be active per session.
    pub async fn request(&self, command: &str, working_dir: &str) -> Result<Decision> {
        if self.auto_approve {
            return Ok(Decision {
                approved: true,
                choice: ApprovalChoice::ApproveOnce,
            });
        }

        if self.is_remembered(command, working_dir) {
            debug!(command, "Approval bypassed by remember-key");
            return Ok(Decision {
                approved: true,
                choice: ApprovalChoice::ApproveOnce,
            });
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().expect("gate state lock");
            if matches!(*state, GateState::Awaiting { .. }) {
                return Err(FemtoError::Approval(
                    "An approval prompt is already active".into(),
                ));
            }
            *state = GateState::Awaiting {
                pending: PendingApproval::new(command, working_dir),
                slot: tx,
            };
        }

        rx.await.map_err(|_| {
            FemtoError::Approval("Approval prompt was dropped without resolution".into())
        })
    }

    /// Move the selection cursor by `delta`, wrapping around the options.
    pub fn select(&self, delta: isize) {
        let mut state = self.state.lock().expect("gate state lock");
        if let GateState::Awaiting { pending, .. } = &mut *state {
            let len = pending.options.len() as isize;
            let idx = pending.selected_index as isize;
            pending.selected_index = ((idx + delta).rem_euclid(len)) as usize;
        }
    }

    /// Confirm the currently selected option.
    pub fn confirm(&self) -> Result<()> {
        let choice = match &*self.state.lock().expect("gate state lock") {
            GateState::Awaiting { pending, .. } => pending.options[pending.selected_index].choice,
            GateState::Idle => {
                return Err(FemtoError::Approval("No approval prompt is active".into()))
            }
        };
        self.resolve(choice)
    }

    /// Resolve the pending prompt with an explicit choice. Fires the
    /// completion slot exactly once and returns the gate to idle.
    pub fn resolve(&self, choice: ApprovalChoice) -> Result<()> {
        let taken = {
            let mut state = self.state.lock().expect("gate state lock");
            match std::mem::replace(&mut *state, GateState::Idle) {
                GateState::Awaiting { pending, slot } => Some((pending, slot)),
                GateState::Idle => None,
            }
        };

        let Some((pending, slot)) = taken else {
            return Err(FemtoError::Approval("No approval prompt is active".into()));
        };

        if choice == ApprovalChoice::ApproveAndRemember {
            let prefix = pending
                .command
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            self.remembered
                .lock()
                .expect("remember lock")
                .insert((prefix, pending.working_dir.clone()));
        }
        if choice == ApprovalChoice::Decline {
            log_audit_event(
                AuditCategory::ApprovalDeclined,
                AuditSeverity::Warning,
                &pending.command,
            );
        }

        // A dropped receiver means the requester gave up; nothing to signal.
        let _ = slot.send(Decision {
            approved: choice.is_approved(),
            choice,
        });
        Ok(())
    }

    /// Cancel the pending prompt (user escape). Modeled as declined; a
    /// no-op when the gate is idle so stray escapes are harmless.
    pub fn cancel(&self) {
        if self.is_awaiting() {
            let _ = self.resolve(ApprovalChoice::Decline);
        }
    }

    /// Whether a (prefix, working dir) remember-key covers this command.
    pub fn is_remembered(&self, command: &str, working_dir: &str) -> bool {
        let prefix = command.split_whitespace().next().unwrap_or("");
        self.remembered
            .lock()
            .expect("remember lock")
            .contains(&(prefix.to_string(), working_dir.to_string()))
    }
}
