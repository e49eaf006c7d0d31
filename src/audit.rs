//! Structured audit logging for security-sensitive events.
//!
//! Emits structured `tracing` events with consistent field names so that
//! downstream log aggregators can filter on `audit=true` and query by
//! `category` and `severity`.

use tracing::{error, info, warn};

/// Broad category of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    /// Shell command blocked by the safety policy.
    ShellSecurity,
    /// Tool blocked by plan mode.
    PlanMode,
    /// Approval declined by the user.
    ApprovalDeclined,
    /// Path traversal outside the workspace.
    PathSecurity,
    /// Protocol-bridge routing failure.
    Bridge,
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShellSecurity => write!(f, "shell_security"),
            Self::PlanMode => write!(f, "plan_mode"),
            Self::ApprovalDeclined => write!(f, "approval_declined"),
            Self::PathSecurity => write!(f, "path_security"),
            Self::Bridge => write!(f, "bridge"),
        }
    }
}

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    /// Informational — action was noted but not harmful.
    Info,
    /// Warning — action was altered or declined.
    Warning,
    /// Critical — action was blocked entirely.
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Emit a structured audit event via `tracing`.
///
/// All audit events carry `audit = true` so log pipelines can filter on them.
pub fn log_audit_event(category: AuditCategory, severity: AuditSeverity, detail: &str) {
    match severity {
        AuditSeverity::Info => {
            info!(
                audit = true,
                category = %category,
                severity = %severity,
                detail = detail,
                "audit event"
            );
        }
        AuditSeverity::Warning => {
            warn!(
                audit = true,
                category = %category,
                severity = %severity,
                detail = detail,
                "audit event"
            );
        }
        AuditSeverity::Critical => {
            error!(
                audit = true,
                category = %category,
                severity = %severity,
                detail = detail,
                "audit event"
            );
        }
    }
}
