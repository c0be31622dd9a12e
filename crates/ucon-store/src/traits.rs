//! Store trait definitions

use ucon_util::Result;

use crate::AuditEvent;

/// Append-only audit log
pub trait AuditLog: Send + Sync {
    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> Result<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEvent>>;
}
