//! In-memory audit log

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::trace;
use ucon_util::Result;

use crate::{AuditEvent, AuditLog};

/// Bounded in-memory audit log; the oldest records are dropped first
#[derive(Debug)]
pub struct MemoryAuditLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    events: VecDeque<AuditEvent>,
    next_id: u64,
}

impl MemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Number of records currently retained
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryAuditLog {
    fn append_audit(&self, mut event: AuditEvent) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        inner.next_id += 1;
        event.id = inner.next_id;
        trace!(event_id = event.id, "Audit event appended");

        if inner.events.len() == self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
        Ok(())
    }

    fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.events.iter().rev().take(limit).cloned().collect())
    }
}
