//! Per-instance, non-blocking exclusion.
//!
//! A held lock means some operation is working on that instance right now;
//! a second caller is told to try again rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use mirador_core::InstanceId;

/// One flag per instance, created on first use and never removed.
#[derive(Debug, Default)]
pub struct InstanceLockTable {
    flags: DashMap<InstanceId, Arc<AtomicBool>>,
}

impl InstanceLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, id: InstanceId) -> Arc<AtomicBool> {
        self.flags
            .entry(id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .value()
            .clone()
    }

    /// `true` iff the caller now holds the lock for `id`.
    pub fn try_acquire(&self, id: InstanceId) -> bool {
        self.flag(id)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self, id: InstanceId) {
        if let Some(flag) = self.flags.get(&id) {
            flag.store(false, Ordering::Release);
        }
    }

    pub fn is_held(&self, id: InstanceId) -> bool {
        self.flags
            .get(&id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Acquire `id` and release it when the guard is dropped, including on unwind.
    pub fn guard(&self, id: InstanceId) -> Option<InstanceGuard> {
        let flag = self.flag(id);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(InstanceGuard { id, flag })
    }
}

#[derive(Debug)]
#[must_use = "the instance is released as soon as the guard is dropped"]
pub struct InstanceGuard {
    id: InstanceId,
    flag: Arc<AtomicBool>,
}

impl InstanceGuard {
    pub fn id(&self) -> InstanceId {
        self.id
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        tracing::trace!(instance = %self.id, "instance lock released");
    }
}
