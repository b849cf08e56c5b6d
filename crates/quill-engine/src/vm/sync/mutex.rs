//! Named cooperative mutex

use super::list::MutexTable;
use crate::vm::interpreter::ProcessId;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;
use tracing::warn;

/// Name reported by a mutex whose registry has been destroyed
pub const ABANDONED_NAME: &str = "<dead>";

/// Registry link of a mutex
enum MutexLink {
    /// Registered; `owner` is a back-reference only
    Live {
        table: Weak<MutexTable>,
        owner: Option<ProcessId>,
    },
    /// Registry destroyed, or the mutex was released
    Abandoned,
}

/// A named cooperative lock
///
/// A mutex stays registered while its reference count is at least one.
/// When the count drops to zero it frees its registry slot, so the name can
/// be locked again.
pub struct Mutex {
    name: String,
    note: String,
    slot: usize,
    refs: AtomicUsize,
    link: parking_lot::Mutex<MutexLink>,
}

impl Mutex {
    pub(super) fn new(
        name: &str,
        note: &str,
        slot: usize,
        table: Weak<MutexTable>,
        owner: Option<ProcessId>,
    ) -> Self {
        Self {
            name: name.to_string(),
            note: note.to_string(),
            slot,
            refs: AtomicUsize::new(1),
            link: parking_lot::Mutex::new(MutexLink::Live { table, owner }),
        }
    }

    /// Lock name, or [`ABANDONED_NAME`] once the registry is gone
    pub fn name(&self) -> &str {
        match *self.link.lock() {
            MutexLink::Live { .. } => &self.name,
            MutexLink::Abandoned => ABANDONED_NAME,
        }
    }

    /// Free-form note supplied when the lock was created
    pub fn note(&self) -> &str {
        &self.note
    }

    /// Registry slot
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Current owner
    pub fn owner(&self) -> Option<ProcessId> {
        match *self.link.lock() {
            MutexLink::Live { owner, .. } => owner,
            MutexLink::Abandoned => None,
        }
    }

    /// Change the owner (ignored once abandoned)
    pub fn set_owner(&self, new_owner: Option<ProcessId>) {
        if let MutexLink::Live { owner, .. } = &mut *self.link.lock() {
            *owner = new_owner;
        }
    }

    /// Check whether the registry link is gone
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.link.lock(), MutexLink::Abandoned)
    }

    /// Current reference count
    pub fn references(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Take another reference
    pub fn add_reference(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a reference; the last one unregisters the mutex
    pub fn remove_reference(&self) {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.unregister(),
            Ok(_) => {}
            Err(_) => warn!(name = %self.name, "mutex reference count underflow"),
        }
    }

    /// Mark as abandoned, clearing the registry link and the owner
    pub(super) fn abandon(&self) {
        *self.link.lock() = MutexLink::Abandoned;
    }

    pub(super) fn owned_by(&self, process: ProcessId) -> bool {
        self.owner() == Some(process)
    }

    fn unregister(&self) {
        // The link lock must be released before the table lock is taken.
        let link = std::mem::replace(&mut *self.link.lock(), MutexLink::Abandoned);
        if let MutexLink::Live { table, .. } = link {
            if let Some(table) = table.upgrade() {
                table.release(self);
            }
        }
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.name())
            .field("slot", &self.slot)
            .field("refs", &self.references())
            .field("owner", &self.owner())
            .finish()
    }
}
