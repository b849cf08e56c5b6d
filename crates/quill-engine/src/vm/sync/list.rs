//! Mutex registry

use super::Mutex;
use crate::vm::interpreter::ProcessId;
use crate::vm::{VmError, VmResult};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Name slots and the live mutex occupying each
///
/// Slots are assigned per name on first use and never reclaimed, so a
/// name keeps its slot across lock/unlock cycles.
#[derive(Default)]
struct SlotTable {
    names: Vec<String>,
    index: FxHashMap<String, usize>,
    live: Vec<Option<Arc<Mutex>>>,
}

impl SlotTable {
    fn slot_for(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.index.get(name) {
            return slot;
        }
        let slot = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), slot);
        self.live.push(None);
        slot
    }

    fn live(&self, name: &str) -> Option<&Arc<Mutex>> {
        let slot = *self.index.get(name)?;
        self.live[slot].as_ref()
    }
}

/// Shared registry state
///
/// The interior lock only makes the registry `Send + Sync`; it is never held
/// across script execution.
#[derive(Default)]
pub(super) struct MutexTable {
    slots: parking_lot::Mutex<SlotTable>,
}

impl MutexTable {
    fn create(
        self: &Arc<Self>,
        name: &str,
        note: &str,
        owner: Option<ProcessId>,
    ) -> VmResult<Arc<Mutex>> {
        let mut slots = self.slots.lock();
        let slot = slots.slot_for(name);
        if slots.live[slot].is_some() {
            return Err(VmError::AlreadyLocked);
        }
        let mutex = Arc::new(Mutex::new(name, note, slot, Arc::downgrade(self), owner));
        slots.live[slot] = Some(mutex.clone());
        trace!(name, slot, ?owner, "mutex created");
        Ok(mutex)
    }

    fn load(
        self: &Arc<Self>,
        name: &str,
        note: &str,
        owner: Option<ProcessId>,
    ) -> VmResult<Arc<Mutex>> {
        {
            let slots = self.slots.lock();
            if let Some(existing) = slots.live(name) {
                let current = existing.owner();
                if current.is_some() && current != owner {
                    return Err(VmError::IncompatibleLocks);
                }
                existing.add_reference();
                if owner.is_some() {
                    existing.set_owner(owner);
                }
                return Ok(existing.clone());
            }
        }
        self.create(name, note, owner)
    }

    fn query(&self, name: &str) -> Option<Arc<Mutex>> {
        self.slots.lock().live(name).cloned()
    }

    fn disown_locks_by_process(&self, process: ProcessId) {
        let slots = self.slots.lock();
        for mutex in slots.live.iter().flatten() {
            if mutex.owned_by(process) {
                mutex.set_owner(None);
            }
        }
    }

    fn enum_mutexes(&self, out: &mut Vec<Arc<Mutex>>, owner: Option<ProcessId>) {
        let slots = self.slots.lock();
        out.extend(
            slots
                .live
                .iter()
                .flatten()
                .filter(|m| owner.is_none() || m.owner() == owner)
                .cloned(),
        );
    }

    fn len(&self) -> usize {
        self.slots.lock().live.iter().flatten().count()
    }

    /// Free the slot of a mutex whose reference count reached zero
    pub(super) fn release(&self, mutex: &Mutex) {
        let released = {
            let mut slots = self.slots.lock();
            match slots.live.get_mut(mutex.slot()) {
                Some(entry) if entry.as_ref().is_some_and(|m| std::ptr::eq(&**m, mutex)) => {
                    entry.take()
                }
                _ => None,
            }
        };
        if released.is_some() {
            trace!(slot = mutex.slot(), "mutex released");
        }
    }
}

/// Registry of named cooperative locks
///
/// Dropping the registry abandons every mutex that is still referenced:
/// the mutexes stay valid for their holders but lose their name and owner.
pub struct MutexList {
    table: Arc<MutexTable>,
}

impl MutexList {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            table: Arc::new(MutexTable::default()),
        }
    }

    /// Weak handle for processes
    pub fn handle(&self) -> MutexListRef {
        MutexListRef(Arc::downgrade(&self.table))
    }

    /// Create a new mutex; fails if a live one already has this name
    pub fn create(
        &self,
        name: &str,
        note: &str,
        owner: Option<ProcessId>,
    ) -> VmResult<Arc<Mutex>> {
        self.table.create(name, note, owner)
    }

    /// Reuse a live mutex of this name if the owners agree, else create one
    ///
    /// Reuse adds a reference and stamps a non-null `owner` on the mutex.
    pub fn load(&self, name: &str, note: &str, owner: Option<ProcessId>) -> VmResult<Arc<Mutex>> {
        self.table.load(name, note, owner)
    }

    /// Find the live mutex with this name
    pub fn query(&self, name: &str) -> Option<Arc<Mutex>> {
        self.table.query(name)
    }

    /// Clear the owner of every mutex owned by `process`
    pub fn disown_locks_by_process(&self, process: ProcessId) {
        self.table.disown_locks_by_process(process);
    }

    /// Append live mutexes to `out`, optionally only those owned by `owner`
    pub fn enum_mutexes(&self, out: &mut Vec<Arc<Mutex>>, owner: Option<ProcessId>) {
        self.table.enum_mutexes(out, owner);
    }

    /// Number of live mutexes
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if no mutex is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MutexList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MutexList {
    fn drop(&mut self) {
        let live: Vec<Arc<Mutex>> = self
            .table
            .slots
            .lock()
            .live
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        if !live.is_empty() {
            warn!(count = live.len(), "abandoning live mutexes");
        }
        for mutex in &live {
            mutex.abandon();
        }
        debug!("mutex list destroyed");
    }
}

/// Weak handle to a [`MutexList`]
///
/// Every operation fails with `EntityUnavailable` once the registry is gone.
#[derive(Clone, Default)]
pub struct MutexListRef(Weak<MutexTable>);

impl MutexListRef {
    /// A handle that refers to no registry
    pub fn detached() -> Self {
        Self::default()
    }

    fn table(&self) -> VmResult<Arc<MutexTable>> {
        self.0
            .upgrade()
            .ok_or_else(|| VmError::EntityUnavailable("lock registry".to_string()))
    }

    /// See [`MutexList::create`]
    pub fn create(
        &self,
        name: &str,
        note: &str,
        owner: Option<ProcessId>,
    ) -> VmResult<Arc<Mutex>> {
        self.table()?.create(name, note, owner)
    }

    /// See [`MutexList::load`]
    pub fn load(&self, name: &str, note: &str, owner: Option<ProcessId>) -> VmResult<Arc<Mutex>> {
        self.table()?.load(name, note, owner)
    }

    /// See [`MutexList::query`]
    pub fn query(&self, name: &str) -> Option<Arc<Mutex>> {
        self.0.upgrade()?.query(name)
    }

    /// See [`MutexList::disown_locks_by_process`]; no-op without a registry
    pub fn disown_locks_by_process(&self, process: ProcessId) {
        if let Some(table) = self.0.upgrade() {
            table.disown_locks_by_process(process);
        }
    }

    /// Check whether the registry is still alive
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}
