//! Script-visible lock values

use super::Mutex;
use std::fmt;
use std::sync::Arc;

struct LockHandle {
    mutex: Arc<Mutex>,
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.mutex.remove_reference();
    }
}

/// A held lock, as stored in a script value
///
/// Wraps exactly one mutex reference. Copies of the value share it; the
/// reference is returned when the last copy is dropped.
#[derive(Clone)]
pub struct LockValue(Arc<LockHandle>);

impl LockValue {
    /// Take over one reference of `mutex`
    pub fn new(mutex: Arc<Mutex>) -> Self {
        LockValue(Arc::new(LockHandle { mutex }))
    }

    /// The underlying mutex
    pub fn mutex(&self) -> &Arc<Mutex> {
        &self.0.mutex
    }

    /// Check whether two values hold the same mutex
    pub fn same_lock(&self, other: &LockValue) -> bool {
        Arc::ptr_eq(&self.0.mutex, &other.0.mutex)
    }
}

impl fmt::Debug for LockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockValue").field(&self.0.mutex).finish()
    }
}
