//! Cooperative lock registry
//!
//! Locks are named, reference-counted tokens that scripts use by
//! convention. Nothing here blocks: a conflicting request fails with a
//! catchable script error instead.

mod list;
mod lock;
mod mutex;

pub use list::{MutexList, MutexListRef};
pub use lock::LockValue;
pub use mutex::{Mutex, ABANDONED_NAME};
