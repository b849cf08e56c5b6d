//! Cooperative process-group scheduler
//!
//! Processes are grouped into process groups. Within a group, members run
//! one at a time in list (priority) order; a group advances only when its
//! running member suspends, stops, or finishes. At most one process is
//! `Running` system-wide.

mod process_list;

pub use process_list::ProcessList;

use crate::vm::context::ObjectId;

/// Notifications emitted by the scheduler
///
/// Delivered to every receiver obtained from [`ProcessList::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// No runnable member is left in this group
    ProcessGroupFinished(u32),
    /// A process bound to this object was removed
    InvokingObjectChanged(ObjectId),
}
