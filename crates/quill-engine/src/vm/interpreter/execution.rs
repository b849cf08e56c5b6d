//! Step results and execution hooks

use super::{Process, ProcessState};
use crate::vm::value::Value;
use crate::vm::VmError;

/// Why a process gave up control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// Block the process group until the process is continued
    Wait,
    /// Give up the group slot; the process must be resumed to run again
    Stop,
}

impl SuspendReason {
    /// State the process enters
    pub fn state(self) -> ProcessState {
        match self {
            SuspendReason::Wait => ProcessState::Waiting,
            SuspendReason::Stop => ProcessState::Suspended,
        }
    }
}

/// Result of executing a single instruction
///
/// `Process::run` maps every variant to a state transition:
/// - `Continue`: fetch the next instruction
/// - `Suspend`: save state and return to the scheduler
/// - `Fail`: unwind to the nearest exception handler, or fail the process
/// - `Return`: pop the current frame (`None` keeps the top value, if any)
/// - `Terminate`: end the process immediately
#[derive(Debug)]
pub enum Step {
    /// Continue to the next instruction
    Continue,
    /// Suspend the process
    Suspend(SuspendReason),
    /// An error occurred
    Fail(VmError),
    /// Return from the current frame
    Return(Option<Value>),
    /// End the process as terminated
    Terminate,
}

/// Hook invoked by [`Process::run`] before every instruction
pub trait ProcessObserver {
    /// Observe the process about to execute its top frame's current
    /// instruction
    fn add_process_state(&mut self, process: &Process);
}
