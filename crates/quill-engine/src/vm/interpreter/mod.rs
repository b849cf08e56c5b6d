//! Process interpreter
//!
//! A [`Process`] executes bytecode on one shared value stack, with a frame
//! stack for activations, a context stack for name resolution, and an
//! exception-handler stack for catch scopes. `Process::run` steps the top
//! frame until the process ends, suspends, terminates, or fails.

mod execution;
mod frame;
mod opcodes;
mod ops;
mod process;

pub use execution::{ProcessObserver, Step, SuspendReason};
pub use frame::{ExceptionHandlerRecord, ExecutionFrame};
pub use process::{Process, ProcessError, ProcessId, ProcessKind, ProcessState};
