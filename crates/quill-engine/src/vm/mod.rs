//! Quill VM Runtime
//!
//! This module provides the runtime half of the engine:
//! - Script values and name-resolution contexts
//! - The process interpreter (frames, contexts, exception handlers)
//! - The cooperative process-group scheduler
//! - Named cooperative locks
//! - Coverage recording
//! - The load/save boundary used by state (de)serialization

pub mod context;
pub mod coverage;
pub mod defaults;
pub mod interpreter;
pub mod scheduler;
pub mod snapshot;
pub mod sync;
pub mod value;

pub use context::{Context, ContextRef, ObjectId};
pub use interpreter::{Process, ProcessId, ProcessState};
pub use scheduler::ProcessList;
pub use sync::{Mutex, MutexList};
pub use value::Value;

/// Script runtime errors
///
/// Every variant is recoverable by the script through its exception-handler
/// stack. An error that reaches the bottom of a process's handler stack
/// finalizes the process as `Failed`; it never propagates further.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Name not found in any active context
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// Operand refers outside the code object's tables
    #[error("Invalid {table} index {index}")]
    InvalidOperand {
        /// Which table was addressed
        table: &'static str,
        /// The offending index
        index: usize,
    },

    /// Fewer arguments than the callee's minimum
    #[error("Too few arguments")]
    TooFewArguments,

    /// More arguments than the callee's maximum
    #[error("Too many arguments")]
    TooManyArguments,

    /// Integer division by zero
    #[error("Division by zero")]
    DivisionByZero,

    /// A live lock with this name already exists
    #[error("Already locked")]
    AlreadyLocked,

    /// A lock is owned by a different process
    #[error("Incompatible locks")]
    IncompatibleLocks,

    /// Suspension requested where the caller cannot yield
    #[error("Cannot suspend here")]
    CannotSuspend,

    /// Error raised by the script itself
    #[error("{0}")]
    UserError(String),

    /// A collaborator (lock registry, load context) is gone or refused
    #[error("Entity unavailable: {0}")]
    EntityUnavailable(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
