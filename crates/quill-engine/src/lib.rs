//! Quill Script Engine
//!
//! This crate provides the execution core of the Quill scripting language:
//! - **Bytecode**: `CodeObject` containers with literal/name/local tables,
//!   symbolic labels, and a sparse line map (`compiler::bytecode`)
//! - **Interpreter**: `Process`, a stack machine with frames, contexts and
//!   exception handlers (`vm::interpreter`)
//! - **Scheduler**: `ProcessList`, group-sequential cooperative scheduling
//!   (`vm::scheduler`)
//! - **Locks**: `MutexList`, named reference-counted cooperative locks
//!   (`vm::sync`)
//! - **Coverage**: `CoverageRecorder`, an lcov-emitting process observer
//!   (`vm::coverage`)
//! - **Snapshots**: `LoadContext`/`SaveContext`, the interfaces a host
//!   serializer uses to resolve entities (`vm::snapshot`)
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_engine::{CodeObject, Opcode, ProcessList, Value};
//!
//! let mut code = CodeObject::new();
//! code.add_push_literal(Value::from(42))?;
//! code.add_instruction(Opcode::Return(1));
//!
//! let mut list = ProcessList::new();
//! let pid = list.create("main").id();
//! list.get_process_by_id_mut(pid).unwrap().push_frame(code.into_ref(), true)?;
//! let group = list.allocate_process_group();
//! list.resume_process(pid, group);
//! list.start_process_group(group);
//! list.run(None);
//! let result = list.get_process_by_id(pid).and_then(|p| p.result()).and_then(Value::as_int);
//! assert_eq!(result, Some(42));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

/// Compiler-side structures: bytecode container and instruction set
pub mod compiler;

/// Engine configuration
pub mod config;

/// VM module: values, interpreter, scheduler, locks, coverage
pub mod vm;

// ============================================================================
// Re-exports
// ============================================================================

pub use compiler::bytecode::{
    BinaryOp, CodeError, CodeObject, CodeRef, Jump, JumpCondition, Opcode, SpecialOp, UnaryOp,
};
pub use config::{ConfigError, EngineConfig, ProcessLimits};
pub use vm::context::{Context, ContextRef, ObjectId, VariableContext};
pub use vm::coverage::CoverageRecorder;
pub use vm::interpreter::{
    ExceptionHandlerRecord, ExecutionFrame, Process, ProcessError, ProcessId, ProcessKind,
    ProcessObserver, ProcessState, Step, SuspendReason,
};
pub use vm::scheduler::{ProcessList, SchedulerEvent};
pub use vm::snapshot::{
    IdentitySaveContext, LoadContext, LoadRequest, Loaded, NullLoadContext, ProcessLoadContext,
    SaveContext, WorldLoadContext,
};
pub use vm::sync::{LockValue, Mutex, MutexList, MutexListRef};
pub use vm::value::Value;
pub use vm::{VmError, VmResult};
