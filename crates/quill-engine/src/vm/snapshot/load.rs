//! Load contexts

use crate::compiler::bytecode::CodeRef;
use crate::vm::context::ContextRef;
use crate::vm::interpreter::{Process, ProcessId};
use crate::vm::scheduler::ProcessList;
use crate::vm::sync::{Mutex, MutexListRef};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An entity a loader needs materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRequest<'a> {
    /// Code object by stream id
    Bytecode(u32),
    /// Array value by stream id
    Array(u32),
    /// Hash value by stream id
    Hash(u32),
    /// Structure value by stream id
    StructureValue(u32),
    /// Structure type by name
    StructureType(&'a str),
    /// Host context, identified by a host-defined tag and id
    Context {
        /// Host-defined kind of context
        tag: u32,
        /// Id within that kind
        id: u32,
    },
    /// Process by name
    Process {
        /// Name of the saved process
        name: &'a str,
    },
    /// Mutex by name
    Mutex {
        /// Lock name
        name: &'a str,
        /// Lock note
        note: &'a str,
        /// The saved mutex had an owner
        owned: bool,
    },
}

/// A materialized entity
#[derive(Clone)]
pub enum Loaded {
    /// Array, hash, or structure value
    Value(Value),
    /// Code object
    Bytecode(CodeRef),
    /// Host context
    Context(ContextRef),
    /// Process in the target list
    Process(ProcessId),
    /// Mutex holding one reference for the caller
    Mutex(Arc<Mutex>),
}

impl fmt::Debug for Loaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loaded::Value(value) => write!(f, "Value({:?})", value),
            Loaded::Bytecode(code) => {
                write!(f, "Bytecode({:?})", code.read().subroutine_name())
            }
            Loaded::Context(context) => write!(f, "Context({})", context.describe()),
            Loaded::Process(id) => write!(f, "Process({})", id),
            Loaded::Mutex(mutex) => write!(f, "Mutex({})", mutex.name()),
        }
    }
}

/// Source of entities referenced by a stream being loaded
pub trait LoadContext {
    /// Answer a request; `None` refuses it
    fn load(&mut self, request: LoadRequest<'_>) -> Option<Loaded>;

    /// Load a code object
    fn load_bytecode(&mut self, id: u32) -> VmResult<CodeRef> {
        match self.load(LoadRequest::Bytecode(id)) {
            Some(Loaded::Bytecode(code)) => Ok(code),
            _ => Err(VmError::EntityUnavailable(format!("bytecode {}", id))),
        }
    }

    /// Load a host context
    fn load_context(&mut self, tag: u32, id: u32) -> VmResult<ContextRef> {
        match self.load(LoadRequest::Context { tag, id }) {
            Some(Loaded::Context(context)) => Ok(context),
            _ => Err(VmError::EntityUnavailable(format!("context {}:{}", tag, id))),
        }
    }

    /// Load a process
    fn load_process(&mut self, name: &str) -> VmResult<ProcessId> {
        match self.load(LoadRequest::Process { name }) {
            Some(Loaded::Process(id)) => Ok(id),
            _ => Err(VmError::EntityUnavailable(format!("process {}", name))),
        }
    }

    /// Load a mutex
    fn load_mutex(&mut self, name: &str, note: &str, owned: bool) -> VmResult<Arc<Mutex>> {
        match self.load(LoadRequest::Mutex { name, note, owned }) {
            Some(Loaded::Mutex(mutex)) => Ok(mutex),
            _ => Err(VmError::EntityUnavailable(format!("mutex {}", name))),
        }
    }
}

/// Refuses every request
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLoadContext;

impl LoadContext for NullLoadContext {
    fn load(&mut self, request: LoadRequest<'_>) -> Option<Loaded> {
        debug!(?request, "load refused");
        None
    }
}

/// Materializes mutexes owned by one process
///
/// Other requests go to the parent context.
pub struct ProcessLoadContext<'a> {
    parent: &'a mut dyn LoadContext,
    mutexes: MutexListRef,
    owner: ProcessId,
}

impl<'a> ProcessLoadContext<'a> {
    /// Bind to `process` and its lock registry
    pub fn new(parent: &'a mut dyn LoadContext, process: &Process) -> Self {
        Self {
            parent,
            mutexes: process.mutex_list().clone(),
            owner: process.id(),
        }
    }
}

impl LoadContext for ProcessLoadContext<'_> {
    fn load(&mut self, request: LoadRequest<'_>) -> Option<Loaded> {
        match request {
            LoadRequest::Mutex { name, note, owned } => {
                let owner = owned.then_some(self.owner);
                load_mutex(&self.mutexes, name, note, owner)
            }
            other => self.parent.load(other),
        }
    }
}

/// Materializes processes and unowned mutexes in a process list
///
/// Other requests go to the parent context.
pub struct WorldLoadContext<'a> {
    parent: &'a mut dyn LoadContext,
    list: &'a mut ProcessList,
}

impl<'a> WorldLoadContext<'a> {
    /// Bind to `list` and its lock registry
    pub fn new(parent: &'a mut dyn LoadContext, list: &'a mut ProcessList) -> Self {
        Self { parent, list }
    }
}

impl LoadContext for WorldLoadContext<'_> {
    fn load(&mut self, request: LoadRequest<'_>) -> Option<Loaded> {
        match request {
            LoadRequest::Process { name } => Some(Loaded::Process(self.list.create(name).id())),
            LoadRequest::Mutex { name, note, .. } => {
                let mutexes = self.list.mutex_list().clone();
                load_mutex(&mutexes, name, note, None)
            }
            other => self.parent.load(other),
        }
    }
}

fn load_mutex(
    mutexes: &MutexListRef,
    name: &str,
    note: &str,
    owner: Option<ProcessId>,
) -> Option<Loaded> {
    match mutexes.load(name, note, owner) {
        Ok(mutex) => Some(Loaded::Mutex(mutex)),
        Err(error) => {
            debug!(name, %error, "mutex load refused");
            None
        }
    }
}
