//! Process: the execution engine

use super::execution::{ProcessObserver, Step};
use super::frame::{ExceptionHandlerRecord, ExecutionFrame};
use crate::compiler::bytecode::CodeRef;
use crate::config::ProcessLimits;
use crate::vm::context::{ContextRef, FrameView, InvalidationSignal, ObjectId};
use crate::vm::defaults::{DEFAULT_PRIORITY, NO_PROCESS_GROUP};
use crate::vm::sync::MutexListRef;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Unique identifier for a process within its list
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Get the numeric ID value
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Create a ProcessId from a u32 value (for deserialization)
    pub fn from_u32(id: u32) -> Self {
        ProcessId(id)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Not scheduled; must be resumed to run
    Suspended,
    /// Held by an inspector; not executed or rescheduled
    Frozen,
    /// Ready to run when its group reaches it
    Runnable,
    /// Currently executing (at most one system-wide)
    Running,
    /// Blocking its group until continued
    Waiting,
    /// Finished normally
    Ended,
    /// Stopped by a terminate request or statement
    Terminated,
    /// Finished with an uncaught error
    Failed,
}

impl ProcessState {
    /// Check whether the process can never run again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Ended | ProcessState::Terminated | ProcessState::Failed
        )
    }
}

/// Process kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessKind {
    /// Ordinary script process
    #[default]
    Default,
    /// Process driven by an auto-task editor
    AutoTask,
}

/// Uncaught script error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessError {
    /// Error message
    pub message: String,
    /// Innermost frame first
    pub trace: Vec<String>,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for line in &self.trace {
            write!(f, "\n  {}", line)?;
        }
        Ok(())
    }
}

/// A script process
///
/// Owns a frame stack, a context stack, an exception-handler stack, and one
/// value stack shared by all frames. The attribute setters only store data;
/// ordering and group bookkeeping belong to the
/// [`ProcessList`](crate::vm::scheduler::ProcessList).
pub struct Process {
    id: ProcessId,
    name: String,
    state: ProcessState,
    priority: i32,
    process_group_id: u32,
    kind: ProcessKind,

    pub(super) frames: Vec<ExecutionFrame>,
    pub(super) contexts: Vec<ContextRef>,
    pub(super) context_tos: usize,
    pub(super) exceptions: Vec<ExceptionHandlerRecord>,
    pub(super) values: Vec<Value>,

    result: Option<Value>,
    error: Option<ProcessError>,
    pending_error: Option<VmError>,
    finished_object: Option<ObjectId>,

    limits: ProcessLimits,
    pub(super) mutexes: MutexListRef,
    invalidate: Arc<InvalidationSignal>,
}

impl Process {
    /// Create a suspended process with no frames
    pub fn new(id: ProcessId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: ProcessState::Suspended,
            priority: DEFAULT_PRIORITY,
            process_group_id: NO_PROCESS_GROUP,
            kind: ProcessKind::Default,
            frames: Vec::new(),
            contexts: Vec::new(),
            context_tos: 0,
            exceptions: Vec::new(),
            values: Vec::new(),
            result: None,
            error: None,
            pending_error: None,
            finished_object: None,
            limits: ProcessLimits::default(),
            mutexes: MutexListRef::detached(),
            invalidate: Arc::new(InvalidationSignal::default()),
        }
    }

    /// Set resource limits
    pub fn set_limits(&mut self, limits: ProcessLimits) {
        self.limits = limits;
    }

    /// Resource limits
    pub fn limits(&self) -> ProcessLimits {
        self.limits
    }

    /// Attach the lock registry used by the `Lock` instruction
    pub fn set_mutex_list(&mut self, mutexes: MutexListRef) {
        self.mutexes = mutexes;
    }

    /// Lock registry handle
    pub fn mutex_list(&self) -> &MutexListRef {
        &self.mutexes
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Process ID
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Set state
    pub fn set_state(&mut self, state: ProcessState) {
        if self.state != state {
            trace!(process = %self.id, from = ?self.state, to = ?state, "state change");
        }
        self.state = state;
    }

    /// Scheduling priority (lower runs first)
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Set priority; the list must be told via `handle_priority_change`
    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Process group (0 = none)
    pub fn process_group_id(&self) -> u32 {
        self.process_group_id
    }

    /// Set process group
    pub fn set_process_group_id(&mut self, group: u32) {
        self.process_group_id = group;
    }

    /// Process kind
    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Set process kind
    pub fn set_kind(&mut self, kind: ProcessKind) {
        self.kind = kind;
    }

    /// Result of the bottom frame, if it was pushed with `want_result`
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Uncaught error of a failed process
    pub fn error(&self) -> Option<&ProcessError> {
        self.error.as_ref()
    }

    /// Object bound to the innermost context that has one
    ///
    /// A finished process reports the object it had when it finished.
    pub fn invoking_object(&self) -> Option<ObjectId> {
        self.contexts
            .iter()
            .rev()
            .find_map(|c| c.object())
            .or(self.finished_object)
    }

    // ========================================================================
    // Stacks
    // ========================================================================

    /// Frame stack, bottom first
    pub fn frames(&self) -> &[ExecutionFrame] {
        &self.frames
    }

    /// Innermost frame
    pub fn top_frame(&self) -> Option<&ExecutionFrame> {
        self.frames.last()
    }

    /// Value stack, bottom first
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Exception handlers, outermost first
    pub fn exception_handlers(&self) -> &[ExceptionHandlerRecord] {
        &self.exceptions
    }

    /// Push a value onto the value stack
    pub fn push_value(&mut self, value: Value) -> VmResult<()> {
        if self.values.len() >= self.limits.max_values {
            return Err(VmError::StackOverflow);
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop a value belonging to the current frame
    pub fn pop_value(&mut self) -> VmResult<Value> {
        if self.values.len() <= self.value_floor() {
            return Err(VmError::StackUnderflow);
        }
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    pub(super) fn value_floor(&self) -> usize {
        self.frames.last().map_or(0, |f| f.value_sp)
    }

    /// Push a frame executing `code` from its first instruction
    ///
    /// Code that still has symbolic labels is relocated first.
    pub fn push_frame(&mut self, code: CodeRef, want_result: bool) -> VmResult<()> {
        if self.frames.len() >= self.limits.max_frames {
            return Err(VmError::StackOverflow);
        }
        if code.read().needs_relocation() {
            code.write().relocate();
        }
        let num_locals = code.read().local_names().len();
        let frame = ExecutionFrame::new(
            code,
            num_locals,
            self.frames.len(),
            self.contexts.len(),
            self.exceptions.len(),
            self.values.len(),
            want_result,
        );
        self.context_tos = frame.context_tos;
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame
    ///
    /// Truncates all stacks to the frame's entry depths. If the frame was
    /// pushed with `want_result`, the value on top of its stack (or the
    /// empty value) is handed to the caller, or becomes the process result
    /// when no caller is left. Returns false if there was no frame.
    pub fn pop_frame(&mut self) -> bool {
        self.return_from_frame(None)
    }

    pub(super) fn return_from_frame(&mut self, value: Option<Value>) -> bool {
        let Some(frame) = self.frames.pop() else {
            return false;
        };
        let value = value.or_else(|| {
            (self.values.len() > frame.value_sp)
                .then(|| self.values.pop())
                .flatten()
        });
        self.values.truncate(frame.value_sp);
        self.contexts.truncate(frame.context_sp);
        self.exceptions.truncate(frame.exception_sp);
        self.context_tos = self
            .frames
            .last()
            .map_or(0, |f| f.context_tos.min(self.contexts.len()));

        if frame.want_result {
            let value = value.unwrap_or_default();
            if self.frames.is_empty() {
                self.result = Some(value);
            } else {
                self.values.push(value);
            }
        }
        true
    }

    // ========================================================================
    // Exception handlers
    // ========================================================================

    /// Install a handler catching into the current frame at `pc`
    pub fn push_exception_handler(&mut self, pc: usize) {
        let record = ExceptionHandlerRecord {
            pc,
            frame_sp: self.frames.len(),
            context_sp: self.contexts.len(),
            value_sp: self.values.len(),
        };
        self.exceptions.push(record);
    }

    /// Install a handler with explicit rollback depths
    pub fn push_exception_handler_at(
        &mut self,
        pc: usize,
        frame_sp: usize,
        context_sp: usize,
        value_sp: usize,
    ) {
        self.exceptions.push(ExceptionHandlerRecord {
            pc,
            frame_sp,
            context_sp,
            value_sp,
        });
    }

    /// Remove the innermost handler of the current frame
    pub fn pop_exception_handler(&mut self) -> Option<ExceptionHandlerRecord> {
        let floor = self.frames.last().map_or(0, |f| f.exception_sp);
        if self.exceptions.len() > floor {
            self.exceptions.pop()
        } else {
            None
        }
    }

    /// Route an error to the nearest handler
    ///
    /// Returns false (and fails the process) if no handler can take it.
    fn unwind(&mut self, error: VmError) -> bool {
        while let Some(handler) = self.exceptions.pop() {
            if handler.frame_sp == 0 || handler.frame_sp > self.frames.len() {
                continue;
            }
            self.frames.truncate(handler.frame_sp);
            self.contexts.truncate(handler.context_sp);
            self.values.truncate(handler.value_sp);

            let depth = self.contexts.len();
            if let Some(frame) = self.frames.last_mut() {
                frame.pc = handler.pc;
                frame.context_tos = frame.context_tos.min(depth);
                self.context_tos = frame.context_tos;
            }
            trace!(process = %self.id, pc = handler.pc, %error, "caught");
            self.values.push(Value::string(error.to_string()));
            return true;
        }
        self.fail(error);
        false
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    /// Push a name-resolution context
    pub fn push_context(&mut self, context: ContextRef) {
        self.contexts.push(context);
    }

    /// Pop the innermost context
    pub fn pop_context(&mut self) -> Option<ContextRef> {
        let context = self.contexts.pop();
        self.context_tos = self.context_tos.min(self.contexts.len());
        context
    }

    /// Context stack, bottom first
    pub fn contexts(&self) -> &[ContextRef] {
        &self.contexts
    }

    /// Resolve a name through the context stack, innermost first
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.contexts.iter().rev().find_map(|c| c.lookup(name))
    }

    /// Make every context currently on the stack visible to the top frame
    pub fn mark_context_tos(&mut self) -> usize {
        self.context_tos = self.contexts.len();
        if let Some(frame) = self.frames.last_mut() {
            frame.context_tos = self.context_tos;
        }
        self.context_tos
    }

    /// Depth of the contexts visible to the top frame
    pub fn get_context_tos(&self) -> usize {
        self.context_tos
    }

    /// Live view of a frame's namespace
    ///
    /// `level` counts from the innermost frame (0). The view resolves the
    /// frame's locals and the contexts visible to it, and stops resolving
    /// anything once this process runs again or is dropped.
    pub fn make_frame_context(&self, level: usize) -> Option<ContextRef> {
        let index = self.frames.len().checked_sub(level + 1)?;
        let frame = &self.frames[index];
        let code = frame.code.read();
        let visible = frame.context_tos.min(self.contexts.len());
        let view: ContextRef = Arc::new(FrameView::new(
            code.subroutine_name().to_string(),
            Arc::downgrade(&frame.locals),
            code.local_names().to_vec(),
            self.contexts[..visible].to_vec(),
            self.invalidate.token(),
        ));
        Some(view)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run until the process ends, suspends, terminates, or fails
    ///
    /// Frozen and finished processes are left untouched. The observer, if
    /// any, sees the process before every instruction.
    pub fn run(&mut self, observer: Option<&mut dyn ProcessObserver>) {
        self.execute(observer, false);
    }

    /// Run to completion without yielding
    ///
    /// A suspension request raises "Cannot suspend here" inside the script
    /// instead. Returns true if the process ended normally.
    pub fn run_temporary(&mut self, observer: Option<&mut dyn ProcessObserver>) -> bool {
        self.execute(observer, true);
        self.state == ProcessState::Ended
    }

    fn execute(&mut self, mut observer: Option<&mut dyn ProcessObserver>, temporary: bool) {
        if self.state == ProcessState::Frozen || self.state.is_terminal() {
            debug!(process = %self.id, state = ?self.state, "not runnable");
            return;
        }
        self.invalidate.raise();
        self.set_state(ProcessState::Running);

        if let Some(error) = self.pending_error.take() {
            if !self.unwind(error) {
                return;
            }
        }

        loop {
            if self.frames.is_empty() {
                self.finish(ProcessState::Ended);
                return;
            }
            if let Some(observer) = observer.as_mut() {
                observer.add_process_state(self);
            }

            match self.step() {
                Step::Continue => {}
                Step::Return(value) => {
                    self.return_from_frame(value);
                }
                Step::Suspend(_) if temporary => {
                    if !self.unwind(VmError::CannotSuspend) {
                        return;
                    }
                }
                Step::Suspend(reason) => {
                    self.set_state(reason.state());
                    debug!(process = %self.id, ?reason, "suspended");
                    return;
                }
                Step::Terminate => {
                    self.finish(ProcessState::Terminated);
                    return;
                }
                Step::Fail(error) => {
                    if !self.unwind(error) {
                        return;
                    }
                }
            }
        }
    }

    /// Raise `error` inside the script when it next runs
    pub(crate) fn set_pending_error(&mut self, error: VmError) {
        self.pending_error = Some(error);
    }

    /// Fail without running any more script code
    pub(crate) fn force_failure(&mut self, message: impl Into<String>) {
        self.error = Some(ProcessError {
            message: message.into(),
            trace: self.build_trace(),
        });
        self.finish(ProcessState::Failed);
    }

    /// Terminate without running any more script code
    pub(crate) fn terminate(&mut self) {
        self.finish(ProcessState::Terminated);
    }

    fn fail(&mut self, error: VmError) {
        debug!(process = %self.id, %error, "uncaught error");
        self.error = Some(ProcessError {
            message: error.to_string(),
            trace: self.build_trace(),
        });
        self.finish(ProcessState::Failed);
    }

    fn build_trace(&self) -> Vec<String> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let code = frame.code.read();
                let name = match code.subroutine_name() {
                    "" => "<anonymous>",
                    name => name,
                };
                match code.line_for(frame.current_pc()) {
                    Some(line) => format!("in {}, line {}", name, line),
                    None => format!("in {}", name),
                }
            })
            .collect()
    }

    fn finish(&mut self, state: ProcessState) {
        self.finished_object = self.invoking_object();
        self.frames.clear();
        self.contexts.clear();
        self.exceptions.clear();
        self.values.clear();
        self.context_tos = 0;
        self.set_state(state);
        debug!(process = %self.id, name = %self.name, ?state, "process finished");
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.invalidate.raise();
        self.mutexes.disown_locks_by_process(self.id);
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("group", &self.process_group_id)
            .field("frames", &self.frames.len())
            .finish()
    }
}
