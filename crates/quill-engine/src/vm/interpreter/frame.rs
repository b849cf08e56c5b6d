//! Activation records and catch scopes

use crate::compiler::bytecode::CodeRef;
use crate::vm::value::Value;
use parking_lot::RwLock;
use std::sync::Arc;

/// Local variable slots of a frame
///
/// Shared so that frame views handed to other processes see live values.
pub(crate) type LocalSlots = Arc<RwLock<Vec<Value>>>;

/// One activation of a code object
///
/// The depth fields snapshot the process's stacks when the frame was
/// pushed; popping the frame truncates them back.
#[derive(Debug, Clone)]
pub struct ExecutionFrame {
    /// Code being executed
    pub code: CodeRef,
    /// Next instruction
    pub pc: usize,
    /// Local variable slots, one per local name
    pub(crate) locals: LocalSlots,
    /// Position of this frame in the frame stack
    pub frame_index: usize,
    /// Context stack depth at entry
    pub context_sp: usize,
    /// Contexts visible to this frame
    pub context_tos: usize,
    /// Exception stack depth at entry
    pub exception_sp: usize,
    /// Value stack depth at entry
    pub value_sp: usize,
    /// Popping this frame must leave one value for the caller
    pub want_result: bool,
}

impl ExecutionFrame {
    pub(crate) fn new(
        code: CodeRef,
        num_locals: usize,
        frame_index: usize,
        context_sp: usize,
        exception_sp: usize,
        value_sp: usize,
        want_result: bool,
    ) -> Self {
        Self {
            code,
            pc: 0,
            locals: Arc::new(RwLock::new(vec![Value::Null; num_locals])),
            frame_index,
            context_sp,
            context_tos: context_sp,
            exception_sp,
            value_sp,
            want_result,
        }
    }

    /// Read a local slot
    pub fn local(&self, index: usize) -> Option<Value> {
        self.locals.read().get(index).cloned()
    }

    /// Write a local slot; false if out of range
    pub fn set_local(&self, index: usize, value: Value) -> bool {
        match self.locals.write().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Copy of all local slots
    pub fn locals(&self) -> Vec<Value> {
        self.locals.read().clone()
    }

    /// Index of the instruction being (or last) executed
    pub fn current_pc(&self) -> usize {
        self.pc.saturating_sub(1)
    }

    /// Source line of the instruction at `pc`
    ///
    /// `None` once `pc` is past the last instruction (the implicit return).
    pub fn line(&self) -> Option<u32> {
        let code = self.code.read();
        if self.pc >= code.len() {
            return None;
        }
        code.line_for(self.pc)
    }
}

/// Catch scope installed by a `catch` jump or by the host
///
/// On error the process unwinds its stacks to these depths and continues
/// at `pc` with the error message on the value stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandlerRecord {
    /// Catch target in the handler's frame
    pub pc: usize,
    /// Frame stack depth to restore (the handler's frame stays on top)
    pub frame_sp: usize,
    /// Context stack depth to restore
    pub context_sp: usize,
    /// Value stack depth to restore
    pub value_sp: usize,
}
