//! Instruction dispatch

use super::execution::{Step, SuspendReason};
use super::ops;
use super::Process;
use crate::compiler::bytecode::{CodeRef, Jump, JumpCondition, Opcode, SpecialOp};
use crate::vm::sync::LockValue;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use tracing::trace;

impl Process {
    /// Execute the top frame's next instruction
    ///
    /// Running past the last instruction returns from the frame.
    pub(super) fn step(&mut self) -> Step {
        let Some(frame) = self.frames.last_mut() else {
            return Step::Return(None);
        };
        let code = frame.code.clone();
        let pc = frame.pc;
        let Some(op) = code.read().instruction(pc) else {
            return Step::Return(None);
        };
        frame.pc += 1;
        trace!(process = %self.id(), pc, %op, "step");

        match self.execute_op(&code, op) {
            Ok(step) => step,
            Err(error) => Step::Fail(error),
        }
    }

    fn execute_op(&mut self, code: &CodeRef, op: Opcode) -> VmResult<Step> {
        match op {
            Opcode::Nop | Opcode::Label(_) => {}

            Opcode::PushLiteral(index) => {
                let value = code.read().literal(index).cloned().ok_or(VmError::InvalidOperand {
                    table: "literal",
                    index: usize::from(index),
                })?;
                self.push_value(value)?;
            }

            Opcode::PushLocal(index) => {
                let value = self.current_frame()?.local(usize::from(index)).ok_or(
                    VmError::InvalidOperand {
                        table: "local",
                        index: usize::from(index),
                    },
                )?;
                self.push_value(value)?;
            }

            Opcode::StoreLocal(index) => {
                let value = self.peek_value()?;
                self.store_local(index, value)?;
            }

            Opcode::PopLocal(index) => {
                let value = self.pop_value()?;
                self.store_local(index, value)?;
            }

            Opcode::PushName(index) => {
                let name = name_operand(code, index)?;
                let value = self
                    .lookup(&name)
                    .ok_or(VmError::UnknownIdentifier(name))?;
                self.push_value(value)?;
            }

            Opcode::StoreName(index) => {
                let name = name_operand(code, index)?;
                let value = self.peek_value()?;
                let mut stored = false;
                for context in self.contexts.iter().rev() {
                    if context.assign(&name, &value)? {
                        stored = true;
                        break;
                    }
                }
                if !stored {
                    return Err(VmError::UnknownIdentifier(name));
                }
            }

            Opcode::Binary(op) => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                self.push_value(ops::binary(op, &a, &b)?)?;
            }

            Opcode::Unary(op) => {
                let a = self.pop_value()?;
                self.push_value(ops::unary(op, &a)?)?;
            }

            Opcode::Drop(n) => {
                let n = usize::from(n);
                if self.values.len() < self.value_floor() + n {
                    return Err(VmError::StackUnderflow);
                }
                let len = self.values.len() - n;
                self.values.truncate(len);
            }

            Opcode::Dup(depth) => {
                let depth = usize::from(depth);
                let floor = self.value_floor();
                let index = self
                    .values
                    .len()
                    .checked_sub(depth + 1)
                    .filter(|&i| i >= floor)
                    .ok_or(VmError::StackUnderflow)?;
                let value = self.values[index].clone();
                self.push_value(value)?;
            }

            Opcode::Jump(jump) => self.jump(code, jump)?,

            Opcode::Call { args, want_result } => self.call(usize::from(args), want_result)?,

            Opcode::Return(0) => return Ok(Step::Return(Some(Value::Null))),
            Opcode::Return(1) => return Ok(Step::Return(Some(self.pop_value()?))),
            Opcode::Return(n) => {
                return Err(VmError::RuntimeError(format!(
                    "cannot return {} values",
                    n
                )))
            }

            Opcode::Special(op) => return self.special(op),
        }
        Ok(Step::Continue)
    }

    fn special(&mut self, op: SpecialOp) -> VmResult<Step> {
        match op {
            SpecialOp::Uncatch => {
                self.pop_exception_handler()
                    .ok_or(VmError::StackUnderflow)?;
            }
            SpecialOp::Throw => {
                let value = self.pop_value()?;
                return Err(VmError::UserError(value.to_string()));
            }
            SpecialOp::Terminate => return Ok(Step::Terminate),
            SpecialOp::Suspend => return Ok(Step::Suspend(SuspendReason::Wait)),
            SpecialOp::Stop => return Ok(Step::Suspend(SuspendReason::Stop)),
            SpecialOp::With => match self.pop_value()? {
                Value::Context(context) => {
                    self.push_context(context);
                    self.mark_context_tos();
                }
                other => {
                    return Err(VmError::TypeError(format!(
                        "cannot use {} as a context",
                        other.type_name()
                    )))
                }
            },
            SpecialOp::EndWith => {
                let floor = self.current_frame()?.context_sp;
                if self.contexts.len() <= floor {
                    return Err(VmError::StackUnderflow);
                }
                self.pop_context();
                self.mark_context_tos();
            }
            SpecialOp::Lock => {
                let note = self.pop_value()?;
                let name = self.pop_value()?;
                let Some(name) = name.as_str() else {
                    return Err(VmError::TypeError(format!(
                        "lock name must be a string, not {}",
                        name.type_name()
                    )));
                };
                let note = if note.is_null() {
                    String::new()
                } else {
                    note.to_string()
                };
                let mutex = self.mutexes.create(name, &note, Some(self.id()))?;
                self.push_value(Value::Lock(LockValue::new(mutex)))?;
            }
        }
        Ok(Step::Continue)
    }

    fn jump(&mut self, code: &CodeRef, jump: Jump) -> VmResult<()> {
        if jump.symbolic {
            return Err(VmError::RuntimeError(format!(
                "unresolved label L{}",
                jump.target
            )));
        }
        let target = jump.target as usize;
        if target > code.read().len() {
            return Err(VmError::InvalidOperand {
                table: "jump target",
                index: target,
            });
        }

        let taken = match jump.condition {
            JumpCondition::Always => true,
            JumpCondition::Catch => {
                self.push_exception_handler(target);
                return Ok(());
            }
            JumpCondition::IfTrue => self.peek_value()?.truth() == Some(true),
            JumpCondition::IfFalse => !self.peek_value()?.truth().unwrap_or(false),
            JumpCondition::IfEmpty => self.peek_value()?.is_null(),
        };
        if jump.pop {
            self.pop_value()?;
        }
        if taken {
            if let Some(frame) = self.frames.last_mut() {
                frame.pc = target;
            }
        }
        Ok(())
    }

    fn call(&mut self, argc: usize, want_result: bool) -> VmResult<()> {
        let callee = match self.pop_value()? {
            Value::Code(code) => code,
            other => {
                return Err(VmError::TypeError(format!(
                    "cannot call {}",
                    other.type_name()
                )))
            }
        };
        {
            let code = callee.read();
            if argc < code.min_args() {
                return Err(VmError::TooFewArguments);
            }
            if argc > code.max_args() && !code.is_varargs() {
                return Err(VmError::TooManyArguments);
            }
        }
        if self.values.len() < self.value_floor() + argc {
            return Err(VmError::StackUnderflow);
        }
        let args = self.values.split_off(self.values.len() - argc);

        self.push_frame(callee, want_result)?;
        if let Some(frame) = self.frames.last() {
            let mut locals = frame.locals.write();
            if locals.len() < args.len() {
                locals.resize(args.len(), Value::Null);
            }
            for (slot, arg) in locals.iter_mut().zip(args) {
                *slot = arg;
            }
        }
        Ok(())
    }

    fn current_frame(&self) -> VmResult<&super::ExecutionFrame> {
        self.frames
            .last()
            .ok_or_else(|| VmError::RuntimeError("no active frame".to_string()))
    }

    fn peek_value(&self) -> VmResult<Value> {
        if self.values.len() <= self.value_floor() {
            return Err(VmError::StackUnderflow);
        }
        self.values.last().cloned().ok_or(VmError::StackUnderflow)
    }

    fn store_local(&mut self, index: u16, value: Value) -> VmResult<()> {
        if self.current_frame()?.set_local(usize::from(index), value) {
            Ok(())
        } else {
            Err(VmError::InvalidOperand {
                table: "local",
                index: usize::from(index),
            })
        }
    }
}

fn name_operand(code: &CodeRef, index: u16) -> VmResult<String> {
    code.read()
        .name(index)
        .map(str::to_owned)
        .ok_or(VmError::InvalidOperand {
            table: "name",
            index: usize::from(index),
        })
}
