//! Bytecode opcodes for the Quill VM
//!
//! Instructions are a closed enum with inline operands. Table operands
//! (literals, names, locals) are 16 bit, which is where the table caps in
//! [`CodeObject`](super::CodeObject) come from.
//!
//! Opcodes are organized into groups:
//! - Stack: literals, locals, names, drop/dup
//! - Operators: binary and unary value operations
//! - Control flow: jumps, labels, catch
//! - Calls: call/return
//! - Special: throw, terminate, suspension, contexts, locks

use std::fmt;

/// Binary value operators (pop b, pop a, push a OP b)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Numeric addition
    Add,
    /// Numeric subtraction
    Sub,
    /// Numeric multiplication
    Mul,
    /// Numeric division
    Div,
    /// String concatenation
    Concat,
    /// Equality
    Eq,
    /// Inequality
    Ne,
    /// Less than
    Lt,
    /// Less or equal
    Le,
    /// Greater than
    Gt,
    /// Greater or equal
    Ge,
}

impl BinaryOp {
    /// Mnemonic for disassembly
    pub fn name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Concat => "concat",
            Self::Eq => "cmpeq",
            Self::Ne => "cmpne",
            Self::Lt => "cmplt",
            Self::Le => "cmple",
            Self::Gt => "cmpgt",
            Self::Ge => "cmpge",
        }
    }
}

/// Unary value operators (pop a, push OP a)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical negation
    Not,
    /// Arithmetic negation
    Neg,
    /// Test for the empty value
    IsEmpty,
}

impl UnaryOp {
    /// Mnemonic for disassembly
    pub fn name(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Neg => "neg",
            Self::IsEmpty => "isempty",
        }
    }
}

/// Special instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialOp {
    /// Remove the innermost exception handler
    Uncatch,
    /// Pop a value and raise it as an error
    Throw,
    /// End the process as `Terminated`
    Terminate,
    /// Suspend and block the process group until continued (`Waiting`)
    Suspend,
    /// Suspend and give up the group slot (`Suspended`)
    Stop,
    /// Pop a context value and push it onto the context stack
    With,
    /// Pop the innermost context pushed by this frame
    EndWith,
    /// Pop note, pop name; acquire a lock and push it as a value
    Lock,
}

impl SpecialOp {
    /// Mnemonic for disassembly
    pub fn name(self) -> &'static str {
        match self {
            Self::Uncatch => "uncatch",
            Self::Throw => "throw",
            Self::Terminate => "terminate",
            Self::Suspend => "suspend",
            Self::Stop => "stop",
            Self::With => "with",
            Self::EndWith => "endwith",
            Self::Lock => "lock",
        }
    }
}

/// Jump condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpCondition {
    /// Unconditional
    Always,
    /// Top of stack is true
    IfTrue,
    /// Top of stack is false
    IfFalse,
    /// Top of stack is empty
    IfEmpty,
    /// Install an exception handler whose catch target is the jump target
    Catch,
}

/// Jump instruction operand
///
/// While `symbolic` is set, `target` is a label id; `relocate()` turns it
/// into an absolute instruction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Jump {
    /// When to jump
    pub condition: JumpCondition,
    /// Pop the tested value (or, for `Always`/`Catch`, the top value)
    pub pop: bool,
    /// `target` is a label id rather than an instruction index
    pub symbolic: bool,
    /// Label id or instruction index
    pub target: u32,
}

impl Jump {
    /// Jump to a label
    pub fn to_label(condition: JumpCondition, label: u16) -> Self {
        Self {
            condition,
            pop: false,
            symbolic: true,
            target: u32::from(label),
        }
    }

    /// Jump to an absolute instruction index
    pub fn to_index(condition: JumpCondition, target: u32) -> Self {
        Self {
            condition,
            pop: false,
            symbolic: false,
            target,
        }
    }

    /// Set the pop flag
    pub fn popping(mut self) -> Self {
        self.pop = true;
        self
    }

    /// Mnemonic for disassembly
    pub fn name(&self) -> &'static str {
        match (self.condition, self.pop) {
            (JumpCondition::Always, false) => "j",
            (JumpCondition::Always, true) => "jdrop",
            (JumpCondition::IfTrue, false) => "jt",
            (JumpCondition::IfTrue, true) => "jtp",
            (JumpCondition::IfFalse, false) => "jf",
            (JumpCondition::IfFalse, true) => "jfp",
            (JumpCondition::IfEmpty, false) => "je",
            (JumpCondition::IfEmpty, true) => "jep",
            (JumpCondition::Catch, _) => "catch",
        }
    }
}

/// Bytecode instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop,
    /// Push literal from pool (operand: literal index)
    PushLiteral(u16),
    /// Push local variable (operand: local index)
    PushLocal(u16),
    /// Store top of stack to local, keep value
    StoreLocal(u16),
    /// Store top of stack to local, pop value
    PopLocal(u16),
    /// Resolve name through the context stack and push its value
    PushName(u16),
    /// Assign top of stack to a name through the context stack, keep value
    StoreName(u16),
    /// Binary operator
    Binary(BinaryOp),
    /// Unary operator
    Unary(UnaryOp),
    /// Discard n values
    Drop(u16),
    /// Duplicate the value n slots below the top (0 = top)
    Dup(u16),
    /// Conditional/unconditional jump or catch
    Jump(Jump),
    /// Symbolic label definition (operand: label id)
    Label(u16),
    /// Pop callee, then `args` arguments; push a frame
    Call {
        /// Number of arguments on the stack below the callee
        args: u16,
        /// The callee must leave exactly one value for the caller
        want_result: bool,
    },
    /// Return from the frame with n (0 or 1) values
    Return(u16),
    /// Special instruction
    Special(SpecialOp),
}

impl Opcode {
    /// Mnemonic for disassembly
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::PushLiteral(_) => "pushlit",
            Self::PushLocal(_) => "pushloc",
            Self::StoreLocal(_) => "storeloc",
            Self::PopLocal(_) => "poploc",
            Self::PushName(_) => "pushvar",
            Self::StoreName(_) => "storevar",
            Self::Binary(op) => op.name(),
            Self::Unary(op) => op.name(),
            Self::Drop(_) => "drop",
            Self::Dup(_) => "dup",
            Self::Jump(j) => j.name(),
            Self::Label(_) => "label",
            Self::Call {
                want_result: true, ..
            } => "callfunc",
            Self::Call { .. } => "callsub",
            Self::Return(_) => "ret",
            Self::Special(op) => op.name(),
        }
    }

    /// Check whether this is a jump (including catch)
    pub fn is_jump(&self) -> bool {
        matches!(self, Self::Jump(_))
    }

    /// Check whether this instruction can run user code
    pub fn is_user_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Self::PushLiteral(i)
            | Self::PushLocal(i)
            | Self::StoreLocal(i)
            | Self::PopLocal(i)
            | Self::PushName(i)
            | Self::StoreName(i)
            | Self::Drop(i)
            | Self::Dup(i)
            | Self::Return(i) => write!(f, "{:<10}{}", name, i),
            Self::Label(l) => write!(f, "{:<10}L{}", name, l),
            Self::Jump(j) if j.symbolic => write!(f, "{:<10}L{}", name, j.target),
            Self::Jump(j) => write!(f, "{:<10}#{}", name, j.target),
            Self::Call { args, .. } => write!(f, "{:<10}{}", name, args),
            _ => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_constructors() {
        let j = Jump::to_label(JumpCondition::IfTrue, 3);
        assert!(j.symbolic);
        assert_eq!(j.target, 3);
        assert!(!j.pop);

        let j = Jump::to_index(JumpCondition::Always, 17).popping();
        assert!(!j.symbolic);
        assert!(j.pop);
        assert_eq!(j.name(), "jdrop");
    }

    #[test]
    fn test_display() {
        assert_eq!(Opcode::PushLiteral(4).to_string(), "pushlit   4");
        assert_eq!(
            Opcode::Jump(Jump::to_label(JumpCondition::IfFalse, 2)).to_string(),
            "jf        L2"
        );
        assert_eq!(
            Opcode::Jump(Jump::to_index(JumpCondition::Catch, 9)).to_string(),
            "catch     #9"
        );
        assert_eq!(Opcode::Special(SpecialOp::Suspend).to_string(), "suspend");
        assert_eq!(Opcode::Binary(BinaryOp::Add).to_string(), "add");
    }

    #[test]
    fn test_user_call() {
        assert!(Opcode::Call {
            args: 0,
            want_result: false
        }
        .is_user_call());
        assert!(!Opcode::Special(SpecialOp::Throw).is_user_call());
    }
}
