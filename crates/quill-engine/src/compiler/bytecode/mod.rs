//! Quill Bytecode Definitions
//!
//! This module provides the instruction set and the `CodeObject` container
//! (instructions, literal pool, name tables, labels, line map).

pub mod code;
pub mod opcode;
mod relocate;

pub use code::{CodeError, CodeObject, CodeRef, MAX_LABELS, MAX_TABLE_ENTRIES};
pub use opcode::{BinaryOp, Jump, JumpCondition, Opcode, SpecialOp, UnaryOp};
