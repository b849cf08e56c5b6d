//! Compiler-side structures
//!
//! Code generation itself lives outside this crate; what remains here is the
//! bytecode container that code generators fill and processes execute.

pub mod bytecode;

pub use bytecode::{CodeError, CodeObject, CodeRef, Opcode};
