//! Bytecode container
//!
//! A [`CodeObject`] holds one subroutine or function: its instructions,
//! the literal pool, the name table used by context lookups, the local
//! variable names, symbolic labels, and a sparse line map.
//!
//! Code objects are built by appending instructions, then `relocate()`d
//! (labels resolved to instruction indices) and optionally `compact()`ed.
//! After that they are treated as immutable and shared as [`CodeRef`].

use super::opcode::{Jump, JumpCondition, Opcode};
use crate::vm::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Maximum number of entries in the literal, name, and local tables
pub const MAX_TABLE_ENTRIES: usize = 65536;

/// Maximum number of labels
pub const MAX_LABELS: u32 = 65535;

/// Shared handle to a code object
///
/// The lock exists so that code objects under construction can reference
/// each other through their literal pools. Execution takes a read lock per
/// instruction.
pub type CodeRef = Arc<RwLock<CodeObject>>;

/// Code object build errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    /// Literal pool is full
    #[error("Too many literals (limit {})", MAX_TABLE_ENTRIES)]
    TooManyLiterals,

    /// Name table is full
    #[error("Too many names (limit {})", MAX_TABLE_ENTRIES)]
    TooManyNames,

    /// Local variable table is full
    #[error("Too many local variables (limit {})", MAX_TABLE_ENTRIES)]
    TooManyLocals,

    /// Label space is exhausted
    #[error("Too many labels (limit {})", MAX_LABELS)]
    TooManyLabels,
}

/// A compiled subroutine or function
#[derive(Clone, Default)]
pub struct CodeObject {
    /// Instructions
    code: Vec<Opcode>,
    /// Literal pool (deduplicated)
    literals: Vec<Value>,
    /// Names referenced by `PushName`/`StoreName`
    names: Vec<String>,
    /// Reverse lookup for `names`
    name_index: FxHashMap<String, u16>,
    /// Local variable names; arguments come first
    local_names: Vec<String>,
    /// Number of allocated labels
    num_labels: u32,
    /// Ascending (instruction index, line) pairs
    line_numbers: Vec<(u32, u32)>,
    /// Subroutine name (empty for anonymous code)
    subroutine_name: String,
    /// Source file name (empty if unknown)
    file_name: String,
    /// Minimum number of arguments
    min_args: usize,
    /// Maximum number of arguments
    max_args: usize,
    /// Accepts any number of arguments above `max_args`
    is_varargs: bool,
    /// Procedure (no result) rather than function
    is_procedure: bool,
}

impl CodeObject {
    /// Create an empty code object
    pub fn new() -> Self {
        Self {
            is_procedure: true,
            ..Self::default()
        }
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> CodeRef {
        Arc::new(RwLock::new(self))
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// Append an instruction, returning its index
    pub fn add_instruction(&mut self, op: Opcode) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    /// Add a literal to the pool and emit `PushLiteral` for it
    pub fn add_push_literal(&mut self, value: Value) -> Result<usize, CodeError> {
        let index = self.add_literal(value)?;
        Ok(self.add_instruction(Opcode::PushLiteral(index)))
    }

    /// Emit a jump to a label
    pub fn add_jump(&mut self, condition: JumpCondition, label: u16) -> usize {
        self.add_instruction(Opcode::Jump(Jump::to_label(condition, label)))
    }

    /// Emit a label definition
    pub fn add_label(&mut self, label: u16) -> usize {
        self.add_instruction(Opcode::Label(label))
    }

    /// Allocate a new label id
    pub fn make_label(&mut self) -> Result<u16, CodeError> {
        if self.num_labels >= MAX_LABELS {
            return Err(CodeError::TooManyLabels);
        }
        let label = self.num_labels as u16;
        self.num_labels += 1;
        Ok(label)
    }

    pub(super) fn clear_labels(&mut self) {
        self.num_labels = 0;
    }

    /// Number of allocated labels (0 after `relocate()`)
    pub fn num_labels(&self) -> u32 {
        self.num_labels
    }

    /// All instructions
    pub fn instructions(&self) -> &[Opcode] {
        &self.code
    }

    /// Instruction at an index
    pub fn instruction(&self, pc: usize) -> Option<Opcode> {
        self.code.get(pc).copied()
    }

    /// Mutable access to an instruction (for patching)
    pub fn instruction_mut(&mut self, pc: usize) -> Option<&mut Opcode> {
        self.code.get_mut(pc)
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if there are no instructions
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub(super) fn replace_code(&mut self, code: Vec<Opcode>) {
        self.code = code;
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Add a literal, reusing an identical existing entry
    pub fn add_literal(&mut self, value: Value) -> Result<u16, CodeError> {
        if let Some(index) = self.literals.iter().position(|v| v.same_literal(&value)) {
            return Ok(index as u16);
        }
        if self.literals.len() >= MAX_TABLE_ENTRIES {
            return Err(CodeError::TooManyLiterals);
        }
        self.literals.push(value);
        Ok((self.literals.len() - 1) as u16)
    }

    /// Literal by index
    pub fn literal(&self, index: u16) -> Option<&Value> {
        self.literals.get(usize::from(index))
    }

    /// The literal pool
    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    /// Add a name, reusing an existing entry
    pub fn add_name(&mut self, name: &str) -> Result<u16, CodeError> {
        if let Some(&index) = self.name_index.get(name) {
            return Ok(index);
        }
        if self.names.len() >= MAX_TABLE_ENTRIES {
            return Err(CodeError::TooManyNames);
        }
        let index = self.names.len() as u16;
        self.names.push(name.to_string());
        self.name_index.insert(name.to_string(), index);
        Ok(index)
    }

    /// Name by index
    pub fn name(&self, index: u16) -> Option<&str> {
        self.names.get(usize::from(index)).map(|s| s.as_str())
    }

    /// The name table
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Add a local variable, reusing an existing one of the same name
    pub fn add_local_variable(&mut self, name: &str) -> Result<u16, CodeError> {
        if let Some(index) = self.has_local_variable(name) {
            return Ok(index);
        }
        if self.local_names.len() >= MAX_TABLE_ENTRIES {
            return Err(CodeError::TooManyLocals);
        }
        self.local_names.push(name.to_string());
        Ok((self.local_names.len() - 1) as u16)
    }

    /// Index of a local variable
    pub fn has_local_variable(&self, name: &str) -> Option<u16> {
        self.local_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u16)
    }

    /// Local variable names
    pub fn local_names(&self) -> &[String] {
        &self.local_names
    }

    /// Declare an argument
    ///
    /// Arguments are the first locals. A mandatory argument after an
    /// optional one still counts towards `min_args` of the position it
    /// occupies, matching how callers fill slots left to right.
    pub fn add_argument(&mut self, name: &str, optional: bool) -> Result<u16, CodeError> {
        let index = self.add_local_variable(name)?;
        self.max_args += 1;
        if !optional {
            self.min_args = self.max_args;
        }
        Ok(index)
    }

    // ========================================================================
    // Line map
    // ========================================================================

    /// Record that code emitted from now on belongs to `line`
    pub fn add_line_number(&mut self, line: u32) {
        let pc = self.code.len() as u32;
        match self.line_numbers.last_mut() {
            Some(last) if last.0 == pc => last.1 = line,
            Some(last) if last.1 == line => {}
            _ => self.line_numbers.push((pc, line)),
        }
    }

    /// The (instruction index, line) table
    pub fn line_numbers(&self) -> &[(u32, u32)] {
        &self.line_numbers
    }

    pub(super) fn replace_line_numbers(&mut self, lines: Vec<(u32, u32)>) {
        self.line_numbers = lines;
    }

    /// Source line of an instruction
    pub fn line_for(&self, pc: usize) -> Option<u32> {
        let pc = pc as u32;
        let after = self.line_numbers.partition_point(|&(index, _)| index <= pc);
        after.checked_sub(1).map(|i| self.line_numbers[i].1)
    }

    /// First line of this code, if known
    pub fn first_line(&self) -> Option<u32> {
        self.line_numbers.first().map(|&(_, line)| line)
    }

    // ========================================================================
    // Signature
    // ========================================================================

    /// Subroutine name
    pub fn subroutine_name(&self) -> &str {
        &self.subroutine_name
    }

    /// Set subroutine name
    pub fn set_subroutine_name(&mut self, name: impl Into<String>) {
        self.subroutine_name = name.into();
    }

    /// Source file name
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Set source file name
    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = name.into();
    }

    /// Minimum number of arguments
    pub fn min_args(&self) -> usize {
        self.min_args
    }

    /// Set minimum number of arguments
    pub fn set_min_args(&mut self, n: usize) {
        self.min_args = n;
    }

    /// Maximum number of arguments
    pub fn max_args(&self) -> usize {
        self.max_args
    }

    /// Set maximum number of arguments
    pub fn set_max_args(&mut self, n: usize) {
        self.max_args = n;
    }

    /// Whether extra arguments are accepted
    pub fn is_varargs(&self) -> bool {
        self.is_varargs
    }

    /// Set varargs flag
    pub fn set_is_varargs(&mut self, flag: bool) {
        self.is_varargs = flag;
    }

    /// Whether this is a procedure (no result)
    pub fn is_procedure(&self) -> bool {
        self.is_procedure
    }

    /// Set procedure flag
    pub fn set_is_procedure(&mut self, flag: bool) {
        self.is_procedure = flag;
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Check whether executing this code may re-enter user code
    ///
    /// Callers use this to decide whether inline evaluation is safe.
    pub fn has_user_call(&self) -> bool {
        self.code.iter().any(Opcode::is_user_call)
    }

    /// Check whether labels still need resolving
    pub fn needs_relocation(&self) -> bool {
        self.num_labels > 0
            || self.code.iter().any(|op| match op {
                Opcode::Label(_) => true,
                Opcode::Jump(j) => j.symbolic,
                _ => false,
            })
    }

    /// Render all instructions for diagnostics
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut lines = self.line_numbers.iter().peekable();
        for (pc, op) in self.code.iter().enumerate() {
            while let Some(&&(index, line)) = lines.peek() {
                if index as usize > pc {
                    break;
                }
                let _ = writeln!(out, "  ; line {}", line);
                lines.next();
            }
            let _ = write!(out, "{:5}: {}", pc, op);
            match op {
                Opcode::PushLiteral(i) => {
                    if let Some(v) = self.literal(*i) {
                        let _ = write!(out, "  ({})", v.to_literal_string());
                    }
                }
                Opcode::PushName(i) | Opcode::StoreName(i) => {
                    if let Some(n) = self.name(*i) {
                        let _ = write!(out, "  ({})", n);
                    }
                }
                Opcode::PushLocal(i) | Opcode::StoreLocal(i) | Opcode::PopLocal(i) => {
                    if let Some(n) = self.local_names.get(usize::from(*i)) {
                        let _ = write!(out, "  ({})", n);
                    }
                }
                _ => {}
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Debug for CodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeObject")
            .field("name", &self.subroutine_name)
            .field("file", &self.file_name)
            .field("instructions", &self.code.len())
            .field("literals", &self.literals.len())
            .field("names", &self.names.len())
            .field("locals", &self.local_names.len())
            .field("labels", &self.num_labels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::SpecialOp;

    #[test]
    fn test_literal_dedup() {
        let mut code = CodeObject::new();
        let a = code.add_literal(Value::from(42)).unwrap();
        let b = code.add_literal(Value::from("x")).unwrap();
        assert_eq!(code.add_literal(Value::from(42)).unwrap(), a);
        assert_eq!(code.add_literal(Value::from("x")).unwrap(), b);
        assert_ne!(code.add_literal(Value::from(42.0)).unwrap(), a);
        assert_eq!(code.literals().len(), 3);
    }

    #[test]
    fn test_code_literal_dedup_by_identity() {
        let mut code = CodeObject::new();
        let sub = CodeObject::new().into_ref();
        let a = code.add_literal(Value::from(sub.clone())).unwrap();
        assert_eq!(code.add_literal(Value::from(sub)).unwrap(), a);
        let other = code
            .add_literal(Value::from(CodeObject::new().into_ref()))
            .unwrap();
        assert_ne!(other, a);
    }

    #[test]
    fn test_name_dedup_and_limit() {
        let mut code = CodeObject::new();
        let first = code.add_name("N0").unwrap();
        assert_eq!(code.add_name("N0").unwrap(), first);
        for i in 1..MAX_TABLE_ENTRIES {
            code.add_name(&format!("N{}", i)).unwrap();
        }
        assert_eq!(code.names().len(), MAX_TABLE_ENTRIES);
        assert_eq!(code.add_name("N65535").unwrap(), 65535);
        assert_eq!(code.add_name("ONE_MORE"), Err(CodeError::TooManyNames));
    }

    #[test]
    fn test_label_limit() {
        let mut code = CodeObject::new();
        for i in 0..MAX_LABELS {
            assert_eq!(code.make_label().unwrap() as u32, i);
        }
        assert_eq!(code.make_label(), Err(CodeError::TooManyLabels));
    }

    #[test]
    fn test_locals_and_arguments() {
        let mut code = CodeObject::new();
        assert_eq!(code.add_argument("A", false).unwrap(), 0);
        assert_eq!(code.add_argument("B", true).unwrap(), 1);
        assert_eq!(code.add_local_variable("T").unwrap(), 2);
        assert_eq!(code.add_local_variable("A").unwrap(), 0);
        assert_eq!(code.min_args(), 1);
        assert_eq!(code.max_args(), 2);
        assert_eq!(code.has_local_variable("T"), Some(2));
        assert_eq!(code.has_local_variable("Q"), None);
    }

    #[test]
    fn test_line_map() {
        let mut code = CodeObject::new();
        code.add_line_number(10);
        code.add_instruction(Opcode::Nop);
        code.add_instruction(Opcode::Nop);
        code.add_line_number(10);
        code.add_instruction(Opcode::Nop);
        code.add_line_number(12);
        code.add_line_number(13);
        code.add_instruction(Opcode::Nop);

        assert_eq!(code.line_numbers(), &[(0, 10), (3, 13)]);
        assert_eq!(code.line_for(0), Some(10));
        assert_eq!(code.line_for(2), Some(10));
        assert_eq!(code.line_for(3), Some(13));
        assert_eq!(code.line_for(100), Some(13));
        assert_eq!(code.first_line(), Some(10));

        let empty = CodeObject::new();
        assert_eq!(empty.line_for(0), None);
    }

    #[test]
    fn test_has_user_call() {
        let mut code = CodeObject::new();
        code.add_instruction(Opcode::Special(SpecialOp::Throw));
        assert!(!code.has_user_call());
        code.add_instruction(Opcode::Call {
            args: 1,
            want_result: true,
        });
        assert!(code.has_user_call());
    }

    #[test]
    fn test_disassemble() {
        let mut code = CodeObject::new();
        code.add_line_number(3);
        code.add_push_literal(Value::from("hi")).unwrap();
        let n = code.add_name("X").unwrap();
        code.add_instruction(Opcode::StoreName(n));

        let text = code.disassemble();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  ; line 3");
        assert_eq!(lines[1], "    0: pushlit   0  (\"hi\")");
        assert_eq!(lines[2], "    1: storevar  0  (X)");
    }
}
