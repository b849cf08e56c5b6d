//! Save contexts

use crate::compiler::bytecode::CodeRef;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Sink-side bookkeeping for a stream being saved
pub trait SaveContext {
    /// Stable id of a code object; the first request assigns it
    fn code_id(&mut self, code: &CodeRef) -> u32;

    /// Id of a code object that has already been assigned one
    fn existing_code_id(&self, code: &CodeRef) -> Option<u32>;
}

/// Assigns ids to code objects by identity, in first-seen order
#[derive(Default)]
pub struct IdentitySaveContext {
    ids: FxHashMap<usize, u32>,
    codes: Vec<CodeRef>,
}

impl IdentitySaveContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Code objects in id order
    pub fn codes(&self) -> &[CodeRef] {
        &self.codes
    }

    /// Number of ids assigned
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Check if no id has been assigned
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl SaveContext for IdentitySaveContext {
    fn code_id(&mut self, code: &CodeRef) -> u32 {
        let key = Arc::as_ptr(code) as usize;
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        let id = self.codes.len() as u32;
        self.ids.insert(key, id);
        self.codes.push(code.clone());
        id
    }

    fn existing_code_id(&self, code: &CodeRef) -> Option<u32> {
        self.ids.get(&(Arc::as_ptr(code) as usize)).copied()
    }
}
