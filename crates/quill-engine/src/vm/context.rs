//! Name-resolution contexts
//!
//! A process keeps a stack of contexts; `PushName`/`StoreName` search it
//! from the top down. Hosts supply their own contexts (object namespaces,
//! globals) by implementing [`Context`].
//!
//! [`FrameView`] is the context handed out by
//! [`Process::make_frame_context`](crate::vm::interpreter::Process::make_frame_context):
//! it exposes one frame's locals plus the contexts that frame could see,
//! and goes dark as soon as the observed process runs again or is dropped.

use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Shared handle to a context
pub type ContextRef = Arc<dyn Context>;

/// Host object identifier
///
/// Contexts bound to a host object report it through [`Context::object`];
/// the scheduler uses it to find processes by object and to notify objects
/// when their processes are reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A name-resolution scope
pub trait Context: Send + Sync {
    /// Resolve a name
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Assign to an existing name
    ///
    /// Returns `Ok(false)` if this context does not define `name`, so the
    /// search continues further down the stack.
    fn assign(&self, _name: &str, _value: &Value) -> VmResult<bool> {
        Ok(false)
    }

    /// Host object this context is bound to
    fn object(&self) -> Option<ObjectId> {
        None
    }

    /// Short description for diagnostics
    fn describe(&self) -> String;
}

// ============================================================================
// VariableContext
// ============================================================================

/// A plain table of named variables
pub struct VariableContext {
    name: String,
    object: Option<ObjectId>,
    vars: RwLock<FxHashMap<String, Value>>,
}

impl VariableContext {
    /// Create an empty context
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object: None,
            vars: RwLock::new(FxHashMap::default()),
        }
    }

    /// Create an empty context bound to a host object
    pub fn bound_to(name: impl Into<String>, object: ObjectId) -> Self {
        Self {
            object: Some(object),
            ..Self::new(name)
        }
    }

    /// Define or overwrite a variable
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.vars.write().insert(name.into(), value);
    }

    /// Wrap into a shared handle
    pub fn into_ref(self) -> ContextRef {
        Arc::new(self)
    }
}

impl Context for VariableContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.vars.read().get(name).cloned()
    }

    fn assign(&self, name: &str, value: &Value) -> VmResult<bool> {
        match self.vars.write().get_mut(name) {
            Some(slot) => {
                *slot = value.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn object(&self) -> Option<ObjectId> {
        self.object
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

// ============================================================================
// Invalidation
// ============================================================================

/// Generation counter a process bumps whenever views of it become stale
#[derive(Debug, Default)]
pub struct InvalidationSignal {
    generation: AtomicU64,
}

impl InvalidationSignal {
    /// Invalidate every token issued so far
    pub fn raise(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Issue a token valid until the next `raise`
    pub fn token(self: &Arc<Self>) -> InvalidationToken {
        InvalidationToken {
            signal: Arc::downgrade(self),
            generation: self.generation.load(Ordering::Acquire),
        }
    }
}

/// Validity token issued by an [`InvalidationSignal`]
#[derive(Debug, Clone)]
pub struct InvalidationToken {
    signal: Weak<InvalidationSignal>,
    generation: u64,
}

impl InvalidationToken {
    /// Check that the signal has not been raised since issue
    pub fn is_valid(&self) -> bool {
        self.signal
            .upgrade()
            .is_some_and(|s| s.generation.load(Ordering::Acquire) == self.generation)
    }
}

// ============================================================================
// FrameView
// ============================================================================

/// Live view of a suspended process's frame
///
/// Names resolve against the frame's locals first, then against the
/// contexts that were visible when the frame started, innermost first.
pub struct FrameView {
    name: String,
    locals: Weak<RwLock<Vec<Value>>>,
    local_names: Vec<String>,
    visible: Vec<ContextRef>,
    token: InvalidationToken,
}

impl FrameView {
    pub(crate) fn new(
        name: String,
        locals: Weak<RwLock<Vec<Value>>>,
        local_names: Vec<String>,
        visible: Vec<ContextRef>,
        token: InvalidationToken,
    ) -> Self {
        Self {
            name,
            locals,
            local_names,
            visible,
            token,
        }
    }

    /// Check whether the observed frame is still suspended and alive
    pub fn is_valid(&self) -> bool {
        self.token.is_valid() && self.locals.strong_count() > 0
    }

    fn local_index(&self, name: &str) -> Option<usize> {
        self.local_names.iter().position(|n| n == name)
    }
}

impl Context for FrameView {
    fn lookup(&self, name: &str) -> Option<Value> {
        if !self.token.is_valid() {
            return None;
        }
        if let Some(index) = self.local_index(name) {
            let locals = self.locals.upgrade()?;
            let value = locals.read().get(index).cloned();
            return value;
        }
        self.visible.iter().rev().find_map(|c| c.lookup(name))
    }

    fn assign(&self, name: &str, value: &Value) -> VmResult<bool> {
        if !self.token.is_valid() {
            return Err(VmError::EntityUnavailable(self.describe()));
        }
        if let Some(index) = self.local_index(name) {
            let locals = self
                .locals
                .upgrade()
                .ok_or_else(|| VmError::EntityUnavailable(self.describe()))?;
            let mut locals = locals.write();
            if let Some(slot) = locals.get_mut(index) {
                *slot = value.clone();
                return Ok(true);
            }
            return Ok(false);
        }
        for context in self.visible.iter().rev() {
            if context.assign(name, value)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn object(&self) -> Option<ObjectId> {
        self.visible.iter().rev().find_map(|c| c.object())
    }

    fn describe(&self) -> String {
        format!("frame of {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_context() {
        let ctx = VariableContext::new("globals");
        ctx.define("x", Value::from(1));
        assert_eq!(ctx.lookup("x").and_then(|v| v.as_int()), Some(1));
        assert!(ctx.lookup("y").is_none());

        assert!(ctx.assign("x", &Value::from(2)).unwrap());
        assert!(!ctx.assign("y", &Value::from(2)).unwrap());
        assert_eq!(ctx.lookup("x").and_then(|v| v.as_int()), Some(2));
        assert_eq!(ctx.object(), None);
    }

    #[test]
    fn test_bound_context() {
        let ctx = VariableContext::bound_to("npc", ObjectId(7));
        assert_eq!(ctx.object(), Some(ObjectId(7)));
        assert_eq!(ctx.describe(), "npc");
    }

    #[test]
    fn test_invalidation_token() {
        let signal = Arc::new(InvalidationSignal::default());
        let token = signal.token();
        assert!(token.is_valid());
        signal.raise();
        assert!(!token.is_valid());
        assert!(signal.token().is_valid());

        let token = signal.token();
        drop(signal);
        assert!(!token.is_valid());
    }

    #[test]
    fn test_frame_view_resolution() {
        let signal = Arc::new(InvalidationSignal::default());
        let locals = Arc::new(RwLock::new(vec![Value::from(5)]));
        let outer = VariableContext::bound_to("outer", ObjectId(3));
        outer.define("g", Value::from("global"));

        let view = FrameView::new(
            "MAIN".to_string(),
            Arc::downgrade(&locals),
            vec!["a".to_string()],
            vec![outer.into_ref()],
            signal.token(),
        );

        assert_eq!(view.lookup("a").and_then(|v| v.as_int()), Some(5));
        assert_eq!(
            view.lookup("g").and_then(|v| v.as_str().map(String::from)),
            Some("global".to_string())
        );
        assert_eq!(view.object(), Some(ObjectId(3)));

        assert!(view.assign("a", &Value::from(6)).unwrap());
        assert_eq!(locals.read()[0].as_int(), Some(6));

        signal.raise();
        assert!(!view.is_valid());
        assert!(view.lookup("a").is_none());
        assert!(view.assign("a", &Value::Null).is_err());
    }
}
