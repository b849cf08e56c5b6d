//! Script value representation
//!
//! Values are cheap to clone: scalars are stored inline, everything else is
//! behind an `Arc`. `Null` is the "empty" value that most operations
//! propagate instead of failing on.

use crate::compiler::bytecode::{CodeObject, CodeRef};
use crate::vm::context::ContextRef;
use crate::vm::sync::LockValue;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A script value
#[derive(Clone, Default)]
pub enum Value {
    /// The empty value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// Floating-point number
    Float(f64),
    /// Immutable string
    Str(Arc<str>),
    /// Executable code (subroutine or function)
    Code(CodeRef),
    /// Name-resolution context (usable with `With`)
    Context(ContextRef),
    /// Held cooperative lock
    Lock(LockValue),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Wrap a code object
    pub fn code(code: CodeObject) -> Self {
        Value::Code(Arc::new(RwLock::new(code)))
    }

    /// Check if this value is empty
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Script truth value; `None` for the empty value
    ///
    /// Numbers are true when non-zero, strings when non-empty. Every other
    /// non-empty value is true.
    pub fn truth(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::Str(s) => Some(!s.is_empty()),
            Value::Code(_) | Value::Context(_) | Value::Lock(_) => Some(true),
        }
    }

    /// Extract an integer
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a number (integers widen to float)
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Extract a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    /// Extract a code reference
    pub fn as_code(&self) -> Option<&CodeRef> {
        match self {
            Value::Code(c) => Some(c),
            _ => None,
        }
    }

    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "empty",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Code(_) => "subroutine",
            Value::Context(_) => "context",
            Value::Lock(_) => "lock",
        }
    }

    /// Literal-pool identity
    ///
    /// Scalars compare by value (floats bitwise, so `-0.0` and `NaN` keep
    /// their own slots); shared values compare by identity.
    pub fn same_literal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Code(a), Value::Code(b)) => Arc::ptr_eq(a, b),
            (Value::Context(a), Value::Context(b)) => Arc::ptr_eq(a, b),
            (Value::Lock(a), Value::Lock(b)) => a.same_lock(b),
            _ => false,
        }
    }

    /// Render as source-like literal (strings quoted) for disassembly
    pub fn to_literal_string(&self) -> String {
        match self {
            Value::Str(s) => format!("{:?}", &**s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Empty"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{}", s),
            Value::Code(c) => match c.try_read() {
                Some(code) if !code.subroutine_name().is_empty() => {
                    write!(f, "Sub {}", code.subroutine_name())
                }
                _ => write!(f, "Sub"),
            },
            Value::Context(c) => write!(f, "Context {}", c.describe()),
            Value::Lock(l) => write!(f, "Lock {}", l.mutex().name()),
        }
    }
}

impl fmt::Debug for Value {
    // Code objects may reference each other through their literal pools,
    // so this never descends into them.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", &**s),
            Value::Code(_) | Value::Context(_) | Value::Lock(_) => write!(f, "{}", self),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<CodeRef> for Value {
    fn from(code: CodeRef) -> Self {
        Value::Code(code)
    }
}

impl From<ContextRef> for Value {
    fn from(context: ContextRef) -> Self {
        Value::Context(context)
    }
}
