//! Operator semantics
//!
//! The empty value propagates through arithmetic and ordering instead of
//! raising. Integer arithmetic that overflows widens to float.

use crate::compiler::bytecode::{BinaryOp, UnaryOp};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use std::cmp::Ordering;
use std::sync::Arc;

pub(super) fn binary(op: BinaryOp, a: &Value, b: &Value) -> VmResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(a, b))),
        BinaryOp::Ne => Ok(Value::Bool(!equals(a, b))),
        BinaryOp::Concat => Ok(concat(a, b)),
        _ if a.is_null() || b.is_null() => Ok(Value::Null),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, a, b),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(op, a, b)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
    }
}

pub(super) fn unary(op: UnaryOp, a: &Value) -> VmResult<Value> {
    match (op, a) {
        (UnaryOp::IsEmpty, _) => Ok(Value::Bool(a.is_null())),
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, _) => Ok(Value::Bool(!a.truth().unwrap_or(false))),
        (UnaryOp::Neg, Value::Int(i)) => Ok(i
            .checked_neg()
            .map_or_else(|| Value::Float(-f64::from(*i)), Value::Int)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, other) => Err(VmError::TypeError(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let (x, y) = (*x, *y);
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            _ => {
                if y == 0 {
                    return Err(VmError::DivisionByZero);
                }
                x.checked_rem(y)
                    .filter(|&r| r == 0)
                    .and_then(|_| x.checked_div(y))
            }
        };
        if let Some(result) = exact {
            return Ok(Value::Int(result));
        }
    }

    let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
        return Err(VmError::TypeError(format!(
            "cannot {} {} and {}",
            op.name(),
            a.type_name(),
            b.type_name()
        )));
    };
    Ok(Value::Float(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        _ => {
            if y == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            x / y
        }
    }))
}

fn concat(a: &Value, b: &Value) -> Value {
    let mut out = String::new();
    for v in [a, b] {
        if !v.is_null() {
            out.push_str(&v.to_string());
        }
    }
    Value::Str(Arc::from(out))
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> VmResult<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).ok_or_else(|| {
                VmError::TypeError(format!("cannot {} NaN", op.name()))
            }),
            _ => Err(VmError::TypeError(format!(
                "cannot {} {} and {}",
                op.name(),
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Code(x), Value::Code(y)) => Arc::ptr_eq(x, y),
        (Value::Context(x), Value::Context(y)) => Arc::ptr_eq(x, y),
        (Value::Lock(x), Value::Lock(y)) => x.same_lock(y),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}
