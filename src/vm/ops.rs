use std::cmp::Ordering;
use std::sync::Arc;

use crate::value::{List, Value};

use super::{VmError, VmResult};

// ── Arithmetic ───────────────────────────────────────────────────────

fn type_error(op: &str, a: &Value, b: &Value) -> VmError {
    VmError::Type(format!("cannot apply {op} to {} and {}", a.type_name(), b.type_name()))
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}

/// Integer op when both sides are integers, float op when either is a float.
fn numeric(
    op: &str,
    a: &Value,
    b: &Value,
    int: fn(i64, i64) -> Option<i64>,
    float: fn(f64, f64) -> f64,
) -> VmResult<Value> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => int(*x, *y).map(Value::Integer).ok_or(VmError::Overflow),
        _ => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(float(x, y))),
            _ => Err(type_error(op, a, b)),
        },
    }
}

pub(crate) fn add(a: &Value, b: &Value) -> VmResult<Value> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        let mut s = String::with_capacity(x.len() + y.len());
        s.push_str(x);
        s.push_str(y);
        return Ok(Value::String(Arc::from(s)));
    }
    numeric("+", a, b, i64::checked_add, |x, y| x + y)
}

pub(crate) fn sub(a: &Value, b: &Value) -> VmResult<Value> {
    numeric("-", a, b, i64::checked_sub, |x, y| x - y)
}

pub(crate) fn mul(a: &Value, b: &Value) -> VmResult<Value> {
    numeric("*", a, b, i64::checked_mul, |x, y| x * y)
}

/// Exact integer division stays integral; anything else yields a float.
pub(crate) fn div(a: &Value, b: &Value) -> VmResult<Value> {
    match (a, b) {
        (_, Value::Integer(0)) => Err(VmError::DivisionByZero),
        (Value::Integer(x), Value::Integer(y)) => match x.checked_rem(*y) {
            Some(0) => x.checked_div(*y).map(Value::Integer).ok_or(VmError::Overflow),
            Some(_) => Ok(Value::Float(*x as f64 / *y as f64)),
            None => Err(VmError::Overflow),
        },
        _ => match (as_float(a), as_float(b)) {
            (Some(_), Some(y)) if y == 0.0 => Err(VmError::DivisionByZero),
            (Some(x), Some(y)) => Ok(Value::Float(x / y)),
            _ => Err(type_error("/", a, b)),
        },
    }
}

/// Like `/`, a zero divisor is an error for floats as well as integers.
pub(crate) fn rem(a: &Value, b: &Value) -> VmResult<Value> {
    match (a, b) {
        (_, Value::Integer(0)) => Err(VmError::DivisionByZero),
        (_, Value::Float(y)) if *y == 0.0 => Err(VmError::DivisionByZero),
        _ => numeric("mod", a, b, i64::checked_rem_euclid, f64::rem_euclid),
    }
}

pub(crate) fn neg(a: &Value) -> VmResult<Value> {
    match a {
        Value::Integer(n) => n.checked_neg().map(Value::Integer).ok_or(VmError::Overflow),
        Value::Float(n) => Ok(Value::Float(-n)),
        _ => Err(VmError::Type(format!("cannot negate {}", a.type_name()))),
    }
}

pub(crate) fn offset(a: &Value, by: i64) -> VmResult<Value> {
    match a {
        Value::Integer(n) => n.checked_add(by).map(Value::Integer).ok_or(VmError::Overflow),
        Value::Float(n) => Ok(Value::Float(n + by as f64)),
        _ => Err(VmError::Type(format!("cannot step {}", a.type_name()))),
    }
}

// ── Comparison ───────────────────────────────────────────────────────

/// Runtime `=`: numbers compare by value across integer and float,
/// everything else structurally.
pub(crate) fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => (*x as f64) == *y,
        (Value::Float(x), Value::Float(y)) => x == y,
        _ => a == b,
    }
}

pub(crate) fn compare(op: &str, a: &Value, b: &Value) -> VmResult<Ordering> {
    let ord = match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => return Err(type_error(op, a, b)),
        },
    };
    ord.ok_or_else(|| type_error(op, a, b))
}

// ── Sequences ────────────────────────────────────────────────────────

pub(crate) fn cons(head: Value, tail: &Value) -> VmResult<Value> {
    match tail {
        Value::Nil => Ok(Value::List(List::empty().prepend(head))),
        Value::List(list) => Ok(Value::List(list.prepend(head))),
        Value::Vector(items) => Ok(Value::list(std::iter::once(head).chain(items.iter().cloned()))),
        other => Err(VmError::Type(format!("cannot cons onto {}", other.type_name()))),
    }
}

pub(crate) fn car(seq: &Value) -> VmResult<Value> {
    match seq {
        Value::Nil => Ok(Value::Nil),
        Value::List(list) => Ok(list.first().cloned().unwrap_or_default()),
        Value::Vector(items) => Ok(items.first().cloned().unwrap_or_default()),
        other => Err(VmError::Type(format!("car of {}", other.type_name()))),
    }
}

pub(crate) fn cdr(seq: &Value) -> VmResult<Value> {
    match seq {
        Value::Nil => Ok(Value::List(List::empty())),
        Value::List(list) => Ok(Value::List(list.rest())),
        Value::Vector(items) => Ok(Value::list(items.iter().skip(1).cloned())),
        other => Err(VmError::Type(format!("cdr of {}", other.type_name()))),
    }
}

pub(crate) fn is_empty(seq: &Value) -> VmResult<bool> {
    match seq {
        Value::Nil => Ok(true),
        Value::List(list) => Ok(list.is_empty()),
        Value::Vector(items) => Ok(items.is_empty()),
        Value::Object(pairs) => Ok(pairs.is_empty()),
        Value::String(s) => Ok(s.is_empty()),
        other => Err(VmError::Type(format!("empty? of {}", other.type_name()))),
    }
}

pub(crate) fn nth(seq: &Value, index: &Value) -> VmResult<Value> {
    let Value::Integer(i) = *index else {
        return Err(VmError::Type(format!("nth index must be an integer, got {}", index.type_name())));
    };
    let (item, len) = match seq {
        Value::List(list) => (usize::try_from(i).ok().and_then(|i| list.nth(i).cloned()), list.len()),
        Value::Vector(items) => (usize::try_from(i).ok().and_then(|i| items.get(i).cloned()), items.len()),
        other => return Err(VmError::Type(format!("nth of {}", other.type_name()))),
    };
    item.ok_or(VmError::IndexOutOfRange { index: i, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_integer_overflow_checked() {
        assert!(matches!(add(&Value::Integer(i64::MAX), &Value::Integer(1)), Err(VmError::Overflow)));
        assert!(matches!(neg(&Value::Integer(i64::MIN)), Err(VmError::Overflow)));
    }

    #[test]
    fn ops_step_overflow_is_not_a_type_error() {
        assert!(matches!(offset(&Value::Integer(i64::MAX), 1), Err(VmError::Overflow)));
        assert!(matches!(offset(&Value::Integer(i64::MIN), -1), Err(VmError::Overflow)));
        assert_eq!(offset(&Value::Integer(41), 1).unwrap(), Value::Integer(42));
        assert_eq!(offset(&Value::Float(0.5), -1).unwrap(), Value::Float(-0.5));
        assert!(matches!(offset(&Value::string("a"), 1), Err(VmError::Type(_))));
    }

    #[test]
    fn ops_mixed_promotes_to_float() {
        assert_eq!(add(&Value::Integer(1), &Value::Float(0.5)).unwrap(), Value::Float(1.5));
        assert_eq!(mul(&Value::Float(2.0), &Value::Integer(3)).unwrap(), Value::Float(6.0));
    }

    #[test]
    fn ops_division() {
        assert_eq!(div(&Value::Integer(6), &Value::Integer(3)).unwrap(), Value::Integer(2));
        assert_eq!(div(&Value::Integer(7), &Value::Integer(2)).unwrap(), Value::Float(3.5));
        assert!(matches!(div(&Value::Integer(1), &Value::Integer(0)), Err(VmError::DivisionByZero)));
        assert!(matches!(div(&Value::Float(1.0), &Value::Float(0.0)), Err(VmError::DivisionByZero)));
        assert!(matches!(rem(&Value::Integer(1), &Value::Integer(0)), Err(VmError::DivisionByZero)));
        assert!(matches!(rem(&Value::Float(1.5), &Value::Float(0.0)), Err(VmError::DivisionByZero)));
        assert!(matches!(rem(&Value::Integer(3), &Value::Float(-0.0)), Err(VmError::DivisionByZero)));
        assert_eq!(rem(&Value::Integer(-7), &Value::Integer(3)).unwrap(), Value::Integer(2));
    }

    #[test]
    fn ops_string_concat() {
        assert_eq!(add(&Value::string("ab"), &Value::string("cd")).unwrap(), Value::string("abcd"));
        assert!(add(&Value::string("ab"), &Value::Integer(1)).is_err());
    }

    #[test]
    fn ops_numeric_equality() {
        assert!(equal(&Value::Integer(1), &Value::Float(1.0)));
        assert!(!equal(&Value::Integer(1), &Value::string("1")));
        assert!(equal(&Value::list([Value::Integer(1)]), &Value::list([Value::Integer(1)])));
    }

    #[test]
    fn ops_compare() {
        assert_eq!(compare("<", &Value::Integer(1), &Value::Float(2.0)).unwrap(), Ordering::Less);
        assert_eq!(compare("<", &Value::string("b"), &Value::string("a")).unwrap(), Ordering::Greater);
        assert!(compare("<", &Value::Nil, &Value::Integer(1)).is_err());
    }

    #[test]
    fn ops_sequences() {
        let l = cons(Value::Integer(1), &Value::Nil).unwrap();
        let l = cons(Value::Integer(0), &l).unwrap();
        assert_eq!(l.to_string(), "(0 1)");
        assert_eq!(car(&l).unwrap(), Value::Integer(0));
        assert_eq!(cdr(&l).unwrap().to_string(), "(1)");
        assert_eq!(car(&Value::Nil).unwrap(), Value::Nil);
        assert!(is_empty(&Value::list([])).unwrap());
        let v = Value::vector([Value::Integer(4), Value::Integer(5)]);
        assert_eq!(nth(&v, &Value::Integer(1)).unwrap(), Value::Integer(5));
        assert!(matches!(nth(&v, &Value::Integer(2)), Err(VmError::IndexOutOfRange { index: 2, len: 2 })));
        assert!(matches!(nth(&v, &Value::Integer(-1)), Err(VmError::IndexOutOfRange { .. })));
    }
}
