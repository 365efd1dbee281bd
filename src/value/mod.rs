mod list;
mod reference;

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

pub use list::{Iter, List};
pub use reference::Reference;

use crate::vm::{Arity, Closure, Procedure, VmError};

// ── Symbol ───────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl Deref for Symbol {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Value ────────────────────────────────────────────────────────────

/// A runtime value. Every payload is `Arc`-shared, so cloning is cheap and
/// values move freely between threads. Reference cells are the only
/// mutable state.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Symbol(Symbol),
    Keyword(Arc<str>),
    List(List),
    Vector(Arc<[Value]>),
    Object(Arc<[(Value, Value)]>),
    Procedure(Arc<Procedure>),
    Closure(Arc<Closure>),
    Native(Native),
    Ref(Reference),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Symbol::new(name))
    }

    pub fn keyword(name: &str) -> Self {
        Value::Keyword(Arc::from(name))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn vector(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Vector(items.into_iter().collect())
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Object(_) => "object",
            Value::Procedure(_) => "procedure",
            Value::Closure(_) => "closure",
            Value::Native(_) => "native",
            Value::Ref(_) => "reference",
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            // bitwise, so 0.0 and -0.0 stay distinct constants and NaN equals itself
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Procedure(a), Value::Procedure(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

fn write_seq<'a>(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item = &'a Value>) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "{:?}", &**s),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Keyword(k) => write!(f, ":{k}"),
            Value::List(l) => {
                f.write_str("(")?;
                write_seq(f, l.iter())?;
                f.write_str(")")
            }
            Value::Vector(v) => {
                f.write_str("[")?;
                write_seq(f, v.iter())?;
                f.write_str("]")
            }
            Value::Object(pairs) => {
                f.write_str("{")?;
                write_seq(f, pairs.iter().flat_map(|(k, v)| [k, v]))?;
                f.write_str("}")
            }
            Value::Procedure(p) => write!(f, "#<procedure {}>", p.display_name()),
            Value::Closure(c) => write!(f, "#<closure {}>", c.procedure().display_name()),
            Value::Native(n) => write!(f, "#<native {}>", n.name()),
            Value::Ref(_) => f.write_str("#<ref>"),
        }
    }
}

// ── Host callables ───────────────────────────────────────────────────

/// A callable implemented by the host. The VM checks arity before `call`.
pub trait Caller: Send + Sync {
    fn name(&self) -> &str;

    fn check_arity(&self, _argc: usize) -> Result<(), VmError> {
        Ok(())
    }

    fn call(&self, args: &[Value]) -> Result<Value, VmError>;
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value, VmError> + Send + Sync;

struct FnCaller {
    name: String,
    arity: Arity,
    func: Box<NativeFn>,
}

impl Caller for FnCaller {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_arity(&self, argc: usize) -> Result<(), VmError> {
        self.arity.check(&self.name, argc)
    }

    fn call(&self, args: &[Value]) -> Result<Value, VmError> {
        (self.func)(args)
    }
}

#[derive(Clone)]
pub struct Native(Arc<dyn Caller>);

impl Native {
    pub fn new(caller: impl Caller + 'static) -> Self {
        Native(Arc::new(caller))
    }

    /// Wraps a plain function with a fixed arity.
    pub fn from_fn<F>(name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, VmError> + Send + Sync + 'static,
    {
        Native::new(FnCaller { name: name.to_string(), arity, func: Box::new(func) })
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn check_arity(&self, argc: usize) -> Result<(), VmError> {
        self.0.check_arity(argc)
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, VmError> {
        self.0.call(args)
    }

    pub fn ptr_eq(&self, other: &Native) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({})", self.name())
    }
}
