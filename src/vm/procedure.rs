use std::fmt;
use std::sync::Arc;

use crate::isa::Instruction;
use crate::namespace::NamespaceRef;
use crate::value::{Symbol, Value};

use super::{DEFAULT_CALL_DEPTH, Machine, VmError};

// ── Arity ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exact(n: usize) -> Self {
        Arity { min: n, max: Some(n) }
    }

    pub const fn at_least(n: usize) -> Self {
        Arity { min: n, max: None }
    }

    pub fn accepts(self, argc: usize) -> bool {
        argc >= self.min && self.max.is_none_or(|max| argc <= max)
    }

    pub fn is_exact(self, argc: usize) -> bool {
        self == Arity::exact(argc)
    }

    pub fn check(self, name: &str, argc: usize) -> Result<(), VmError> {
        if self.accepts(argc) {
            Ok(())
        } else {
            Err(VmError::Arity { name: name.to_string(), expected: self, got: argc })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{max}"),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

// ── Runnable ─────────────────────────────────────────────────────────

/// A finalized unit. Jump operands are absolute offsets, the constant pool
/// holds only what the code references, and locals are dense.
#[derive(Debug)]
pub struct Runnable {
    pub name: Option<Symbol>,
    pub code: Vec<Instruction>,
    pub constants: Vec<Value>,
    pub globals: NamespaceRef,
    pub local_count: usize,
    pub stack_size: usize,
}

impl Runnable {
    /// One instruction per line, with constants shown inline.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let name = self.name.as_ref().map_or("<anonymous>", |s| s.as_str());
        out.push_str(&format!("; {name} (stack {}, locals {})\n", self.stack_size, self.local_count));
        for (pc, ins) in self.code.iter().enumerate() {
            let text = ins.to_string();
            match ins {
                Instruction::Const(k) => match self.constants.get(*k as usize) {
                    Some(value) => out.push_str(&format!("{pc:4}  {text:<16} ; {value}\n")),
                    None => out.push_str(&format!("{pc:4}  {text:<16} ; <missing>\n")),
                },
                _ => out.push_str(&format!("{pc:4}  {text}\n")),
            }
        }
        out
    }
}

// ── Procedure & Closure ──────────────────────────────────────────────

#[derive(Debug)]
pub struct Procedure {
    pub runnable: Arc<Runnable>,
    pub arity: Arity,
}

impl Procedure {
    pub fn new(runnable: Runnable, arity: Arity) -> Self {
        Procedure { runnable: Arc::new(runnable), arity }
    }

    pub fn name(&self) -> Option<&Symbol> {
        self.runnable.name.as_ref()
    }

    pub(crate) fn display_name(&self) -> &str {
        self.name().map_or("<anonymous>", |s| s.as_str())
    }

    /// Pairs the procedure with captured values.
    pub fn call(self: &Arc<Self>, captured: Vec<Value>) -> Arc<Closure> {
        Arc::new(Closure { procedure: Arc::clone(self), captured })
    }
}

pub struct Closure {
    procedure: Arc<Procedure>,
    captured: Vec<Value>,
}

impl Closure {
    pub fn procedure(&self) -> &Arc<Procedure> {
        &self.procedure
    }

    pub fn captured(&self) -> &[Value] {
        &self.captured
    }

    pub fn check_arity(&self, argc: usize) -> Result<(), VmError> {
        self.procedure.arity.check(self.procedure.display_name(), argc)
    }

    /// Runs the closure to completion on the calling thread.
    pub fn call(self: &Arc<Self>, args: Vec<Value>) -> Result<Value, VmError> {
        self.call_limited(args, DEFAULT_CALL_DEPTH)
    }

    /// Like [`Closure::call`], failing once more than `max_depth` non-tail
    /// calls are live at the same time.
    pub fn call_limited(self: &Arc<Self>, args: Vec<Value>, max_depth: usize) -> Result<Value, VmError> {
        self.check_arity(args.len())?;
        Machine::new(Arc::clone(self), args, max_depth).run()
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.procedure.display_name())
            .field("captured", &self.captured.len())
            .finish()
    }
}
