use std::sync::Arc;

use tracing::debug;

use crate::analysis;
use crate::encoder::{Encoded, Encoder};
use crate::error::{CompileError, Result};
use crate::generate;
use crate::isa::Instruction;
use crate::namespace::{NamespaceError, NamespaceRef};
use crate::optimize;
use crate::options::Options;
use crate::reader;
use crate::value::{Symbol, Value};
use crate::vm::{Closure, Procedure, Runnable};

/// Verifies, optimizes and finalizes one encoded unit.
pub fn build(encoded: Encoded, options: &Options) -> std::result::Result<Procedure, CompileError> {
    debug!(
        target: "kiln::compile",
        name = encoded.name.as_ref().map_or("<anonymous>", |s| s.as_str()),
        code = encoded.code.len(),
        constants = encoded.constants.len(),
        captures = encoded.closure.len(),
        "unit encoded"
    );
    if options.verify {
        analysis::verify(&encoded)?;
    }
    let arity = encoded.arity;
    let runnable = optimize::optimize(encoded, options)?;
    Ok(Procedure::new(runnable, arity))
}

/// Compiles and evaluates top-level forms against one namespace.
#[derive(Debug, Clone)]
pub struct Compiler {
    globals: NamespaceRef,
    options: Options,
}

impl Compiler {
    pub fn new(globals: NamespaceRef) -> Self {
        Compiler { globals, options: Options::default() }
    }

    pub fn with_options(globals: NamespaceRef, options: Options) -> Self {
        Compiler { globals, options }
    }

    pub fn globals(&self) -> &NamespaceRef {
        &self.globals
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Declares and binds a global, e.g. a host function.
    pub fn define(&self, name: &str, value: Value) -> std::result::Result<(), NamespaceError> {
        let name = Symbol::new(name);
        self.globals.declare(&name);
        self.globals.bind(&name, value)
    }

    /// Compiles `form` as the body of a zero-argument closure.
    pub fn compile(&self, form: &Value) -> std::result::Result<Arc<Closure>, CompileError> {
        let mut encoder = Encoder::new(self.globals.clone(), self.options.clone());
        generate::value(&mut encoder, form)?;
        encoder.emit(Instruction::Return)?;
        let procedure = Arc::new(build(encoder.encode(), &self.options)?);
        encoder.commit_declarations();
        Ok(procedure.call(Vec::new()))
    }

    pub fn eval(&self, form: &Value) -> Result<Value> {
        let closure = self.compile(form)?;
        Ok(closure.call_limited(Vec::new(), self.options.max_call_depth)?)
    }

    /// Evaluates forms in order; each is compiled after the previous one ran,
    /// so later forms see earlier definitions. Yields the last value.
    pub fn eval_all(&self, forms: &[Value]) -> Result<Value> {
        let mut last = Value::Nil;
        for form in forms {
            last = self.eval(form)?;
        }
        Ok(last)
    }

    pub fn eval_str(&self, src: &str) -> Result<Value> {
        let forms = reader::read_all(src)?;
        self.eval_all(&forms)
    }
}

/// Listing of a closure's code followed by every procedure reachable
/// through its constants, depth first.
pub fn disassemble(closure: &Closure) -> String {
    let mut out = String::new();
    let mut seen: Vec<*const Runnable> = Vec::new();
    listing(&closure.procedure().runnable, &mut out, &mut seen);
    out
}

fn listing(runnable: &Arc<Runnable>, out: &mut String, seen: &mut Vec<*const Runnable>) {
    let ptr = Arc::as_ptr(runnable);
    if seen.contains(&ptr) {
        return;
    }
    seen.push(ptr);
    out.push_str(&runnable.disassemble());
    for constant in &runnable.constants {
        let nested = match constant {
            Value::Closure(c) => &c.procedure().runnable,
            Value::Procedure(p) => &p.runnable,
            _ => continue,
        };
        out.push('\n');
        listing(nested, out, seen);
    }
}
