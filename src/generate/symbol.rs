use crate::encoder::{Disposition, EncodeError, Encoder, Resolved, ScopeKind};
use crate::isa::Instruction;
use crate::value::{Symbol, Value};

use super::{literal, GenResult};

pub fn generate(e: &mut Encoder, name: &Symbol) -> GenResult {
    match e.resolve_scoped(name) {
        Some(resolved) => load(e, &resolved, true),
        None => global(e, name),
    }
}

/// Pushes the cell itself, without dereferencing. Used to hand captured
/// cells to a new closure.
pub(crate) fn capture(e: &mut Encoder, name: &Symbol) -> GenResult {
    let resolved = e.resolve_scoped(name).ok_or_else(|| {
        EncodeError::malformed("lambda", format!("captured name {name} is not in scope"))
    })?;
    load(e, &resolved, false)
}

fn load(e: &mut Encoder, resolved: &Resolved, deref: bool) -> GenResult {
    let cell = &resolved.cell;
    let ins = match (resolved.scope, cell.disposition) {
        (ScopeKind::Local, _) => Instruction::Load(cell.index),
        (ScopeKind::Argument, Disposition::Rest) => Instruction::RestArg(cell.index),
        (ScopeKind::Argument, _) => Instruction::Arg(cell.index),
        (ScopeKind::Closure, _) => Instruction::Closure(cell.index),
    };
    e.emit(ins)?;
    if deref && cell.disposition == Disposition::Reference {
        e.emit(Instruction::Deref)?;
    }
    Ok(())
}

/// Bound globals are immutable, so their value is inlined as a literal.
/// Anything else is looked up at run time.
fn global(e: &mut Encoder, name: &Symbol) -> GenResult {
    if let Some(value) = e.globals().resolve(name) {
        return literal::generate(e, &value);
    }
    let k = e.add_constant(Value::Symbol(name.clone()))?;
    e.emit(Instruction::Const(k))?;
    e.emit(Instruction::Resolve)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::isa::Instruction::*;
    use crate::namespace::{Namespace, SharedNamespace};
    use crate::value::{Symbol, Value};

    #[test]
    fn symbol_bound_global_inlined() {
        let ns = SharedNamespace::shared("test");
        ns.bind(&Symbol::new("answer"), Value::Integer(42)).unwrap();
        ns.bind(&Symbol::new("one"), Value::Integer(1)).unwrap();
        let mut e = encoder_with(ns);
        assert_eq!(raw(&mut e, "answer"), vec![Const(0)]);
        assert_eq!(raw(&mut e, "one"), vec![Const(0), PosOne]);
    }

    #[test]
    fn symbol_unbound_global_resolved_at_runtime() {
        let mut e = encoder();
        assert_eq!(raw(&mut e, "later"), vec![Const(0), Resolve]);
    }

    #[test]
    fn symbol_let_bound_local() {
        let mut e = encoder();
        assert_eq!(raw(&mut e, "(let ((x 5)) x)"), vec![Const(0), Store(0), Load(0)]);
    }

    #[test]
    fn symbol_letrec_reads_through_reference() {
        let mut e = encoder();
        let code = raw(&mut e, "(letrec ((x 5)) x)");
        assert_eq!(&code[code.len() - 2..], &[Load(0), Deref]);
    }
}
