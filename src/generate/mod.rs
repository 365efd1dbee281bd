//! Code generation: one generator per construct, all writing into the
//! current unit of an [`Encoder`].

mod binding;
mod block;
mod branch;
mod call;
mod lambda;
mod literal;
mod symbol;

use crate::encoder::{EncodeError, Encoder};
use crate::error::CompileError;
use crate::isa::Instruction;
use crate::value::{List, Symbol, Value};

pub type GenResult = Result<(), CompileError>;

/// Generates code that leaves the value of `form` on the stack.
pub fn value(e: &mut Encoder, form: &Value) -> GenResult {
    match form {
        Value::Symbol(name) => symbol::generate(e, name),
        Value::List(list) if !list.is_empty() => compound(e, list),
        Value::Vector(items) if !items.iter().all(literal::is_self_evaluating) => {
            for item in items.iter() {
                value(e, item)?;
            }
            e.emit(Instruction::MakeVector(items.len() as u32))?;
            Ok(())
        }
        other => literal::generate(e, other),
    }
}

fn compound(e: &mut Encoder, list: &List) -> GenResult {
    let items = list.to_vec();
    let (head, args) = (&items[0], &items[1..]);
    if let Value::Symbol(name) = head {
        if !e.is_lexically_bound(name) {
            if let Some(result) = special(e, name, args) {
                return result;
            }
            if !e.is_declared(name) {
                if let Some(result) = call::primitive(e, name, args) {
                    return result;
                }
            }
        }
    }
    call::generate(e, head, args)
}

fn special(e: &mut Encoder, name: &Symbol, args: &[Value]) -> Option<GenResult> {
    let result = match name.as_str() {
        "quote" => match args {
            [datum] => literal::generate(e, datum),
            _ => Err(EncodeError::malformed("quote", "expected exactly one datum").into()),
        },
        "if" => branch::generate(e, args),
        "and" => branch::generate_and(e, args),
        "or" => branch::generate_or(e, args),
        "do" => block::generate(e, args),
        "let" => binding::generate_let(e, args),
        "letrec" => binding::generate_letrec(e, args),
        "lambda" => lambda::generate(e, args, None),
        "define" => binding::generate_define(e, args),
        "declare" => binding::generate_declare(e, args),
        "panic" => raise(e, args),
        "arg-count" => match args {
            [] => e.emit(Instruction::ArgLen).map_err(Into::into),
            _ => Err(EncodeError::malformed("arg-count", "takes no operands").into()),
        },
        _ => return None,
    };
    Some(result)
}

fn raise(e: &mut Encoder, args: &[Value]) -> GenResult {
    let [v] = args else {
        return Err(EncodeError::malformed("panic", "expected exactly one value").into());
    };
    value(e, v)?;
    e.emit(Instruction::Panic)?;
    Ok(())
}

/// A `(lambda ...)` form, if `form` is one whose head is not shadowed.
pub(crate) fn as_lambda(e: &Encoder, form: &Value) -> Option<Vec<Value>> {
    let list = form.as_list()?;
    let head = list.first()?.as_symbol()?;
    (head.as_str() == "lambda" && !e.is_lexically_bound(head)).then(|| list.rest().to_vec())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::encoder::Encoder;
    use crate::namespace::{NamespaceRef, SharedNamespace};
    use crate::options::Options;
    use crate::reader;

    pub fn encoder() -> Encoder {
        Encoder::new(SharedNamespace::shared("test"), Options::default())
    }

    pub fn encoder_with(globals: NamespaceRef) -> Encoder {
        Encoder::new(globals, Options::default())
    }

    /// Generates `src` into a fresh root unit and returns its raw code.
    pub fn raw(e: &mut Encoder, src: &str) -> Vec<crate::isa::Instruction> {
        let form = reader::read(src).expect("readable");
        super::value(e, &form).expect("generates");
        e.code().to_vec()
    }
}
