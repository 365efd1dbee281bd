use std::sync::Arc;

use tracing::debug;

use crate::compiler;
use crate::encoder::{EncodeError, Encoder};
use crate::isa::Instruction;
use crate::value::{Symbol, Value};

use super::{block, symbol, GenResult};

/// `(lambda name? (params... & rest) body...)`. The body is compiled,
/// verified and optimized as its own unit right away.
pub fn generate(e: &mut Encoder, args: &[Value], name: Option<Symbol>) -> GenResult {
    let (name, params, body) = match args {
        [Value::Symbol(own), params, body @ ..] => (Some(own.clone()), params, body),
        [params, body @ ..] => (name, params, body),
        [] => return Err(EncodeError::malformed("lambda", "missing parameter list").into()),
    };
    let (names, rest) = parse_params(params)?;

    e.child(name);
    if let Err(err) = body_unit(e, &names, rest, body) {
        e.abandon_child();
        return Err(err);
    }
    let encoded = e.finish_child()?;
    let captures = encoded.closure.clone();
    let options = e.options().clone();
    let procedure = Arc::new(compiler::build(encoded, &options)?);
    debug!(
        target: "kiln::generate",
        name = procedure.display_name(),
        captures = captures.len(),
        "lambda compiled"
    );

    if captures.is_empty() {
        let k = e.add_constant(Value::Closure(procedure.call(Vec::new())))?;
        e.emit(Instruction::Const(k))?;
        return Ok(());
    }
    for capture in &captures {
        symbol::capture(e, &capture.name)?;
    }
    let k = e.add_constant(Value::Procedure(procedure))?;
    e.emit(Instruction::Const(k))?;
    e.emit(Instruction::MakeClosure(captures.len() as u32))?;
    Ok(())
}

fn body_unit(e: &mut Encoder, names: &[Symbol], rest: bool, body: &[Value]) -> GenResult {
    e.push_params(names, rest)?;
    block::generate(e, body)?;
    e.emit(Instruction::Return)?;
    e.pop_params()?;
    Ok(())
}

/// Parameter names, and whether the last one collects the rest (`& rest`).
fn parse_params(params: &Value) -> Result<(Vec<Symbol>, bool), EncodeError> {
    let items = match params {
        Value::List(list) => list.to_vec(),
        Value::Vector(items) => items.to_vec(),
        other => return Err(EncodeError::malformed("lambda", format!("bad parameter list {other}"))),
    };
    let mut names = Vec::with_capacity(items.len());
    let mut iter = items.iter();
    while let Some(item) = iter.next() {
        let Value::Symbol(param) = item else {
            return Err(EncodeError::malformed("lambda", format!("parameter {item} is not a symbol")));
        };
        if param.as_str() != "&" {
            names.push(param.clone());
            continue;
        }
        return match (iter.next(), iter.next()) {
            (Some(Value::Symbol(rest)), None) => {
                names.push(rest.clone());
                Ok((names, true))
            }
            _ => Err(EncodeError::malformed("lambda", "& must be followed by exactly one name")),
        };
    }
    Ok((names, false))
}
