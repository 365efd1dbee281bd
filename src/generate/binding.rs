use crate::encoder::{Cell, Disposition, EncodeError, Encoder};
use crate::isa::Instruction;
use crate::value::{Symbol, Value};

use super::{as_lambda, block, lambda, value, GenResult};

fn bindings(form: &'static str, defs: &Value) -> Result<Vec<(Symbol, Value)>, EncodeError> {
    let items = match defs {
        Value::List(list) => list.to_vec(),
        Value::Vector(items) => items.to_vec(),
        _ => return Err(EncodeError::malformed(form, "bindings must be a list of (name value) pairs")),
    };
    items
        .iter()
        .map(|item| {
            let pair = match item {
                Value::List(list) => list.to_vec(),
                Value::Vector(items) => items.to_vec(),
                _ => Vec::new(),
            };
            match pair.as_slice() {
                [Value::Symbol(name), v] => Ok((name.clone(), v.clone())),
                _ => Err(EncodeError::malformed(form, format!("bad binding {item}"))),
            }
        })
        .collect()
}

fn split_body<'a>(form: &'static str, args: &'a [Value]) -> Result<(&'a Value, &'a [Value]), EncodeError> {
    args.split_first().ok_or_else(|| EncodeError::malformed(form, "missing bindings"))
}

/// A lambda bound to a name learns that name, so it can call itself
/// directly.
fn named_value(e: &mut Encoder, name: &Symbol, v: &Value) -> GenResult {
    match as_lambda(e, v) {
        Some(rest) => lambda::generate(e, &rest, Some(name.clone())),
        None => value(e, v),
    }
}

/// `(let ((n v) ...) body...)`: every value is computed before any name is
/// visible, then the results are stored from the top of the stack down.
pub fn generate_let(e: &mut Encoder, args: &[Value]) -> GenResult {
    let (defs, body) = split_body("let", args)?;
    let pairs = bindings("let", defs)?;
    for (_, v) in &pairs {
        value(e, v)?;
    }
    e.push_scope();
    let cells = pairs
        .iter()
        .map(|(name, _)| e.add_local(name, Disposition::Value))
        .collect::<Result<Vec<Cell>, _>>()?;
    for cell in cells.iter().rev() {
        e.emit(Instruction::Store(cell.index))?;
    }
    block::generate(e, body)?;
    e.pop_scope()?;
    Ok(())
}

/// `(letrec ((n v) ...) body...)`: each name gets a reference cell before
/// any value is built, so the values may refer to each other. The cells
/// share one group so closures over them are not kept alive by the cells.
pub fn generate_letrec(e: &mut Encoder, args: &[Value]) -> GenResult {
    let (defs, body) = split_body("letrec", args)?;
    let pairs = bindings("letrec", defs)?;
    e.push_scope();
    let mut cells: Vec<Cell> = Vec::with_capacity(pairs.len());
    for (name, _) in &pairs {
        let cell = e.add_local(name, Disposition::Reference)?;
        match cells.first() {
            Some(first) => {
                e.emit(Instruction::Load(first.index))?;
                e.emit(Instruction::SiblingRef)?;
            }
            None => e.emit(Instruction::NewRef)?,
        }
        e.emit(Instruction::Store(cell.index))?;
        cells.push(cell);
    }
    for (cell, (name, v)) in cells.iter().zip(&pairs) {
        e.emit(Instruction::Load(cell.index))?;
        named_value(e, name, v)?;
        e.emit(Instruction::BindRef)?;
    }
    block::generate(e, body)?;
    e.pop_scope()?;
    Ok(())
}

/// `(define name value)`: declared for the rest of the compilation so the
/// value can refer to it, bound when the code runs. Evaluates to the symbol.
pub fn generate_define(e: &mut Encoder, args: &[Value]) -> GenResult {
    let [Value::Symbol(name), v] = args else {
        return Err(EncodeError::malformed("define", "expected (define name value)").into());
    };
    e.declare(name);
    named_value(e, name, v)?;
    let k = e.add_constant(Value::Symbol(name.clone()))?;
    e.emit(Instruction::Const(k))?;
    e.emit(Instruction::Bind)?;
    e.emit(Instruction::Const(k))?;
    Ok(())
}

/// `(declare name...)`: forward declarations. Evaluates to nil.
pub fn generate_declare(e: &mut Encoder, args: &[Value]) -> GenResult {
    for arg in args {
        let Value::Symbol(name) = arg else {
            return Err(EncodeError::malformed("declare", format!("{arg} is not a symbol")).into());
        };
        e.declare(name);
        let k = e.add_constant(arg.clone())?;
        e.emit(Instruction::Const(k))?;
        e.emit(Instruction::Declare)?;
    }
    e.emit(Instruction::PushNull)?;
    Ok(())
}
