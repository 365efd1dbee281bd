use crate::encoder::{EncodeError, Encoder};
use crate::isa::Instruction;
use crate::value::Value;

use super::{value, GenResult};

/// `(if pred then else?)`, laid out as
/// `pred CondJump(Lt) else Jump(Lj) Label(Lt) then Label(Lj)`.
pub fn generate(e: &mut Encoder, args: &[Value]) -> GenResult {
    let (pred, consequent, alternative) = match args {
        [p, c] => (p, c, None),
        [p, c, a] => (p, c, Some(a)),
        _ => return Err(EncodeError::malformed("if", "expected (if pred then else?)").into()),
    };
    value(e, pred)?;
    if !e.last_instruction().is_some_and(Instruction::produces_bool) {
        e.emit(Instruction::Truthy)?;
    }
    let then_label = e.new_label();
    let join_label = e.new_label();
    e.emit(Instruction::CondJump(then_label))?;
    match alternative {
        Some(a) => value(e, a)?,
        None => e.emit(Instruction::PushNull)?,
    }
    e.emit(Instruction::Jump(join_label))?;
    e.emit(Instruction::Label(then_label))?;
    value(e, consequent)?;
    e.emit(Instruction::Label(join_label))?;
    Ok(())
}

/// `(and a b...)`: the first falsy operand, else the last one. `(and)` is true.
pub fn generate_and(e: &mut Encoder, args: &[Value]) -> GenResult {
    short_circuit(e, args, true)
}

/// `(or a b...)`: the first truthy operand, else the last one. `(or)` is nil.
pub fn generate_or(e: &mut Encoder, args: &[Value]) -> GenResult {
    short_circuit(e, args, false)
}

/// Keeps a copy of each deciding operand, so the join sees the same depth
/// from both arms. `and` continues in the then-arm, `or` in the else-arm.
fn short_circuit(e: &mut Encoder, args: &[Value], and: bool) -> GenResult {
    let Some((first, rest)) = args.split_first() else {
        e.emit(if and { Instruction::PushTrue } else { Instruction::PushNull })?;
        return Ok(());
    };
    value(e, first)?;
    if rest.is_empty() {
        return Ok(());
    }
    e.emit(Instruction::Dup)?;
    e.emit(Instruction::Truthy)?;
    let then_label = e.new_label();
    let join_label = e.new_label();
    e.emit(Instruction::CondJump(then_label))?;
    if !and {
        e.emit(Instruction::Pop)?;
        short_circuit(e, rest, and)?;
    }
    e.emit(Instruction::Jump(join_label))?;
    e.emit(Instruction::Label(then_label))?;
    if and {
        e.emit(Instruction::Pop)?;
        short_circuit(e, rest, and)?;
    }
    e.emit(Instruction::Label(join_label))?;
    Ok(())
}
