use crate::encoder::Encoder;
use crate::isa::Instruction;
use crate::value::Value;

use super::GenResult;

/// Values that evaluate to themselves. Symbols and non-empty lists are code.
pub(crate) fn is_self_evaluating(v: &Value) -> bool {
    match v {
        Value::Symbol(_) => false,
        Value::List(list) => list.is_empty(),
        Value::Vector(items) => items.iter().all(is_self_evaluating),
        _ => true,
    }
}

/// Small integers, booleans and nil have dedicated opcodes; everything else
/// goes through the constant pool.
pub fn generate(e: &mut Encoder, v: &Value) -> GenResult {
    let ins = match v {
        Value::Nil => Instruction::PushNull,
        Value::Bool(true) => Instruction::PushTrue,
        Value::Bool(false) => Instruction::PushFalse,
        Value::Integer(0) => Instruction::Zero,
        Value::Integer(1) => Instruction::PosOne,
        Value::Integer(2) => Instruction::PosTwo,
        Value::Integer(-1) => Instruction::NegOne,
        other => Instruction::Const(e.add_constant(other.clone())?),
    };
    e.emit(ins)?;
    Ok(())
}
