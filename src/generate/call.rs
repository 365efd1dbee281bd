use crate::encoder::{EncodeError, Encoder};
use crate::isa::Instruction;
use crate::value::{Symbol, Value};
use crate::vm::Arity;

use super::{value, GenResult};

/// A call. Arguments are pushed right to left so the first one ends up on
/// top, then the callee.
pub fn generate(e: &mut Encoder, head: &Value, args: &[Value]) -> GenResult {
    let argc = args.len() as u32;
    if let Value::Symbol(name) = head {
        if is_self_call(e, name) {
            if let Some(arity) = e.arity() {
                check_static(name, arity, args.len())?;
            }
            push_args(e, args)?;
            e.emit(Instruction::CallSelf(argc))?;
            return Ok(());
        }
    }
    push_args(e, args)?;
    value(e, head)?;
    if let Some(Instruction::Const(k)) = e.last_instruction() {
        if let Some(Value::Closure(c)) = e.constant(k) {
            check_static(c.procedure().display_name(), c.procedure().arity, args.len())?;
        }
    }
    e.emit(Instruction::Call(argc))?;
    Ok(())
}

fn push_args(e: &mut Encoder, args: &[Value]) -> GenResult {
    for arg in args.iter().rev() {
        value(e, arg)?;
    }
    Ok(())
}

/// The head names the unit being compiled and nothing lexical shadows it.
fn is_self_call(e: &Encoder, name: &Symbol) -> bool {
    e.name() == Some(name) && !e.is_lexically_bound(name)
}

fn check_static(name: &str, arity: Arity, argc: usize) -> GenResult {
    if arity.accepts(argc) {
        Ok(())
    } else {
        Err(EncodeError::Arity { name: name.to_string(), expected: arity, got: argc }.into())
    }
}

// ── Primitive operators ──────────────────────────────────────────────

enum Primitive {
    /// Left fold over two or more operands; `unit` is the zero-operand
    /// value and `single` handles one operand.
    Fold { op: Instruction, unit: Option<Instruction>, single: Single },
    Fixed { op: Instruction, argc: usize },
    Collect(fn(u32) -> Instruction),
}

enum Single {
    Identity,
    Negate,
    Reciprocal,
}

fn lookup(name: &str) -> Option<Primitive> {
    use Instruction as I;
    let fixed = |op, argc| Some(Primitive::Fixed { op, argc });
    match name {
        "+" => Some(Primitive::Fold { op: I::Add, unit: Some(I::Zero), single: Single::Identity }),
        "*" => Some(Primitive::Fold { op: I::Mul, unit: Some(I::PosOne), single: Single::Identity }),
        "-" => Some(Primitive::Fold { op: I::Sub, unit: None, single: Single::Negate }),
        "/" => Some(Primitive::Fold { op: I::Div, unit: None, single: Single::Reciprocal }),
        "mod" => fixed(I::Mod, 2),
        "=" => fixed(I::Eq, 2),
        "!=" => fixed(I::Neq, 2),
        "<" => fixed(I::Lt, 2),
        "<=" => fixed(I::Lte, 2),
        ">" => fixed(I::Gt, 2),
        ">=" => fixed(I::Gte, 2),
        "not" => fixed(I::Not, 1),
        "inc" => fixed(I::Inc, 1),
        "dec" => fixed(I::Dec, 1),
        "cons" => fixed(I::Cons, 2),
        "car" => fixed(I::Car, 1),
        "cdr" => fixed(I::Cdr, 1),
        "empty?" => fixed(I::Empty, 1),
        "nth" => fixed(I::Nth, 2),
        "list" => Some(Primitive::Collect(I::MakeList)),
        "vector" => Some(Primitive::Collect(I::MakeVector)),
        _ => None,
    }
}

/// Compiles a primitive operator inline, evaluating operands left to right.
/// Returns `None` when `name` is not a primitive.
pub fn primitive(e: &mut Encoder, name: &Symbol, args: &[Value]) -> Option<GenResult> {
    let prim = lookup(name.as_str())?;
    Some(emit_primitive(e, name, prim, args))
}

fn emit_primitive(e: &mut Encoder, name: &Symbol, prim: Primitive, args: &[Value]) -> GenResult {
    match prim {
        Primitive::Fold { op, unit, single } => match (args, unit) {
            ([], Some(unit)) => e.emit(unit)?,
            ([], None) => return check_static(name, Arity::at_least(1), 0),
            ([only], _) => {
                if let Single::Reciprocal = single {
                    e.emit(Instruction::PosOne)?;
                }
                value(e, only)?;
                match single {
                    Single::Identity => {}
                    Single::Negate => e.emit(Instruction::Neg)?,
                    Single::Reciprocal => e.emit(op)?,
                }
            }
            ([first, rest @ ..], _) => {
                value(e, first)?;
                for arg in rest {
                    value(e, arg)?;
                    e.emit(op)?;
                }
            }
        },
        Primitive::Fixed { op, argc } => {
            check_static(name, Arity::exact(argc), args.len())?;
            for arg in args {
                value(e, arg)?;
            }
            e.emit(op)?;
        }
        Primitive::Collect(make) => {
            for arg in args {
                value(e, arg)?;
            }
            e.emit(make(args.len() as u32))?;
        }
    }
    Ok(())
}
