use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::encoder::Encoded;
use crate::error::{CompileError, InternalError};
use crate::isa::Instruction;
use crate::options::Options;
use crate::value::Value;
use crate::vm::{Closure, Runnable};

/// Splices small, capture-free procedures into their call sites:
/// `Const(closure); Call(n)` (or `TailCall(n)`) becomes the callee's body with arguments stored
/// in fresh locals and returns turned into jumps to a join label.
pub(super) fn inline_calls(unit: &mut Encoded, options: &Options) -> Result<bool, CompileError> {
    let mut budget = options.inline_budget;
    let code = std::mem::take(&mut unit.code);
    let mut out = Vec::with_capacity(code.len());
    let mut changed = false;
    let mut i = 0;
    while i < code.len() {
        if let (Instruction::Const(k), Some(&call @ (Instruction::Call(n) | Instruction::TailCall(n)))) =
            (code[i], code.get(i + 1))
        {
            if let Some(callee) = candidate(unit, k, n, options, budget) {
                budget -= callee.code.len();
                debug!(
                    target: "kiln::optimize",
                    caller = unit.name.as_ref().map_or("<anonymous>", |s| s.as_str()),
                    callee = callee.name.as_ref().map_or("<anonymous>", |s| s.as_str()),
                    size = callee.code.len(),
                    "inlined call"
                );
                splice(unit, &mut out, &callee, n)?;
                if let Instruction::TailCall(_) = call {
                    out.push(Instruction::Return);
                }
                changed = true;
                i += 2;
                continue;
            }
        }
        out.push(code[i]);
        i += 1;
    }
    unit.code = out;
    Ok(changed)
}

fn candidate(unit: &Encoded, k: u32, argc: u32, options: &Options, budget: usize) -> Option<Arc<Runnable>> {
    let Some(Value::Closure(closure)) = unit.constants.get(k as usize) else {
        return None;
    };
    let procedure = closure.procedure();
    let runnable = &procedure.runnable;
    let inlinable = closure.captured().is_empty()
        && procedure.arity.is_exact(argc as usize)
        && runnable.code.len() <= options.inline_max_body
        && runnable.code.len() <= budget
        && Arc::ptr_eq(&runnable.globals, &unit.globals)
        && is_self_contained(closure);
    inlinable.then(|| Arc::clone(runnable))
}

/// The body does not depend on its own activation: no recursion, no tail
/// calls, no argument-list introspection, no captures.
fn is_self_contained(closure: &Closure) -> bool {
    closure.procedure().runnable.code.iter().all(|ins| {
        !matches!(
            ins,
            Instruction::CallSelf(_)
                | Instruction::TailSelf(_)
                | Instruction::TailCall(_)
                | Instruction::RestArg(_)
                | Instruction::ArgLen
                | Instruction::Closure(_)
        )
    })
}

fn splice(unit: &mut Encoded, out: &mut Vec<Instruction>, callee: &Runnable, argc: u32) -> Result<(), CompileError> {
    let base = unit.local_count;
    let locals = base + argc;
    unit.local_count = locals + callee.local_count as u32;

    // arguments were pushed right to left, so the first is on top
    for i in 0..argc {
        out.push(Instruction::Store(base + i));
    }

    let targets: BTreeSet<usize> = callee
        .code
        .iter()
        .filter_map(|ins| match ins {
            Instruction::Jump(t) | Instruction::CondJump(t) => Some(*t as usize),
            _ => None,
        })
        .collect();
    let labels: HashMap<usize, u32> = targets.into_iter().map(|t| (t, unit.new_label())).collect();
    let end = unit.new_label();

    for (pc, ins) in callee.code.iter().enumerate() {
        if let Some(label) = labels.get(&pc) {
            out.push(Instruction::Label(*label));
        }
        let mapped = match *ins {
            Instruction::Arg(a) => Instruction::Load(base + a),
            Instruction::Load(l) => Instruction::Load(locals + l),
            Instruction::Store(l) => Instruction::Store(locals + l),
            Instruction::Const(c) => {
                let value = callee.constants.get(c as usize).ok_or(InternalError::MissingConstant(c))?.clone();
                Instruction::Const(unit.add_constant(value)?)
            }
            Instruction::Jump(t) => Instruction::Jump(labels[&(t as usize)]),
            Instruction::CondJump(t) => Instruction::CondJump(labels[&(t as usize)]),
            Instruction::Return => Instruction::Jump(end),
            Instruction::ReturnTrue => {
                out.push(Instruction::PushTrue);
                Instruction::Jump(end)
            }
            Instruction::ReturnFalse => {
                out.push(Instruction::PushFalse);
                Instruction::Jump(end)
            }
            Instruction::ReturnNull => {
                out.push(Instruction::PushNull);
                Instruction::Jump(end)
            }
            other => other,
        };
        out.push(mapped);
    }
    if let Some(label) = labels.get(&callee.code.len()) {
        out.push(Instruction::Label(*label));
    }
    out.push(Instruction::Label(end));
    Ok(())
}
