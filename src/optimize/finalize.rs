use std::collections::{HashMap, HashSet};

use crate::analysis;
use crate::encoder::{EncodeError, Encoded};
use crate::error::{CompileError, InternalError};
use crate::isa::Instruction;
use crate::value::Value;
use crate::vm::Runnable;

/// Turns a labelled unit into a runnable one: strips no-ops and dead code,
/// resolves labels to offsets, and compacts constants and locals.
pub(super) fn finalize(unit: Encoded) -> Result<Runnable, CompileError> {
    let mut code: Vec<Instruction> = unit.code.into_iter().filter(|ins| *ins != Instruction::NoOp).collect();
    loop {
        let before = code.len();
        code = drop_self_jumps(code);
        code = drop_unreachable(code)?;
        code = drop_unused_labels(code);
        if code.len() == before {
            break;
        }
    }
    let code = resolve_labels(code)?;
    let (code, constants) = compact_constants(code, unit.constants)?;
    let (code, local_count) = densify_locals(code)?;
    let stack_size = analysis::stack_size(&code)?;
    for ins in &code {
        ins.check().map_err(EncodeError::from)?;
    }
    Ok(Runnable { name: unit.name, code, constants, globals: unit.globals, local_count, stack_size })
}

fn jump_target(ins: &Instruction) -> Option<u32> {
    match ins {
        Instruction::Jump(l) | Instruction::CondJump(l) => Some(*l),
        _ => None,
    }
}

fn referenced(code: &[Instruction]) -> HashSet<u32> {
    code.iter().filter_map(jump_target).collect()
}

/// `Jump(l)` straight into a run of labels anchoring `l`.
fn drop_self_jumps(code: Vec<Instruction>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(code.len());
    for (i, ins) in code.iter().enumerate() {
        if let Instruction::Jump(l) = ins {
            let lands_here = code[i + 1..]
                .iter()
                .take_while(|next| matches!(next, Instruction::Label(_)))
                .any(|next| *next == Instruction::Label(*l));
            if lands_here {
                continue;
            }
        }
        out.push(*ins);
    }
    out
}

fn drop_unreachable(code: Vec<Instruction>) -> Result<Vec<Instruction>, InternalError> {
    let live = referenced(&code);
    let mut out = Vec::with_capacity(code.len());
    let mut reachable = true;
    for ins in code {
        if let Instruction::Label(l) = ins {
            if live.contains(&l) {
                reachable = true;
            }
        }
        if !reachable {
            continue;
        }
        out.push(ins);
        if ins.opcode().is_unconditional()? {
            reachable = false;
        }
    }
    Ok(out)
}

fn drop_unused_labels(code: Vec<Instruction>) -> Vec<Instruction> {
    let live = referenced(&code);
    code.into_iter()
        .filter(|ins| !matches!(ins, Instruction::Label(l) if !live.contains(l)))
        .collect()
}

fn resolve_labels(code: Vec<Instruction>) -> Result<Vec<Instruction>, CompileError> {
    let mut anchors: HashMap<u32, u32> = HashMap::new();
    let mut pending: Vec<(usize, u32)> = Vec::new();
    let mut out = Vec::with_capacity(code.len());
    for ins in code {
        match ins {
            Instruction::Label(l) => {
                if anchors.insert(l, out.len() as u32).is_some() {
                    return Err(InternalError::DoubleAnchor(l).into());
                }
            }
            _ => {
                if let Some(l) = jump_target(&ins) {
                    pending.push((out.len(), l));
                }
                out.push(ins);
            }
        }
    }
    for (at, label) in pending {
        let offset = anchors.get(&label).ok_or(InternalError::UnresolvedLabel(label))?;
        out[at] = out[at].with_operand(*offset).map_err(EncodeError::from)?;
    }
    Ok(out)
}

/// Keeps only referenced constants, numbered in order of first use.
fn compact_constants(
    mut code: Vec<Instruction>,
    pool: Vec<Value>,
) -> Result<(Vec<Instruction>, Vec<Value>), InternalError> {
    let mut remap: HashMap<u32, u32> = HashMap::new();
    let mut constants = Vec::new();
    for ins in &mut code {
        if let Instruction::Const(k) = *ins {
            let index = match remap.get(&k) {
                Some(index) => *index,
                None => {
                    let value = pool.get(k as usize).ok_or(InternalError::MissingConstant(k))?;
                    let index = constants.len() as u32;
                    constants.push(value.clone());
                    remap.insert(k, index);
                    index
                }
            };
            *ins = Instruction::Const(index);
        }
    }
    Ok((code, constants))
}

fn densify_locals(mut code: Vec<Instruction>) -> Result<(Vec<Instruction>, usize), CompileError> {
    let mut remap: HashMap<u32, u32> = HashMap::new();
    for ins in &mut code {
        if let Instruction::Load(l) | Instruction::Store(l) = *ins {
            let next = remap.len() as u32;
            let slot = *remap.entry(l).or_insert(next);
            *ins = ins.with_operand(slot).map_err(EncodeError::from)?;
        }
    }
    Ok((code, remap.len()))
}
