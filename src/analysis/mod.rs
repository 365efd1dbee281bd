use std::collections::HashMap;
use std::ops::Range;

use crate::encoder::Encoded;
use crate::error::InternalError;
use crate::isa::Instruction;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerifyError {
    #[error("jump to label {0}, which is never anchored")]
    UnanchoredLabel(u32),
    #[error("label {0} anchored more than once")]
    DuplicateLabel(u32),
    #[error("branch arms disagree on stack depth: then {then_depth}, else {else_depth}")]
    BranchMismatch { then_depth: usize, else_depth: usize },
    #[error("stack underflow at {index} ({instruction}) with depth {depth}")]
    StackUnderflow { index: usize, instruction: Instruction, depth: usize },
    #[error("{instruction} at {index} leaves {depth} value(s) on the stack")]
    ReturnDepth { index: usize, instruction: Instruction, depth: usize },
    #[error("unit ends with stack depth {0}, expected 0")]
    EndDepth(usize),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified {
    pub max_depth: usize,
}

// ── Branch discovery ─────────────────────────────────────────────────

/// A run of code split around its first conditional jump, as laid out by
/// the branch generator:
///
/// ```text
/// prologue  CondJump(Lt)  else  Jump(Lj)  Label(Lt)  then  Label(Lj)  epilogue
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Branches {
    Flat(Range<usize>),
    Split(Box<Split>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub prologue: Range<usize>,
    pub cond: usize,
    pub then_at: usize,
    pub join_at: usize,
    pub then_label: u32,
    pub join_label: u32,
    pub else_arm: Branches,
    pub then_arm: Branches,
    pub epilogue: Branches,
}

/// Decomposes `code[range]`. A run whose first `CondJump` does not open the
/// expected triad stays flat.
pub fn split_branch(code: &[Instruction], range: Range<usize>) -> Branches {
    let Some(cond) = range.clone().find(|&i| matches!(code[i], Instruction::CondJump(_))) else {
        return Branches::Flat(range);
    };
    let Instruction::CondJump(then_label) = code[cond] else {
        return Branches::Flat(range);
    };
    let Some(then_at) = (cond + 1..range.end).find(|&i| code[i] == Instruction::Label(then_label)) else {
        return Branches::Flat(range);
    };
    let join_label = match then_at.checked_sub(1).map(|i| code[i]) {
        Some(Instruction::Jump(l)) if then_at - 1 > cond => l,
        _ => return Branches::Flat(range),
    };
    let Some(join_at) = (then_at + 1..range.end).find(|&i| code[i] == Instruction::Label(join_label)) else {
        return Branches::Flat(range);
    };
    Branches::Split(Box::new(Split {
        prologue: range.start..cond,
        cond,
        then_at,
        join_at,
        then_label,
        join_label,
        else_arm: split_branch(code, cond + 1..then_at - 1),
        then_arm: split_branch(code, then_at + 1..join_at),
        epilogue: split_branch(code, join_at + 1..range.end),
    }))
}

// ── Verification ─────────────────────────────────────────────────────

fn check_labels(code: &[Instruction]) -> Result<(), VerifyError> {
    let mut anchors: HashMap<u32, usize> = HashMap::new();
    for ins in code {
        if let Instruction::Label(l) = ins {
            let count = anchors.entry(*l).or_insert(0);
            *count += 1;
            if *count > 1 {
                return Err(VerifyError::DuplicateLabel(*l));
            }
        }
    }
    for ins in code {
        if let Instruction::Jump(l) | Instruction::CondJump(l) = ins {
            if !anchors.contains_key(l) {
                return Err(VerifyError::UnanchoredLabel(*l));
            }
        }
    }
    Ok(())
}

struct Simulation<'a> {
    code: &'a [Instruction],
    max: usize,
}

impl Simulation<'_> {
    /// Depth after the run, or `None` once every path has terminated.
    fn run(&mut self, branches: &Branches, depth: Option<usize>) -> Result<Option<usize>, VerifyError> {
        match branches {
            Branches::Flat(range) => self.flat(range.clone(), depth),
            Branches::Split(split) => {
                let depth = self.flat(split.prologue.clone(), depth)?;
                let depth = self.flat(split.cond..split.cond + 1, depth)?;
                let else_depth = self.run(&split.else_arm, depth)?;
                let then_depth = self.run(&split.then_arm, depth)?;
                let joined = match (then_depth, else_depth) {
                    (Some(t), Some(e)) if t != e => {
                        return Err(VerifyError::BranchMismatch { then_depth: t, else_depth: e });
                    }
                    (Some(d), _) | (None, Some(d)) => Some(d),
                    (None, None) => None,
                };
                self.run(&split.epilogue, joined)
            }
        }
    }

    fn flat(&mut self, range: Range<usize>, mut depth: Option<usize>) -> Result<Option<usize>, VerifyError> {
        for index in range {
            let Some(d) = depth else { break };
            let instruction = self.code[index];
            let pops = instruction.pops()?;
            if pops > d {
                return Err(VerifyError::StackUnderflow { index, instruction, depth: d });
            }
            let after = d - pops + instruction.pushes()?;
            self.max = self.max.max(d).max(after);
            let effect = instruction.opcode().effect()?;
            if effect.terminates {
                if after != 0 && instruction != Instruction::Panic {
                    return Err(VerifyError::ReturnDepth { index, instruction, depth: after });
                }
                depth = None;
            } else {
                depth = Some(after);
            }
        }
        Ok(depth)
    }
}

/// Checks label anchoring and simulates the stack over a raw unit.
pub fn verify(unit: &Encoded) -> Result<Verified, VerifyError> {
    check_labels(&unit.code)?;
    let branches = split_branch(&unit.code, 0..unit.code.len());
    let mut sim = Simulation { code: &unit.code, max: 0 };
    match sim.run(&branches, Some(0))? {
        None | Some(0) => Ok(Verified { max_depth: sim.max }),
        Some(depth) => Err(VerifyError::EndDepth(depth)),
    }
}

// ── Stack sizing ─────────────────────────────────────────────────────

/// Maximum operand stack depth over resolved code, following every jump.
/// Used after optimization, when the branch layout may no longer hold.
pub fn stack_size(code: &[Instruction]) -> Result<usize, InternalError> {
    let mut seen: Vec<Option<usize>> = vec![None; code.len()];
    let mut work = vec![(0usize, 0usize)];
    let mut max = 0;
    while let Some((pc, depth)) = work.pop() {
        let Some(&ins) = code.get(pc) else { continue };
        match seen[pc] {
            Some(first) if first == depth => continue,
            Some(first) => return Err(InternalError::StackImbalance { offset: pc, first, second: depth }),
            None => seen[pc] = Some(depth),
        }
        let pops = ins.pops()?;
        if pops > depth {
            return Err(InternalError::StackUnderflow(pc));
        }
        let after = depth - pops + ins.pushes()?;
        max = max.max(depth).max(after);
        match ins {
            Instruction::Jump(target) => work.push((target as usize, after)),
            Instruction::CondJump(target) => {
                work.push((target as usize, after));
                work.push((pc + 1, after));
            }
            _ if ins.opcode().effect()?.terminates => {}
            _ => work.push((pc + 1, after)),
        }
    }
    Ok(max)
}
