use crate::analysis::{split_branch, Branches};
use crate::encoder::Encoded;
use crate::isa::Instruction;

/// When a branch is followed by nothing but `Return`, each arm returns on
/// its own and the join disappears. This exposes calls in tail position.
pub(super) fn split_returns(unit: &mut Encoded) -> bool {
    let rewritten = rewrite(&unit.code);
    let changed = rewritten != unit.code;
    unit.code = rewritten;
    changed
}

fn rewrite(code: &[Instruction]) -> Vec<Instruction> {
    let Branches::Split(split) = split_branch(code, 0..code.len()) else {
        return code.to_vec();
    };
    let epilogue = &code[split.join_at + 1..];
    let mut out = code[..=split.cond].to_vec();
    if epilogue != [Instruction::Return] {
        out.extend_from_slice(&code[split.cond + 1..=split.join_at]);
        out.extend(rewrite(epilogue));
        return out;
    }
    out.extend(returning(&code[split.cond + 1..split.then_at - 1]));
    out.push(Instruction::Label(split.then_label));
    out.extend(returning(&code[split.then_at + 1..split.join_at]));
    out
}

fn returning(arm: &[Instruction]) -> Vec<Instruction> {
    let mut arm = arm.to_vec();
    arm.push(Instruction::Return);
    rewrite(&arm)
}
