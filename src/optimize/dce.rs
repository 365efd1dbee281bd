use std::collections::HashMap;

use crate::encoder::Encoded;
use crate::isa::Instruction;

/// Pushes with no side effect, safe to drop along with a following `Pop`.
fn is_pure_push(ins: Instruction) -> bool {
    use Instruction as I;
    matches!(
        ins,
        I::PushNull
            | I::PushTrue
            | I::PushFalse
            | I::Zero
            | I::PosOne
            | I::PosTwo
            | I::NegOne
            | I::Const(_)
            | I::Load(_)
            | I::Arg(_)
            | I::RestArg(_)
            | I::ArgLen
            | I::Closure(_)
            | I::Dup
    )
}

fn local_uses(code: &[Instruction]) -> HashMap<u32, usize> {
    let mut uses = HashMap::new();
    for ins in code {
        if let Instruction::Load(l) | Instruction::Store(l) = ins {
            *uses.entry(*l).or_insert(0) += 1;
        }
    }
    uses
}

fn sweep(code: &[Instruction]) -> Vec<Instruction> {
    let uses = local_uses(code);
    let mut out = Vec::with_capacity(code.len());
    let mut i = 0;
    while i < code.len() {
        match (code[i], code.get(i + 1)) {
            (ins, Some(Instruction::Pop)) if is_pure_push(ins) => i += 2,
            // a local written once and read once, right away
            (Instruction::Store(s), Some(Instruction::Load(l))) if s == *l && uses.get(&s) == Some(&2) => i += 2,
            (ins, _) => {
                out.push(ins);
                i += 1;
            }
        }
    }
    out
}

/// Removes dead pushes and pass-through locals until nothing changes.
pub(super) fn eliminate(unit: &mut Encoded) -> bool {
    let mut changed = false;
    loop {
        let swept = sweep(&unit.code);
        if swept.len() == unit.code.len() {
            return changed;
        }
        unit.code = swept;
        changed = true;
    }
}
