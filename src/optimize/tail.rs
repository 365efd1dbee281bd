use crate::encoder::Encoded;
use crate::isa::Instruction;

/// `Call(n); Return` becomes `TailCall(n)`, and `CallSelf(n); Return`
/// becomes `TailSelf(n)`.
pub(super) fn convert_tail_calls(unit: &mut Encoded) -> bool {
    let code = std::mem::take(&mut unit.code);
    let mut out = Vec::with_capacity(code.len());
    let mut changed = false;
    let mut i = 0;
    while i < code.len() {
        let tail = match (code[i], code.get(i + 1)) {
            (Instruction::Call(n), Some(Instruction::Return)) => Some(Instruction::TailCall(n)),
            (Instruction::CallSelf(n), Some(Instruction::Return)) => Some(Instruction::TailSelf(n)),
            _ => None,
        };
        match tail {
            Some(ins) => {
                out.push(ins);
                changed = true;
                i += 2;
            }
            None => {
                out.push(code[i]);
                i += 1;
            }
        }
    }
    unit.code = out;
    changed
}
