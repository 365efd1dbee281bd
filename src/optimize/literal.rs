use crate::encoder::Encoded;
use crate::isa::Instruction;

pub(super) fn fold_literal_returns(unit: &mut Encoded) -> bool {
    let code = std::mem::take(&mut unit.code);
    let mut out = Vec::with_capacity(code.len());
    let mut changed = false;
    let mut iter = code.into_iter().peekable();
    while let Some(ins) = iter.next() {
        let folded = match (ins, iter.peek()) {
            (Instruction::PushTrue, Some(Instruction::Return)) => Some(Instruction::ReturnTrue),
            (Instruction::PushFalse, Some(Instruction::Return)) => Some(Instruction::ReturnFalse),
            (Instruction::PushNull, Some(Instruction::Return)) => Some(Instruction::ReturnNull),
            _ => None,
        };
        match folded {
            Some(ret) => {
                iter.next();
                out.push(ret);
                changed = true;
            }
            None => out.push(ins),
        }
    }
    unit.code = out;
    changed
}
