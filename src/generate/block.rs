use crate::encoder::Encoder;
use crate::isa::Instruction;
use crate::value::Value;

use super::{value, GenResult};

/// Evaluates each form in order, keeping only the last value. An empty
/// block is nil.
pub fn generate(e: &mut Encoder, forms: &[Value]) -> GenResult {
    let Some((last, init)) = forms.split_last() else {
        e.emit(Instruction::PushNull)?;
        return Ok(());
    };
    for form in init {
        value(e, form)?;
        e.emit(Instruction::Pop)?;
    }
    value(e, last)
}
