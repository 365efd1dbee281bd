use crate::analysis::VerifyError;
use crate::encoder::EncodeError;
use crate::isa::Opcode;
use crate::reader::ReadError;
use crate::vm::VmError;

/// Conditions that can only arise from a defect in the compiler itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InternalError {
    #[error("opcode {0} has no declared effect")]
    UndeclaredEffect(Opcode),
    #[error("unexpected form during generation: {0}")]
    UnexpectedForm(String),
    #[error("label {0} anchored more than once")]
    DoubleAnchor(u32),
    #[error("label {0} referenced but never anchored")]
    UnresolvedLabel(u32),
    #[error("inconsistent stack depth at offset {offset}: {first} vs {second}")]
    StackImbalance { offset: usize, first: usize, second: usize },
    #[error("stack underflow at offset {0}")]
    StackUnderflow(usize),
    #[error("constant {0} is not in the pool")]
    MissingConstant(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("internal compiler error: {0}")]
    Internal(#[from] InternalError),
}

impl CompileError {
    /// Verification and internal failures mean the generator or optimizer
    /// produced bad code; only encode errors are the user's fault.
    pub fn is_bug(&self) -> bool {
        !matches!(self, CompileError::Encode(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] VmError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
