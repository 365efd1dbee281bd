use std::fmt;
use std::sync::LazyLock;

use crate::error::InternalError;

/// Operands are 24 bits wide.
pub const MAX_OPERAND: u32 = 0x00FF_FFFF;

// ── Opcodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    PushNull,
    PushTrue,
    PushFalse,
    Zero,
    PosOne,
    PosTwo,
    NegOne,
    Const,
    Pop,
    Dup,
    Load,
    Store,
    NewRef,
    SiblingRef,
    BindRef,
    Deref,
    Arg,
    RestArg,
    ArgLen,
    Closure,
    MakeClosure,
    Declare,
    Bind,
    Resolve,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Inc,
    Dec,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Not,
    Truthy,
    Cons,
    Car,
    Cdr,
    Empty,
    Nth,
    MakeList,
    MakeVector,
    Call,
    CallSelf,
    TailCall,
    TailSelf,
    Jump,
    CondJump,
    Label,
    NoOp,
    Return,
    ReturnTrue,
    ReturnFalse,
    ReturnNull,
    Panic,
}

impl Opcode {
    pub const COUNT: usize = Opcode::Panic as usize + 1;

    pub fn effect(self) -> Result<&'static Effect, InternalError> {
        EFFECTS[self as usize].as_ref().ok_or(InternalError::UndeclaredEffect(self))
    }

    /// Control never falls through to the next instruction.
    pub fn is_unconditional(self) -> Result<bool, InternalError> {
        Ok(self == Opcode::Jump || self.effect()?.terminates)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Effects ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Local,
    Constant,
    Label,
    Argument,
    Capture,
    Count,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperandKind::None => "no",
            OperandKind::Local => "local",
            OperandKind::Constant => "constant",
            OperandKind::Label => "label",
            OperandKind::Argument => "argument",
            OperandKind::Capture => "capture",
            OperandKind::Count => "count",
        };
        f.write_str(s)
    }
}

/// Static stack behaviour of an opcode. A `dynamic_pop` opcode pops its
/// operand's worth of values on top of `pop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub pop: usize,
    pub push: usize,
    pub dynamic_pop: bool,
    pub operand: OperandKind,
    pub terminates: bool,
    pub ignorable: bool,
}

impl Effect {
    const fn new(pop: usize, push: usize) -> Self {
        Effect { pop, push, dynamic_pop: false, operand: OperandKind::None, terminates: false, ignorable: false }
    }

    const fn operand(mut self, kind: OperandKind) -> Self {
        self.operand = kind;
        self
    }

    const fn counted(mut self) -> Self {
        self.operand = OperandKind::Count;
        self.dynamic_pop = true;
        self
    }

    const fn terminates(mut self) -> Self {
        self.terminates = true;
        self
    }

    const fn ignorable(mut self) -> Self {
        self.ignorable = true;
        self
    }
}

const DECLARED: &[(Opcode, Effect)] = {
    use Opcode::*;
    use OperandKind as K;
    &[
        (PushNull, Effect::new(0, 1)),
        (PushTrue, Effect::new(0, 1)),
        (PushFalse, Effect::new(0, 1)),
        (Zero, Effect::new(0, 1)),
        (PosOne, Effect::new(0, 1)),
        (PosTwo, Effect::new(0, 1)),
        (NegOne, Effect::new(0, 1)),
        (Const, Effect::new(0, 1).operand(K::Constant)),
        (Pop, Effect::new(1, 0)),
        (Dup, Effect::new(1, 2)),
        (Load, Effect::new(0, 1).operand(K::Local)),
        (Store, Effect::new(1, 0).operand(K::Local)),
        (NewRef, Effect::new(0, 1)),
        (SiblingRef, Effect::new(1, 1)),
        (BindRef, Effect::new(2, 0)),
        (Deref, Effect::new(1, 1)),
        (Arg, Effect::new(0, 1).operand(K::Argument)),
        (RestArg, Effect::new(0, 1).operand(K::Argument)),
        (ArgLen, Effect::new(0, 1)),
        (Closure, Effect::new(0, 1).operand(K::Capture)),
        (MakeClosure, Effect::new(1, 1).counted()),
        (Declare, Effect::new(1, 0)),
        (Bind, Effect::new(2, 0)),
        (Resolve, Effect::new(1, 1)),
        (Add, Effect::new(2, 1)),
        (Sub, Effect::new(2, 1)),
        (Mul, Effect::new(2, 1)),
        (Div, Effect::new(2, 1)),
        (Mod, Effect::new(2, 1)),
        (Neg, Effect::new(1, 1)),
        (Inc, Effect::new(1, 1)),
        (Dec, Effect::new(1, 1)),
        (Eq, Effect::new(2, 1)),
        (Neq, Effect::new(2, 1)),
        (Lt, Effect::new(2, 1)),
        (Lte, Effect::new(2, 1)),
        (Gt, Effect::new(2, 1)),
        (Gte, Effect::new(2, 1)),
        (Not, Effect::new(1, 1)),
        (Truthy, Effect::new(1, 1)),
        (Cons, Effect::new(2, 1)),
        (Car, Effect::new(1, 1)),
        (Cdr, Effect::new(1, 1)),
        (Empty, Effect::new(1, 1)),
        (Nth, Effect::new(2, 1)),
        (MakeList, Effect::new(0, 1).counted()),
        (MakeVector, Effect::new(0, 1).counted()),
        (Call, Effect::new(1, 1).counted()),
        (CallSelf, Effect::new(0, 1).counted()),
        (TailCall, Effect::new(1, 0).counted().terminates()),
        (TailSelf, Effect::new(0, 0).counted().terminates()),
        (Jump, Effect::new(0, 0).operand(K::Label)),
        (CondJump, Effect::new(1, 0).operand(K::Label)),
        (Label, Effect::new(0, 0).operand(K::Label).ignorable()),
        (NoOp, Effect::new(0, 0).ignorable()),
        (Return, Effect::new(1, 0).terminates()),
        (ReturnTrue, Effect::new(0, 0).terminates()),
        (ReturnFalse, Effect::new(0, 0).terminates()),
        (ReturnNull, Effect::new(0, 0).terminates()),
        (Panic, Effect::new(1, 0).terminates()),
    ]
};

static EFFECTS: LazyLock<[Option<Effect>; Opcode::COUNT]> = LazyLock::new(|| {
    let mut table = [None; Opcode::COUNT];
    for (op, effect) in DECLARED {
        table[*op as usize] = Some(*effect);
    }
    table
});

// ── Instructions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperandError {
    #[error("{op} takes a {kind} operand")]
    Missing { op: Opcode, kind: OperandKind },
    #[error("{op} takes no operand")]
    Unexpected { op: Opcode },
    #[error("operand {value} out of range for {op}")]
    Range { op: Opcode, value: u32 },
    #[error("{op} has no declared effect")]
    Undeclared { op: Opcode },
}

/// One VM instruction. Jump operands name labels until finalization and
/// absolute code offsets after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    PushNull,
    PushTrue,
    PushFalse,
    Zero,
    PosOne,
    PosTwo,
    NegOne,
    Const(u32),
    Pop,
    Dup,
    Load(u32),
    Store(u32),
    NewRef,
    SiblingRef,
    BindRef,
    Deref,
    Arg(u32),
    RestArg(u32),
    ArgLen,
    Closure(u32),
    MakeClosure(u32),
    Declare,
    Bind,
    Resolve,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Inc,
    Dec,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Not,
    Truthy,
    Cons,
    Car,
    Cdr,
    Empty,
    Nth,
    MakeList(u32),
    MakeVector(u32),
    Call(u32),
    CallSelf(u32),
    TailCall(u32),
    TailSelf(u32),
    Jump(u32),
    CondJump(u32),
    Label(u32),
    NoOp,
    Return,
    ReturnTrue,
    ReturnFalse,
    ReturnNull,
    Panic,
}

impl Instruction {
    /// Checked constructor: operand presence must match the opcode's declared
    /// operand kind and fit in 24 bits.
    pub fn new(op: Opcode, operand: Option<u32>) -> Result<Instruction, OperandError> {
        use Instruction as I;
        let kind = op.effect().map_err(|_| OperandError::Undeclared { op })?.operand;
        let operand = match (kind, operand) {
            (OperandKind::None, None) => 0,
            (OperandKind::None, Some(_)) => return Err(OperandError::Unexpected { op }),
            (kind, None) => return Err(OperandError::Missing { op, kind }),
            (_, Some(value)) if value > MAX_OPERAND => return Err(OperandError::Range { op, value }),
            (_, Some(value)) => value,
        };
        Ok(match op {
            Opcode::PushNull => I::PushNull,
            Opcode::PushTrue => I::PushTrue,
            Opcode::PushFalse => I::PushFalse,
            Opcode::Zero => I::Zero,
            Opcode::PosOne => I::PosOne,
            Opcode::PosTwo => I::PosTwo,
            Opcode::NegOne => I::NegOne,
            Opcode::Const => I::Const(operand),
            Opcode::Pop => I::Pop,
            Opcode::Dup => I::Dup,
            Opcode::Load => I::Load(operand),
            Opcode::Store => I::Store(operand),
            Opcode::NewRef => I::NewRef,
            Opcode::SiblingRef => I::SiblingRef,
            Opcode::BindRef => I::BindRef,
            Opcode::Deref => I::Deref,
            Opcode::Arg => I::Arg(operand),
            Opcode::RestArg => I::RestArg(operand),
            Opcode::ArgLen => I::ArgLen,
            Opcode::Closure => I::Closure(operand),
            Opcode::MakeClosure => I::MakeClosure(operand),
            Opcode::Declare => I::Declare,
            Opcode::Bind => I::Bind,
            Opcode::Resolve => I::Resolve,
            Opcode::Add => I::Add,
            Opcode::Sub => I::Sub,
            Opcode::Mul => I::Mul,
            Opcode::Div => I::Div,
            Opcode::Mod => I::Mod,
            Opcode::Neg => I::Neg,
            Opcode::Inc => I::Inc,
            Opcode::Dec => I::Dec,
            Opcode::Eq => I::Eq,
            Opcode::Neq => I::Neq,
            Opcode::Lt => I::Lt,
            Opcode::Lte => I::Lte,
            Opcode::Gt => I::Gt,
            Opcode::Gte => I::Gte,
            Opcode::Not => I::Not,
            Opcode::Truthy => I::Truthy,
            Opcode::Cons => I::Cons,
            Opcode::Car => I::Car,
            Opcode::Cdr => I::Cdr,
            Opcode::Empty => I::Empty,
            Opcode::Nth => I::Nth,
            Opcode::MakeList => I::MakeList(operand),
            Opcode::MakeVector => I::MakeVector(operand),
            Opcode::Call => I::Call(operand),
            Opcode::CallSelf => I::CallSelf(operand),
            Opcode::TailCall => I::TailCall(operand),
            Opcode::TailSelf => I::TailSelf(operand),
            Opcode::Jump => I::Jump(operand),
            Opcode::CondJump => I::CondJump(operand),
            Opcode::Label => I::Label(operand),
            Opcode::NoOp => I::NoOp,
            Opcode::Return => I::Return,
            Opcode::ReturnTrue => I::ReturnTrue,
            Opcode::ReturnFalse => I::ReturnFalse,
            Opcode::ReturnNull => I::ReturnNull,
            Opcode::Panic => I::Panic,
        })
    }

    pub fn opcode(self) -> Opcode {
        use Instruction as I;
        match self {
            I::PushNull => Opcode::PushNull,
            I::PushTrue => Opcode::PushTrue,
            I::PushFalse => Opcode::PushFalse,
            I::Zero => Opcode::Zero,
            I::PosOne => Opcode::PosOne,
            I::PosTwo => Opcode::PosTwo,
            I::NegOne => Opcode::NegOne,
            I::Const(_) => Opcode::Const,
            I::Pop => Opcode::Pop,
            I::Dup => Opcode::Dup,
            I::Load(_) => Opcode::Load,
            I::Store(_) => Opcode::Store,
            I::NewRef => Opcode::NewRef,
            I::SiblingRef => Opcode::SiblingRef,
            I::BindRef => Opcode::BindRef,
            I::Deref => Opcode::Deref,
            I::Arg(_) => Opcode::Arg,
            I::RestArg(_) => Opcode::RestArg,
            I::ArgLen => Opcode::ArgLen,
            I::Closure(_) => Opcode::Closure,
            I::MakeClosure(_) => Opcode::MakeClosure,
            I::Declare => Opcode::Declare,
            I::Bind => Opcode::Bind,
            I::Resolve => Opcode::Resolve,
            I::Add => Opcode::Add,
            I::Sub => Opcode::Sub,
            I::Mul => Opcode::Mul,
            I::Div => Opcode::Div,
            I::Mod => Opcode::Mod,
            I::Neg => Opcode::Neg,
            I::Inc => Opcode::Inc,
            I::Dec => Opcode::Dec,
            I::Eq => Opcode::Eq,
            I::Neq => Opcode::Neq,
            I::Lt => Opcode::Lt,
            I::Lte => Opcode::Lte,
            I::Gt => Opcode::Gt,
            I::Gte => Opcode::Gte,
            I::Not => Opcode::Not,
            I::Truthy => Opcode::Truthy,
            I::Cons => Opcode::Cons,
            I::Car => Opcode::Car,
            I::Cdr => Opcode::Cdr,
            I::Empty => Opcode::Empty,
            I::Nth => Opcode::Nth,
            I::MakeList(_) => Opcode::MakeList,
            I::MakeVector(_) => Opcode::MakeVector,
            I::Call(_) => Opcode::Call,
            I::CallSelf(_) => Opcode::CallSelf,
            I::TailCall(_) => Opcode::TailCall,
            I::TailSelf(_) => Opcode::TailSelf,
            I::Jump(_) => Opcode::Jump,
            I::CondJump(_) => Opcode::CondJump,
            I::Label(_) => Opcode::Label,
            I::NoOp => Opcode::NoOp,
            I::Return => Opcode::Return,
            I::ReturnTrue => Opcode::ReturnTrue,
            I::ReturnFalse => Opcode::ReturnFalse,
            I::ReturnNull => Opcode::ReturnNull,
            I::Panic => Opcode::Panic,
        }
    }

    pub fn operand(self) -> Option<u32> {
        use Instruction as I;
        match self {
            I::Const(n)
            | I::Load(n)
            | I::Store(n)
            | I::Arg(n)
            | I::RestArg(n)
            | I::Closure(n)
            | I::MakeClosure(n)
            | I::MakeList(n)
            | I::MakeVector(n)
            | I::Call(n)
            | I::CallSelf(n)
            | I::TailCall(n)
            | I::TailSelf(n)
            | I::Jump(n)
            | I::CondJump(n)
            | I::Label(n) => Some(n),
            _ => None,
        }
    }

    /// Same opcode, new operand, range-checked. Instructions without an
    /// operand come back unchanged.
    pub fn with_operand(self, operand: u32) -> Result<Instruction, OperandError> {
        match self.operand() {
            Some(_) => Instruction::new(self.opcode(), Some(operand)),
            None => Ok(self),
        }
    }

    /// Values this instruction pops, including the counted arguments of a
    /// dynamic-pop opcode.
    pub fn pops(self) -> Result<usize, InternalError> {
        let effect = self.opcode().effect()?;
        let dynamic = if effect.dynamic_pop { self.operand().unwrap_or(0) as usize } else { 0 };
        Ok(effect.pop + dynamic)
    }

    pub fn pushes(self) -> Result<usize, InternalError> {
        Ok(self.opcode().effect()?.push)
    }

    /// Checks the operand range. Constructing a variant directly bypasses
    /// `new`, so the encoder calls this on everything it emits.
    pub fn check(self) -> Result<Instruction, OperandError> {
        match self.operand() {
            Some(value) if value > MAX_OPERAND => Err(OperandError::Range { op: self.opcode(), value }),
            _ => Ok(self),
        }
    }

    /// True when the instruction always leaves a boolean on the stack.
    pub fn produces_bool(self) -> bool {
        use Instruction as I;
        matches!(
            self,
            I::PushTrue | I::PushFalse | I::Eq | I::Neq | I::Lt | I::Lte | I::Gt | I::Gte | I::Not | I::Truthy | I::Empty
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand() {
            Some(n) => write!(f, "{} {}", self.opcode(), n),
            None => write!(f, "{}", self.opcode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isa_every_opcode_has_an_effect() {
        let mut seen = [false; Opcode::COUNT];
        for (op, _) in DECLARED {
            assert!(!seen[*op as usize], "{op} declared twice");
            seen[*op as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert!(Opcode::Panic.effect().is_ok());
    }

    #[test]
    fn isa_new_round_trips_through_opcode() {
        for (op, effect) in DECLARED {
            let operand = match effect.operand {
                OperandKind::None => None,
                _ => Some(7),
            };
            let ins = Instruction::new(*op, operand).unwrap();
            assert_eq!(ins.opcode(), *op);
            assert_eq!(ins.operand(), operand);
        }
    }

    #[test]
    fn isa_operand_presence_checked() {
        assert_eq!(
            Instruction::new(Opcode::Load, None),
            Err(OperandError::Missing { op: Opcode::Load, kind: OperandKind::Local })
        );
        assert_eq!(Instruction::new(Opcode::Add, Some(1)), Err(OperandError::Unexpected { op: Opcode::Add }));
    }

    #[test]
    fn isa_operand_range_checked() {
        assert!(Instruction::new(Opcode::Const, Some(MAX_OPERAND)).is_ok());
        assert_eq!(
            Instruction::new(Opcode::Const, Some(MAX_OPERAND + 1)),
            Err(OperandError::Range { op: Opcode::Const, value: MAX_OPERAND + 1 })
        );
        assert!(Instruction::Jump(MAX_OPERAND + 1).check().is_err());
    }

    #[test]
    fn isa_with_operand_is_range_checked() {
        assert_eq!(Instruction::Store(3).with_operand(9), Ok(Instruction::Store(9)));
        assert_eq!(Instruction::Add.with_operand(9), Ok(Instruction::Add));
        assert_eq!(
            Instruction::Jump(0).with_operand(MAX_OPERAND + 1),
            Err(OperandError::Range { op: Opcode::Jump, value: MAX_OPERAND + 1 })
        );
    }

    #[test]
    fn isa_dynamic_pop_counts_operand() {
        assert_eq!(Instruction::Call(3).pops().unwrap(), 4);
        assert_eq!(Instruction::CallSelf(2).pops().unwrap(), 2);
        assert_eq!(Instruction::MakeList(5).pops().unwrap(), 5);
        assert_eq!(Instruction::Add.pops().unwrap(), 2);
        assert_eq!(Instruction::Dup.pushes().unwrap(), 2);
    }

    #[test]
    fn isa_terminators() {
        assert!(Opcode::Return.effect().unwrap().terminates);
        assert!(Opcode::TailSelf.effect().unwrap().terminates);
        assert!(!Opcode::Jump.effect().unwrap().terminates);
        assert!(Opcode::Jump.is_unconditional().unwrap());
        assert!(!Opcode::CondJump.is_unconditional().unwrap());
    }

    #[test]
    fn isa_display() {
        assert_eq!(Instruction::Load(2).to_string(), "Load 2");
        assert_eq!(Instruction::ReturnTrue.to_string(), "ReturnTrue");
    }
}
