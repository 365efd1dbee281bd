mod ops;
mod procedure;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::isa::Instruction;
use crate::namespace::NamespaceError;
use crate::value::{List, Reference, Symbol, Value};

pub use procedure::{Arity, Closure, Procedure, Runnable};

#[derive(Debug, Clone, thiserror::Error)]
pub enum VmError {
    #[error("{0}")]
    Type(String),
    #[error("{name} expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: Arity, got: usize },
    #[error("panic: {0}")]
    Panic(Value),
    #[error("unbound symbol: {0}")]
    Unbound(Symbol),
    #[error("value is not callable: {0}")]
    NotCallable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("reference cell read before it was bound")]
    UnboundReference,
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
    #[error("operand stack overflow at pc {0}")]
    StackOverflow(usize),
    #[error("operand stack underflow at pc {0}")]
    StackUnderflow(usize),
    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),
    #[error("reference cell bound twice")]
    ReboundReference,
    #[error("{what} {index} out of range at pc {pc}")]
    BadOperand { what: &'static str, index: u32, pc: usize },
}

/// Nested non-tail calls allowed in one run unless configured otherwise.
pub const DEFAULT_CALL_DEPTH: usize = 100_000;

pub(crate) type VmResult<T> = Result<T, VmError>;

/// Calls any callable value with already-evaluated arguments.
pub fn call_value(callee: &Value, args: Vec<Value>) -> VmResult<Value> {
    match callee {
        Value::Closure(c) => c.call(args),
        Value::Procedure(p) => Ok(Value::Closure(p.call(args))),
        Value::Native(n) => {
            n.check_arity(args.len())?;
            n.call(&args)
        }
        other => Err(VmError::NotCallable(other.to_string())),
    }
}

// ── Machine ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Running,
    Success,
    Failure,
}

enum Flow {
    /// The current activation returned.
    Done(Value),
    /// Tail call into a different closure; the frame is replaced.
    Enter(Arc<Closure>, Vec<Value>),
    /// Non-tail call; the current frame waits for the result.
    Call(Arc<Closure>, Vec<Value>),
}

/// One activation. The memory region holds the operand stack (growing down
/// from `local_base`) followed by the locals.
struct Frame {
    closure: Arc<Closure>,
    runnable: Arc<Runnable>,
    args: Vec<Value>,
    mem: Vec<Value>,
    local_base: usize,
    sp: usize,
    pc: usize,
}

impl Frame {
    fn new(closure: Arc<Closure>, args: Vec<Value>) -> Self {
        let runnable = Arc::clone(&closure.procedure().runnable);
        let local_base = runnable.stack_size;
        let mem = vec![Value::Nil; runnable.stack_size + runnable.local_count];
        Frame { closure, runnable, args, mem, local_base, sp: local_base, pc: 0 }
    }
}

pub(crate) struct Machine {
    frame: Frame,
    /// Suspended callers, innermost last.
    callers: Vec<Frame>,
    max_depth: usize,
    status: Status,
}

impl Machine {
    pub(crate) fn new(closure: Arc<Closure>, args: Vec<Value>, max_depth: usize) -> Self {
        Machine { frame: Frame::new(closure, args), callers: Vec::new(), max_depth, status: Status::Running }
    }

    /// Self tail call: same code, fresh arguments, cleared locals.
    fn reset(&mut self, argc: usize) -> VmResult<()> {
        let mut args = std::mem::take(&mut self.frame.args);
        args.clear();
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        let frame = &mut self.frame;
        frame.args = args;
        frame.mem[frame.local_base..].fill(Value::Nil);
        frame.sp = frame.local_base;
        frame.pc = 0;
        Ok(())
    }

    pub(crate) fn run(mut self) -> VmResult<Value> {
        loop {
            match self.execute()? {
                Flow::Done(value) => match self.callers.pop() {
                    Some(caller) => {
                        self.frame = caller;
                        self.status = Status::Running;
                        self.push(value)?;
                    }
                    None => return Ok(value),
                },
                Flow::Enter(closure, args) => {
                    trace!(target: "kiln::vm", callee = closure.procedure().display_name(), "tail call");
                    closure.check_arity(args.len())?;
                    self.frame = Frame::new(closure, args);
                    self.status = Status::Running;
                }
                Flow::Call(closure, args) => {
                    closure.check_arity(args.len())?;
                    if self.callers.len() + 1 >= self.max_depth {
                        return Err(VmError::CallDepth(self.max_depth));
                    }
                    let caller = std::mem::replace(&mut self.frame, Frame::new(closure, args));
                    self.callers.push(caller);
                    self.status = Status::Running;
                }
            }
        }
    }

    #[inline]
    fn push(&mut self, value: Value) -> VmResult<()> {
        let frame = &mut self.frame;
        if frame.sp == 0 {
            return Err(VmError::StackOverflow(frame.pc));
        }
        frame.sp -= 1;
        frame.mem[frame.sp] = value;
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> VmResult<Value> {
        let frame = &mut self.frame;
        if frame.sp >= frame.local_base {
            return Err(VmError::StackUnderflow(frame.pc));
        }
        let value = std::mem::take(&mut frame.mem[frame.sp]);
        frame.sp += 1;
        Ok(value)
    }

    fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.pop()?);
        }
        Ok(values)
    }

    fn binary(&mut self, f: fn(&Value, &Value) -> VmResult<Value>) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(&a, &b)?)
    }

    fn unary(&mut self, f: impl FnOnce(&Value) -> VmResult<Value>) -> VmResult<()> {
        let a = self.pop()?;
        self.push(f(&a)?)
    }

    fn ordered(&mut self, op: &str, accept: fn(Ordering) -> bool) -> VmResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ord = ops::compare(op, &a, &b)?;
        self.push(Value::Bool(accept(ord)))
    }

    fn finish(&mut self, value: Value) -> VmResult<Flow> {
        self.status = Status::Success;
        Ok(Flow::Done(value))
    }

    fn bad_operand(&self, what: &'static str, index: u32) -> VmError {
        VmError::BadOperand { what, index, pc: self.frame.pc - 1 }
    }

    fn local(&mut self, l: u32) -> VmResult<&mut Value> {
        let at = self.frame.local_base + l as usize;
        if at >= self.frame.mem.len() {
            return Err(self.bad_operand("local", l));
        }
        Ok(&mut self.frame.mem[at])
    }

    fn execute(&mut self) -> VmResult<Flow> {
        let runnable = Arc::clone(&self.frame.runnable);
        let code = &runnable.code;
        while self.status == Status::Running {
            let Some(&ins) = code.get(self.frame.pc) else {
                // code that runs off the end yields nil
                return self.finish(Value::Nil);
            };
            self.frame.pc += 1;
            match ins {
                Instruction::PushNull => self.push(Value::Nil)?,
                Instruction::PushTrue => self.push(Value::Bool(true))?,
                Instruction::PushFalse => self.push(Value::Bool(false))?,
                Instruction::Zero => self.push(Value::Integer(0))?,
                Instruction::PosOne => self.push(Value::Integer(1))?,
                Instruction::PosTwo => self.push(Value::Integer(2))?,
                Instruction::NegOne => self.push(Value::Integer(-1))?,
                Instruction::Const(k) => {
                    let value = runnable.constants.get(k as usize).cloned().ok_or_else(|| self.bad_operand("constant", k))?;
                    self.push(value)?;
                }
                Instruction::Pop => {
                    self.pop()?;
                }
                Instruction::Dup => {
                    let value = self.pop()?;
                    self.push(value.clone())?;
                    self.push(value)?;
                }
                Instruction::Load(l) => {
                    let value = self.local(l)?.clone();
                    self.push(value)?;
                }
                Instruction::Store(l) => {
                    let value = self.pop()?;
                    *self.local(l)? = value;
                }
                Instruction::NewRef => self.push(Value::Ref(Reference::new()))?,
                Instruction::SiblingRef => match self.pop()? {
                    Value::Ref(cell) => self.push(Value::Ref(cell.sibling()))?,
                    other => return Err(VmError::Type(format!("cannot extend {}", other.type_name()))),
                },
                Instruction::BindRef => {
                    let value = self.pop()?;
                    match self.pop()? {
                        Value::Ref(cell) => cell.bind(value)?,
                        other => return Err(VmError::Type(format!("cannot bind {}", other.type_name()))),
                    }
                }
                Instruction::Deref => match self.pop()? {
                    Value::Ref(cell) => {
                        let value = cell.get().ok_or(VmError::UnboundReference)?;
                        self.push(value)?;
                    }
                    other => return Err(VmError::Type(format!("cannot dereference {}", other.type_name()))),
                },
                Instruction::Arg(a) => {
                    let value = self.frame.args.get(a as usize).cloned().unwrap_or_default();
                    self.push(value)?;
                }
                Instruction::RestArg(a) => {
                    let rest: List = self.frame.args.iter().skip(a as usize).cloned().collect();
                    self.push(Value::List(rest))?;
                }
                Instruction::ArgLen => self.push(Value::Integer(self.frame.args.len() as i64))?,
                Instruction::Closure(c) => {
                    let captured = self.frame.closure.captured().get(c as usize).cloned();
                    let value = captured.ok_or_else(|| self.bad_operand("capture", c))?;
                    self.push(value)?;
                }
                Instruction::MakeClosure(n) => {
                    let procedure = match self.pop()? {
                        Value::Procedure(p) => p,
                        other => return Err(VmError::Type(format!("cannot close over {}", other.type_name()))),
                    };
                    let mut captured = self.pop_n(n as usize)?;
                    captured.reverse();
                    self.push(Value::Closure(procedure.call(captured)))?;
                }
                Instruction::Declare => {
                    let name = self.pop_symbol()?;
                    runnable.globals.declare(&name);
                }
                Instruction::Bind => {
                    let name = self.pop_symbol()?;
                    let value = self.pop()?;
                    runnable.globals.bind(&name, value)?;
                }
                Instruction::Resolve => {
                    let name = self.pop_symbol()?;
                    let value = runnable.globals.resolve(&name).ok_or(VmError::Unbound(name))?;
                    self.push(value)?;
                }
                Instruction::Add => self.binary(ops::add)?,
                Instruction::Sub => self.binary(ops::sub)?,
                Instruction::Mul => self.binary(ops::mul)?,
                Instruction::Div => self.binary(ops::div)?,
                Instruction::Mod => self.binary(ops::rem)?,
                Instruction::Neg => self.unary(ops::neg)?,
                Instruction::Inc => self.unary(|v| ops::offset(v, 1))?,
                Instruction::Dec => self.unary(|v| ops::offset(v, -1))?,
                Instruction::Eq => self.binary(|a, b| Ok(Value::Bool(ops::equal(a, b))))?,
                Instruction::Neq => self.binary(|a, b| Ok(Value::Bool(!ops::equal(a, b))))?,
                Instruction::Lt => self.ordered("<", Ordering::is_lt)?,
                Instruction::Lte => self.ordered("<=", Ordering::is_le)?,
                Instruction::Gt => self.ordered(">", Ordering::is_gt)?,
                Instruction::Gte => self.ordered(">=", Ordering::is_ge)?,
                Instruction::Not => self.unary(|v| Ok(Value::Bool(!v.is_truthy())))?,
                Instruction::Truthy => self.unary(|v| Ok(Value::Bool(v.is_truthy())))?,
                Instruction::Cons => {
                    let tail = self.pop()?;
                    let head = self.pop()?;
                    self.push(ops::cons(head, &tail)?)?;
                }
                Instruction::Car => self.unary(ops::car)?,
                Instruction::Cdr => self.unary(ops::cdr)?,
                Instruction::Empty => self.unary(|v| ops::is_empty(v).map(Value::Bool))?,
                Instruction::Nth => self.binary(ops::nth)?,
                Instruction::MakeList(n) => {
                    let items = self.pop_n(n as usize)?;
                    self.push(Value::list(items.into_iter().rev()))?;
                }
                Instruction::MakeVector(n) => {
                    let items = self.pop_n(n as usize)?;
                    self.push(Value::vector(items.into_iter().rev()))?;
                }
                Instruction::Call(n) => {
                    let callee = self.pop()?;
                    let args = self.pop_n(n as usize)?;
                    match callee {
                        Value::Closure(c) => return Ok(Flow::Call(c, args)),
                        other => {
                            let result = call_value(&other, args)?;
                            self.push(result)?;
                        }
                    }
                }
                Instruction::CallSelf(n) => {
                    let args = self.pop_n(n as usize)?;
                    return Ok(Flow::Call(Arc::clone(&self.frame.closure), args));
                }
                Instruction::TailCall(n) => {
                    let callee = self.pop()?;
                    match callee {
                        Value::Closure(c) if Arc::ptr_eq(&c, &self.frame.closure) => {
                            c.check_arity(n as usize)?;
                            self.reset(n as usize)?;
                        }
                        Value::Closure(c) => {
                            let args = self.pop_n(n as usize)?;
                            return Ok(Flow::Enter(c, args));
                        }
                        other => {
                            let args = self.pop_n(n as usize)?;
                            let result = call_value(&other, args)?;
                            return self.finish(result);
                        }
                    }
                }
                Instruction::TailSelf(n) => self.reset(n as usize)?,
                Instruction::Jump(target) => self.frame.pc = target as usize,
                Instruction::CondJump(target) => {
                    if self.pop()?.is_truthy() {
                        self.frame.pc = target as usize;
                    }
                }
                Instruction::Label(_) | Instruction::NoOp => {}
                Instruction::Return => {
                    let value = self.pop()?;
                    return self.finish(value);
                }
                Instruction::ReturnTrue => return self.finish(Value::Bool(true)),
                Instruction::ReturnFalse => return self.finish(Value::Bool(false)),
                Instruction::ReturnNull => return self.finish(Value::Nil),
                Instruction::Panic => {
                    let value = self.pop()?;
                    self.status = Status::Failure;
                    return Err(VmError::Panic(value));
                }
            }
        }
        Ok(Flow::Done(Value::Nil))
    }

    fn pop_symbol(&mut self) -> VmResult<Symbol> {
        match self.pop()? {
            Value::Symbol(s) => Ok(s),
            other => Err(VmError::Type(format!("expected a symbol, got {}", other.type_name()))),
        }
    }
}
