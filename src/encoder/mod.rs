use crate::isa::{Instruction, Opcode, OperandError, MAX_OPERAND};
use crate::namespace::NamespaceRef;
use crate::options::Options;
use crate::value::{Symbol, Value};
use crate::vm::Arity;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("duplicate name in scope: {0}")]
    DuplicateName(Symbol),
    #[error("unbalanced scope: {0}")]
    UnbalancedScope(&'static str),
    #[error(transparent)]
    BadOperand(#[from] OperandError),
    #[error("malformed {form}: {reason}")]
    Malformed { form: &'static str, reason: String },
    #[error("{name} expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: Arity, got: usize },
}

impl EncodeError {
    pub(crate) fn malformed(form: &'static str, reason: impl Into<String>) -> Self {
        EncodeError::Malformed { form, reason: reason.into() }
    }
}

// ── Cells and scopes ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Value,
    /// A reference cell that must be dereferenced on read.
    Reference,
    /// The rest parameter; reads collect the trailing arguments.
    Rest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub name: Symbol,
    pub disposition: Disposition,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Local,
    Argument,
    Closure,
}

/// Where a lexical name lives, from the current unit's point of view.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub scope: ScopeKind,
    pub cell: Cell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: Symbol,
    pub disposition: Disposition,
}

// ── Encoded ──────────────────────────────────────────────────────────

/// A raw unit: instructions with symbolic labels, ready for verification.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub name: Option<Symbol>,
    pub code: Vec<Instruction>,
    pub constants: Vec<Value>,
    pub closure: Vec<Capture>,
    pub globals: NamespaceRef,
    pub arity: Arity,
    pub local_count: u32,
    pub label_count: u32,
}

impl Encoded {
    pub fn new_label(&mut self) -> u32 {
        let label = self.label_count;
        self.label_count += 1;
        label
    }

    pub fn add_constant(&mut self, value: Value) -> Result<u32, EncodeError> {
        intern(&mut self.constants, value)
    }
}

/// Linear dedup, like a chunk's constant pool: an equal value yields the
/// existing index.
fn intern(pool: &mut Vec<Value>, value: Value) -> Result<u32, EncodeError> {
    if let Some(i) = pool.iter().position(|c| *c == value) {
        return Ok(i as u32);
    }
    let index = pool.len() as u32;
    if index > MAX_OPERAND {
        return Err(OperandError::Range { op: Opcode::Const, value: index }.into());
    }
    pool.push(value);
    Ok(index)
}

// ── Encoder ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Params {
    cells: Vec<Cell>,
}

#[derive(Debug)]
struct Unit {
    name: Option<Symbol>,
    code: Vec<Instruction>,
    constants: Vec<Value>,
    closure: Vec<Capture>,
    scopes: Vec<Vec<Cell>>,
    params: Vec<Params>,
    arity: Option<Arity>,
    next_local: u32,
    max_locals: u32,
    labels: u32,
}

impl Unit {
    fn new(name: Option<Symbol>) -> Self {
        Unit {
            name,
            code: Vec::new(),
            constants: Vec::new(),
            closure: Vec::new(),
            scopes: Vec::new(),
            params: Vec::new(),
            arity: None,
            next_local: 0,
            max_locals: 0,
            labels: 0,
        }
    }

    fn local(&self, name: &Symbol) -> Option<&Cell> {
        self.scopes.iter().rev().flat_map(|s| s.iter().rev()).find(|c| c.name == *name)
    }

    fn param(&self, name: &Symbol) -> Option<&Cell> {
        self.params.last()?.cells.iter().find(|c| c.name == *name)
    }

    fn capture(&self, name: &Symbol) -> Option<(u32, &Capture)> {
        self.closure.iter().enumerate().find(|(_, c)| c.name == *name).map(|(i, c)| (i as u32, c))
    }

    /// Records a capture once; the index of an existing capture is stable.
    fn add_capture(&mut self, name: &Symbol, disposition: Disposition) -> u32 {
        if let Some((i, _)) = self.capture(name) {
            return i;
        }
        self.closure.push(Capture { name: name.clone(), disposition });
        (self.closure.len() - 1) as u32
    }
}

/// Builds units of code. Units nest: the last one is being compiled and
/// each unit's parent is the one before it.
#[derive(Debug)]
pub struct Encoder {
    units: Vec<Unit>,
    globals: NamespaceRef,
    options: Options,
    /// Globals declared by the forms being compiled; they reach the
    /// namespace only if compilation succeeds.
    declared: Vec<Symbol>,
}

impl Encoder {
    pub fn new(globals: NamespaceRef, options: Options) -> Self {
        Encoder { units: vec![Unit::new(None)], globals, options, declared: Vec::new() }
    }

    fn unit(&self) -> &Unit {
        &self.units[self.units.len() - 1]
    }

    fn unit_mut(&mut self) -> &mut Unit {
        let last = self.units.len() - 1;
        &mut self.units[last]
    }

    pub fn globals(&self) -> &NamespaceRef {
        &self.globals
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    // ── Globals ──

    pub fn declare(&mut self, name: &Symbol) {
        if !self.declared.contains(name) {
            self.declared.push(name.clone());
        }
    }

    /// Declared by this compilation or already known to the namespace.
    pub fn is_declared(&self, name: &Symbol) -> bool {
        self.declared.contains(name) || self.globals.is_declared(name)
    }

    /// Writes the pending declarations through to the namespace.
    pub fn commit_declarations(&mut self) {
        for name in self.declared.drain(..) {
            self.globals.declare(&name);
        }
    }

    pub fn name(&self) -> Option<&Symbol> {
        self.unit().name.as_ref()
    }

    pub fn arity(&self) -> Option<Arity> {
        self.unit().arity
    }

    pub fn code(&self) -> &[Instruction] {
        &self.unit().code
    }

    pub fn last_instruction(&self) -> Option<Instruction> {
        self.unit().code.last().copied()
    }

    pub fn constant(&self, index: u32) -> Option<&Value> {
        self.unit().constants.get(index as usize)
    }

    // ── Emission ──

    pub fn emit(&mut self, ins: Instruction) -> Result<(), EncodeError> {
        let ins = ins.check()?;
        self.unit_mut().code.push(ins);
        Ok(())
    }

    pub fn emit_op(&mut self, op: Opcode, operand: Option<u32>) -> Result<(), EncodeError> {
        let ins = Instruction::new(op, operand)?;
        self.emit(ins)
    }

    pub fn new_label(&mut self) -> u32 {
        let unit = self.unit_mut();
        let label = unit.labels;
        unit.labels += 1;
        label
    }

    pub fn add_constant(&mut self, value: Value) -> Result<u32, EncodeError> {
        intern(&mut self.unit_mut().constants, value)
    }

    // ── Locals ──

    pub fn push_scope(&mut self) {
        self.unit_mut().scopes.push(Vec::new());
    }

    /// Pops the innermost scope and reclaims its local slots.
    pub fn pop_scope(&mut self) -> Result<(), EncodeError> {
        let unit = self.unit_mut();
        let scope = unit.scopes.pop().ok_or(EncodeError::UnbalancedScope("pop without push"))?;
        unit.next_local -= scope.len() as u32;
        Ok(())
    }

    pub fn add_local(&mut self, name: &Symbol, disposition: Disposition) -> Result<Cell, EncodeError> {
        let unit = self.unit_mut();
        let index = unit.next_local;
        let scope = unit.scopes.last_mut().ok_or(EncodeError::UnbalancedScope("local outside any scope"))?;
        if scope.iter().any(|c| c.name == *name) {
            return Err(EncodeError::DuplicateName(name.clone()));
        }
        if index > MAX_OPERAND {
            return Err(OperandError::Range { op: Opcode::Store, value: index }.into());
        }
        let cell = Cell { name: name.clone(), disposition, index };
        scope.push(cell.clone());
        unit.next_local += 1;
        unit.max_locals = unit.max_locals.max(unit.next_local);
        Ok(cell)
    }

    pub fn resolve_local(&self, name: &Symbol) -> Option<Cell> {
        self.unit().local(name).cloned()
    }

    // ── Parameters ──

    /// Opens a parameter frame. With `rest`, the last name collects the
    /// trailing arguments.
    pub fn push_params(&mut self, names: &[Symbol], rest: bool) -> Result<(), EncodeError> {
        let mut cells: Vec<Cell> = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if cells.iter().any(|c| c.name == *name) {
                return Err(EncodeError::DuplicateName(name.clone()));
            }
            let disposition = if rest && i == names.len() - 1 { Disposition::Rest } else { Disposition::Value };
            cells.push(Cell { name: name.clone(), disposition, index: i as u32 });
        }
        let unit = self.unit_mut();
        if unit.arity.is_none() {
            let fixed = names.len() - usize::from(rest && !names.is_empty());
            unit.arity = Some(if rest { Arity::at_least(fixed) } else { Arity::exact(fixed) });
        }
        unit.params.push(Params { cells });
        Ok(())
    }

    pub fn pop_params(&mut self) -> Result<(), EncodeError> {
        self.unit_mut().params.pop().map(|_| ()).ok_or(EncodeError::UnbalancedScope("params popped without push"))
    }

    pub fn resolve_param(&self, name: &Symbol) -> Option<Cell> {
        self.unit().param(name).cloned()
    }

    // ── Scoped resolution ──

    /// Local, then parameter, then the enclosing units. A hit in an
    /// enclosing unit is captured by every unit between it and this one.
    pub fn resolve_scoped(&mut self, name: &Symbol) -> Option<Resolved> {
        let depth = self.units.len() - 1;
        self.resolve_at(depth, name)
    }

    fn resolve_at(&mut self, depth: usize, name: &Symbol) -> Option<Resolved> {
        let unit = &self.units[depth];
        if let Some(cell) = unit.local(name) {
            return Some(Resolved { scope: ScopeKind::Local, cell: cell.clone() });
        }
        if let Some(cell) = unit.param(name) {
            return Some(Resolved { scope: ScopeKind::Argument, cell: cell.clone() });
        }
        if let Some((index, capture)) = unit.capture(name) {
            let cell = Cell { name: name.clone(), disposition: capture.disposition, index };
            return Some(Resolved { scope: ScopeKind::Closure, cell });
        }
        if depth == 0 {
            return None;
        }
        let outer = self.resolve_at(depth - 1, name)?;
        let index = self.units[depth].add_capture(name, outer.cell.disposition);
        let cell = Cell { name: name.clone(), disposition: outer.cell.disposition, index };
        Some(Resolved { scope: ScopeKind::Closure, cell })
    }

    /// Whether any enclosing unit binds the name lexically. Records nothing.
    pub fn is_lexically_bound(&self, name: &Symbol) -> bool {
        self.units.iter().any(|u| u.local(name).is_some() || u.param(name).is_some() || u.capture(name).is_some())
    }

    // ── Units ──

    pub fn child(&mut self, name: Option<Symbol>) {
        self.units.push(Unit::new(name));
    }

    /// Pops the current child unit and returns it as a raw bundle.
    pub fn finish_child(&mut self) -> Result<Encoded, EncodeError> {
        if self.units.len() < 2 {
            return Err(EncodeError::UnbalancedScope("no child unit to finish"));
        }
        let unit = self.unit();
        if !unit.scopes.is_empty() || !unit.params.is_empty() {
            return Err(EncodeError::UnbalancedScope("child finished with open scopes"));
        }
        let encoded = self.encode();
        self.units.pop();
        Ok(encoded)
    }

    /// Drops a child unit whose generation failed.
    pub fn abandon_child(&mut self) {
        if self.units.len() > 1 {
            self.units.pop();
        }
    }

    pub fn encode(&self) -> Encoded {
        let unit = self.unit();
        Encoded {
            name: unit.name.clone(),
            code: unit.code.clone(),
            constants: unit.constants.clone(),
            closure: unit.closure.clone(),
            globals: self.globals.clone(),
            arity: unit.arity.unwrap_or(Arity::exact(0)),
            local_count: unit.max_locals,
            label_count: unit.labels,
        }
    }
}
