use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::vm::{Closure, Procedure, VmError};

use super::Value;

/// The cells allocated by one `letrec`. A closure that captures cells of its
/// own group is never held strongly by the group: the slot keeps a weak
/// handle plus what is needed to rebuild it, so closures and cells form no
/// reference cycle.
#[derive(Default)]
struct Group(Mutex<Vec<Slot>>);

impl Group {
    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Slot {
    Unbound,
    Value(Value),
    Closure { cached: Weak<Closure>, procedure: Arc<Procedure>, captured: Vec<Captured> },
}

enum Captured {
    Value(Value),
    Sibling(usize),
}

/// A write-once binding cell. Mutual `letrec` bindings allocate these
/// before any value exists and bind each of them once its value is built.
#[derive(Clone)]
pub struct Reference {
    group: Arc<Group>,
    slot: usize,
}

impl Reference {
    /// A cell in a fresh group.
    pub fn new() -> Self {
        let group = Group::default();
        group.slots().push(Slot::Unbound);
        Reference { group: Arc::new(group), slot: 0 }
    }

    /// Another cell in the same group.
    pub fn sibling(&self) -> Self {
        let mut slots = self.group.slots();
        slots.push(Slot::Unbound);
        Reference { group: Arc::clone(&self.group), slot: slots.len() - 1 }
    }

    fn in_group(&self, value: &Value) -> Option<usize> {
        match value {
            Value::Ref(r) if Arc::ptr_eq(&r.group, &self.group) => Some(r.slot),
            _ => None,
        }
    }

    pub fn bind(&self, value: Value) -> Result<(), VmError> {
        let slot = match &value {
            Value::Closure(c) if c.captured().iter().any(|v| self.in_group(v).is_some()) => Slot::Closure {
                cached: Arc::downgrade(c),
                procedure: Arc::clone(c.procedure()),
                captured: c
                    .captured()
                    .iter()
                    .map(|v| match self.in_group(v) {
                        Some(i) => Captured::Sibling(i),
                        None => Captured::Value(v.clone()),
                    })
                    .collect(),
            },
            _ => Slot::Value(value),
        };
        let mut slots = self.group.slots();
        let Some(target) = slots.get_mut(self.slot) else {
            return Err(VmError::UnboundReference);
        };
        if !matches!(target, Slot::Unbound) {
            return Err(VmError::ReboundReference);
        }
        *target = slot;
        Ok(())
    }

    /// The bound value. A closure whose last strong handle is gone is
    /// rebuilt over the same cells.
    pub fn get(&self) -> Option<Value> {
        let mut slots = self.group.slots();
        match slots.get_mut(self.slot)? {
            Slot::Unbound => None,
            Slot::Value(v) => Some(v.clone()),
            Slot::Closure { cached, procedure, captured } => {
                if let Some(c) = cached.upgrade() {
                    return Some(Value::Closure(c));
                }
                let values = captured
                    .iter()
                    .map(|c| match c {
                        Captured::Value(v) => v.clone(),
                        Captured::Sibling(slot) => {
                            Value::Ref(Reference { group: Arc::clone(&self.group), slot: *slot })
                        }
                    })
                    .collect();
                let closure = procedure.call(values);
                *cached = Arc::downgrade(&closure);
                Some(Value::Closure(closure))
            }
        }
    }

    pub fn ptr_eq(&self, other: &Reference) -> bool {
        Arc::ptr_eq(&self.group, &other.group) && self.slot == other.slot
    }
}

impl Default for Reference {
    fn default() -> Self {
        Reference::new()
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Instruction;
    use crate::namespace::SharedNamespace;
    use crate::vm::{Arity, Runnable};

    fn procedure() -> Arc<Procedure> {
        let runnable = Runnable {
            name: None,
            code: vec![Instruction::ReturnNull],
            constants: vec![],
            globals: SharedNamespace::shared("test"),
            local_count: 0,
            stack_size: 0,
        };
        Arc::new(Procedure::new(runnable, Arity::exact(0)))
    }

    #[test]
    fn reference_binds_once_read_many() {
        let r = Reference::new();
        assert_eq!(r.get(), None);
        r.bind(Value::Integer(7)).unwrap();
        assert_eq!(r.get(), Some(Value::Integer(7)));
        assert!(matches!(r.bind(Value::Nil), Err(VmError::ReboundReference)));
        assert_eq!(r.get(), Some(Value::Integer(7)));
    }

    #[test]
    fn reference_siblings_share_a_group() {
        let a = Reference::new();
        let b = a.sibling();
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
        b.bind(Value::Integer(2)).unwrap();
        assert_eq!(a.get(), None);
        assert_eq!(b.get(), Some(Value::Integer(2)));
    }

    #[test]
    fn reference_self_capturing_closure_is_held_weakly() {
        let cell = Reference::new();
        let closure = procedure().call(vec![Value::Ref(cell.clone()), Value::Integer(1)]);
        let weak = Arc::downgrade(&closure);
        cell.bind(Value::Closure(closure)).unwrap();
        assert!(weak.upgrade().is_none());

        let Some(Value::Closure(rebuilt)) = cell.get() else {
            panic!("cell rebuilds the closure");
        };
        assert_eq!(rebuilt.captured()[1], Value::Integer(1));
        assert!(matches!(&rebuilt.captured()[0], Value::Ref(r) if r.ptr_eq(&cell)));
        let Some(Value::Closure(again)) = cell.get() else {
            panic!("cell still bound");
        };
        assert!(Arc::ptr_eq(&rebuilt, &again));
    }

    #[test]
    fn reference_group_is_freed_with_its_closures() {
        let cell = Reference::new();
        let group = Arc::downgrade(&cell.group);
        let closure = procedure().call(vec![Value::Ref(cell.clone())]);
        cell.bind(Value::Closure(Arc::clone(&closure))).unwrap();
        drop(cell);
        assert!(group.upgrade().is_some());
        drop(closure);
        assert!(group.upgrade().is_none());
    }
}
