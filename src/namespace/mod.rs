use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::value::{Symbol, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NamespaceError {
    #[error("symbol already bound in {namespace}: {name}")]
    AlreadyBound { namespace: String, name: Symbol },
}

/// The global environment a unit compiles and runs against. It is injected
/// into the encoder and carried by every `Runnable`.
pub trait Namespace: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// The bound value, if any. Declared-but-unbound names resolve to `None`.
    fn resolve(&self, name: &Symbol) -> Option<Value>;

    /// True once the name is declared or bound.
    fn is_declared(&self, name: &Symbol) -> bool;

    fn declare(&self, name: &Symbol);

    /// Bindings are immutable: binding an already-bound name fails.
    fn bind(&self, name: &Symbol, value: Value) -> Result<(), NamespaceError>;
}

pub type NamespaceRef = Arc<dyn Namespace>;

// ── In-memory namespace ──────────────────────────────────────────────

#[derive(Debug)]
pub struct SharedNamespace {
    name: String,
    entries: RwLock<HashMap<Symbol, Option<Value>>>,
}

impl SharedNamespace {
    pub fn new(name: &str) -> Self {
        SharedNamespace { name: name.to_string(), entries: RwLock::new(HashMap::new()) }
    }

    pub fn shared(name: &str) -> NamespaceRef {
        Arc::new(SharedNamespace::new(name))
    }
}

impl Namespace for SharedNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, name: &Symbol) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).cloned().flatten()
    }

    fn is_declared(&self, name: &Symbol) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(name)
    }

    fn declare(&self, name: &Symbol) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(name.clone()).or_insert(None);
    }

    fn bind(&self, name: &Symbol, value: Value) -> Result<(), NamespaceError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let slot = entries.entry(name.clone()).or_insert(None);
        if slot.is_some() {
            return Err(NamespaceError::AlreadyBound { namespace: self.name.clone(), name: name.clone() });
        }
        *slot = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_declare_then_bind() {
        let ns = SharedNamespace::new("user");
        let x = Symbol::new("x");
        assert!(!ns.is_declared(&x));
        ns.declare(&x);
        assert!(ns.is_declared(&x));
        assert_eq!(ns.resolve(&x), None);
        ns.bind(&x, Value::Integer(1)).unwrap();
        assert_eq!(ns.resolve(&x), Some(Value::Integer(1)));
    }

    #[test]
    fn namespace_rebind_rejected() {
        let ns = SharedNamespace::new("user");
        let x = Symbol::new("x");
        ns.bind(&x, Value::Integer(1)).unwrap();
        let err = ns.bind(&x, Value::Integer(2)).unwrap_err();
        assert!(matches!(err, NamespaceError::AlreadyBound { .. }));
        assert_eq!(ns.resolve(&x), Some(Value::Integer(1)));
    }

    #[test]
    fn namespace_declare_keeps_binding() {
        let ns = SharedNamespace::new("user");
        let x = Symbol::new("x");
        ns.bind(&x, Value::Bool(true)).unwrap();
        ns.declare(&x);
        assert_eq!(ns.resolve(&x), Some(Value::Bool(true)));
    }
}
