use std::fmt;
use std::sync::Arc;

use super::Value;

// ── Persistent cons list ─────────────────────────────────────────────

/// An immutable singly linked list. Tails are shared, so `prepend` and
/// `rest` are O(1) and never copy.
#[derive(Clone, Default)]
pub struct List(Option<Arc<Node>>);

struct Node {
    head: Value,
    tail: List,
    len: usize,
}

impl List {
    pub fn empty() -> Self {
        List(None)
    }

    pub fn prepend(&self, head: Value) -> List {
        List(Some(Arc::new(Node { head, tail: self.clone(), len: self.len() + 1 })))
    }

    pub fn first(&self) -> Option<&Value> {
        self.0.as_deref().map(|n| &n.head)
    }

    /// Everything after the first element; the empty list for an empty list.
    pub fn rest(&self) -> List {
        match &self.0 {
            Some(node) => node.tail.clone(),
            None => List::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.0.as_deref().map_or(0, |n| n.len)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn nth(&self, index: usize) -> Option<&Value> {
        self.iter().nth(index)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { next: self.0.as_deref() }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.iter().cloned().collect()
    }
}

impl FromIterator<Value> for List {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let items: Vec<Value> = iter.into_iter().collect();
        items.into_iter().rev().fold(List::empty(), |tail, head| tail.prepend(head))
    }
}

// Long lists would otherwise drop recursively, one frame per node.
impl Drop for List {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.tail.0.take(),
                Err(_) => break,
            }
        }
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.tail.0.as_deref();
        Some(&node.head)
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Value;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
