//! Insertion-ordered maps.

use std::fmt;

use indexmap::IndexMap;

use crate::intern::{SymbolId, Symbols};
use crate::value::Value;

use super::Trace;

/// A hashable key for maps and sets.
///
/// Keys are restricted to immutable primitives so they can be hashed
/// without consulting the heap; using a mutable object as a key is a type
/// error at the point of construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Long(i64),
    Symbol(SymbolId),
    String(String),
}

impl MapKey {
    /// Converts the key back into a value, re-allocating strings through
    /// the supplied allocator.
    pub fn to_value(&self, alloc_string: &mut dyn FnMut(String) -> Value) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Long(n) => Value::Long(*n),
            Self::Symbol(sym) => Value::Symbol(*sym),
            Self::String(s) => alloc_string(s.clone()),
        }
    }

    pub fn write_repr(&self, f: &mut impl fmt::Write, syms: &Symbols) -> fmt::Result {
        match self {
            Self::Null => f.write_str("()"),
            Self::Bool(true) => f.write_str("#t"),
            Self::Bool(false) => f.write_str("#f"),
            Self::Long(n) => write!(f, "{n}"),
            Self::Symbol(sym) => f.write_str(syms.name(*sym)),
            Self::String(s) => write!(f, "\"{}\"", s.escape_default()),
        }
    }
}

/// An insertion-ordered mapping from primitive keys to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapObj {
    entries: IndexMap<MapKey, Value>,
}

impl MapObj {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: MapKey, value: Value) {
        self.entries.insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: &MapKey) -> Option<Value> {
        self.entries.get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter()
    }
}

impl Trace for MapObj {
    fn trace(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for value in self.entries.values_mut() {
            visitor(value);
        }
    }
}
