//! Insertion-ordered sets.

use indexmap::IndexSet;

use crate::value::Value;

use super::{MapKey, Trace};

/// An insertion-ordered set of primitive keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetObj {
    items: IndexSet<MapKey>,
}

impl SetObj {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: MapKey) -> bool {
        self.items.insert(key)
    }

    #[must_use]
    pub fn contains(&self, key: &MapKey) -> bool {
        self.items.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapKey> {
        self.items.iter()
    }
}

impl Trace for SetObj {
    fn trace(&mut self, _visitor: &mut dyn FnMut(&mut Value)) {
        // keys are primitives; nothing to trace
    }
}
