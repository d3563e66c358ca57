//! Symbol interning.
//!
//! Symbols are the hot identifier currency of the whole pipeline: the
//! parser, the scopes, the flow-graph builder and the interpreter all pass
//! `SymbolId`s instead of strings. The interner owns every symbol name and
//! deduplicates on insertion, so id equality is name equality.

use ahash::AHashMap;

/// Index into the symbol interner's storage.
///
/// Uses `u32` to keep `Value` small; ~4 billion unique symbols is far more
/// than any program needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Reconstructs a SymbolId from a raw operand stored in bytecode.
    ///
    /// The caller is responsible for ensuring the index is valid.
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Deduplicating symbol storage.
#[derive(Debug, Default)]
pub struct Symbols {
    map: AHashMap<String, SymbolId>,
    names: Vec<String>,
    gensym_counter: u32,
}

impl Symbols {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a symbol name, returning its id.
    ///
    /// Interning the same name twice returns the same id.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = SymbolId(
            u32::try_from(self.names.len()).expect("symbol interner exceeded u32 range"),
        );
        self.map.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        id
    }

    /// Looks up an already-interned name without inserting.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<SymbolId> {
        self.map.get(name).copied()
    }

    /// Returns the name for an id.
    ///
    /// # Panics
    /// Panics if the id did not come from this interner.
    #[inline]
    #[must_use]
    pub fn name(&self, id: SymbolId) -> &str {
        &self.names[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Produces a fresh symbol that no source program can spell.
    ///
    /// `#` is not an identifier character, so `case#0`-style names can never
    /// collide with user bindings. Used for compiler temporaries.
    pub fn gensym(&mut self, prefix: &str) -> SymbolId {
        let name = format!("{prefix}#{}", self.gensym_counter);
        self.gensym_counter += 1;
        self.intern(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut syms = Symbols::new();
        let a = syms.intern("foo");
        let b = syms.intern("foo");
        let c = syms.intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(syms.name(a), "foo");
        assert_eq!(syms.name(c), "bar");
    }

    #[test]
    fn gensym_is_unique_and_unspellable() {
        let mut syms = Symbols::new();
        let a = syms.gensym("case");
        let b = syms.gensym("case");
        assert_ne!(a, b);
        assert!(syms.name(a).contains('#'));
    }
}
