//! Lexical scopes.
//!
//! Scopes are the sole carrier of bindings between compilation stages and
//! at runtime: the parser installs macros and named lambdas into them, the
//! macro expander and flow-graph builder resolve against them, call frames
//! chain fresh child scopes off them, and the collector treats every live
//! scope slot as a root.
//!
//! Scopes live in an arena and reference each other by index; the parent
//! chain can be cyclic with heap objects (a lambda's owning scope holds the
//! lambda), which the arena + tracing design absorbs.

use crate::intern::SymbolId;
use crate::value::Value;

/// Index into the scope arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named slot. The value is absent for bindings declared but not yet
/// assigned (e.g. a `define` whose initializer has not run).
#[derive(Debug, Clone)]
pub struct LocalVariable {
    pub name: SymbolId,
    pub value: Option<Value>,
}

/// An ordered list of locals plus a parent link.
///
/// Invariant: no two locals in the same scope share a name.
#[derive(Debug, Default)]
pub struct LocalScope {
    parent: Option<ScopeId>,
    locals: Vec<LocalVariable>,
    /// Freed frame scopes are skipped by the root visitor until reused.
    released: bool,
}

impl LocalScope {
    #[must_use]
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    #[must_use]
    pub fn locals(&self) -> &[LocalVariable] {
        &self.locals
    }
}

/// Owns every scope; all access goes through ids.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<LocalScope>,
    free: Vec<ScopeId>,
}

impl ScopeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scope, reusing a released slot when one is available.
    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        if let Some(id) = self.free.pop() {
            let scope = &mut self.scopes[id.index()];
            scope.parent = parent;
            scope.locals.clear();
            scope.released = false;
            return id;
        }
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope arena exceeded u32 range"));
        self.scopes.push(LocalScope {
            parent,
            locals: Vec::new(),
            released: false,
        });
        id
    }

    /// Releases a frame scope: its slots stop being collection roots and
    /// the slot becomes reusable.
    pub fn release(&mut self, id: ScopeId) {
        let scope = &mut self.scopes[id.index()];
        scope.locals.clear();
        scope.released = true;
        self.free.push(id);
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &LocalScope {
        &self.scopes[id.index()]
    }

    /// True when `name` is bound in `id` (or, with `recursive`, in any
    /// ancestor).
    #[must_use]
    pub fn has(&self, id: ScopeId, name: SymbolId, recursive: bool) -> bool {
        self.resolve(id, name, recursive).is_some()
    }

    /// Adds a local, enforcing the unique-name invariant.
    ///
    /// Re-adding a name that exists without a value fills in the value
    /// (supporting declare-then-define); re-adding a name that already has
    /// a value fails.
    pub fn add(&mut self, id: ScopeId, name: SymbolId, value: Option<Value>) -> bool {
        let scope = &mut self.scopes[id.index()];
        if let Some(local) = scope.locals.iter_mut().find(|l| l.name == name) {
            if local.value.is_some() {
                return false;
            }
            local.value = value;
            return true;
        }
        scope.locals.push(LocalVariable { name, value });
        true
    }

    /// Merges every local of `src` into `dst`, preserving names and
    /// skipping names already present (which makes repeated module merges
    /// idempotent).
    pub fn merge(&mut self, dst: ScopeId, src: ScopeId) {
        let incoming: Vec<LocalVariable> = self.scopes[src.index()].locals.clone();
        let scope = &mut self.scopes[dst.index()];
        for local in incoming {
            if !scope.locals.iter().any(|l| l.name == local.name) {
                scope.locals.push(local);
            }
        }
    }

    /// Finds the scope and slot binding `name`, walking the parent chain
    /// unless `recursive` is false.
    #[must_use]
    pub fn resolve(&self, id: ScopeId, name: SymbolId, recursive: bool) -> Option<(ScopeId, usize)> {
        let mut current = Some(id);
        while let Some(sid) = current {
            let scope = &self.scopes[sid.index()];
            if let Some(slot) = scope.locals.iter().position(|l| l.name == name) {
                return Some((sid, slot));
            }
            if !recursive {
                return None;
            }
            current = scope.parent;
        }
        None
    }

    /// The bound value of `name` resolved from `id`, if any.
    #[must_use]
    pub fn lookup_value(&self, id: ScopeId, name: SymbolId, recursive: bool) -> Option<Value> {
        let (sid, slot) = self.resolve(id, name, recursive)?;
        self.scopes[sid.index()].locals[slot].value
    }

    /// Rebinds an existing local.
    pub fn set_value(&mut self, id: ScopeId, slot: usize, value: Value) {
        self.scopes[id.index()].locals[slot].value = Some(value);
    }

    /// Rebinds `name` wherever it resolves from `scope`, or adds it to
    /// `scope` when unbound anywhere — the store discipline of the
    /// interpreter's `StoreVariable`.
    pub fn store(&mut self, scope: ScopeId, name: SymbolId, value: Value) {
        match self.resolve(scope, name, true) {
            Some((sid, slot)) => self.set_value(sid, slot, value),
            None => {
                self.add(scope, name, Some(value));
            }
        }
    }

    /// Visits every bound value in every live scope: the arena side of the
    /// collector's root set.
    pub fn visit_values(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for scope in &mut self.scopes {
            if scope.released {
                continue;
            }
            for local in &mut scope.locals {
                if let Some(value) = &mut local.value {
                    visitor(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Symbols;

    #[test]
    fn add_then_lookup_returns_the_binding() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        let x = syms.intern("x");
        assert!(arena.add(scope, x, Some(Value::Long(42))));
        assert_eq!(arena.lookup_value(scope, x, true), Some(Value::Long(42)));
    }

    #[test]
    fn duplicate_names_with_values_are_rejected() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        let x = syms.intern("x");
        assert!(arena.add(scope, x, Some(Value::Long(1))));
        assert!(!arena.add(scope, x, Some(Value::Long(2))));
        assert_eq!(arena.lookup_value(scope, x, true), Some(Value::Long(1)));
    }

    #[test]
    fn declare_then_define_fills_the_slot() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        let x = syms.intern("x");
        assert!(arena.add(scope, x, None));
        assert!(arena.add(scope, x, Some(Value::Long(7))));
        assert_eq!(arena.lookup_value(scope, x, true), Some(Value::Long(7)));
    }

    #[test]
    fn lookup_walks_the_parent_chain_unless_disabled() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let parent = arena.new_scope(None);
        let child = arena.new_scope(Some(parent));
        let x = syms.intern("x");
        arena.add(parent, x, Some(Value::Bool(true)));
        assert_eq!(arena.lookup_value(child, x, true), Some(Value::Bool(true)));
        assert_eq!(arena.lookup_value(child, x, false), None);
    }

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let parent = arena.new_scope(None);
        let child = arena.new_scope(Some(parent));
        let x = syms.intern("x");
        arena.add(parent, x, Some(Value::Long(1)));
        arena.add(child, x, Some(Value::Long(2)));
        assert_eq!(arena.lookup_value(child, x, true), Some(Value::Long(2)));
        assert_eq!(arena.lookup_value(parent, x, true), Some(Value::Long(1)));
    }

    #[test]
    fn merge_preserves_names_and_is_idempotent() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let dst = arena.new_scope(None);
        let src = arena.new_scope(None);
        let a = syms.intern("a");
        let b = syms.intern("b");
        arena.add(src, a, Some(Value::Long(1)));
        arena.add(src, b, Some(Value::Long(2)));
        arena.add(dst, a, Some(Value::Long(99)));

        arena.merge(dst, src);
        arena.merge(dst, src);

        assert_eq!(arena.scope(dst).locals().len(), 2);
        // existing binding wins
        assert_eq!(arena.lookup_value(dst, a, false), Some(Value::Long(99)));
        assert_eq!(arena.lookup_value(dst, b, false), Some(Value::Long(2)));
    }

    #[test]
    fn released_scopes_are_reused_and_not_visited() {
        let mut syms = Symbols::new();
        let mut arena = ScopeArena::new();
        let scope = arena.new_scope(None);
        let x = syms.intern("x");
        arena.add(scope, x, Some(Value::Long(1)));
        arena.release(scope);

        let mut visited = 0;
        arena.visit_values(&mut |_| visited += 1);
        assert_eq!(visited, 0);

        let reused = arena.new_scope(None);
        assert_eq!(reused, scope);
        assert!(arena.scope(reused).locals().is_empty());
    }
}
