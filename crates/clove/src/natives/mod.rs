//! Native procedures: host-implemented callables registered in the init
//! scope at runtime boot.
//!
//! A native consumes a typed view of its arguments and finishes in one of
//! three ways: return a value (pushed), raise a `RunError` (reified as an
//! Error object and pushed), or do nothing (operand stack untouched).

mod array;
mod debug;
mod eval;
mod exit;
mod format;
mod import;
mod instance;
mod list;
mod print;
mod random;
mod pair;
mod type_;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::error::{RunError, RunResult};
use crate::heap::Heap;
use crate::intern::{SymbolId, Symbols};
use crate::interpreter::Vm;
use crate::value::Value;

/// Index into the native registry, also a bytecode operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(u16);

impl NativeId {
    #[inline]
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u16 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How many arguments a native accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(u8),
    AtLeast(u8),
}

impl Arity {
    #[must_use]
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Self::Exact(n) => argc == n as usize,
            Self::AtLeast(n) => argc >= n as usize,
        }
    }
}

/// What a native did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeOutcome {
    /// Push this value.
    Return(Value),
    /// Leave the operand stack unchanged.
    Nothing,
}

pub type NativeFn = fn(&mut Vm<'_>, &NativeArgs) -> RunResult<NativeOutcome>;

/// The popped arguments of one native call, in declaration order, with
/// typed accessors that produce uniform type errors.
#[derive(Debug)]
pub struct NativeArgs {
    pub name: &'static str,
    values: SmallVec<[Value; 4]>,
}

impl NativeArgs {
    #[must_use]
    pub fn new(name: &'static str, values: SmallVec<[Value; 4]>) -> Self {
        Self { name, values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Positional access; arity is checked before the native runs.
    ///
    /// # Panics
    /// Panics when the index exceeds the checked arity (a native bug).
    #[must_use]
    pub fn value(&self, index: usize) -> Value {
        *self.values.get(index).expect("native argument index out of range")
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn long(&self, index: usize) -> RunResult<i64> {
        match self.value(index) {
            Value::Long(n) => Ok(n),
            other => Err(self.type_error(index, "Long", other)),
        }
    }

    pub fn symbol(&self, index: usize) -> RunResult<SymbolId> {
        match self.value(index) {
            Value::Symbol(sym) => Ok(sym),
            other => Err(self.type_error(index, "Symbol", other)),
        }
    }

    pub fn string<'h>(&self, heap: &'h Heap, index: usize) -> RunResult<&'h str> {
        if let Value::Ref(id) = self.value(index)
            && let crate::types::HeapData::String(s) = heap.get(id)
        {
            return Ok(s.as_str());
        }
        Err(self.type_error(index, "String", self.value(index)))
    }

    pub fn heap_ref(&self, index: usize, expected: &str) -> RunResult<crate::heap::HeapId> {
        match self.value(index) {
            Value::Ref(id) => Ok(id),
            other => Err(self.type_error(index, expected, other)),
        }
    }

    fn type_error(&self, index: usize, expected: &str, _got: Value) -> RunError {
        RunError::type_error(format!(
            "{}: argument {} must be a {expected}",
            self.name,
            index + 1
        ))
    }
}

/// A registered native.
pub struct NativeProcedure {
    pub symbol: SymbolId,
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
    pub docs: &'static str,
}

impl std::fmt::Debug for NativeProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProcedure")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// All registered natives, indexed by [`NativeId`] and by symbol.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    procs: Vec<NativeProcedure>,
    by_symbol: AHashMap<SymbolId, NativeId>,
    eval: Option<NativeId>,
}

impl NativeRegistry {
    /// Registers every built-in native, interning their names.
    #[must_use]
    pub fn bootstrap(syms: &mut Symbols) -> Self {
        let mut registry = Self::default();

        registry.register(syms, "print", Arity::AtLeast(0), print::print, "Prints its arguments.");
        registry.register(syms, "list", Arity::AtLeast(0), list::list, "Builds a proper list.");
        registry.register(
            syms,
            "format",
            Arity::AtLeast(1),
            format::format,
            "Substitutes {} placeholders with the remaining arguments.",
        );
        registry.register(syms, "random", Arity::Exact(0), random::random, "A random Long.");
        registry.register(
            syms,
            "random:range",
            Arity::Exact(2),
            random::random_range,
            "A random Long in [lo, hi).",
        );
        registry.register(syms, "type?", Arity::Exact(1), type_::type_of, "The class name of a value.");
        registry.register(
            syms,
            "import",
            Arity::Exact(1),
            import::import,
            "Loads a module by symbol and merges its scope.",
        );
        registry.register(syms, "exit", Arity::AtLeast(0), exit::exit, "Terminates the process.");
        let eval = registry.register(syms, "eval", Arity::Exact(1), eval::eval, "Evaluates a quoted datum.");
        registry.eval = Some(eval);
        registry.register(syms, "set-car!", Arity::Exact(2), pair::set_car, "Replaces a pair's car.");
        registry.register(syms, "set-cdr!", Arity::Exact(2), pair::set_cdr, "Replaces a pair's cdr.");
        registry.register(
            syms,
            "array:new",
            Arity::AtLeast(0),
            array::array_new,
            "A fixed-capacity array of its arguments.",
        );
        registry.register(syms, "array:get", Arity::Exact(2), array::array_get, "Indexed read.");
        registry.register(syms, "array:set", Arity::Exact(3), array::array_set, "Indexed write.");
        registry.register(
            syms,
            "array:length",
            Arity::Exact(1),
            array::array_length,
            "Array capacity.",
        );
        registry.register(
            syms,
            "class:new",
            Arity::AtLeast(1),
            instance::class_new,
            "Constructs an instance of a named class.",
        );
        registry.register(
            syms,
            "class:method",
            Arity::AtLeast(2),
            instance::class_method,
            "Dispatches an instance method by name.",
        );
        registry.register(
            syms,
            "clove:docs?",
            Arity::Exact(1),
            debug::docs,
            "The docstring of a lambda or native.",
        );
        registry.register(
            syms,
            "clove:minor-gc!",
            Arity::Exact(0),
            debug::minor_gc,
            "Runs a minor collection.",
        );
        registry.register(
            syms,
            "clove:major-gc!",
            Arity::Exact(0),
            debug::major_gc,
            "Runs a major collection.",
        );
        registry.register(
            syms,
            "clove:frame?",
            Arity::Exact(0),
            debug::frame,
            "The current stack-frame id.",
        );
        registry.register(
            syms,
            "clove:locals?",
            Arity::Exact(0),
            debug::locals,
            "Prints the current frame's locals.",
        );
        registry.register(
            syms,
            "clove:classes?",
            Arity::Exact(0),
            debug::classes,
            "A list of every registered class name.",
        );

        #[cfg(feature = "rx")]
        crate::rx::register(&mut registry, syms);

        registry
    }

    /// Registers one native, returning its id.
    pub fn register(
        &mut self,
        syms: &mut Symbols,
        name: &'static str,
        arity: Arity,
        func: NativeFn,
        docs: &'static str,
    ) -> NativeId {
        let symbol = syms.intern(name);
        let id = NativeId(u16::try_from(self.procs.len()).expect("native registry exceeded u16 range"));
        self.procs.push(NativeProcedure {
            symbol,
            name,
            arity,
            func,
            docs,
        });
        self.by_symbol.insert(symbol, id);
        id
    }

    /// # Panics
    /// Panics if the id did not come from this registry.
    #[must_use]
    pub fn get(&self, id: NativeId) -> &NativeProcedure {
        &self.procs[id.index()]
    }

    #[must_use]
    pub fn lookup(&self, symbol: SymbolId) -> Option<NativeId> {
        self.by_symbol.get(&symbol).copied()
    }

    /// The id of the `eval` native, special-cased by the flow-graph
    /// builder.
    #[must_use]
    pub fn eval_id(&self) -> Option<NativeId> {
        self.eval
    }

    /// Iterates `(id, proc)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (NativeId, &NativeProcedure)> {
        self.procs
            .iter()
            .enumerate()
            .map(|(i, p)| (NativeId(u16::try_from(i).expect("registry bounded at u16")), p))
    }
}
