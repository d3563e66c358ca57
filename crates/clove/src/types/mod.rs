//! The heap-resident object model.
//!
//! Every heap allocation carries one [`HeapData`] payload. Immediate
//! values (booleans, longs, symbols, ...) never reach the heap; see
//! `value::Value` for the split.

pub mod array;
pub mod class;
pub mod lambda;
pub mod map;
pub mod pair;
pub mod set;

pub use array::Array;
pub use class::{Class, ClassId, ClassKind, ClassRegistry, Field};
pub use lambda::{Lambda, MacroObj};
pub use map::{MapKey, MapObj};
pub use pair::Pair;
pub use set::SetObj;

use crate::error::ErrorKind;
use crate::value::Value;

/// A runtime error reified as an object. Errors propagate on the operand
/// stack, not as host exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorObj {
    pub kind: ErrorKind,
    pub message: String,
}

impl Trace for ErrorObj {
    fn trace(&mut self, _visitor: &mut dyn FnMut(&mut Value)) {}
}

/// Walks every value slot inside a payload so the collector can find and
/// rewrite interior references.
pub trait Trace {
    fn trace(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

/// The payload of one heap cell.
#[derive(Debug, Clone)]
pub enum HeapData {
    String(String),
    Pair(Pair),
    Array(Array),
    Set(SetObj),
    Map(MapObj),
    Error(ErrorObj),
    Lambda(Lambda),
    Macro(MacroObj),
    #[cfg(feature = "rx")]
    Observable(crate::rx::Observable),
}

impl HeapData {
    /// The built-in class of this payload.
    #[must_use]
    pub fn kind(&self) -> ClassKind {
        match self {
            Self::String(_) => ClassKind::String,
            Self::Pair(_) => ClassKind::Pair,
            Self::Array(_) => ClassKind::Array,
            Self::Set(_) => ClassKind::Set,
            Self::Map(_) => ClassKind::Map,
            Self::Error(_) => ClassKind::Error,
            Self::Lambda(_) => ClassKind::Lambda,
            Self::Macro(_) => ClassKind::Macro,
            #[cfg(feature = "rx")]
            Self::Observable(_) => ClassKind::Observable,
        }
    }

    /// Rough payload size in bytes, used for semispace accounting.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        const SLOT: usize = std::mem::size_of::<Value>();
        match self {
            Self::String(s) => s.len(),
            Self::Pair(_) => 2 * SLOT,
            Self::Array(a) => a.length() * SLOT,
            Self::Set(s) => s.len() * SLOT,
            Self::Map(m) => 2 * m.len() * SLOT,
            Self::Error(e) => e.message.len(),
            Self::Lambda(l) => 64 + l.args.len() * SLOT,
            Self::Macro(m) => 64 + m.args.len() * SLOT,
            #[cfg(feature = "rx")]
            Self::Observable(o) => o.len() * SLOT,
        }
    }
}

impl Trace for HeapData {
    fn trace(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        match self {
            Self::String(_) => {}
            Self::Pair(p) => p.trace(visitor),
            Self::Array(a) => a.trace(visitor),
            Self::Set(s) => s.trace(visitor),
            Self::Map(m) => m.trace(visitor),
            Self::Error(e) => e.trace(visitor),
            Self::Lambda(l) => l.trace(visitor),
            Self::Macro(m) => m.trace(visitor),
            #[cfg(feature = "rx")]
            Self::Observable(o) => o.trace(visitor),
        }
    }
}
