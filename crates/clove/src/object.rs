//! The public value type.
//!
//! [`Object`] is the host-facing mirror of the internal `Value`: it owns
//! all of its data, can be freely cloned and inspected, and needs no heap
//! to work with. Results of `eval`/`exec` come back as `Object`s, and
//! arguments passed into `call` go in as `Object`s.

use std::fmt;

use crate::error::ErrorKind;
use crate::heap::Heap;
use crate::intern::Symbols;
use crate::natives::NativeRegistry;
use crate::types::{HeapData, MapKey};
use crate::value::Value;

/// A language value detached from the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(String),
    Symbol(String),
    /// A cons cell; proper lists are nested pairs ending in `Null`.
    Pair(Box<Object>, Box<Object>),
    Array(Vec<Object>),
    Set(Vec<Object>),
    Map(Vec<(Object, Object)>),
    /// A runtime error that became the result of execution.
    Error { kind: ErrorKind, message: String },
    /// An opaque rendering of values with no structural mapping
    /// (procedures, macros, observables).
    Repr(String),
}

impl Object {
    /// Deep-copies a runtime value out of the heap.
    #[must_use]
    pub fn from_value(value: Value, heap: &Heap, syms: &Symbols, natives: &NativeRegistry) -> Self {
        Self::from_value_depth(value, heap, syms, natives, 0)
    }

    fn from_value_depth(
        value: Value,
        heap: &Heap,
        syms: &Symbols,
        natives: &NativeRegistry,
        depth: usize,
    ) -> Self {
        if depth > 64 {
            return Self::Repr("...".to_owned());
        }
        let next = depth + 1;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Long(n) => Self::Long(n),
            Value::Double(d) => Self::Double(d),
            Value::Symbol(sym) => Self::Symbol(syms.name(sym).to_owned()),
            Value::Native(_) | Value::Ref(_) => match value.ref_id().map(|id| heap.get(id)) {
                Some(HeapData::String(s)) => Self::String(s.clone()),
                Some(HeapData::Pair(p)) => Self::Pair(
                    Box::new(Self::from_value_depth(p.car, heap, syms, natives, next)),
                    Box::new(Self::from_value_depth(p.cdr, heap, syms, natives, next)),
                ),
                Some(HeapData::Array(a)) => Self::Array(
                    a.iter()
                        .map(|v| Self::from_value_depth(*v, heap, syms, natives, next))
                        .collect(),
                ),
                Some(HeapData::Set(s)) => Self::Set(s.iter().map(|k| key_object(k, syms)).collect()),
                Some(HeapData::Map(m)) => Self::Map(
                    m.iter()
                        .map(|(k, v)| {
                            (
                                key_object(k, syms),
                                Self::from_value_depth(*v, heap, syms, natives, next),
                            )
                        })
                        .collect(),
                ),
                Some(HeapData::Error(e)) => Self::Error {
                    kind: e.kind,
                    message: e.message.clone(),
                },
                _ => {
                    let mut repr = String::new();
                    let _ = crate::value::write_repr(&mut repr, value, heap, syms, natives);
                    Self::Repr(repr)
                }
            },
        }
    }

    /// Rebuilds a runtime value inside the heap, interning symbols and
    /// allocating containers as needed. `Repr` objects cannot cross back
    /// in.
    pub fn to_value(
        &self,
        heap: &mut Heap,
        syms: &mut Symbols,
    ) -> Result<Value, crate::error::RunError> {
        use crate::error::RunError;
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Long(n) => Value::Long(*n),
            Self::Double(d) => Value::Double(*d),
            Self::Symbol(name) => Value::Symbol(syms.intern(name)),
            Self::String(s) => alloc(heap, HeapData::String(s.clone())),
            Self::Pair(car, cdr) => {
                let car = car.to_value(heap, syms)?;
                let cdr = cdr.to_value(heap, syms)?;
                alloc(heap, HeapData::Pair(crate::types::Pair::new(car, cdr)))
            }
            Self::Array(items) => {
                let mut slots = Vec::with_capacity(items.len());
                for item in items {
                    slots.push(item.to_value(heap, syms)?);
                }
                alloc(heap, HeapData::Array(crate::types::Array::new(slots)))
            }
            Self::Set(items) => {
                let mut set = crate::types::SetObj::new();
                for item in items {
                    set.insert(object_key(item, syms)?);
                }
                alloc(heap, HeapData::Set(set))
            }
            Self::Map(entries) => {
                let mut map = crate::types::MapObj::new();
                for (key, value) in entries {
                    let key = object_key(key, syms)?;
                    let value = value.to_value(heap, syms)?;
                    map.insert(key, value);
                }
                alloc(heap, HeapData::Map(map))
            }
            Self::Error { kind, message } => alloc(
                heap,
                HeapData::Error(crate::types::ErrorObj {
                    kind: *kind,
                    message: message.clone(),
                }),
            ),
            Self::Repr(text) => {
                return Err(RunError::type_error(format!(
                    "cannot pass an opaque value back into the runtime: {text}"
                )));
            }
        })
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Convenience accessor for Long results.
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(n) => Some(*n),
            _ => None,
        }
    }
}

/// Pass-through allocation: falls back to the old generation when the
/// nursery is full (callers sit outside an execution context).
fn alloc(heap: &mut Heap, data: HeapData) -> Value {
    match heap.allocate(data) {
        Ok(id) => Value::Ref(id),
        Err(data) => Value::Ref(heap.allocate_tenured(data)),
    }
}

fn key_object(key: &MapKey, syms: &Symbols) -> Object {
    match key {
        MapKey::Null => Object::Null,
        MapKey::Bool(b) => Object::Bool(*b),
        MapKey::Long(n) => Object::Long(*n),
        MapKey::Symbol(sym) => Object::Symbol(syms.name(*sym).to_owned()),
        MapKey::String(s) => Object::String(s.clone()),
    }
}

fn object_key(object: &Object, syms: &mut Symbols) -> Result<MapKey, crate::error::RunError> {
    Ok(match object {
        Object::Null => MapKey::Null,
        Object::Bool(b) => MapKey::Bool(*b),
        Object::Long(n) => MapKey::Long(*n),
        Object::Symbol(name) => MapKey::Symbol(syms.intern(name)),
        Object::String(s) => MapKey::String(s.clone()),
        other => {
            return Err(crate::error::RunError::type_error(format!(
                "map keys must be immutable primitives, got {other}"
            )));
        }
    })
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("()"),
            Self::Bool(true) => f.write_str("#t"),
            Self::Bool(false) => f.write_str("#f"),
            Self::Long(n) => write!(f, "{n}"),
            Self::Double(d) => {
                if d.is_finite() {
                    f.write_str(ryu::Buffer::new().format_finite(*d))
                } else {
                    write!(f, "{d}")
                }
            }
            Self::String(s) => write!(f, "\"{}\"", s.escape_default()),
            Self::Symbol(name) => f.write_str(name),
            Self::Pair(car, cdr) => {
                write!(f, "({car}")?;
                let mut rest = cdr;
                loop {
                    match &**rest {
                        Self::Null => break,
                        Self::Pair(car, cdr) => {
                            write!(f, " {car}")?;
                            rest = cdr;
                        }
                        other => {
                            write!(f, " . {other}")?;
                            break;
                        }
                    }
                }
                f.write_str(")")
            }
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Set(items) => {
                f.write_str("#{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key} {value}")?;
                }
                f.write_str("}")
            }
            Self::Error { message, .. } => write!(f, "#<error: {message}>"),
            Self::Repr(text) => f.write_str(text),
        }
    }
}
