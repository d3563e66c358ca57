//! Runtime values.
//!
//! `Value` is a hybrid: small immediates (null, booleans, longs, doubles,
//! symbols, native-procedure handles) are stored inline and copied freely;
//! everything else lives in the heap arena behind a [`HeapId`]. Keeping the
//! enum `Copy` keeps the operand stack and scope slots cheap.

use std::fmt::{self, Write};

use crate::heap::{Heap, HeapId};
use crate::intern::{SymbolId, Symbols};
use crate::natives::{NativeId, NativeRegistry};
use crate::types::{ClassKind, HeapData};

/// Recursion guard for repr and equality over possibly-cyclic graphs.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    Symbol(SymbolId),
    /// A registered native procedure.
    Native(NativeId),
    /// A heap-allocated object.
    Ref(HeapId),
}

impl Value {
    /// Bool false and null are falsy; everything else is truthy.
    #[must_use]
    pub fn is_truthy(self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    #[must_use]
    pub fn ref_id(self) -> Option<HeapId> {
        match self {
            Self::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// The built-in class of this value. Heap objects answer from their
    /// header's class id.
    #[must_use]
    pub fn class_kind(self, heap: &Heap) -> ClassKind {
        match self {
            Self::Null => ClassKind::Null,
            Self::Bool(_) => ClassKind::Bool,
            Self::Long(_) => ClassKind::Long,
            Self::Double(_) => ClassKind::Double,
            Self::Symbol(_) => ClassKind::Symbol,
            Self::Native(_) => ClassKind::NativeProcedure,
            Self::Ref(id) => heap.header(id).class(),
        }
    }

    /// Numeric view used by arithmetic coercion.
    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::Long(n) => Some(n as f64),
            Self::Double(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self, heap: &Heap) -> bool {
        matches!(self, Self::Ref(id) if matches!(heap.get(id), HeapData::Error(_)))
    }
}

/// Structural equality, never reference equality, per subtype.
///
/// Numeric operands compare numerically across Long/Double. Heap objects
/// with the same id are trivially equal; otherwise pairs, arrays, maps and
/// sets compare element-wise, and procedures/macros only equal themselves.
#[must_use]
pub fn values_equal(a: Value, b: Value, heap: &Heap) -> bool {
    values_equal_depth(a, b, heap, 0)
}

fn values_equal_depth(a: Value, b: Value, heap: &Heap, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Long(x), Value::Double(y)) | (Value::Double(y), Value::Long(x)) => (x as f64) == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Native(x), Value::Native(y)) => x == y,
        (Value::Ref(x), Value::Ref(y)) => {
            if x == y {
                return true;
            }
            match (heap.get(x), heap.get(y)) {
                (HeapData::String(s1), HeapData::String(s2)) => s1 == s2,
                (HeapData::Pair(p1), HeapData::Pair(p2)) => {
                    let (p1, p2) = (p1.clone(), p2.clone());
                    values_equal_depth(p1.car, p2.car, heap, depth + 1)
                        && values_equal_depth(p1.cdr, p2.cdr, heap, depth + 1)
                }
                (HeapData::Array(a1), HeapData::Array(a2)) => {
                    a1.length() == a2.length() && {
                        let (a1, a2) = (a1.clone(), a2.clone());
                        a1.iter()
                            .zip(a2.iter())
                            .all(|(x, y)| values_equal_depth(*x, *y, heap, depth + 1))
                    }
                }
                (HeapData::Set(s1), HeapData::Set(s2)) => s1 == s2,
                (HeapData::Map(m1), HeapData::Map(m2)) => {
                    m1.len() == m2.len() && {
                        let (m1, m2) = (m1.clone(), m2.clone());
                        m1.iter().all(|(k, v)| {
                            m2.get(k)
                                .is_some_and(|other| values_equal_depth(*v, other, heap, depth + 1))
                        })
                    }
                }
                (HeapData::Error(e1), HeapData::Error(e2)) => e1 == e2,
                // procedures and macros equal only themselves (id fast path above)
                _ => false,
            }
        }
        _ => false,
    }
}

/// Writes the re-parseable representation of a value.
///
/// Strings are quoted and escaped; `parse . repr` round-trips every
/// primitive literal. Non-literal objects render as `#<...>` forms.
pub fn write_repr(
    f: &mut dyn fmt::Write,
    value: Value,
    heap: &Heap,
    syms: &Symbols,
    natives: &NativeRegistry,
) -> fmt::Result {
    write_value(f, value, heap, syms, natives, true, 0)
}

/// Writes the display form: like repr but strings render unquoted.
pub fn write_display(
    f: &mut dyn fmt::Write,
    value: Value,
    heap: &Heap,
    syms: &Symbols,
    natives: &NativeRegistry,
) -> fmt::Result {
    write_value(f, value, heap, syms, natives, false, 0)
}

fn write_value(
    f: &mut dyn fmt::Write,
    value: Value,
    heap: &Heap,
    syms: &Symbols,
    natives: &NativeRegistry,
    quote_strings: bool,
    depth: usize,
) -> fmt::Result {
    if depth > MAX_DEPTH {
        return f.write_str("...");
    }
    match value {
        Value::Null => f.write_str("()"),
        Value::Bool(true) => f.write_str("#t"),
        Value::Bool(false) => f.write_str("#f"),
        Value::Long(n) => write!(f, "{n}"),
        Value::Double(d) => {
            if d.is_finite() {
                f.write_str(ryu::Buffer::new().format_finite(d))
            } else {
                write!(f, "{d}")
            }
        }
        Value::Symbol(sym) => f.write_str(syms.name(sym)),
        Value::Native(id) => write!(f, "#<native {}>", natives.get(id).name),
        Value::Ref(id) => match heap.get(id) {
            HeapData::String(s) => {
                if quote_strings {
                    write!(f, "\"{}\"", s.escape_default())
                } else {
                    f.write_str(s)
                }
            }
            HeapData::Pair(_) => write_pair_chain(f, id, heap, syms, natives, quote_strings, depth),
            HeapData::Array(a) => {
                let a = a.clone();
                f.write_str("[")?;
                for (i, item) in a.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write_value(f, *item, heap, syms, natives, quote_strings, depth + 1)?;
                }
                f.write_str("]")
            }
            HeapData::Set(s) => {
                let s = s.clone();
                f.write_str("#{")?;
                for (i, key) in s.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    key.write_repr(&mut Adapter(&mut *f), syms)?;
                }
                f.write_str("}")
            }
            HeapData::Map(m) => {
                let m = m.clone();
                f.write_str("{")?;
                for (i, (key, val)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    key.write_repr(&mut Adapter(&mut *f), syms)?;
                    f.write_str(" ")?;
                    write_value(f, *val, heap, syms, natives, quote_strings, depth + 1)?;
                }
                f.write_str("}")
            }
            HeapData::Error(e) => write!(f, "#<error: {}>", e.message),
            HeapData::Lambda(l) => match l.name {
                Some(name) => write!(f, "#<lambda {}>", syms.name(name)),
                None => f.write_str("#<lambda>"),
            },
            HeapData::Macro(m) => write!(f, "#<macro {}>", syms.name(m.symbol)),
            #[cfg(feature = "rx")]
            HeapData::Observable(o) => write!(f, "#<observable {}>", o.len()),
        },
    }
}

/// `fmt::Write` adapter over a trait object.
struct Adapter<'a, 'b>(&'a mut (dyn fmt::Write + 'b));

impl fmt::Write for Adapter<'_, '_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s)
    }
}

fn write_pair_chain(
    f: &mut dyn fmt::Write,
    id: HeapId,
    heap: &Heap,
    syms: &Symbols,
    natives: &NativeRegistry,
    quote_strings: bool,
    depth: usize,
) -> fmt::Result {
    f.write_str("(")?;
    let mut current = Value::Ref(id);
    let mut first = true;
    let mut steps = 0;
    loop {
        steps += 1;
        if steps > 4096 {
            f.write_str(" ...")?;
            break;
        }
        match current {
            Value::Ref(pid) => match heap.get(pid) {
                HeapData::Pair(p) => {
                    let p = p.clone();
                    if !first {
                        f.write_str(" ")?;
                    }
                    first = false;
                    write_value(f, p.car, heap, syms, natives, quote_strings, depth + 1)?;
                    current = p.cdr;
                }
                _ => {
                    f.write_str(" . ")?;
                    write_value(f, current, heap, syms, natives, quote_strings, depth + 1)?;
                    break;
                }
            },
            Value::Null => break,
            other => {
                f.write_str(" . ")?;
                write_value(f, other, heap, syms, natives, quote_strings, depth + 1)?;
                break;
            }
        }
    }
    f.write_str(")")
}
