//! Constructors and instance-method dispatch for the built-in classes,
//! backing `(new Class ...)` and `(.method receiver ...)` forms.

use crate::error::{RunError, RunResult};
use crate::heap::Heap;
use crate::interpreter::Vm;
use crate::types::{Array, ClassKind, ErrorObj, HeapData, MapKey, MapObj, Pair, SetObj};
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// `(new Class args...)` — the first argument is the class-name symbol.
pub fn class_new(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let class_sym = args.symbol(0)?;
    let Some(class_id) = vm.classes.lookup(class_sym) else {
        return Err(RunError::lookup_error(format!(
            "unknown class `{}`",
            vm.syms.name(class_sym)
        )));
    };
    let rest = &args.values()[1..];

    let value = match vm.classes.class(class_id).kind {
        Some(ClassKind::String) => {
            let mut out = String::new();
            for value in rest {
                out.push_str(&vm.display_value(*value));
            }
            vm.alloc_value(HeapData::String(out))?
        }
        Some(ClassKind::Array) => vm.alloc_value(HeapData::Array(Array::new(rest.to_vec())))?,
        Some(ClassKind::Pair) => {
            if rest.len() != 2 {
                return Err(RunError::arity_error("new Pair expects exactly 2 arguments"));
            }
            vm.alloc_value(HeapData::Pair(Pair::new(rest[0], rest[1])))?
        }
        Some(ClassKind::Map) => {
            if rest.len() % 2 != 0 {
                return Err(RunError::type_error(
                    "new Map expects alternating key/value arguments",
                ));
            }
            let mut map = MapObj::new();
            for entry in rest.chunks_exact(2) {
                let key = to_map_key(vm.heap, entry[0])?;
                map.insert(key, entry[1]);
            }
            vm.alloc_value(HeapData::Map(map))?
        }
        Some(ClassKind::Set) => {
            let mut set = SetObj::new();
            for value in rest {
                set.insert(to_map_key(vm.heap, *value)?);
            }
            vm.alloc_value(HeapData::Set(set))?
        }
        Some(ClassKind::Error) => {
            let mut message = String::new();
            for value in rest {
                message.push_str(&vm.display_value(*value));
            }
            vm.alloc_value(HeapData::Error(ErrorObj {
                kind: crate::error::ErrorKind::User,
                message,
            }))?
        }
        _ => {
            return Err(RunError::type_error(format!(
                "cannot construct instances of `{}`",
                vm.syms.name(class_sym)
            )));
        }
    };
    Ok(NativeOutcome::Return(value))
}

/// Converts a value to a hashable map/set key.
pub fn to_map_key(heap: &Heap, value: Value) -> RunResult<MapKey> {
    Ok(match value {
        Value::Null => MapKey::Null,
        Value::Bool(b) => MapKey::Bool(b),
        Value::Long(n) => MapKey::Long(n),
        Value::Symbol(sym) => MapKey::Symbol(sym),
        Value::Ref(id) => match heap.get(id) {
            HeapData::String(s) => MapKey::String(s.clone()),
            _ => {
                return Err(RunError::type_error(format!(
                    "map keys must be immutable primitives, got {}",
                    value.class_kind(heap)
                )));
            }
        },
        _ => {
            return Err(RunError::type_error(format!(
                "map keys must be immutable primitives, got {}",
                value.class_kind(heap)
            )));
        }
    })
}

/// `(.method receiver args...)` — argument 0 is the method-name symbol,
/// argument 1 the receiver.
pub fn class_method(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let method = args.symbol(0)?;
    let receiver = args.value(1);
    let rest = &args.values()[2..];
    let name = vm.syms.name(method).to_owned();

    let result = match (name.as_str(), receiver) {
        ("length", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::String(s) => Some(Value::Long(chars_len(s))),
            HeapData::Array(a) => Some(Value::Long(as_long(a.length()))),
            HeapData::Map(m) => Some(Value::Long(as_long(m.len()))),
            HeapData::Set(s) => Some(Value::Long(as_long(s.len()))),
            HeapData::Pair(_) => Some(Value::Long(as_long(vm_list_length(vm, receiver)?))),
            _ => None,
        },
        ("car", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Pair(p) => Some(p.car),
            _ => None,
        },
        ("cdr", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Pair(p) => Some(p.cdr),
            _ => None,
        },
        ("message", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Error(e) => {
                let message = e.message.clone();
                Some(vm.alloc_value(HeapData::String(message))?)
            }
            _ => None,
        },
        ("docs", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Lambda(l) => match l.docs.clone() {
                Some(docs) => Some(vm.alloc_value(HeapData::String(docs))?),
                None => Some(Value::Null),
            },
            _ => None,
        },
        ("keys", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Map(m) => {
                let keys: Vec<MapKey> = m.iter().map(|(k, _)| k.clone()).collect();
                let mut items = Vec::with_capacity(keys.len());
                for key in &keys {
                    items.push(key.to_value(&mut |s| {
                        vm.alloc_value(HeapData::String(s)).unwrap_or(Value::Null)
                    }));
                }
                let mut list = Value::Null;
                for item in items.into_iter().rev() {
                    list = vm.alloc_value(HeapData::Pair(Pair::new(item, list)))?;
                }
                Some(list)
            }
            _ => None,
        },
        ("get", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Map(_) => {
                if rest.len() != 1 {
                    return Err(RunError::arity_error(".get expects exactly one key"));
                }
                let key = to_map_key(vm.heap, rest[0])?;
                let HeapData::Map(map) = vm.heap.get(id) else {
                    unreachable!("checked above");
                };
                Some(map.get(&key).unwrap_or(Value::Null))
            }
            _ => None,
        },
        ("contains?", Value::Ref(id)) => match vm.heap.get(id) {
            HeapData::Set(_) => {
                if rest.len() != 1 {
                    return Err(RunError::arity_error(".contains? expects exactly one key"));
                }
                let key = to_map_key(vm.heap, rest[0])?;
                let HeapData::Set(set) = vm.heap.get(id) else {
                    unreachable!("checked above");
                };
                Some(Value::Bool(set.contains(&key)))
            }
            _ => None,
        },
        _ => None,
    };

    match result {
        Some(value) => Ok(NativeOutcome::Return(value)),
        None => Err(RunError::lookup_error(format!(
            "no method `{name}` on {}",
            receiver.class_kind(vm.heap)
        ))),
    }
}

fn chars_len(s: &str) -> i64 {
    as_long(s.chars().count())
}

fn as_long(n: usize) -> i64 {
    i64::try_from(n).expect("length exceeds i64")
}

fn vm_list_length(vm: &Vm<'_>, value: Value) -> RunResult<usize> {
    let mut count = 0;
    let mut current = value;
    while let Value::Ref(id) = current {
        let HeapData::Pair(pair) = vm.heap.get(id) else {
            return Err(RunError::type_error(".length: improper list"));
        };
        count += 1;
        current = pair.cdr;
    }
    Ok(count)
}
