use crate::error::{ErrorKind, RunError, RunResult};
use crate::interpreter::Vm;
use crate::types::{Array, HeapData};
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// `(array:new a b c)` builds a fixed-capacity array of its arguments.
pub fn array_new(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let array = Array::new(args.values().to_vec());
    let value = vm.alloc_value(HeapData::Array(array))?;
    Ok(NativeOutcome::Return(value))
}

/// `(array:get arr index)`.
pub fn array_get(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = args.heap_ref(0, "Array")?;
    let index = args.long(1)?;
    let HeapData::Array(array) = vm.heap.get(id) else {
        return Err(RunError::type_error("array:get: argument 1 must be an Array"));
    };
    let slot = usize::try_from(index).ok().and_then(|i| array.get(i));
    match slot {
        Some(value) => Ok(NativeOutcome::Return(value)),
        None => Err(RunError::new(
            ErrorKind::Index,
            format!("array:get: index {index} out of range 0..{}", array.length()),
        )),
    }
}

/// `(array:set arr index value)`.
pub fn array_set(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = args.heap_ref(0, "Array")?;
    let index = args.long(1)?;
    let value = args.value(2);
    let HeapData::Array(array) = vm.heap.get_mut(id) else {
        return Err(RunError::type_error("array:set: argument 1 must be an Array"));
    };
    let length = array.length();
    let stored = usize::try_from(index).ok().is_some_and(|i| array.set(i, value));
    if stored {
        Ok(NativeOutcome::Return(Value::Null))
    } else {
        Err(RunError::new(
            ErrorKind::Index,
            format!("array:set: index {index} out of range 0..{length}"),
        ))
    }
}

/// `(array:length arr)`.
pub fn array_length(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = args.heap_ref(0, "Array")?;
    let HeapData::Array(array) = vm.heap.get(id) else {
        return Err(RunError::type_error("array:length: argument 1 must be an Array"));
    };
    let length = i64::try_from(array.length()).expect("array length exceeds i64");
    Ok(NativeOutcome::Return(Value::Long(length)))
}
