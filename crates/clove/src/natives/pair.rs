use crate::error::{RunError, RunResult};
use crate::interpreter::Vm;
use crate::types::HeapData;
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// `(set-car! pair value)` replaces the pair's car in place.
pub fn set_car(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = args.heap_ref(0, "Pair")?;
    let value = args.value(1);
    match vm.heap.get_mut(id) {
        HeapData::Pair(pair) => {
            pair.car = value;
            Ok(NativeOutcome::Return(Value::Null))
        }
        _ => Err(RunError::type_error("set-car!: argument 1 must be a Pair")),
    }
}

/// `(set-cdr! pair value)` replaces the pair's cdr in place.
pub fn set_cdr(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = args.heap_ref(0, "Pair")?;
    let value = args.value(1);
    match vm.heap.get_mut(id) {
        HeapData::Pair(pair) => {
            pair.cdr = value;
            Ok(NativeOutcome::Return(Value::Null))
        }
        _ => Err(RunError::type_error("set-cdr!: argument 1 must be a Pair")),
    }
}
