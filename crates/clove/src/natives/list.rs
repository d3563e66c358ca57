use crate::error::RunResult;
use crate::interpreter::Vm;
use crate::types::{HeapData, Pair};
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// Builds a null-terminated pair chain of the arguments.
pub fn list(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let mut result = Value::Null;
    for value in args.values().iter().rev() {
        result = vm.alloc_value(HeapData::Pair(Pair::new(*value, result)))?;
    }
    Ok(NativeOutcome::Return(result))
}
