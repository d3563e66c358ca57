use crate::error::RunResult;
use crate::interpreter::Vm;
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// The class name of the argument, as a symbol (`Long`, `Pair`, ...).
pub fn type_of(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let kind = args.value(0).class_kind(vm.heap);
    let class_id = vm.classes.of_kind(kind);
    let name = vm.classes.class(class_id).name;
    Ok(NativeOutcome::Return(Value::Symbol(name)))
}
