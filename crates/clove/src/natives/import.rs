use crate::error::RunResult;
use crate::interpreter::Vm;
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// Loads the module named by the symbol argument and merges its scope into
/// the global scope. Re-importing is a no-op.
pub fn import(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let symbol = args.symbol(0)?;
    crate::modules::import_module(vm, symbol)?;
    Ok(NativeOutcome::Return(Value::Null))
}
