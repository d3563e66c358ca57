use crate::error::RunResult;
use crate::interpreter::Vm;

use super::{NativeArgs, NativeOutcome};

/// Evaluates a quoted datum in the calling environment.
///
/// Call sites that name `eval` directly compile to the dedicated `Eval`
/// instruction; this native backs dynamic references to it.
pub fn eval(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    vm.eval_datum(args.value(0))?;
    let result = vm.stack.pop().expect("eval_datum pushes its result");
    Ok(NativeOutcome::Return(result))
}
