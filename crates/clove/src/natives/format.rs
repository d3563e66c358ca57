use crate::error::{RunError, RunResult};
use crate::interpreter::Vm;
use crate::types::HeapData;

use super::{NativeArgs, NativeOutcome};

/// `(format "x is {}" x)` substitutes each `{}` with the display form of
/// the next argument. Too few arguments is a type error; extras are
/// ignored.
pub fn format(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let template = args.string(vm.heap, 0)?.to_owned();
    let mut out = String::new();
    let mut rest = args.values()[1..].iter();

    let mut segments = template.split("{}").peekable();
    while let Some(segment) = segments.next() {
        out.push_str(segment);
        if segments.peek().is_some() {
            let Some(value) = rest.next() else {
                return Err(RunError::type_error(
                    "format: not enough arguments for the template",
                ));
            };
            out.push_str(&vm.display_value(*value));
        }
    }

    let result = vm.alloc_value(HeapData::String(out))?;
    Ok(NativeOutcome::Return(result))
}
