use crate::error::RunResult;
use crate::interpreter::Vm;

use super::{NativeArgs, NativeOutcome};

/// Terminates the process with the given status (0 when omitted).
pub fn exit(_vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let status = if args.is_empty() { 0 } else { args.long(0)? };
    std::process::exit(i32::try_from(status).unwrap_or(1));
}
