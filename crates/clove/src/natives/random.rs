use rand::Rng;

use crate::error::{RunError, RunResult};
use crate::interpreter::Vm;
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// A uniformly random non-negative Long.
pub fn random(_vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    let value = (rand::random::<u64>() >> 1) as i64;
    Ok(NativeOutcome::Return(Value::Long(value)))
}

/// A uniformly random Long in `[lo, hi)`.
pub fn random_range(_vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let lo = args.long(0)?;
    let hi = args.long(1)?;
    if lo >= hi {
        return Err(RunError::type_error(format!(
            "random:range: empty range {lo}..{hi}"
        )));
    }
    let value = rand::thread_rng().gen_range(lo..hi);
    Ok(NativeOutcome::Return(Value::Long(value)))
}
