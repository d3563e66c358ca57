//! Introspection and collector controls, registered under the `clove:`
//! prefix.

use crate::error::RunResult;
use crate::interpreter::Vm;
use crate::io::PrintWriter;
use crate::types::{HeapData, Pair};
use crate::value::Value;

use super::{NativeArgs, NativeOutcome};

/// `(clove:docs? f)` — the docstring of a lambda or native, or null.
pub fn docs(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let value = match args.value(0) {
        Value::Ref(id) => match vm.heap.get(id) {
            HeapData::Lambda(l) => match l.docs.clone() {
                Some(text) => vm.alloc_value(HeapData::String(text))?,
                None => Value::Null,
            },
            _ => Value::Null,
        },
        Value::Native(id) => {
            let text = vm.natives.get(id).docs.to_owned();
            vm.alloc_value(HeapData::String(text))?
        }
        _ => Value::Null,
    };
    Ok(NativeOutcome::Return(value))
}

/// `(clove:minor-gc!)` — runs a minor collection immediately.
pub fn minor_gc(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    vm.collect_minor();
    Ok(NativeOutcome::Return(Value::Null))
}

/// `(clove:major-gc!)` — runs a major collection immediately.
pub fn major_gc(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    vm.collect_major();
    Ok(NativeOutcome::Return(Value::Null))
}

/// `(clove:frame?)` — the id of the current stack frame.
pub fn frame(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    Ok(NativeOutcome::Return(Value::Long(i64::from(
        vm.current_frame_id(),
    ))))
}

/// `(clove:locals?)` — prints the bindings visible from the calling
/// frame, innermost scope first, walking the parent chain.
pub fn locals(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    let mut entries: Vec<(crate::intern::SymbolId, Option<Value>)> = Vec::new();
    let mut current = Some(vm.current_env());
    while let Some(scope_id) = current {
        let scope = vm.scopes.scope(scope_id);
        for local in scope.locals() {
            entries.push((local.name, local.value));
        }
        current = scope.parent();
    }

    let mut out = String::new();
    for (name, value) in entries {
        out.push_str(vm.syms.name(name));
        out.push_str(" := ");
        match value {
            Some(value) => out.push_str(&vm.repr_value(value)),
            None => out.push_str("<unbound>"),
        }
        out.push('\n');
    }
    vm.printer.print(&out);
    Ok(NativeOutcome::Return(Value::Null))
}

/// `(clove:classes?)` — a list of every registered class name.
pub fn classes(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    let names: Vec<_> = vm.classes.iter().map(|c| c.name).collect();
    let mut result = Value::Null;
    for name in names.into_iter().rev() {
        result = vm.alloc_value(HeapData::Pair(Pair::new(Value::Symbol(name), result)))?;
    }
    Ok(NativeOutcome::Return(result))
}
