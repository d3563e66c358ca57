//! Reactive-operator natives (feature `rx`).
//!
//! Observables here are synchronous replay sequences: a constructed
//! observable already holds its values, and operators produce new
//! observables eagerly. Operator argument shapes follow the
//! {function, observable} convention, and `rx:subscribe` drives a callback
//! over every value.

use crate::error::{ErrorKind, RunError, RunResult};
use crate::heap::HeapId;
use crate::interpreter::Vm;
use crate::intern::Symbols;
use crate::natives::{Arity, NativeArgs, NativeOutcome, NativeRegistry};
use crate::types::{Array, HeapData, Trace};
use crate::value::Value;

/// A replayable sequence of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observable {
    items: Vec<Value>,
}

impl Observable {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).copied()
    }

    #[must_use]
    pub fn items(&self) -> &[Value] {
        &self.items
    }
}

impl Trace for Observable {
    fn trace(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for item in &mut self.items {
            visitor(item);
        }
    }
}

/// Registers the `rx:*` native family.
pub fn register(registry: &mut NativeRegistry, syms: &mut Symbols) {
    registry.register(
        syms,
        "rx:observable",
        Arity::AtLeast(0),
        observable,
        "An observable replaying its arguments.",
    );
    registry.register(
        syms,
        "rx:subscribe",
        Arity::Exact(2),
        subscribe,
        "Calls a function with every value of an observable.",
    );
    registry.register(syms, "rx:map", Arity::Exact(2), map, "Maps a function over an observable.");
    registry.register(
        syms,
        "rx:filter",
        Arity::Exact(2),
        filter,
        "Keeps the values a predicate accepts.",
    );
    registry.register(
        syms,
        "rx:take-while",
        Arity::Exact(2),
        take_while,
        "Takes values while a predicate accepts them.",
    );
    registry.register(syms, "rx:first", Arity::Exact(1), first, "The first value, or null.");
    registry.register(syms, "rx:last", Arity::Exact(1), last, "The last value, or null.");
    registry.register(syms, "rx:take", Arity::Exact(2), take, "The first n values.");
    registry.register(syms, "rx:skip", Arity::Exact(2), skip, "Everything after the first n values.");
    registry.register(
        syms,
        "rx:take-last",
        Arity::Exact(2),
        take_last,
        "The last n values.",
    );
    registry.register(
        syms,
        "rx:buffer",
        Arity::Exact(2),
        buffer,
        "Groups values into arrays of n.",
    );
}

fn observable_id(vm: &Vm<'_>, value: Value, name: &str) -> RunResult<HeapId> {
    if let Value::Ref(id) = value
        && matches!(vm.heap.get(id), HeapData::Observable(_))
    {
        return Ok(id);
    }
    Err(RunError::type_error(format!(
        "{name}: expected an Observable, got {}",
        value.class_kind(vm.heap)
    )))
}

fn observable_items(vm: &Vm<'_>, id: HeapId) -> Vec<Value> {
    match vm.heap.get(id) {
        HeapData::Observable(obs) => obs.items().to_vec(),
        _ => unreachable!("checked by observable_id"),
    }
}

fn observable(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let obs = Observable::new(args.values().to_vec());
    let value = vm.alloc_value(HeapData::Observable(obs))?;
    Ok(NativeOutcome::Return(value))
}

/// Runs the callback in `arg0` over every item of the observable in
/// `arg1`, re-reading both through the frame scope because the callback
/// may trigger a collection.
fn drive_callback(
    vm: &mut Vm<'_>,
    name: &str,
    mut on_result: impl FnMut(&mut Vm<'_>, Value, Value) -> RunResult<bool>,
) -> RunResult<()> {
    let count = {
        let source = vm.native_arg(1);
        let id = observable_id(vm, source, name)?;
        observable_items(vm, id).len()
    };
    for index in 0..count {
        let source = vm.native_arg(1);
        let id = observable_id(vm, source, name)?;
        let item = observable_items(vm, id)[index];
        vm.stack.push(item);
        let func = vm.native_arg(0);
        vm.call_value(func, 1)?;
        let result = vm.stack.pop().expect("callback leaves a result");
        if result.is_error(vm.heap) {
            let message = vm.display_value(result);
            return Err(RunError::new(ErrorKind::User, message));
        }
        // the item may have moved; re-read it for the consumer
        let source = vm.native_arg(1);
        let id = observable_id(vm, source, name)?;
        let item = observable_items(vm, id)[index];
        if !on_result(vm, item, result)? {
            break;
        }
    }
    Ok(())
}

fn subscribe(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    drive_callback(vm, "rx:subscribe", |_, _, _| Ok(true))?;
    Ok(NativeOutcome::Return(Value::Null))
}

fn map(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    let depth = vm.stack.depth();
    drive_callback(vm, "rx:map", |vm, _, result| {
        vm.stack.push(result);
        Ok(true)
    })?;
    let items = vm.stack.drain_from(depth);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(items)))?;
    Ok(NativeOutcome::Return(value))
}

fn filter(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    let depth = vm.stack.depth();
    drive_callback(vm, "rx:filter", |vm, item, result| {
        if result.is_truthy() {
            vm.stack.push(item);
        }
        Ok(true)
    })?;
    let items = vm.stack.drain_from(depth);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(items)))?;
    Ok(NativeOutcome::Return(value))
}

fn take_while(vm: &mut Vm<'_>, _args: &NativeArgs) -> RunResult<NativeOutcome> {
    let depth = vm.stack.depth();
    drive_callback(vm, "rx:take-while", |vm, item, result| {
        if result.is_truthy() {
            vm.stack.push(item);
            Ok(true)
        } else {
            Ok(false)
        }
    })?;
    let items = vm.stack.drain_from(depth);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(items)))?;
    Ok(NativeOutcome::Return(value))
}

fn first(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = observable_id(vm, args.value(0), "rx:first")?;
    let items = observable_items(vm, id);
    Ok(NativeOutcome::Return(items.first().copied().unwrap_or(Value::Null)))
}

fn last(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let id = observable_id(vm, args.value(0), "rx:last")?;
    let items = observable_items(vm, id);
    Ok(NativeOutcome::Return(items.last().copied().unwrap_or(Value::Null)))
}

fn count_arg(args: &NativeArgs, index: usize) -> RunResult<usize> {
    let n = args.long(index)?;
    usize::try_from(n).map_err(|_| RunError::type_error(format!("{}: negative count {n}", args.name)))
}

fn take(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let count = count_arg(args, 0)?;
    let id = observable_id(vm, args.value(1), "rx:take")?;
    let mut items = observable_items(vm, id);
    items.truncate(count);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(items)))?;
    Ok(NativeOutcome::Return(value))
}

fn skip(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let count = count_arg(args, 0)?;
    let id = observable_id(vm, args.value(1), "rx:skip")?;
    let items = observable_items(vm, id);
    let rest = items.get(count..).map_or_else(Vec::new, <[Value]>::to_vec);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(rest)))?;
    Ok(NativeOutcome::Return(value))
}

fn take_last(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let count = count_arg(args, 0)?;
    let id = observable_id(vm, args.value(1), "rx:take-last")?;
    let items = observable_items(vm, id);
    let start = items.len().saturating_sub(count);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(items[start..].to_vec())))?;
    Ok(NativeOutcome::Return(value))
}

fn buffer(vm: &mut Vm<'_>, args: &NativeArgs) -> RunResult<NativeOutcome> {
    let size = count_arg(args, 0)?;
    if size == 0 {
        return Err(RunError::type_error("rx:buffer: size must be positive"));
    }
    let id = observable_id(vm, args.value(1), "rx:buffer")?;
    let items = observable_items(vm, id);

    let depth = vm.stack.depth();
    for chunk in items.chunks(size) {
        let array = vm.alloc_value(HeapData::Array(Array::new(chunk.to_vec())))?;
        vm.stack.push(array);
    }
    let buffers = vm.stack.drain_from(depth);
    let value = vm.alloc_value(HeapData::Observable(Observable::new(buffers)))?;
    Ok(NativeOutcome::Return(value))
}
