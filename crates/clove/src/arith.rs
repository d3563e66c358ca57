//! Operator evaluation: arithmetic dispatch, coercion, and the handful of
//! polymorphic `+` behaviors.

use crate::error::{ErrorKind, RunError, RunResult};
use crate::expressions::{BinaryOp, UnaryOp};
use crate::interpreter::Vm;
use crate::types::{HeapData, Pair};
use crate::value::{Value, values_equal};

/// Applies a binary operator to already-evaluated operands.
///
/// Numeric operands coerce Long+Double to Double. `+` additionally
/// concatenates strings and appends pairs; mixed-type `+` is a type
/// error. Division and modulus by zero are arithmetic errors.
pub fn apply_binary(vm: &mut Vm<'_>, op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    match op {
        BinaryOp::Equals => Ok(Value::Bool(values_equal(lhs, rhs, vm.heap))),
        BinaryOp::NotEquals => Ok(Value::Bool(!values_equal(lhs, rhs, vm.heap))),
        BinaryOp::And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
        BinaryOp::Cons => vm.alloc_value(HeapData::Pair(Pair::new(lhs, rhs))),
        BinaryOp::Add => apply_add(vm, lhs, rhs),
        BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Modulus
        | BinaryOp::LessThan
        | BinaryOp::LessThanEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanEqual => apply_numeric(vm, op, lhs, rhs),
    }
}

/// Applies a unary operator.
pub fn apply_unary(vm: &mut Vm<'_>, op: UnaryOp, value: Value) -> RunResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::Car => pair_field(vm, value, "car").map(|pair| pair.car),
        UnaryOp::Cdr => pair_field(vm, value, "cdr").map(|pair| pair.cdr),
    }
}

fn pair_field(vm: &Vm<'_>, value: Value, op: &str) -> RunResult<Pair> {
    if let Value::Ref(id) = value
        && let HeapData::Pair(pair) = vm.heap.get(id)
    {
        return Ok(pair.clone());
    }
    Err(RunError::type_error(format!(
        "{op}: expected a Pair, got {}",
        value.class_kind(vm.heap)
    )))
}

fn apply_add(vm: &mut Vm<'_>, lhs: Value, rhs: Value) -> RunResult<Value> {
    // numbers first: the hot path
    if lhs.as_f64().is_some() && rhs.as_f64().is_some() {
        return apply_numeric(vm, BinaryOp::Add, lhs, rhs);
    }
    if let (Value::Ref(left), Value::Ref(right)) = (lhs, rhs)
        && let (HeapData::String(a), HeapData::String(b)) = (vm.heap.get(left), vm.heap.get(right))
    {
        let joined = format!("{a}{b}");
        return vm.alloc_value(HeapData::String(joined));
    }
    if is_list(vm, lhs) && (is_list(vm, rhs) || rhs == Value::Null) {
        return append_lists(vm, lhs, rhs);
    }
    Err(RunError::type_error(format!(
        "+: cannot add {} and {}",
        lhs.class_kind(vm.heap),
        rhs.class_kind(vm.heap)
    )))
}

fn is_list(vm: &Vm<'_>, value: Value) -> bool {
    matches!(value, Value::Ref(id) if matches!(vm.heap.get(id), HeapData::Pair(_)))
}

/// `(+ '(1 2) '(3))` appends: the left chain is copied, its tail spliced
/// onto the right operand.
fn append_lists(vm: &mut Vm<'_>, lhs: Value, rhs: Value) -> RunResult<Value> {
    let mut items = Vec::new();
    let mut current = lhs;
    while let Value::Ref(id) = current {
        let HeapData::Pair(pair) = vm.heap.get(id) else {
            return Err(RunError::type_error("+: left operand is an improper list"));
        };
        items.push(pair.car);
        current = pair.cdr;
    }
    if current != Value::Null {
        return Err(RunError::type_error("+: left operand is an improper list"));
    }

    let mut result = rhs;
    for item in items.into_iter().rev() {
        result = vm.alloc_value(HeapData::Pair(Pair::new(item, result)))?;
    }
    Ok(result)
}

fn apply_numeric(vm: &Vm<'_>, op: BinaryOp, lhs: Value, rhs: Value) -> RunResult<Value> {
    match (lhs, rhs) {
        (Value::Long(a), Value::Long(b)) => apply_long(op, a, b),
        _ => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Err(RunError::type_error(format!(
                    "{op}: expected numeric operands, got {} and {}",
                    lhs.class_kind(vm.heap),
                    rhs.class_kind(vm.heap)
                )));
            };
            apply_double(op, a, b)
        }
    }
}

fn apply_long(op: BinaryOp, a: i64, b: i64) -> RunResult<Value> {
    let overflow = || RunError::new(ErrorKind::Arithmetic, format!("{op}: integer overflow"));
    Ok(match op {
        BinaryOp::Add => Value::Long(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Subtract => Value::Long(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Multiply => Value::Long(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::Divide => {
            if b == 0 {
                return Err(RunError::new(ErrorKind::Arithmetic, "division by zero"));
            }
            Value::Long(a.checked_div(b).ok_or_else(overflow)?)
        }
        BinaryOp::Modulus => {
            if b == 0 {
                return Err(RunError::new(ErrorKind::Arithmetic, "division by zero"));
            }
            Value::Long(a.checked_rem(b).ok_or_else(overflow)?)
        }
        BinaryOp::LessThan => Value::Bool(a < b),
        BinaryOp::LessThanEqual => Value::Bool(a <= b),
        BinaryOp::GreaterThan => Value::Bool(a > b),
        BinaryOp::GreaterThanEqual => Value::Bool(a >= b),
        _ => unreachable!("apply_long covers only numeric operators"),
    })
}

fn apply_double(op: BinaryOp, a: f64, b: f64) -> RunResult<Value> {
    Ok(match op {
        BinaryOp::Add => Value::Double(a + b),
        BinaryOp::Subtract => Value::Double(a - b),
        BinaryOp::Multiply => Value::Double(a * b),
        BinaryOp::Divide => {
            if b == 0.0 {
                return Err(RunError::new(ErrorKind::Arithmetic, "division by zero"));
            }
            Value::Double(a / b)
        }
        BinaryOp::Modulus => {
            if b == 0.0 {
                return Err(RunError::new(ErrorKind::Arithmetic, "division by zero"));
            }
            Value::Double(a % b)
        }
        BinaryOp::LessThan => Value::Bool(a < b),
        BinaryOp::LessThanEqual => Value::Bool(a <= b),
        BinaryOp::GreaterThan => Value::Bool(a > b),
        BinaryOp::GreaterThanEqual => Value::Bool(a >= b),
        _ => unreachable!("apply_double covers only numeric operators"),
    })
}
