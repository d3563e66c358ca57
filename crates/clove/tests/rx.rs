//! Reactive-operator scenarios (feature `rx`).
#![cfg(feature = "rx")]

use clove::{CollectStringPrint, Object, Runtime, RuntimeOptions};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Object {
    Runtime::new(RuntimeOptions::default()).eval(source).unwrap()
}

#[test]
fn observable_reports_its_type() {
    assert_eq!(
        eval("(type? (rx:observable 1 2 3))"),
        Object::Symbol("Observable".to_owned())
    );
}

#[test]
fn first_and_last() {
    assert_eq!(eval("(rx:first (rx:observable 1 2 3))"), Object::Long(1));
    assert_eq!(eval("(rx:last (rx:observable 1 2 3))"), Object::Long(3));
    assert_eq!(eval("(rx:first (rx:observable))"), Object::Null);
}

#[test]
fn map_applies_a_lambda_to_every_value() {
    let source = "(rx:last (rx:map (fn (x) (* x 10)) (rx:observable 1 2 3)))";
    assert_eq!(eval(source), Object::Long(30));
}

#[test]
fn filter_keeps_matching_values() {
    let source = "(rx:first (rx:filter (fn (x) (> x 1)) (rx:observable 1 2 3)))";
    assert_eq!(eval(source), Object::Long(2));
}

#[test]
fn take_skip_and_buffer() {
    assert_eq!(eval("(rx:last (rx:take 2 (rx:observable 1 2 3)))"), Object::Long(2));
    assert_eq!(eval("(rx:first (rx:skip 2 (rx:observable 1 2 3)))"), Object::Long(3));
    assert_eq!(
        eval("(rx:first (rx:take-last 2 (rx:observable 1 2 3)))"),
        Object::Long(2)
    );
    assert_eq!(
        eval("(.length (rx:first (rx:buffer 2 (rx:observable 1 2 3))))"),
        Object::Long(2)
    );
}

#[test]
fn take_while_stops_at_the_first_rejection() {
    let source = "(rx:last (rx:take-while (fn (x) (< x 3)) (rx:observable 1 2 3 1)))";
    assert_eq!(eval(source), Object::Long(2));
}

#[test]
fn subscribe_drives_a_callback() {
    let mut rt = Runtime::new(RuntimeOptions::default());
    let mut printer = CollectStringPrint::new();
    rt.eval_with(
        "(rx:subscribe (fn (x) (print x)) (rx:observable 1 2 3))",
        &mut printer,
    )
    .unwrap();
    assert_eq!(printer.output(), "1\n2\n3\n");
}
