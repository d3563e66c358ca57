//! End-to-end scenarios through the public API.

use std::path::PathBuf;

use clove::{CollectStringPrint, ErrorKind, Object, Runtime, RuntimeOptions};
use pretty_assertions::assert_eq;

fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::default())
}

fn eval(source: &str) -> Object {
    runtime().eval(source).unwrap()
}

#[test]
fn binary_addition() {
    assert_eq!(eval("(+ 99 1)"), Object::Long(100));
}

#[test]
fn begin_with_definitions() {
    assert_eq!(
        eval("(begin (define x 10) (define y 20) (+ x y))"),
        Object::Long(30)
    );
}

#[test]
fn recursive_factorial() {
    let source = "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 5)";
    assert_eq!(eval(source), Object::Long(120));
}

#[test]
fn user_macro_expansion() {
    assert_eq!(eval("(defmacro bump (x) (+ x 1)) (bump 41)"), Object::Long(42));
}

#[test]
fn array_natives() {
    assert_eq!(eval("(array:get (array:new 1 2 3) 1)"), Object::Long(2));
    assert_eq!(eval("(array:length (array:new 1 2 3))"), Object::Long(3));
    assert_eq!(
        eval("(begin (define a (array:new 1 2 3)) (array:set a 0 9) (array:get a 0))"),
        Object::Long(9)
    );
}

#[test]
fn division_by_zero_is_a_value_not_an_abort() {
    match eval("(/ 1 0)") {
        Object::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::Arithmetic);
            assert_eq!(message, "division by zero");
        }
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn empty_expression_stream_yields_null() {
    assert_eq!(eval(""), Object::Null);
    assert_eq!(eval("  ; just a comment\n"), Object::Null);
}

#[test]
fn array_index_out_of_range_is_an_error_value() {
    match eval("(array:get (array:new 1) 5)") {
        Object::Error { kind, .. } => assert_eq!(kind, ErrorKind::Index),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn arity_zero_native_is_callable() {
    match eval("(random)") {
        Object::Long(n) => assert!(n >= 0),
        other => panic!("expected a long, got {other:?}"),
    }
}

#[test]
fn macro_with_empty_body_removes_the_call_site() {
    assert_eq!(eval("(defmacro nothing () ) (nothing) 5"), Object::Long(5));
}

#[test]
fn runtime_survives_fatal_errors_between_evals() {
    let mut rt = runtime();
    assert!(rt.eval("(begin 1").is_err());
    assert_eq!(rt.eval("(+ 1 2)").unwrap(), Object::Long(3));
}

#[test]
fn definitions_persist_across_evals() {
    let mut rt = runtime();
    rt.eval("(define x 21)").unwrap();
    assert_eq!(rt.eval("(* x 2)").unwrap(), Object::Long(42));
}

#[test]
fn lambda_redefinition_takes_effect() {
    let mut rt = runtime();
    rt.eval("(defn f (n) (+ n 1))").unwrap();
    assert_eq!(rt.eval("(f 1)").unwrap(), Object::Long(2));
    rt.eval("(defn f (n) (+ n 10))").unwrap();
    assert_eq!(rt.eval("(f 1)").unwrap(), Object::Long(11));
}

#[test]
fn unknown_symbol_is_a_lookup_error() {
    match eval("mystery") {
        Object::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::Lookup);
            assert!(message.contains("mystery"));
        }
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn throw_produces_a_user_error() {
    match eval("(throw \"boom\")") {
        Object::Error { kind, message } => {
            assert_eq!(kind, ErrorKind::User);
            assert_eq!(message, "boom");
        }
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn errors_unwind_through_frames() {
    let source = "(define (inner) (/ 1 0)) (define (outer) (inner)) (outer)";
    match eval(source) {
        Object::Error { message, .. } => assert_eq!(message, "division by zero"),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn lambda_arity_mismatch_is_an_error_value() {
    match eval("(defn two (a b) (+ a b)) (two 1)") {
        Object::Error { kind, .. } => assert_eq!(kind, ErrorKind::Arity),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn cond_case_when_and_while() {
    assert_eq!(eval("(cond ((= 1 2) 10) ((= 1 1) 20) (else 30))"), Object::Long(20));
    assert_eq!(eval("(cond ((= 1 2) 10))"), Object::Null);
    assert_eq!(eval("(case 2 (1 10) (2 20) (else 30))"), Object::Long(20));
    assert_eq!(eval("(case 9 (1 10) (else 30))"), Object::Long(30));
    assert_eq!(eval("(when (> 2 1) 4 5)"), Object::Long(5));
    assert_eq!(eval("(when (< 2 1) 5)"), Object::Null);
    let loop_source = "
        (define i 0)
        (define total 0)
        (while (< i 5)
          (set! total (+ total i))
          (set! i (+ i 1)))
        total";
    assert_eq!(eval(loop_source), Object::Long(10));
}

#[test]
fn let_and_letrec() {
    assert_eq!(eval("(let ((x 2) (y 3)) (* x y))"), Object::Long(6));
    let source = "
        (letrec ((even? (fn (n) (if (= n 0) #t (odd? (- n 1)))))
                 (odd? (fn (n) (if (= n 0) #f (even? (- n 1))))))
          (even? 10))";
    assert_eq!(eval(source), Object::Bool(true));
}

#[test]
fn quoting_and_eval() {
    assert_eq!(eval("(eval '(+ 1 2))"), Object::Long(3));
    assert_eq!(eval("'sym"), Object::Symbol("sym".to_owned()));
    assert_eq!(eval("(defn f (n) (* n 2)) (eval '(f 21))"), Object::Long(42));
    assert_eq!(eval("(car '(1 2 3))"), Object::Long(1));
}

#[test]
fn pairs_cons_and_mutation() {
    assert_eq!(eval("(cons 1 2)").to_string(), "(1 . 2)");
    assert_eq!(eval("(list 1 2 3)").to_string(), "(1 2 3)");
    assert_eq!(eval("(+ '(1 2) '(3))").to_string(), "(1 2 3)");
    assert_eq!(
        eval("(begin (define p (cons 1 2)) (set-car! p 9) (car p))"),
        Object::Long(9)
    );
    assert_eq!(
        eval("(begin (define p (cons 1 2)) (set-cdr! p 9) (cdr p))"),
        Object::Long(9)
    );
}

#[test]
fn string_concatenation_and_mixed_add() {
    assert_eq!(eval("(+ \"foo\" \"bar\")"), Object::String("foobar".to_owned()));
    match eval("(+ 1 \"x\")") {
        Object::Error { kind, .. } => assert_eq!(kind, ErrorKind::Type),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn numeric_coercion() {
    assert_eq!(eval("(+ 1 2.5)"), Object::Double(3.5));
    assert_eq!(eval("(= 1 1.0)"), Object::Bool(true));
    assert_eq!(eval("(% 7 3)"), Object::Long(1));
}

#[test]
fn list_and_map_literals() {
    assert_eq!(eval("[1 (+ 1 1) 3]").to_string(), "(1 2 3)");
    assert_eq!(eval("(.get {1 \"one\"} 1)"), Object::String("one".to_owned()));
    assert_eq!(eval("(.length {1 2 3 4})"), Object::Long(2));
    assert_eq!(eval("(.keys {1 2 3 4})").to_string(), "(1 3)");
}

#[test]
fn instance_checks_and_casts() {
    assert_eq!(eval("(instanceof? Number 3)"), Object::Bool(true));
    assert_eq!(eval("(instanceof? Long 3.5)"), Object::Bool(false));
    assert_eq!(eval("(instanceof? Object \"s\")"), Object::Bool(true));
    assert_eq!(eval("(cast Long 5)"), Object::Long(5));
    match eval("(cast String 5)") {
        Object::Error { kind, .. } => assert_eq!(kind, ErrorKind::Type),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn new_constructs_builtin_instances() {
    assert_eq!(eval("(.length (new Array 1 2))"), Object::Long(2));
    assert_eq!(eval("(type? (new Map))"), Object::Symbol("Map".to_owned()));
    assert_eq!(eval("(.contains? (new Set 1 2) 2)"), Object::Bool(true));
}

#[test]
fn type_native_reports_class_names() {
    assert_eq!(eval("(type? 3)"), Object::Symbol("Long".to_owned()));
    assert_eq!(eval("(type? 3.5)"), Object::Symbol("Double".to_owned()));
    assert_eq!(eval("(type? \"s\")"), Object::Symbol("String".to_owned()));
    assert_eq!(eval("(type? (list 1))"), Object::Symbol("Pair".to_owned()));
    assert_eq!(eval("(type? ())"), Object::Symbol("Null".to_owned()));
}

#[test]
fn print_writes_through_the_print_writer() {
    let mut rt = runtime();
    let mut printer = CollectStringPrint::new();
    rt.eval_with("(print \"hello\" 42)", &mut printer).unwrap();
    assert_eq!(printer.output(), "hello 42\n");
}

#[test]
fn format_substitutes_placeholders() {
    assert_eq!(
        eval("(format \"x is {} and y is {}\" 1 2)"),
        Object::String("x is 1 and y is 2".to_owned())
    );
}

#[test]
fn kernel_prelude_is_loaded_by_default() {
    assert_eq!(eval("(inc 41)"), Object::Long(42));
    assert_eq!(eval("(dec 43)"), Object::Long(42));
    assert_eq!(eval("(length '(1 2 3))"), Object::Long(3));
    assert_eq!(eval("(max 2 7)"), Object::Long(7));
    assert_eq!(eval("(second '(1 2 3))"), Object::Long(2));
}

#[test]
fn kernel_can_be_disabled() {
    let mut rt = Runtime::new(RuntimeOptions {
        kernel: false,
        ..RuntimeOptions::default()
    });
    match rt.eval("(length '(1 2))").unwrap() {
        Object::Error { kind, .. } => assert_eq!(kind, ErrorKind::Lookup),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn docstrings_are_queryable() {
    assert_eq!(
        eval("(defn g (x) \"does g things\" x) (clove:docs? g)"),
        Object::String("does g things".to_owned())
    );
}

fn module_runtime() -> Runtime {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/modules");
    Runtime::new(RuntimeOptions {
        module_dir: Some(dir),
        ..RuntimeOptions::default()
    })
}

#[test]
fn import_loads_a_module_and_merges_its_scope() {
    let mut rt = module_runtime();
    assert_eq!(rt.eval("(import mathx) (triple 7)").unwrap(), Object::Long(21));
    assert_eq!(rt.eval("(quadruple 5)").unwrap(), Object::Long(20));
}

#[test]
fn importing_twice_loads_the_module_once() {
    let mut rt = module_runtime();
    let before = rt.loaded_module_count();
    rt.eval("(import mathx)").unwrap();
    assert_eq!(rt.loaded_module_count(), before + 1);
    rt.eval("(import mathx)").unwrap();
    assert_eq!(rt.loaded_module_count(), before + 1);
    assert_eq!(rt.eval("(square 6)").unwrap(), Object::Long(36));
}

#[test]
fn unresolvable_import_is_an_error_value() {
    match eval("(import no-such-module)") {
        Object::Error { kind, .. } => assert_eq!(kind, ErrorKind::Import),
        other => panic!("expected an error value, got {other:?}"),
    }
}

#[test]
fn operand_stack_is_balanced_after_calls() {
    let mut rt = runtime();
    rt.eval("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))")
        .unwrap();
    assert_eq!(rt.operand_stack_depth(), 0);
    let mut printer = CollectStringPrint::new();
    let result = rt.call_with("fact", &[Object::Long(5)], &mut printer).unwrap();
    assert_eq!(result, Object::Long(120));
    assert_eq!(rt.operand_stack_depth(), 0);
}

#[test]
fn call_with_unknown_name_reports_lookup_error() {
    let mut rt = runtime();
    let mut printer = CollectStringPrint::new();
    let result = rt.call_with("nope", &[], &mut printer).unwrap();
    assert!(result.is_error());
}

#[test]
fn literal_repr_round_trips() {
    let mut rt = runtime();
    for source in ["#t", "#f", "42", "3.5", "\"a\\nb\"", "()"] {
        let first = rt.eval(source).unwrap();
        let second = rt.eval(&first.to_string()).unwrap();
        assert_eq!(first, second, "round-trip failed for {source}");
    }
    // symbols print bare, so the round trip re-quotes them
    let first = rt.eval("'sym").unwrap();
    let second = rt.eval(&format!("'{first}")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn explicit_collections_preserve_live_data() {
    let source = "
        (define xs (list 1 2 3))
        (clove:minor-gc!)
        (clove:minor-gc!)
        (clove:major-gc!)
        (car xs)";
    assert_eq!(eval(source), Object::Long(1));
}

#[cfg(not(feature = "system-heap"))]
#[test]
fn collection_counters_advance() {
    let mut rt = runtime();
    rt.eval("(clove:minor-gc!) (clove:major-gc!)").unwrap();
    let stats = rt.heap_stats();
    assert!(stats.minor_collections >= 1);
    assert!(stats.major_collections >= 1);
}

#[test]
fn allocation_heavy_workload_survives_collection_pressure() {
    // builds and discards lists until the nursery cycles several times
    let source = "
        (define i 0)
        (define keep (list 1 2 3))
        (while (< i 2000)
          (list i i i i i i i i)
          (set! i (+ i 1)))
        (+ (car keep) (length keep))";
    assert_eq!(eval(source), Object::Long(4));
}

#[test]
fn modules_can_be_defined_inline() {
    assert_eq!(eval("(defmodule util (define x 5)) x"), Object::Long(5));
}

#[test]
fn disassembly_lists_instructions() {
    let mut rt = runtime();
    let listing = rt.disassemble("(+ 1 2)").unwrap();
    assert!(listing.contains("BinaryOp +"));
    assert!(listing.contains("Return"));
}

#[test]
fn dot_export_produces_a_digraph() {
    let mut rt = runtime();
    let dot = rt.export_dot("(when #t 1)").unwrap();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("->"));
}

#[test]
fn frame_and_class_introspection() {
    match eval("(clove:frame?)") {
        Object::Long(_) => {}
        other => panic!("expected a frame id, got {other:?}"),
    }
    let classes = eval("(clove:classes?)").to_string();
    assert!(classes.contains("Long"));
    assert!(classes.contains("Procedure"));
}
