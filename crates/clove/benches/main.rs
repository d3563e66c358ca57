use clove::{Runtime, RuntimeOptions};
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};

/// Recursive factorial: exercises compile-once / call-many dispatch,
/// frame push/pop and integer arithmetic.
const FACTORIAL: &str = "
(define (fact n)
  (cond ((= n 0) 1)
        (else (* n (fact (- n 1))))))
(fact 15)
";

/// Tight loop over locals: exercises branches, stores and loads.
const LOOP_SUM: &str = "
(define i 0)
(define total 0)
(while (< i 1000)
  (set! total (+ total i))
  (set! i (+ i 1)))
total
";

fn run_eval(bench: &mut Bencher, code: &str, expected: i64) {
    let mut runtime = Runtime::new(RuntimeOptions::default());
    let result = runtime.eval(code).unwrap();
    assert_eq!(result.as_long(), Some(expected));

    bench.iter(|| {
        let result = runtime.eval(code).unwrap();
        black_box(result);
    });
}

/// Parses without executing, measuring the lexer + parser + expander
/// front half of the pipeline.
fn run_parse(bench: &mut Bencher, code: &str) {
    let mut runtime = Runtime::new(RuntimeOptions::default());
    bench.iter(|| {
        let script = runtime.parse(code, None).unwrap();
        black_box(script);
    });
}

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("factorial_15", |b| run_eval(b, FACTORIAL, 1_307_674_368_000));
    c.bench_function("loop_sum_1000", |b| run_eval(b, LOOP_SUM, 499_500));
    c.bench_function("parse_factorial", |b| run_parse(b, FACTORIAL));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
