use std::sync::Arc;

use kiln::analysis::{self, VerifyError};
use kiln::encoder::{EncodeError, Encoded, Encoder};
use kiln::error::InternalError;
use kiln::generate;
use kiln::isa::Instruction::{self, *};
use kiln::optimize;
use kiln::reader;
use kiln::{Arity, CompileError, Compiler, Error, Namespace, Options, SharedNamespace, Symbol, Value, VmError};

fn unit(code: Vec<Instruction>) -> Encoded {
    Encoded {
        name: None,
        code,
        constants: vec![],
        closure: vec![],
        globals: SharedNamespace::shared("props"),
        arity: Arity::exact(0),
        local_count: 0,
        label_count: 4,
    }
}

// ── Random programs ──────────────────────────────────────────────────

/// A random integer expression over parameters `p` and `q`, with its
/// expected value. Operands stay small enough that nothing overflows.
fn expr(rng: &mut fastrand::Rng, depth: u32, p: i64, q: i64) -> (String, i64) {
    if depth == 0 || rng.u8(..5) == 0 {
        return match rng.u8(..3) {
            0 => ("p".to_string(), p),
            1 => ("q".to_string(), q),
            _ => {
                let n = rng.i64(-5..10);
                (n.to_string(), n)
            }
        };
    }
    let (a, av) = expr(rng, depth - 1, p, q);
    let (b, bv) = expr(rng, depth - 1, p, q);
    match rng.u8(..4) {
        0 => (format!("(+ {a} {b})"), av + bv),
        1 => (format!("(- {a} {b})"), av - bv),
        2 => {
            let (c, cv) = expr(rng, depth - 1, p, q);
            let (d, dv) = expr(rng, depth - 1, p, q);
            (format!("(if (< {a} {b}) {c} {d})"), if av < bv { cv } else { dv })
        }
        _ => (format!("(let ((v{depth} {a})) (+ v{depth} {b}))"), av + bv),
    }
}

fn program(rng: &mut fastrand::Rng) -> (String, i64) {
    let p = rng.i64(-20..20);
    let q = rng.i64(-20..20);
    let (body, expected) = expr(rng, 4, p, q);
    (format!("((lambda (p q) {body}) {p} {q})"), expected)
}

// ── Stack discipline ─────────────────────────────────────────────────

#[test]
fn random_programs_verify_and_evaluate() {
    let mut rng = fastrand::Rng::with_seed(7);
    for _ in 0..200 {
        let (src, expected) = program(&mut rng);
        let compiler = Compiler::new(SharedNamespace::shared("props"));
        let value = compiler.eval_str(&src).unwrap_or_else(|e| panic!("{src}: {e}"));
        assert_eq!(value, Value::Integer(expected), "{src}");
    }
}

#[test]
fn returns_must_leave_empty_stack() {
    let err = analysis::verify(&unit(vec![PosOne, PosTwo, Return])).unwrap_err();
    assert!(matches!(err, VerifyError::ReturnDepth { index: 2, depth: 1, .. }));
}

#[test]
fn branch_arms_must_agree() {
    let code = vec![PushTrue, CondJump(0), Zero, Zero, Jump(1), Label(0), PosOne, Label(1), Return];
    let err = analysis::verify(&unit(code)).unwrap_err();
    assert_eq!(err, VerifyError::BranchMismatch { then_depth: 1, else_depth: 2 });
}

#[test]
fn arm_that_returns_does_not_constrain_join() {
    let code = vec![PushTrue, CondJump(0), ReturnNull, Jump(1), Label(0), PosOne, Label(1), Return];
    assert!(analysis::verify(&unit(code)).is_ok());
}

// ── Labels ───────────────────────────────────────────────────────────

#[test]
fn labels_anchor_exactly_once() {
    let twice = vec![PushTrue, CondJump(0), Label(0), Label(0), ReturnNull];
    assert_eq!(analysis::verify(&unit(twice)).unwrap_err(), VerifyError::DuplicateLabel(0));

    let never = vec![PushTrue, CondJump(3), ReturnNull];
    assert_eq!(analysis::verify(&unit(never.clone())).unwrap_err(), VerifyError::UnanchoredLabel(3));

    let err = optimize::optimize(unit(never), &Options::unoptimized()).unwrap_err();
    assert!(matches!(err, CompileError::Internal(InternalError::UnresolvedLabel(3))));
    assert!(err.is_bug());
}

// ── Constant pool ────────────────────────────────────────────────────

#[test]
fn add_constant_is_idempotent_and_injective() {
    let mut rng = fastrand::Rng::with_seed(11);
    let mut e = Encoder::new(SharedNamespace::shared("props"), Options::default());
    let mut seen: Vec<(Value, u32)> = Vec::new();
    for _ in 0..500 {
        let value = match rng.u8(..3) {
            0 => Value::Integer(rng.i64(0..50)),
            1 => Value::string(&format!("s{}", rng.u8(..30))),
            _ => Value::symbol(&format!("sym{}", rng.u8(..30))),
        };
        let index = e.add_constant(value.clone()).unwrap();
        assert_eq!(e.add_constant(value.clone()).unwrap(), index);
        for (other, other_index) in &seen {
            assert_eq!(*other == value, *other_index == index, "{other} vs {value}");
        }
        seen.push((value, index));
    }
}

// ── Tail calls ───────────────────────────────────────────────────────

#[test]
fn ten_million_self_tail_calls_run_in_constant_space() {
    let compiler = Compiler::new(SharedNamespace::shared("props"));
    compiler.eval_str("(define spin (lambda (n) (if (= n 0) 'done (spin (dec n)))))").unwrap();
    let form = reader::read("(spin 10000000)").unwrap();
    let closure = compiler.compile(&form).unwrap();

    let Some(Value::Closure(spin)) = compiler.globals().resolve(&Symbol::new("spin")) else {
        panic!("spin is bound to a closure");
    };
    let runnable = &spin.procedure().runnable;
    assert!(runnable.code.contains(&TailSelf(1)));
    assert!(runnable.stack_size <= 2);

    assert_eq!(closure.call(vec![]).unwrap(), Value::symbol("done"));
}

// ── Generation layout ────────────────────────────────────────────────

#[test]
fn if_true_one_zero_listing() {
    let mut e = Encoder::new(SharedNamespace::shared("props"), Options::default());
    generate::value(&mut e, &reader::read("(if true 1 0)").unwrap()).unwrap();
    e.emit(Return).unwrap();
    assert_eq!(e.encode().code, vec![PushTrue, CondJump(0), Zero, Jump(1), Label(0), PosOne, Label(1), Return]);
}

// ── Arity ────────────────────────────────────────────────────────────

#[test]
fn two_parameter_procedure_called_with_three() {
    let compiler = Compiler::new(SharedNamespace::shared("props"));
    let err = compiler.eval_str("((lambda (a b) a) 1 2 3)").unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::Encode(EncodeError::Arity { got: 3, .. }))));

    let Value::Closure(f) = compiler.eval_str("(lambda (a b) a)").unwrap() else {
        panic!("lambda evaluates to a closure");
    };
    let err = f.call(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]).unwrap_err();
    match err {
        VmError::Arity { expected, got, .. } => {
            assert_eq!(expected, Arity::exact(2));
            assert_eq!(got, 3);
        }
        other => panic!("expected an arity error, got {other}"),
    }
}

// ── Dead code ────────────────────────────────────────────────────────

#[test]
fn store_then_load_is_eliminated() {
    let compiler = Compiler::new(SharedNamespace::shared("props"));
    let closure = compiler.compile(&reader::read("(let ((x (* 3 3))) x)").unwrap()).unwrap();
    let runnable = &closure.procedure().runnable;
    assert!(!runnable.code.iter().any(|ins| matches!(ins, Store(_) | Load(_))), "{:?}", runnable.code);
    assert_eq!(runnable.local_count, 0);
    assert_eq!(closure.call(vec![]).unwrap(), Value::Integer(9));
}

// ── Inlining ─────────────────────────────────────────────────────────

#[test]
fn inlining_does_not_change_results() {
    let mut rng = fastrand::Rng::with_seed(23);
    let helpers = "(define clamp (lambda (x lo hi) (if (< x lo) lo (if (> x hi) hi x))))
                   (define sq (lambda (x) (* x x)))
                   (define dist (lambda (a b) (if (< a b) (- b a) (- a b))))";
    let inlined = Compiler::new(SharedNamespace::shared("inline"));
    let plain = Compiler::with_options(
        SharedNamespace::shared("plain"),
        Options { inline: false, ..Options::default() },
    );
    inlined.eval_str(helpers).unwrap();
    plain.eval_str(helpers).unwrap();

    for _ in 0..100 {
        let (a, b, c) = (rng.i64(-50..50), rng.i64(-50..50), rng.i64(-50..50));
        let src = format!("(+ (clamp {a} -10 10) (sq {b}) (dist {a} {c}) (let ((t (sq {c}))) (dist t {b})))");
        assert_eq!(inlined.eval_str(&src).unwrap(), plain.eval_str(&src).unwrap(), "{src}");
    }
    for _ in 0..50 {
        let (src, expected) = program(&mut rng);
        assert_eq!(inlined.eval_str(&src).unwrap(), Value::Integer(expected), "{src}");
        assert_eq!(plain.eval_str(&src).unwrap(), Value::Integer(expected), "{src}");
    }
}

#[test]
fn inlined_call_leaves_no_call() {
    let compiler = Compiler::new(SharedNamespace::shared("props"));
    compiler.eval_str("(define sq (lambda (x) (* x x)))").unwrap();
    let closure = compiler.compile(&reader::read("(+ (sq 3) 1)").unwrap()).unwrap();
    let code = &closure.procedure().runnable.code;
    assert!(!code.iter().any(|ins| matches!(ins, Call(_) | TailCall(_))), "{code:?}");
    assert_eq!(closure.call(vec![]).unwrap(), Value::Integer(10));
}

// ── Threads ──────────────────────────────────────────────────────────

#[test]
fn closures_run_on_many_threads() {
    let compiler = Compiler::new(SharedNamespace::shared("props"));
    let Value::Closure(fib) =
        compiler.eval_str("(define fib (lambda (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))  fib").unwrap()
    else {
        panic!("fib is a closure");
    };
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let fib = Arc::clone(&fib);
                s.spawn(move || fib.call(vec![Value::Integer(15 + i)]))
            })
            .collect();
        let results: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(results, vec![Value::Integer(610), Value::Integer(987), Value::Integer(1597), Value::Integer(2584)]);
    });
}
