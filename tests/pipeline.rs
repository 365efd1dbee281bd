use std::sync::Arc;

use kiln::encoder::EncodeError;
use kiln::namespace::NamespaceError;
use kiln::{CompileError, Compiler, Error, Options, SharedNamespace, Symbol, Value, VmError};

fn eval(src: &str) -> kiln::Result<Value> {
    Compiler::new(SharedNamespace::shared("pipeline")).eval_str(src)
}

fn eval_unoptimized(src: &str) -> kiln::Result<Value> {
    Compiler::with_options(SharedNamespace::shared("pipeline"), Options::unoptimized()).eval_str(src)
}

fn show(src: &str) -> String {
    eval(src).unwrap_or_else(|e| panic!("{src}: {e}")).to_string()
}

// --- Values and primitives ---

#[test]
fn arithmetic_and_promotion() {
    assert_eq!(show("(+ 1 2 3)"), "6");
    assert_eq!(show("(- 10 4 3)"), "3");
    assert_eq!(show("(/ 4 2)"), "2");
    assert_eq!(show("(/ 3 2)"), "1.5");
    assert_eq!(show("(+ 1 2.5)"), "3.5");
    assert_eq!(show("(mod -7 3)"), "2");
    assert_eq!(show("(+ \"ab\" \"cd\")"), "\"abcd\"");
}

#[test]
fn comparisons_and_truthiness() {
    assert_eq!(show("(< 1 2)"), "true");
    assert_eq!(show("(= 2 2.0)"), "true");
    assert_eq!(show("(if nil 1 2)"), "2");
    assert_eq!(show("(if 0 1 2)"), "1");
    assert_eq!(show("(if false 1)"), "nil");
    assert_eq!(show("(not nil)"), "true");
}

#[test]
fn sequences() {
    assert_eq!(show("'(1 2)"), "(1 2)");
    assert_eq!(show("(car '(1 2))"), "1");
    assert_eq!(show("(cdr '(1 2 3))"), "(2 3)");
    assert_eq!(show("(cons 0 '(1))"), "(0 1)");
    assert_eq!(show("(nth [10 20 30] 1)"), "20");
    assert_eq!(show("(empty? '())"), "true");
    assert_eq!(show("(list 1 (+ 1 1) 3)"), "(1 2 3)");
    assert_eq!(show("(let ((x 1)) [x (+ x 1)])"), "[1 2]");
    assert_eq!(show("{:a 1}"), "{:a 1}");
}

// --- Bindings, procedures, closures ---

#[test]
fn let_and_do() {
    assert_eq!(show("(let ((x 2) (y 3)) (* x y))"), "6");
    assert_eq!(show("(let ((x 1)) (let ((x 2) (y x)) y))"), "1");
    assert_eq!(show("(do 1 2 3)"), "3");
    assert_eq!(show("(do)"), "nil");
}

#[test]
fn define_returns_symbol_and_binds() {
    let c = Compiler::new(SharedNamespace::shared("pipeline"));
    assert_eq!(c.eval_str("(define answer 42)").unwrap(), Value::symbol("answer"));
    assert_eq!(c.eval_str("answer").unwrap(), Value::Integer(42));
}

#[test]
fn recursive_factorial() {
    let src = "(define fact (lambda (n) (if (< n 2) 1 (* n (fact (dec n)))))) (fact 20)";
    assert_eq!(show(src), "2432902008176640000");
}

#[test]
fn tail_recursive_loop() {
    let src = "(define count (lambda (n acc) (if (= n 0) acc (count (dec n) (inc acc))))) (count 100000 0)";
    assert_eq!(show(src), "100000");
}

#[test]
fn closures_capture_arguments() {
    let src = "(define adder (lambda (n) (lambda (x) (+ x n)))) ((adder 3) 4)";
    assert_eq!(show(src), "7");
}

#[test]
fn closures_capture_let_locals() {
    let src = "(let ((k 10)) (let ((f (lambda (x) (* x k)))) (f 5)))";
    assert_eq!(show(src), "50");
}

#[test]
fn higher_order_procedures() {
    let src = "(define twice (lambda (f x) (f (f x)))) (twice (lambda (y) (* y 3)) 2)";
    assert_eq!(show(src), "18");
}

#[test]
fn letrec_mutual_recursion() {
    let src = "(letrec ((ev? (lambda (n) (if (= n 0) true (od? (dec n)))))
                        (od? (lambda (n) (if (= n 0) false (ev? (dec n))))))
                 (ev? 101))";
    assert_eq!(show(src), "false");
}

#[test]
fn letrec_closures_are_reclaimed() {
    let src = "(let ((k 7)) (letrec ((f (lambda (n) (if (= n 0) k (f (- n 1)))))) f))";
    let Value::Closure(f) = eval(src).unwrap() else {
        panic!("letrec yields its closure");
    };
    assert_eq!(f.call(vec![Value::Integer(10)]).unwrap(), Value::Integer(7));
    let weak = Arc::downgrade(&f);
    drop(f);
    assert!(weak.upgrade().is_none());
}

#[test]
fn deep_non_tail_recursion() {
    let src = "(define down (lambda (n) (if (= n 0) 0 (+ 1 (down (dec n)))))) (down 50000)";
    assert_eq!(show(src), "50000");
}

#[test]
fn call_depth_limit_is_an_error() {
    let options = Options { max_call_depth: 1000, ..Options::default() };
    let c = Compiler::with_options(SharedNamespace::shared("pipeline"), options);
    let src = "(define down (lambda (n) (if (= n 0) 0 (+ 1 (down (dec n)))))) (down 5000)";
    assert!(matches!(c.eval_str(src), Err(Error::Runtime(VmError::CallDepth(1000)))));
    assert_eq!(c.eval_str("(down 500)").unwrap(), Value::Integer(500));
}

#[test]
fn rest_parameters() {
    assert_eq!(show("((lambda (a & more) more) 1 2 3)"), "(2 3)");
    assert_eq!(show("((lambda (a & more) more) 1)"), "()");
    assert_eq!(show("((lambda (a & more) (arg-count)) 1 2 3)"), "3");
}

#[test]
fn and_or_short_circuit() {
    assert_eq!(show("(and 1 2)"), "2");
    assert_eq!(show("(and 1 nil 3)"), "nil");
    assert_eq!(show("(and false (car 1))"), "false");
    assert_eq!(show("(or nil false 3)"), "3");
    assert_eq!(show("(or 0 (car 1))"), "0");
    assert_eq!(show("(and)"), "true");
    assert_eq!(show("(or)"), "nil");
}

#[test]
fn declare_then_define_forward_reference() {
    let src = "(declare later)
               (define early (lambda (x) (later x)))
               (define later (lambda (x) (* x 2)))
               (early 21)";
    assert_eq!(show(src), "42");
}

// --- Errors ---

#[test]
fn runtime_errors() {
    assert!(matches!(eval("(/ 1 0)"), Err(Error::Runtime(VmError::DivisionByZero))));
    assert!(matches!(eval("(* 9223372036854775807 2)"), Err(Error::Runtime(VmError::Overflow))));
    assert!(matches!(eval("(missing 1)"), Err(Error::Runtime(VmError::Unbound(_)))));
    assert!(matches!(eval("(1 2)"), Err(Error::Runtime(VmError::NotCallable(_)))));
    assert!(matches!(eval("(nth [1] 5)"), Err(Error::Runtime(VmError::IndexOutOfRange { index: 5, len: 1 }))));
    assert!(matches!(eval("(mod 5.5 0.0)"), Err(Error::Runtime(VmError::DivisionByZero))));
}

#[test]
fn inc_and_dec_overflow() {
    assert!(matches!(eval("(inc 9223372036854775807)"), Err(Error::Runtime(VmError::Overflow))));
    assert!(matches!(eval("(dec -9223372036854775808)"), Err(Error::Runtime(VmError::Overflow))));
    assert!(matches!(eval("(inc \"a\")"), Err(Error::Runtime(VmError::Type(_)))));
    assert_eq!(show("(inc 1.5)"), "2.5");
}

#[test]
fn failed_define_leaves_no_declaration() {
    let ns = SharedNamespace::shared("pipeline");
    let c = Compiler::new(ns.clone());
    assert!(matches!(c.eval_str("(define + (car 1 2))"), Err(Error::Compile(_))));
    assert!(!ns.is_declared(&Symbol::new("+")));
    assert_eq!(c.eval_str("(+ 1 2)").unwrap(), Value::Integer(3));
}

#[test]
fn panic_carries_value() {
    match eval("(panic \"boom\")") {
        Err(Error::Runtime(VmError::Panic(v))) => assert_eq!(v, Value::string("boom")),
        other => panic!("expected a panic, got {other:?}"),
    }
}

#[test]
fn rebinding_a_global_fails() {
    let err = eval("(define x 1) (define x 2)").unwrap_err();
    assert!(matches!(err, Error::Runtime(VmError::Namespace(NamespaceError::AlreadyBound { .. }))));
}

#[test]
fn compile_errors_are_user_errors() {
    for src in ["(let)", "(if)", "(lambda)", "(car 1 2)", "(let ((x 1) (x 2)) x)"] {
        match eval(src) {
            Err(Error::Compile(e)) => assert!(!e.is_bug(), "{src}: {e}"),
            other => panic!("{src}: expected a compile error, got {other:?}"),
        }
    }
    assert!(matches!(
        eval("(let ((x 1) (x 2)) x)"),
        Err(Error::Compile(CompileError::Encode(EncodeError::DuplicateName(_))))
    ));
}

#[test]
fn read_errors_surface() {
    assert!(matches!(eval("(+ 1"), Err(Error::Read(_))));
}

// --- Optimization does not change results ---

#[test]
fn optimized_and_unoptimized_agree() {
    let programs = [
        "(define f (lambda (a b) (if (< a b) (- b a) (- a b)))) (+ (f 3 9) (f 9 3))",
        "(let ((sq (lambda (x) (* x x)))) (+ (sq 3) (sq 4)))",
        "(define g (lambda (n) (if (= n 0) 'done (g (dec n))))) (g 20)",
        "((lambda (x) (if x (do 1 2) (do 3 4))) false)",
        "(letrec ((f (lambda (n acc) (if (= n 0) acc (f (dec n) (+ acc n)))))) (f 30 0))",
        "(define pick (lambda (a b) (or (and a b) 'neither))) [(pick 1 2) (pick nil 2)]",
    ];
    for src in programs {
        let a = eval(src).unwrap_or_else(|e| panic!("{src}: {e}"));
        let b = eval_unoptimized(src).unwrap_or_else(|e| panic!("{src}: {e}"));
        assert_eq!(a, b, "{src}");
    }
}
