//! Deferred expressions: ordering, exceptions, and interaction with
//! tail calls.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use asteria::air::node::Xop;
use asteria::ast::{Block, Statement};
use asteria::runtime::function::HostFunction;
use asteria::runtime::global::GlobalContext;
use asteria::runtime::value::Value;
use common::*;

/// Returns a global context with a `log(text)` function appending to
/// the shared transcript.
fn logging_global() -> (GlobalContext, Rc<RefCell<Vec<String>>>) {
    let transcript = Rc::new(RefCell::new(Vec::new()));
    let sink = transcript.clone();
    let mut global = GlobalContext::new();
    let log = HostFunction::new("log", move |self_ref, _global, args| {
        let value = args.top(0).dereference_readonly()?;
        let text = match value {
            Value::Str(text) => text,
            other => other.to_string(),
        };
        sink.borrow_mut().push(text);
        self_ref.set_void();
        Ok(())
    });
    global.declare_const("log", Value::Function(log));
    (global, transcript)
}

fn log_stmt(text: &str) -> Statement {
    expr_stmt(call(name("log"), vec![lit(text)]))
}

fn defer_log(text: &str) -> Statement {
    Statement::Defer {
        sloc: at(0),
        expr: call(name("log"), vec![lit(text)]),
    }
}

#[test]
fn defers_run_in_reverse_order_on_normal_exit() {
    let (mut global, transcript) = logging_global();
    run(
        &mut global,
        vec![
            Statement::Block {
                body: Block::new(vec![defer_log("A"), defer_log("B"), log_stmt("body")]),
            },
            log_stmt("after"),
        ],
    )
    .unwrap();
    assert_eq!(&*transcript.borrow(), &["body", "B", "A", "after"]);
}

#[test]
fn defers_run_during_unwinding_then_the_catch() {
    // try { defer log("A"); defer log("B"); throw "x"; }
    // catch(e) { log("C"); }
    let (mut global, transcript) = logging_global();
    run(
        &mut global,
        vec![Statement::Try {
            sloc_try: at(1),
            body: Block::new(vec![
                defer_log("A"),
                defer_log("B"),
                Statement::Throw {
                    sloc: at(2),
                    expr: lit("x"),
                },
            ]),
            sloc_catch: at(3),
            except_name: "e".to_owned(),
            handler: Block::new(vec![log_stmt("C")]),
        }],
    )
    .unwrap();
    assert_eq!(&*transcript.borrow(), &["B", "A", "C"]);
}

#[test]
fn a_defer_error_replaces_the_in_flight_error() {
    // Both defers run even though the first one to execute (the
    // newest) raises; its error replaces the original.
    let (mut global, transcript) = logging_global();
    let error = run(
        &mut global,
        vec![
            defer_log("ran"),
            Statement::Defer {
                sloc: at(2),
                expr: binary(Xop::Div, lit(1), lit(0)),
            },
            Statement::Throw {
                sloc: at(3),
                expr: lit("original"),
            },
        ],
    )
    .unwrap_err();
    assert!(error.to_string().contains("division by zero"));
    assert_eq!(&*transcript.borrow(), &["ran"]);
    // The replacement gained a defer frame.
    assert!(error
        .frames()
        .iter()
        .any(|frame| frame.kind() == asteria::runtime::error::FrameKind::Defer));
}

#[test]
fn defers_of_a_tail_calling_scope_run_after_the_chain() {
    // func g() { log("g"); return 1; }
    // func f() { defer log("f-defer"); return g(); }
    // The deferred expression of f's scope runs only after the tail
    // call to g has resolved.
    let (mut global, transcript) = logging_global();
    let result = run(
        &mut global,
        vec![
            func("g", &[], vec![log_stmt("g"), ret(lit(1))]),
            func(
                "f",
                &[],
                vec![defer_log("f-defer"), ret(call(name("g"), vec![]))],
            ),
            ret(call(name("f"), vec![])),
        ],
    )
    .unwrap()
    .dereference_readonly()
    .unwrap();
    assert_eq!(result, Value::Int(1));
    assert_eq!(&*transcript.borrow(), &["g", "f-defer"]);
}

#[test]
fn defers_capture_their_locals() {
    // The deferred expression reads the variable as it is when the
    // defer runs, not when it was registered.
    let (mut global, transcript) = logging_global();
    run(
        &mut global,
        vec![
            var("x", lit("before")),
            Statement::Defer {
                sloc: at(2),
                expr: call(name("log"), vec![name("x")]),
            },
            expr_stmt(assign(name("x"), lit("after"))),
        ],
    )
    .unwrap();
    assert_eq!(&*transcript.borrow(), &["after"]);
}
