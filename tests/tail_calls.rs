//! Proper tail calls: bounded depth for arbitrarily long chains, and
//! the recursion sentry for calls that genuinely nest.

mod common;

use asteria::air::node::Xop;
use asteria::ast::{Block, Statement};
use asteria::runtime::global::GlobalContext;
use asteria::runtime::value::Value;
use common::*;

fn countdown_body() -> Vec<Statement> {
    vec![
        Statement::If {
            negative: false,
            cond: binary(Xop::CmpEq, name("n"), lit(0)),
            then_branch: Block::new(vec![ret(lit(0))]),
            else_branch: None,
        },
        ret(call(name("loop"), vec![binary(Xop::Sub, name("n"), lit(1))])),
    ]
}

#[test]
fn tail_call_chains_do_not_grow_the_stack() {
    // The chain is 200 times longer than the recursion limit; it only
    // completes because tail calls unwind the caller first.
    let mut global = GlobalContext::new();
    assert!(global.recursion_limit() < 100_000);
    let result = run(
        &mut global,
        vec![
            func("loop", &["n"], countdown_body()),
            ret(call(name("loop"), vec![lit(100_000)])),
        ],
    )
    .unwrap()
    .dereference_readonly()
    .unwrap();
    assert_eq!(result, Value::Int(0));
}

#[test]
fn non_tail_recursion_trips_the_sentry() {
    // func deep(n) { if n == 0 { return 0; } return 1 + deep(n - 1); }
    // The addition keeps every call off the tail position.
    let error = run_err(vec![
        func(
            "deep",
            &["n"],
            vec![
                Statement::If {
                    negative: false,
                    cond: binary(Xop::CmpEq, name("n"), lit(0)),
                    then_branch: Block::new(vec![ret(lit(0))]),
                    else_branch: None,
                },
                ret(binary(
                    Xop::Add,
                    lit(1),
                    call(name("deep"), vec![binary(Xop::Sub, name("n"), lit(1))]),
                )),
            ],
        ),
        ret(call(name("deep"), vec![lit(100_000)])),
    ]);
    assert!(error.to_string().contains("stack overflow"));
}

#[test]
fn non_tail_recursion_within_the_limit_still_works() {
    let mut global = GlobalContext::new();
    global.set_recursion_limit(64);
    let result = run(
        &mut global,
        vec![
            func(
                "deep",
                &["n"],
                vec![
                    Statement::If {
                        negative: false,
                        cond: binary(Xop::CmpEq, name("n"), lit(0)),
                        then_branch: Block::new(vec![ret(lit(0))]),
                        else_branch: None,
                    },
                    ret(binary(
                        Xop::Add,
                        lit(1),
                        call(name("deep"), vec![binary(Xop::Sub, name("n"), lit(1))]),
                    )),
                ],
            ),
            ret(call(name("deep"), vec![lit(50)])),
        ],
    )
    .unwrap()
    .dereference_readonly()
    .unwrap();
    assert_eq!(result, Value::Int(50));
}

#[test]
fn mutual_tail_calls_resolve() {
    // Mutual recursion through forward-declared variables: each
    // closure captures the other's variable before it is assigned.
    //   var even; var odd;
    //   even = func(n) { if n == 0 { return true; } return odd(n - 1); };
    //   odd = func(n) { if n == 0 { return false; } return even(n - 1); };
    let body = |other: &str, base: bool| {
        vec![
            Statement::If {
                negative: false,
                cond: binary(Xop::CmpEq, name("n"), lit(0)),
                then_branch: Block::new(vec![ret(lit(base))]),
                else_branch: None,
            },
            ret(call(name(other), vec![binary(Xop::Sub, name("n"), lit(1))])),
        ]
    };
    let result = run_value(vec![
        var("even", null()),
        var("odd", null()),
        expr_stmt(assign(name("even"), closure(&["n"], body("odd", true)))),
        expr_stmt(assign(name("odd"), closure(&["n"], body("even", false)))),
        ret(call(name("even"), vec![lit(10_001)])),
    ]);
    assert_eq!(result, Value::Bool(false));
}

#[test]
fn a_tail_call_through_try_still_reaches_the_catch() {
    // try { return boom(10); } catch e { return "caught"; } — the
    // pending call must resolve inside the try for the catch to see
    // its exception.
    let result = run_value(vec![
        func(
            "boom",
            &["n"],
            vec![
                Statement::If {
                    negative: false,
                    cond: binary(Xop::CmpEq, name("n"), lit(0)),
                    then_branch: Block::new(vec![Statement::Throw {
                        sloc: at(3),
                        expr: lit("bang"),
                    }]),
                    else_branch: None,
                },
                ret(call(name("boom"), vec![binary(Xop::Sub, name("n"), lit(1))])),
            ],
        ),
        Statement::Try {
            sloc_try: at(5),
            body: Block::new(vec![ret(call(name("boom"), vec![lit(10)]))]),
            sloc_catch: at(6),
            except_name: "e".to_owned(),
            handler: Block::new(vec![ret(name("e"))]),
        },
    ]);
    assert_eq!(result, Value::from("bang"));
}
