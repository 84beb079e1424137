//! End-to-end execution of lowered programs: expressions, control
//! flow, containers, and scoping.

mod common;

use asteria::air::node::Xop;
use asteria::ast::{Block, BreakTarget, Statement, SwitchClause, VarDecl, VarTarget};
use asteria::runtime::global::GlobalContext;
use asteria::runtime::value::Value;
use common::*;

#[test]
fn integer_plus_real_widens() {
    // var a = 1; var b = 2.0; return a + b;
    let result = run_value(vec![
        var("a", lit(1)),
        var("b", lit(2.0)),
        ret(binary(Xop::Add, name("a"), name("b"))),
    ]);
    assert_eq!(result, Value::Real(3.0));
    assert_eq!(result.type_name(), "real");
}

#[test]
fn conditionals_select_a_branch() {
    let result = run_value(vec![
        var("a", lit(7)),
        Statement::If {
            negative: false,
            cond: binary(Xop::CmpGt, name("a"), lit(3)),
            then_branch: Block::new(vec![ret(lit("big"))]),
            else_branch: Some(Block::new(vec![ret(lit("small"))])),
        },
    ]);
    assert_eq!(result, Value::from("big"));
}

#[test]
fn while_loop_accumulates() {
    // var i = 0; var total = 0;
    // while i < 5 { total += i; i += 1; }  return total;
    let add_assign = |target: &str, amount| {
        expr_stmt(asteria::ast::Expr::new(
            at(0),
            asteria::ast::ExprKind::Binary {
                xop: Xop::Add,
                assign: true,
                lhs: Box::new(name(target)),
                rhs: Box::new(amount),
            },
        ))
    };
    let result = run_value(vec![
        var("i", lit(0)),
        var("total", lit(0)),
        Statement::While {
            negative: false,
            cond: binary(Xop::CmpLt, name("i"), lit(5)),
            body: Block::new(vec![add_assign("total", name("i")), add_assign("i", lit(1))]),
        },
        ret(name("total")),
    ]);
    assert_eq!(result, Value::Int(10));
}

#[test]
fn for_loop_with_break() {
    // for var i = 0; ; i += 1 { if i == 4 { break; } }  return i... the
    // index is scoped to the loop, so the loop reports through a
    // variable declared outside.
    let result = run_value(vec![
        var("seen", lit(0)),
        Statement::For {
            init: Some(Box::new(var("i", lit(0)))),
            cond: None,
            step: Some(asteria::ast::Expr::new(
                at(0),
                asteria::ast::ExprKind::Binary {
                    xop: Xop::Add,
                    assign: true,
                    lhs: Box::new(name("i")),
                    rhs: Box::new(lit(1)),
                },
            )),
            body: Block::new(vec![
                Statement::If {
                    negative: false,
                    cond: binary(Xop::CmpEq, name("i"), lit(4)),
                    then_branch: Block::new(vec![Statement::Break {
                        target: BreakTarget::For,
                    }]),
                    else_branch: None,
                },
                expr_stmt(assign(name("seen"), name("i"))),
            ]),
        },
        ret(name("seen")),
    ]);
    assert_eq!(result, Value::Int(3));
}

#[test]
fn for_each_iterates_arrays_with_keys() {
    // var keys = 0; var total = 0;
    // for each k, v : [10, 20, 30] { keys += k; total += v; }
    let add_assign = |target: &str, amount| {
        expr_stmt(asteria::ast::Expr::new(
            at(0),
            asteria::ast::ExprKind::Binary {
                xop: Xop::Add,
                assign: true,
                lhs: Box::new(name(target)),
                rhs: Box::new(amount),
            },
        ))
    };
    let result = run_value(vec![
        var("keys", lit(0)),
        var("total", lit(0)),
        Statement::ForEach {
            sloc: at(3),
            key: Some("k".to_owned()),
            value: "v".to_owned(),
            range: array(vec![lit(10), lit(20), lit(30)]),
            body: Block::new(vec![add_assign("keys", name("k")), add_assign("total", name("v"))]),
        },
        ret(binary(Xop::Add, name("keys"), name("total"))),
    ]);
    assert_eq!(result, Value::Int(3 + 60));
}

#[test]
fn for_each_writes_through_the_mapped_reference() {
    // var a = [1, 2]; for each v : a { v = v * 10; } return a[1];
    let result = run_value(vec![
        var("a", array(vec![lit(1), lit(2)])),
        Statement::ForEach {
            sloc: at(2),
            key: None,
            value: "v".to_owned(),
            range: name("a"),
            body: Block::new(vec![expr_stmt(assign(
                name("v"),
                binary(Xop::Mul, name("v"), lit(10)),
            ))]),
        },
        ret(subscript(name("a"), lit(1))),
    ]);
    assert_eq!(result, Value::Int(20));
}

#[test]
fn switch_falls_through_and_breaks() {
    // switch 2 { case 1: r += 1; case 2: r += 10; case 3: r += 100; break; case 4: r += 1000; }
    let add_assign = |amount| {
        expr_stmt(asteria::ast::Expr::new(
            at(0),
            asteria::ast::ExprKind::Binary {
                xop: Xop::Add,
                assign: true,
                lhs: Box::new(name("r")),
                rhs: Box::new(lit(amount)),
            },
        ))
    };
    let clause = |label, body| SwitchClause {
        label,
        body: Block::new(body),
    };
    let result = run_value(vec![
        var("r", lit(0)),
        Statement::Switch {
            cond: lit(2),
            clauses: vec![
                clause(Some(lit(1)), vec![add_assign(1)]),
                clause(Some(lit(2)), vec![add_assign(10)]),
                clause(
                    Some(lit(3)),
                    vec![
                        add_assign(100),
                        Statement::Break {
                            target: BreakTarget::Switch,
                        },
                    ],
                ),
                clause(Some(lit(4)), vec![add_assign(1000)]),
            ],
        },
        ret(name("r")),
    ]);
    assert_eq!(result, Value::Int(110));
}

#[test]
fn switch_default_clause_runs_when_nothing_matches() {
    let result = run_value(vec![
        var("r", lit(0)),
        Statement::Switch {
            cond: lit(9),
            clauses: vec![
                SwitchClause {
                    label: Some(lit(1)),
                    body: Block::new(vec![expr_stmt(assign(name("r"), lit(1)))]),
                },
                SwitchClause {
                    label: None,
                    body: Block::new(vec![expr_stmt(assign(name("r"), lit(42)))]),
                },
            ],
        },
        ret(name("r")),
    ]);
    assert_eq!(result, Value::Int(42));
}

#[test]
fn reading_a_bypassed_switch_declaration_fails() {
    // Jumping straight to the second clause leaves the first clause's
    // declaration bypassed.
    let error = run_err(vec![
        Statement::Switch {
            cond: lit(2),
            clauses: vec![
                SwitchClause {
                    label: Some(lit(1)),
                    body: Block::new(vec![var("hidden", lit(5))]),
                },
                SwitchClause {
                    label: Some(lit(2)),
                    body: Block::new(vec![expr_stmt(assign(name("hidden"), lit(6)))]),
                },
            ],
        },
    ]);
    assert!(error.to_string().contains("bypassed"));
}

#[test]
fn containers_nest_and_extend() {
    // var o = { a: [1] };  o.a[3] = 9;  return countof o.a;
    let result = run_value(vec![
        var("o", object(vec![("a", array(vec![lit(1)]))])),
        expr_stmt(assign(
            subscript(member(name("o"), "a"), lit(3)),
            lit(9),
        )),
        ret(unary(Xop::Countof, member(name("o"), "a"))),
    ]);
    assert_eq!(result, Value::Int(4));
}

#[test]
fn unset_removes_elements() {
    let result = run_value(vec![
        var("o", object(vec![("a", lit(1)), ("b", lit(2))])),
        expr_stmt(unary(Xop::Unset, member(name("o"), "a"))),
        ret(unary(Xop::Countof, name("o"))),
    ]);
    assert_eq!(result, Value::Int(1));
}

#[test]
fn blocks_shadow_outer_names() {
    let result = run_value(vec![
        var("x", lit(1)),
        Statement::Block {
            body: Block::new(vec![
                var("x", lit(2)),
                expr_stmt(assign(name("x"), lit(3))),
            ]),
        },
        ret(name("x")),
    ]);
    assert_eq!(result, Value::Int(1));
}

#[test]
fn closures_capture_variables_by_reference() {
    // var n = 1; var bump = func() { n = n + 1; };
    // bump(); bump(); return n;
    let result = run_value(vec![
        var("n", lit(1)),
        var(
            "bump",
            closure(
                &[],
                vec![expr_stmt(assign(
                    name("n"),
                    binary(Xop::Add, name("n"), lit(1)),
                ))],
            ),
        ),
        expr_stmt(call(name("bump"), vec![])),
        expr_stmt(call(name("bump"), vec![])),
        ret(name("n")),
    ]);
    assert_eq!(result, Value::Int(3));
}

#[test]
fn named_functions_recurse() {
    // func fact(n) { if n <= 1 { return 1; } return n * fact(n - 1); }
    let result = run_value(vec![
        func(
            "fact",
            &["n"],
            vec![
                Statement::If {
                    negative: false,
                    cond: binary(Xop::CmpLte, name("n"), lit(1)),
                    then_branch: Block::new(vec![ret(lit(1))]),
                    else_branch: None,
                },
                ret(binary(
                    Xop::Mul,
                    name("n"),
                    call(name("fact"), vec![binary(Xop::Sub, name("n"), lit(1))]),
                )),
            ],
        ),
        ret(call(name("fact"), vec![lit(6)])),
    ]);
    assert_eq!(result, Value::Int(720));
}

#[test]
fn variadic_arguments_flow_through_varg() {
    // func sum(...) { return __varg(0) + __varg(1) + __varg(); }
    let result = run_value(vec![
        func(
            "sum",
            &["..."],
            vec![ret(binary(
                Xop::Add,
                binary(
                    Xop::Add,
                    call(name("__varg"), vec![lit(0)]),
                    call(name("__varg"), vec![lit(1)]),
                ),
                call(name("__varg"), vec![]),
            ))],
        ),
        ret(call(name("sum"), vec![lit(30), lit(40)])),
    ]);
    assert_eq!(result, Value::Int(72));
}

#[test]
fn variadic_call_expands_an_array() {
    // func add3(a, b, c) { return a + b + c; }
    // return add3(...[1, 2, 3]);
    let result = run_value(vec![
        func(
            "add3",
            &["a", "b", "c"],
            vec![ret(binary(
                Xop::Add,
                binary(Xop::Add, name("a"), name("b")),
                name("c"),
            ))],
        ),
        ret(asteria::ast::Expr::new(
            at(0),
            asteria::ast::ExprKind::VariadicCall {
                target: Box::new(name("add3")),
                args: Box::new(array(vec![lit(1), lit(2), lit(3)])),
            },
        )),
    ]);
    assert_eq!(result, Value::Int(6));
}

#[test]
fn variadic_call_consults_a_generator() {
    // func gen(...) { if __varg() == 0 { return 2; } return __varg(0) * 10; }
    // func add2(a, b) { return a + b; }  return add2(...gen);
    let result = run_value(vec![
        func(
            "gen",
            &["..."],
            vec![
                Statement::If {
                    negative: false,
                    cond: binary(Xop::CmpEq, call(name("__varg"), vec![]), lit(0)),
                    then_branch: Block::new(vec![ret(lit(2))]),
                    else_branch: None,
                },
                ret(binary(Xop::Mul, call(name("__varg"), vec![lit(0)]), lit(10))),
            ],
        ),
        func(
            "add2",
            &["a", "b"],
            vec![ret(binary(Xop::Add, name("a"), name("b")))],
        ),
        ret(asteria::ast::Expr::new(
            at(0),
            asteria::ast::ExprKind::VariadicCall {
                target: Box::new(name("add2")),
                args: Box::new(name("gen")),
            },
        )),
    ]);
    assert_eq!(result, Value::Int(10));
}

#[test]
fn short_circuits_and_coalescence() {
    use asteria::ast::ExprKind;
    let and = |lhs, rhs| {
        asteria::ast::Expr::new(
            at(0),
            ExprKind::AndAlso {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    };
    let coalesce = |lhs, rhs| {
        asteria::ast::Expr::new(
            at(0),
            ExprKind::Coalesce {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    };
    // false && (1 / 0) never evaluates the division.
    let result = run_value(vec![ret(and(
        lit(false),
        binary(Xop::Div, lit(1), lit(0)),
    ))]);
    assert_eq!(result, Value::Bool(false));

    let result = run_value(vec![ret(coalesce(null(), lit(5)))]);
    assert_eq!(result, Value::Int(5));
    let result = run_value(vec![ret(coalesce(lit(false), lit(5)))]);
    assert_eq!(result, Value::Bool(false));
}

#[test]
fn catch_expression_yields_the_thrown_payload() {
    use asteria::ast::ExprKind;
    let caught = |operand| {
        asteria::ast::Expr::new(at(0), ExprKind::CatchExpr(Box::new(operand)))
    };
    let result = run_value(vec![ret(caught(binary(Xop::Div, lit(1), lit(0))))]);
    assert!(matches!(&result, Value::Str(text) if text.contains("division by zero")));

    let result = run_value(vec![ret(caught(lit(3)))]);
    assert_eq!(result, Value::Null);
}

#[test]
fn structured_bindings_unpack_containers() {
    let result = run_value(vec![
        Statement::Variables {
            immutable: false,
            decls: vec![VarDecl {
                sloc: at(1),
                target: VarTarget::Array(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]),
                init: Some(array(vec![lit(1), lit(2)])),
            }],
        },
        Statement::Variables {
            immutable: false,
            decls: vec![VarDecl {
                sloc: at(2),
                target: VarTarget::Object(vec!["x".to_owned()]),
                init: Some(object(vec![("x", lit(40)), ("y", lit(9))])),
            }],
        },
        // c is null, so a + b + x = 43.
        Statement::If {
            negative: true,
            cond: binary(Xop::CmpEq, name("c"), null()),
            then_branch: Block::new(vec![ret(lit(-1))]),
            else_branch: None,
        },
        ret(binary(
            Xop::Add,
            binary(Xop::Add, name("a"), name("b")),
            name("x"),
        )),
    ]);
    assert_eq!(result, Value::Int(43));
}

#[test]
fn function_results_are_returned_by_value() {
    // var a = [1]; func get() { return a; } get()[0] = 9; fails: the
    // call result is a temporary.
    let error = run_err(vec![
        var("a", array(vec![lit(1)])),
        func("get", &[], vec![ret(name("a"))]),
        expr_stmt(assign(subscript(call(name("get"), vec![]), lit(0)), lit(9))),
    ]);
    assert!(error.to_string().contains("temporary"));
}

#[test]
fn do_while_runs_at_least_once() {
    let result = run_value(vec![
        var("n", lit(0)),
        Statement::DoWhile {
            body: Block::new(vec![expr_stmt(assign(
                name("n"),
                binary(Xop::Add, name("n"), lit(1)),
            ))]),
            negative: false,
            cond: lit(false),
        },
        ret(name("n")),
    ]);
    assert_eq!(result, Value::Int(1));
}

#[test]
fn globals_resolve_at_runtime() {
    let mut global = GlobalContext::new();
    global.declare("answer", Value::Int(41));
    let result = run(
        &mut global,
        vec![ret(binary(Xop::Add, name("answer"), lit(1)))],
    )
    .unwrap()
    .dereference_readonly()
    .unwrap();
    assert_eq!(result, Value::Int(42));
}
