//! The generational collector, driven through scripts that build
//! reference cycles, and through a host binding built on the
//! argument reader.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use asteria::ast::{Block, Statement};
use asteria::runtime::arguments::ArgumentReader;
use asteria::runtime::function::HostFunction;
use asteria::runtime::global::GlobalContext;
use asteria::runtime::value::Value;
use common::*;

/// Builds the canonical cycle: two objects that reach each other
/// through closures capturing the other's variable.
fn cycle_stmts() -> Vec<Statement> {
    vec![
        var("a", object(vec![])),
        var("b", object(vec![])),
        expr_stmt(assign(
            member(name("a"), "next"),
            closure(&[], vec![ret(name("b"))]),
        )),
        expr_stmt(assign(
            member(name("b"), "next"),
            closure(&[], vec![ret(name("a"))]),
        )),
    ]
}

#[test]
fn a_cycle_of_closures_is_collected() {
    let mut global = GlobalContext::new();
    run(&mut global, cycle_stmts()).unwrap();

    // Only the cycle keeps the two variables alive now.
    assert!(global.collector_mut().collect(2) >= 2);
    assert_eq!(global.collector_mut().collect(2), 0);
}

#[test]
fn live_globals_survive_collection() {
    let mut global = GlobalContext::new();
    global.declare("keep", Value::Null);
    run(
        &mut global,
        vec![
            var("a", object(vec![])),
            expr_stmt(assign(
                member(name("a"), "me"),
                closure(&[], vec![ret(name("a"))]),
            )),
            expr_stmt(assign(name("keep"), name("a"))),
        ],
    )
    .unwrap();

    // The published copy closes over the dead local variable; being
    // reachable from a global, that variable must survive with its
    // payload intact.
    global.collector_mut().collect(2);
    let keep = global.get_named_reference("keep").unwrap().clone();
    let kept = keep.dereference_readonly().unwrap();
    assert!(matches!(kept, Value::Object(object) if object.contains_key("me")));
}

#[test]
fn collection_is_idempotent_on_a_quiet_heap() {
    let mut global = GlobalContext::new();
    run(&mut global, vec![var("a", lit(1)), ret(name("a"))]).unwrap();
    global.collector_mut().collect(2);
    assert_eq!(global.collector_mut().collect(2), 0);
    assert_eq!(global.collector().count_tracked(0), 0);
}

#[test]
fn thresholds_are_queried_and_replaced() {
    let mut global = GlobalContext::new();
    let old = global.collector().get_threshold(0);
    assert_eq!(global.collector_mut().set_threshold(0, 0), old);
    assert_eq!(global.collector().get_threshold(0), 0);
}

#[test]
fn gc_host_bindings_use_the_argument_reader() {
    // A `collect` binding in the shape of a standard-library one: an
    // optional generation limit, resolved through the reader.
    let mut global = GlobalContext::new();
    let collect = HostFunction::new("std.gc.collect", |self_ref, global, args| {
        let mut reader = ArgumentReader::new("std.gc.collect", args);
        reader.start_overload();
        let mut limit = None::<i64>;
        reader.optional(&mut limit)?;
        if reader.end_overload() {
            let limit = usize::try_from(limit.unwrap_or(2)).unwrap_or(2);
            let freed = global.collector_mut().collect(limit);
            self_ref.set_temporary(Value::Int(i64::try_from(freed).expect("count")));
            return Ok(());
        }
        Err(reader.throw_no_matching_function_call())
    });
    global.declare_const("collect", Value::Function(collect));

    let mut stmts = vec![Statement::Block {
        body: Block::new(cycle_stmts()),
    }];
    stmts.push(ret(call(name("collect"), vec![lit(2)])));
    let result = run(&mut global, stmts)
        .unwrap()
        .dereference_readonly()
        .unwrap();
    assert_eq!(result, Value::Int(2));

    // A boolean argument matches no overload.
    let error = run(&mut global, vec![ret(call(name("collect"), vec![lit(true)]))]).unwrap_err();
    assert!(error.to_string().contains("no matching function call"));
}

#[test]
fn host_functions_can_retain_state() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut global = GlobalContext::new();
    let log = HostFunction::new("log", move |self_ref, _global, args| {
        let mut pieces = Vec::new();
        for arg in args.iter() {
            pieces.push(arg.dereference_readonly()?.to_string());
        }
        sink.borrow_mut().push(pieces.join(" "));
        self_ref.set_void();
        Ok(())
    });
    global.declare_const("log", Value::Function(log));
    run(
        &mut global,
        vec![
            expr_stmt(call(name("log"), vec![lit(1), lit("x")])),
            expr_stmt(call(name("log"), vec![lit(2)])),
        ],
    )
    .unwrap();
    assert_eq!(&*seen.borrow(), &[r#"1 "x""#.to_owned(), "2".to_owned()]);
}
