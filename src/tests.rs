//! In-crate smoke tests wiring the lowering, the engine, and the data
//! model together; the heavier scenarios live in `tests/`.

use crate::ast::{Block, Expr, ExprKind, Statement};
use crate::optimizer;
use crate::runtime::function;
use crate::runtime::global::GlobalContext;
use crate::runtime::reference::Reference;
use crate::runtime::stack::ReferenceStack;
use crate::runtime::value::Value;
use crate::source::SourceLocation;

fn run_main(stmts: Vec<Statement>) -> Reference {
    let mut global = GlobalContext::new();
    let main =
        optimizer::reload(&mut global, "smoke.as", &[], &Block::new(stmts)).expect("lowering");
    let mut result = Reference::default();
    let mut args = ReferenceStack::new();
    function::invoke(&main, &mut result, &mut global, &mut args).expect("execution");
    result
}

#[test]
fn a_literal_returns_by_value() {
    let result = run_main(vec![Statement::Return {
        sloc: SourceLocation::unknown(),
        by_ref: false,
        expr: Some(Expr::new(
            SourceLocation::unknown(),
            ExprKind::Literal(Value::Int(7)),
        )),
    }]);
    assert!(result.is_temporary());
    assert_eq!(result.dereference_readonly().unwrap(), Value::Int(7));
}

#[test]
fn a_function_without_a_return_yields_void() {
    let result = run_main(vec![Statement::Expression(Expr::new(
        SourceLocation::unknown(),
        ExprKind::Literal(Value::Int(7)),
    ))]);
    assert!(result.is_void());
    assert!(result.dereference_readonly().is_err());
}

#[test]
fn functions_are_values() {
    let result = run_main(vec![Statement::Return {
        sloc: SourceLocation::unknown(),
        by_ref: false,
        expr: Some(Expr::new(
            SourceLocation::unknown(),
            ExprKind::Closure {
                params: vec!["x".to_owned()],
                body: Block::default(),
            },
        )),
    }]);
    let value = result.dereference_readonly().unwrap();
    assert_eq!(value.type_name(), "function");
    assert!(value.test());
}
