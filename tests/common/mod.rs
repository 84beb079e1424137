//! Helpers for building ASTs by hand, the way the external parser
//! would, and running them against a fresh global context.

#![allow(dead_code)]

use asteria::air::node::Xop;
use asteria::ast::{Block, Expr, ExprKind, Statement, VarDecl, VarTarget};
use asteria::optimizer;
use asteria::runtime::error::RuntimeError;
use asteria::runtime::function;
use asteria::runtime::global::GlobalContext;
use asteria::runtime::reference::Reference;
use asteria::runtime::stack::ReferenceStack;
use asteria::runtime::value::Value;
use asteria::source::SourceLocation;

pub fn at(line: u32) -> SourceLocation {
    SourceLocation::new("test.as", line, 1)
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::new(at(0), ExprKind::Literal(value.into()))
}

pub fn null() -> Expr {
    Expr::new(at(0), ExprKind::Literal(Value::Null))
}

pub fn name(name: &str) -> Expr {
    Expr::new(at(0), ExprKind::Name(name.to_owned()))
}

pub fn unary(xop: Xop, operand: Expr) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Unary {
            xop,
            operand: Box::new(operand),
        },
    )
}

pub fn binary(xop: Xop, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Binary {
            xop,
            assign: false,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )
}

pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Assign {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )
}

pub fn member(target: Expr, name: &str) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Member {
            target: Box::new(target),
            name: name.to_owned(),
        },
    )
}

pub fn subscript(target: Expr, index: Expr) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Subscript {
            target: Box::new(target),
            index: Box::new(index),
        },
    )
}

pub fn call(target: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Call {
            target: Box::new(target),
            args,
        },
    )
}

pub fn call_at(line: u32, target: Expr, args: Vec<Expr>) -> Expr {
    Expr::new(
        at(line),
        ExprKind::Call {
            target: Box::new(target),
            args,
        },
    )
}

pub fn closure(params: &[&str], body: Vec<Statement>) -> Expr {
    Expr::new(
        at(0),
        ExprKind::Closure {
            params: params.iter().map(|p| (*p).to_owned()).collect(),
            body: Block::new(body),
        },
    )
}

pub fn array(elements: Vec<Expr>) -> Expr {
    Expr::new(at(0), ExprKind::ArrayLiteral(elements))
}

pub fn object(members: Vec<(&str, Expr)>) -> Expr {
    Expr::new(
        at(0),
        ExprKind::ObjectLiteral(
            members
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value))
                .collect(),
        ),
    )
}

pub fn expr_stmt(expr: Expr) -> Statement {
    Statement::Expression(expr)
}

pub fn var(name: &str, init: Expr) -> Statement {
    Statement::Variables {
        immutable: false,
        decls: vec![VarDecl {
            sloc: at(0),
            target: VarTarget::Name(name.to_owned()),
            init: Some(init),
        }],
    }
}

pub fn konst(name: &str, init: Expr) -> Statement {
    Statement::Variables {
        immutable: true,
        decls: vec![VarDecl {
            sloc: at(0),
            target: VarTarget::Name(name.to_owned()),
            init: Some(init),
        }],
    }
}

pub fn ret(expr: Expr) -> Statement {
    Statement::Return {
        sloc: at(0),
        by_ref: false,
        expr: Some(expr),
    }
}

pub fn ret_void() -> Statement {
    Statement::Return {
        sloc: at(0),
        by_ref: false,
        expr: None,
    }
}

pub fn func(name: &str, params: &[&str], body: Vec<Statement>) -> Statement {
    Statement::Function {
        sloc: at(0),
        name: name.to_owned(),
        params: params.iter().map(|p| (*p).to_owned()).collect(),
        body: Block::new(body),
    }
}

/// Compiles and runs `stmts` as the body of a zero-parameter function
/// against `global`, returning the result reference.
pub fn run(global: &mut GlobalContext, stmts: Vec<Statement>) -> Result<Reference, RuntimeError> {
    let main = optimizer::reload(global, "test.as", &[], &Block::new(stmts)).expect("lowering");
    let mut result = Reference::default();
    let mut args = ReferenceStack::new();
    function::invoke(&main, &mut result, global, &mut args)?;
    Ok(result)
}

/// Runs `stmts` in a fresh global context, expecting a value back.
pub fn run_value(stmts: Vec<Statement>) -> Value {
    let mut global = GlobalContext::new();
    run(&mut global, stmts)
        .expect("execution succeeds")
        .dereference_readonly()
        .expect("result readable")
}

/// Runs `stmts` in a fresh global context, expecting a runtime error.
pub fn run_err(stmts: Vec<Statement>) -> RuntimeError {
    let mut global = GlobalContext::new();
    match run(&mut global, stmts) {
        Ok(_) => panic!("execution unexpectedly succeeded"),
        Err(error) => error,
    }
}
