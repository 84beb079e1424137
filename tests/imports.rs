//! The module loader: resolution, instantiation, argument passing,
//! and recursion detection.

mod common;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use asteria::air::node::Xop;
use asteria::ast::{Block, Expr, ExprKind, Statement};
use asteria::runtime::error::RuntimeError;
use asteria::runtime::global::GlobalContext;
use asteria::runtime::loader::SourceParser;
use asteria::runtime::value::Value;
use asteria::source::SourceLocation;
use common::*;

/// A stand-in for the external parser: ignores the source text and
/// produces a canned AST per file name.
struct StubParser;

impl SourceParser for StubParser {
    fn parse(&self, _source: &str, path: &Path) -> Result<Block, RuntimeError> {
        let sloc = SourceLocation::new(path.display().to_string(), 1, 1);
        let file = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        match file {
            // A module that returns its first variadic argument plus
            // one.
            "addone.as" => Ok(Block::new(vec![Statement::Return {
                sloc: sloc.clone(),
                by_ref: false,
                expr: Some(Expr::new(
                    sloc.clone(),
                    ExprKind::Binary {
                        xop: Xop::Add,
                        assign: false,
                        lhs: Box::new(Expr::new(
                            sloc.clone(),
                            ExprKind::Call {
                                target: Box::new(Expr::new(
                                    sloc.clone(),
                                    ExprKind::Name("__varg".to_owned()),
                                )),
                                args: vec![Expr::new(
                                    sloc.clone(),
                                    ExprKind::Literal(Value::Int(0)),
                                )],
                            },
                        )),
                        rhs: Box::new(Expr::new(sloc, ExprKind::Literal(Value::Int(1)))),
                    },
                )),
            }])),
            // A module that imports itself.
            "recursive.as" => Ok(Block::new(vec![Statement::Expression(Expr::new(
                sloc.clone(),
                ExprKind::ImportCall {
                    args: vec![Expr::new(
                        sloc,
                        ExprKind::Literal(Value::from(path.display().to_string())),
                    )],
                },
            ))])),
            other => Err(RuntimeError::native(
                sloc,
                format!("unexpected module `{other}`"),
            )),
        }
    }
}

fn module_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("asteria-imports-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("module directory");
    dir
}

fn write_module(name: &str) -> PathBuf {
    let path = module_dir().join(name);
    std::fs::write(&path, "// consumed by the stub parser\n").expect("module file");
    path
}

fn import_expr(path: &Path, args: Vec<Expr>) -> Expr {
    let mut all = vec![lit(path.display().to_string())];
    all.extend(args);
    Expr::new(at(0), ExprKind::ImportCall { args: all })
}

#[test]
fn imports_instantiate_modules_with_arguments() {
    let path = write_module("addone.as");
    let mut global = GlobalContext::new();
    global.loader_mut().set_parser(Rc::new(StubParser));

    let result = run(&mut global, vec![ret(import_expr(&path, vec![lit(41)]))])
        .unwrap()
        .dereference_readonly()
        .unwrap();
    assert_eq!(result, Value::Int(42));
}

#[test]
fn recursive_imports_are_denied() {
    let path = write_module("recursive.as");
    let mut global = GlobalContext::new();
    global.loader_mut().set_parser(Rc::new(StubParser));

    let error = run(&mut global, vec![ret(import_expr(&path, vec![]))]).unwrap_err();
    assert!(error.to_string().contains("recursive import"));
}

#[test]
fn a_failed_import_can_be_retried() {
    // The in-progress lock must be released on failure.
    let path = write_module("recursive.as");
    let mut global = GlobalContext::new();
    global.loader_mut().set_parser(Rc::new(StubParser));

    for _ in 0..2 {
        let error = run(&mut global, vec![ret(import_expr(&path, vec![]))]).unwrap_err();
        assert!(error.to_string().contains("recursive import"));
    }
}

#[test]
fn missing_modules_report_io_errors() {
    let path = module_dir().join("does-not-exist.as");
    let mut global = GlobalContext::new();
    global.loader_mut().set_parser(Rc::new(StubParser));

    let error = run(&mut global, vec![ret(import_expr(&path, vec![]))]).unwrap_err();
    assert!(error.to_string().contains("could not resolve"));
}

#[test]
fn imports_without_a_parser_fail_cleanly() {
    let path = write_module("addone.as");
    let mut global = GlobalContext::new();
    let error = run(&mut global, vec![ret(import_expr(&path, vec![]))]).unwrap_err();
    assert!(error.to_string().contains("parser"));
}
