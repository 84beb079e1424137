//! An embeddable, dynamically-typed scripting language runtime.
//!
//! This crate is the execution core of the language: the intermediate
//! representation ("AIR") and its solidified instruction queues, the
//! execution engine with proper tail calls, the reference/value data
//! model, scoped executive contexts with deferred expressions,
//! structured runtime errors with backtraces, and a generational
//! cycle-collecting garbage collector.
//!
//! The lexer and parser live outside this crate; they hand the
//! [`optimizer`] an [`ast::Block`], which is lowered to AIR,
//! solidified, and wrapped as a callable function:
//!
//! ```
//! use asteria::ast::{Block, Expr, ExprKind, Statement};
//! use asteria::runtime::function;
//! use asteria::runtime::global::GlobalContext;
//! use asteria::runtime::reference::Reference;
//! use asteria::runtime::stack::ReferenceStack;
//! use asteria::runtime::value::Value;
//! use asteria::source::SourceLocation;
//!
//! let ast = Block::new(vec![Statement::Return {
//!     sloc: SourceLocation::unknown(),
//!     by_ref: false,
//!     expr: Some(Expr::new(
//!         SourceLocation::unknown(),
//!         ExprKind::Literal(Value::Int(42)),
//!     )),
//! }]);
//!
//! let mut global = GlobalContext::new();
//! let main = asteria::optimizer::reload(&mut global, "main", &[], &ast).unwrap();
//! let mut result = Reference::default();
//! let mut args = ReferenceStack::new();
//! function::invoke(&main, &mut result, &mut global, &mut args).unwrap();
//! assert_eq!(result.dereference_readonly().unwrap(), Value::Int(42));
//! ```

pub mod air;
pub mod ast;
pub mod optimizer;
pub mod runtime;
pub mod source;
pub mod vm;

#[cfg(test)]
mod tests;

use std::fmt::{self, Display};

pub use crate::optimizer::CodegenError;
pub use crate::runtime::error::RuntimeError;
pub use crate::runtime::global::GlobalContext;
pub use crate::runtime::reference::Reference;
pub use crate::runtime::value::Value;
pub use crate::source::SourceLocation;

/// One or more errors raised while compiling or executing code.
#[derive(Debug)]
pub enum Error {
    /// The optimizer rejected the AST.
    Codegen(CodegenError),
    /// Execution raised an error that nothing caught.
    Runtime(RuntimeError),
}

impl From<CodegenError> for Error {
    fn from(error: CodegenError) -> Self {
        Self::Codegen(error)
    }
}

impl From<RuntimeError> for Error {
    fn from(error: RuntimeError) -> Self {
        Self::Runtime(error)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Codegen(error) => Display::fmt(error, f),
            Error::Runtime(error) => Display::fmt(error, f),
        }
    }
}

impl std::error::Error for Error {}
