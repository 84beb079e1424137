//! The abstract syntax tree consumed from the external parser.
//!
//! These types are the contract between the parser front-end (outside
//! this crate) and the optimizer: a tree of statements and expressions
//! with source locations. Embedders and tests may also construct them
//! directly.

use crate::air::node::Xop;
use crate::runtime::value::Value;
use crate::source::SourceLocation;

/// A statement sequence.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Statement>,
}

impl Block {
    #[must_use]
    pub fn new(stmts: Vec<Statement>) -> Self {
        Self { stmts }
    }
}

/// The target of one declaration.
#[derive(Debug, Clone)]
pub enum VarTarget {
    /// `var a = ...`
    Name(String),
    /// `var [a, b] = ...`
    Array(Vec<String>),
    /// `var { a, b } = ...`, binding members by name.
    Object(Vec<String>),
}

/// One declarator of a `var`/`const` statement.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub sloc: SourceLocation,
    pub target: VarTarget,
    pub init: Option<Expr>,
}

/// Which construct a `break` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakTarget {
    Unspecified,
    Switch,
    While,
    For,
}

/// Which construct a `continue` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueTarget {
    Unspecified,
    While,
    For,
}

/// One clause of a `switch` statement.
#[derive(Debug, Clone)]
pub struct SwitchClause {
    /// The label expression; `None` marks the default clause.
    pub label: Option<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Expression(Expr),
    Block {
        body: Block,
    },
    Variables {
        immutable: bool,
        decls: Vec<VarDecl>,
    },
    Function {
        sloc: SourceLocation,
        name: String,
        params: Vec<String>,
        body: Block,
    },
    If {
        negative: bool,
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    Switch {
        cond: Expr,
        clauses: Vec<SwitchClause>,
    },
    DoWhile {
        body: Block,
        negative: bool,
        cond: Expr,
    },
    While {
        negative: bool,
        cond: Expr,
        body: Block,
    },
    For {
        init: Option<Box<Statement>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Block,
    },
    ForEach {
        sloc: SourceLocation,
        key: Option<String>,
        value: String,
        range: Expr,
        body: Block,
    },
    Try {
        sloc_try: SourceLocation,
        body: Block,
        sloc_catch: SourceLocation,
        except_name: String,
        handler: Block,
    },
    Break {
        target: BreakTarget,
    },
    Continue {
        target: ContinueTarget,
    },
    Throw {
        sloc: SourceLocation,
        expr: Expr,
    },
    Return {
        sloc: SourceLocation,
        by_ref: bool,
        expr: Option<Expr>,
    },
    Assert {
        sloc: SourceLocation,
        expr: Expr,
        message: Option<String>,
    },
    Defer {
        sloc: SourceLocation,
        expr: Expr,
    },
}

/// An expression with its source location.
#[derive(Debug, Clone)]
pub struct Expr {
    pub sloc: SourceLocation,
    pub kind: ExprKind,
}

impl Expr {
    #[must_use]
    pub fn new(sloc: SourceLocation, kind: ExprKind) -> Self {
        Self { sloc, kind }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Value),
    /// A name, resolved lexically by the optimizer.
    Name(String),
    Closure {
        params: Vec<String>,
        body: Block,
    },
    ArrayLiteral(Vec<Expr>),
    ObjectLiteral(Vec<(String, Expr)>),
    Unary {
        xop: Xop,
        operand: Box<Expr>,
    },
    Binary {
        xop: Xop,
        /// Compound assignment: the result writes back through the
        /// left operand.
        assign: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Subscript {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        name: String,
    },
    Call {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    /// A call whose arguments come from an array or a generator
    /// function evaluated at run time.
    VariadicCall {
        target: Box<Expr>,
        args: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    AndAlso {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    OrElse {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Coalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Evaluates the operand and yields the exception it threw, or
    /// null if it completed.
    CatchExpr(Box<Expr>),
    /// `import(path, args...)`.
    ImportCall {
        args: Vec<Expr>,
    },
}
