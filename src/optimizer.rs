//! Lowering from the AST into the intermediate representation, and
//! rebinding of IR against live contexts.
//!
//! Name resolution is lexical: the generator tracks one analytic scope
//! per block and resolves each name to a depth-relative local
//! reference, falling back to a global reference. Captures are not
//! resolved here; a function definition keeps its body in IR form, and
//! the define-function executor rebinds it against the executing
//! context, turning locals of enclosing functions into bound
//! references.

use std::collections::HashSet;
use std::fmt::{self, Display};
use std::rc::Rc;

use tracing::debug;

use crate::air::node::{self, AirNode, AirSwitchClause, Xop};
use crate::ast::{
    Block, BreakTarget, ContinueTarget, Expr, ExprKind, Statement, VarDecl, VarTarget,
};
use crate::runtime::context::{ExecutiveContext, Scope};
use crate::runtime::function::{FunctionValue, InstantiatedFunction, PtcAware};
use crate::runtime::global::GlobalContext;
use crate::runtime::reference::Reference;
use crate::source::SourceLocation;
use crate::vm::AirStatus;

/// An error detected while lowering an AST.
#[derive(Debug, Clone)]
pub struct CodegenError {
    message: String,
    sloc: SourceLocation,
}

impl CodegenError {
    fn new(sloc: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sloc,
        }
    }

    #[must_use]
    pub const fn sloc(&self) -> &SourceLocation {
        &self.sloc
    }
}

impl Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at '{}')", self.message, self.sloc)
    }
}

impl std::error::Error for CodegenError {}

/// Compiles `ast` into a callable function with the given parameter
/// list. The function's free names resolve against `global` when it
/// runs.
pub fn reload(
    global: &mut GlobalContext,
    name: &str,
    params: &[String],
    ast: &Block,
) -> Result<FunctionValue, CodegenError> {
    let sloc = SourceLocation::new(name, 1, 0);
    validate_params(&sloc, params)?;

    let mut generator = Generator::default();
    let mut body = generator.lower_function_body(params, ast)?;

    // Rebind against the global context; locals all resolve within
    // the function, so this only affects IR that was produced against
    // an older set of globals.
    let mut rebinder = Rebinder {
        global: &*global,
        executive: &[],
        analytic: Vec::new(),
    };
    rebinder.push_function_scope(params);
    node::rebind_nodes(&mut body, &mut rebinder);

    let (queue, _) = node::solidify_nodes(&body);
    debug!(name, records = queue.len(), "function reloaded");

    let func_name = format!("{name}({})", params.join(", "));
    Ok(Rc::new(InstantiatedFunction::new(
        sloc,
        func_name,
        params.to_vec(),
        queue,
    )))
}

fn validate_params(sloc: &SourceLocation, params: &[String]) -> Result<(), CodegenError> {
    let mut seen = HashSet::new();
    for (index, param) in params.iter().enumerate() {
        if param == "..." {
            if index + 1 != params.len() {
                return Err(CodegenError::new(
                    sloc.clone(),
                    "`...` must be the last parameter",
                ));
            }
        } else if !seen.insert(param.as_str()) {
            return Err(CodegenError::new(
                sloc.clone(),
                format!("duplicate parameter `{param}`"),
            ));
        }
    }
    Ok(())
}

/// Rebinds a function body against a live context and returns the
/// rebound IR: locals that resolve into the context's scopes, or into
/// the global context, become bound references.
#[must_use]
pub fn rebind(ctx: &ExecutiveContext<'_>, params: &[String], ir: &[AirNode]) -> Vec<AirNode> {
    let mut nodes = ir.to_vec();
    rebind_function_body(&mut nodes, ctx, params);
    nodes
}

/// Rebinds a function body in place against the context executing its
/// definition.
pub(crate) fn rebind_function_body(
    nodes: &mut Vec<AirNode>,
    ctx: &ExecutiveContext<'_>,
    params: &[String],
) {
    let mut rebinder = Rebinder::new(ctx);
    rebinder.push_function_scope(params);
    node::rebind_nodes(nodes, &mut rebinder);
}

/// Rebinds a deferred expression in place; with no analytic scopes on
/// the chain, every local resolves to a captured reference, so the
/// queue outlives its scope.
pub(crate) fn rebind_defer_body(nodes: &mut Vec<AirNode>, ctx: &ExecutiveContext<'_>) {
    let mut rebinder = Rebinder::new(ctx);
    node::rebind_nodes(nodes, &mut rebinder);
}

/// The scope chain used during rebinding: analytic scopes being walked
/// on top of the executing context's live scopes, with the global
/// context at the root.
pub(crate) struct Rebinder<'a> {
    global: &'a GlobalContext,
    executive: &'a [Scope],
    analytic: Vec<HashSet<String>>,
}

impl<'a> Rebinder<'a> {
    pub(crate) fn new(ctx: &'a ExecutiveContext<'_>) -> Self {
        Self {
            global: ctx.global(),
            executive: ctx.scopes(),
            analytic: Vec::new(),
        }
    }

    pub(crate) fn push_scope(&mut self) {
        self.analytic.push(HashSet::new());
    }

    pub(crate) fn push_function_scope(&mut self, params: &[String]) {
        let mut names: HashSet<String> = params
            .iter()
            .filter(|param| *param != "...")
            .cloned()
            .collect();
        for lazy in ["__func", "__this", "__varg"] {
            names.insert(lazy.to_owned());
        }
        self.analytic.push(names);
    }

    pub(crate) fn pop_scope(&mut self) {
        self.analytic.pop();
    }

    pub(crate) fn declare(&mut self, name: &str) {
        if let Some(scope) = self.analytic.last_mut() {
            scope.insert(name.to_owned());
        }
    }

    /// Resolves a depth-relative local. `None` means the name stays a
    /// local of the code being rebound; otherwise the returned
    /// reference is captured in its place.
    pub(crate) fn resolve_capture(&self, depth: usize, name: &str) -> Option<Reference> {
        if depth < self.analytic.len() {
            return None;
        }
        let executive_depth = depth - self.analytic.len();
        if executive_depth < self.executive.len() {
            let scope = &self.executive[self.executive.len() - 1 - executive_depth];
            return scope.get(name).cloned();
        }
        self.global.get_named_reference(name).cloned()
    }
}

#[derive(Debug, Default)]
struct GenScope {
    names: HashSet<String>,
}

/// The code generator: an analytic scope chain mirroring the scopes
/// the engine will open at run time.
#[derive(Debug, Default)]
struct Generator {
    scopes: Vec<GenScope>,
}

impl Generator {
    fn push_scope(&mut self) {
        self.scopes.push(GenScope::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) {
        self.scopes
            .last_mut()
            .expect("at least one scope")
            .names
            .insert(name.to_owned());
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        for (distance, scope) in self.scopes.iter().rev().enumerate() {
            if scope.names.contains(name) {
                return Some(u32::try_from(distance).expect("scope depth"));
            }
        }
        None
    }

    /// Lowers a function body: the root scope holds the parameters
    /// and the pre-defined names.
    fn lower_function_body(
        &mut self,
        params: &[String],
        body: &Block,
    ) -> Result<Vec<AirNode>, CodegenError> {
        self.push_scope();
        for param in params {
            if param != "..." {
                self.declare(param);
            }
        }
        for lazy in ["__func", "__this", "__varg"] {
            self.declare(lazy);
        }
        let mut nodes = Vec::new();
        for stmt in &body.stmts {
            self.lower_statement(stmt, &mut nodes)?;
        }
        self.pop_scope();
        Ok(nodes)
    }

    /// Lowers a block's statements inside a fresh analytic scope,
    /// mirroring the scope the engine opens when the block runs.
    fn lower_scoped_block(&mut self, block: &Block) -> Result<Vec<AirNode>, CodegenError> {
        self.push_scope();
        let mut nodes = Vec::new();
        for stmt in &block.stmts {
            self.lower_statement(stmt, &mut nodes)?;
        }
        self.pop_scope();
        Ok(nodes)
    }

    #[allow(clippy::too_many_lines)]
    fn lower_statement(
        &mut self,
        stmt: &Statement,
        out: &mut Vec<AirNode>,
    ) -> Result<(), CodegenError> {
        match stmt {
            Statement::Expression(expr) => {
                out.push(AirNode::ClearStack);
                self.lower_expr(expr, out, PtcAware::None)?;
            }
            Statement::Block { body } => {
                let body = self.lower_scoped_block(body)?;
                out.push(AirNode::ExecuteBlock { body });
            }
            Statement::Variables { immutable, decls } => {
                for decl in decls {
                    self.lower_var_decl(*immutable, decl, out)?;
                }
            }
            Statement::Function {
                sloc,
                name,
                params,
                body,
            } => {
                validate_params(sloc, params)?;
                out.push(AirNode::ClearStack);
                // The name is declared before the body is lowered so
                // the function can call itself.
                self.declare(name);
                out.push(AirNode::DeclareVariable {
                    sloc: sloc.clone(),
                    name: name.clone(),
                });
                let body = self.lower_function_body(params, body)?;
                out.push(AirNode::DefineFunction {
                    sloc: sloc.clone(),
                    name: format!("{name}({})", params.join(", ")),
                    params: params.clone(),
                    body,
                });
                out.push(AirNode::InitializeVariable { immutable: true });
            }
            Statement::If {
                negative,
                cond,
                then_branch,
                else_branch,
            } => {
                out.push(AirNode::ClearStack);
                self.lower_expr(cond, out, PtcAware::None)?;
                let true_branch = self.lower_scoped_block(then_branch)?;
                let false_branch = match else_branch {
                    Some(block) => self.lower_scoped_block(block)?,
                    None => Vec::new(),
                };
                out.push(AirNode::IfStatement {
                    negative: *negative,
                    true_branch,
                    false_branch,
                });
            }
            Statement::Switch { cond, clauses } => {
                out.push(AirNode::ClearStack);
                self.lower_expr(cond, out, PtcAware::None)?;
                // Labels are evaluated outside the body scope, so they
                // are lowered before it opens. The bodies then share
                // one scope, which is what makes declarations of
                // skipped clauses visible, if bypassed, in later ones.
                let mut labels = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    labels.push(match &clause.label {
                        Some(expr) => {
                            let mut nodes = Vec::new();
                            self.lower_expr(expr, &mut nodes, PtcAware::None)?;
                            Some(nodes)
                        }
                        None => None,
                    });
                }
                let mut lowered = Vec::with_capacity(clauses.len());
                self.push_scope();
                for (clause, label) in clauses.iter().zip(labels) {
                    let before: HashSet<String> = self
                        .scopes
                        .last()
                        .expect("switch scope")
                        .names
                        .clone();
                    let mut body = Vec::new();
                    for stmt in &clause.body.stmts {
                        self.lower_statement(stmt, &mut body)?;
                    }
                    let names = self
                        .scopes
                        .last()
                        .expect("switch scope")
                        .names
                        .difference(&before)
                        .cloned()
                        .collect();
                    lowered.push(AirSwitchClause { label, body, names });
                }
                self.pop_scope();
                out.push(AirNode::SwitchStatement { clauses: lowered });
            }
            Statement::DoWhile {
                body,
                negative,
                cond,
            } => {
                let body = self.lower_scoped_block(body)?;
                let mut cond_nodes = vec![AirNode::ClearStack];
                self.lower_expr(cond, &mut cond_nodes, PtcAware::None)?;
                out.push(AirNode::DoWhileStatement {
                    body,
                    negative: *negative,
                    cond: cond_nodes,
                });
            }
            Statement::While {
                negative,
                cond,
                body,
            } => {
                let mut cond_nodes = vec![AirNode::ClearStack];
                self.lower_expr(cond, &mut cond_nodes, PtcAware::None)?;
                let body = self.lower_scoped_block(body)?;
                out.push(AirNode::WhileStatement {
                    negative: *negative,
                    cond: cond_nodes,
                    body,
                });
            }
            Statement::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope();
                let mut init_nodes = Vec::new();
                if let Some(init) = init {
                    self.lower_statement(init, &mut init_nodes)?;
                }
                let mut cond_nodes = Vec::new();
                if let Some(cond) = cond {
                    cond_nodes.push(AirNode::ClearStack);
                    self.lower_expr(cond, &mut cond_nodes, PtcAware::None)?;
                }
                let mut step_nodes = Vec::new();
                if let Some(step) = step {
                    step_nodes.push(AirNode::ClearStack);
                    self.lower_expr(step, &mut step_nodes, PtcAware::None)?;
                }
                let body = self.lower_scoped_block(body)?;
                self.pop_scope();
                out.push(AirNode::ForStatement {
                    init: init_nodes,
                    cond: cond_nodes,
                    step: step_nodes,
                    body,
                });
            }
            Statement::ForEach {
                sloc,
                key,
                value,
                range,
                body,
            } => {
                self.push_scope();
                let key_name = key.clone().unwrap_or_else(|| "__key".to_owned());
                self.declare(&key_name);
                self.declare(value);
                let mut init_nodes = vec![AirNode::ClearStack];
                self.lower_expr(range, &mut init_nodes, PtcAware::None)?;
                let body = self.lower_scoped_block(body)?;
                self.pop_scope();
                out.push(AirNode::ForEachStatement {
                    key_name,
                    value_name: value.clone(),
                    sloc_init: sloc.clone(),
                    init: init_nodes,
                    body,
                });
            }
            Statement::Try {
                sloc_try,
                body,
                sloc_catch,
                except_name,
                handler,
            } => {
                let try_body = self.lower_scoped_block(body)?;
                self.push_scope();
                self.declare(except_name);
                self.declare("__backtrace");
                let mut catch_body = Vec::new();
                for stmt in &handler.stmts {
                    self.lower_statement(stmt, &mut catch_body)?;
                }
                self.pop_scope();
                out.push(AirNode::TryStatement {
                    sloc_try: sloc_try.clone(),
                    try_body,
                    sloc_catch: sloc_catch.clone(),
                    name_except: except_name.clone(),
                    catch_body,
                });
            }
            Statement::Break { target } => {
                out.push(AirNode::SimpleStatus {
                    status: match target {
                        BreakTarget::Unspecified => AirStatus::BreakUnspec,
                        BreakTarget::Switch => AirStatus::BreakSwitch,
                        BreakTarget::While => AirStatus::BreakWhile,
                        BreakTarget::For => AirStatus::BreakFor,
                    },
                });
            }
            Statement::Continue { target } => {
                out.push(AirNode::SimpleStatus {
                    status: match target {
                        ContinueTarget::Unspecified => AirStatus::ContinueUnspec,
                        ContinueTarget::While => AirStatus::ContinueWhile,
                        ContinueTarget::For => AirStatus::ContinueFor,
                    },
                });
            }
            Statement::Throw { sloc, expr } => {
                out.push(AirNode::ClearStack);
                self.lower_expr(expr, out, PtcAware::None)?;
                out.push(AirNode::ThrowStatement { sloc: sloc.clone() });
            }
            Statement::Return {
                sloc,
                by_ref,
                expr,
            } => match expr {
                None => out.push(AirNode::ReturnStatement {
                    sloc: sloc.clone(),
                    by_ref: false,
                    is_void: true,
                }),
                Some(expr) => {
                    out.push(AirNode::ClearStack);
                    let ptc = if *by_ref {
                        PtcAware::ByRef
                    } else {
                        PtcAware::ByValue
                    };
                    self.lower_expr(expr, out, ptc)?;
                    out.push(AirNode::ReturnStatement {
                        sloc: sloc.clone(),
                        by_ref: *by_ref,
                        is_void: false,
                    });
                }
            },
            Statement::Assert {
                sloc,
                expr,
                message,
            } => {
                out.push(AirNode::ClearStack);
                self.lower_expr(expr, out, PtcAware::None)?;
                out.push(AirNode::AssertStatement {
                    sloc: sloc.clone(),
                    message: message
                        .clone()
                        .unwrap_or_else(|| "expression evaluated to false".to_owned()),
                });
            }
            Statement::Defer { sloc, expr } => {
                let mut body = Vec::new();
                self.lower_expr(expr, &mut body, PtcAware::None)?;
                out.push(AirNode::DeferExpression {
                    sloc: sloc.clone(),
                    body,
                });
            }
        }
        Ok(())
    }

    fn lower_var_decl(
        &mut self,
        immutable: bool,
        decl: &VarDecl,
        out: &mut Vec<AirNode>,
    ) -> Result<(), CodegenError> {
        match (&decl.target, &decl.init) {
            (VarTarget::Name(name), None) => {
                if immutable {
                    return Err(CodegenError::new(
                        decl.sloc.clone(),
                        format!("missing initializer for constant `{name}`"),
                    ));
                }
                self.declare(name);
                out.push(AirNode::DefineNullVariable {
                    sloc: decl.sloc.clone(),
                    immutable,
                    name: name.clone(),
                });
            }
            (VarTarget::Name(name), Some(init)) => {
                out.push(AirNode::ClearStack);
                self.declare(name);
                out.push(AirNode::DeclareVariable {
                    sloc: decl.sloc.clone(),
                    name: name.clone(),
                });
                self.lower_expr(init, out, PtcAware::None)?;
                out.push(AirNode::InitializeVariable { immutable });
            }
            (VarTarget::Array(names), init) => {
                let Some(init) = init else {
                    return Err(CodegenError::new(
                        decl.sloc.clone(),
                        "missing initializer for structured binding",
                    ));
                };
                out.push(AirNode::ClearStack);
                for name in names {
                    self.declare(name);
                    out.push(AirNode::DeclareVariable {
                        sloc: decl.sloc.clone(),
                        name: name.clone(),
                    });
                }
                self.lower_expr(init, out, PtcAware::None)?;
                out.push(AirNode::UnpackStructArray {
                    sloc: decl.sloc.clone(),
                    immutable,
                    nelems: u32::try_from(names.len()).expect("target count"),
                });
            }
            (VarTarget::Object(names), init) => {
                let Some(init) = init else {
                    return Err(CodegenError::new(
                        decl.sloc.clone(),
                        "missing initializer for structured binding",
                    ));
                };
                out.push(AirNode::ClearStack);
                for name in names {
                    self.declare(name);
                    out.push(AirNode::DeclareVariable {
                        sloc: decl.sloc.clone(),
                        name: name.clone(),
                    });
                }
                self.lower_expr(init, out, PtcAware::None)?;
                out.push(AirNode::UnpackStructObject {
                    sloc: decl.sloc.clone(),
                    immutable,
                    keys: names.clone(),
                });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn lower_expr(
        &mut self,
        expr: &Expr,
        out: &mut Vec<AirNode>,
        ptc: PtcAware,
    ) -> Result<(), CodegenError> {
        match &expr.kind {
            ExprKind::Literal(value) => {
                out.push(AirNode::PushTemporary {
                    value: value.clone(),
                });
            }
            ExprKind::Name(name) => match self.lookup(name) {
                Some(depth) => out.push(AirNode::PushLocalReference {
                    sloc: expr.sloc.clone(),
                    depth,
                    name: name.clone(),
                }),
                None => out.push(AirNode::PushGlobalReference {
                    sloc: expr.sloc.clone(),
                    name: name.clone(),
                }),
            },
            ExprKind::Closure { params, body } => {
                validate_params(&expr.sloc, params)?;
                let body = self.lower_function_body(params, body)?;
                out.push(AirNode::DefineFunction {
                    sloc: expr.sloc.clone(),
                    name: format!("<closure>({})", params.join(", ")),
                    params: params.clone(),
                    body,
                });
            }
            ExprKind::ArrayLiteral(elements) => {
                for element in elements {
                    self.lower_expr(element, out, PtcAware::None)?;
                }
                out.push(AirNode::PushUnnamedArray {
                    sloc: expr.sloc.clone(),
                    nelems: u32::try_from(elements.len()).expect("element count"),
                });
            }
            ExprKind::ObjectLiteral(members) => {
                let mut keys = Vec::with_capacity(members.len());
                for (key, value) in members {
                    keys.push(key.clone());
                    self.lower_expr(value, out, PtcAware::None)?;
                }
                out.push(AirNode::PushUnnamedObject {
                    sloc: expr.sloc.clone(),
                    keys,
                });
            }
            ExprKind::Unary { xop, operand } => {
                self.lower_expr(operand, out, PtcAware::None)?;
                out.push(AirNode::ApplyOperator {
                    sloc: expr.sloc.clone(),
                    xop: *xop,
                    assign: false,
                });
            }
            ExprKind::Binary {
                xop,
                assign,
                lhs,
                rhs,
            } => {
                self.lower_expr(lhs, out, PtcAware::None)?;
                self.lower_expr(rhs, out, PtcAware::None)?;
                out.push(AirNode::ApplyOperator {
                    sloc: expr.sloc.clone(),
                    xop: *xop,
                    assign: *assign,
                });
            }
            ExprKind::Assign { lhs, rhs } => {
                self.lower_expr(lhs, out, PtcAware::None)?;
                self.lower_expr(rhs, out, PtcAware::None)?;
                out.push(AirNode::ApplyOperator {
                    sloc: expr.sloc.clone(),
                    xop: Xop::Assign,
                    assign: true,
                });
            }
            ExprKind::Subscript { target, index } => {
                self.lower_expr(target, out, PtcAware::None)?;
                self.lower_expr(index, out, PtcAware::None)?;
                out.push(AirNode::ApplyOperator {
                    sloc: expr.sloc.clone(),
                    xop: Xop::Subscr,
                    assign: false,
                });
            }
            ExprKind::Member { target, name } => {
                self.lower_expr(target, out, PtcAware::None)?;
                out.push(AirNode::MemberAccess {
                    sloc: expr.sloc.clone(),
                    name: name.clone(),
                });
            }
            ExprKind::Call { target, args } => {
                self.lower_expr(target, out, PtcAware::None)?;
                for arg in args {
                    self.lower_expr(arg, out, PtcAware::None)?;
                    out.push(AirNode::CheckArgument {
                        sloc: arg.sloc.clone(),
                        by_ref: false,
                    });
                }
                out.push(AirNode::FunctionCall {
                    sloc: expr.sloc.clone(),
                    nargs: u32::try_from(args.len()).expect("argument count"),
                    ptc,
                });
            }
            ExprKind::VariadicCall { target, args } => {
                self.lower_expr(target, out, PtcAware::None)?;
                self.lower_expr(args, out, PtcAware::None)?;
                out.push(AirNode::CheckArgument {
                    sloc: args.sloc.clone(),
                    by_ref: false,
                });
                out.push(AirNode::VariadicCall {
                    sloc: expr.sloc.clone(),
                    ptc,
                });
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                self.lower_expr(cond, out, PtcAware::None)?;
                let mut true_branch = Vec::new();
                self.lower_expr(then_branch, &mut true_branch, ptc)?;
                let mut false_branch = Vec::new();
                self.lower_expr(else_branch, &mut false_branch, ptc)?;
                out.push(AirNode::BranchExpression {
                    sloc: expr.sloc.clone(),
                    negative: false,
                    true_branch,
                    false_branch,
                    assign: false,
                });
            }
            ExprKind::AndAlso { lhs, rhs } => {
                self.lower_expr(lhs, out, PtcAware::None)?;
                let mut true_branch = Vec::new();
                self.lower_expr(rhs, &mut true_branch, ptc)?;
                out.push(AirNode::BranchExpression {
                    sloc: expr.sloc.clone(),
                    negative: false,
                    true_branch,
                    false_branch: Vec::new(),
                    assign: false,
                });
            }
            ExprKind::OrElse { lhs, rhs } => {
                self.lower_expr(lhs, out, PtcAware::None)?;
                let mut false_branch = Vec::new();
                self.lower_expr(rhs, &mut false_branch, ptc)?;
                out.push(AirNode::BranchExpression {
                    sloc: expr.sloc.clone(),
                    negative: false,
                    true_branch: Vec::new(),
                    false_branch,
                    assign: false,
                });
            }
            ExprKind::Coalesce { lhs, rhs } => {
                self.lower_expr(lhs, out, PtcAware::None)?;
                let mut null_branch = Vec::new();
                self.lower_expr(rhs, &mut null_branch, ptc)?;
                out.push(AirNode::Coalescence {
                    sloc: expr.sloc.clone(),
                    null_branch,
                    assign: false,
                });
            }
            ExprKind::CatchExpr(operand) => {
                let mut body = Vec::new();
                self.lower_expr(operand, &mut body, PtcAware::None)?;
                out.push(AirNode::CatchExpression { body });
            }
            ExprKind::ImportCall { args } => {
                for arg in args {
                    self.lower_expr(arg, out, PtcAware::None)?;
                    out.push(AirNode::CheckArgument {
                        sloc: arg.sloc.clone(),
                        by_ref: false,
                    });
                }
                out.push(AirNode::ImportCall {
                    sloc: expr.sloc.clone(),
                    nargs: u32::try_from(args.len()).expect("argument count"),
                });
            }
        }
        Ok(())
    }
}
