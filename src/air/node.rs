//! The intermediate representation.
//!
//! The optimizer lowers the parser's AST into a tree of [`AirNode`]s.
//! Nodes are solidified into [`AvmcQueue`]s for execution, and may be
//! rebound against a context to capture live references, which is how
//! closures and deferred expressions close over their surroundings.

use std::rc::Rc;

use crate::air::queue::{
    AvmcQueue, DeferParams, ForEachParams, ForParams, FunctionParams, Op, SwitchClause,
    TryCatchParams,
};
use crate::optimizer::Rebinder;
use crate::runtime::function::PtcAware;
use crate::runtime::reference::Reference;
use crate::runtime::value::Value;
use crate::runtime::variable::Variable;
use crate::source::SourceLocation;
use crate::vm::AirStatus;

/// The operator selector carried by `apply-operator` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Xop {
    Inc,
    Dec,
    Subscr,
    Pos,
    Neg,
    Notb,
    Notl,
    Unset,
    Countof,
    Typeof,
    Sqrt,
    Isnan,
    Isinf,
    Abs,
    Sign,
    Round,
    Floor,
    Ceil,
    Trunc,
    Iround,
    Ifloor,
    Iceil,
    Itrunc,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpGt,
    CmpLte,
    CmpGte,
    Cmp3way,
    CmpUn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Sll,
    Srl,
    Sla,
    Sra,
    Andb,
    Orb,
    Xorb,
    Assign,
    Fma,
    Head,
    Tail,
    Lzcnt,
    Tzcnt,
    Popcnt,
    Addm,
    Subm,
    Mulm,
    Adds,
    Subs,
    Muls,
    Random,
}

/// One clause of a `switch` in IR form.
#[derive(Debug, Clone)]
pub struct AirSwitchClause {
    /// The label expression; `None` marks the default clause.
    pub label: Option<Vec<AirNode>>,
    pub body: Vec<AirNode>,
    /// Names this clause declares, bound as bypassed when the clause
    /// is jumped over.
    pub names: Vec<String>,
}

/// One node of the intermediate representation.
#[derive(Debug, Clone)]
pub enum AirNode {
    ClearStack,
    ExecuteBlock {
        body: Vec<AirNode>,
    },
    DeclareVariable {
        sloc: SourceLocation,
        name: String,
    },
    InitializeVariable {
        immutable: bool,
    },
    IfStatement {
        negative: bool,
        true_branch: Vec<AirNode>,
        false_branch: Vec<AirNode>,
    },
    SwitchStatement {
        clauses: Vec<AirSwitchClause>,
    },
    DoWhileStatement {
        body: Vec<AirNode>,
        negative: bool,
        cond: Vec<AirNode>,
    },
    WhileStatement {
        negative: bool,
        cond: Vec<AirNode>,
        body: Vec<AirNode>,
    },
    ForEachStatement {
        key_name: String,
        value_name: String,
        sloc_init: SourceLocation,
        init: Vec<AirNode>,
        body: Vec<AirNode>,
    },
    ForStatement {
        init: Vec<AirNode>,
        cond: Vec<AirNode>,
        step: Vec<AirNode>,
        body: Vec<AirNode>,
    },
    TryStatement {
        sloc_try: SourceLocation,
        try_body: Vec<AirNode>,
        sloc_catch: SourceLocation,
        name_except: String,
        catch_body: Vec<AirNode>,
    },
    ThrowStatement {
        sloc: SourceLocation,
    },
    AssertStatement {
        sloc: SourceLocation,
        message: String,
    },
    SimpleStatus {
        status: AirStatus,
    },
    CheckArgument {
        sloc: SourceLocation,
        by_ref: bool,
    },
    PushGlobalReference {
        sloc: SourceLocation,
        name: String,
    },
    PushLocalReference {
        sloc: SourceLocation,
        depth: u32,
        name: String,
    },
    PushBoundReference {
        reference: Reference,
    },
    PushTemporary {
        value: Value,
    },
    DefineFunction {
        sloc: SourceLocation,
        name: String,
        params: Vec<String>,
        body: Vec<AirNode>,
    },
    BranchExpression {
        sloc: SourceLocation,
        negative: bool,
        true_branch: Vec<AirNode>,
        false_branch: Vec<AirNode>,
        assign: bool,
    },
    Coalescence {
        sloc: SourceLocation,
        null_branch: Vec<AirNode>,
        assign: bool,
    },
    FunctionCall {
        sloc: SourceLocation,
        nargs: u32,
        ptc: PtcAware,
    },
    MemberAccess {
        sloc: SourceLocation,
        name: String,
    },
    PushUnnamedArray {
        sloc: SourceLocation,
        nelems: u32,
    },
    PushUnnamedObject {
        sloc: SourceLocation,
        keys: Vec<String>,
    },
    ApplyOperator {
        sloc: SourceLocation,
        xop: Xop,
        assign: bool,
    },
    UnpackStructArray {
        sloc: SourceLocation,
        immutable: bool,
        nelems: u32,
    },
    UnpackStructObject {
        sloc: SourceLocation,
        immutable: bool,
        keys: Vec<String>,
    },
    DefineNullVariable {
        sloc: SourceLocation,
        immutable: bool,
        name: String,
    },
    SingleStepTrap {
        sloc: SourceLocation,
    },
    VariadicCall {
        sloc: SourceLocation,
        ptc: PtcAware,
    },
    DeferExpression {
        sloc: SourceLocation,
        body: Vec<AirNode>,
    },
    ImportCall {
        sloc: SourceLocation,
        nargs: u32,
    },
    DeclareReference {
        name: String,
    },
    InitializeReference {
        sloc: SourceLocation,
        name: String,
    },
    CatchExpression {
        body: Vec<AirNode>,
    },
    ReturnStatement {
        sloc: SourceLocation,
        by_ref: bool,
        is_void: bool,
    },
}

/// Solidifies a node sequence into a finalized queue. The second
/// element reports whether control can fall off the end.
#[must_use]
pub fn solidify_nodes(nodes: &[AirNode]) -> (AvmcQueue, bool) {
    let mut queue = AvmcQueue::new();
    let mut reachable = true;
    for node in nodes {
        reachable = node.solidify(&mut queue);
    }
    queue.finalize();
    (queue, reachable)
}

fn solidify_sub(nodes: &[AirNode]) -> (Rc<AvmcQueue>, bool) {
    let (queue, reachable) = solidify_nodes(nodes);
    (Rc::new(queue), reachable)
}

impl AirNode {
    /// Appends this node's records to `queue` and reports whether
    /// execution can continue past it.
    pub fn solidify(&self, queue: &mut AvmcQueue) -> bool {
        match self {
            AirNode::ClearStack => {
                queue.append(Op::ClearStack, None);
                true
            }
            AirNode::ExecuteBlock { body } => {
                let (body, reachable) = solidify_sub(body);
                queue.append(Op::ExecuteBlock { body }, None);
                reachable
            }
            AirNode::DeclareVariable { sloc, name } => {
                queue.append(
                    Op::DeclareVariable { name: name.clone() },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::InitializeVariable { immutable } => {
                queue.append(
                    Op::InitializeVariable {
                        immutable: *immutable,
                    },
                    None,
                );
                true
            }
            AirNode::IfStatement {
                negative,
                true_branch,
                false_branch,
            } => {
                let (true_branch, rtrue) = solidify_sub(true_branch);
                let (false_branch, rfalse) = solidify_sub(false_branch);
                queue.append(
                    Op::IfStatement {
                        negative: *negative,
                        true_branch,
                        false_branch,
                    },
                    None,
                );
                rtrue | rfalse
            }
            AirNode::SwitchStatement { clauses } => {
                let clauses = clauses
                    .iter()
                    .map(|clause| SwitchClause {
                        label: clause.label.as_deref().map(|label| solidify_sub(label).0),
                        body: solidify_sub(&clause.body).0,
                        names: clause.names.clone(),
                    })
                    .collect();
                queue.append(
                    Op::SwitchStatement {
                        clauses: Rc::new(clauses),
                    },
                    None,
                );
                true
            }
            AirNode::DoWhileStatement {
                body,
                negative,
                cond,
            } => {
                let (body, _) = solidify_sub(body);
                let (cond, _) = solidify_sub(cond);
                queue.append(
                    Op::DoWhileStatement {
                        body,
                        negative: *negative,
                        cond,
                    },
                    None,
                );
                true
            }
            AirNode::WhileStatement {
                negative,
                cond,
                body,
            } => {
                let (cond, _) = solidify_sub(cond);
                let (body, _) = solidify_sub(body);
                queue.append(
                    Op::WhileStatement {
                        negative: *negative,
                        cond,
                        body,
                    },
                    None,
                );
                true
            }
            AirNode::ForEachStatement {
                key_name,
                value_name,
                sloc_init,
                init,
                body,
            } => {
                let sp = ForEachParams {
                    key_name: key_name.clone(),
                    value_name: value_name.clone(),
                    sloc_init: sloc_init.clone(),
                    init: solidify_sub(init).0,
                    body: solidify_sub(body).0,
                };
                queue.append(Op::ForEachStatement { sp: Rc::new(sp) }, None);
                true
            }
            AirNode::ForStatement {
                init,
                cond,
                step,
                body,
            } => {
                let sp = ForParams {
                    init: solidify_sub(init).0,
                    cond: solidify_sub(cond).0,
                    step: solidify_sub(step).0,
                    body: solidify_sub(body).0,
                };
                queue.append(Op::ForStatement { sp: Rc::new(sp) }, None);
                true
            }
            AirNode::TryStatement {
                sloc_try,
                try_body,
                sloc_catch,
                name_except,
                catch_body,
            } => {
                let (try_body, rtry) = solidify_sub(try_body);
                let (catch_body, rcatch) = solidify_sub(catch_body);
                let sp = TryCatchParams {
                    sloc_try: sloc_try.clone(),
                    try_body,
                    sloc_catch: sloc_catch.clone(),
                    name_except: name_except.clone(),
                    catch_body,
                };
                queue.append(Op::TryStatement { sp: Rc::new(sp) }, None);
                rtry | rcatch
            }
            AirNode::ThrowStatement { sloc } => {
                queue.append(Op::ThrowStatement, Some(sloc.clone()));
                false
            }
            AirNode::AssertStatement { sloc, message } => {
                queue.append(
                    Op::AssertStatement {
                        message: Rc::from(message.as_str()),
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::SimpleStatus { status } => {
                queue.append(Op::SimpleStatus { status: *status }, None);
                false
            }
            AirNode::CheckArgument { sloc, by_ref } => {
                queue.append(Op::CheckArgument { by_ref: *by_ref }, Some(sloc.clone()));
                true
            }
            AirNode::PushGlobalReference { sloc, name } => {
                queue.append(
                    Op::PushGlobalReference { name: name.clone() },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::PushLocalReference { sloc, depth, name } => {
                queue.append(
                    Op::PushLocalReference {
                        depth: *depth,
                        name: name.clone(),
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::PushBoundReference { reference } => {
                queue.append(
                    Op::PushBoundReference {
                        reference: reference.clone(),
                    },
                    None,
                );
                true
            }
            AirNode::PushTemporary { value } => {
                queue.append(
                    Op::PushTemporary {
                        value: value.clone(),
                    },
                    None,
                );
                true
            }
            AirNode::DefineFunction {
                sloc,
                name,
                params,
                body,
            } => {
                let sp = FunctionParams {
                    sloc: sloc.clone(),
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                };
                queue.append(Op::DefineFunction { sp: Rc::new(sp) }, Some(sloc.clone()));
                true
            }
            AirNode::BranchExpression {
                sloc,
                negative,
                true_branch,
                false_branch,
                assign,
            } => {
                let (true_branch, _) = solidify_sub(true_branch);
                let (false_branch, _) = solidify_sub(false_branch);
                queue.append(
                    Op::BranchExpression {
                        negative: *negative,
                        true_branch,
                        false_branch,
                        assign: *assign,
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::Coalescence {
                sloc,
                null_branch,
                assign,
            } => {
                let (null_branch, _) = solidify_sub(null_branch);
                queue.append(
                    Op::Coalescence {
                        null_branch,
                        assign: *assign,
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::FunctionCall { sloc, nargs, ptc } => {
                queue.append(
                    Op::FunctionCall {
                        nargs: *nargs,
                        ptc: *ptc,
                    },
                    Some(sloc.clone()),
                );
                *ptc == PtcAware::None
            }
            AirNode::MemberAccess { sloc, name } => {
                queue.append(Op::MemberAccess { name: name.clone() }, Some(sloc.clone()));
                true
            }
            AirNode::PushUnnamedArray { sloc, nelems } => {
                queue.append(
                    Op::PushUnnamedArray { nelems: *nelems },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::PushUnnamedObject { sloc, keys } => {
                queue.append(
                    Op::PushUnnamedObject {
                        keys: Rc::from(keys.as_slice()),
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::ApplyOperator { sloc, xop, assign } => {
                queue.append(
                    Op::ApplyOperator {
                        xop: *xop,
                        assign: *assign,
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::UnpackStructArray {
                sloc,
                immutable,
                nelems,
            } => {
                queue.append(
                    Op::UnpackStructArray {
                        immutable: *immutable,
                        nelems: *nelems,
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::UnpackStructObject {
                sloc,
                immutable,
                keys,
            } => {
                queue.append(
                    Op::UnpackStructObject {
                        immutable: *immutable,
                        keys: Rc::from(keys.as_slice()),
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::DefineNullVariable {
                sloc,
                immutable,
                name,
            } => {
                queue.append(
                    Op::DefineNullVariable {
                        immutable: *immutable,
                        name: name.clone(),
                    },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::SingleStepTrap { sloc } => {
                queue.append(Op::SingleStepTrap, Some(sloc.clone()));
                true
            }
            AirNode::VariadicCall { sloc, ptc } => {
                queue.append(Op::VariadicCall { ptc: *ptc }, Some(sloc.clone()));
                *ptc == PtcAware::None
            }
            AirNode::DeferExpression { sloc, body } => {
                let sp = DeferParams {
                    sloc: sloc.clone(),
                    body: body.clone(),
                };
                queue.append(Op::DeferExpression { sp: Rc::new(sp) }, Some(sloc.clone()));
                true
            }
            AirNode::ImportCall { sloc, nargs } => {
                queue.append(Op::ImportCall { nargs: *nargs }, Some(sloc.clone()));
                true
            }
            AirNode::DeclareReference { name } => {
                queue.append(Op::DeclareReference { name: name.clone() }, None);
                true
            }
            AirNode::InitializeReference { sloc, name } => {
                queue.append(
                    Op::InitializeReference { name: name.clone() },
                    Some(sloc.clone()),
                );
                true
            }
            AirNode::CatchExpression { body } => {
                let (body, _) = solidify_sub(body);
                queue.append(Op::CatchExpression { body }, None);
                true
            }
            AirNode::ReturnStatement {
                sloc,
                by_ref,
                is_void,
            } => {
                queue.append(
                    Op::ReturnStatement {
                        by_ref: *by_ref,
                        is_void: *is_void,
                    },
                    Some(sloc.clone()),
                );
                false
            }
        }
    }

    /// Reports every variable captured by this node or its children.
    pub(crate) fn enumerate_variables(&self, callback: &mut dyn FnMut(&Rc<Variable>)) {
        match self {
            AirNode::PushBoundReference { reference } => reference.enumerate_variables(callback),
            AirNode::PushTemporary { value } => value.enumerate_variables(callback),
            AirNode::ExecuteBlock { body }
            | AirNode::DeferExpression { body, .. }
            | AirNode::CatchExpression { body }
            | AirNode::DefineFunction { body, .. } => {
                for node in body {
                    node.enumerate_variables(callback);
                }
            }
            AirNode::IfStatement {
                true_branch,
                false_branch,
                ..
            }
            | AirNode::BranchExpression {
                true_branch,
                false_branch,
                ..
            } => {
                for node in true_branch.iter().chain(false_branch) {
                    node.enumerate_variables(callback);
                }
            }
            AirNode::SwitchStatement { clauses } => {
                for clause in clauses {
                    for node in clause.label.iter().flatten().chain(&clause.body) {
                        node.enumerate_variables(callback);
                    }
                }
            }
            AirNode::DoWhileStatement { body, cond, .. }
            | AirNode::WhileStatement { cond, body, .. } => {
                for node in cond.iter().chain(body) {
                    node.enumerate_variables(callback);
                }
            }
            AirNode::ForEachStatement { init, body, .. } => {
                for node in init.iter().chain(body) {
                    node.enumerate_variables(callback);
                }
            }
            AirNode::ForStatement {
                init,
                cond,
                step,
                body,
            } => {
                for node in init.iter().chain(cond).chain(step).chain(body) {
                    node.enumerate_variables(callback);
                }
            }
            AirNode::TryStatement {
                try_body,
                catch_body,
                ..
            } => {
                for node in try_body.iter().chain(catch_body) {
                    node.enumerate_variables(callback);
                }
            }
            AirNode::Coalescence { null_branch, .. } => {
                for node in null_branch {
                    node.enumerate_variables(callback);
                }
            }
            _ => {}
        }
    }

    /// Rebinds name references in this node against `rebinder`,
    /// capturing live references for names that resolve into an
    /// executive scope.
    pub(crate) fn rebind(&mut self, rebinder: &mut Rebinder<'_>) {
        match self {
            AirNode::PushLocalReference { depth, name, .. } => {
                if let Some(reference) = rebinder.resolve_capture(*depth as usize, name) {
                    *self = AirNode::PushBoundReference { reference };
                }
            }
            AirNode::DeclareVariable { name, .. }
            | AirNode::DefineNullVariable { name, .. }
            | AirNode::DeclareReference { name }
            | AirNode::InitializeReference { name, .. } => {
                rebinder.declare(name);
            }
            AirNode::ExecuteBlock { body } => {
                rebinder.push_scope();
                rebind_nodes(body, rebinder);
                rebinder.pop_scope();
            }
            AirNode::IfStatement {
                true_branch,
                false_branch,
                ..
            } => {
                rebinder.push_scope();
                rebind_nodes(true_branch, rebinder);
                rebinder.pop_scope();
                rebinder.push_scope();
                rebind_nodes(false_branch, rebinder);
                rebinder.pop_scope();
            }
            AirNode::SwitchStatement { clauses } => {
                for clause in clauses.iter_mut() {
                    if let Some(label) = &mut clause.label {
                        rebind_nodes(label, rebinder);
                    }
                }
                rebinder.push_scope();
                for clause in clauses {
                    rebind_nodes(&mut clause.body, rebinder);
                }
                rebinder.pop_scope();
            }
            AirNode::DoWhileStatement { body, cond, .. }
            | AirNode::WhileStatement { cond, body, .. } => {
                rebind_nodes(cond, rebinder);
                rebinder.push_scope();
                rebind_nodes(body, rebinder);
                rebinder.pop_scope();
            }
            AirNode::ForEachStatement {
                key_name,
                value_name,
                init,
                body,
                ..
            } => {
                rebinder.push_scope();
                rebinder.declare(key_name);
                rebinder.declare(value_name);
                rebind_nodes(init, rebinder);
                rebinder.push_scope();
                rebind_nodes(body, rebinder);
                rebinder.pop_scope();
                rebinder.pop_scope();
            }
            AirNode::ForStatement {
                init,
                cond,
                step,
                body,
            } => {
                rebinder.push_scope();
                rebind_nodes(init, rebinder);
                rebind_nodes(cond, rebinder);
                rebind_nodes(step, rebinder);
                rebinder.push_scope();
                rebind_nodes(body, rebinder);
                rebinder.pop_scope();
                rebinder.pop_scope();
            }
            AirNode::TryStatement {
                try_body,
                name_except,
                catch_body,
                ..
            } => {
                rebinder.push_scope();
                rebind_nodes(try_body, rebinder);
                rebinder.pop_scope();
                rebinder.push_scope();
                rebinder.declare(name_except);
                rebinder.declare("__backtrace");
                rebind_nodes(catch_body, rebinder);
                rebinder.pop_scope();
            }
            AirNode::DefineFunction { params, body, .. } => {
                rebinder.push_function_scope(params);
                rebind_nodes(body, rebinder);
                rebinder.pop_scope();
            }
            AirNode::BranchExpression {
                true_branch,
                false_branch,
                ..
            } => {
                rebind_nodes(true_branch, rebinder);
                rebind_nodes(false_branch, rebinder);
            }
            AirNode::Coalescence { null_branch, .. } => {
                rebind_nodes(null_branch, rebinder);
            }
            AirNode::DeferExpression { body, .. } | AirNode::CatchExpression { body } => {
                rebind_nodes(body, rebinder);
            }
            _ => {}
        }
    }
}

/// Rebinds a node sequence in place.
pub(crate) fn rebind_nodes(nodes: &mut [AirNode], rebinder: &mut Rebinder<'_>) {
    for node in nodes {
        node.rebind(rebinder);
    }
}
