//! The solidified instruction stream the engine executes.
//!
//! Solidification turns an IR subtree into a flat sequence of [`Op`]
//! records. Small parameters live inline in the record; bulky side
//! parameters are shared behind [`Rc`] so cloned queues stay cheap.
//! Source locations travel in a parallel vector to keep the records
//! themselves small.

use std::rc::Rc;

use crate::air::node::{AirNode, Xop};
use crate::runtime::context::ExecutiveContext;
use crate::runtime::error::RuntimeError;
use crate::runtime::function::PtcAware;
use crate::runtime::reference::Reference;
use crate::runtime::value::Value;
use crate::runtime::variable::Variable;
use crate::source::SourceLocation;
use crate::vm::{self, AirStatus};

/// Side parameters of a `switch` record.
#[derive(Debug)]
pub struct SwitchClause {
    /// The label expression, or `None` for the default clause.
    pub label: Option<Rc<AvmcQueue>>,
    pub body: Rc<AvmcQueue>,
    /// Names declared by this clause; clauses skipped over when
    /// jumping into the body still get these bound as bypassed.
    pub names: Vec<String>,
}

/// Side parameters of a `for each` record.
#[derive(Debug)]
pub struct ForEachParams {
    pub key_name: String,
    pub value_name: String,
    pub sloc_init: SourceLocation,
    pub init: Rc<AvmcQueue>,
    pub body: Rc<AvmcQueue>,
}

/// Side parameters of a three-clause `for` record.
#[derive(Debug)]
pub struct ForParams {
    pub init: Rc<AvmcQueue>,
    pub cond: Rc<AvmcQueue>,
    pub step: Rc<AvmcQueue>,
    pub body: Rc<AvmcQueue>,
}

/// Side parameters of a `try` record.
#[derive(Debug)]
pub struct TryCatchParams {
    pub sloc_try: SourceLocation,
    pub try_body: Rc<AvmcQueue>,
    pub sloc_catch: SourceLocation,
    pub name_except: String,
    pub catch_body: Rc<AvmcQueue>,
}

/// Side parameters of a function definition record.
///
/// The body stays in IR form: it is rebound against the executing
/// context when the definition executes, which is how closures capture
/// their surroundings.
#[derive(Debug)]
pub struct FunctionParams {
    pub sloc: SourceLocation,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<AirNode>,
}

/// Side parameters of a deferred-expression record. As with function
/// definitions, the body is rebound and solidified when the record
/// executes, so the resulting queue stays valid after its scope is
/// gone.
#[derive(Debug)]
pub struct DeferParams {
    pub sloc: SourceLocation,
    pub body: Vec<AirNode>,
}

/// One solidified record.
#[derive(Debug, Clone)]
pub enum Op {
    ClearStack,
    ExecuteBlock {
        body: Rc<AvmcQueue>,
    },
    DeclareVariable {
        name: String,
    },
    InitializeVariable {
        immutable: bool,
    },
    IfStatement {
        negative: bool,
        true_branch: Rc<AvmcQueue>,
        false_branch: Rc<AvmcQueue>,
    },
    SwitchStatement {
        clauses: Rc<Vec<SwitchClause>>,
    },
    DoWhileStatement {
        body: Rc<AvmcQueue>,
        negative: bool,
        cond: Rc<AvmcQueue>,
    },
    WhileStatement {
        negative: bool,
        cond: Rc<AvmcQueue>,
        body: Rc<AvmcQueue>,
    },
    ForEachStatement {
        sp: Rc<ForEachParams>,
    },
    ForStatement {
        sp: Rc<ForParams>,
    },
    TryStatement {
        sp: Rc<TryCatchParams>,
    },
    ThrowStatement,
    AssertStatement {
        message: Rc<str>,
    },
    SimpleStatus {
        status: AirStatus,
    },
    CheckArgument {
        by_ref: bool,
    },
    PushGlobalReference {
        name: String,
    },
    PushLocalReference {
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
        sp: Rc<FunctionParams>,
    },
    BranchExpression {
        negative: bool,
        true_branch: Rc<AvmcQueue>,
        false_branch: Rc<AvmcQueue>,
        assign: bool,
    },
    Coalescence {
        null_branch: Rc<AvmcQueue>,
        assign: bool,
    },
    FunctionCall {
        nargs: u32,
        ptc: PtcAware,
    },
    MemberAccess {
        name: String,
    },
    PushUnnamedArray {
        nelems: u32,
    },
    PushUnnamedObject {
        keys: Rc<[String]>,
    },
    ApplyOperator {
        xop: Xop,
        assign: bool,
    },
    UnpackStructArray {
        immutable: bool,
        nelems: u32,
    },
    UnpackStructObject {
        immutable: bool,
        keys: Rc<[String]>,
    },
    DefineNullVariable {
        immutable: bool,
        name: String,
    },
    SingleStepTrap,
    VariadicCall {
        ptc: PtcAware,
    },
    DeferExpression {
        sp: Rc<DeferParams>,
    },
    ImportCall {
        nargs: u32,
    },
    DeclareReference {
        name: String,
    },
    InitializeReference {
        name: String,
    },
    CatchExpression {
        body: Rc<AvmcQueue>,
    },
    ReturnStatement {
        by_ref: bool,
        is_void: bool,
    },
}

/// A finalized sequence of records.
///
/// Queues are append-only while being built; [`finalize`] freezes
/// them, after which records never move again and the queue may be
/// executed any number of times.
///
/// [`finalize`]: Self::finalize
#[derive(Debug, Default)]
pub struct AvmcQueue {
    ops: Vec<Op>,
    slocs: Vec<Option<SourceLocation>>,
    finalized: bool,
}

impl AvmcQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Appends one record.
    ///
    /// # Panics
    ///
    /// Panics if the queue has been finalized.
    pub fn append(&mut self, op: Op, sloc: Option<SourceLocation>) {
        assert!(!self.finalized, "appending to a finalized queue");
        self.ops.push(op);
        self.slocs.push(sloc);
    }

    /// Freezes the queue.
    pub fn finalize(&mut self) {
        self.ops.shrink_to_fit();
        self.slocs.shrink_to_fit();
        self.finalized = true;
    }

    /// Walks the records in order, dispatching executors until one of
    /// them reports something other than "advance".
    pub fn execute(&self, ctx: &mut ExecutiveContext<'_>) -> Result<AirStatus, RuntimeError> {
        debug_assert!(self.finalized || self.ops.is_empty());
        for (op, sloc) in self.ops.iter().zip(&self.slocs) {
            let status = vm::execute_op(op, sloc.as_ref(), ctx)?;
            if status != AirStatus::Next {
                return Ok(status);
            }
        }
        Ok(AirStatus::Next)
    }

    /// Reports every variable captured inside this queue, such as
    /// bound references and function values in literals.
    pub(crate) fn enumerate_variables(&self, callback: &mut dyn FnMut(&Rc<Variable>)) {
        for op in &self.ops {
            match op {
                Op::ExecuteBlock { body } | Op::CatchExpression { body } => {
                    body.enumerate_variables(callback);
                }
                Op::IfStatement {
                    true_branch,
                    false_branch,
                    ..
                }
                | Op::BranchExpression {
                    true_branch,
                    false_branch,
                    ..
                } => {
                    true_branch.enumerate_variables(callback);
                    false_branch.enumerate_variables(callback);
                }
                Op::SwitchStatement { clauses } => {
                    for clause in clauses.iter() {
                        if let Some(label) = &clause.label {
                            label.enumerate_variables(callback);
                        }
                        clause.body.enumerate_variables(callback);
                    }
                }
                Op::DoWhileStatement { body, cond, .. }
                | Op::WhileStatement { cond, body, .. } => {
                    cond.enumerate_variables(callback);
                    body.enumerate_variables(callback);
                }
                Op::ForEachStatement { sp } => {
                    sp.init.enumerate_variables(callback);
                    sp.body.enumerate_variables(callback);
                }
                Op::ForStatement { sp } => {
                    sp.init.enumerate_variables(callback);
                    sp.cond.enumerate_variables(callback);
                    sp.step.enumerate_variables(callback);
                    sp.body.enumerate_variables(callback);
                }
                Op::TryStatement { sp } => {
                    sp.try_body.enumerate_variables(callback);
                    sp.catch_body.enumerate_variables(callback);
                }
                Op::Coalescence { null_branch, .. } => {
                    null_branch.enumerate_variables(callback);
                }
                Op::PushBoundReference { reference } => {
                    reference.enumerate_variables(callback);
                }
                Op::PushTemporary { value } => {
                    value.enumerate_variables(callback);
                }
                Op::DefineFunction { sp } => {
                    for node in &sp.body {
                        node.enumerate_variables(callback);
                    }
                }
                Op::DeferExpression { sp } => {
                    for node in &sp.body {
                        node.enumerate_variables(callback);
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "finalized")]
    fn finalized_queues_reject_appends() {
        let mut queue = AvmcQueue::new();
        queue.append(Op::ClearStack, None);
        queue.finalize();
        queue.append(Op::ClearStack, None);
    }

    #[test]
    fn records_keep_their_parallel_locations() {
        let mut queue = AvmcQueue::new();
        queue.append(Op::ClearStack, None);
        queue.append(
            Op::SingleStepTrap,
            Some(SourceLocation::new("q.as", 4, 2)),
        );
        queue.finalize();
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }
}
