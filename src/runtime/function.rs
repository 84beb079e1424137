//! Callable values: script functions, host functions, and the
//! machinery behind proper tail calls.

use std::fmt::{self, Debug};
use std::rc::Rc;

use crate::air::queue::AvmcQueue;
use crate::runtime::context::{DeferredExpression, ExecutiveContext};
use crate::runtime::error::RuntimeError;
use crate::runtime::global::GlobalContext;
use crate::runtime::reference::Reference;
use crate::runtime::stack::ReferenceStack;
use crate::runtime::value::Value;
use crate::runtime::variable::Variable;
use crate::source::SourceLocation;
use crate::vm::{self, AirStatus};

/// How a call site relates to its enclosing function's return.
///
/// Anything but [`None`](Self::None) marks a tail call; the variants
/// record how the eventual result is to be converted once the
/// trampoline resolves the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtcAware {
    /// An ordinary call: invoke synchronously.
    None,
    /// `return f();` — the result collapses to a temporary value.
    ByValue,
    /// `return ref f();` — the result reference is passed through.
    ByRef,
    /// The result is discarded.
    Void,
}

/// A packed pending tail call.
///
/// The argument stack holds the positional arguments with the `self`
/// reference pushed on top. Deferred expressions of scopes that exited
/// through this wrapper accumulate here and run once the chain
/// resolves.
pub struct PtcArguments {
    sloc: SourceLocation,
    ptc: PtcAware,
    target: FunctionValue,
    stack: ReferenceStack,
    defers: Vec<DeferredExpression>,
}

impl PtcArguments {
    #[must_use]
    pub fn new(
        sloc: SourceLocation,
        ptc: PtcAware,
        target: FunctionValue,
        stack: ReferenceStack,
    ) -> Self {
        Self {
            sloc,
            ptc,
            target,
            stack,
            defers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn sloc(&self) -> &SourceLocation {
        &self.sloc
    }

    #[must_use]
    pub const fn ptc_aware(&self) -> PtcAware {
        self.ptc
    }

    #[must_use]
    pub const fn target(&self) -> &FunctionValue {
        &self.target
    }

    pub(crate) fn stack_mut(&mut self) -> &mut ReferenceStack {
        &mut self.stack
    }

    pub(crate) fn append_defers(&mut self, defers: impl IntoIterator<Item = DeferredExpression>) {
        self.defers.extend(defers);
    }

    pub(crate) fn take_defers(&mut self) -> Vec<DeferredExpression> {
        std::mem::take(&mut self.defers)
    }

    pub(crate) fn into_parts(self) -> (SourceLocation, PtcAware, FunctionValue, ReferenceStack, Vec<DeferredExpression>) {
        (self.sloc, self.ptc, self.target, self.stack, self.defers)
    }

    pub(crate) fn enumerate_variables(&self, callback: &mut dyn FnMut(&Rc<Variable>)) {
        self.stack.enumerate_variables(callback);
        for defer in &self.defers {
            defer.queue.enumerate_variables(callback);
        }
    }
}

impl Debug for PtcArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtcArguments")
            .field("sloc", &self.sloc)
            .field("ptc", &self.ptc)
            .field("target", &self.target.name())
            .field("nargs", &self.stack.size())
            .finish_non_exhaustive()
    }
}

/// The contract of anything a `function` value can hold.
///
/// `invoke_ptc_aware` runs the body and leaves the result in
/// `self_ref`; the result may itself be a pending tail call, which
/// makes the caller responsible for running the trampoline. Host
/// boundaries use [`invoke`], which resolves pending calls before
/// returning.
pub trait Callable: Debug {
    /// A human-readable designation such as `` `loop(n)` ``.
    fn name(&self) -> &str;

    /// Where the function was defined, if anywhere.
    fn sloc(&self) -> SourceLocation {
        SourceLocation::unknown()
    }

    /// Invokes the function. On entry `self_ref` holds the `self`
    /// reference; on return it holds the result, possibly a pending
    /// tail call.
    fn invoke_ptc_aware(
        &self,
        self_ref: &mut Reference,
        global: &mut GlobalContext,
        args: &mut ReferenceStack,
    ) -> Result<(), RuntimeError>;

    /// Reports variables captured by this function.
    fn enumerate_variables(&self, _callback: &mut dyn FnMut(&Rc<Variable>)) {}
}

/// A shared handle to a callable.
pub type FunctionValue = Rc<dyn Callable>;

/// Invokes `target` from a host boundary: any tail-call chain the body
/// produces is resolved before this returns.
pub fn invoke(
    target: &FunctionValue,
    self_ref: &mut Reference,
    global: &mut GlobalContext,
    args: &mut ReferenceStack,
) -> Result<(), RuntimeError> {
    target.invoke_ptc_aware(self_ref, global, args)?;
    vm::unpack_tail_calls(self_ref, global)
}

/// A function compiled from IR: a solidified body plus its parameter
/// list.
#[derive(Debug)]
pub struct InstantiatedFunction {
    sloc: SourceLocation,
    name: String,
    params: Vec<String>,
    body: AvmcQueue,
}

impl InstantiatedFunction {
    #[must_use]
    pub fn new(sloc: SourceLocation, name: String, params: Vec<String>, body: AvmcQueue) -> Self {
        Self {
            sloc,
            name,
            params,
            body,
        }
    }

    fn do_invoke(
        &self,
        self_ref: &mut Reference,
        global: &mut GlobalContext,
        args: &mut ReferenceStack,
    ) -> Result<(), RuntimeError> {
        let mut ctx = ExecutiveContext::new_function(
            global,
            self.name.clone(),
            self.sloc.clone(),
            &self.params,
            args,
            self_ref,
        )?;

        let status = match self.body.execute(&mut ctx) {
            Ok(status) => status,
            Err(mut error) => {
                ctx.exit_scope_exceptional(&mut error);
                return Err(error);
            }
        };
        ctx.exit_scope_normal(status)?;

        match status {
            AirStatus::ReturnRef => {
                *self_ref = ctx.stack_mut().take_top();
            }
            AirStatus::Next | AirStatus::ReturnVoid => {
                self_ref.set_void();
            }
            other => {
                return Err(RuntimeError::native(
                    self.sloc.clone(),
                    format!("stray control-flow status `{other:?}` escaped a function body"),
                ))
            }
        }
        Ok(())
    }
}

impl Callable for InstantiatedFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn sloc(&self) -> SourceLocation {
        self.sloc.clone()
    }

    fn invoke_ptc_aware(
        &self,
        self_ref: &mut Reference,
        global: &mut GlobalContext,
        args: &mut ReferenceStack,
    ) -> Result<(), RuntimeError> {
        global.enter_recursion(&self.sloc)?;
        let result = self.do_invoke(self_ref, global, args);
        global.leave_recursion();
        result.map_err(|mut error| {
            error.push_frame_func(self.sloc.clone(), &self.name);
            error
        })
    }

    fn enumerate_variables(&self, callback: &mut dyn FnMut(&Rc<Variable>)) {
        self.body.enumerate_variables(callback);
    }
}

/// A function implemented by the embedder.
pub struct HostFunction {
    name: String,
    body: Box<
        dyn Fn(&mut Reference, &mut GlobalContext, &mut ReferenceStack) -> Result<(), RuntimeError>,
    >,
}

impl HostFunction {
    /// Wraps `body` as a function value named `name`.
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&mut Reference, &mut GlobalContext, &mut ReferenceStack) -> Result<(), RuntimeError>
            + 'static,
    ) -> FunctionValue {
        Rc::new(Self {
            name: name.into(),
            body: Box::new(body),
        })
    }
}

impl Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Callable for HostFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke_ptc_aware(
        &self,
        self_ref: &mut Reference,
        global: &mut GlobalContext,
        args: &mut ReferenceStack,
    ) -> Result<(), RuntimeError> {
        (self.body)(self_ref, global, args)
    }
}

/// The implementation behind the pre-defined `__varg` name: called
/// with no arguments it reports the number of variadic arguments, and
/// called with an index it returns that argument.
///
/// This shape doubles as a valid generator for variadic calls.
#[derive(Debug)]
pub struct VariadicArguer {
    sloc: SourceLocation,
    func: String,
    args: Vec<Reference>,
}

impl VariadicArguer {
    #[must_use]
    pub fn new(sloc: SourceLocation, func: String, args: Vec<Reference>) -> Self {
        Self { sloc, func, args }
    }
}

impl Callable for VariadicArguer {
    fn name(&self) -> &str {
        "__varg"
    }

    fn sloc(&self) -> SourceLocation {
        self.sloc.clone()
    }

    fn invoke_ptc_aware(
        &self,
        self_ref: &mut Reference,
        _global: &mut GlobalContext,
        args: &mut ReferenceStack,
    ) -> Result<(), RuntimeError> {
        match args.size() {
            0 => {
                let count = i64::try_from(self.args.len()).expect("argument count");
                self_ref.set_temporary(Value::Int(count));
                Ok(())
            }
            1 => {
                let index = args.top(0).dereference_readonly()?;
                let Some(index) = index.as_int() else {
                    return Err(RuntimeError::native(
                        self.sloc.clone(),
                        format!(
                            "variadic argument index must be an integer (received `{index}`)"
                        ),
                    ));
                };
                match usize::try_from(index).ok().and_then(|i| self.args.get(i)) {
                    Some(arg) => *self_ref = arg.clone(),
                    None => {
                        self_ref.set_temporary(Value::Null);
                    }
                }
                Ok(())
            }
            nargs => Err(RuntimeError::native(
                self.sloc.clone(),
                format!("`__varg` of `{}` accepts at most one argument (received {nargs})", self.func),
            )),
        }
    }

    fn enumerate_variables(&self, callback: &mut dyn FnMut(&Rc<Variable>)) {
        for arg in &self.args {
            arg.enumerate_variables(callback);
        }
    }
}
