//! Executive contexts: the runtime scope chain of one invocation.
//!
//! A context owns the operand stack, the alternate stack used for
//! argument marshaling, and a stack of scopes. Each scope maps names
//! to references and carries the deferred expressions registered in
//! it. Scope chains never cross function boundaries; every invocation
//! builds its own context.

use std::rc::Rc;

use kempt::Map;

use crate::air::queue::AvmcQueue;
use crate::runtime::error::RuntimeError;
use crate::runtime::function::VariadicArguer;
use crate::runtime::global::GlobalContext;
use crate::runtime::reference::Reference;
use crate::runtime::stack::ReferenceStack;
use crate::runtime::value::Value;
use crate::source::SourceLocation;
use crate::vm::AirStatus;

/// A deferred expression: a solidified subqueue to run at scope exit.
#[derive(Debug, Clone)]
pub struct DeferredExpression {
    pub sloc: SourceLocation,
    pub queue: Rc<AvmcQueue>,
}

/// One lexical scope's runtime bindings.
#[derive(Debug, Default)]
pub struct Scope {
    names: Map<String, Reference>,
    defers: Vec<DeferredExpression>,
}

impl Scope {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Reference> {
        self.names.get(name)
    }
}

/// The runtime scope chain of one function invocation or one plain
/// execution.
#[derive(Debug)]
pub struct ExecutiveContext<'g> {
    global: &'g mut GlobalContext,
    stack: ReferenceStack,
    alt_stack: ReferenceStack,
    scopes: Vec<Scope>,
}

impl<'g> ExecutiveContext<'g> {
    /// Returns a context with a single anonymous scope, for running
    /// code that is not a function body, such as deferred expressions
    /// of a resolved tail call.
    pub fn new_plain(global: &'g mut GlobalContext) -> Self {
        Self {
            global,
            stack: ReferenceStack::new(),
            alt_stack: ReferenceStack::new(),
            scopes: vec![Scope::default()],
        }
    }

    /// Returns a context for invoking a function body.
    ///
    /// Arguments are popped off `args` and bound to `params` left to
    /// right. A `...` parameter collects the surplus as variadic
    /// arguments; without it, surplus arguments are an error.
    pub fn new_function(
        global: &'g mut GlobalContext,
        func: String,
        sloc: SourceLocation,
        params: &[String],
        args: &mut ReferenceStack,
        self_ref: &Reference,
    ) -> Result<Self, RuntimeError> {
        let mut ctx = Self {
            global,
            stack: ReferenceStack::new(),
            alt_stack: ReferenceStack::new(),
            scopes: vec![Scope::default()],
        };

        // Arguments were pushed left to right, so the first parameter
        // binds the reference deepest in the stack.
        let mut arg_counter = args.size();
        let mut has_ellipsis = false;
        for param in params {
            if param == "..." {
                has_ellipsis = true;
                continue;
            }
            let slot = ctx.insert_named_reference(param);
            slot.set_temporary(Value::Null);
            if arg_counter != 0 {
                arg_counter -= 1;
                *slot = std::mem::take(args.mut_top(arg_counter));
            }
        }

        if !has_ellipsis && arg_counter != 0 {
            return Err(RuntimeError::native(
                sloc,
                format!("too many arguments passed to `{func}`"),
            ));
        }

        let mut variadics = Vec::with_capacity(arg_counter);
        while arg_counter != 0 {
            arg_counter -= 1;
            variadics.push(std::mem::take(args.mut_top(arg_counter)));
        }
        args.clear();

        // The pre-defined names are bound eagerly so that closures and
        // deferred expressions can capture them during rebinding.
        let this = match self_ref.dereference_readonly() {
            Ok(value) => value,
            Err(_) => Value::Null,
        };
        if self_ref.is_variable() {
            *ctx.insert_named_reference("__this") = self_ref.clone();
        } else {
            ctx.insert_named_reference("__this").set_temporary(this);
        }
        ctx.insert_named_reference("__func")
            .set_temporary(Value::from(func.clone()));
        let arguer = Rc::new(VariadicArguer::new(sloc, func, variadics));
        ctx.insert_named_reference("__varg")
            .set_temporary(Value::Function(arguer));

        Ok(ctx)
    }

    pub fn global(&self) -> &GlobalContext {
        self.global
    }

    pub fn global_mut(&mut self) -> &mut GlobalContext {
        self.global
    }

    #[must_use]
    pub fn stack(&self) -> &ReferenceStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ReferenceStack {
        &mut self.stack
    }

    pub fn alt_stack_mut(&mut self) -> &mut ReferenceStack {
        &mut self.alt_stack
    }

    /// Returns both stacks, for call sites that marshal arguments from
    /// one into the other.
    pub fn stacks_mut(&mut self) -> (&mut ReferenceStack, &mut ReferenceStack) {
        (&mut self.stack, &mut self.alt_stack)
    }

    #[must_use]
    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// The scope chain from outermost to innermost, for rebinding.
    pub(crate) fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Creates or resets a named slot in the innermost scope.
    pub fn insert_named_reference(&mut self, name: &str) -> &mut Reference {
        let scope = self.scopes.last_mut().expect("at least one scope");
        scope
            .names
            .entry(name.to_owned())
            .or_insert_with(Reference::default)
    }

    /// Looks up a name `depth` scopes above the innermost one. The
    /// pre-defined names resolve like any other: a function context
    /// binds them in its root scope on construction.
    #[must_use]
    pub fn local_reference(&self, depth: usize, name: &str) -> Option<&Reference> {
        let index = self.scopes.len().checked_sub(depth + 1)?;
        self.scopes[index].names.get(name)
    }

    /// Like [`local_reference`](Self::local_reference), but mutable.
    pub fn mut_local_reference(&mut self, depth: usize, name: &str) -> Option<&mut Reference> {
        let index = self.scopes.len().checked_sub(depth + 1)?;
        self.scopes[index].names.get_mut(name)
    }

    /// Attaches a deferred expression to the innermost scope.
    pub fn defer_expression(&mut self, sloc: SourceLocation, queue: Rc<AvmcQueue>) {
        let scope = self.scopes.last_mut().expect("at least one scope");
        scope.defers.push(DeferredExpression { sloc, queue });
    }

    /// Leaves the innermost scope after normal completion.
    ///
    /// Deferred expressions run newest first. If the scope is exiting
    /// with a pending tail call on top of the stack, the deferred
    /// expressions are handed to the wrapper instead, to run once the
    /// chain resolves.
    pub fn exit_scope_normal(&mut self, status: AirStatus) -> Result<(), RuntimeError> {
        if status == AirStatus::ReturnRef && !self.stack.is_empty() && self.stack.top(0).is_ptc() {
            let defers = std::mem::take(
                &mut self.scopes.last_mut().expect("at least one scope").defers,
            );
            if let crate::runtime::reference::ReferenceRoot::Ptc(ptc) = self.stack.top(0).root() {
                ptc.borrow_mut().append_defers(defers);
            }
            self.scopes.pop();
            return Ok(());
        }

        // Stash the result so the deferred expressions cannot disturb
        // it, then restore it.
        let stashed = (status == AirStatus::ReturnRef).then(|| self.stack.take_top());
        let result = self.run_defers();
        self.scopes.pop();
        result?;
        if let Some(reference) = stashed {
            *self.stack.push() = reference;
        }
        Ok(())
    }

    /// Leaves the innermost scope while an error is propagating.
    /// Deferred expressions still run newest first; an error raised by
    /// one of them replaces the in-flight error.
    pub fn exit_scope_exceptional(&mut self, error: &mut RuntimeError) {
        loop {
            let scope = self.scopes.last_mut().expect("at least one scope");
            let Some(defer) = scope.defers.pop() else {
                break;
            };
            if let Err(nested) = defer.queue.execute(self) {
                *error = nested;
                error.push_frame_defer(defer.sloc);
            }
        }
        self.scopes.pop();
    }

    fn run_defers(&mut self) -> Result<(), RuntimeError> {
        loop {
            let scope = self.scopes.last_mut().expect("at least one scope");
            let Some(defer) = scope.defers.pop() else {
                return Ok(());
            };
            if let Err(mut error) = defer.queue.execute(self) {
                error.push_frame_defer(defer.sloc);
                // The remaining deferred expressions still run.
                loop {
                    let scope = self.scopes.last_mut().expect("at least one scope");
                    let Some(defer) = scope.defers.pop() else {
                        break;
                    };
                    if let Err(nested) = defer.queue.execute(self) {
                        error = nested;
                        error.push_frame_defer(defer.sloc);
                    }
                }
                return Err(error);
            }
        }
    }
}
