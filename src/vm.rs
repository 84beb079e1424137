//! The execution engine.
//!
//! Executors walk finalized queues against an executive context. Each
//! record reports a [`AirStatus`]: "advance" keeps walking, anything
//! else propagates to the enclosing construct, which either consumes
//! it (loops eat their own break and continue statuses) or forwards
//! it further out. Runtime errors travel on the `Err` path and run
//! deferred expressions as they unwind.

use std::cell::RefCell;
use std::rc::Rc;

use crate::air::node;
use crate::air::queue::{AvmcQueue, Op, TryCatchParams};
use crate::optimizer;
use crate::runtime::context::{DeferredExpression, ExecutiveContext};
use crate::runtime::error::RuntimeError;
use crate::runtime::function::{
    self, FunctionValue, InstantiatedFunction, PtcArguments, PtcAware,
};
use crate::runtime::global::GlobalContext;
use crate::runtime::reference::{Modifier, Reference};
use crate::runtime::stack::ReferenceStack;
use crate::runtime::value::{Array, Compare, Object, Value};
use crate::source::SourceLocation;

pub mod ops;

/// The result of executing one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AirStatus {
    /// Continue with the next record.
    Next,
    ReturnVoid,
    ReturnRef,
    BreakUnspec,
    BreakWhile,
    BreakSwitch,
    BreakFor,
    ContinueUnspec,
    ContinueWhile,
    ContinueFor,
}

fn sloc_of(sloc: Option<&SourceLocation>) -> SourceLocation {
    sloc.cloned().unwrap_or_default()
}

/// Runs a queue as a block: inside a fresh scope, with scope-exit
/// handling on both the normal and the unwinding path.
pub(crate) fn do_execute_block(
    queue: &AvmcQueue,
    ctx: &mut ExecutiveContext<'_>,
) -> Result<AirStatus, RuntimeError> {
    ctx.open_scope();
    match queue.execute(ctx) {
        Ok(status) => {
            ctx.exit_scope_normal(status)?;
            Ok(status)
        }
        Err(mut error) => {
            ctx.exit_scope_exceptional(&mut error);
            Err(error)
        }
    }
}

/// Evaluates the sub-queue of a branch. With an empty queue the
/// branch value is whatever is on the stack already. Without `assign`
/// the status is forwarded as is, because a pending tail call inside
/// the branch must reach the function boundary.
fn do_evaluate_subexpression(
    ctx: &mut ExecutiveContext<'_>,
    assign: bool,
    queue: &AvmcQueue,
) -> Result<AirStatus, RuntimeError> {
    if queue.is_empty() {
        return Ok(AirStatus::Next);
    }
    if !assign {
        ctx.stack_mut().pop(1);
        return queue.execute(ctx);
    }
    let status = queue.execute(ctx)?;
    debug_assert_eq!(status, AirStatus::Next);
    let value = ctx.stack().top(0).dereference_readonly()?;
    ctx.stack_mut().pop(1);
    ctx.stack_mut().mut_top(0).dereference_mutable(|slot| {
        *slot = value;
        Ok(())
    })?;
    Ok(AirStatus::Next)
}

/// Moves the top `count` references into the alternate stack,
/// restoring their left-to-right order.
fn do_pop_positional_arguments(ctx: &mut ExecutiveContext<'_>, count: usize) {
    let (stack, alt) = ctx.stacks_mut();
    alt.clear();
    let mut remaining = count;
    while remaining != 0 {
        remaining -= 1;
        *alt.push() = std::mem::take(stack.mut_top(remaining));
    }
    stack.pop(count);
}

fn do_invoke_nontail(
    ctx: &mut ExecutiveContext<'_>,
    sloc: &SourceLocation,
    target: &FunctionValue,
) -> Result<AirStatus, RuntimeError> {
    if let Some(hooks) = ctx.global().hooks() {
        hooks.on_function_call(sloc, target)?;
    }
    let mut self_ref = std::mem::take(ctx.stack_mut().mut_top(0));
    let mut args = std::mem::take(ctx.alt_stack_mut());
    let result = target
        .invoke_ptc_aware(&mut self_ref, ctx.global_mut(), &mut args)
        .and_then(|()| unpack_tail_calls(&mut self_ref, ctx.global_mut()));
    *ctx.alt_stack_mut() = args;
    match result {
        Ok(()) => {
            if let Some(hooks) = ctx.global().hooks() {
                hooks.on_function_return(sloc, target, &self_ref)?;
            }
            *ctx.stack_mut().mut_top(0) = self_ref;
            Ok(AirStatus::Next)
        }
        Err(error) => {
            if let Some(hooks) = ctx.global().hooks() {
                // Already unwinding; the hook cannot override that.
                let _ = hooks.on_function_except(sloc, target, &error);
            }
            Err(error)
        }
    }
}

fn do_invoke_tail(
    ctx: &mut ExecutiveContext<'_>,
    sloc: &SourceLocation,
    target: &FunctionValue,
    ptc: PtcAware,
) -> Result<AirStatus, RuntimeError> {
    // Pack the arguments with the self reference on top and leave the
    // wrapper for the trampoline; the caller's frame unwinds before
    // the call happens.
    let self_ref = std::mem::take(ctx.stack_mut().mut_top(0));
    let mut stack = std::mem::take(ctx.alt_stack_mut());
    *stack.push() = self_ref;
    let wrapper = PtcArguments::new(sloc.clone(), ptc, target.clone(), stack);
    ctx.stack_mut()
        .mut_top(0)
        .set_ptc(Rc::new(RefCell::new(wrapper)));
    Ok(AirStatus::ReturnRef)
}

/// Dispatches a call whose arguments are already marshaled into the
/// alternate stack and whose target reference is on top of the
/// operand stack.
fn do_dispatch_function_call(
    ctx: &mut ExecutiveContext<'_>,
    sloc: &SourceLocation,
    ptc: PtcAware,
) -> Result<AirStatus, RuntimeError> {
    let value = ctx.stack().top(0).dereference_readonly()?;
    let target = match &value {
        Value::Null => {
            return Err(RuntimeError::native(sloc.clone(), "target function not found"))
        }
        Value::Function(target) => target.clone(),
        other => {
            return Err(RuntimeError::native(
                sloc.clone(),
                format!("target value not a function (value `{other}`)"),
            ))
        }
    };
    ctx.stack_mut().mut_top(0).pop_modifier();
    ctx.stack_mut().clear_cache();
    ctx.alt_stack_mut().clear_cache();

    if ptc == PtcAware::None {
        do_invoke_nontail(ctx, sloc, &target)
    } else {
        do_invoke_tail(ctx, sloc, &target, ptc)
    }
}

/// The trampoline: repeatedly performs pending tail calls until the
/// reference holds a final result, then runs the deferred expressions
/// the unwound scopes handed over, then applies result conversions.
pub(crate) fn unpack_tail_calls(
    self_ref: &mut Reference,
    global: &mut GlobalContext,
) -> Result<(), RuntimeError> {
    if !self_ref.is_ptc() {
        return Ok(());
    }
    let mut modes: Vec<PtcAware> = Vec::new();
    let mut defers: Vec<DeferredExpression> = Vec::new();
    let mut failure: Option<RuntimeError> = None;

    while let Some(shared) = self_ref.take_ptc() {
        let wrapper = match Rc::try_unwrap(shared) {
            Ok(cell) => cell.into_inner(),
            Err(_) => {
                failure = Some(RuntimeError::plain(
                    "pending tail call is shared and cannot be performed",
                ));
                break;
            }
        };
        let (sloc, mode, target, mut stack, wrapper_defers) = wrapper.into_parts();
        modes.push(mode);
        defers.extend(wrapper_defers);

        let mut callee_self = stack.take_top();
        if let Some(hooks) = global.hooks() {
            if let Err(error) = hooks.on_function_call(&sloc, &target) {
                failure = Some(error);
                break;
            }
        }
        match target.invoke_ptc_aware(&mut callee_self, global, &mut stack) {
            Ok(()) => {
                *self_ref = callee_self;
                if !self_ref.is_ptc() {
                    if let Some(hooks) = global.hooks() {
                        if let Err(error) = hooks.on_function_return(&sloc, &target, self_ref) {
                            failure = Some(error);
                            break;
                        }
                    }
                }
            }
            Err(mut error) => {
                error.push_frame_call(sloc.clone(), target.name());
                if let Some(hooks) = global.hooks() {
                    let _ = hooks.on_function_except(&sloc, &target, &error);
                }
                failure = Some(error);
                break;
            }
        }
    }

    // Deferred expressions of the unwound scopes run now, newest
    // first, regardless of how the chain ended.
    for defer in defers.into_iter().rev() {
        let mut ctx = ExecutiveContext::new_plain(global);
        if let Err(mut error) = defer.queue.execute(&mut ctx) {
            error.push_frame_defer(defer.sloc.clone());
            failure = Some(error);
        }
    }
    if let Some(error) = failure {
        return Err(error);
    }

    // Result conversions apply outward.
    for mode in modes.into_iter().rev() {
        match mode {
            PtcAware::ByValue => {
                if !self_ref.is_void() {
                    let value = self_ref.dereference_readonly()?;
                    self_ref.set_temporary(value);
                }
            }
            PtcAware::Void => {
                self_ref.set_void();
            }
            PtcAware::ByRef | PtcAware::None => {}
        }
    }
    Ok(())
}

fn build_backtrace(error: &RuntimeError) -> Array {
    error
        .frames()
        .iter()
        .map(|frame| {
            let mut record = Object::new();
            record.insert("frame".to_owned(), Value::from(frame.kind().name()));
            record.insert("file".to_owned(), Value::from(frame.sloc().file()));
            record.insert("line".to_owned(), Value::Int(i64::from(frame.sloc().line())));
            record.insert(
                "column".to_owned(),
                Value::Int(i64::from(frame.sloc().column())),
            );
            record.insert("value".to_owned(), frame.value().clone());
            Value::Object(record)
        })
        .collect()
}

fn do_handle_catch(
    ctx: &mut ExecutiveContext<'_>,
    sp: &TryCatchParams,
    mut except: RuntimeError,
) -> Result<AirStatus, RuntimeError> {
    except.push_frame_try(sp.sloc_try.clone());

    ctx.open_scope();
    ctx.insert_named_reference(&sp.name_except)
        .set_temporary(except.value().clone());
    ctx.insert_named_reference("__backtrace")
        .set_temporary(Value::Array(build_backtrace(&except)));
    match sp.catch_body.execute(ctx) {
        Ok(status) => {
            ctx.exit_scope_normal(status)?;
            Ok(status)
        }
        Err(mut nested) => {
            ctx.exit_scope_exceptional(&mut nested);
            nested.push_frame_catch(sp.sloc_catch.clone(), except.value().clone());
            Err(nested)
        }
    }
}

fn do_for_loop(
    ctx: &mut ExecutiveContext<'_>,
    sp: &crate::air::queue::ForParams,
) -> Result<AirStatus, RuntimeError> {
    let status = sp.init.execute(ctx)?;
    debug_assert_eq!(status, AirStatus::Next);
    loop {
        // An empty condition makes the loop infinite.
        if !sp.cond.is_empty() {
            sp.cond.execute(ctx)?;
            let test = ctx.stack().top(0).dereference_readonly()?.test();
            ctx.stack_mut().pop(1);
            if !test {
                break;
            }
        }
        let status = do_execute_block(&sp.body, ctx)?;
        match status {
            AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueFor => {}
            AirStatus::BreakUnspec | AirStatus::BreakFor => break,
            other => return Ok(other),
        }
        sp.step.execute(ctx)?;
    }
    Ok(AirStatus::Next)
}

fn do_for_each_loop(
    ctx: &mut ExecutiveContext<'_>,
    sp: &crate::air::queue::ForEachParams,
) -> Result<AirStatus, RuntimeError> {
    let status = sp.init.execute(ctx)?;
    debug_assert_eq!(status, AirStatus::Next);

    // The range and key bindings outlast every iteration, so they
    // live in this scope rather than on the stack.
    let range_ref = ctx.stack_mut().take_top();
    let range = range_ref.dereference_readonly()?;
    *ctx.insert_named_reference(&sp.value_name) = range_ref;
    let key_var = ctx.global_mut().create_variable();
    ctx.insert_named_reference(&sp.key_name)
        .set_variable(key_var.clone());

    enum Key {
        Index(i64),
        Name(String),
    }
    let keys: Vec<Key> = match &range {
        Value::Null => return Ok(AirStatus::Next),
        Value::Array(array) => (0..array.len())
            .map(|i| Key::Index(i64::try_from(i).expect("array length")))
            .collect(),
        Value::Object(object) => object.keys().cloned().map(Key::Name).collect(),
        other => {
            return Err(RuntimeError::native(
                sp.sloc_init.clone(),
                format!("range value not iterable (range `{other}`)"),
            ))
        }
    };

    for key in keys {
        let modifier = match key {
            Key::Index(index) => {
                key_var.initialize(Value::Int(index), true);
                Modifier::ArrayIndex(index)
            }
            Key::Name(name) => {
                key_var.initialize(Value::from(name.clone()), true);
                Modifier::ObjectKey(name)
            }
        };
        let mapped = ctx
            .mut_local_reference(0, &sp.value_name)
            .expect("range binding");
        mapped.push_modifier(modifier);
        mapped.dereference_readonly()?;

        let status = do_execute_block(&sp.body, ctx);
        if let Some(mapped) = ctx.mut_local_reference(0, &sp.value_name) {
            mapped.pop_modifier();
        }
        match status? {
            AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueFor => {}
            AirStatus::BreakUnspec | AirStatus::BreakFor => break,
            other => return Ok(other),
        }
    }
    Ok(AirStatus::Next)
}

fn do_import_call(
    ctx: &mut ExecutiveContext<'_>,
    sloc: &SourceLocation,
    nargs: usize,
) -> Result<AirStatus, RuntimeError> {
    if nargs == 0 {
        return Err(RuntimeError::native(sloc.clone(), "no module path specified"));
    }
    do_pop_positional_arguments(ctx, nargs - 1);

    let path_value = ctx.stack().top(0).dereference_readonly()?;
    let path = match path_value.as_str() {
        Some(path) if !path.is_empty() => path.to_owned(),
        _ => {
            return Err(RuntimeError::native(
                sloc.clone(),
                format!("import path must be a non-empty string (value `{path_value}`)"),
            ))
        }
    };

    let resolved = ctx.global().loader().resolve(sloc, &path)?;
    let source = std::fs::read_to_string(&resolved).map_err(|error| {
        RuntimeError::native(
            sloc.clone(),
            format!("could not read module `{}`: {error}", resolved.display()),
        )
    })?;
    let Some(parser) = ctx.global().loader().parser() else {
        return Err(RuntimeError::native(
            sloc.clone(),
            "no module parser has been installed in this global context",
        ));
    };

    ctx.global_mut().loader_mut().lock_unique(sloc, &resolved)?;
    let outcome = (|| {
        let block = parser.parse(&source, &resolved)?;
        let name = resolved.display().to_string();
        let function =
            optimizer::reload(ctx.global_mut(), &name, &["...".to_owned()], &block)
                .map_err(|error| {
                    RuntimeError::native(
                        sloc.clone(),
                        format!("module `{name}` failed to compile: {error}"),
                    )
                })?;

        let mut self_ref = Reference::new_temporary(Value::Null);
        let mut args = std::mem::take(ctx.alt_stack_mut());
        let result = function::invoke(&function, &mut self_ref, ctx.global_mut(), &mut args);
        *ctx.alt_stack_mut() = args;
        result.map(|()| self_ref)
    })();
    ctx.global_mut().loader_mut().unlock(&resolved);

    *ctx.stack_mut().mut_top(0) = outcome?;
    Ok(AirStatus::Next)
}

fn do_variadic_expansion(
    ctx: &mut ExecutiveContext<'_>,
    sloc: &SourceLocation,
) -> Result<(), RuntimeError> {
    let source = ctx.stack_mut().take_top();
    let value = source.dereference_readonly()?;
    ctx.alt_stack_mut().clear();
    match value {
        Value::Null => Ok(()),
        Value::Array(array) => {
            for element in array {
                ctx.alt_stack_mut().push().set_temporary(element);
            }
            Ok(())
        }
        Value::Function(generator) => {
            // The generator is called once to obtain the count, then
            // once per index to produce each argument.
            let mut gen_self = Reference::new_temporary(Value::Null);
            let mut gen_args = ReferenceStack::new();
            function::invoke(&generator, &mut gen_self, ctx.global_mut(), &mut gen_args)?;
            let count_value = gen_self.dereference_readonly()?;
            let count = match count_value.as_int() {
                Some(count) if (0..=i64::from(i32::MAX)).contains(&count) => count,
                _ => {
                    return Err(RuntimeError::native(
                        sloc.clone(),
                        format!("variadic argument count invalid (value `{count_value}`)"),
                    ))
                }
            };
            for index in 0..count {
                let mut gen_self = Reference::new_temporary(Value::Null);
                let mut gen_args = ReferenceStack::new();
                gen_args.push().set_temporary(Value::Int(index));
                function::invoke(&generator, &mut gen_self, ctx.global_mut(), &mut gen_args)?;
                *ctx.alt_stack_mut().push() = gen_self;
            }
            Ok(())
        }
        other => Err(RuntimeError::native(
            sloc.clone(),
            format!("invalid variadic argument source (value `{other}`)"),
        )),
    }
}

/// Executes one record.
#[allow(clippy::too_many_lines)]
pub(crate) fn execute_op(
    op: &Op,
    sloc: Option<&SourceLocation>,
    ctx: &mut ExecutiveContext<'_>,
) -> Result<AirStatus, RuntimeError> {
    match op {
        Op::ClearStack => {
            ctx.stack_mut().clear();
            Ok(AirStatus::Next)
        }
        Op::ExecuteBlock { body } => do_execute_block(body, ctx),
        Op::DeclareVariable { name } => {
            let sloc = sloc_of(sloc);
            if let Some(hooks) = ctx.global().hooks() {
                hooks.on_variable_declare(&sloc, name)?;
            }
            let variable = ctx.global_mut().create_variable();
            ctx.insert_named_reference(name)
                .set_variable(variable.clone());
            ctx.stack_mut().push().set_variable(variable);
            Ok(AirStatus::Next)
        }
        Op::InitializeVariable { immutable } => {
            let value = ctx.stack().top(0).dereference_readonly()?;
            ctx.stack_mut().pop(1);
            let variable = ctx
                .stack()
                .top(0)
                .variable()
                .cloned()
                .expect("initialization target is a variable");
            variable.initialize(value, *immutable);
            ctx.stack_mut().pop(1);
            Ok(AirStatus::Next)
        }
        Op::IfStatement {
            negative,
            true_branch,
            false_branch,
        } => {
            let test = ctx.stack().top(0).dereference_readonly()?.test();
            ctx.stack_mut().pop(1);
            if test != *negative {
                do_execute_block(true_branch, ctx)
            } else {
                do_execute_block(false_branch, ctx)
            }
        }
        Op::SwitchStatement { clauses } => {
            let cond = ctx.stack().top(0).dereference_readonly()?;
            ctx.stack_mut().pop(1);

            let mut target = None;
            let mut default_index = None;
            for (index, clause) in clauses.iter().enumerate() {
                match &clause.label {
                    None => default_index = Some(index),
                    Some(label) => {
                        let status = label.execute(ctx)?;
                        debug_assert_eq!(status, AirStatus::Next);
                        let value = ctx.stack().top(0).dereference_readonly()?;
                        ctx.stack_mut().pop(1);
                        if cond.compare(&value) == Compare::Equal {
                            target = Some(index);
                            break;
                        }
                    }
                }
            }
            let Some(start) = target.or(default_index) else {
                return Ok(AirStatus::Next);
            };

            // One scope covers the whole body; names declared by the
            // clauses being jumped over exist but are bypassed.
            ctx.open_scope();
            for clause in &clauses[..start] {
                for name in &clause.names {
                    ctx.insert_named_reference(name).set_invalid();
                }
            }
            let mut final_status = AirStatus::Next;
            let mut failure = None;
            for clause in &clauses[start..] {
                match clause.body.execute(ctx) {
                    Ok(AirStatus::Next) => {}
                    Ok(AirStatus::BreakUnspec | AirStatus::BreakSwitch) => break,
                    Ok(other) => {
                        final_status = other;
                        break;
                    }
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }
            if let Some(mut error) = failure {
                ctx.exit_scope_exceptional(&mut error);
                return Err(error);
            }
            ctx.exit_scope_normal(final_status)?;
            Ok(final_status)
        }
        Op::DoWhileStatement {
            body,
            negative,
            cond,
        } => {
            loop {
                let status = do_execute_block(body, ctx)?;
                match status {
                    AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueWhile => {}
                    AirStatus::BreakUnspec | AirStatus::BreakWhile => break,
                    other => return Ok(other),
                }
                cond.execute(ctx)?;
                let test = ctx.stack().top(0).dereference_readonly()?.test();
                ctx.stack_mut().pop(1);
                if test == *negative {
                    break;
                }
            }
            Ok(AirStatus::Next)
        }
        Op::WhileStatement {
            negative,
            cond,
            body,
        } => {
            loop {
                cond.execute(ctx)?;
                let test = ctx.stack().top(0).dereference_readonly()?.test();
                ctx.stack_mut().pop(1);
                if test == *negative {
                    break;
                }
                let status = do_execute_block(body, ctx)?;
                match status {
                    AirStatus::Next | AirStatus::ContinueUnspec | AirStatus::ContinueWhile => {}
                    AirStatus::BreakUnspec | AirStatus::BreakWhile => break,
                    other => return Ok(other),
                }
            }
            Ok(AirStatus::Next)
        }
        Op::ForEachStatement { sp } => {
            ctx.open_scope();
            match do_for_each_loop(ctx, sp) {
                Ok(status) => {
                    ctx.exit_scope_normal(status)?;
                    Ok(status)
                }
                Err(mut error) => {
                    ctx.exit_scope_exceptional(&mut error);
                    Err(error)
                }
            }
        }
        Op::ForStatement { sp } => {
            ctx.open_scope();
            match do_for_loop(ctx, sp) {
                Ok(status) => {
                    ctx.exit_scope_normal(status)?;
                    Ok(status)
                }
                Err(mut error) => {
                    ctx.exit_scope_exceptional(&mut error);
                    Err(error)
                }
            }
        }
        Op::TryStatement { sp } => match do_execute_block(&sp.try_body, ctx) {
            Ok(status) => {
                if status == AirStatus::ReturnRef && ctx.stack().top(0).is_ptc() {
                    // A pending tail call must resolve here so that
                    // this `try` still observes its exceptions.
                    let mut self_ref = ctx.stack_mut().take_top();
                    match unpack_tail_calls(&mut self_ref, ctx.global_mut()) {
                        Ok(()) => {
                            *ctx.stack_mut().push() = self_ref;
                            Ok(status)
                        }
                        Err(error) => do_handle_catch(ctx, sp, error),
                    }
                } else {
                    Ok(status)
                }
            }
            Err(error) => do_handle_catch(ctx, sp, error),
        },
        Op::ThrowStatement => {
            let value = ctx.stack().top(0).dereference_readonly()?;
            Err(RuntimeError::new_throw(sloc_of(sloc), value))
        }
        Op::AssertStatement { message } => {
            if ctx.stack().top(0).dereference_readonly()?.test() {
                Ok(AirStatus::Next)
            } else {
                Err(RuntimeError::new_assert(sloc_of(sloc), message))
            }
        }
        Op::SimpleStatus { status } => {
            debug_assert_ne!(*status, AirStatus::Next);
            Ok(*status)
        }
        Op::CheckArgument { by_ref } => {
            if *by_ref {
                ctx.stack().top(0).dereference_readonly()?;
            } else {
                let value = ctx.stack().top(0).dereference_readonly()?;
                ctx.stack_mut().mut_top(0).set_temporary(value);
            }
            Ok(AirStatus::Next)
        }
        Op::PushGlobalReference { name } => {
            let reference = ctx
                .global()
                .get_named_reference(name)
                .cloned()
                .ok_or_else(|| {
                    RuntimeError::native(
                        sloc_of(sloc),
                        format!("undeclared identifier `{name}`"),
                    )
                })?;
            *ctx.stack_mut().push() = reference;
            Ok(AirStatus::Next)
        }
        Op::PushLocalReference { depth, name } => {
            let reference = ctx
                .local_reference(*depth as usize, name)
                .cloned()
                .ok_or_else(|| {
                    RuntimeError::native(
                        sloc_of(sloc),
                        format!("undeclared identifier `{name}`"),
                    )
                })?;
            *ctx.stack_mut().push() = reference;
            Ok(AirStatus::Next)
        }
        Op::PushBoundReference { reference } => {
            *ctx.stack_mut().push() = reference.clone();
            Ok(AirStatus::Next)
        }
        Op::PushTemporary { value } => {
            ctx.stack_mut().push().set_temporary(value.clone());
            Ok(AirStatus::Next)
        }
        Op::DefineFunction { sp } => {
            // The body is rebound against this very context; that is
            // what captures the function's surroundings.
            let mut body = sp.body.clone();
            optimizer::rebind_function_body(&mut body, ctx, &sp.params);
            let (queue, _) = node::solidify_nodes(&body);
            let function = InstantiatedFunction::new(
                sp.sloc.clone(),
                sp.name.clone(),
                sp.params.clone(),
                queue,
            );
            ctx.stack_mut()
                .push()
                .set_temporary(Value::Function(Rc::new(function)));
            Ok(AirStatus::Next)
        }
        Op::BranchExpression {
            negative,
            true_branch,
            false_branch,
            assign,
        } => {
            let test = ctx.stack().top(0).dereference_readonly()?.test();
            if test != *negative {
                do_evaluate_subexpression(ctx, *assign, true_branch)
            } else {
                do_evaluate_subexpression(ctx, *assign, false_branch)
            }
        }
        Op::Coalescence {
            null_branch,
            assign,
        } => {
            if ctx.stack().top(0).dereference_readonly()?.is_null() {
                do_evaluate_subexpression(ctx, *assign, null_branch)
            } else {
                Ok(AirStatus::Next)
            }
        }
        Op::FunctionCall { nargs, ptc } => {
            let sloc = sloc_of(sloc);
            if let Some(hooks) = ctx.global().hooks() {
                hooks.on_single_step_trap(&sloc)?;
            }
            do_pop_positional_arguments(ctx, *nargs as usize);
            do_dispatch_function_call(ctx, &sloc, *ptc)
        }
        Op::MemberAccess { name } => {
            ctx.stack_mut()
                .mut_top(0)
                .push_modifier(Modifier::ObjectKey(name.clone()));
            ctx.stack().top(0).dereference_readonly()?;
            Ok(AirStatus::Next)
        }
        Op::PushUnnamedArray { nelems } => {
            let mut array = vec![Value::Null; *nelems as usize];
            for slot in array.iter_mut().rev() {
                *slot = ctx.stack().top(0).dereference_readonly()?;
                ctx.stack_mut().pop(1);
            }
            ctx.stack_mut().push().set_temporary(Value::Array(array));
            Ok(AirStatus::Next)
        }
        Op::PushUnnamedObject { keys } => {
            let mut values = Vec::with_capacity(keys.len());
            for _ in 0..keys.len() {
                values.push(ctx.stack().top(0).dereference_readonly()?);
                ctx.stack_mut().pop(1);
            }
            values.reverse();
            let mut object = Object::with_capacity(keys.len());
            for (key, value) in keys.iter().zip(values) {
                // Duplicate keys keep their first position; the last
                // value takes precedence.
                object.insert(key.clone(), value);
            }
            ctx.stack_mut().push().set_temporary(Value::Object(object));
            Ok(AirStatus::Next)
        }
        Op::ApplyOperator { xop, assign } => {
            let sloc = sloc_of(sloc);
            ops::apply_operator(ctx, *xop, *assign, &sloc)?;
            Ok(AirStatus::Next)
        }
        Op::UnpackStructArray { immutable, nelems } => {
            let initializer = ctx.stack().top(0).dereference_readonly()?;
            ctx.stack_mut().pop(1);
            let array = match initializer {
                Value::Null => Array::new(),
                Value::Array(array) => array,
                other => {
                    return Err(RuntimeError::native(
                        sloc_of(sloc),
                        format!("cannot unpack `{}` as an array", other.type_name()),
                    ))
                }
            };
            for index in (0..*nelems as usize).rev() {
                let element = array.get(index).cloned().unwrap_or_default();
                let variable = ctx
                    .stack()
                    .top(0)
                    .variable()
                    .cloned()
                    .expect("unpack target is a variable");
                variable.initialize(element, *immutable);
                ctx.stack_mut().pop(1);
            }
            Ok(AirStatus::Next)
        }
        Op::UnpackStructObject { immutable, keys } => {
            let initializer = ctx.stack().top(0).dereference_readonly()?;
            ctx.stack_mut().pop(1);
            let object = match initializer {
                Value::Null => Object::new(),
                Value::Object(object) => object,
                other => {
                    return Err(RuntimeError::native(
                        sloc_of(sloc),
                        format!("cannot unpack `{}` as an object", other.type_name()),
                    ))
                }
            };
            for key in keys.iter().rev() {
                let element = object.get(key).cloned().unwrap_or_default();
                let variable = ctx
                    .stack()
                    .top(0)
                    .variable()
                    .cloned()
                    .expect("unpack target is a variable");
                variable.initialize(element, *immutable);
                ctx.stack_mut().pop(1);
            }
            Ok(AirStatus::Next)
        }
        Op::DefineNullVariable { immutable, name } => {
            let sloc = sloc_of(sloc);
            if let Some(hooks) = ctx.global().hooks() {
                hooks.on_variable_declare(&sloc, name)?;
            }
            let variable = ctx.global_mut().create_variable();
            variable.initialize(Value::Null, *immutable);
            ctx.insert_named_reference(name).set_variable(variable);
            Ok(AirStatus::Next)
        }
        Op::SingleStepTrap => {
            let sloc = sloc_of(sloc);
            if let Some(hooks) = ctx.global().hooks() {
                hooks.on_single_step_trap(&sloc)?;
            }
            Ok(AirStatus::Next)
        }
        Op::VariadicCall { ptc } => {
            let sloc = sloc_of(sloc);
            if let Some(hooks) = ctx.global().hooks() {
                hooks.on_single_step_trap(&sloc)?;
            }
            do_variadic_expansion(ctx, &sloc)?;
            do_dispatch_function_call(ctx, &sloc, *ptc)
        }
        Op::DeferExpression { sp } => {
            // Rebind the body against this context so the queue stays
            // valid when it eventually runs, then solidify it.
            let mut body = sp.body.clone();
            optimizer::rebind_defer_body(&mut body, ctx);
            let (queue, _) = node::solidify_nodes(&body);
            ctx.defer_expression(sp.sloc.clone(), Rc::new(queue));
            Ok(AirStatus::Next)
        }
        Op::ImportCall { nargs } => {
            let sloc = sloc_of(sloc);
            do_import_call(ctx, &sloc, *nargs as usize)
        }
        Op::DeclareReference { name } => {
            ctx.insert_named_reference(name).set_invalid();
            Ok(AirStatus::Next)
        }
        Op::InitializeReference { name } => {
            let reference = ctx.stack_mut().take_top();
            *ctx.insert_named_reference(name) = reference;
            Ok(AirStatus::Next)
        }
        Op::CatchExpression { body } => {
            let depth = ctx.stack().size();
            let caught = match body.execute(ctx) {
                Ok(_) => Value::Null,
                Err(error) => error.value().clone(),
            };
            while ctx.stack().size() > depth {
                ctx.stack_mut().pop(1);
            }
            ctx.stack_mut().push().set_temporary(caught);
            Ok(AirStatus::Next)
        }
        Op::ReturnStatement { by_ref, is_void } => {
            if *is_void {
                return Ok(AirStatus::ReturnVoid);
            }
            if !*by_ref {
                let top = ctx.stack_mut().mut_top(0);
                if !top.is_ptc() {
                    let value = top.dereference_readonly()?;
                    top.set_temporary(value);
                }
            }
            Ok(AirStatus::ReturnRef)
        }
    }
}
