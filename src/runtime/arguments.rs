//! The overload-resolving argument binder host functions use.
//!
//! A reader walks the argument stack once per overload attempt,
//! collecting a textual signature as it goes. When an attempt fails,
//! the host backtracks with the saved state and tries the next
//! overload; when all fail, the reader composes an error listing every
//! attempted signature and the arguments that were actually passed.

use crate::runtime::error::RuntimeError;
use crate::runtime::reference::Reference;
use crate::runtime::stack::ReferenceStack;
use crate::runtime::value::{Array, Object, OpaqueValue, Value};
use crate::runtime::function::FunctionValue;

/// A type a host function parameter can bind to.
pub trait ArgumentType: Sized {
    /// The name used in overload signatures.
    const LABEL: &'static str;

    fn from_value(value: Value) -> Option<Self>;
}

impl ArgumentType for bool {
    const LABEL: &'static str = "boolean";

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl ArgumentType for i64 {
    const LABEL: &'static str = "integer";

    fn from_value(value: Value) -> Option<Self> {
        value.as_int()
    }
}

impl ArgumentType for f64 {
    const LABEL: &'static str = "real";

    fn from_value(value: Value) -> Option<Self> {
        value.as_real()
    }
}

impl ArgumentType for String {
    const LABEL: &'static str = "string";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }
}

impl ArgumentType for Array {
    const LABEL: &'static str = "array";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }
}

impl ArgumentType for Object {
    const LABEL: &'static str = "object";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl ArgumentType for FunctionValue {
    const LABEL: &'static str = "function";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }
}

impl ArgumentType for OpaqueValue {
    const LABEL: &'static str = "opaque";

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Opaque(opaque) => Some(opaque),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct OverloadState {
    params: String,
    nparams: usize,
    ended: bool,
    matched: bool,
}

/// Binds the arguments of one host-function call against a sequence of
/// declared overloads.
#[derive(Debug)]
pub struct ArgumentReader<'a> {
    func: String,
    args: &'a ReferenceStack,
    state: OverloadState,
    saved: Vec<OverloadState>,
    overloads: Vec<String>,
}

impl<'a> ArgumentReader<'a> {
    #[must_use]
    pub fn new(func: impl Into<String>, args: &'a ReferenceStack) -> Self {
        Self {
            func: func.into(),
            args,
            state: OverloadState::default(),
            saved: Vec::new(),
            overloads: Vec::new(),
        }
    }

    /// Begins a fresh overload attempt.
    pub fn start_overload(&mut self) -> &mut Self {
        self.state = OverloadState {
            matched: true,
            ..OverloadState::default()
        };
        self
    }

    /// Checkpoints the current state under `index`.
    pub fn save_state(&mut self, index: usize) {
        if self.saved.len() <= index {
            self.saved.resize_with(index + 1, OverloadState::default);
        }
        self.saved[index] = self.state.clone();
    }

    /// Restores the state checkpointed under `index`.
    pub fn load_state(&mut self, index: usize) {
        self.state = self.saved.get(index).cloned().unwrap_or_default();
    }

    fn prepare_parameter(&mut self, label: &str) {
        assert!(
            !self.state.ended,
            "this overload has been ended already; call `start_overload` first"
        );
        if self.state.nparams != 0 {
            self.state.params.push_str(", ");
        }
        self.state.params.push_str(label);
        self.state.nparams += 1;
    }

    fn peek_argument(&self) -> Option<&Reference> {
        if !self.state.matched {
            return None;
        }
        let rindex = self.args.size().checked_sub(self.state.nparams)?;
        if rindex >= self.args.size() {
            return None;
        }
        Some(self.args.top(rindex))
    }

    /// Binds the next parameter if an argument of the right type was
    /// given; null and absent arguments leave `out` empty.
    pub fn optional<T: ArgumentType>(
        &mut self,
        out: &mut Option<T>,
    ) -> Result<&mut Self, RuntimeError> {
        *out = None;
        self.prepare_parameter(&format!("[{}]", T::LABEL));
        if let Some(reference) = self.peek_argument() {
            let value = reference.dereference_readonly()?;
            if !value.is_null() {
                match T::from_value(value) {
                    Some(bound) => *out = Some(bound),
                    None => self.state.matched = false,
                }
            }
        }
        Ok(self)
    }

    /// Binds the next parameter; an absent, null, or wrongly-typed
    /// argument makes this overload a mismatch.
    pub fn required<T: ArgumentType>(&mut self, out: &mut T) -> Result<&mut Self, RuntimeError> {
        self.prepare_parameter(T::LABEL);
        let Some(reference) = self.peek_argument() else {
            self.state.matched = false;
            return Ok(self);
        };
        let value = reference.dereference_readonly()?;
        match T::from_value(value) {
            Some(bound) => *out = bound,
            None => self.state.matched = false,
        }
        Ok(self)
    }

    /// Binds the next argument as a plain value, null included.
    pub fn optional_value(&mut self, out: &mut Value) -> Result<&mut Self, RuntimeError> {
        *out = Value::Null;
        self.prepare_parameter("[value]");
        if let Some(reference) = self.peek_argument() {
            *out = reference.dereference_readonly()?;
        }
        Ok(self)
    }

    /// Binds the next argument as a value; only absence is a mismatch.
    pub fn required_value(&mut self, out: &mut Value) -> Result<&mut Self, RuntimeError> {
        self.prepare_parameter("value");
        match self.peek_argument() {
            Some(reference) => *out = reference.dereference_readonly()?,
            None => self.state.matched = false,
        }
        Ok(self)
    }

    /// Binds the next argument as the reference itself, without
    /// dereferencing it.
    pub fn optional_reference(&mut self, out: &mut Reference) -> &mut Self {
        out.set_invalid();
        self.prepare_parameter("[reference]");
        if let Some(reference) = self.peek_argument() {
            *out = reference.clone();
        }
        self
    }

    fn terminate_parameter_list(&mut self, variadic: bool) {
        assert!(
            !self.state.ended,
            "this overload has been ended already; call `start_overload` first"
        );
        self.state.ended = true;
        let mut signature = self.state.params.clone();
        if variadic {
            if !signature.is_empty() {
                signature.push_str(", ");
            }
            signature.push_str("...");
        }
        self.overloads.push(signature);
    }

    /// Ends the overload. Returns whether every declared parameter
    /// matched and no surplus arguments remain.
    pub fn end_overload(&mut self) -> bool {
        self.terminate_parameter_list(false);
        self.state.matched && self.args.size() <= self.state.nparams
    }

    /// Ends the overload, gathering surplus arguments by value into
    /// `rest`.
    pub fn end_overload_variadic(
        &mut self,
        rest: &mut Vec<Value>,
    ) -> Result<bool, RuntimeError> {
        self.terminate_parameter_list(true);
        rest.clear();
        if !self.state.matched {
            return Ok(false);
        }
        for position in self.state.nparams..self.args.size() {
            let reference = self.args.top(self.args.size() - 1 - position);
            rest.push(reference.dereference_readonly()?);
        }
        Ok(true)
    }

    /// Composes the error raised when every overload has been tried
    /// and none matched.
    #[must_use]
    pub fn throw_no_matching_function_call(&self) -> RuntimeError {
        let mut message = format!("no matching function call for `{}`", self.func);
        message.push_str("\n[list of overloads:");
        for (index, overload) in self.overloads.iter().enumerate() {
            if index != 0 {
                message.push(',');
            }
            message.push_str(&format!(" `{}({overload})`", self.func));
        }
        message.push(']');
        message.push_str("\n[actual arguments:");
        for (index, argument) in self.args.iter().enumerate() {
            if index != 0 {
                message.push(',');
            }
            match argument.dereference_readonly() {
                Ok(value) => message.push_str(&format!(" `{}`", value.type_name())),
                Err(_) => message.push_str(" `<unreadable>`"),
            }
        }
        message.push(']');
        RuntimeError::plain(message)
    }
}
