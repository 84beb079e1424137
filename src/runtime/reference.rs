//! References: the polymorphic handles the engine operates on.
//!
//! A reference designates either nothing (a declared-but-uninitialized
//! binding), a temporary value it owns, a shared [`Variable`], or a
//! pending tail call. A chain of [`Modifier`]s may be appended to
//! address an element inside the referent.

use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::error::RuntimeError;
use crate::runtime::function::PtcArguments;
use crate::runtime::value::{Array, Object, Value};
use crate::runtime::variable::{Variable, VariableState};

/// One access step appended to a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    /// An element of an array. Negative indices wrap from the end.
    ArrayIndex(i64),
    /// A member of an object.
    ObjectKey(String),
    /// The first element of an array.
    ArrayHead,
    /// The last element of an array.
    ArrayTail,
    /// A uniformly chosen element; the draw happens when the operator
    /// executes, so the modifier carries the raw sample.
    ArrayRandom(u32),
}

/// What a reference designates before modifiers are applied.
#[derive(Debug, Clone, Default)]
pub enum ReferenceRoot {
    /// A binding that was declared but bypassed by control flow.
    #[default]
    Invalid,
    /// The absence of a result, e.g. of a function returning nothing.
    Void,
    /// A value owned by the reference itself.
    Temporary(Value),
    /// A shared variable; this is what makes a reference an lvalue.
    Variable(Rc<Variable>),
    /// A pending tail call, to be unpacked by the trampoline.
    Ptc(Rc<RefCell<PtcArguments>>),
}

impl PartialEq for ReferenceRoot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ReferenceRoot::Invalid, ReferenceRoot::Invalid)
            | (ReferenceRoot::Void, ReferenceRoot::Void) => true,
            (ReferenceRoot::Temporary(lhs), ReferenceRoot::Temporary(rhs)) => lhs == rhs,
            (ReferenceRoot::Variable(lhs), ReferenceRoot::Variable(rhs)) => Rc::ptr_eq(lhs, rhs),
            (ReferenceRoot::Ptc(lhs), ReferenceRoot::Ptc(rhs)) => Rc::ptr_eq(lhs, rhs),
            _ => false,
        }
    }
}

/// A handle to a value or variable, optionally through a modifier
/// chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reference {
    root: ReferenceRoot,
    modifiers: Vec<Modifier>,
}

impl Reference {
    #[must_use]
    pub fn new_temporary(value: Value) -> Self {
        Self {
            root: ReferenceRoot::Temporary(value),
            modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn new_variable(variable: Rc<Variable>) -> Self {
        Self {
            root: ReferenceRoot::Variable(variable),
            modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub const fn root(&self) -> &ReferenceRoot {
        &self.root
    }

    #[must_use]
    pub const fn is_invalid(&self) -> bool {
        matches!(self.root, ReferenceRoot::Invalid)
    }

    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self.root, ReferenceRoot::Void)
    }

    #[must_use]
    pub const fn is_ptc(&self) -> bool {
        matches!(self.root, ReferenceRoot::Ptc(_))
    }

    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(self.root, ReferenceRoot::Variable(_))
    }

    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self.root, ReferenceRoot::Temporary(_))
    }

    /// Resets this reference to own `value`, dropping any modifiers.
    pub fn set_temporary(&mut self, value: Value) -> &mut Self {
        self.root = ReferenceRoot::Temporary(value);
        self.modifiers.clear();
        self
    }

    /// Resets this reference to share `variable`, dropping any
    /// modifiers.
    pub fn set_variable(&mut self, variable: Rc<Variable>) -> &mut Self {
        self.root = ReferenceRoot::Variable(variable);
        self.modifiers.clear();
        self
    }

    pub fn set_void(&mut self) -> &mut Self {
        self.root = ReferenceRoot::Void;
        self.modifiers.clear();
        self
    }

    pub fn set_invalid(&mut self) -> &mut Self {
        self.root = ReferenceRoot::Invalid;
        self.modifiers.clear();
        self
    }

    pub fn set_ptc(&mut self, ptc: Rc<RefCell<PtcArguments>>) -> &mut Self {
        self.root = ReferenceRoot::Ptc(ptc);
        self.modifiers.clear();
        self
    }

    /// Takes a pending tail call out of this reference, leaving it
    /// invalid until the trampoline stores the resolved result.
    pub(crate) fn take_ptc(&mut self) -> Option<Rc<RefCell<PtcArguments>>> {
        if self.is_ptc() {
            let ReferenceRoot::Ptc(ptc) = std::mem::take(&mut self.root) else {
                unreachable!()
            };
            Some(ptc)
        } else {
            None
        }
    }

    pub fn push_modifier(&mut self, modifier: Modifier) -> &mut Self {
        self.modifiers.push(modifier);
        self
    }

    /// Removes the last modifier. A reference without modifiers decays
    /// to a null temporary; this is how a call site recovers the `self`
    /// reference from a plain callee.
    pub fn pop_modifier(&mut self) -> &mut Self {
        if self.modifiers.pop().is_none() {
            self.set_temporary(Value::Null);
        }
        self
    }

    /// Returns the variable this reference shares, if any.
    #[must_use]
    pub fn variable(&self) -> Option<&Rc<Variable>> {
        match &self.root {
            ReferenceRoot::Variable(variable) => Some(variable),
            _ => None,
        }
    }

    /// Reads the value this reference designates.
    pub fn dereference_readonly(&self) -> Result<Value, RuntimeError> {
        match &self.root {
            ReferenceRoot::Invalid => Err(RuntimeError::plain(
                "use of a bypassed variable or reference",
            )),
            ReferenceRoot::Void => Err(RuntimeError::plain(
                "use of the result of a function call which returned no value",
            )),
            ReferenceRoot::Ptc(_) => Err(RuntimeError::plain("tail call not yet resolved")),
            ReferenceRoot::Temporary(value) => walk_readonly(value, &self.modifiers),
            ReferenceRoot::Variable(variable) => {
                if !variable.is_initialized() {
                    return Err(RuntimeError::plain("use of a bypassed variable"));
                }
                walk_readonly(&variable.value(), &self.modifiers)
            }
        }
    }

    /// Opens the designated value for mutation, materializing missing
    /// intermediate containers, and applies `op` to it.
    pub fn dereference_mutable<R>(
        &self,
        op: impl FnOnce(&mut Value) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        match &self.root {
            ReferenceRoot::Invalid => Err(RuntimeError::plain(
                "use of a bypassed variable or reference",
            )),
            ReferenceRoot::Void => Err(RuntimeError::plain(
                "use of the result of a function call which returned no value",
            )),
            ReferenceRoot::Ptc(_) => Err(RuntimeError::plain("tail call not yet resolved")),
            ReferenceRoot::Temporary(_) => Err(RuntimeError::plain(
                "attempt to modify a temporary value",
            )),
            ReferenceRoot::Variable(variable) => {
                if !variable.is_initialized() {
                    return Err(RuntimeError::plain("use of a bypassed variable"));
                }
                if variable.is_immutable() {
                    return Err(RuntimeError::plain(
                        "attempt to modify an immutable variable",
                    ));
                }
                let mut guard = variable.value_mut();
                let target = walk_mutable(&mut guard, &self.modifiers)?;
                op(target)
            }
        }
    }

    /// Removes the element addressed by the last modifier and returns
    /// its previous value, or null if it was absent.
    pub fn dereference_unset(&self) -> Result<Value, RuntimeError> {
        let Some((last, intermediate)) = self.modifiers.split_last() else {
            return Err(RuntimeError::plain(
                "only elements of arrays and objects may be unset",
            ));
        };
        let ReferenceRoot::Variable(variable) = &self.root else {
            return Err(RuntimeError::plain(
                "attempt to modify a temporary value",
            ));
        };
        if !variable.is_initialized() {
            return Err(RuntimeError::plain("use of a bypassed variable"));
        }
        if variable.is_immutable() {
            return Err(RuntimeError::plain(
                "attempt to modify an immutable variable",
            ));
        }

        let mut guard = variable.value_mut();
        let mut parent: &mut Value = &mut guard;
        for modifier in intermediate {
            match walk_mutable_step(parent, modifier, false)? {
                Some(next) => parent = next,
                // A missing intermediate means there is nothing to
                // unset.
                None => return Ok(Value::Null),
            }
        }
        unset_element(parent, last)
    }

    /// Reports every variable reachable from this reference.
    pub(crate) fn enumerate_variables(&self, callback: &mut dyn FnMut(&Rc<Variable>)) {
        match &self.root {
            ReferenceRoot::Invalid | ReferenceRoot::Void => {}
            ReferenceRoot::Temporary(value) => value.enumerate_variables(callback),
            ReferenceRoot::Variable(variable) => callback(variable),
            ReferenceRoot::Ptc(ptc) => ptc.borrow().enumerate_variables(callback),
        }
    }
}

fn wrap_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).expect("array length fits in i64");
    let wrapped = if index < 0 { index + len } else { index };
    usize::try_from(wrapped).ok().filter(|&i| i < len as usize)
}

fn walk_readonly(root: &Value, modifiers: &[Modifier]) -> Result<Value, RuntimeError> {
    let mut current = root;
    for modifier in modifiers {
        let next = match (modifier, current) {
            // A null parent yields null for any access.
            (_, Value::Null) => return Ok(Value::Null),
            (Modifier::ArrayIndex(index), Value::Array(array)) => {
                match wrap_index(*index, array.len()) {
                    Some(i) => &array[i],
                    None => return Ok(Value::Null),
                }
            }
            (Modifier::ObjectKey(key), Value::Object(object)) => match object.get(key) {
                Some(element) => element,
                None => return Ok(Value::Null),
            },
            (Modifier::ArrayHead, Value::Array(array)) => match array.first() {
                Some(element) => element,
                None => return Ok(Value::Null),
            },
            (Modifier::ArrayTail, Value::Array(array)) => match array.last() {
                Some(element) => element,
                None => return Ok(Value::Null),
            },
            (Modifier::ArrayRandom(sample), Value::Array(array)) => {
                if array.is_empty() {
                    return Ok(Value::Null);
                }
                &array[*sample as usize % array.len()]
            }
            (modifier, other) => {
                return Err(RuntimeError::plain(format!(
                    "value of type `{}` not dereferenceable with {}",
                    other.type_name(),
                    modifier_noun(modifier),
                )))
            }
        };
        current = next;
    }
    Ok(current.clone())
}

fn modifier_noun(modifier: &Modifier) -> &'static str {
    match modifier {
        Modifier::ArrayIndex(_) => "an array subscript",
        Modifier::ObjectKey(_) => "an object key",
        Modifier::ArrayHead => "the head of an array",
        Modifier::ArrayTail => "the tail of an array",
        Modifier::ArrayRandom(_) => "a random element of an array",
    }
}

/// Applies one modifier for writing. With `materialize`, null parents
/// become containers and missing elements are created; otherwise a
/// missing element is reported as `None`.
fn walk_mutable_step<'v>(
    parent: &'v mut Value,
    modifier: &Modifier,
    materialize: bool,
) -> Result<Option<&'v mut Value>, RuntimeError> {
    if parent.is_null() && materialize {
        *parent = match modifier {
            Modifier::ObjectKey(_) => Value::Object(Object::new()),
            _ => Value::Array(Array::new()),
        };
    }
    match (modifier, parent) {
        (_, Value::Null) => Ok(None),
        (Modifier::ArrayIndex(index), Value::Array(array)) => {
            if let Some(i) = wrap_index(*index, array.len()) {
                return Ok(Some(&mut array[i]));
            }
            if *index < 0 {
                return Err(RuntimeError::plain(format!(
                    "array subscript `{index}` out of range for length `{}`",
                    array.len(),
                )));
            }
            if !materialize {
                return Ok(None);
            }
            // Writes past the end extend the array with nulls.
            let wanted = usize::try_from(*index).expect("nonnegative index");
            array.resize(wanted + 1, Value::Null);
            Ok(Some(&mut array[wanted]))
        }
        (Modifier::ObjectKey(key), Value::Object(object)) => {
            if !materialize && !object.contains_key(key) {
                return Ok(None);
            }
            Ok(Some(object.entry(key.clone()).or_insert(Value::Null)))
        }
        (Modifier::ArrayHead, Value::Array(array)) => {
            if array.is_empty() {
                if !materialize {
                    return Ok(None);
                }
                array.push(Value::Null);
            }
            Ok(Some(&mut array[0]))
        }
        (Modifier::ArrayTail, Value::Array(array)) => match array.last_mut() {
            Some(element) => Ok(Some(element)),
            None => Err(RuntimeError::plain(
                "the last element of an empty array does not exist",
            )),
        },
        (Modifier::ArrayRandom(sample), Value::Array(array)) => {
            if array.is_empty() {
                return Err(RuntimeError::plain(
                    "a random element of an empty array does not exist",
                ));
            }
            let len = array.len();
            Ok(Some(&mut array[*sample as usize % len]))
        }
        (modifier, other) => Err(RuntimeError::plain(format!(
            "value of type `{}` not dereferenceable with {}",
            other.type_name(),
            modifier_noun(modifier),
        ))),
    }
}

fn walk_mutable<'v>(
    root: &'v mut Value,
    modifiers: &[Modifier],
) -> Result<&'v mut Value, RuntimeError> {
    let mut current = root;
    for modifier in modifiers {
        current = walk_mutable_step(current, modifier, true)?
            .expect("materializing walk always yields an element");
    }
    Ok(current)
}

fn unset_element(parent: &mut Value, last: &Modifier) -> Result<Value, RuntimeError> {
    match (last, parent) {
        (_, Value::Null) => Ok(Value::Null),
        (Modifier::ArrayIndex(index), Value::Array(array)) => {
            match wrap_index(*index, array.len()) {
                Some(i) => Ok(array.remove(i)),
                None => Ok(Value::Null),
            }
        }
        (Modifier::ObjectKey(key), Value::Object(object)) => {
            Ok(object.shift_remove(key).unwrap_or_default())
        }
        (Modifier::ArrayHead, Value::Array(array)) => {
            if array.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(array.remove(0))
            }
        }
        (Modifier::ArrayTail, Value::Array(array)) => Ok(array.pop().unwrap_or_default()),
        (Modifier::ArrayRandom(sample), Value::Array(array)) => {
            if array.is_empty() {
                Ok(Value::Null)
            } else {
                let len = array.len();
                Ok(array.remove(*sample as usize % len))
            }
        }
        (modifier, other) => Err(RuntimeError::plain(format!(
            "cannot unset {} of a value of type `{}`",
            modifier_noun(modifier),
            other.type_name(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized_variable(value: Value) -> Rc<Variable> {
        let variable = Variable::new_uninitialized();
        variable.initialize(value, false);
        variable
    }

    #[test]
    fn push_then_pop_restores_the_reference() {
        let variable = initialized_variable(Value::Array(vec![Value::Int(5)]));
        let mut reference = Reference::new_variable(variable);
        let original = reference.clone();
        reference.push_modifier(Modifier::ArrayIndex(0));
        assert_ne!(reference, original);
        reference.pop_modifier();
        assert_eq!(reference, original);
    }

    #[test]
    fn readonly_out_of_bounds_yields_null() {
        let variable = initialized_variable(Value::Array(vec![Value::Int(1), Value::Int(2)]));
        let mut reference = Reference::new_variable(variable);
        reference.push_modifier(Modifier::ArrayIndex(7));
        assert_eq!(reference.dereference_readonly().unwrap(), Value::Null);
        reference.pop_modifier();
        reference.push_modifier(Modifier::ArrayIndex(-1));
        assert_eq!(reference.dereference_readonly().unwrap(), Value::Int(2));
    }

    #[test]
    fn mutable_write_extends_arrays_and_creates_keys() {
        let variable = initialized_variable(Value::Null);
        let mut reference = Reference::new_variable(variable.clone());
        reference.push_modifier(Modifier::ObjectKey("k".to_owned()));
        reference.push_modifier(Modifier::ArrayIndex(2));
        reference
            .dereference_mutable(|slot| {
                *slot = Value::Int(9);
                Ok(())
            })
            .unwrap();
        let object = variable.value().as_object().cloned().unwrap();
        let array = object.get("k").and_then(Value::as_array).cloned().unwrap();
        assert_eq!(array, vec![Value::Null, Value::Null, Value::Int(9)]);
    }

    #[test]
    fn negative_write_past_the_beginning_is_an_error() {
        let variable = initialized_variable(Value::Array(vec![Value::Int(1)]));
        let mut reference = Reference::new_variable(variable);
        reference.push_modifier(Modifier::ArrayIndex(-2));
        assert!(reference.dereference_mutable(|_| Ok(())).is_err());
    }

    #[test]
    fn temporaries_reject_mutation() {
        let mut reference = Reference::new_temporary(Value::Int(1));
        reference.push_modifier(Modifier::ArrayIndex(0));
        assert!(reference.dereference_mutable(|_| Ok(())).is_err());
    }

    #[test]
    fn immutable_variables_reject_writes() {
        let variable = Variable::new_uninitialized();
        variable.initialize(Value::Int(3), true);
        let reference = Reference::new_variable(variable);
        assert!(reference.dereference_mutable(|_| Ok(())).is_err());
        assert_eq!(reference.dereference_readonly().unwrap(), Value::Int(3));
    }

    #[test]
    fn unset_removes_and_returns_the_previous_value() {
        let mut object = Object::new();
        object.insert("a".to_owned(), Value::Int(1));
        object.insert("b".to_owned(), Value::Int(2));
        let variable = initialized_variable(Value::Object(object));
        let mut reference = Reference::new_variable(variable.clone());
        reference.push_modifier(Modifier::ObjectKey("a".to_owned()));
        assert_eq!(reference.dereference_unset().unwrap(), Value::Int(1));
        assert_eq!(reference.dereference_unset().unwrap(), Value::Null);
        let remaining = variable.value().as_object().cloned().unwrap();
        assert_eq!(remaining.keys().collect::<Vec<_>>(), ["b"]);
    }

    #[test]
    fn uninitialized_variables_are_bypassed() {
        let reference = Reference::new_variable(Variable::new_uninitialized());
        assert!(reference.dereference_readonly().is_err());
    }
}
