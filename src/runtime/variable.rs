//! Variables: the unit of aliasing and garbage collection.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::runtime::value::Value;

/// The payload written into variables that the collector reclaims, so
/// that reference cycles running through them are broken.
pub(crate) const DEFUNCT_SENTINEL: i64 = 0x7EED_FACE_CAFE_BEEF;

/// The initialization state of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableState {
    /// Declared but not yet initialized; reads are rejected.
    Uninitialized,
    Mutable,
    Immutable,
}

#[derive(Debug)]
struct VariableData {
    value: Value,
    state: VariableState,
}

/// A heap cell holding a value together with its mutability and the
/// collector's bookkeeping.
///
/// Variables are created by the collector's factory in an
/// uninitialized state and become mutable or immutable exactly once.
/// They are shared through [`Rc`]; the strong count doubles as the
/// "true reference count" the cycle collector compares against.
///
/// The `gcref` counter lives outside the value cell: the collector
/// updates it while values elsewhere in the graph are borrowed, and a
/// closure may capture the very variable that holds it.
#[derive(Debug)]
pub struct Variable {
    data: RefCell<VariableData>,
    gcref: Cell<i64>,
}

impl Variable {
    pub(crate) fn new_uninitialized() -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(VariableData {
                value: Value::Null,
                state: VariableState::Uninitialized,
            }),
            gcref: Cell::new(0),
        })
    }

    #[must_use]
    pub fn state(&self) -> VariableState {
        self.data.borrow().state
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.data.borrow().state != VariableState::Uninitialized
    }

    #[must_use]
    pub fn is_immutable(&self) -> bool {
        self.data.borrow().state == VariableState::Immutable
    }

    /// Finalizes this variable with its first value and mutability.
    pub fn initialize(&self, value: Value, immutable: bool) {
        let mut data = self.data.borrow_mut();
        data.value = value;
        data.state = if immutable {
            VariableState::Immutable
        } else {
            VariableState::Mutable
        };
    }

    /// Returns a shared borrow of the stored value.
    pub fn value(&self) -> Ref<'_, Value> {
        Ref::map(self.data.borrow(), |data| &data.value)
    }

    /// Returns a mutable borrow of the stored value.
    ///
    /// Mutability checks happen at the reference layer; this accessor
    /// is also used by the collector when it severs cycles.
    pub fn value_mut(&self) -> RefMut<'_, Value> {
        RefMut::map(self.data.borrow_mut(), |data| &mut data.value)
    }

    /// Overwrites the payload with the defunct sentinel, dropping any
    /// values (and through them, variable references) it held.
    pub(crate) fn wipe_out(&self) {
        let mut data = self.data.borrow_mut();
        data.value = Value::Int(DEFUNCT_SENTINEL);
        data.state = VariableState::Mutable;
    }

    pub(crate) fn gcref(&self) -> i64 {
        self.gcref.get()
    }

    pub(crate) fn reset_gcref(&self, gcref: i64) {
        self.gcref.set(gcref);
    }

    pub(crate) fn add_gcref(&self, count: i64) {
        self.gcref.set(self.gcref.get() + count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_start_uninitialized() {
        let var = Variable::new_uninitialized();
        assert_eq!(var.state(), VariableState::Uninitialized);
        assert!(!var.is_initialized());
        var.initialize(Value::Int(7), true);
        assert!(var.is_immutable());
        assert_eq!(*var.value(), Value::Int(7));
    }

    #[test]
    fn wiping_replaces_the_payload_with_a_scalar() {
        let var = Variable::new_uninitialized();
        var.initialize(Value::Array(vec![Value::Int(1)]), false);
        var.wipe_out();
        assert_eq!(*var.value(), Value::Int(DEFUNCT_SENTINEL));
    }
}
