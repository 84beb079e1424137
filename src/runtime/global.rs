//! The global context: the single well-known root of a runtime.
//!
//! The collector, the module loader, the pseudo random number
//! generator, the optional hooks object, and the recursion sentry all
//! live here and are passed explicitly to every executor. The runtime
//! is single-threaded; a global context must not be shared across
//! threads without external synchronization.

use std::rc::Rc;

use kempt::Map;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

use crate::runtime::collector::GarbageCollector;
use crate::runtime::error::RuntimeError;
use crate::runtime::function::FunctionValue;
use crate::runtime::loader::ModuleLoader;
use crate::runtime::reference::Reference;
use crate::runtime::value::Value;
use crate::runtime::variable::Variable;
use crate::source::SourceLocation;

/// The default limit of the recursion sentry.
pub const DEFAULT_RECURSION_LIMIT: usize = 500;

/// Observation hooks an embedder may install on a global context.
///
/// Every hook may return an error to abort execution; the error
/// propagates as a runtime error from the instruction that fired the
/// hook.
pub trait GlobalHooks {
    fn on_variable_declare(
        &self,
        _sloc: &SourceLocation,
        _name: &str,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn on_function_call(
        &self,
        _sloc: &SourceLocation,
        _target: &FunctionValue,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn on_function_return(
        &self,
        _sloc: &SourceLocation,
        _target: &FunctionValue,
        _result: &Reference,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn on_function_except(
        &self,
        _sloc: &SourceLocation,
        _target: &FunctionValue,
        _error: &RuntimeError,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn on_single_step_trap(&self, _sloc: &SourceLocation) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// The root owner of everything a runtime shares across invocations.
pub struct GlobalContext {
    collector: GarbageCollector,
    names: Map<String, Reference>,
    prng: SmallRng,
    hooks: Option<Rc<dyn GlobalHooks>>,
    loader: ModuleLoader,
    recursion_depth: usize,
    recursion_limit: usize,
}

impl Default for GlobalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collector: GarbageCollector::new(),
            names: Map::new(),
            prng: SmallRng::from_entropy(),
            hooks: None,
            loader: ModuleLoader::new(),
            recursion_depth: 0,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    /// Creates a fresh uninitialized variable through the collector.
    pub fn create_variable(&mut self) -> Rc<Variable> {
        self.collector.create_variable()
    }

    #[must_use]
    pub fn collector(&self) -> &GarbageCollector {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut GarbageCollector {
        &mut self.collector
    }

    /// Declares a mutable global variable, returning its cell.
    pub fn declare(&mut self, name: &str, value: Value) -> Rc<Variable> {
        self.declare_with_mutability(name, value, false)
    }

    /// Declares an immutable global variable, returning its cell.
    pub fn declare_const(&mut self, name: &str, value: Value) -> Rc<Variable> {
        self.declare_with_mutability(name, value, true)
    }

    fn declare_with_mutability(
        &mut self,
        name: &str,
        value: Value,
        immutable: bool,
    ) -> Rc<Variable> {
        let variable = self.collector.create_variable();
        variable.initialize(value, immutable);
        self.names
            .insert(name.to_owned(), Reference::new_variable(variable.clone()));
        variable
    }

    #[must_use]
    pub fn get_named_reference(&self, name: &str) -> Option<&Reference> {
        self.names.get(name)
    }

    pub fn set_hooks(&mut self, hooks: Option<Rc<dyn GlobalHooks>>) {
        self.hooks = hooks;
    }

    #[must_use]
    pub fn hooks(&self) -> Option<Rc<dyn GlobalHooks>> {
        self.hooks.clone()
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut ModuleLoader {
        &mut self.loader
    }

    /// Draws a raw sample from the per-global generator.
    pub fn random_u32(&mut self) -> u32 {
        self.prng.next_u32()
    }

    /// Replaces the generator, e.g. with a seeded one for reproducible
    /// runs.
    pub fn seed_prng(&mut self, seed: u64) {
        self.prng = SmallRng::seed_from_u64(seed);
    }

    #[must_use]
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    pub fn set_recursion_limit(&mut self, limit: usize) {
        self.recursion_limit = limit;
    }

    /// Charges one level of function-call depth.
    pub(crate) fn enter_recursion(&mut self, sloc: &SourceLocation) -> Result<(), RuntimeError> {
        if self.recursion_depth >= self.recursion_limit {
            return Err(RuntimeError::native(
                sloc.clone(),
                format!(
                    "stack overflow averted (recursion depth `{}` reached)",
                    self.recursion_depth
                ),
            ));
        }
        self.recursion_depth += 1;
        Ok(())
    }

    pub(crate) fn leave_recursion(&mut self) {
        debug_assert!(self.recursion_depth > 0);
        self.recursion_depth -= 1;
    }
}

impl std::fmt::Debug for GlobalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalContext")
            .field("globals", &self.names.len())
            .field("recursion_depth", &self.recursion_depth)
            .finish_non_exhaustive()
    }
}
