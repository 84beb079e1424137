//! The generational garbage collector.
//!
//! Variables are reference counted; the collector exists to reclaim
//! groups of variables that keep each other alive in cycles. It is
//! generational: three tracked sets with independent allocation
//! thresholds, where survivors of a collection promote into the next
//! older generation.
//!
//! The algorithm reconstructs, for every variable staged for a
//! collection, the number of references reaching it from inside the
//! staged set (`gcref`). A variable whose `gcref` accounts for its
//! entire strong count has no references from the outside and is
//! unreachable; its payload is replaced with a scalar sentinel to
//! sever any cycle, and it is released.

use std::rc::Rc;

use ahash::AHashMap;
use tracing::debug;

use crate::runtime::variable::Variable;

/// The number of generations.
pub const GENERATION_COUNT: usize = 3;

const DEFAULT_THRESHOLDS: [usize; GENERATION_COUNT] = [50, 500, 5000];

/// A set of variables keyed by pointer identity.
#[derive(Debug, Default)]
pub struct VariableSet {
    map: AHashMap<usize, Rc<Variable>>,
}

impl VariableSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts `variable`, returning whether it was newly inserted.
    pub fn insert(&mut self, variable: &Rc<Variable>) -> bool {
        let key = Rc::as_ptr(variable) as usize;
        self.map.insert(key, variable.clone()).is_none()
    }

    /// Removes `variable`, returning whether it was present.
    pub fn remove(&mut self, variable: &Rc<Variable>) -> bool {
        let key = Rc::as_ptr(variable) as usize;
        self.map.remove(&key).is_some()
    }

    #[must_use]
    pub fn contains(&self, variable: &Rc<Variable>) -> bool {
        self.map.contains_key(&(Rc::as_ptr(variable) as usize))
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Variable>> {
        self.map.values()
    }
}

#[derive(Debug)]
struct Generation {
    tracked: VariableSet,
    threshold: usize,
    counter: usize,
}

/// The generational collector owned by a global context.
#[derive(Debug)]
pub struct GarbageCollector {
    generations: [Generation; GENERATION_COUNT],
    collecting: bool,
}

impl Default for GarbageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl GarbageCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            generations: DEFAULT_THRESHOLDS.map(|threshold| Generation {
                tracked: VariableSet::new(),
                threshold,
                counter: 0,
            }),
            collecting: false,
        }
    }

    /// Creates a fresh uninitialized variable tracked in the youngest
    /// generation, running a collection if its threshold is exceeded.
    pub fn create_variable(&mut self) -> Rc<Variable> {
        let variable = Variable::new_uninitialized();
        self.generations[0].tracked.insert(&variable);
        self.generations[0].counter += 1;

        if self.generations[0].counter > self.generations[0].threshold && !self.collecting {
            self.collecting = true;
            let mut generation = 0;
            loop {
                let next_over = self.collect_generation(generation).1;
                generation += 1;
                if !next_over || generation >= GENERATION_COUNT {
                    break;
                }
            }
            self.collecting = false;
        }
        variable
    }

    /// Returns the number of variables tracked in `generation`.
    ///
    /// # Panics
    ///
    /// Panics if `generation` is not within `0..GENERATION_COUNT`.
    #[must_use]
    pub fn count_tracked(&self, generation: usize) -> usize {
        self.generations[generation].tracked.len()
    }

    #[must_use]
    pub fn get_threshold(&self, generation: usize) -> usize {
        self.generations[generation].threshold
    }

    /// Sets the allocation threshold of `generation`, returning the
    /// previous one.
    pub fn set_threshold(&mut self, generation: usize, threshold: usize) -> usize {
        std::mem::replace(&mut self.generations[generation].threshold, threshold)
    }

    /// Collects generations `0..=generation_limit` (clamped), oldest
    /// first, and returns the number of variables freed.
    ///
    /// Collection is not reentrant; a nested request is ignored and
    /// reports zero.
    pub fn collect(&mut self, generation_limit: usize) -> usize {
        if self.collecting {
            return 0;
        }
        self.collecting = true;
        let limit = generation_limit.min(GENERATION_COUNT - 1);
        let mut freed = 0;
        for generation in (0..=limit).rev() {
            freed += self.collect_generation(generation).0;
        }
        self.collecting = false;
        freed
    }

    /// Collects one generation. Returns the number of variables freed
    /// and whether the promotion pushed the next generation over its
    /// threshold.
    fn collect_generation(&mut self, generation: usize) -> (usize, bool) {
        let mut staging = VariableSet::new();

        // Phase 1: stage every tracked variable and everything
        // transitively reachable from them. Tracked variables start
        // with a gcref of 1 to account for the tracked set itself;
        // variables discovered as children start at 0. A child found
        // to be tracked later is overwritten with 1.
        let mut worklist = Vec::new();
        for root in self.generations[generation].tracked.iter() {
            root.reset_gcref(1);
            if staging.insert(root) {
                worklist.push(root.clone());
            }
        }
        while let Some(variable) = worklist.pop() {
            variable.value().enumerate_variables(&mut |child| {
                if staging.insert(child) {
                    child.reset_gcref(0);
                    worklist.push(child.clone());
                }
            });
        }

        // Phase 2: account for the staging reference and for every
        // inbound edge from a staged variable's payload. One pass, one
        // level deep; enumeration stops at variable boundaries.
        for variable in staging.iter() {
            variable.add_gcref(1);
            variable.value().enumerate_variables(&mut |child| {
                child.add_gcref(1);
            });
        }

        // Phase 3: a variable whose strong count exceeds its gcref has
        // a reference from outside the staged set. Mark it, and
        // everything reachable from it, with a negative sentinel.
        let mut reachable = Vec::new();
        for variable in staging.iter() {
            if variable.gcref() < 0 {
                continue;
            }
            let strong = i64::try_from(Rc::strong_count(variable)).expect("strong count");
            if variable.gcref() >= strong {
                continue;
            }
            variable.reset_gcref(-1);
            reachable.push(variable.clone());
            while let Some(marked) = reachable.pop() {
                marked.value().enumerate_variables(&mut |child| {
                    if child.gcref() >= 0 {
                        child.reset_gcref(-1);
                        reachable.push(child.clone());
                    }
                });
            }
        }

        // Phase 4: everything still non-negative is unreachable. Break
        // cycles by wiping payloads, then untrack. Survivors promote
        // into the next generation, capped at the oldest.
        let mut freed = 0;
        let mut next_over = false;
        for variable in staging.iter() {
            if variable.gcref() >= 0 {
                variable.wipe_out();
                if self.generations[generation].tracked.remove(variable) {
                    freed += 1;
                }
            } else if generation + 1 < GENERATION_COUNT
                && self.generations[generation].tracked.remove(variable)
            {
                let next = &mut self.generations[generation + 1];
                next.tracked.insert(variable);
                next.counter += 1;
                next_over |= next.counter > next.threshold;
            }
        }

        self.generations[generation].counter = 0;
        debug!(generation, staged = staging.len(), freed, "collected generation");
        (freed, next_over)
    }
}
