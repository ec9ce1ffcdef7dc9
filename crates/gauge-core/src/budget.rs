//! Invocation budget — the meter every unbounded operation charges
//!
//! One [`Budget`] is created per run and shared by reference:
//!
//! - **Steps**: statements, loop iterations and every item a builtin consumes
//! - **Visits**: nodes walked by equality, ordering and JSON conversion
//! - **Allocation**: bytes of strings and element slots the script builds
//! - **Clock**: consulted periodically while steps and visits are charged
//!
//! The budget also remembers every list and dict the script mutated. A
//! container can only come to reference itself through mutation, so
//! emptying those containers at teardown frees every cycle a script built,
//! reachable or not.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ops::Deref;
use std::rc::{Rc, Weak};
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

use crate::config::ExecutionLimits;
use crate::error::RuntimeFault;
use crate::guards::collection_fault;
use crate::value::{length_fault, Dict, Value};

/// How often (in steps) the wall clock is consulted
const CLOCK_CHECK_INTERVAL: u64 = 256;

/// How often (in visited nodes) the wall clock is consulted
const VISIT_CHECK_INTERVAL: u64 = 4_096;

/// Value nodes a walk may visit for every step the limits allow
pub const VISITS_PER_STEP: u64 = 64;

/// Bytes charged for one element of a list, tuple or dict
pub const SLOT_BYTES: usize = std::mem::size_of::<Value>();

#[derive(Debug)]
enum Tracked {
    List(Weak<RefCell<Vec<Value>>>),
    Dict(Weak<RefCell<Dict>>),
}

/// Counters for one run, checked against its [`ExecutionLimits`].
///
/// Dereferences to the limits, so `budget.max_collection_len` reads the
/// configured bound directly.
#[derive(Debug)]
pub struct Budget {
    limits: ExecutionLimits,
    steps: Cell<u64>,
    visits: Cell<u64>,
    allocated: Cell<usize>,
    mutated: RefCell<Vec<Tracked>>,
    seen: RefCell<HashSet<usize>>,
    #[cfg(not(target_arch = "wasm32"))]
    started: Instant,
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(ExecutionLimits::default())
    }
}

impl Deref for Budget {
    type Target = ExecutionLimits;

    fn deref(&self) -> &ExecutionLimits {
        &self.limits
    }
}

impl Budget {
    /// Start a fresh budget; the clock starts now
    pub fn new(limits: ExecutionLimits) -> Self {
        Budget {
            limits,
            steps: Cell::new(0),
            visits: Cell::new(0),
            allocated: Cell::new(0),
            mutated: RefCell::new(Vec::new()),
            seen: RefCell::new(HashSet::new()),
            #[cfg(not(target_arch = "wasm32"))]
            started: Instant::now(),
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    pub fn visits(&self) -> u64 {
        self.visits.get()
    }

    /// Bytes charged so far
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    /// Nodes value walks may visit in total
    pub fn max_visits(&self) -> u64 {
        self.limits.max_steps.saturating_mul(VISITS_PER_STEP)
    }

    // ── Charging ──

    /// Charge `n` steps
    pub fn step(&self, n: u64) -> Result<(), RuntimeFault> {
        let before = self.steps.get();
        let after = before.saturating_add(n);
        self.steps.set(after);
        if after > self.limits.max_steps {
            return Err(RuntimeFault::limit(format!(
                "step limit of {} exceeded",
                self.limits.max_steps
            )));
        }
        if after / CLOCK_CHECK_INTERVAL != before / CLOCK_CHECK_INTERVAL {
            self.check_clock()?;
        }
        Ok(())
    }

    /// Charge one node visited by a value walk
    pub fn visit(&self) -> Result<(), RuntimeFault> {
        let visits = self.visits.get().saturating_add(1);
        self.visits.set(visits);
        if visits > self.max_visits() {
            return Err(RuntimeFault::limit(format!(
                "value traversal exceeded {} nodes",
                self.max_visits()
            )));
        }
        if visits % VISIT_CHECK_INTERVAL == 0 {
            self.check_clock()?;
        }
        Ok(())
    }

    /// Charge `bytes` against the allocation budget
    pub fn alloc(&self, bytes: usize) -> Result<(), RuntimeFault> {
        let total = self.allocated.get().saturating_add(bytes);
        self.allocated.set(total);
        if total > self.limits.max_memory_bytes {
            return Err(RuntimeFault::limit(format!(
                "allocation budget of {} bytes exceeded",
                self.limits.max_memory_bytes
            )));
        }
        Ok(())
    }

    /// Check the length of a new collection and charge its slots
    pub fn collection(&self, len: usize) -> Result<(), RuntimeFault> {
        if len > self.limits.max_collection_len {
            return Err(collection_fault(self.limits.max_collection_len));
        }
        self.alloc(len.saturating_mul(SLOT_BYTES))
    }

    /// Wrap a newly built string, checking its length and charging its bytes
    pub fn string(&self, s: String) -> Result<Value, RuntimeFault> {
        if s.len() > self.limits.max_string_len {
            return Err(length_fault(self.limits.max_string_len));
        }
        self.alloc(s.len())?;
        Ok(Value::str(s))
    }

    fn check_clock(&self) -> Result<(), RuntimeFault> {
        #[cfg(not(target_arch = "wasm32"))]
        {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            if elapsed_ms > self.limits.timeout_ms {
                return Err(RuntimeFault::limit(format!(
                    "execution exceeded timeout of {}ms",
                    self.limits.timeout_ms
                )));
            }
        }
        Ok(())
    }

    // ── Cycle release ──

    fn first_sighting<T>(&self, rc: &Rc<T>) -> bool {
        self.seen.borrow_mut().insert(Rc::as_ptr(rc) as *const () as usize)
    }

    /// Remember a list the script is about to mutate
    pub fn track_list(&self, list: &Rc<RefCell<Vec<Value>>>) {
        if self.first_sighting(list) {
            self.mutated.borrow_mut().push(Tracked::List(Rc::downgrade(list)));
        }
    }

    /// Remember a dict the script is about to mutate
    pub fn track_dict(&self, dict: &Rc<RefCell<Dict>>) {
        if self.first_sighting(dict) {
            self.mutated.borrow_mut().push(Tracked::Dict(Rc::downgrade(dict)));
        }
    }

    /// Empty every container the script mutated that is still alive.
    /// Only call once nothing will read the run's values again.
    pub fn release(&self) {
        let tracked = std::mem::take(&mut *self.mutated.borrow_mut());
        self.seen.borrow_mut().clear();
        let mut released = 0usize;
        for entry in tracked {
            // Contents are dropped after the borrow ends; dropping them can
            // free other tracked containers
            match entry {
                Tracked::List(weak) => {
                    if let Some(list) = weak.upgrade() {
                        let items = list.try_borrow_mut().map(|mut items| std::mem::take(&mut *items));
                        released += items.is_ok() as usize;
                    }
                }
                Tracked::Dict(weak) => {
                    if let Some(dict) = weak.upgrade() {
                        let entries = dict.try_borrow_mut().map(|mut dict| std::mem::take(&mut *dict));
                        released += entries.is_ok() as usize;
                    }
                }
            }
        }
        if released > 0 {
            tracing::trace!(released, "released mutated containers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;

    #[test]
    fn test_step_limit() {
        let budget = Budget::new(ExecutionLimits::default().with_max_steps(10));
        assert!(budget.step(10).is_ok());
        let err = budget.step(1).unwrap_err();
        assert_eq!(err.kind, FaultKind::Limit);
        assert_eq!(err.message, "step limit of 10 exceeded");
        assert_eq!(budget.steps(), 11);
    }

    #[test]
    fn test_timeout_checked_while_stepping() {
        let budget = Budget::new(ExecutionLimits::default().with_max_steps(u64::MAX).with_timeout_ms(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = (0..CLOCK_CHECK_INTERVAL).try_for_each(|_| budget.step(1)).unwrap_err();
        assert_eq!(err.message, "execution exceeded timeout of 1ms");
    }

    #[test]
    fn test_timeout_checked_while_visiting() {
        let budget = Budget::new(ExecutionLimits::default().with_max_steps(u64::MAX).with_timeout_ms(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = (0..VISIT_CHECK_INTERVAL).try_for_each(|_| budget.visit()).unwrap_err();
        assert_eq!(err.message, "execution exceeded timeout of 1ms");
    }

    #[test]
    fn test_visit_ceiling_scales_with_steps() {
        let budget = Budget::new(ExecutionLimits::default().with_max_steps(2));
        assert_eq!(budget.max_visits(), 2 * VISITS_PER_STEP);
        let err = (0..=budget.max_visits()).try_for_each(|_| budget.visit()).unwrap_err();
        assert_eq!(err.kind, FaultKind::Limit);
        assert!(err.message.starts_with("value traversal exceeded"));
    }

    #[test]
    fn test_allocation_budget() {
        let budget = Budget::new(ExecutionLimits::default().with_max_memory_bytes(100));
        assert!(budget.string("x".repeat(60)).is_ok());
        let err = budget.string("y".repeat(60)).unwrap_err();
        assert_eq!(err.message, "allocation budget of 100 bytes exceeded");
        assert_eq!(budget.allocated(), 120);
    }

    #[test]
    fn test_collection_checks_length_before_charging() {
        let budget = Budget::new(ExecutionLimits::default().with_max_collection_len(3));
        assert!(budget.collection(3).is_ok());
        assert_eq!(budget.allocated(), 3 * SLOT_BYTES);
        let err = budget.collection(4).unwrap_err();
        assert_eq!(err.message, "collection exceeds the maximum length of 3");
    }

    #[test]
    fn test_release_breaks_self_reference() {
        let budget = Budget::default();
        let list = Rc::new(RefCell::new(Vec::new()));
        budget.track_list(&list);
        budget.track_list(&list);
        list.borrow_mut().push(Value::List(Rc::clone(&list)));
        let weak = Rc::downgrade(&list);
        drop(list);
        assert!(weak.upgrade().is_some());
        budget.release();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_release_ignores_freed_containers() {
        let budget = Budget::default();
        let dict = Rc::new(RefCell::new(Dict::new()));
        budget.track_dict(&dict);
        drop(dict);
        budget.release();
        assert!(budget.mutated.borrow().is_empty());
    }
}
