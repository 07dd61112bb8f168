use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::TestDefinition;

#[derive(Debug)]
struct TestSlot {
    definition: TestDefinition,
    remaining: AtomicU64,
    completed: AtomicU64,
}

/// Shared per-test counters claimed by every worker of an agent.
///
/// `remaining` is decremented when a worker claims an execution; `completed`
/// is incremented once the execution finished and is what heartbeats report.
#[derive(Debug)]
pub struct TestSuite {
    slots: Vec<TestSlot>,
    cursor: AtomicUsize,
}

impl TestSuite {
    #[must_use]
    pub fn new(tests: &[TestDefinition]) -> Self {
        Self {
            slots: tests
                .iter()
                .map(|test| TestSlot {
                    definition: test.clone(),
                    remaining: AtomicU64::new(test.count),
                    completed: AtomicU64::new(0),
                })
                .collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Atomically claim one execution of the next test that still has work,
    /// rotating across tests. `None` once every test is exhausted.
    pub fn claim_next(&self) -> Option<usize> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..len {
            let idx = start.wrapping_add(offset).checked_rem(len)?;
            let slot = self.slots.get(idx)?;
            let mut current = slot.remaining.load(Ordering::Acquire);
            while current > 0 {
                match slot.remaining.compare_exchange_weak(
                    current,
                    current.saturating_sub(1),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(idx),
                    Err(actual) => current = actual,
                }
            }
        }
        None
    }

    #[must_use]
    pub fn test(&self, idx: usize) -> Option<&TestDefinition> {
        self.slots.get(idx).map(|slot| &slot.definition)
    }

    pub fn mark_completed(&self, idx: usize) {
        if let Some(slot) = self.slots.get(idx) {
            slot.completed.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.definition.name == name)
    }

    /// Overwrite the remaining quota of `name`. Returns `false` for unknown
    /// tests.
    pub fn set_remaining(&self, name: &str, remaining: u64) -> bool {
        match self.slots.iter().find(|slot| slot.definition.name == name) {
            Some(slot) => {
                slot.remaining.store(remaining, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Start a new accounting baseline: completed counts restart at zero.
    pub fn reset_completed(&self) {
        for slot in &self.slots {
            slot.completed.store(0, Ordering::Release);
        }
    }

    #[must_use]
    pub fn completed_snapshot(&self) -> BTreeMap<String, u64> {
        self.slots
            .iter()
            .map(|slot| {
                (
                    slot.definition.name.clone(),
                    slot.completed.load(Ordering::Acquire),
                )
            })
            .collect()
    }

    #[must_use]
    pub fn remaining_snapshot(&self) -> BTreeMap<String, u64> {
        self.slots
            .iter()
            .map(|slot| {
                (
                    slot.definition.name.clone(),
                    slot.remaining.load(Ordering::Acquire),
                )
            })
            .collect()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.remaining.load(Ordering::Acquire) == 0)
    }
}
