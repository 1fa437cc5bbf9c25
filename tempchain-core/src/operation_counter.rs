//! In-flight operation accounting for one round.
//!
//! The counter starts at the number of operations assigned and is decremented
//! once per terminal outcome, successful or not. The decrement and the zero
//! check happen under one lock, so exactly one caller observes the crossing.

use std::sync::{Mutex, PoisonError};

use tracing::error;

/// Snapshot of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub outstanding: u32,
    pub completed: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub struct OperationCounter {
    assigned: u32,
    tally: Mutex<Tally>,
}

impl OperationCounter {
    pub fn new(assigned: u32) -> Self {
        Self {
            assigned,
            tally: Mutex::new(Tally {
                outstanding: assigned,
                ..Default::default()
            }),
        }
    }

    pub fn assigned(&self) -> u32 {
        self.assigned
    }

    /// Records one terminal outcome. Returns the final tally if this call
    /// brought the counter to zero.
    pub fn record(&self, outcome: Outcome) -> Option<Tally> {
        self.record_many(outcome, 1)
    }

    /// Records `n` outcomes at once (operations that will never be dispatched).
    pub fn record_many(&self, outcome: Outcome, n: u32) -> Option<Tally> {
        if n == 0 {
            return None;
        }
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        if tally.outstanding < n {
            error!(
                "Recording {} outcomes with only {} outstanding",
                n, tally.outstanding
            );
            return None;
        }
        tally.outstanding -= n;
        match outcome {
            Outcome::Succeeded => tally.completed += n,
            Outcome::Failed => tally.failed += n,
        }
        (tally.outstanding == 0).then_some(*tally)
    }

    pub fn snapshot(&self) -> Tally {
        *self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn outstanding(&self) -> u32 {
        self.snapshot().outstanding
    }

    pub fn completed(&self) -> u32 {
        self.snapshot().completed
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding() == 0
    }
}
