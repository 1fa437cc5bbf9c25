//! # Pending set
//!
//! Tracks which agents still owe a result for the round in flight. An agent is
//! in the set from the moment it is assigned until its `results` frame or its
//! disconnect arrives. The set empties exactly once, and at that moment the
//! completion callbacks receive the aggregate [`RoundReport`].

use std::collections::HashMap;

use tracing::debug;

use crate::round::{AgentId, AgentRoundOutcome, RoundId, RoundReport, RoundResult};

pub type RoundCompleteCallback = Box<dyn FnOnce(RoundReport) + Send>;

/// What a recorded outcome did to the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The agent was not pending for that round; nothing changed.
    Ignored,
    /// The agent was removed, others are still pending.
    Removed,
    /// The agent was the last one pending; the round is complete.
    Completed,
}

pub struct PendingSet {
    round: RoundId,
    pending: HashMap<AgentId, RoundId>,
    outcomes: Vec<AgentRoundOutcome>,
    callbacks: Vec<RoundCompleteCallback>,
    complete: bool,
}

impl PendingSet {
    /// Starts tracking `round` for `ids`. With no ids the round is complete
    /// immediately and `on_complete` runs before this returns.
    pub fn new(
        round: RoundId,
        ids: impl IntoIterator<Item = AgentId>,
        on_complete: RoundCompleteCallback,
    ) -> Self {
        let mut set = Self {
            round,
            pending: ids.into_iter().map(|id| (id, round)).collect(),
            outcomes: Vec::new(),
            callbacks: vec![on_complete],
            complete: false,
        };
        if set.pending.is_empty() {
            set.complete();
        }
        set
    }

    /// Adds `ids` under a newer assignment. A reassigned agent forgets any
    /// outcome it already recorded and owes a result for `round` instead.
    pub fn extend(
        &mut self,
        round: RoundId,
        ids: impl IntoIterator<Item = AgentId>,
        on_complete: RoundCompleteCallback,
    ) {
        debug_assert!(!self.complete, "extending a completed round");
        self.round = round;
        for id in ids {
            self.outcomes.retain(|o| o.agent_id != id);
            self.pending.insert(id, round);
        }
        self.callbacks.push(on_complete);
    }

    /// Records an explicit `results` frame. Ignored unless `id` owes `round`.
    pub fn record_result(&mut self, id: &str, round: RoundId, result: RoundResult) -> Recorded {
        match self.pending.get(id) {
            Some(owed) if *owed == round => self.remove(id, result, false),
            _ => {
                debug!("Ignoring result of agent {} for round {}", id, round);
                Recorded::Ignored
            }
        }
    }

    /// Resolves a pending agent that went away with the implicit `{0, 0}` result.
    pub fn record_disconnect(&mut self, id: &str) -> Recorded {
        if self.pending.contains_key(id) {
            self.remove(id, RoundResult::IMPLICIT, true)
        } else {
            Recorded::Ignored
        }
    }

    fn remove(&mut self, id: &str, result: RoundResult, implicit: bool) -> Recorded {
        self.pending.remove(id);
        self.outcomes.push(AgentRoundOutcome {
            agent_id: id.to_string(),
            result,
            implicit,
        });
        if self.pending.is_empty() {
            self.complete();
            Recorded::Completed
        } else {
            Recorded::Removed
        }
    }

    fn complete(&mut self) {
        if self.complete {
            return;
        }
        self.complete = true;
        let report = RoundReport {
            round: self.round,
            outcomes: std::mem::take(&mut self.outcomes),
        };
        for callback in self.callbacks.drain(..) {
            callback(report.clone());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn round(&self) -> RoundId {
        self.round
    }
}
