//! Serializes deployments so a target never runs twice at once

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Whether one deployment may run per target, or one across all targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardGranularity {
    Global,
    #[default]
    PerTarget,
}

/// Tracks which targets are currently deploying.
///
/// A trigger that finds its target (or, with [`GuardGranularity::Global`], any
/// target) busy is rejected, never queued.
#[derive(Debug)]
pub struct ExecutionGuard {
    granularity: GuardGranularity,
    running: Mutex<BTreeSet<String>>,
}

impl ExecutionGuard {
    pub fn new(granularity: GuardGranularity) -> Self {
        Self {
            granularity,
            running: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn granularity(&self) -> GuardGranularity {
        self.granularity
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        // The set stays consistent even if a holder panicked
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `target` as running. Returns false if the guard is already held.
    pub fn try_begin(&self, target: &str) -> bool {
        let mut running = self.lock();
        let busy = match self.granularity {
            GuardGranularity::Global => !running.is_empty(),
            GuardGranularity::PerTarget => running.contains(target),
        };
        if busy {
            return false;
        }
        running.insert(target.to_string())
    }

    /// Clear the busy flag for `target`. Safe to call more than once.
    pub fn end(&self, target: &str) {
        self.lock().remove(target);
    }

    pub fn is_running(&self, target: &str) -> bool {
        self.lock().contains(target)
    }

    pub fn running_targets(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Like [`try_begin`](Self::try_begin), but hands back a ticket that
    /// calls [`end`](Self::end) when dropped, including during a panic unwind.
    pub fn try_acquire(self: &Arc<Self>, target: &str) -> Option<GuardTicket> {
        self.try_begin(target).then(|| GuardTicket {
            guard: Arc::clone(self),
            target: target.to_string(),
        })
    }
}

/// Proof that a target's guard is held; releases it on drop
#[derive(Debug)]
pub struct GuardTicket {
    guard: Arc<ExecutionGuard>,
    target: String,
}

impl GuardTicket {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.guard.end(&self.target);
    }
}
