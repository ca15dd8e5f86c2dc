//! Completion barrier: reconciles "notified N buffers" with "N buffers pulled".
//!
//! Armed once per cycle with the set of expected buffer names. Each pull
//! records its name; the continuation fires exactly once, when every expected
//! name has been recorded. Records for other cycles, unknown names,
//! duplicates, and anything after firing are ignored.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

/// What a single `record` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Counted; the barrier is still waiting.
    Counted { received: usize, expected: usize },
    /// This record completed the barrier and fired the continuation.
    Completed,
    /// Name already recorded this cycle.
    Duplicate,
    /// Name is not part of the expected set.
    Unexpected,
    /// Record belongs to a different cycle.
    Stale { current: u64 },
    /// Barrier already fired for this cycle.
    AlreadyFired,
    /// Barrier is not armed (session closed or nothing notified yet).
    Disarmed,
}

struct Armed {
    cycle: u64,
    expected: HashSet<String>,
    received: HashSet<String>,
    notify: Option<oneshot::Sender<()>>,
}

impl Armed {
    fn fired(&self) -> bool {
        self.notify.is_none()
    }
}

/// Resolves when the barrier armed for one cycle fires.
#[derive(Debug)]
pub struct BarrierWait {
    cycle: u64,
    rx: oneshot::Receiver<()>,
}

impl BarrierWait {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// True when the barrier fired; false if it was re-armed or disarmed first.
    pub async fn wait(self) -> bool {
        self.rx.await.is_ok()
    }
}

#[derive(Default)]
pub struct CompletionBarrier {
    state: Mutex<Option<Armed>>,
}

impl std::fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("progress", &self.progress())
            .finish()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Armed>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reset to (0, expected) for `cycle`. Any previous waiter is released with `false`.
    ///
    /// An empty expected set fires immediately.
    pub fn arm<I, N>(&self, cycle: u64, expected: I) -> BarrierWait
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let (tx, rx) = oneshot::channel();
        let expected: HashSet<String> = expected.into_iter().map(Into::into).collect();

        let notify = if expected.is_empty() {
            let _ = tx.send(());
            None
        } else {
            Some(tx)
        };

        *self.lock() = Some(Armed {
            cycle,
            expected,
            received: HashSet::new(),
            notify,
        });

        BarrierWait { cycle, rx }
    }

    /// Record one pull of `name` for `cycle`. Safe to call concurrently in any order.
    pub fn record(&self, cycle: u64, name: &str) -> RecordOutcome {
        let mut guard = self.lock();
        let Some(armed) = guard.as_mut() else {
            return RecordOutcome::Disarmed;
        };

        if armed.cycle != cycle {
            return RecordOutcome::Stale {
                current: armed.cycle,
            };
        }
        if armed.fired() {
            return RecordOutcome::AlreadyFired;
        }
        if !armed.expected.contains(name) {
            return RecordOutcome::Unexpected;
        }
        if !armed.received.insert(name.to_string()) {
            return RecordOutcome::Duplicate;
        }

        if armed.received.len() == armed.expected.len() {
            if let Some(tx) = armed.notify.take() {
                let _ = tx.send(());
            }
            RecordOutcome::Completed
        } else {
            RecordOutcome::Counted {
                received: armed.received.len(),
                expected: armed.expected.len(),
            }
        }
    }

    /// Drop all state; pending waiters resolve `false`.
    pub fn disarm(&self) {
        self.lock().take();
    }

    /// `(received, expected)` for the armed cycle.
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.lock()
            .as_ref()
            .map(|armed| (armed.received.len(), armed.expected.len()))
    }

    pub fn armed_cycle(&self) -> Option<u64> {
        self.lock().as_ref().map(|armed| armed.cycle)
    }

    pub fn is_fired(&self) -> bool {
        self.lock().as_ref().is_some_and(Armed::fired)
    }
}
