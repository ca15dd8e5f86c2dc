//! Simulation ticks and their fan-out.
//!
//! ```text
//! +-----------+   publish   +------------------+   subscribe   +-------------+
//! |  Stepper  | ----------> | TickBroadcaster  | ------------> |  Pipeline N |
//! | (source)  |             | (latest-only)    |               |  (per user) |
//! +-----------+             +------------------+               +-------------+
//!       ^
//!       | graph settings (SettingsHandle)
//! ```
//!
//! The broadcaster never buffers history: it holds exactly one tick, the most
//! recent one, and wakes every subscriber when it is replaced.

pub mod broadcaster;
pub mod source;

use std::sync::Arc;
use std::time::Instant;

pub use broadcaster::{channel, TickBroadcaster, TickPublisher, TickSubscription};
pub use source::{SettingsHandle, Stepper, TickSource};

/// One immutable snapshot of simulation state.
///
/// Cloning a tick is cheap: the state is shared behind an `Arc` and is never
/// mutated after the tick is published.
#[derive(Debug)]
pub struct Tick<S> {
    seq: u64,
    produced_at: Instant,
    state: Arc<S>,
}

impl<S> Tick<S> {
    pub fn new(seq: u64, state: S) -> Self {
        Self {
            seq,
            produced_at: Instant::now(),
            state: Arc::new(state),
        }
    }

    /// Monotonic sequence number, starting at 1 for the first published tick.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn produced_at(&self) -> Instant {
        self.produced_at
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }
}

impl<S> Clone for Tick<S> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            produced_at: self.produced_at,
            state: Arc::clone(&self.state),
        }
    }
}
