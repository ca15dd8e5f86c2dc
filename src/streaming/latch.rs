//! Per-client ready latch.
//!
//! A boolean with replay-of-last-value semantics. The pipeline takes it
//! (true -> false) before each notification; only a client acknowledgement
//! gives it back. At most one buffer set is ever in flight per client.

use tokio::sync::watch;

#[derive(Debug)]
pub struct ReadyLatch {
    tx: watch::Sender<bool>,
}

impl Default for ReadyLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyLatch {
    /// A latch starts ready so the first cycle can proceed immediately.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Take the latch if it is currently set. Atomic with respect to other callers.
    pub fn try_acquire(&self) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready {
                *ready = false;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the latch is set, then take it.
    pub async fn acquire(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if self.try_acquire() {
                return;
            }
            // The sender lives in `self`, so the channel cannot close under us.
            let _ = rx.wait_for(|ready| *ready).await;
        }
    }

    /// Set the latch. Returns true if it was previously taken.
    pub fn release(&self) -> bool {
        !self.tx.send_replace(true)
    }
}
