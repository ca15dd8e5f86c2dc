//! Latest-value tick broadcaster.
//!
//! Backed by a `tokio::sync::watch` channel: a single slot holding the current
//! tick plus a wake list of subscribers. Publishing replaces the slot and never
//! waits for anyone.

use tokio::sync::watch;

use crate::tick::Tick;

/// Create a connected publisher/broadcaster pair with no tick published yet.
pub fn channel<S>() -> (TickPublisher<S>, TickBroadcaster<S>) {
    let (tx, rx) = watch::channel(None);
    (TickPublisher { tx, next_seq: 1 }, TickBroadcaster { rx })
}

/// Producer side. Dropping it completes every subscription.
#[derive(Debug)]
pub struct TickPublisher<S> {
    tx: watch::Sender<Option<Tick<S>>>,
    next_seq: u64,
}

impl<S> TickPublisher<S> {
    /// Publish a new snapshot, replacing the previous one. Returns its sequence number.
    pub fn publish(&mut self, state: S) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tx.send_replace(Some(Tick::new(seq, state)));
        seq
    }

    /// Number of live subscriptions (plus broadcaster handles).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Subscription factory shared by every connection.
#[derive(Debug)]
pub struct TickBroadcaster<S> {
    rx: watch::Receiver<Option<Tick<S>>>,
}

impl<S> Clone for TickBroadcaster<S> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<S> TickBroadcaster<S> {
    /// Start a new subscription. Never blocks.
    ///
    /// The first element yielded is the most recent tick at the time it is
    /// polled (or the first one ever published, if none exists yet).
    pub fn subscribe(&self) -> TickSubscription<S> {
        TickSubscription {
            rx: self.rx.clone(),
            primed: false,
        }
    }

    /// The tick currently held in the slot.
    pub fn latest(&self) -> Option<Tick<S>> {
        self.rx.borrow().clone()
    }
}

/// Lazy, non-restartable sequence of ticks for one subscriber.
#[derive(Debug)]
pub struct TickSubscription<S> {
    rx: watch::Receiver<Option<Tick<S>>>,
    primed: bool,
}

impl<S> TickSubscription<S> {
    /// Wait for the next tick. `None` once the source has terminated.
    ///
    /// Ticks published while the subscriber was busy are skipped; only the
    /// newest is delivered, so sequence numbers observed here strictly increase.
    pub async fn next(&mut self) -> Option<Tick<S>> {
        if !self.primed {
            let current = self.rx.wait_for(Option::is_some).await.ok()?.clone();
            self.primed = true;
            return current;
        }

        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}
