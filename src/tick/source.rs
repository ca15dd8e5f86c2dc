//! Tick source: drives the external stepper at a fixed cadence.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::tick::TickPublisher;

/// The simulation being streamed.
///
/// `step` may be CPU heavy; the source runs it on the blocking pool.
pub trait Stepper: Send + 'static {
    type State: Send + Sync + 'static;

    /// Advance one step. `None` means the simulation has finished.
    fn step(&mut self) -> Option<Self::State>;

    /// Apply a client-supplied parameter update, verbatim from the control channel.
    fn apply_settings(&mut self, settings: Value) -> Result<()>;
}

/// Forwards `graph_settings` payloads to the running source.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: mpsc::UnboundedSender<Value>,
}

impl SettingsHandle {
    /// Queue a settings payload. Returns false if the source has stopped.
    pub fn forward(&self, payload: Value) -> bool {
        self.tx.send(payload).is_ok()
    }
}

pub struct TickSource<T: Stepper> {
    stepper: T,
    interval: Duration,
    settings_rx: mpsc::UnboundedReceiver<Value>,
}

impl<T: Stepper> TickSource<T> {
    pub fn new(stepper: T, interval: Duration) -> (Self, SettingsHandle) {
        let (tx, settings_rx) = mpsc::unbounded_channel();
        let source = Self {
            stepper,
            interval,
            settings_rx,
        };
        (source, SettingsHandle { tx })
    }

    pub fn spawn(
        self,
        publisher: TickPublisher<T::State>,
        shutdown: CancellationToken,
    ) -> JoinHandle<Result<u64>> {
        tokio::spawn(self.run(publisher, shutdown))
    }

    /// Step until the stepper finishes or `shutdown` fires.
    /// Returns the number of ticks published.
    pub async fn run(
        self,
        mut publisher: TickPublisher<T::State>,
        shutdown: CancellationToken,
    ) -> Result<u64> {
        let Self {
            mut stepper,
            interval,
            mut settings_rx,
        } = self;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut published = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Ok(settings) = settings_rx.try_recv() {
                if let Err(e) = stepper.apply_settings(settings) {
                    tracing::warn!(error = %e, "rejected graph settings");
                }
            }

            let (returned, state) = tokio::task::spawn_blocking(move || {
                let state = stepper.step();
                (stepper, state)
            })
            .await
            .context("stepper panicked")?;
            stepper = returned;

            match state {
                Some(state) => {
                    let seq = publisher.publish(state);
                    published += 1;
                    tracing::trace!(tick = seq, "published tick");
                }
                None => {
                    tracing::info!(published, "stepper finished, closing tick source");
                    break;
                }
            }
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::channel;

    struct Counter {
        value: u64,
        step_by: u64,
        limit: u64,
    }

    impl Stepper for Counter {
        type State = u64;

        fn step(&mut self) -> Option<u64> {
            if self.value >= self.limit {
                return None;
            }
            self.value += self.step_by;
            Some(self.value)
        }

        fn apply_settings(&mut self, settings: Value) -> Result<()> {
            self.step_by = settings
                .get("step_by")
                .and_then(Value::as_u64)
                .context("missing step_by")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_source_publishes_until_stepper_finishes() {
        let (source, _settings) = TickSource::new(
            Counter {
                value: 0,
                step_by: 1,
                limit: 3,
            },
            Duration::from_millis(1),
        );
        let (publisher, broadcaster) = channel();
        let published = source
            .run(publisher, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(published, 3);
        let latest = broadcaster.latest().unwrap();
        assert_eq!(latest.seq(), 3);
        assert_eq!(**latest.state(), 3);

        let mut sub = broadcaster.subscribe();
        assert_eq!(sub.next().await.unwrap().seq(), 3);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_settings_applied_before_next_step() {
        let (source, settings) = TickSource::new(
            Counter {
                value: 0,
                step_by: 1,
                limit: 100,
            },
            Duration::from_millis(1),
        );
        assert!(settings.forward(serde_json::json!({ "step_by": 50 })));
        assert!(settings.forward(serde_json::json!({ "bogus": true })));

        let (publisher, broadcaster) = channel();
        let published = source
            .run(publisher, CancellationToken::new())
            .await
            .unwrap();

        // 50, 100 then finished
        assert_eq!(published, 2);
        assert_eq!(**broadcaster.latest().unwrap().state(), 100);
    }

    #[tokio::test]
    async fn test_shutdown_stops_source() {
        let (source, settings) = TickSource::new(
            Counter {
                value: 0,
                step_by: 1,
                limit: u64::MAX,
            },
            Duration::from_millis(5),
        );
        let (publisher, _broadcaster) = channel();
        let shutdown = CancellationToken::new();
        let handle = source.spawn(publisher, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert!(!settings.forward(Value::Null));
    }
}
