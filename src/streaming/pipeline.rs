//! Per-client delivery pipeline.
//!
//! An explicit state machine driven by events from the tick subscription,
//! the ready latch, and the completion barrier:
//!
//! ```text
//!        +-----------------------------------------------------------+
//!        v                                                           |
//!   Fetching -> AwaitingReady -> Notifying -> AwaitingBarrier -> AwaitingNextTick
//!
//!   any state --(disconnect / stall / fetch error / source end)--> Closed
//! ```
//!
//! Stages of one client never overlap, and nothing here waits on another
//! client or on the tick source.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::streaming::barrier::BarrierWait;
use crate::streaming::channel::{BufferSet, ControlSender};
use crate::streaming::fetch::Fetcher;
use crate::streaming::protocol::ServerMessage;
use crate::streaming::session::ClientSession;
use crate::tick::{Tick, TickSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    AwaitingReady,
    Notifying,
    AwaitingBarrier,
    AwaitingNextTick,
    Closed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetching => "fetching",
            Stage::AwaitingReady => "awaiting_ready",
            Stage::Notifying => "notifying",
            Stage::AwaitingBarrier => "awaiting_barrier",
            Stage::AwaitingNextTick => "awaiting_next_tick",
            Stage::Closed => "closed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pipeline stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    /// The session was closed (client went away or server shutdown).
    Disconnected,
    /// The tick source terminated.
    SourceEnded,
    /// The control-channel writer is gone.
    ControlClosed,
}

pub struct ClientPipeline<F: Fetcher> {
    session: Arc<ClientSession>,
    fetcher: Arc<F>,
    ticks: TickSubscription<F::State>,
    control: ControlSender,
    stall_timeout: Option<Duration>,
    stage: watch::Sender<Stage>,
    cycle: u64,
}

impl<F: Fetcher> ClientPipeline<F> {
    pub fn new(
        session: Arc<ClientSession>,
        fetcher: Arc<F>,
        ticks: TickSubscription<F::State>,
        control: ControlSender,
    ) -> Self {
        let (stage, _) = watch::channel(Stage::AwaitingNextTick);
        Self {
            session,
            fetcher,
            ticks,
            control,
            stall_timeout: None,
            stage,
            cycle: 0,
        }
    }

    /// Bound the time spent in AwaitingReady and AwaitingBarrier.
    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Observe stage transitions.
    pub fn stages(&self) -> watch::Receiver<Stage> {
        self.stage.subscribe()
    }

    /// Run cycles until the session closes or fails. The session is always
    /// closed on return.
    pub async fn run(mut self) -> Result<PipelineExit> {
        let cancel = self.session.cancellation().clone();
        let outcome = self.drive(&cancel).await;

        self.enter(Stage::Closed);
        self.session.close();

        match &outcome {
            Ok(exit) => tracing::debug!(
                client_id = %self.session.id(),
                cycles = self.cycle,
                ?exit,
                "pipeline finished"
            ),
            Err(e) => tracing::warn!(
                client_id = %self.session.id(),
                cycles = self.cycle,
                error = %e,
                "pipeline failed, closing session"
            ),
        }
        outcome
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<PipelineExit> {
        self.enter(Stage::AwaitingNextTick);
        let mut tick = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PipelineExit::Disconnected),
            next = self.ticks.next() => match next {
                Some(tick) => tick,
                None => return Ok(PipelineExit::SourceEnded),
            },
        };

        loop {
            self.enter(Stage::Fetching);
            let Some(set) = self.fetch(&tick, cancel).await? else {
                return Ok(PipelineExit::Disconnected);
            };

            self.enter(Stage::AwaitingReady);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PipelineExit::Disconnected),
                acquired = self.stall_guard(Stage::AwaitingReady, self.session.latch().acquire()) => acquired?,
            }
            if cancel.is_cancelled() {
                return Ok(PipelineExit::Disconnected);
            }

            self.enter(Stage::Notifying);
            let (wait, update) = self.notify(&set);
            let queued = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PipelineExit::Disconnected),
                sent = self.control.send(update) => sent.is_ok(),
            };
            if !queued {
                return Ok(PipelineExit::ControlClosed);
            }

            self.enter(Stage::AwaitingBarrier);
            let fired = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PipelineExit::Disconnected),
                fired = self.stall_guard(Stage::AwaitingBarrier, wait.wait()) => fired?,
            };
            if !fired {
                return Ok(PipelineExit::Disconnected);
            }
            self.session.stats().record_completed();
            tracing::debug!(
                client_id = %self.session.id(),
                cycle = self.cycle,
                tick = tick.seq(),
                "all buffers pulled"
            );

            self.enter(Stage::AwaitingNextTick);
            tick = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PipelineExit::Disconnected),
                next = self.ticks.next() => match next {
                    Some(tick) => tick,
                    None => return Ok(PipelineExit::SourceEnded),
                },
            };
        }
    }

    fn enter(&self, stage: Stage) {
        let previous = self.stage.send_replace(stage);
        if previous != stage {
            tracing::trace!(
                client_id = %self.session.id(),
                from = %previous,
                to = %stage,
                "stage transition"
            );
        }
    }

    async fn stall_guard<T>(&self, stage: Stage, fut: impl Future<Output = T>) -> Result<T> {
        match self.stall_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                Error::Stalled {
                    client_id: self.session.id(),
                    stage,
                    waited: limit,
                }
            }),
            None => Ok(fut.await),
        }
    }

    /// Run the collaborator on its own task. On disconnect the task is left to
    /// finish and its result is dropped unseen.
    async fn fetch(
        &self,
        tick: &Tick<F::State>,
        cancel: &CancellationToken,
    ) -> Result<Option<BufferSet>> {
        let fetcher = Arc::clone(&self.fetcher);
        let profile = Arc::clone(self.session.profile());
        let task_tick = tick.clone();
        let task = tokio::spawn(async move {
            fetcher
                .fetch(&task_tick, &profile.buffers, &profile.programs)
                .await
        });

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(
                    client_id = %self.session.id(),
                    tick = tick.seq(),
                    "closed during fetch, discarding result"
                );
                return Ok(None);
            }
            joined = task => joined,
        };

        match joined {
            Ok(Ok(set)) => Ok(Some(set)),
            Ok(Err(e)) => Err(Error::fetch(self.session.id(), tick.seq(), e)),
            Err(e) => Err(Error::fetch(self.session.id(), tick.seq(), e)),
        }
    }

    /// Cache the set and re-arm the barrier. Returns the barrier wait and the
    /// notification to queue.
    fn notify(&mut self, set: &BufferSet) -> (BarrierWait, ServerMessage) {
        self.cycle += 1;
        let cycle = self.cycle;
        let profile = self.session.profile();

        for name in profile.buffers.iter().filter(|name| !set.contains(name)) {
            tracing::warn!(
                client_id = %self.session.id(),
                cycle,
                buffer = %name,
                "fetched set is missing an active buffer"
            );
        }

        self.session.cache().replace(cycle, set);
        let wait = self.session.barrier().arm(cycle, profile.buffers.iter());
        self.session.stats().record_notify(set.compressed_bytes());

        tracing::debug!(
            client_id = %self.session.id(),
            cycle,
            tick = set.tick,
            buffers = set.len(),
            bytes = set.compressed_bytes(),
            "notified buffer set"
        );
        (wait, ServerMessage::vbo_update(cycle, set))
    }
}
