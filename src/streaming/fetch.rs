//! Fetch-and-compress collaborator.

use anyhow::Result;
use async_trait::async_trait;

use crate::streaming::channel::BufferSet;
use crate::tick::Tick;

/// Computes the buffer set a client needs for one tick.
///
/// Called once per cycle per client, concurrently across clients, with no
/// lock held. Results are not shared between clients. Implementations should
/// move CPU-heavy work (compression) off the async workers.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    type State: Send + Sync + 'static;

    async fn fetch(
        &self,
        tick: &Tick<Self::State>,
        buffers: &[String],
        programs: &[String],
    ) -> Result<BufferSet>;
}
