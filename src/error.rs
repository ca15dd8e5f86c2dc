//! Error types for the delivery pipeline.

use std::time::Duration;

use crate::streaming::pipeline::Stage;
use crate::streaming::session::ClientId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The fetch-and-compress collaborator failed for a cycle.
    #[error("fetch failed for client {client_id} at tick {tick}: {source}")]
    Fetch {
        client_id: ClientId,
        tick: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A session waited longer than the configured stall timeout.
    #[error("client {client_id} stalled in {stage} for {waited:?}")]
    Stalled {
        client_id: ClientId,
        stage: Stage,
        waited: Duration,
    },

    /// A control-channel frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a collaborator failure as a fetch error.
    pub fn fetch(client_id: ClientId, tick: u64, source: impl Into<anyhow::Error>) -> Self {
        Self::Fetch {
            client_id,
            tick,
            source: source.into(),
        }
    }
}
