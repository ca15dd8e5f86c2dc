//! Channel and payload types for the delivery pipeline.
//!
//! Pipeline -> control writer uses a bounded channel. The notify stage waits
//! for room; rejection replies are dropped when the writer is backed up.

use crate::streaming::protocol::ServerMessage;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Content type the data endpoint advertises for buffer payloads
pub const BUFFER_CONTENT_TYPE: &str = "text/javascript";

/// Default tick cadence (~30 Hz)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 33;

/// Default stall timeout for AwaitingReady / AwaitingBarrier
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 30;

/// Outbound control frames queued per connection
///
/// At most one `vbo_update` is in flight, so this only has to absorb hello
/// plus a burst of rejection replies.
pub const CONTROL_QUEUE_CAPACITY: usize = 16;

// =============================================================================
// Encoding
// =============================================================================

/// HTTP content coding applied to every buffer payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Gzip,
    Zstd,
}

impl Encoding {
    /// Value for the `Content-Encoding` header
    pub fn content_encoding(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Zstd => "zstd",
        }
    }

    /// Inclusive range of accepted compression levels
    pub fn level_range(self) -> std::ops::RangeInclusive<i32> {
        match self {
            Encoding::Gzip => 0..=9,
            Encoding::Zstd => 1..=22,
        }
    }
}

// =============================================================================
// BufferSet: fetcher -> pipeline -> cache
// =============================================================================

/// Sizes sent on the control channel in place of the bulk bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMeta {
    /// Uncompressed length in bytes
    pub byte_length: usize,

    /// Number of elements (vertices, indices, ...)
    pub element_count: usize,

    /// Length of the compressed payload on the data channel
    pub compressed_length: usize,
}

/// One compressed buffer and its metadata.
#[derive(Debug, Clone)]
pub struct EncodedBuffer {
    pub data: Bytes,
    pub meta: BufferMeta,
}

/// Everything computed for one client for one tick.
#[derive(Debug, Clone)]
pub struct BufferSet {
    /// Sequence number of the tick this set was computed from
    pub tick: u64,

    /// Content coding of every payload in the set
    pub encoding: Encoding,

    /// Programs active for this set, forwarded as-is in the notification
    pub programs: Vec<String>,

    buffers: BTreeMap<String, EncodedBuffer>,
}

impl BufferSet {
    pub fn new(tick: u64, encoding: Encoding) -> Self {
        Self {
            tick,
            encoding,
            programs: Vec::new(),
            buffers: BTreeMap::new(),
        }
    }

    pub fn with_programs(mut self, programs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.programs = programs.into_iter().map(Into::into).collect();
        self
    }

    /// Add or replace a buffer. `byte_length` is the uncompressed size.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        data: Bytes,
        byte_length: usize,
        element_count: usize,
    ) {
        let meta = BufferMeta {
            byte_length,
            element_count,
            compressed_length: data.len(),
        };
        self.buffers.insert(name.into(), EncodedBuffer { data, meta });
    }

    pub fn get(&self, name: &str) -> Option<&EncodedBuffer> {
        self.buffers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.buffers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.buffers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EncodedBuffer)> {
        self.buffers.iter()
    }

    /// Metadata for the control-channel notification (no payload bytes)
    pub fn metadata(&self) -> BTreeMap<String, BufferMeta> {
        self.buffers
            .iter()
            .map(|(name, buf)| (name.clone(), buf.meta))
            .collect()
    }

    /// Total bytes a client will pull for this set
    pub fn compressed_bytes(&self) -> u64 {
        self.buffers.values().map(|b| b.data.len() as u64).sum()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

// =============================================================================
// Channel types
// =============================================================================

/// Outbound control frames, pipeline/handlers -> socket writer
pub type ControlSender = mpsc::Sender<ServerMessage>;

/// Receiving end owned by the socket writer
pub type ControlReceiver = mpsc::Receiver<ServerMessage>;

/// Create the per-connection outbound control channel
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    mpsc::channel(CONTROL_QUEUE_CAPACITY)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_set_metadata() {
        let mut set = BufferSet::new(4, Encoding::Gzip).with_programs(["points"]);
        set.insert("position", Bytes::from_static(b"abcd"), 24, 2);
        set.insert("color", Bytes::from_static(b"xy"), 24, 2);

        assert_eq!(set.len(), 2);
        assert!(set.contains("color"));
        assert_eq!(set.compressed_bytes(), 6);
        assert_eq!(set.programs, vec!["points".to_string()]);

        let meta = set.metadata();
        let names: Vec<_> = meta.keys().cloned().collect();
        assert_eq!(names, vec!["color", "position"]);
        assert_eq!(
            meta["position"],
            BufferMeta {
                byte_length: 24,
                element_count: 2,
                compressed_length: 4,
            }
        );
    }

    #[test]
    fn test_insert_replaces() {
        let mut set = BufferSet::new(1, Encoding::Zstd);
        set.insert("position", Bytes::from_static(b"old"), 3, 1);
        set.insert("position", Bytes::from_static(b"newer"), 5, 1);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("position").unwrap().data, Bytes::from_static(b"newer"));
    }

    #[test]
    fn test_encoding_header_values() {
        assert_eq!(Encoding::default(), Encoding::Gzip);
        assert_eq!(Encoding::Gzip.content_encoding(), "gzip");
        assert_eq!(Encoding::Zstd.content_encoding(), "zstd");
        assert!(Encoding::Gzip.level_range().contains(&9));
        assert!(!Encoding::Zstd.level_range().contains(&0));
    }

    #[tokio::test]
    async fn test_control_channel() {
        let (tx, mut rx) = control_channel();
        tx.send(ServerMessage::Error {
            reason: "nope".into(),
        })
        .await
        .unwrap();
        drop(tx);

        match rx.recv().await.unwrap() {
            ServerMessage::Error { reason } => assert_eq!(reason, "nope"),
            other => panic!("Expected Error message, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_control_channel_is_bounded() {
        let (tx, _rx) = control_channel();
        for _ in 0..CONTROL_QUEUE_CAPACITY {
            tx.try_send(ServerMessage::Error { reason: "x".into() }).unwrap();
        }
        assert!(matches!(
            tx.try_send(ServerMessage::Error { reason: "x".into() }),
            Err(mpsc::error::TrySendError::Full(_))
        ));
    }
}
