//! Per-session buffer cache read by the data endpoint.
//!
//! Holds only the most recent buffer set, tagged with the cycle it was
//! notified in. A new set replaces the old one wholesale.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::streaming::channel::{BufferSet, Encoding};
use crate::streaming::session::ClientId;

/// Why a pull could not be served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheMiss {
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("no buffer set has been notified yet")]
    Empty,

    #[error("unknown buffer {name:?} in cycle {cycle}")]
    UnknownBuffer { name: String, cycle: u64 },

    #[error("cycle {requested} superseded by cycle {current}")]
    Stale { requested: u64, current: u64 },
}

impl CacheMiss {
    /// The cycle a failed pull should be recorded against, if any.
    pub fn cycle(&self) -> Option<u64> {
        match self {
            CacheMiss::UnknownBuffer { cycle, .. } => Some(*cycle),
            CacheMiss::Stale { requested, .. } => Some(*requested),
            CacheMiss::UnknownClient(_) | CacheMiss::Empty => None,
        }
    }
}

/// A payload served to one pull.
#[derive(Debug, Clone)]
pub struct CachedBuffer {
    pub cycle: u64,
    pub encoding: Encoding,
    pub data: Bytes,
}

struct CachedSet {
    cycle: u64,
    encoding: Encoding,
    buffers: HashMap<String, Bytes>,
}

#[derive(Default)]
pub struct BufferCache {
    slot: Mutex<Option<CachedSet>>,
}

impl std::fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCache")
            .field("cycle", &self.current_cycle())
            .finish()
    }
}

impl BufferCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedSet>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the cached set with `set`, notified as `cycle`.
    pub fn replace(&self, cycle: u64, set: &BufferSet) {
        let buffers = set
            .iter()
            .map(|(name, buf)| (name.clone(), buf.data.clone()))
            .collect();

        *self.lock() = Some(CachedSet {
            cycle,
            encoding: set.encoding,
            buffers,
        });
    }

    /// Look up `name`. With `cycle`, the pull must match the cached cycle.
    pub fn get(&self, name: &str, cycle: Option<u64>) -> Result<CachedBuffer, CacheMiss> {
        let guard = self.lock();
        let set = guard.as_ref().ok_or(CacheMiss::Empty)?;

        if let Some(requested) = cycle {
            if requested != set.cycle {
                return Err(CacheMiss::Stale {
                    requested,
                    current: set.cycle,
                });
            }
        }

        let data = set
            .buffers
            .get(name)
            .cloned()
            .ok_or_else(|| CacheMiss::UnknownBuffer {
                name: name.to_string(),
                cycle: set.cycle,
            })?;

        Ok(CachedBuffer {
            cycle: set.cycle,
            encoding: set.encoding,
            data,
        })
    }

    pub fn current_cycle(&self) -> Option<u64> {
        self.lock().as_ref().map(|set| set.cycle)
    }

    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, |set| set.buffers.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().take();
    }
}
