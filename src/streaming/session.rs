//! Client sessions and the registry that finds them by id.
//!
//! Each session owns its latch, cache and barrier. The registry replaces any
//! notion of server-wide per-client maps: the data endpoint resolves a session
//! here and then touches only that session's state.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::streaming::barrier::CompletionBarrier;
use crate::streaming::cache::BufferCache;
use crate::streaming::latch::ReadyLatch;

// =============================================================================
// Identity and configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Active buffers and programs declared by the renderer for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderProfile {
    /// Ordered buffer names; the barrier expects one pull per name
    pub buffers: Vec<String>,
    pub programs: Vec<String>,
}

impl RenderProfile {
    pub fn new<B, P>(
        buffers: impl IntoIterator<Item = B>,
        programs: impl IntoIterator<Item = P>,
    ) -> Self
    where
        B: Into<String>,
        P: Into<String>,
    {
        Self {
            buffers: buffers.into_iter().map(Into::into).collect(),
            programs: programs.into_iter().map(Into::into).collect(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters for operators. Lock-free, updated from pipeline and handlers.
#[derive(Debug, Default)]
pub struct SessionStats {
    cycles_notified: AtomicU64,
    cycles_completed: AtomicU64,
    bytes_notified: AtomicU64,
    pulls_served: AtomicU64,
    pulls_failed: AtomicU64,
    acknowledgements: AtomicU64,
    last_ack_elapsed_ms: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub cycles_notified: u64,
    pub cycles_completed: u64,
    pub bytes_notified: u64,
    pub pulls_served: u64,
    pub pulls_failed: u64,
    pub acknowledgements: u64,
    pub last_ack_elapsed_ms: f64,
}

impl SessionStats {
    pub fn record_notify(&self, bytes: u64) {
        self.cycles_notified.fetch_add(1, Ordering::Relaxed);
        self.bytes_notified.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pull(&self, served: bool) {
        let counter = if served {
            &self.pulls_served
        } else {
            &self.pulls_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self, elapsed_ms: f64) {
        self.acknowledgements.fetch_add(1, Ordering::Relaxed);
        self.last_ack_elapsed_ms
            .store(elapsed_ms.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_notified: self.cycles_notified.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            bytes_notified: self.bytes_notified.load(Ordering::Relaxed),
            pulls_served: self.pulls_served.load(Ordering::Relaxed),
            pulls_failed: self.pulls_failed.load(Ordering::Relaxed),
            acknowledgements: self.acknowledgements.load(Ordering::Relaxed),
            last_ack_elapsed_ms: f64::from_bits(self.last_ack_elapsed_ms.load(Ordering::Relaxed)),
        }
    }
}

// =============================================================================
// ClientSession
// =============================================================================

#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    profile: Arc<RenderProfile>,
    latch: ReadyLatch,
    cache: BufferCache,
    barrier: CompletionBarrier,
    cancel: CancellationToken,
    stats: SessionStats,
    connected_at: Instant,
}

impl ClientSession {
    pub fn new(id: ClientId, profile: RenderProfile) -> Self {
        Self {
            id,
            profile: Arc::new(profile),
            latch: ReadyLatch::new(),
            cache: BufferCache::new(),
            barrier: CompletionBarrier::new(),
            cancel: CancellationToken::new(),
            stats: SessionStats::default(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn profile(&self) -> &Arc<RenderProfile> {
        &self.profile
    }

    pub fn latch(&self) -> &ReadyLatch {
        &self.latch
    }

    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    pub fn barrier(&self) -> &CompletionBarrier {
        &self.barrier
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Fires when the session is closed, for any reason.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Handle a `received_buffers` acknowledgement: reopen the latch.
    ///
    /// Returns false if the latch was already open (a duplicate or early ack).
    pub fn acknowledge(&self, elapsed_ms: f64) -> bool {
        self.stats.record_ack(elapsed_ms);
        if self.is_closed() {
            return false;
        }
        self.latch.release()
    }

    /// Cancel the pipeline and discard cache and barrier state. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        self.cache.clear();
        self.barrier.disarm();
    }
}

// =============================================================================
// SessionRegistry
// =============================================================================

#[derive(Debug)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<ClientId, Arc<ClientSession>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClientId, Arc<ClientSession>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, Arc<ClientSession>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create and register a session with a fresh id.
    pub fn register(&self, profile: RenderProfile) -> Arc<ClientSession> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(ClientSession::new(id, profile));
        self.write().insert(id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        self.read().get(&id).cloned()
    }

    /// Unregister and close a session.
    pub fn remove(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        let session = self.write().remove(&id)?;
        session.close();
        Some(session)
    }

    /// Close every session, e.g. on shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        drained.len()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.read().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::channel::{BufferSet, Encoding};
    use bytes::Bytes;

    fn profile() -> RenderProfile {
        RenderProfile::new(["position", "color"], ["points"])
    }

    #[test]
    fn test_register_assigns_increasing_ids() {
        let registry = SessionRegistry::new();
        let a = registry.register(profile());
        let b = registry.register(profile());

        assert!(b.id() > a.id());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![a.id(), b.id()]);
        assert!(Arc::ptr_eq(&registry.get(a.id()).unwrap(), &a));
    }

    #[test]
    fn test_remove_closes_session() {
        let registry = SessionRegistry::new();
        let session = registry.register(profile());

        let mut set = BufferSet::new(1, Encoding::Gzip);
        set.insert("position", Bytes::from_static(b"p"), 1, 1);
        session.cache().replace(1, &set);
        let _wait = session.barrier().arm(1, ["position"]);

        let removed = registry.remove(session.id()).unwrap();
        assert!(removed.is_closed());
        assert!(removed.cache().is_empty());
        assert_eq!(removed.barrier().progress(), None);
        assert!(registry.get(session.id()).is_none());
        assert!(registry.remove(session.id()).is_none());
    }

    #[test]
    fn test_acknowledge_reopens_latch() {
        let session = ClientSession::new(ClientId::new(1), profile());
        assert!(session.latch().try_acquire());

        assert!(session.acknowledge(12.0));
        assert!(session.latch().is_ready());
        assert!(!session.acknowledge(3.5));

        let stats = session.stats().snapshot();
        assert_eq!(stats.acknowledgements, 2);
        assert_eq!(stats.last_ack_elapsed_ms, 3.5);
    }

    #[test]
    fn test_acknowledge_after_close_ignored() {
        let session = ClientSession::new(ClientId::new(1), profile());
        assert!(session.latch().try_acquire());
        session.close();

        assert!(!session.acknowledge(1.0));
        assert!(!session.latch().is_ready());
    }

    #[test]
    fn test_close_all() {
        let registry = SessionRegistry::new();
        let a = registry.register(profile());
        let b = registry.register(profile());

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert!(a.is_closed() && b.is_closed());
    }
}
