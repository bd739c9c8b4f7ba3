use std::sync::Arc;

use parking_lot::Mutex;

use crate::snapshot::SceneSnapshot;

/// Single-slot handoff of the latest snapshot from the game thread to the
/// render threads.
///
/// Publishing and reading are pointer swaps under a lock that never spans
/// any other work. A snapshot released by the swap is dropped after the lock
/// is released.
#[derive(Debug)]
pub struct SnapshotExchange {
    latest: Mutex<Arc<SceneSnapshot>>,
}

impl Default for SnapshotExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotExchange {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(Arc::new(SceneSnapshot::empty())),
        }
    }

    /// Make `snapshot` the latest one. Snapshots older than the current one
    /// are refused and returned.
    pub fn publish(&self, snapshot: SceneSnapshot) -> Result<Arc<SceneSnapshot>, SceneSnapshot> {
        let snapshot = Arc::new(snapshot);
        let replaced = {
            let mut latest = self.latest.lock();
            if snapshot.sequence() <= latest.sequence() {
                drop(latest);
                tracing::warn!(sequence = snapshot.sequence(), "refusing stale snapshot");
                return Err(Arc::try_unwrap(snapshot).unwrap_or_else(|s| (*s).clone()));
            }
            std::mem::replace(&mut *latest, Arc::clone(&snapshot))
        };
        drop(replaced);
        Ok(snapshot)
    }

    /// The most recently published snapshot. Never blocks on geometry work.
    pub fn latest(&self) -> Arc<SceneSnapshot> {
        Arc::clone(&self.latest.lock())
    }

    pub fn latest_sequence(&self) -> u64 {
        self.latest.lock().sequence()
    }
}

/// Consumer-side cursor over a [`SnapshotExchange`].
///
/// Holds on to the snapshot used by the last frame so a frame can reuse it
/// when nothing newer was published.
#[derive(Debug)]
pub struct SnapshotReader {
    exchange: Arc<SnapshotExchange>,
    current: Arc<SceneSnapshot>,
}

impl SnapshotReader {
    pub fn new(exchange: Arc<SnapshotExchange>) -> Self {
        let current = exchange.latest();
        Self { exchange, current }
    }

    /// Pick up the latest snapshot if it is newer. Returns whether it changed.
    pub fn refresh(&mut self) -> bool {
        let latest = self.exchange.latest();
        if latest.sequence() > self.current.sequence() {
            self.current = latest;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> &Arc<SceneSnapshot> {
        &self.current
    }

    /// Drop the held snapshot, e.g. on shutdown, so its buffers can be recycled.
    pub fn release(&mut self) {
        self.current = Arc::new(SceneSnapshot::empty());
    }
}
