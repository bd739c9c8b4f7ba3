use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tilexr_common::{Aabb, ZoneCoord};

use crate::vertex::{Vertex, ZoneMesh};

/// Published, immutable geometry of one zone at one version.
///
/// A `ZoneBuffer` is only ever constructed from a fully written staging mesh
/// and never mutated afterwards; replacing a zone means publishing a new
/// buffer. When the last reference drops, the storage goes back to the pool
/// it came from.
#[derive(Debug)]
pub struct ZoneBuffer {
    zone: ZoneCoord,
    version: u64,
    mesh: ZoneMesh,
    recycle: Weak<PoolShared>,
}

impl ZoneBuffer {
    pub(crate) fn new(zone: ZoneCoord, version: u64, mesh: ZoneMesh, pool: &BufferPool) -> Self {
        Self {
            zone,
            version,
            mesh,
            recycle: Arc::downgrade(&pool.shared),
        }
    }

    pub fn zone(&self) -> ZoneCoord {
        self.zone
    }

    /// Monotonically increasing per-zone version.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.mesh.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.mesh.indices
    }

    pub fn index_count(&self) -> u32 {
        self.mesh.indices.len() as u32
    }

    pub fn bounds(&self) -> Aabb {
        self.mesh.bounds
    }

    /// Zones with no terrain and no occupants publish an empty buffer.
    pub fn is_empty(&self) -> bool {
        self.mesh.is_empty()
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        self.mesh.vertex_bytes()
    }

    pub fn index_bytes(&self) -> &[u8] {
        self.mesh.index_bytes()
    }
}

impl Drop for ZoneBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.recycle.upgrade() {
            pool.give_back(std::mem::take(&mut self.mesh));
        }
    }
}

#[derive(Debug)]
struct PoolShared {
    free: Mutex<Vec<ZoneMesh>>,
    max_retained: usize,
    allocated: AtomicUsize,
    reused: AtomicUsize,
    returned: AtomicUsize,
}

impl PoolShared {
    fn give_back(&self, mut mesh: ZoneMesh) {
        mesh.clear();
        let mut free = self.free.lock();
        if free.len() < self.max_retained {
            free.push(mesh);
            self.returned.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Counters describing pool behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: usize,
    pub reused: usize,
    pub returned: usize,
    pub available: usize,
}

/// Reuse pool for zone mesh storage.
///
/// Buffers released by old snapshots land here instead of being freed, and
/// the uploader draws its staging meshes from it.
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(tilexr_common::ZONE_COUNT * 2)
    }
}

impl BufferPool {
    /// Pool that keeps at most `max_retained` idle meshes.
    pub fn new(max_retained: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(Vec::new()),
                max_retained,
                allocated: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
                returned: AtomicUsize::new(0),
            }),
        }
    }

    /// An empty mesh to write into, recycled when possible.
    pub fn take(&self) -> ZoneMesh {
        if let Some(mesh) = self.shared.free.lock().pop() {
            self.shared.reused.fetch_add(1, Ordering::Relaxed);
            return mesh;
        }
        self.shared.allocated.fetch_add(1, Ordering::Relaxed);
        ZoneMesh::new()
    }

    /// Return a staging mesh that was never published.
    pub fn give_back(&self, mesh: ZoneMesh) {
        self.shared.give_back(mesh);
    }

    pub fn available(&self) -> usize {
        self.shared.free.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.shared.allocated.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            returned: self.shared.returned.load(Ordering::Relaxed),
            available: self.available(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_mesh() -> ZoneMesh {
        let mut mesh = ZoneMesh::new();
        mesh.push_floor(0.0, 0.0, 1.0, 1.0, 0.0, 1);
        mesh
    }

    #[test]
    fn dropped_buffer_returns_storage_to_pool() {
        let pool = BufferPool::new(8);
        let buffer = Arc::new(ZoneBuffer::new(
            ZoneCoord::new(0, 0),
            1,
            filled_mesh(),
            &pool,
        ));
        let second_ref = Arc::clone(&buffer);
        drop(buffer);
        assert_eq!(pool.available(), 0);
        drop(second_ref);
        assert_eq!(pool.available(), 1);

        let recycled = pool.take();
        assert!(recycled.is_empty());
        assert!(recycled.vertices.capacity() >= 4);
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn pool_caps_retained_meshes() {
        let pool = BufferPool::new(1);
        pool.give_back(filled_mesh());
        pool.give_back(filled_mesh());
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn buffer_outliving_pool_is_fine() {
        let pool = BufferPool::new(4);
        let buffer = ZoneBuffer::new(ZoneCoord::new(1, 1), 3, filled_mesh(), &pool);
        drop(pool);
        assert_eq!(buffer.version(), 3);
        drop(buffer);
    }
}
