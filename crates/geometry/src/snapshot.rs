use std::sync::Arc;

use tilexr_common::{ZONE_COUNT, ZoneCoord};
use tilexr_partition::DirtyZones;

use crate::buffer::ZoneBuffer;

/// Immutable view of every current zone buffer at one capture point.
///
/// Zone buffers are shared between consecutive snapshots; a zone that did not
/// change is the very same `Arc` in both. Dropping the last snapshot that
/// references a buffer returns that buffer's storage to the pool.
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    sequence: u64,
    tick: u64,
    zones: Vec<Option<Arc<ZoneBuffer>>>,
    absent: DirtyZones,
}

impl Default for SceneSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl SceneSnapshot {
    /// Snapshot with no zones, sequence 0. The starting point for the first cycle.
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            tick: 0,
            zones: vec![None; ZONE_COUNT],
            absent: DirtyZones::new(),
        }
    }

    pub(crate) fn from_parts(
        sequence: u64,
        tick: u64,
        zones: Vec<Option<Arc<ZoneBuffer>>>,
        absent: DirtyZones,
    ) -> Self {
        debug_assert_eq!(zones.len(), ZONE_COUNT);
        Self {
            sequence,
            tick,
            zones,
            absent,
        }
    }

    /// Position of this snapshot in its uploader's output. Strictly increasing.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// World tick the snapshot was captured at.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn zone(&self, coord: ZoneCoord) -> Option<&Arc<ZoneBuffer>> {
        coord.index().and_then(|i| self.zones[i].as_ref())
    }

    /// Present zones in index order.
    pub fn zones(&self) -> impl Iterator<Item = &Arc<ZoneBuffer>> + '_ {
        self.zones.iter().flatten()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.iter().filter(|z| z.is_some()).count()
    }

    /// Zones whose geometry failed to build in the cycle that produced this snapshot.
    pub fn absent(&self) -> &DirtyZones {
        &self.absent
    }

    /// Whether both snapshots hold the very same buffer for `coord`
    /// (or both lack one).
    pub fn shares_zone(&self, other: &SceneSnapshot, coord: ZoneCoord) -> bool {
        match (self.zone(coord), other.zone(coord)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn total_indices(&self) -> usize {
        self.zones().map(|z| z.indices().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_no_zones() {
        let s = SceneSnapshot::empty();
        assert_eq!(s.sequence(), 0);
        assert_eq!(s.zone_count(), 0);
        assert!(s.zone(ZoneCoord::new(0, 0)).is_none());
        assert!(s.zone(ZoneCoord::new(40, 0)).is_none());
    }

    #[test]
    fn empty_snapshots_share_everything() {
        let a = SceneSnapshot::empty();
        let b = SceneSnapshot::empty();
        assert!(ZoneCoord::all().all(|z| a.shares_zone(&b, z)));
    }
}
