use parking_lot::Mutex;
use tilexr_common::{TileCoord, ZoneCoord};
use tilexr_world::WorldEvent;

use crate::mask::DirtyZones;

/// Errors from dirty tracking.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("tile {0:?} is outside the grid")]
    TileOutOfBounds(TileCoord),
    #[error("zone {0:?} is outside the grid")]
    ZoneOutOfBounds(ZoneCoord),
}

/// Tracks which zones changed since the last upload cycle.
///
/// Marking a tile marks its whole zone. The dirty set is guarded by a lock
/// shared only between the marking side and the collecting side, and every
/// critical section is a fixed-size bit operation.
#[derive(Debug, Default)]
pub struct ZonePartitioner {
    dirty: Mutex<DirtyZones>,
}

impl ZonePartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the zone containing `tile` as dirty. Idempotent.
    pub fn mark_dirty(&self, tile: TileCoord) -> Result<ZoneCoord, PartitionError> {
        if !tile.in_bounds() {
            return Err(PartitionError::TileOutOfBounds(tile));
        }
        let zone = tile.zone();
        self.dirty.lock().insert(zone);
        Ok(zone)
    }

    pub fn mark_zone_dirty(&self, zone: ZoneCoord) -> Result<(), PartitionError> {
        if !zone.in_bounds() {
            return Err(PartitionError::ZoneOutOfBounds(zone));
        }
        self.dirty.lock().insert(zone);
        Ok(())
    }

    /// Invalidate the entire grid, e.g. after a scene load.
    pub fn mark_all_dirty(&self) {
        *self.dirty.lock() = DirtyZones::all();
        tracing::debug!("all zones marked dirty");
    }

    /// Mark every tile touched by a batch of world events. Returns how many
    /// events referenced a tile.
    pub fn mark_events(&self, events: &[WorldEvent]) -> usize {
        let touched: DirtyZones = events
            .iter()
            .filter_map(WorldEvent::tile)
            .filter(TileCoord::in_bounds)
            .map(|t| t.zone())
            .collect();
        let count = events.iter().filter(|e| e.tile().is_some()).count();
        if !touched.is_empty() {
            let mut dirty = self.dirty.lock();
            *dirty = dirty.union(&touched);
        }
        count
    }

    /// Return the dirty set and clear it in one step.
    pub fn collect_dirty_zones(&self) -> DirtyZones {
        let collected = std::mem::take(&mut *self.dirty.lock());
        tracing::trace!(zones = collected.len(), "collected dirty zones");
        collected
    }

    pub fn is_dirty(&self, zone: ZoneCoord) -> bool {
        self.dirty.lock().contains(zone)
    }

    /// Number of zones currently waiting for the next cycle.
    pub fn pending(&self) -> usize {
        self.dirty.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tilexr_common::{GRID_SIZE, PLANE_COUNT, ZONE_COUNT};
    use tilexr_world::{Occupant, WorldGrid};

    #[test]
    fn marking_a_tile_marks_its_zone() {
        let p = ZonePartitioner::new();
        let zone = p.mark_dirty(TileCoord::new(2, 9, 17)).unwrap();
        assert_eq!(zone, ZoneCoord::new(1, 2));
        assert!(p.is_dirty(zone));
        assert_eq!(p.pending(), 1);
    }

    #[test]
    fn mark_dirty_is_idempotent() {
        let p = ZonePartitioner::new();
        for _ in 0..10 {
            p.mark_dirty(TileCoord::new(0, 3, 3)).unwrap();
        }
        let dirty = p.collect_dirty_zones();
        assert_eq!(dirty.len(), 1);
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let p = ZonePartitioner::new();
        assert!(matches!(
            p.mark_dirty(TileCoord::new(0, GRID_SIZE as u16, 0)),
            Err(PartitionError::TileOutOfBounds(_))
        ));
        assert!(p.mark_zone_dirty(ZoneCoord::new(0, 13)).is_err());
        assert_eq!(p.pending(), 0);
    }

    #[test]
    fn collect_clears_the_set() {
        let p = ZonePartitioner::new();
        p.mark_dirty(TileCoord::new(0, 0, 0)).unwrap();
        assert_eq!(p.collect_dirty_zones().len(), 1);
        assert!(p.collect_dirty_zones().is_empty());
    }

    #[test]
    fn collected_set_is_exactly_the_marked_zones() {
        // Deterministic pseudo-random sequence of tiles.
        let mut state: u64 = 0x1234_5678;
        let mut next = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };

        let p = ZonePartitioner::new();
        for _round in 0..5 {
            let mut expected = BTreeSet::new();
            for _ in 0..40 {
                let tile = TileCoord::new(
                    (next() % PLANE_COUNT) as u8,
                    (next() % GRID_SIZE) as u16,
                    (next() % GRID_SIZE) as u16,
                );
                p.mark_dirty(tile).unwrap();
                expected.insert(tile.zone());
            }
            let got: BTreeSet<_> = p.collect_dirty_zones().iter().collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn mark_events_marks_touched_zones() {
        let mut world = WorldGrid::new();
        world
            .add_occupant(
                TileCoord::new(0, 20, 20),
                Occupant::GroundDecoration { material: 1 },
            )
            .unwrap();
        world.set_height(TileCoord::new(3, 100, 1), 2.0).unwrap();
        world.step();

        let p = ZonePartitioner::new();
        let marked = p.mark_events(&world.drain_events());
        assert_eq!(marked, 2);
        let zones: Vec<_> = p.collect_dirty_zones().iter().collect();
        assert_eq!(zones, vec![ZoneCoord::new(12, 0), ZoneCoord::new(2, 2)]);
    }

    #[test]
    fn mark_all_dirty_covers_grid() {
        let p = ZonePartitioner::new();
        p.mark_all_dirty();
        assert_eq!(p.collect_dirty_zones().len(), ZONE_COUNT);
    }

    /// One thread marks every tile of every zone repeatedly while another
    /// collects in a tight loop. A zone may only be collected after a mark
    /// for it happened, and nothing marked is ever lost.
    #[test]
    fn concurrent_mark_and_collect() {
        const ROUNDS: usize = 20;

        let p = Arc::new(ZonePartitioner::new());
        let marks: Arc<Vec<AtomicU64>> =
            Arc::new((0..ZONE_COUNT).map(|_| AtomicU64::new(0)).collect());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let p = Arc::clone(&p);
            let marks = Arc::clone(&marks);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    for zone in ZoneCoord::all() {
                        let idx = zone.index().unwrap();
                        for tile in zone.tiles().step_by(17) {
                            marks[idx].fetch_add(1, Ordering::SeqCst);
                            p.mark_dirty(tile).unwrap();
                        }
                    }
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut collected = vec![0u64; ZONE_COUNT];
        loop {
            let finished = done.load(Ordering::SeqCst);
            let batch = p.collect_dirty_zones();
            for zone in batch.iter() {
                let idx = zone.index().unwrap();
                collected[idx] += 1;
                assert!(
                    collected[idx] <= marks[idx].load(Ordering::SeqCst),
                    "zone {zone:?} collected more often than it was marked"
                );
            }
            if finished {
                break;
            }
        }
        writer.join().unwrap();

        assert!(p.collect_dirty_zones().is_empty());
        assert!(collected.iter().all(|c| *c >= 1));
    }
}
