use std::sync::Arc;
use std::time::{Duration, Instant};

use tilexr_common::{ZONE_COUNT, ZoneCoord};
use tilexr_partition::{DirtyZones, ZonePartitioner};
use tilexr_world::WorldGrid;

use crate::buffer::{BufferPool, PoolStats, ZoneBuffer};
use crate::exchange::SnapshotExchange;
use crate::mesher::{GeometryError, build_zone_mesh};
use crate::snapshot::SceneSnapshot;

/// What one upload cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Sequence of the snapshot produced by the cycle.
    pub sequence: u64,
    pub rebuilt: Vec<ZoneCoord>,
    pub failed: Vec<GeometryError>,
    /// Zones carried over from the previous snapshot without any work.
    pub reused: usize,
    pub elapsed: Duration,
    /// Whether the snapshot made it into the exchange.
    pub published: bool,
}

/// Turns dirty zones into published zone buffers.
///
/// Runs on the game-logic thread. Each dirty zone is written into a staging
/// mesh drawn from the pool and only becomes visible once wrapped in a new
/// immutable [`ZoneBuffer`]; clean zones are carried over from the previous
/// snapshot by reference.
#[derive(Debug)]
pub struct GeometryUploader {
    pool: BufferPool,
    zone_versions: Vec<u64>,
    retry: DirtyZones,
    next_sequence: u64,
    last_report: CycleReport,
}

impl Default for GeometryUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryUploader {
    pub fn new() -> Self {
        Self::with_pool(BufferPool::default())
    }

    pub fn with_pool(pool: BufferPool) -> Self {
        Self {
            pool,
            zone_versions: vec![0; ZONE_COUNT],
            retry: DirtyZones::new(),
            next_sequence: 1,
            last_report: CycleReport::default(),
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Zones that failed last cycle and will be rebuilt on the next one.
    pub fn pending_retries(&self) -> &DirtyZones {
        &self.retry
    }

    /// Report of the most recent [`GeometryUploader::build_snapshot`] call.
    pub fn last_report(&self) -> &CycleReport {
        &self.last_report
    }

    /// Build the next snapshot from `previous`, rebuilding only `dirty` zones
    /// (plus zones that failed last cycle).
    ///
    /// A zone whose geometry cannot be generated is left out of the returned
    /// snapshot and logged; the rest of the snapshot is unaffected.
    pub fn build_snapshot(
        &mut self,
        world: &WorldGrid,
        dirty: &DirtyZones,
        previous: &SceneSnapshot,
    ) -> SceneSnapshot {
        let start = Instant::now();
        let work = dirty.union(&self.retry);
        self.retry = DirtyZones::new();

        let mut zones: Vec<Option<Arc<ZoneBuffer>>> = ZoneCoord::all()
            .map(|z| previous.zone(z).cloned())
            .collect();
        let mut absent = DirtyZones::new();
        let mut report = CycleReport::default();

        for zone in work.iter() {
            let Some(index) = zone.index() else {
                continue;
            };
            let mut staging = self.pool.take();
            match build_zone_mesh(world, zone, &mut staging) {
                Ok(()) => {
                    self.zone_versions[index] += 1;
                    let version = self.zone_versions[index];
                    zones[index] = Some(Arc::new(ZoneBuffer::new(
                        zone, version, staging, &self.pool,
                    )));
                    report.rebuilt.push(zone);
                }
                Err(err) => {
                    tracing::warn!(
                        zone_x = zone.x,
                        zone_y = zone.y,
                        error = %err,
                        "zone geometry failed; zone absent this cycle"
                    );
                    self.pool.give_back(staging);
                    zones[index] = None;
                    absent.insert(zone);
                    self.retry.insert(zone);
                    report.failed.push(err);
                }
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        report.sequence = sequence;
        report.reused = zones.iter().flatten().count() - report.rebuilt.len();
        report.elapsed = start.elapsed();
        tracing::debug!(
            sequence,
            rebuilt = report.rebuilt.len(),
            failed = report.failed.len(),
            reused = report.reused,
            "snapshot built"
        );
        self.last_report = report;

        SceneSnapshot::from_parts(sequence, world.tick(), zones, absent)
    }

    /// One full upload cycle: collect dirty zones, build, publish.
    pub fn run_cycle(
        &mut self,
        world: &WorldGrid,
        partitioner: &ZonePartitioner,
        exchange: &SnapshotExchange,
    ) -> CycleReport {
        let _span = tracing::info_span!("upload_cycle", tick = world.tick()).entered();
        let dirty = partitioner.collect_dirty_zones();
        let previous = exchange.latest();
        let snapshot = self.build_snapshot(world, &dirty, &previous);
        drop(previous);
        let published = exchange.publish(snapshot).is_ok();
        self.last_report.published = published;
        self.last_report.clone()
    }
}
