//! Geometry: zone meshing, pooled zone buffers, and copy-on-write snapshots.
//!
//! # Invariants
//! - A published zone buffer is never mutated; a zone changes by publishing
//!   a new buffer at a higher version.
//! - A zone that was not rebuilt costs zero work: the next snapshot holds the
//!   same buffer by reference.
//! - A failed zone is omitted from its snapshot; the cycle still completes.
//! - Snapshot sequences only move forward through the exchange.

mod buffer;
mod exchange;
mod mesher;
mod snapshot;
mod uploader;
mod vertex;

pub use buffer::{BufferPool, PoolStats, ZoneBuffer};
pub use exchange::{SnapshotExchange, SnapshotReader};
pub use mesher::{GeometryError, build_zone_mesh};
pub use snapshot::SceneSnapshot;
pub use uploader::{CycleReport, GeometryUploader};
pub use vertex::{Vertex, ZoneMesh};

pub fn crate_info() -> &'static str {
    "tilexr-geometry v0.1.0"
}
