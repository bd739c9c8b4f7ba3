//! Zone partitioning: dirty tracking at 8x8-tile granularity.
//!
//! # Invariants
//! - A zone is either dirty or clean; it is never partially dirty.
//! - `collect_dirty_zones` returns and clears the set atomically.
//! - The dirty-set lock is held only for fixed-size bit operations.

mod mask;
mod partitioner;

pub use mask::DirtyZones;
pub use partitioner::{PartitionError, ZonePartitioner};

pub fn crate_info() -> &'static str {
    "tilexr-partition v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("partition"));
    }
}
