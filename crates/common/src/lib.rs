//! Shared coordinate types and grid constants for tilexr.
//!
//! # Invariants
//! - A zone is an 8x8 tile footprint spanning all four planes.
//! - Coordinate conversions never panic; out-of-bounds input yields `None`.

mod types;

pub use types::{
    Aabb, GRID_SIZE, PLANE_COUNT, PLANE_WORLD_HEIGHT, TILE_COUNT, TILE_WORLD_SIZE, TileCoord,
    ZONE_COUNT, ZONE_SIZE, ZONES_PER_SIDE, ZoneCoord,
};

pub fn crate_info() -> &'static str {
    "tilexr-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
