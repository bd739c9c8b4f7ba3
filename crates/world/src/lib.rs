//! World model: the tile grid owned by game logic.
//!
//! # Invariants
//! - Only the game-logic thread mutates a `WorldGrid`.
//! - All mutations flow through explicit operations and are logged.
//! - Tiles reference occupants by handle; the arena owns them.

mod arena;
mod grid;
mod occupant;

pub use arena::{OccupantArena, OccupantHandle};
pub use grid::{Tile, WorldError, WorldEvent, WorldGrid};
pub use occupant::{Occupant, Terrain, WallEdge};

pub fn crate_info() -> &'static str {
    "tilexr-world v0.1.0"
}
