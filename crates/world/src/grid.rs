use serde::{Deserialize, Serialize};
use tilexr_common::{TILE_COUNT, TileCoord};

use crate::arena::{OccupantArena, OccupantHandle};
use crate::occupant::{Occupant, Terrain};

/// A change record produced by every mutation of the grid.
///
/// The game loop drains these and forwards the touched tiles to dirty
/// tracking; nothing downstream ever reads the grid to discover changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldEvent {
    HeightChanged { coord: TileCoord, old: f32, new: f32 },
    TerrainChanged { coord: TileCoord },
    OccupantAdded { coord: TileCoord, handle: OccupantHandle },
    OccupantUpdated { coord: TileCoord, handle: OccupantHandle },
    OccupantRemoved { coord: TileCoord, handle: OccupantHandle },
    /// Game logic advanced one tick.
    Stepped { tick: u64 },
}

impl WorldEvent {
    /// Tile touched by this event, if any.
    pub fn tile(&self) -> Option<TileCoord> {
        match self {
            Self::HeightChanged { coord, .. }
            | Self::TerrainChanged { coord }
            | Self::OccupantAdded { coord, .. }
            | Self::OccupantUpdated { coord, .. }
            | Self::OccupantRemoved { coord, .. } => Some(*coord),
            Self::Stepped { .. } => None,
        }
    }
}

/// Errors from grid mutations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("tile {0:?} is outside the grid")]
    OutOfBounds(TileCoord),
    #[error("occupant {0:?} not found")]
    UnknownOccupant(OccupantHandle),
    #[error("height {0} is not a finite number")]
    InvalidHeight(f32),
}

/// One cell of the world grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tile {
    /// Ground height above the plane's base, in world units.
    pub height: f32,
    pub terrain: Option<Terrain>,
    occupants: Vec<OccupantHandle>,
}

impl Tile {
    /// Handles of everything anchored on this tile, in insertion order.
    pub fn occupants(&self) -> &[OccupantHandle] {
        &self.occupants
    }

    pub fn is_empty(&self) -> bool {
        self.terrain.is_none() && self.occupants.is_empty()
    }
}

/// The authoritative tile grid, owned by the game-logic thread.
///
/// All mutations go through explicit operations that log a [`WorldEvent`].
/// The log is only emptied by [`WorldGrid::drain_events`], so the game loop
/// must drain it once per tick. Render components never see this type
/// directly; they consume snapshots built from it.
#[derive(Debug, Clone)]
pub struct WorldGrid {
    tiles: Vec<Tile>,
    occupants: OccupantArena,
    tick: u64,
    event_log: Vec<WorldEvent>,
}

impl Default for WorldGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldGrid {
    /// Create an empty grid at tick 0.
    pub fn new() -> Self {
        Self {
            tiles: vec![Tile::default(); TILE_COUNT],
            occupants: OccupantArena::new(),
            tick: 0,
            event_log: Vec::new(),
        }
    }

    /// Current logical tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance game logic by one tick.
    pub fn step(&mut self) {
        self.tick += 1;
        self.event_log.push(WorldEvent::Stepped { tick: self.tick });
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        coord.index().map(|i| &self.tiles[i])
    }

    pub fn occupant(&self, handle: OccupantHandle) -> Option<&Occupant> {
        self.occupants.get(handle)
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    /// Read-only access to the event log.
    pub fn events(&self) -> &[WorldEvent] {
        &self.event_log
    }

    /// Drain and return the event log. Call once per tick; nothing else
    /// bounds the log.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.event_log)
    }

    pub fn set_height(&mut self, coord: TileCoord, height: f32) -> Result<(), WorldError> {
        if !height.is_finite() {
            return Err(WorldError::InvalidHeight(height));
        }
        let tile = self.tile_mut(coord)?;
        let old = tile.height;
        tile.height = height;
        self.event_log.push(WorldEvent::HeightChanged {
            coord,
            old,
            new: height,
        });
        Ok(())
    }

    pub fn set_terrain(
        &mut self,
        coord: TileCoord,
        terrain: Option<Terrain>,
    ) -> Result<(), WorldError> {
        self.tile_mut(coord)?.terrain = terrain;
        self.event_log.push(WorldEvent::TerrainChanged { coord });
        Ok(())
    }

    /// Place an occupant on a tile. Returns its stable handle.
    pub fn add_occupant(
        &mut self,
        coord: TileCoord,
        occupant: Occupant,
    ) -> Result<OccupantHandle, WorldError> {
        let index = coord.index().ok_or(WorldError::OutOfBounds(coord))?;
        let handle = self.occupants.insert(coord, occupant);
        self.tiles[index].occupants.push(handle);
        self.event_log
            .push(WorldEvent::OccupantAdded { coord, handle });
        Ok(handle)
    }

    /// Replace an occupant's descriptor in place; its handle stays valid.
    pub fn update_occupant(
        &mut self,
        handle: OccupantHandle,
        occupant: Occupant,
    ) -> Result<(), WorldError> {
        let coord = self
            .occupants
            .anchor(handle)
            .ok_or(WorldError::UnknownOccupant(handle))?;
        self.occupants
            .replace(handle, occupant)
            .ok_or(WorldError::UnknownOccupant(handle))?;
        self.event_log
            .push(WorldEvent::OccupantUpdated { coord, handle });
        Ok(())
    }

    /// Remove an occupant from its tile and the arena.
    pub fn remove_occupant(&mut self, handle: OccupantHandle) -> Result<Occupant, WorldError> {
        let (coord, occupant) = self
            .occupants
            .remove(handle)
            .ok_or(WorldError::UnknownOccupant(handle))?;
        if let Some(index) = coord.index() {
            self.tiles[index].occupants.retain(|h| *h != handle);
        }
        self.event_log
            .push(WorldEvent::OccupantRemoved { coord, handle });
        Ok(occupant)
    }

    /// Remove every occupant and the terrain of one tile.
    pub fn clear_tile(&mut self, coord: TileCoord) -> Result<(), WorldError> {
        let handles = self.tile_mut(coord)?.occupants.clone();
        for handle in handles {
            self.remove_occupant(handle)?;
        }
        self.set_terrain(coord, None)
    }

    fn tile_mut(&mut self, coord: TileCoord) -> Result<&mut Tile, WorldError> {
        let index = coord.index().ok_or(WorldError::OutOfBounds(coord))?;
        Ok(&mut self.tiles[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deco() -> Occupant {
        Occupant::Decoration {
            offset: [0.5, 0.5],
            size: 0.3,
            height: 0.5,
            material: 4,
        }
    }

    #[test]
    fn grid_starts_empty() {
        let w = WorldGrid::new();
        assert_eq!(w.tick(), 0);
        assert_eq!(w.occupant_count(), 0);
        assert!(w.tile(TileCoord::new(0, 0, 0)).unwrap().is_empty());
        assert!(w.tile(TileCoord::new(0, 104, 0)).is_none());
    }

    #[test]
    fn add_and_remove_occupant() {
        let mut w = WorldGrid::new();
        let coord = TileCoord::new(1, 10, 20);
        let h = w.add_occupant(coord, deco()).unwrap();
        assert_eq!(w.tile(coord).unwrap().occupants(), &[h]);
        assert_eq!(w.occupant(h), Some(&deco()));

        let removed = w.remove_occupant(h).unwrap();
        assert_eq!(removed, deco());
        assert!(w.tile(coord).unwrap().occupants().is_empty());
        assert!(matches!(
            w.remove_occupant(h),
            Err(WorldError::UnknownOccupant(_))
        ));
    }

    #[test]
    fn out_of_bounds_mutation_is_rejected() {
        let mut w = WorldGrid::new();
        let bad = TileCoord::new(4, 0, 0);
        assert!(matches!(
            w.set_terrain(bad, Some(Terrain::new(1))),
            Err(WorldError::OutOfBounds(_))
        ));
        assert!(w.add_occupant(bad, deco()).is_err());
        assert!(w.events().is_empty());
    }

    #[test]
    fn non_finite_height_is_rejected() {
        let mut w = WorldGrid::new();
        let r = w.set_height(TileCoord::new(0, 0, 0), f32::NAN);
        assert!(matches!(r, Err(WorldError::InvalidHeight(_))));
    }

    #[test]
    fn every_mutation_is_logged_with_its_tile() {
        let mut w = WorldGrid::new();
        let a = TileCoord::new(0, 1, 1);
        let b = TileCoord::new(0, 9, 9);
        w.set_height(a, 1.5).unwrap();
        w.set_terrain(b, Some(Terrain::new(3))).unwrap();
        let h = w.add_occupant(b, deco()).unwrap();
        w.update_occupant(h, Occupant::GroundDecoration { material: 1 })
            .unwrap();
        w.step();

        let tiles: Vec<_> = w.events().iter().filter_map(WorldEvent::tile).collect();
        assert_eq!(tiles, vec![a, b, b, b]);

        let drained = w.drain_events();
        assert_eq!(drained.len(), 5);
        assert!(w.events().is_empty());
        assert_eq!(w.tick(), 1);
    }

    #[test]
    fn log_drained_every_tick_holds_one_tick_of_events() {
        let mut w = WorldGrid::new();
        for tick in 0..1_000u16 {
            w.set_height(TileCoord::new(0, tick % 104, 0), 1.0).unwrap();
            w.step();
            assert_eq!(w.events().len(), 2);
            assert_eq!(w.drain_events().len(), 2);
        }
        assert!(w.events().is_empty());
    }

    #[test]
    fn clear_tile_removes_everything() {
        let mut w = WorldGrid::new();
        let coord = TileCoord::new(2, 50, 50);
        w.set_terrain(coord, Some(Terrain::new(1))).unwrap();
        w.add_occupant(coord, deco()).unwrap();
        w.add_occupant(coord, Occupant::GroundDecoration { material: 2 })
            .unwrap();
        w.clear_tile(coord).unwrap();
        assert!(w.tile(coord).unwrap().is_empty());
        assert_eq!(w.occupant_count(), 0);
    }
}
