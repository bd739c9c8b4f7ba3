use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Number of planes (floors) in the world grid.
pub const PLANE_COUNT: usize = 4;
/// Width and height of one plane, in tiles.
pub const GRID_SIZE: usize = 104;
/// Side length of a zone, in tiles.
pub const ZONE_SIZE: usize = 8;
/// Zones along one axis of the grid.
pub const ZONES_PER_SIDE: usize = GRID_SIZE / ZONE_SIZE;
/// Total number of zones covering the grid.
pub const ZONE_COUNT: usize = ZONES_PER_SIDE * ZONES_PER_SIDE;
/// Total number of tiles across all planes.
pub const TILE_COUNT: usize = PLANE_COUNT * GRID_SIZE * GRID_SIZE;

/// World-space size of one tile along X and Z.
pub const TILE_WORLD_SIZE: f32 = 1.0;
/// Vertical distance between two planes in world units.
pub const PLANE_WORLD_HEIGHT: f32 = 2.5;

/// Address of one tile: `(plane, x, y)`.
///
/// Grid `y` maps to world `Z`; world `Y` is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub plane: u8,
    pub x: u16,
    pub y: u16,
}

impl TileCoord {
    pub fn new(plane: u8, x: u16, y: u16) -> Self {
        Self { plane, x, y }
    }

    /// Whether this coordinate addresses a tile inside the grid.
    pub fn in_bounds(&self) -> bool {
        (self.plane as usize) < PLANE_COUNT
            && (self.x as usize) < GRID_SIZE
            && (self.y as usize) < GRID_SIZE
    }

    /// Flat index into a plane-major tile array, or `None` when out of bounds.
    pub fn index(&self) -> Option<usize> {
        if !self.in_bounds() {
            return None;
        }
        Some(
            (self.plane as usize) * GRID_SIZE * GRID_SIZE
                + (self.y as usize) * GRID_SIZE
                + self.x as usize,
        )
    }

    /// Inverse of [`TileCoord::index`].
    pub fn from_index(index: usize) -> Option<Self> {
        if index >= TILE_COUNT {
            return None;
        }
        let plane = index / (GRID_SIZE * GRID_SIZE);
        let rem = index % (GRID_SIZE * GRID_SIZE);
        Some(Self::new(
            plane as u8,
            (rem % GRID_SIZE) as u16,
            (rem / GRID_SIZE) as u16,
        ))
    }

    /// The zone containing this tile. Zones span every plane.
    pub fn zone(&self) -> ZoneCoord {
        ZoneCoord::new(
            (self.x as usize / ZONE_SIZE) as u8,
            (self.y as usize / ZONE_SIZE) as u8,
        )
    }

    /// World-space position of the tile's minimum corner at ground level.
    pub fn world_origin(&self) -> Vec3 {
        Vec3::new(
            self.x as f32 * TILE_WORLD_SIZE,
            self.plane as f32 * PLANE_WORLD_HEIGHT,
            self.y as f32 * TILE_WORLD_SIZE,
        )
    }
}

/// Address of one 8x8 zone. A zone covers the same 8x8 footprint on every plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneCoord {
    pub x: u8,
    pub y: u8,
}

impl ZoneCoord {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    pub fn in_bounds(&self) -> bool {
        (self.x as usize) < ZONES_PER_SIDE && (self.y as usize) < ZONES_PER_SIDE
    }

    /// Dense index in `0..ZONE_COUNT`, or `None` when out of bounds.
    pub fn index(&self) -> Option<usize> {
        self.in_bounds()
            .then(|| self.y as usize * ZONES_PER_SIDE + self.x as usize)
    }

    pub fn from_index(index: usize) -> Option<Self> {
        (index < ZONE_COUNT).then(|| {
            Self::new(
                (index % ZONES_PER_SIDE) as u8,
                (index / ZONES_PER_SIDE) as u8,
            )
        })
    }

    /// Every zone of the grid in index order.
    pub fn all() -> impl Iterator<Item = ZoneCoord> {
        (0..ZONE_COUNT).filter_map(ZoneCoord::from_index)
    }

    /// Grid coordinate of the zone's first tile.
    pub fn tile_origin(&self) -> (u16, u16) {
        (
            (self.x as usize * ZONE_SIZE) as u16,
            (self.y as usize * ZONE_SIZE) as u16,
        )
    }

    pub fn contains(&self, tile: TileCoord) -> bool {
        tile.in_bounds() && tile.zone() == *self
    }

    /// All tiles of the zone, plane by plane, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> {
        let (ox, oy) = self.tile_origin();
        (0..PLANE_COUNT as u8).flat_map(move |plane| {
            (0..ZONE_SIZE as u16).flat_map(move |dy| {
                (0..ZONE_SIZE as u16).map(move |dx| TileCoord::new(plane, ox + dx, oy + dy))
            })
        })
    }
}

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that becomes valid once a point is included.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}
