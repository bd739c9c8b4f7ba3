use glam::Vec3;
use tilexr_common::{TILE_WORLD_SIZE, ZoneCoord};
use tilexr_world::{Occupant, OccupantHandle, WallEdge, WorldGrid};

use crate::vertex::ZoneMesh;

const WALL_THICKNESS: f32 = 0.1;
const GROUND_DECAL_LIFT: f32 = 0.01;

/// Reasons a zone's geometry could not be produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GeometryError {
    #[error("zone {zone:?} references missing occupant {handle:?}")]
    MissingOccupant {
        zone: ZoneCoord,
        handle: OccupantHandle,
    },
    #[error("zone {zone:?}: malformed {kind} occupant {handle:?}: {reason}")]
    Malformed {
        zone: ZoneCoord,
        handle: OccupantHandle,
        kind: &'static str,
        reason: &'static str,
    },
    #[error("zone {0:?} is outside the grid")]
    ZoneOutOfBounds(ZoneCoord),
}

impl GeometryError {
    pub fn zone(&self) -> ZoneCoord {
        match self {
            Self::MissingOccupant { zone, .. } | Self::Malformed { zone, .. } => *zone,
            Self::ZoneOutOfBounds(zone) => *zone,
        }
    }
}

/// Serialize every tile of `zone` into `mesh`.
///
/// `mesh` is expected to be empty. On error it holds partial data and must be
/// discarded by the caller.
pub fn build_zone_mesh(
    world: &WorldGrid,
    zone: ZoneCoord,
    mesh: &mut ZoneMesh,
) -> Result<(), GeometryError> {
    if !zone.in_bounds() {
        return Err(GeometryError::ZoneOutOfBounds(zone));
    }
    for coord in zone.tiles() {
        let Some(tile) = world.tile(coord) else {
            continue;
        };
        let origin = coord.world_origin();
        let ground = origin.y + tile.height;

        if let Some(terrain) = tile.terrain {
            mesh.push_floor(
                origin.x,
                origin.z,
                origin.x + TILE_WORLD_SIZE,
                origin.z + TILE_WORLD_SIZE,
                ground,
                terrain.surface_material() as u32,
            );
        }

        for &handle in tile.occupants() {
            let occupant = world
                .occupant(handle)
                .ok_or(GeometryError::MissingOccupant { zone, handle })?;
            let base = Vec3::new(origin.x, ground, origin.z);
            push_occupant(mesh, zone, handle, occupant, base)?;
        }
    }
    Ok(())
}

fn push_occupant(
    mesh: &mut ZoneMesh,
    zone: ZoneCoord,
    handle: OccupantHandle,
    occupant: &Occupant,
    base: Vec3,
) -> Result<(), GeometryError> {
    let malformed = |reason: &'static str| GeometryError::Malformed {
        zone,
        handle,
        kind: occupant.kind_name(),
        reason,
    };
    let material = occupant.material() as u32;

    match *occupant {
        Occupant::Interactive {
            width,
            length,
            height,
            ..
        } => {
            if width == 0 || length == 0 {
                return Err(malformed("empty footprint"));
            }
            check_height(height).map_err(malformed)?;
            let extent = Vec3::new(
                width as f32 * TILE_WORLD_SIZE,
                height,
                length as f32 * TILE_WORLD_SIZE,
            );
            mesh.push_box(base, base + extent, material);
        }
        Occupant::GroundDecoration { .. } => {
            let y = base.y + GROUND_DECAL_LIFT;
            mesh.push_floor(
                base.x,
                base.z,
                base.x + TILE_WORLD_SIZE,
                base.z + TILE_WORLD_SIZE,
                y,
                material,
            );
        }
        Occupant::Wall { edge, height, .. } => {
            check_height(height).map_err(malformed)?;
            let (min, max) = wall_extent(base, edge, height);
            mesh.push_box(min, max, material);
        }
        Occupant::Decoration {
            offset,
            size,
            height,
            ..
        } => {
            if !offset.iter().all(|o| o.is_finite() && (0.0..=1.0).contains(o)) {
                return Err(malformed("offset outside tile"));
            }
            if !size.is_finite() || size <= 0.0 {
                return Err(malformed("non-positive size"));
            }
            check_height(height).map_err(malformed)?;
            let center = base + Vec3::new(offset[0], 0.0, offset[1]) * TILE_WORLD_SIZE;
            let half = size * 0.5;
            mesh.push_box(
                center - Vec3::new(half, 0.0, half),
                center + Vec3::new(half, height, half),
                material,
            );
        }
    }
    Ok(())
}

fn check_height(height: f32) -> Result<(), &'static str> {
    if !height.is_finite() || height <= 0.0 {
        return Err("non-positive height");
    }
    Ok(())
}

fn wall_extent(base: Vec3, edge: WallEdge, height: f32) -> (Vec3, Vec3) {
    let s = TILE_WORLD_SIZE;
    let t = WALL_THICKNESS;
    let (min, max) = match edge {
        WallEdge::North => (Vec3::new(0.0, 0.0, s - t), Vec3::new(s, height, s)),
        WallEdge::South => (Vec3::new(0.0, 0.0, 0.0), Vec3::new(s, height, t)),
        WallEdge::East => (Vec3::new(s - t, 0.0, 0.0), Vec3::new(s, height, s)),
        WallEdge::West => (Vec3::new(0.0, 0.0, 0.0), Vec3::new(t, height, s)),
    };
    (base + min, base + max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilexr_common::TileCoord;
    use tilexr_world::Terrain;

    #[test]
    fn empty_zone_produces_no_geometry() {
        let world = WorldGrid::new();
        let mut mesh = ZoneMesh::new();
        build_zone_mesh(&world, ZoneCoord::new(0, 0), &mut mesh).unwrap();
        assert!(mesh.is_empty());
    }

    #[test]
    fn terrain_and_occupants_are_meshed() {
        let mut world = WorldGrid::new();
        let coord = TileCoord::new(0, 2, 3);
        world.set_terrain(coord, Some(Terrain::new(5))).unwrap();
        world.set_height(coord, 0.5).unwrap();
        world
            .add_occupant(
                coord,
                Occupant::Wall {
                    edge: WallEdge::West,
                    height: 2.0,
                    material: 9,
                },
            )
            .unwrap();

        let mut mesh = ZoneMesh::new();
        build_zone_mesh(&world, ZoneCoord::new(0, 0), &mut mesh).unwrap();
        // One floor quad + one box.
        assert_eq!(mesh.vertices.len(), 4 + 24);
        assert_eq!(mesh.vertices[0].material, 5);
        assert_eq!(mesh.vertices[0].position[1], 0.5);
        assert_eq!(mesh.bounds.max.y, 2.5);
    }

    #[test]
    fn upper_plane_is_raised() {
        let mut world = WorldGrid::new();
        world
            .set_terrain(TileCoord::new(2, 0, 0), Some(Terrain::new(1)))
            .unwrap();
        let mut mesh = ZoneMesh::new();
        build_zone_mesh(&world, ZoneCoord::new(0, 0), &mut mesh).unwrap();
        assert_eq!(
            mesh.vertices[0].position[1],
            2.0 * tilexr_common::PLANE_WORLD_HEIGHT
        );
    }

    #[test]
    fn malformed_occupant_fails_with_zone() {
        let mut world = WorldGrid::new();
        world
            .add_occupant(
                TileCoord::new(0, 9, 9),
                Occupant::Interactive {
                    width: 0,
                    length: 1,
                    height: 1.0,
                    material: 1,
                },
            )
            .unwrap();
        let mut mesh = ZoneMesh::new();
        let err = build_zone_mesh(&world, ZoneCoord::new(1, 1), &mut mesh).unwrap_err();
        assert_eq!(err.zone(), ZoneCoord::new(1, 1));
        assert!(matches!(err, GeometryError::Malformed { kind: "interactive", .. }));
    }

    #[test]
    fn decoration_offset_is_validated() {
        let mut world = WorldGrid::new();
        world
            .add_occupant(
                TileCoord::new(0, 0, 0),
                Occupant::Decoration {
                    offset: [1.5, 0.0],
                    size: 0.2,
                    height: 0.2,
                    material: 1,
                },
            )
            .unwrap();
        let mut mesh = ZoneMesh::new();
        assert!(build_zone_mesh(&world, ZoneCoord::new(0, 0), &mut mesh).is_err());
    }

    #[test]
    fn identical_input_gives_identical_bytes() {
        let mut world = WorldGrid::new();
        for x in 0..8 {
            world
                .set_terrain(TileCoord::new(0, x, 0), Some(Terrain::new(x)))
                .unwrap();
        }
        let mut a = ZoneMesh::new();
        let mut b = ZoneMesh::new();
        build_zone_mesh(&world, ZoneCoord::new(0, 0), &mut a).unwrap();
        build_zone_mesh(&world, ZoneCoord::new(0, 0), &mut b).unwrap();
        assert_eq!(a.vertex_bytes(), b.vertex_bytes());
        assert_eq!(a.index_bytes(), b.index_bytes());
    }
}
