use serde::{Deserialize, Serialize};

/// Tile edge a wall runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WallEdge {
    North,
    East,
    South,
    West,
}

/// Renderable descriptor of something standing on a tile.
///
/// Closed set of kinds; geometry generation matches on the variant instead of
/// dispatching through a trait object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Occupant {
    /// Interactive scenery object spanning `width` x `length` tiles from its anchor.
    Interactive {
        width: u8,
        length: u8,
        height: f32,
        material: u16,
    },
    /// Flat decoration lying on the ground.
    GroundDecoration { material: u16 },
    /// Wall segment on one edge of the anchor tile.
    Wall {
        edge: WallEdge,
        height: f32,
        material: u16,
    },
    /// Free-standing decoration placed at `offset` (tile-local, 0..1) within the tile.
    Decoration {
        offset: [f32; 2],
        size: f32,
        height: f32,
        material: u16,
    },
}

impl Occupant {
    pub fn material(&self) -> u16 {
        match self {
            Self::Interactive { material, .. }
            | Self::GroundDecoration { material }
            | Self::Wall { material, .. }
            | Self::Decoration { material, .. } => *material,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Interactive { .. } => "interactive",
            Self::GroundDecoration { .. } => "ground_decoration",
            Self::Wall { .. } => "wall",
            Self::Decoration { .. } => "decoration",
        }
    }
}

/// Ground surface of a tile: an underlay material with an optional overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terrain {
    pub underlay: u16,
    pub overlay: Option<u16>,
}

impl Terrain {
    pub fn new(underlay: u16) -> Self {
        Self {
            underlay,
            overlay: None,
        }
    }

    /// Material that is actually visible.
    pub fn surface_material(&self) -> u16 {
        self.overlay.unwrap_or(self.underlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_of_each_kind() {
        let kinds = [
            Occupant::Interactive {
                width: 1,
                length: 1,
                height: 1.0,
                material: 1,
            },
            Occupant::GroundDecoration { material: 2 },
            Occupant::Wall {
                edge: WallEdge::North,
                height: 2.0,
                material: 3,
            },
            Occupant::Decoration {
                offset: [0.5, 0.5],
                size: 0.2,
                height: 0.4,
                material: 4,
            },
        ];
        let materials: Vec<u16> = kinds.iter().map(Occupant::material).collect();
        assert_eq!(materials, vec![1, 2, 3, 4]);
    }

    #[test]
    fn overlay_wins_over_underlay() {
        let mut t = Terrain::new(10);
        assert_eq!(t.surface_material(), 10);
        t.overlay = Some(20);
        assert_eq!(t.surface_material(), 20);
    }
}
