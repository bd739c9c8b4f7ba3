use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use tilexr_common::Aabb;

/// GPU vertex layout shared by every zone buffer.
///
/// Field order and sizes are part of the upload contract: position, normal,
/// texture coordinate, material index. 36 bytes, no padding.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub material: u32,
}

impl Vertex {
    pub const STRIDE: usize = std::mem::size_of::<Vertex>();
    pub const POSITION_OFFSET: usize = 0;
    pub const NORMAL_OFFSET: usize = 12;
    pub const UV_OFFSET: usize = 24;
    pub const MATERIAL_OFFSET: usize = 32;
}

/// CPU-side vertex/index data for one zone. Doubles as the staging area the
/// uploader writes into before a buffer is published.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl Default for ZoneMesh {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            bounds: Aabb::empty(),
        }
    }
}

impl ZoneMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the mesh, keeping its allocations.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.bounds = Aabb::empty();
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append a quad given in counter-clockwise order as seen from `normal`.
    pub fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3, material: u32) {
        const UVS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
        let base = self.vertices.len() as u32;
        for (corner, uv) in corners.iter().zip(UVS) {
            self.bounds.include(*corner);
            self.vertices.push(Vertex {
                position: corner.to_array(),
                normal: normal.to_array(),
                uv,
                material,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    /// Horizontal quad facing up at height `y`.
    pub fn push_floor(&mut self, min_x: f32, min_z: f32, max_x: f32, max_z: f32, y: f32, material: u32) {
        self.push_quad(
            [
                Vec3::new(min_x, y, max_z),
                Vec3::new(max_x, y, max_z),
                Vec3::new(max_x, y, min_z),
                Vec3::new(min_x, y, min_z),
            ],
            Vec3::Y,
            material,
        );
    }

    /// Axis-aligned box with outward-facing normals.
    pub fn push_box(&mut self, min: Vec3, max: Vec3, material: u32) {
        let (a, b) = (min, max);
        // +Z
        self.push_quad(
            [
                Vec3::new(a.x, a.y, b.z),
                Vec3::new(b.x, a.y, b.z),
                Vec3::new(b.x, b.y, b.z),
                Vec3::new(a.x, b.y, b.z),
            ],
            Vec3::Z,
            material,
        );
        // -Z
        self.push_quad(
            [
                Vec3::new(b.x, a.y, a.z),
                Vec3::new(a.x, a.y, a.z),
                Vec3::new(a.x, b.y, a.z),
                Vec3::new(b.x, b.y, a.z),
            ],
            Vec3::NEG_Z,
            material,
        );
        // +X
        self.push_quad(
            [
                Vec3::new(b.x, a.y, b.z),
                Vec3::new(b.x, a.y, a.z),
                Vec3::new(b.x, b.y, a.z),
                Vec3::new(b.x, b.y, b.z),
            ],
            Vec3::X,
            material,
        );
        // -X
        self.push_quad(
            [
                Vec3::new(a.x, a.y, a.z),
                Vec3::new(a.x, a.y, b.z),
                Vec3::new(a.x, b.y, b.z),
                Vec3::new(a.x, b.y, a.z),
            ],
            Vec3::NEG_X,
            material,
        );
        // +Y
        self.push_quad(
            [
                Vec3::new(a.x, b.y, b.z),
                Vec3::new(b.x, b.y, b.z),
                Vec3::new(b.x, b.y, a.z),
                Vec3::new(a.x, b.y, a.z),
            ],
            Vec3::Y,
            material,
        );
        // -Y
        self.push_quad(
            [
                Vec3::new(a.x, a.y, a.z),
                Vec3::new(b.x, a.y, a.z),
                Vec3::new(b.x, a.y, b.z),
                Vec3::new(a.x, a.y, b.z),
            ],
            Vec3::NEG_Y,
            material,
        );
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_stable() {
        assert_eq!(Vertex::STRIDE, 36);
        assert_eq!(std::mem::offset_of!(Vertex, normal), Vertex::NORMAL_OFFSET);
        assert_eq!(std::mem::offset_of!(Vertex, uv), Vertex::UV_OFFSET);
        assert_eq!(
            std::mem::offset_of!(Vertex, material),
            Vertex::MATERIAL_OFFSET
        );
    }

    #[test]
    fn box_has_six_faces() {
        let mut mesh = ZoneMesh::new();
        mesh.push_box(Vec3::ZERO, Vec3::ONE, 3);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        assert_eq!(mesh.bounds.min, Vec3::ZERO);
        assert_eq!(mesh.bounds.max, Vec3::ONE);
        assert!(mesh.vertices.iter().all(|v| v.material == 3));
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut mesh = ZoneMesh::new();
        mesh.push_floor(0.0, 0.0, 1.0, 1.0, 0.0, 1);
        let cap = mesh.vertices.capacity();
        mesh.clear();
        assert!(mesh.is_empty());
        assert!(mesh.bounds.is_empty());
        assert_eq!(mesh.vertices.capacity(), cap);
    }

    #[test]
    fn byte_views_match_lengths() {
        let mut mesh = ZoneMesh::new();
        mesh.push_floor(0.0, 0.0, 1.0, 1.0, 0.5, 1);
        assert_eq!(mesh.vertex_bytes().len(), 4 * Vertex::STRIDE);
        assert_eq!(mesh.index_bytes().len(), 6 * 4);
    }
}
