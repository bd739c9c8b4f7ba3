use glam::{Mat4, Quat, Vec3, Vec4};
use tilexr_common::Aabb;

/// Field of view as four half-angles in radians (left and down negative),
/// as reported per eye by an XR runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    pub fn symmetric(horizontal: f32, vertical: f32) -> Self {
        Self {
            angle_left: -horizontal / 2.0,
            angle_right: horizontal / 2.0,
            angle_up: vertical / 2.0,
            angle_down: -vertical / 2.0,
        }
    }
}

/// One eye's predicted pose and projection for a frame.
#[derive(Debug, Clone, Copy)]
pub struct EyeView {
    pub position: Vec3,
    pub orientation: Quat,
    pub fov: Fov,
    pub near: f32,
    pub far: f32,
}

impl EyeView {
    pub fn new(position: Vec3, orientation: Quat, fov: Fov) -> Self {
        Self {
            position,
            orientation,
            fov,
            near: 0.05,
            far: 500.0,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position).inverse()
    }

    /// Right-handed asymmetric projection with depth mapped to 0..1.
    pub fn projection_matrix(&self) -> Mat4 {
        let tan_l = self.fov.angle_left.tan();
        let tan_r = self.fov.angle_right.tan();
        let tan_u = self.fov.angle_up.tan();
        let tan_d = self.fov.angle_down.tan();
        let w = tan_r - tan_l;
        let h = tan_u - tan_d;
        let range = self.near - self.far;

        Mat4::from_cols(
            Vec4::new(2.0 / w, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / h, 0.0, 0.0),
            Vec4::new((tan_r + tan_l) / w, (tan_u + tan_d) / h, self.far / range, -1.0),
            Vec4::new(0.0, 0.0, self.near * self.far / range, 0.0),
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

/// Six clip planes of a view-projection, each stored as `(normal, d)` with
/// the inside satisfying `normal.dot(p) + d >= 0`.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract planes from a view-projection with 0..1 clip depth.
    pub fn from_view_proj(m: Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        Self {
            planes: [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2],
        }
    }

    /// Conservative box test: false only when the box is entirely outside
    /// one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let farthest = Vec3::select(normal.cmpge(Vec3::ZERO), aabb.max, aabb.min);
            normal.dot(farthest) + plane.w >= 0.0
        })
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(p) + plane.w >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_eye() -> EyeView {
        // Identity orientation looks down -Z.
        EyeView::new(Vec3::ZERO, Quat::IDENTITY, Fov::symmetric(1.6, 1.6))
    }

    #[test]
    fn symmetric_fov_matches_glam_perspective() {
        let eye = forward_eye();
        let ours = eye.projection_matrix();
        let aspect = 1.0;
        let glam = Mat4::perspective_rh(1.6, aspect, eye.near, eye.far);
        assert!(ours.abs_diff_eq(glam, 1e-4));
    }

    #[test]
    fn points_in_front_are_inside() {
        let f = Frustum::from_view_proj(forward_eye().view_projection());
        assert!(f.contains_point(Vec3::new(0.0, 0.0, -5.0)));
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, 5.0)));
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, -1000.0)));
    }

    #[test]
    fn boxes_behind_or_beside_are_culled() {
        let f = Frustum::from_view_proj(forward_eye().view_projection());
        let ahead = Aabb::new(Vec3::new(-1.0, -1.0, -10.0), Vec3::new(1.0, 1.0, -8.0));
        let behind = Aabb::new(Vec3::new(-1.0, -1.0, 8.0), Vec3::new(1.0, 1.0, 10.0));
        let far_left = Aabb::new(Vec3::new(-100.0, -1.0, -3.0), Vec3::new(-90.0, 1.0, -2.0));
        let straddling = Aabb::new(Vec3::new(-1.0, -1.0, -5.0), Vec3::new(1.0, 1.0, 5.0));
        assert!(f.intersects_aabb(&ahead));
        assert!(!f.intersects_aabb(&behind));
        assert!(!f.intersects_aabb(&far_left));
        assert!(f.intersects_aabb(&straddling));
        assert!(!f.intersects_aabb(&Aabb::empty()));
    }

    #[test]
    fn turned_eye_sees_the_other_way() {
        let mut eye = forward_eye();
        eye.orientation = Quat::from_rotation_y(std::f32::consts::PI);
        let f = Frustum::from_view_proj(eye.view_projection());
        assert!(f.contains_point(Vec3::new(0.0, 0.0, 5.0)));
        assert!(!f.contains_point(Vec3::new(0.0, 0.0, -5.0)));
    }
}
