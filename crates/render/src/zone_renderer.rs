use tilexr_common::{ZONE_COUNT, ZoneCoord};
use tilexr_geometry::SceneSnapshot;

use crate::context::{GpuBufferId, GraphicsContext, RenderError, ViewPass};
use crate::view::Frustum;

/// Counters for one [`ZoneRenderer::draw_snapshot`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub visible: usize,
    pub culled: usize,
    pub uploaded: usize,
    pub released: usize,
    /// Draw calls submitted across all passes.
    pub draw_calls: u32,
}

#[derive(Debug, Clone, Copy)]
struct Resident {
    version: u64,
    id: GpuBufferId,
}

/// Draws a snapshot's zones into a graphics context.
///
/// Keeps track of which zone version is resident in the context so a zone is
/// uploaded once per version, and only when some view can see it.
#[derive(Debug)]
pub struct ZoneRenderer {
    resident: Vec<Option<Resident>>,
}

impl Default for ZoneRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneRenderer {
    pub fn new() -> Self {
        Self {
            resident: vec![None; ZONE_COUNT],
        }
    }

    pub fn resident_zones(&self) -> usize {
        self.resident.iter().flatten().count()
    }

    /// Cull, upload what became visible, draw every visible zone once per
    /// pass, then flush.
    pub fn draw_snapshot<C: GraphicsContext>(
        &mut self,
        ctx: &mut C,
        snapshot: &SceneSnapshot,
        passes: &[ViewPass],
    ) -> Result<DrawStats, RenderError> {
        let frustums: Vec<Frustum> = passes
            .iter()
            .map(|p| Frustum::from_view_proj(p.view_proj))
            .collect();
        let mut stats = DrawStats::default();
        let mut visible = Vec::new();

        for (index, slot) in self.resident.iter_mut().enumerate() {
            let Some(zone) = ZoneCoord::from_index(index) else {
                continue;
            };
            let current = snapshot.zone(zone).filter(|b| !b.is_empty());

            if let Some(res) = *slot {
                if !current.is_some_and(|b| b.version() == res.version) {
                    ctx.release(res.id);
                    *slot = None;
                    stats.released += 1;
                }
            }

            let Some(buffer) = current else {
                continue;
            };
            let bounds = buffer.bounds();
            if !frustums.iter().any(|f| f.intersects_aabb(&bounds)) {
                stats.culled += 1;
                continue;
            }

            let id = match *slot {
                Some(res) => res.id,
                None => {
                    let id = ctx.upload(buffer)?;
                    *slot = Some(Resident {
                        version: buffer.version(),
                        id,
                    });
                    stats.uploaded += 1;
                    id
                }
            };
            visible.push(id);
        }

        stats.visible = visible.len();
        for pass in passes {
            ctx.begin_view(pass)?;
            for &id in &visible {
                ctx.draw(id)?;
            }
        }
        stats.draw_calls = ctx.flush()?;
        Ok(stats)
    }

    /// Release every resident zone. Returns how many were released.
    pub fn release_all<C: GraphicsContext>(&mut self, ctx: &mut C) -> usize {
        let mut released = 0;
        for slot in &mut self.resident {
            if let Some(res) = slot.take() {
                ctx.release(res.id);
                released += 1;
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RenderTarget, Viewport};
    use crate::headless::HeadlessContext;
    use crate::view::{EyeView, Fov};
    use glam::{Quat, Vec3};
    use tilexr_common::{GRID_SIZE, TileCoord, ZONES_PER_SIDE};
    use tilexr_geometry::GeometryUploader;
    use tilexr_partition::DirtyZones;
    use tilexr_world::{Terrain, WorldGrid};

    fn floor_world() -> WorldGrid {
        let mut world = WorldGrid::new();
        for x in 0..GRID_SIZE as u16 {
            for y in 0..GRID_SIZE as u16 {
                world
                    .set_terrain(TileCoord::new(0, x, y), Some(Terrain::new(2)))
                    .unwrap();
            }
        }
        world
    }

    /// Narrow horizontal view down the x == 0 zone column, from outside the grid.
    fn column_passes() -> Vec<ViewPass> {
        let eye = EyeView::new(
            Vec3::new(4.0, 1.0, -10.0),
            Quat::from_rotation_y(std::f32::consts::PI),
            Fov::symmetric(0.05, 1.0),
        );
        (0..2)
            .map(|e| ViewPass {
                target: RenderTarget::Swapchain { image: 0, eye: e },
                viewport: Viewport::full(64, 64),
                view_proj: eye.view_projection(),
            })
            .collect()
    }

    #[test]
    fn zones_outside_every_view_are_neither_uploaded_nor_drawn() {
        let world = floor_world();
        let mut uploader = GeometryUploader::new();
        let snap = uploader.build_snapshot(&world, &DirtyZones::all(), &SceneSnapshot::empty());
        let mut ctx = HeadlessContext::new();
        let mut renderer = ZoneRenderer::new();

        let stats = renderer
            .draw_snapshot(&mut ctx, &snap, &column_passes())
            .unwrap();
        let column = ZONES_PER_SIDE;
        assert_eq!(stats.visible, column);
        assert_eq!(stats.culled, ZONE_COUNT - column);
        assert_eq!(stats.uploaded, column);
        assert_eq!(stats.draw_calls as usize, column * 2);
        assert_eq!(ctx.resident_buffers(), column);
        assert!(ctx.resident_version(ZoneCoord::new(0, 5)).is_some());
        assert!(ctx.resident_version(ZoneCoord::new(1, 0)).is_none());
    }

    #[test]
    fn unchanged_zones_are_not_reuploaded() {
        let mut world = floor_world();
        let mut uploader = GeometryUploader::new();
        let first = uploader.build_snapshot(&world, &DirtyZones::all(), &SceneSnapshot::empty());
        let mut ctx = HeadlessContext::new();
        let mut renderer = ZoneRenderer::new();
        let passes = column_passes();

        renderer.draw_snapshot(&mut ctx, &first, &passes).unwrap();
        let again = renderer.draw_snapshot(&mut ctx, &first, &passes).unwrap();
        assert_eq!(again.uploaded, 0);
        assert_eq!(again.released, 0);

        world.set_height(TileCoord::new(0, 3, 3), 0.5).unwrap();
        let dirty: DirtyZones = [ZoneCoord::new(0, 0)].into_iter().collect();
        let second = uploader.build_snapshot(&world, &dirty, &first);
        let stats = renderer.draw_snapshot(&mut ctx, &second, &passes).unwrap();
        assert_eq!(stats.uploaded, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(ctx.resident_version(ZoneCoord::new(0, 0)), Some(2));
    }

    #[test]
    fn zones_missing_from_snapshot_are_released() {
        let world = floor_world();
        let mut uploader = GeometryUploader::new();
        let snap = uploader.build_snapshot(&world, &DirtyZones::all(), &SceneSnapshot::empty());
        let mut ctx = HeadlessContext::new();
        let mut renderer = ZoneRenderer::new();
        renderer
            .draw_snapshot(&mut ctx, &snap, &column_passes())
            .unwrap();

        let stats = renderer
            .draw_snapshot(&mut ctx, &SceneSnapshot::empty(), &column_passes())
            .unwrap();
        assert_eq!(stats.released, ZONES_PER_SIDE);
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(ctx.resident_buffers(), 0);
    }

    #[test]
    fn release_all_empties_the_context() {
        let world = floor_world();
        let mut uploader = GeometryUploader::new();
        let snap = uploader.build_snapshot(&world, &DirtyZones::all(), &SceneSnapshot::empty());
        let mut ctx = HeadlessContext::new();
        let mut renderer = ZoneRenderer::new();
        renderer
            .draw_snapshot(&mut ctx, &snap, &column_passes())
            .unwrap();
        assert_eq!(renderer.release_all(&mut ctx), ZONES_PER_SIDE);
        assert_eq!(ctx.resident_buffers(), 0);
        assert_eq!(renderer.resident_zones(), 0);
    }
}
