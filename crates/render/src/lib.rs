//! Rendering adapter: the shared graphics context and how zones reach it.
//!
//! # Invariants
//! - Only the holder of an exclusive lease issues commands to the context.
//! - A lease is never preempted; contention costs the compositor a frame,
//!   never a corrupted command stream.
//! - Releasing an exclusive lease leaves the context in its neutral state.
//! - A zone outside every view of a frame is neither uploaded nor drawn.
//!
//! `HeadlessContext` records commands; `tilexr-render-wgpu` provides the GPU
//! implementation of the same trait.

mod arbiter;
mod context;
mod headless;
mod view;
mod zone_renderer;

pub use arbiter::{
    ArbiterConfig, ArbiterStats, ExclusiveLease, LeaseError, LeaseOwner, SharedContextArbiter,
    SharedLease,
};
pub use context::{
    ContextState, GpuBufferId, GraphicsContext, RenderError, RenderTarget, ViewPass, Viewport,
};
pub use headless::{Command, HeadlessContext};
pub use view::{EyeView, Fov, Frustum};
pub use zone_renderer::{DrawStats, ZoneRenderer};

pub fn crate_info() -> &'static str {
    "tilexr-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
