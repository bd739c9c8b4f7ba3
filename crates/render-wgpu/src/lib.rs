//! wgpu backend for the tilexr graphics context.
//!
//! Each resident zone owns a vertex and an index buffer; a flush encodes one
//! render pass per recorded view (one per eye) with per-pass uniforms bound
//! at a dynamic offset.
//!
//! # Invariants
//! - Nothing reaches the GPU until `flush`; `reset_state` discards unsubmitted
//!   work.
//! - Swapchain images are registered as targets, never owned.

mod gpu;
mod shaders;

pub use gpu::{MAX_PASSES_PER_FLUSH, TARGET_FORMAT, WgpuContext, uniform_stride, zone_vertex_layout};

pub fn crate_info() -> &'static str {
    "tilexr-render-wgpu v0.1.0"
}
