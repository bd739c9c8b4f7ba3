use glam::Mat4;
use tilexr_geometry::ZoneBuffer;

/// Handle to zone geometry resident in a graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuBufferId(pub u64);

/// Where a view pass renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// One eye's layer of a runtime-owned swapchain image.
    Swapchain { image: u32, eye: u32 },
    /// The 2D game renderer's own surface.
    Surface2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// One render pass: a target, its viewport, and the camera to draw with.
#[derive(Debug, Clone, Copy)]
pub struct ViewPass {
    pub target: RenderTarget,
    pub viewport: Viewport,
    pub view_proj: Mat4,
}

/// Implicit context state that survives between commands.
///
/// `ContextState::default()` is the neutral configuration every lease
/// holder starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextState {
    pub bound_buffer: Option<GpuBufferId>,
    pub viewport: Option<Viewport>,
    pub target: Option<RenderTarget>,
}

impl ContextState {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unknown GPU buffer {0:?}")]
    UnknownBuffer(GpuBufferId),

    #[error("draw issued with no active view pass")]
    NoActiveView,

    #[error("render target {0:?} is not registered")]
    UnknownTarget(RenderTarget),

    #[error("backend error: {0}")]
    Backend(String),
}

/// The single underlying graphics context shared by the 2D renderer and the
/// compositor.
///
/// The context is not thread-safe in the command-issuing sense: callers only
/// reach `&mut self` methods through an exclusive lease from
/// [`crate::SharedContextArbiter`].
pub trait GraphicsContext: Send + Sync {
    /// Make a zone buffer's geometry resident.
    fn upload(&mut self, buffer: &ZoneBuffer) -> Result<GpuBufferId, RenderError>;

    /// Free resident geometry. Unknown ids are ignored.
    fn release(&mut self, id: GpuBufferId);

    /// Start a pass; subsequent draws go to its target.
    fn begin_view(&mut self, pass: &ViewPass) -> Result<(), RenderError>;

    fn draw(&mut self, id: GpuBufferId) -> Result<(), RenderError>;

    /// Submit everything recorded since the last flush. Returns the number
    /// of draw calls submitted.
    fn flush(&mut self) -> Result<u32, RenderError>;

    /// Return implicit state to [`ContextState::default`], discarding any
    /// unsubmitted commands.
    fn reset_state(&mut self);

    fn state(&self) -> ContextState;

    fn resident_buffers(&self) -> usize;
}
