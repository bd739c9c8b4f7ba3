use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilexr_render::EyeView;

/// Result codes an XR runtime can hand back, classified by how the
/// compositor must react.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XrError {
    #[error("no compatible XR runtime or device")]
    RuntimeUnavailable,

    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),

    #[error("session lost")]
    SessionLost,

    #[error("instance lost")]
    InstanceLost,

    #[error("graphics binding rejected: {0}")]
    GraphicsBindingRejected(String),

    #[error("session is not running")]
    SessionNotRunning,

    #[error("call made out of order")]
    CallOrderInvalid,

    #[error("runtime error code {0}")]
    Other(i32),
}

impl XrError {
    /// Only instance loss is fatal; everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InstanceLost)
    }

    /// Errors after which the session and its swapchain are unusable.
    pub fn is_session_loss(&self) -> bool {
        matches!(self, Self::SessionLost | Self::InstanceLost)
    }
}

/// What `query_support` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: String,
}

/// Identifies the application to the runtime at instance creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
}

/// Pack a semantic version the way XR runtimes expect.
pub const fn make_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 22) | ((minor & 0x3ff) << 12) | (patch & 0xfff)
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            application_name: "tilexr".into(),
            application_version: make_version(1, 0, 0),
            engine_name: "tilexr".into(),
            engine_version: make_version(1, 0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphicsApi {
    OpenGl,
    OpenGlEs,
    Vulkan,
}

/// The graphics context the session is created against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphicsBinding {
    pub api: GraphicsApi,
    pub context_version: (u32, u32),
}

impl Default for GraphicsBinding {
    fn default() -> Self {
        Self {
            api: GraphicsApi::OpenGl,
            context_version: (4, 3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapchainExtent {
    pub width: u32,
    pub height: u32,
}

impl Default for SwapchainExtent {
    fn default() -> Self {
        Self {
            width: 1832,
            height: 1920,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub image_count: u32,
    pub extent: SwapchainExtent,
}

/// Session states as the runtime reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeSessionState {
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged(RuntimeSessionState),
    InstanceLossPending,
    /// The runtime's event queue overflowed.
    EventsLost(u32),
}

/// Result of the runtime's frame wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    /// Runtime clock, nanoseconds.
    pub predicted_display_time: i64,
    pub predicted_display_period: Duration,
    pub should_render: bool,
}

/// What a frame hands back to the runtime.
#[derive(Debug, Clone)]
pub enum FrameSubmission {
    /// Nothing rendered this frame.
    Skip { display_time: i64 },
    /// A projection layer rendered into swapchain image `image`, one view per eye.
    Projection {
        display_time: i64,
        image: u32,
        views: Vec<EyeView>,
    },
}

impl FrameSubmission {
    pub fn display_time(&self) -> i64 {
        match self {
            Self::Skip { display_time } | Self::Projection { display_time, .. } => *display_time,
        }
    }

    pub fn has_layers(&self) -> bool {
        matches!(self, Self::Projection { .. })
    }
}

/// The external XR runtime's fixed contract.
///
/// One implementation instance drives at most one instance, one session and
/// one swapchain at a time. Every call may fail with any [`XrError`]; only
/// [`XrError::is_fatal`] ones are treated as unrecoverable.
pub trait XrRuntime: Send {
    /// Probe for a runtime. Must return within `timeout`.
    fn query_support(&mut self, timeout: Duration) -> Result<RuntimeInfo, XrError>;

    fn create_instance(&mut self, app: &AppInfo) -> Result<(), XrError>;
    fn destroy_instance(&mut self) -> Result<(), XrError>;

    /// Must return within `timeout`.
    fn create_session(&mut self, binding: &GraphicsBinding, timeout: Duration) -> Result<(), XrError>;
    fn destroy_session(&mut self) -> Result<(), XrError>;
    fn begin_session(&mut self) -> Result<(), XrError>;
    fn end_session(&mut self) -> Result<(), XrError>;

    fn create_swapchain(&mut self, extent: SwapchainExtent) -> Result<SwapchainInfo, XrError>;
    fn destroy_swapchain(&mut self) -> Result<(), XrError>;

    /// Next pending event, if any. Never blocks.
    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError>;

    /// Block until the runtime wants the next frame.
    fn wait_frame(&mut self) -> Result<FrameTiming, XrError>;
    fn begin_frame(&mut self) -> Result<(), XrError>;
    fn locate_views(&mut self, display_time: i64) -> Result<Vec<EyeView>, XrError>;

    fn acquire_image(&mut self) -> Result<u32, XrError>;
    fn wait_image(&mut self, timeout: Duration) -> Result<(), XrError>;
    fn release_image(&mut self) -> Result<(), XrError>;

    fn end_frame(&mut self, submission: &FrameSubmission) -> Result<(), XrError>;
}
