//! XR compositor: session lifecycle, frame pacing, and subsystem control.
//!
//! # Invariants
//! - Frame layers are submitted only while the session is `Visible` or
//!   `Focused`; every other frame is submitted empty.
//! - At most one swapchain image is leased at a time, and none survives a
//!   loss, a stop or a shutdown.
//! - The frame loop never waits for new geometry; it draws the latest
//!   published snapshot.
//! - `XrSubsystem::stop` returns only after every runtime and GPU resource
//!   held by the compositor thread is released. A shutdown signal sent
//!   during a frame wait ends the loop without submitting that frame.
//! - `XrSubsystem::start` returns within `runtime_timeout_ms`; a runtime
//!   slower than that is reported unavailable.

mod config;
mod lifecycle;
mod runtime;
mod scheduler;
mod session;
mod sim;
mod status;
mod timing;

pub use config::{CompositorConfig, ConfigError};
pub use lifecycle::{StartError, XrSubsystem};
pub use runtime::{
    AppInfo, FrameSubmission, FrameTiming, GraphicsApi, GraphicsBinding, RuntimeEvent,
    RuntimeInfo, RuntimeSessionState, SwapchainExtent, SwapchainInfo, XrError, XrRuntime,
    make_version,
};
pub use scheduler::{DropReason, FrameOutcome, FrameScheduler};
pub use session::{CompositorSession, CompositorState};
pub use sim::{SimCounters, SimHandle, SimulatedRuntime};
pub use status::{DisplayStatus, STATUS_BACKLOG, StatusPublisher, StatusUpdate};
pub use timing::{FrameTimer, SchedulerStats};

pub fn crate_info() -> &'static str {
    "tilexr-compositor v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("compositor"));
    }
}
