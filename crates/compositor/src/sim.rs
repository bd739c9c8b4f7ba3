//! An in-process XR runtime for tests, headless runs, and the CLI's
//! `simulate` command.
//!
//! The runtime itself moves into the compositor thread; a [`SimHandle`]
//! sharing the same state stays behind to inject events and failures and to
//! inspect what the compositor did.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use glam::{Quat, Vec3};
use parking_lot::Mutex;
use tilexr_common::{GRID_SIZE, TILE_WORLD_SIZE};
use tilexr_render::{EyeView, Fov};

use crate::runtime::{
    AppInfo, FrameSubmission, FrameTiming, GraphicsBinding, RuntimeEvent, RuntimeInfo,
    RuntimeSessionState, SwapchainExtent, SwapchainInfo, XrError, XrRuntime,
};

const EYE_HEIGHT: f32 = 80.0;
const HALF_IPD: f32 = 0.032;

/// Calls the simulated runtime has seen, for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub instances_created: u64,
    pub sessions_created: u64,
    pub frames_waited: u64,
    pub layers_submitted: u64,
    pub skips_submitted: u64,
    pub images_acquired: u64,
    pub images_released: u64,
}

#[derive(Debug)]
struct SimState {
    available: bool,
    rejected_binding: Option<String>,
    auto_advance: bool,
    pacing: bool,
    frame_period: Duration,
    skip_frames: u32,
    lose_at_frame: Option<u64>,
    failing_end_frames: u32,
    stall: Duration,

    events: VecDeque<RuntimeEvent>,
    reported: RuntimeSessionState,
    instance: bool,
    session: bool,
    running: bool,
    swapchain: bool,
    frame_open: bool,
    leased: bool,
    next_image: u32,
    display_time: i64,

    counters: SimCounters,
    violations: Vec<String>,
}

impl SimState {
    fn violation(&mut self, what: impl Into<String>) {
        let what = what.into();
        tracing::warn!(violation = %what, "simulated runtime saw a protocol violation");
        self.violations.push(what);
    }

    fn queue_state(&mut self, state: RuntimeSessionState) {
        self.events.push_back(RuntimeEvent::SessionStateChanged(state));
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            available: true,
            rejected_binding: None,
            auto_advance: true,
            pacing: true,
            frame_period: Duration::from_nanos(1_000_000_000 / 90),
            skip_frames: 0,
            lose_at_frame: None,
            failing_end_frames: 0,
            stall: Duration::ZERO,
            events: VecDeque::new(),
            reported: RuntimeSessionState::Idle,
            instance: false,
            session: false,
            running: false,
            swapchain: false,
            frame_open: false,
            leased: false,
            next_image: 0,
            display_time: 0,
            counters: SimCounters::default(),
            violations: Vec::new(),
        }
    }
}

/// A scriptable stand-in for an XR runtime.
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    state: Arc<Mutex<SimState>>,
}

/// Control and inspection side of a [`SimulatedRuntime`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRuntime {
    /// Images in every swapchain this runtime creates.
    pub const SWAPCHAIN_IMAGES: u32 = 3;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn stall(&self) {
        let stall = self.state.lock().stall;
        if !stall.is_zero() {
            std::thread::sleep(stall);
        }
    }
}

impl SimHandle {
    /// When false, the support query times out as if no device were attached.
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Block the support query and session creation for `stall`, ignoring
    /// the timeout they are given.
    pub fn stall_bring_up(&self, stall: Duration) {
        self.state.lock().stall = stall;
    }

    /// Make session creation reject the graphics binding.
    pub fn reject_binding(&self, reason: Option<&str>) {
        self.state.lock().rejected_binding = reason.map(str::to_owned);
    }

    /// When true (the default), a begun session walks itself to `Focused`.
    pub fn set_auto_advance(&self, auto_advance: bool) {
        self.state.lock().auto_advance = auto_advance;
    }

    /// When true (the default), `wait_frame` sleeps one frame period.
    pub fn set_pacing(&self, pacing: bool) {
        self.state.lock().pacing = pacing;
    }

    pub fn set_frame_period(&self, period: Duration) {
        self.state.lock().frame_period = period;
    }

    pub fn push_state(&self, state: RuntimeSessionState) {
        self.state.lock().queue_state(state);
    }

    pub fn push_event(&self, event: RuntimeEvent) {
        self.state.lock().events.push_back(event);
    }

    /// The runtime asks the app to stop, then to exit.
    pub fn request_exit(&self) {
        let mut state = self.state.lock();
        state.queue_state(RuntimeSessionState::Stopping);
        state.queue_state(RuntimeSessionState::Exiting);
    }

    /// The next `frames` frame waits report `should_render == false`.
    pub fn skip_next_frames(&self, frames: u32) {
        self.state.lock().skip_frames = frames;
    }

    /// The `frames`-th frame wait from now fails with a session loss.
    pub fn lose_session_after(&self, frames: u64) {
        let mut state = self.state.lock();
        let at = state.counters.frames_waited + frames.max(1);
        state.lose_at_frame = Some(at);
    }

    pub fn fail_next_end_frames(&self, count: u32) {
        self.state.lock().failing_end_frames = count;
    }

    /// The session state the runtime has delivered to the app so far.
    pub fn reported_state(&self) -> RuntimeSessionState {
        self.state.lock().reported
    }

    pub fn leased_images(&self) -> usize {
        usize::from(self.state.lock().leased)
    }

    pub fn has_instance(&self) -> bool {
        self.state.lock().instance
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().session
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn counters(&self) -> SimCounters {
        self.state.lock().counters
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }
}

fn eye_views() -> Vec<EyeView> {
    let center = GRID_SIZE as f32 * TILE_WORLD_SIZE / 2.0;
    let down = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2);
    let fov = Fov::symmetric(1.8, 1.8);
    [-HALF_IPD, HALF_IPD]
        .into_iter()
        .map(|dx| EyeView::new(Vec3::new(center + dx, EYE_HEIGHT, center), down, fov))
        .collect()
}

impl XrRuntime for SimulatedRuntime {
    fn query_support(&mut self, timeout: Duration) -> Result<RuntimeInfo, XrError> {
        self.stall();
        if !self.state.lock().available {
            return Err(XrError::Timeout(timeout));
        }
        Ok(RuntimeInfo {
            name: "tilexr simulated runtime".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        })
    }

    fn create_instance(&mut self, app: &AppInfo) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if state.instance {
            state.violation("instance created twice");
            return Err(XrError::CallOrderInvalid);
        }
        tracing::debug!(app = %app.application_name, "simulated instance created");
        state.instance = true;
        state.counters.instances_created += 1;
        Ok(())
    }

    fn destroy_instance(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if state.session {
            state.violation("instance destroyed before its session");
        }
        state.instance = false;
        Ok(())
    }

    fn create_session(&mut self, binding: &GraphicsBinding, _timeout: Duration) -> Result<(), XrError> {
        self.stall();
        let mut state = self.state.lock();
        if !state.instance {
            state.violation("session created without an instance");
            return Err(XrError::CallOrderInvalid);
        }
        if let Some(reason) = state.rejected_binding.clone() {
            return Err(XrError::GraphicsBindingRejected(format!("{:?}: {reason}", binding.api)));
        }
        state.session = true;
        state.counters.sessions_created += 1;
        state.reported = RuntimeSessionState::Idle;
        state.events.clear();
        state.queue_state(RuntimeSessionState::Idle);
        state.queue_state(RuntimeSessionState::Ready);
        Ok(())
    }

    fn destroy_session(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if state.running {
            state.violation("session destroyed while running");
        }
        if state.swapchain {
            state.violation("session destroyed before its swapchain");
        }
        state.session = false;
        state.running = false;
        Ok(())
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if state.reported != RuntimeSessionState::Ready || state.running {
            let what = format!("begin_session in {:?}", state.reported);
            state.violation(what);
            return Err(XrError::CallOrderInvalid);
        }
        state.running = true;
        if state.auto_advance {
            state.queue_state(RuntimeSessionState::Synchronized);
            state.queue_state(RuntimeSessionState::Visible);
            state.queue_state(RuntimeSessionState::Focused);
        }
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(XrError::SessionNotRunning);
        }
        state.running = false;
        state.frame_open = false;
        Ok(())
    }

    fn create_swapchain(&mut self, extent: SwapchainExtent) -> Result<SwapchainInfo, XrError> {
        let mut state = self.state.lock();
        if !state.session {
            state.violation("swapchain created without a session");
            return Err(XrError::CallOrderInvalid);
        }
        state.swapchain = true;
        Ok(SwapchainInfo {
            image_count: Self::SWAPCHAIN_IMAGES,
            extent,
        })
    }

    fn destroy_swapchain(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if state.leased {
            state.violation("swapchain destroyed with an image leased");
            state.leased = false;
        }
        state.swapchain = false;
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError> {
        let mut state = self.state.lock();
        let event = state.events.pop_front();
        if let Some(RuntimeEvent::SessionStateChanged(reported)) = event {
            state.reported = reported;
        }
        Ok(event)
    }

    fn wait_frame(&mut self) -> Result<FrameTiming, XrError> {
        let (pause, period) = {
            let state = self.state.lock();
            if !state.running {
                return Err(XrError::SessionNotRunning);
            }
            (state.pacing, state.frame_period)
        };
        if pause {
            std::thread::sleep(period);
        }

        let mut state = self.state.lock();
        state.counters.frames_waited += 1;
        if state.lose_at_frame == Some(state.counters.frames_waited) {
            state.lose_at_frame = None;
            state.reported = RuntimeSessionState::LossPending;
            return Err(XrError::SessionLost);
        }
        let visible = matches!(
            state.reported,
            RuntimeSessionState::Visible | RuntimeSessionState::Focused
        );
        let skipping = state.skip_frames > 0;
        if skipping {
            state.skip_frames -= 1;
        }
        state.display_time += period.as_nanos() as i64;
        Ok(FrameTiming {
            predicted_display_time: state.display_time,
            predicted_display_period: period,
            should_render: visible && !skipping,
        })
    }

    fn begin_frame(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if state.frame_open {
            state.violation("begin_frame with a frame already open");
            return Err(XrError::CallOrderInvalid);
        }
        state.frame_open = true;
        Ok(())
    }

    fn locate_views(&mut self, _display_time: i64) -> Result<Vec<EyeView>, XrError> {
        if !self.state.lock().session {
            return Err(XrError::SessionNotRunning);
        }
        Ok(eye_views())
    }

    fn acquire_image(&mut self) -> Result<u32, XrError> {
        let mut state = self.state.lock();
        if !state.swapchain {
            state.violation("image acquired without a swapchain");
            return Err(XrError::CallOrderInvalid);
        }
        if state.leased {
            state.violation("second swapchain image acquired");
            return Err(XrError::CallOrderInvalid);
        }
        state.leased = true;
        state.counters.images_acquired += 1;
        let image = state.next_image;
        state.next_image = (image + 1) % Self::SWAPCHAIN_IMAGES;
        Ok(image)
    }

    fn wait_image(&mut self, _timeout: Duration) -> Result<(), XrError> {
        Ok(())
    }

    fn release_image(&mut self) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if !state.leased {
            state.violation("released an image that was not leased");
            return Err(XrError::CallOrderInvalid);
        }
        state.leased = false;
        state.counters.images_released += 1;
        Ok(())
    }

    fn end_frame(&mut self, submission: &FrameSubmission) -> Result<(), XrError> {
        let mut state = self.state.lock();
        if !state.frame_open {
            state.violation("end_frame without begin_frame");
            return Err(XrError::CallOrderInvalid);
        }
        state.frame_open = false;
        if state.leased {
            state.violation("end_frame with a swapchain image still leased");
        }
        if state.failing_end_frames > 0 {
            state.failing_end_frames -= 1;
            return Err(XrError::Other(-1));
        }
        if submission.has_layers() {
            if !matches!(
                state.reported,
                RuntimeSessionState::Visible | RuntimeSessionState::Focused
            ) {
                let what = format!("layers submitted in {:?}", state.reported);
                state.violation(what);
            }
            state.counters.layers_submitted += 1;
        } else {
            state.counters.skips_submitted += 1;
        }
        Ok(())
    }
}
