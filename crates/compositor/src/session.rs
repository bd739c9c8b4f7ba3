use std::time::{Duration, Instant};

use tilexr_render::EyeView;

use crate::config::CompositorConfig;
use crate::runtime::{
    AppInfo, FrameSubmission, FrameTiming, GraphicsBinding, RuntimeEvent, RuntimeSessionState,
    SwapchainExtent, SwapchainInfo, XrError, XrRuntime,
};
use crate::status::{StatusPublisher, StatusUpdate};

/// Compositor session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositorState {
    Uninitialized,
    InstanceReady,
    SessionReady,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl CompositorState {
    /// States from which `Stopping` and `LossPending` are reachable.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::InstanceReady
                | Self::SessionReady
                | Self::Synchronized
                | Self::Visible
                | Self::Focused
        )
    }

    /// Frame submission with layers is only legal here.
    pub fn can_submit(&self) -> bool {
        matches!(self, Self::Visible | Self::Focused)
    }

    pub fn can_transition_to(&self, next: CompositorState) -> bool {
        use CompositorState::*;
        if matches!(next, Stopping | LossPending) {
            return self.is_active();
        }
        matches!(
            (*self, next),
            (Uninitialized, InstanceReady)
                | (InstanceReady, SessionReady)
                | (InstanceReady, Uninitialized)
                | (SessionReady, Synchronized)
                | (Synchronized, Visible)
                | (Synchronized, SessionReady)
                | (Visible, Focused)
                | (Visible, Synchronized)
                | (Visible, SessionReady)
                | (Focused, Visible)
                | (Focused, SessionReady)
                | (Stopping, Exiting)
                | (LossPending, Uninitialized)
                | (Exiting, Uninitialized)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::InstanceReady => "INSTANCE_READY",
            Self::SessionReady => "SESSION_READY",
            Self::Synchronized => "SYNCHRONIZED",
            Self::Visible => "VISIBLE",
            Self::Focused => "FOCUSED",
            Self::Stopping => "STOPPING",
            Self::LossPending => "LOSS_PENDING",
            Self::Exiting => "EXITING",
        }
    }
}

impl std::fmt::Display for CompositorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The one compositor session of a subsystem activation.
///
/// Owns the runtime and every runtime-side resource (instance, session,
/// swapchain, the currently leased swapchain image). All teardown paths go
/// through here so that no image lease or runtime handle outlives the state
/// that owns it.
pub struct CompositorSession<R: XrRuntime> {
    runtime: R,
    state: CompositorState,
    status: StatusPublisher,
    app: AppInfo,
    binding: GraphicsBinding,
    extent: SwapchainExtent,
    timeout: Duration,
    has_instance: bool,
    has_session: bool,
    running: bool,
    swapchain: Option<SwapchainInfo>,
    leased_image: Option<u32>,
    frame_open: bool,
}

impl<R: XrRuntime> CompositorSession<R> {
    pub fn new(runtime: R, config: &CompositorConfig, status: StatusPublisher) -> Self {
        Self {
            runtime,
            state: CompositorState::Uninitialized,
            status,
            app: config.app.clone(),
            binding: config.graphics,
            extent: config.swapchain,
            timeout: config.runtime_timeout(),
            has_instance: false,
            has_session: false,
            running: false,
            swapchain: None,
            leased_image: None,
            frame_open: false,
        }
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    /// Whether the runtime session has been begun and not ended.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn swapchain(&self) -> Option<SwapchainInfo> {
        self.swapchain
    }

    /// Swapchain images currently borrowed from the runtime (0 or 1).
    pub fn leased_images(&self) -> usize {
        usize::from(self.leased_image.is_some())
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn into_runtime(self) -> R {
        self.runtime
    }

    /// Probe for a runtime and create the instance.
    ///
    /// Calling this on an already initialized session is a no-op.
    pub fn initialize(&mut self) -> Result<(), XrError> {
        match self.state {
            CompositorState::Uninitialized => {}
            CompositorState::Exiting => {
                self.transition(CompositorState::Uninitialized, None);
            }
            state => {
                tracing::warn!(%state, "XR runtime already initialized");
                return Ok(());
            }
        }
        tracing::info!("initializing XR runtime");

        let info = match self.runtime.query_support(self.timeout) {
            Ok(info) => info,
            Err(err) => {
                let err = as_unavailable(err);
                tracing::error!(error = %err, "XR runtime not available");
                self.report_failure(&err);
                return Err(err);
            }
        };
        tracing::debug!(runtime = %info.name, version = %info.version, "XR runtime detected");

        if let Err(err) = self.runtime.create_instance(&self.app) {
            tracing::error!(error = %err, "failed to create XR instance");
            self.report_failure(&err);
            return Err(err);
        }
        self.has_instance = true;
        self.transition(CompositorState::InstanceReady, None);
        Ok(())
    }

    /// Create the session and swapchain against the configured graphics
    /// binding. On failure everything is torn down to `Uninitialized`.
    pub fn create_session(&mut self) -> Result<(), XrError> {
        if self.state != CompositorState::InstanceReady {
            return Err(XrError::CallOrderInvalid);
        }

        if let Err(err) = self.runtime.create_session(&self.binding, self.timeout) {
            let err = as_unavailable(err);
            tracing::warn!(error = %err, binding = ?self.binding, "session creation failed");
            self.release_runtime_resources();
            self.transition(CompositorState::Uninitialized, Some(err.to_string()));
            return Err(err);
        }
        self.has_session = true;

        match self.runtime.create_swapchain(self.extent) {
            Ok(info) => self.swapchain = Some(info),
            Err(err) => {
                tracing::warn!(error = %err, "swapchain creation failed");
                self.release_runtime_resources();
                self.transition(CompositorState::Uninitialized, Some(err.to_string()));
                return Err(err);
            }
        }

        self.transition(CompositorState::SessionReady, None);
        Ok(())
    }

    /// Drain pending runtime events and apply them. Never blocks.
    pub fn poll_events(&mut self) -> Result<usize, XrError> {
        let mut handled = 0;
        while self.state.is_active() {
            let event = match self.runtime.poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) if err.is_session_loss() => {
                    self.handle_loss(&err.to_string());
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            handled += 1;
            self.apply_event(event);
        }
        Ok(handled)
    }

    fn apply_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::SessionStateChanged(reported) => self.apply_runtime_state(reported),
            RuntimeEvent::InstanceLossPending => self.handle_loss("instance loss pending"),
            RuntimeEvent::EventsLost(count) => {
                tracing::warn!(count, "runtime dropped events");
            }
        }
    }

    fn apply_runtime_state(&mut self, reported: RuntimeSessionState) {
        tracing::debug!(?reported, state = %self.state, "runtime session state");
        match reported {
            RuntimeSessionState::Idle => {}
            RuntimeSessionState::Ready => {
                if self.state == CompositorState::SessionReady && !self.running {
                    match self.runtime.begin_session() {
                        Ok(()) => self.running = true,
                        Err(err) if err.is_session_loss() => self.handle_loss(&err.to_string()),
                        Err(err) => tracing::warn!(error = %err, "failed to begin session"),
                    }
                }
            }
            RuntimeSessionState::Synchronized => self.follow_runtime(CompositorState::Synchronized),
            RuntimeSessionState::Visible => self.follow_runtime(CompositorState::Visible),
            RuntimeSessionState::Focused => self.follow_runtime(CompositorState::Focused),
            RuntimeSessionState::Stopping => {
                self.abandon_frame();
                if self.running {
                    if let Err(err) = self.runtime.end_session() {
                        tracing::warn!(error = %err, "failed to end session");
                    }
                    self.running = false;
                }
                if matches!(
                    self.state,
                    CompositorState::Synchronized | CompositorState::Visible | CompositorState::Focused
                ) {
                    self.transition(CompositorState::SessionReady, Some("runtime stopped session".into()));
                }
            }
            RuntimeSessionState::LossPending => self.handle_loss("runtime reported loss pending"),
            RuntimeSessionState::Exiting => self.shutdown(),
        }
    }

    fn follow_runtime(&mut self, next: CompositorState) {
        if !self.running || !self.state.can_transition_to(next) {
            tracing::warn!(
                from = %self.state,
                to = %next,
                running = self.running,
                "ignoring out-of-order runtime state change"
            );
            return;
        }
        if self.state.can_submit() && !next.can_submit() {
            self.abandon_frame();
        }
        self.transition(next, None);
    }

    /// Wait for the runtime's next frame slot.
    pub fn wait_frame(&mut self) -> Result<FrameTiming, XrError> {
        if !self.running {
            return Err(XrError::SessionNotRunning);
        }
        self.runtime.wait_frame()
    }

    pub fn begin_frame(&mut self) -> Result<(), XrError> {
        if self.frame_open {
            return Err(XrError::CallOrderInvalid);
        }
        self.runtime.begin_frame()?;
        self.frame_open = true;
        Ok(())
    }

    pub fn frame_open(&self) -> bool {
        self.frame_open
    }

    pub fn locate_views(&mut self, display_time: i64) -> Result<Vec<EyeView>, XrError> {
        self.runtime.locate_views(display_time)
    }

    /// Borrow the next swapchain image. Only legal while frames may be
    /// submitted, and only one image at a time.
    pub fn acquire_image(&mut self) -> Result<u32, XrError> {
        if !self.state.can_submit() {
            return Err(XrError::SessionNotRunning);
        }
        if self.leased_image.is_some() {
            return Err(XrError::CallOrderInvalid);
        }
        let image = self.runtime.acquire_image()?;
        self.leased_image = Some(image);
        if let Err(err) = self.runtime.wait_image(self.timeout) {
            self.release_image()?;
            return Err(err);
        }
        Ok(image)
    }

    pub fn release_image(&mut self) -> Result<(), XrError> {
        if self.leased_image.take().is_some() {
            self.runtime.release_image()?;
        }
        Ok(())
    }

    /// Finish the open frame. A submission with layers outside
    /// `Visible`/`Focused` is downgraded to a skip.
    pub fn end_frame(&mut self, submission: FrameSubmission) -> Result<(), XrError> {
        if !self.frame_open {
            return Err(XrError::CallOrderInvalid);
        }
        let submission = if submission.has_layers() && !self.state.can_submit() {
            tracing::warn!(state = %self.state, "refusing layer submission outside VISIBLE/FOCUSED");
            FrameSubmission::Skip {
                display_time: submission.display_time(),
            }
        } else {
            submission
        };
        if self.leased_image.is_some() {
            self.release_image()?;
        }
        self.frame_open = false;
        self.runtime.end_frame(&submission)
    }

    /// Give back the leased image and close the open frame with a skip,
    /// ignoring runtime errors.
    pub fn abandon_frame(&mut self) {
        if let Err(err) = self.release_image() {
            tracing::debug!(error = %err, "release of leased image failed");
        }
        if self.frame_open {
            self.frame_open = false;
            let skip = FrameSubmission::Skip { display_time: 0 };
            if let Err(err) = self.runtime.end_frame(&skip) {
                tracing::debug!(error = %err, "closing abandoned frame failed");
            }
        }
    }

    /// Session loss: stop submitting, tear everything down, and return to
    /// `Uninitialized`.
    pub fn handle_loss(&mut self, reason: &str) {
        if !self.state.is_active() {
            tracing::debug!(state = %self.state, reason, "loss reported while inactive");
            return;
        }
        tracing::error!(reason, state = %self.state, "XR session lost");
        self.transition(CompositorState::LossPending, Some(reason.to_owned()));
        self.release_runtime_resources();
        self.transition(CompositorState::Uninitialized, Some(reason.to_owned()));
    }

    /// Release everything and report `Exiting`. Synchronous: when this
    /// returns, no runtime resource is held.
    pub fn shutdown(&mut self) {
        if !self.state.is_active() {
            tracing::debug!(state = %self.state, "shutdown of inactive session");
            return;
        }
        tracing::info!("shutting down XR session");
        self.transition(CompositorState::Stopping, None);
        self.release_runtime_resources();
        self.transition(CompositorState::Exiting, None);
    }

    fn release_runtime_resources(&mut self) {
        self.abandon_frame();
        if self.running {
            log_teardown("end_session", self.runtime.end_session());
            self.running = false;
        }
        if self.swapchain.take().is_some() {
            log_teardown("destroy_swapchain", self.runtime.destroy_swapchain());
        }
        if self.has_session {
            log_teardown("destroy_session", self.runtime.destroy_session());
            self.has_session = false;
        }
        if self.has_instance {
            log_teardown("destroy_instance", self.runtime.destroy_instance());
            self.has_instance = false;
        }
    }

    /// Failure notice for an operation that left the state unchanged.
    fn report_failure(&mut self, err: &XrError) {
        self.status.publish(StatusUpdate::failure(self.state, err.to_string()));
    }

    fn transition(&mut self, next: CompositorState, reason: Option<String>) -> bool {
        let previous = self.state;
        if previous == next {
            return true;
        }
        if !previous.can_transition_to(next) {
            tracing::warn!(from = %previous, to = %next, "illegal compositor transition refused");
            return false;
        }
        self.state = next;
        tracing::info!(from = %previous, to = %next, "compositor state");
        self.status.publish(StatusUpdate {
            previous,
            state: next,
            reason,
            at: Instant::now(),
        });
        true
    }
}

fn as_unavailable(err: XrError) -> XrError {
    match err {
        XrError::Timeout(_) => XrError::RuntimeUnavailable,
        other => other,
    }
}

fn log_teardown(call: &'static str, result: Result<(), XrError>) {
    if let Err(err) = result {
        tracing::error!(call, error = %err, "teardown call failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimHandle, SimulatedRuntime};
    use crossbeam_channel::Receiver;

    fn scripted() -> (CompositorSession<SimulatedRuntime>, SimHandle, Receiver<StatusUpdate>) {
        let runtime = SimulatedRuntime::new();
        let sim = runtime.handle();
        sim.set_auto_advance(false);
        sim.set_pacing(false);
        let status = StatusPublisher::new();
        let updates = status.subscribe();
        let session = CompositorSession::new(runtime, &CompositorConfig::default(), status);
        (session, sim, updates)
    }

    fn drain(updates: &Receiver<StatusUpdate>) -> Vec<CompositorState> {
        updates.try_iter().map(|u| u.state).collect()
    }

    #[test]
    fn scripted_runtime_drives_full_lifecycle() {
        use CompositorState::*;
        let (mut session, sim, updates) = scripted();
        session.initialize().unwrap();
        session.create_session().unwrap();
        session.poll_events().unwrap();
        assert!(session.is_running());

        for reported in [
            RuntimeSessionState::Synchronized,
            RuntimeSessionState::Visible,
            RuntimeSessionState::Focused,
            RuntimeSessionState::Visible,
        ] {
            sim.push_state(reported);
        }
        session.poll_events().unwrap();
        assert_eq!(session.state(), Visible);

        sim.request_exit();
        session.poll_events().unwrap();
        assert_eq!(session.state(), Exiting);

        assert_eq!(
            drain(&updates),
            vec![
                InstanceReady,
                SessionReady,
                Synchronized,
                Visible,
                Focused,
                Visible,
                SessionReady,
                Stopping,
                Exiting
            ]
        );
        assert_eq!(session.leased_images(), 0);
        assert_eq!(sim.leased_images(), 0);
        assert!(!sim.has_session());
        assert!(!sim.has_instance());
        assert!(sim.violations().is_empty());
    }

    #[test]
    fn out_of_order_runtime_state_is_ignored() {
        let (mut session, sim, _updates) = scripted();
        session.initialize().unwrap();
        session.create_session().unwrap();
        session.poll_events().unwrap();

        sim.push_state(RuntimeSessionState::Focused);
        session.poll_events().unwrap();
        assert_eq!(session.state(), CompositorState::SessionReady);
    }

    #[test]
    fn layers_outside_visible_are_downgraded_to_skip() {
        let (mut session, sim, _updates) = scripted();
        session.initialize().unwrap();
        session.create_session().unwrap();
        session.poll_events().unwrap();

        assert_eq!(session.acquire_image(), Err(XrError::SessionNotRunning));
        session.begin_frame().unwrap();
        session
            .end_frame(FrameSubmission::Projection {
                display_time: 1,
                image: 0,
                views: Vec::new(),
            })
            .unwrap();
        assert_eq!(sim.counters().layers_submitted, 0);
        assert_eq!(sim.counters().skips_submitted, 1);
        assert!(sim.violations().is_empty());
    }

    #[test]
    fn loss_releases_leased_image_and_resets() {
        use CompositorState::*;
        let (mut session, sim, updates) = scripted();
        sim.set_auto_advance(true);
        session.initialize().unwrap();
        session.create_session().unwrap();
        session.poll_events().unwrap();
        assert_eq!(session.state(), Focused);

        session.wait_frame().unwrap();
        session.begin_frame().unwrap();
        session.acquire_image().unwrap();
        assert_eq!(sim.leased_images(), 1);

        sim.push_state(RuntimeSessionState::LossPending);
        session.poll_events().unwrap();
        assert_eq!(session.state(), Uninitialized);
        assert_eq!(session.leased_images(), 0);
        assert_eq!(sim.leased_images(), 0);
        assert!(!sim.has_instance());

        let last: Vec<_> = updates.try_iter().collect();
        let lost = &last[last.len() - 1];
        assert_eq!(lost.previous, LossPending);
        assert!(lost.reason.is_some());
        assert!(sim.violations().is_empty());
    }

    #[test]
    fn unavailable_runtime_reports_error_and_stays_uninitialized() {
        let (mut session, sim, updates) = scripted();
        sim.set_available(false);
        assert_eq!(session.initialize(), Err(XrError::RuntimeUnavailable));
        assert_eq!(session.state(), CompositorState::Uninitialized);
        let update = updates.try_recv().unwrap();
        assert_eq!(update.display(), crate::status::DisplayStatus::Error);
        assert!(update.is_failure());
        assert!(updates.try_recv().is_err());
        assert!(!sim.has_instance());
    }

    #[test]
    fn rejected_binding_tears_down_instance() {
        let (mut session, sim, _updates) = scripted();
        sim.reject_binding(Some("no GL 4.3 context"));
        session.initialize().unwrap();
        assert!(matches!(
            session.create_session(),
            Err(XrError::GraphicsBindingRejected(_))
        ));
        assert_eq!(session.state(), CompositorState::Uninitialized);
        assert!(!sim.has_instance());
        assert_eq!(session.create_session(), Err(XrError::CallOrderInvalid));
    }

    #[test]
    fn loss_and_stop_reachable_only_from_active_states() {
        use CompositorState::*;
        for s in [InstanceReady, SessionReady, Synchronized, Visible, Focused] {
            assert!(s.can_transition_to(Stopping), "{s}");
            assert!(s.can_transition_to(LossPending), "{s}");
        }
        for s in [Uninitialized, Stopping, LossPending, Exiting] {
            assert!(!s.can_transition_to(Stopping), "{s}");
            assert!(!s.can_transition_to(LossPending), "{s}");
        }
    }

    #[test]
    fn forward_chain_is_one_step_at_a_time() {
        use CompositorState::*;
        assert!(SessionReady.can_transition_to(Synchronized));
        assert!(!SessionReady.can_transition_to(Visible));
        assert!(!SessionReady.can_transition_to(Focused));
        assert!(!Synchronized.can_transition_to(Focused));
        assert!(Focused.can_transition_to(Visible));
        assert!(!Exiting.can_transition_to(InstanceReady));
    }

    #[test]
    fn only_visible_and_focused_submit() {
        use CompositorState::*;
        let submitting: Vec<_> = [
            Uninitialized,
            InstanceReady,
            SessionReady,
            Synchronized,
            Visible,
            Focused,
            Stopping,
            LossPending,
            Exiting,
        ]
        .into_iter()
        .filter(|s| s.can_submit())
        .collect();
        assert_eq!(submitting, vec![Visible, Focused]);
    }
}
