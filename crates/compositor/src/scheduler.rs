use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use tilexr_geometry::{SnapshotExchange, SnapshotReader};
use tilexr_render::{
    DrawStats, GraphicsContext, LeaseOwner, RenderTarget, SharedContextArbiter, ViewPass,
    Viewport, ZoneRenderer,
};

use crate::config::CompositorConfig;
use crate::runtime::{FrameSubmission, SwapchainExtent, XrError, XrRuntime};
use crate::session::{CompositorSession, CompositorState};
use crate::timing::{FrameTimer, SchedulerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The context lease was not granted before the submit deadline.
    Contention,
    /// The runtime rejected a call for this frame.
    SubmitFailure,
    /// The graphics context failed while drawing.
    RenderFailure,
}

/// What one scheduler iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered(DrawStats),
    /// The runtime asked for no rendering; an empty frame was submitted.
    Skipped,
    /// A degraded frame: an empty frame was submitted instead.
    Dropped(DropReason),
    /// No running session; nothing to pace against.
    Idle,
    SessionLost,
    Exited,
    /// Shutdown was signalled during the frame wait; nothing was submitted.
    ShutdownRequested,
}

/// The compositor frame loop.
///
/// Paced entirely by the runtime's frame wait. Each rendered frame pulls the
/// latest snapshot without waiting for new geometry, takes the context lease
/// with a deadline, draws, and submits. If the lease is not granted in time
/// the frame is submitted empty.
pub struct FrameScheduler<C: GraphicsContext> {
    arbiter: Arc<SharedContextArbiter<C>>,
    reader: SnapshotReader,
    renderer: ZoneRenderer,
    submit_margin: Duration,
    idle_poll: Duration,
    reconnect_interval: Option<Duration>,
    timer: FrameTimer,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl<C: GraphicsContext> FrameScheduler<C> {
    pub fn new(
        arbiter: Arc<SharedContextArbiter<C>>,
        exchange: Arc<SnapshotExchange>,
        config: &CompositorConfig,
    ) -> Self {
        Self {
            arbiter,
            reader: SnapshotReader::new(exchange),
            renderer: ZoneRenderer::new(),
            submit_margin: config.submit_margin(),
            idle_poll: config.idle_poll(),
            reconnect_interval: config.reconnect_interval(),
            timer: FrameTimer::new(120),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    /// Shared view of the counters, readable from other threads.
    pub fn stats_handle(&self) -> Arc<Mutex<SchedulerStats>> {
        Arc::clone(&self.stats)
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    /// One pass of the frame protocol.
    pub fn run_iteration<R: XrRuntime>(&mut self, session: &mut CompositorSession<R>) -> FrameOutcome {
        self.iterate(session, None)
    }

    fn iterate<R: XrRuntime>(
        &mut self,
        session: &mut CompositorSession<R>,
        shutdown: Option<&Receiver<()>>,
    ) -> FrameOutcome {
        if let Err(err) = session.poll_events() {
            if err.is_session_loss() {
                return self.record_loss();
            }
            tracing::warn!(error = %err, "event poll failed");
        }

        match session.state() {
            CompositorState::Exiting => return FrameOutcome::Exited,
            CompositorState::Uninitialized => return self.record_loss(),
            _ => {}
        }
        if !session.is_running() {
            self.stats.lock().idle_polls += 1;
            return FrameOutcome::Idle;
        }

        let timing = match session.wait_frame() {
            Ok(timing) => timing,
            Err(err) => return self.frame_error(session, err),
        };
        let woke = Instant::now();
        if shutdown.is_some_and(shutdown_requested) {
            return FrameOutcome::ShutdownRequested;
        }
        let _span = tracing::debug_span!("frame", display_time = timing.predicted_display_time).entered();

        if let Err(err) = session.begin_frame() {
            return self.frame_error(session, err);
        }
        let display_time = timing.predicted_display_time;

        if !timing.should_render || !session.state().can_submit() {
            if let Err(err) = session.end_frame(FrameSubmission::Skip { display_time }) {
                return self.frame_error(session, err);
            }
            self.stats.lock().skipped += 1;
            return FrameOutcome::Skipped;
        }

        let deadline = woke + timing.predicted_display_period.saturating_sub(self.submit_margin);
        self.reader.refresh();
        let snapshot = Arc::clone(self.reader.current());

        let views = match session.locate_views(display_time) {
            Ok(views) => views,
            Err(err) => return self.frame_error(session, err),
        };

        let arbiter = Arc::clone(&self.arbiter);
        let mut lease = match arbiter.try_acquire_exclusive_until(LeaseOwner::Compositor, deadline) {
            Ok(lease) => lease,
            Err(err) => {
                tracing::debug!(error = %err, "dropping frame: context lease not granted");
                if let Err(err) = session.end_frame(FrameSubmission::Skip { display_time }) {
                    return self.frame_error(session, err);
                }
                self.stats.lock().dropped_contention += 1;
                return FrameOutcome::Dropped(DropReason::Contention);
            }
        };

        let image = match session.acquire_image() {
            Ok(image) => image,
            Err(err) => {
                drop(lease);
                return self.frame_error(session, err);
            }
        };

        let extent = session.swapchain().map(|s| s.extent).unwrap_or_default();
        let passes = view_passes(image, extent, &views);
        let drawn = self.renderer.draw_snapshot(&mut *lease, &snapshot, &passes);

        let draw_stats = match drawn {
            Ok(stats) => stats,
            Err(err) => {
                drop(lease);
                tracing::warn!(error = %err, "zone drawing failed; dropping frame");
                session.abandon_frame();
                self.stats.lock().dropped_render += 1;
                return FrameOutcome::Dropped(DropReason::RenderFailure);
            }
        };

        let submitted = session.release_image().and_then(|()| {
            session.end_frame(FrameSubmission::Projection {
                display_time,
                image,
                views,
            })
        });
        drop(lease);
        if let Err(err) = submitted {
            return self.frame_error(session, err);
        }

        let elapsed = woke.elapsed();
        self.timer.record(elapsed);
        let mut stats = self.stats.lock();
        stats.rendered += 1;
        if elapsed > timing.predicted_display_period {
            stats.late_frames += 1;
        }
        stats.draw_calls += u64::from(draw_stats.draw_calls);
        stats.avg_frame = self.timer.average();
        stats.max_frame = self.timer.max();
        FrameOutcome::Rendered(draw_stats)
    }

    /// Run until shutdown is signalled or the session exits, then release
    /// every GPU resource this loop owns and shut the session down.
    ///
    /// The shutdown signal is either a message or the sender going away.
    pub fn run<R: XrRuntime>(&mut self, session: &mut CompositorSession<R>, shutdown: &Receiver<()>) {
        tracing::info!("compositor frame loop started");
        loop {
            if shutdown_requested(shutdown) {
                break;
            }

            if session.state() == CompositorState::Uninitialized {
                let Some(interval) = self.reconnect_interval else {
                    tracing::info!("session gone and reconnect disabled; frame loop ending");
                    break;
                };
                if wait_for_shutdown(shutdown, interval) {
                    break;
                }
                self.reconnect(session);
                continue;
            }

            match self.iterate(session, Some(shutdown)) {
                FrameOutcome::Exited | FrameOutcome::ShutdownRequested => break,
                FrameOutcome::Idle => {
                    if wait_for_shutdown(shutdown, self.idle_poll) {
                        break;
                    }
                }
                FrameOutcome::SessionLost => self.release_gpu_resources(),
                FrameOutcome::Rendered(_) | FrameOutcome::Skipped | FrameOutcome::Dropped(_) => {}
            }
        }
        self.release_gpu_resources();
        session.shutdown();
        tracing::info!(stats = ?self.stats(), "compositor frame loop finished");
    }

    /// Free every zone buffer this loop uploaded and let go of the snapshot.
    pub fn release_gpu_resources(&mut self) {
        let mut lease = self.arbiter.acquire_exclusive(LeaseOwner::Lifecycle);
        let released = self.renderer.release_all(&mut *lease);
        drop(lease);
        self.reader.release();
        if released > 0 {
            tracing::debug!(released, "released compositor zone buffers");
        }
    }

    fn reconnect<R: XrRuntime>(&mut self, session: &mut CompositorSession<R>) {
        tracing::info!("attempting XR reconnect");
        let result = session.initialize().and_then(|()| session.create_session());
        match result {
            Ok(()) => {
                self.stats.lock().reconnects += 1;
                tracing::info!("XR session re-established");
            }
            Err(err) => tracing::warn!(error = %err, "XR reconnect failed"),
        }
    }

    fn record_loss(&mut self) -> FrameOutcome {
        self.stats.lock().session_losses += 1;
        FrameOutcome::SessionLost
    }

    fn frame_error<R: XrRuntime>(&mut self, session: &mut CompositorSession<R>, err: XrError) -> FrameOutcome {
        if err.is_session_loss() {
            session.handle_loss(&err.to_string());
            return self.record_loss();
        }
        tracing::debug!(error = %err, "frame submission failed; dropping frame");
        session.abandon_frame();
        self.stats.lock().dropped_submit += 1;
        FrameOutcome::Dropped(DropReason::SubmitFailure)
    }
}

fn view_passes(image: u32, extent: SwapchainExtent, views: &[tilexr_render::EyeView]) -> Vec<ViewPass> {
    views
        .iter()
        .enumerate()
        .map(|(eye, view)| ViewPass {
            target: RenderTarget::Swapchain {
                image,
                eye: eye as u32,
            },
            viewport: Viewport::full(extent.width, extent.height),
            view_proj: view.view_projection(),
        })
        .collect()
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
}

/// Wait up to `timeout` for shutdown. Returns true if shutdown was signalled.
fn wait_for_shutdown(shutdown: &Receiver<()>, timeout: Duration) -> bool {
    match shutdown.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}
