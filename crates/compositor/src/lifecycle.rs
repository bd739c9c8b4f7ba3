use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};
use parking_lot::Mutex;
use tilexr_geometry::SnapshotExchange;
use tilexr_render::{GraphicsContext, SharedContextArbiter};

use crate::config::CompositorConfig;
use crate::runtime::{XrError, XrRuntime};
use crate::scheduler::FrameScheduler;
use crate::session::{CompositorSession, CompositorState};
use crate::status::{StatusPublisher, StatusUpdate};
use crate::timing::SchedulerStats;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("XR subsystem is already running")]
    AlreadyRunning,

    #[error("XR runtime is still held by an earlier activation")]
    NoRuntime,

    #[error(transparent)]
    Runtime(#[from] XrError),

    #[error("failed to spawn compositor thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("compositor thread died during bring-up")]
    WorkerDied,
}

struct Worker<R: XrRuntime> {
    shutdown: Sender<()>,
    handle: JoinHandle<Option<CompositorSession<R>>>,
}

/// Host-facing owner of the XR compositor.
///
/// `start` brings the session up on a dedicated compositor thread and waits
/// at most `runtime_timeout_ms` for it; a runtime that takes longer is
/// reported unavailable and torn down once its call returns. `stop` blocks
/// until that thread has released every runtime and GPU resource it held.
pub struct XrSubsystem<R: XrRuntime + 'static, C: GraphicsContext + 'static> {
    config: CompositorConfig,
    runtime: Option<R>,
    arbiter: Arc<SharedContextArbiter<C>>,
    exchange: Arc<SnapshotExchange>,
    status: StatusPublisher,
    stats: Arc<Mutex<SchedulerStats>>,
    worker: Option<Worker<R>>,
    /// Bring-up that missed the start deadline and still owns the runtime.
    stalled: Option<Worker<R>>,
}

impl<R: XrRuntime + 'static, C: GraphicsContext + 'static> XrSubsystem<R, C> {
    pub fn new(
        runtime: R,
        arbiter: Arc<SharedContextArbiter<C>>,
        exchange: Arc<SnapshotExchange>,
        config: CompositorConfig,
    ) -> Self {
        Self {
            config,
            runtime: Some(runtime),
            arbiter,
            exchange,
            status: StatusPublisher::new(),
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
            worker: None,
            stalled: None,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &Arc<SharedContextArbiter<C>> {
        &self.arbiter
    }

    /// Bring up instance, session and swapchain, then start the frame loop.
    ///
    /// On failure no frame loop runs, the runtime is kept for a later
    /// attempt, and status subscribers have seen the error.
    pub fn start(&mut self) -> Result<(), StartError> {
        self.start_on(thread::Builder::new().name("tilexr-compositor".into()))
    }

    fn start_on(&mut self, builder: thread::Builder) -> Result<(), StartError> {
        if self.worker.is_some() {
            return Err(StartError::AlreadyRunning);
        }
        if self.stalled.as_ref().is_some_and(|w| w.handle.is_finished()) {
            if let Some(stalled) = self.stalled.take() {
                self.reclaim(stalled);
            }
        }
        let runtime = self.runtime.take().ok_or(StartError::NoRuntime)?;
        let _span = tracing::info_span!("xr_start").entered();

        let session = CompositorSession::new(runtime, &self.config, self.status.clone());
        let mut scheduler =
            FrameScheduler::new(Arc::clone(&self.arbiter), Arc::clone(&self.exchange), &self.config);
        let stats = scheduler.stats_handle();
        let (shutdown, signal) = crossbeam_channel::bounded(1);
        let (handoff, incoming) = crossbeam_channel::bounded::<CompositorSession<R>>(1);
        let (ready_tx, ready) = crossbeam_channel::bounded::<Result<(), XrError>>(1);

        let spawned = builder.spawn(move || {
            let mut session = incoming.recv().ok()?;
            let result = session.initialize().and_then(|()| session.create_session());
            let up = result.is_ok();
            // The starter stops listening once its deadline has passed.
            if ready_tx.send(result).is_ok() && up {
                scheduler.run(&mut session, &signal);
            } else {
                session.shutdown();
            }
            Some(session)
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!(error = %err, "failed to spawn compositor thread");
                self.runtime = Some(session.into_runtime());
                return Err(StartError::Spawn(err));
            }
        };
        if let Err(SendError(session)) = handoff.send(session) {
            self.runtime = Some(session.into_runtime());
            if handle.join().is_err() {
                tracing::error!("compositor thread panicked before bring-up");
            }
            return Err(StartError::WorkerDied);
        }
        let worker = Worker { shutdown, handle };

        let timeout = self.config.runtime_timeout();
        match ready.recv_timeout(timeout) {
            Ok(Ok(())) => {
                self.stats = stats;
                self.worker = Some(worker);
                tracing::info!("XR subsystem started");
                Ok(())
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "XR subsystem failed to start");
                self.reclaim(worker);
                Err(err.into())
            }
            Err(RecvTimeoutError::Timeout) => {
                drop(ready);
                let _ = worker.shutdown.try_send(());
                let err = XrError::RuntimeUnavailable;
                tracing::error!(?timeout, "XR runtime did not come up in time");
                self.status.publish(StatusUpdate::failure(
                    self.status.current_state(),
                    format!("{err}: no response within {timeout:?}"),
                ));
                self.stalled = Some(worker);
                Err(err.into())
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.reclaim(worker);
                Err(StartError::WorkerDied)
            }
        }
    }

    /// Stop the frame loop and wait for it to release everything.
    ///
    /// Also waits out a bring-up that missed its start deadline. Returns
    /// false if no frame loop was running.
    pub fn stop(&mut self) -> bool {
        if let Some(stalled) = self.stalled.take() {
            tracing::info!("waiting for a late XR bring-up to tear down");
            self.reclaim(stalled);
        }
        let Some(worker) = self.worker.take() else {
            return false;
        };
        let _span = tracing::info_span!("xr_stop").entered();
        // The loop may already have ended on its own and dropped the receiver.
        let _ = worker.shutdown.send(());
        self.reclaim(worker);
        tracing::info!("XR subsystem stopped");
        true
    }

    /// Join a compositor thread and take the runtime back from it.
    fn reclaim(&mut self, worker: Worker<R>) {
        match worker.handle.join() {
            Ok(Some(session)) => {
                debug_assert_eq!(session.leased_images(), 0);
                self.runtime = Some(session.into_runtime());
            }
            Ok(None) => tracing::error!("compositor thread never received its session"),
            Err(_) => tracing::error!("compositor thread panicked; runtime discarded"),
        }
    }

    /// Whether the compositor thread is still running its loop.
    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn state(&self) -> CompositorState {
        self.status.current_state()
    }

    pub fn status(&self) -> &StatusPublisher {
        &self.status
    }

    pub fn subscribe(&self) -> Receiver<StatusUpdate> {
        self.status.subscribe()
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.stats.lock()
    }

    /// The runtime, when no activation currently owns it.
    pub fn runtime(&self) -> Option<&R> {
        self.runtime.as_ref()
    }
}

impl<R: XrRuntime + 'static, C: GraphicsContext + 'static> Drop for XrSubsystem<R, C> {
    fn drop(&mut self) {
        self.stop();
    }
}
