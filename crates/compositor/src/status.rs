use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::session::CompositorState;

/// Updates a subscriber may leave unread before further ones are dropped
/// for it.
pub const STATUS_BACKLOG: usize = 64;

/// One status notice, as seen by status consumers.
///
/// Either a state transition, or a failure notice for an operation that
/// failed without leaving the current state. A failure notice has
/// `previous == state` and always carries a `reason`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub previous: CompositorState,
    pub state: CompositorState,
    /// Why the transition happened, when it was not the normal flow.
    pub reason: Option<String>,
    pub at: Instant,
}

impl StatusUpdate {
    pub fn failure(state: CompositorState, reason: impl Into<String>) -> Self {
        Self {
            previous: state,
            state,
            reason: Some(reason.into()),
            at: Instant::now(),
        }
    }

    pub fn is_transition(&self) -> bool {
        self.previous != self.state
    }

    pub fn is_failure(&self) -> bool {
        !self.is_transition() && self.reason.is_some()
    }

    pub fn display(&self) -> DisplayStatus {
        DisplayStatus::from_update(self)
    }
}

/// Coarse status for a UI indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStatus {
    Running,
    Stopped,
    Error,
}

impl DisplayStatus {
    pub fn from_update(update: &StatusUpdate) -> Self {
        if update.is_failure() {
            return Self::Error;
        }
        match update.state {
            CompositorState::LossPending => Self::Error,
            CompositorState::Uninitialized if update.reason.is_some() => Self::Error,
            s if s.is_active() => Self::Running,
            _ => Self::Stopped,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "VR Status: Running",
            Self::Stopped => "VR Status: Stopped",
            Self::Error => "VR Status: Error",
        }
    }
}

#[derive(Debug)]
struct Inner {
    subscribers: Mutex<Vec<Sender<StatusUpdate>>>,
    latest: Mutex<Option<StatusUpdate>>,
}

/// Fan-out of compositor status updates.
///
/// Publishing never blocks: every subscriber has its own channel holding up
/// to [`STATUS_BACKLOG`] updates. A subscriber that stops draining misses
/// updates until it catches up, and can resync from [`Self::latest`].
/// Subscribers that went away are pruned on the next publish.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    inner: Arc<Inner>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(Vec::new()),
                latest: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> Receiver<StatusUpdate> {
        let (tx, rx) = crossbeam_channel::bounded(STATUS_BACKLOG);
        self.inner.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, update: StatusUpdate) {
        *self.inner.latest.lock() = Some(update.clone());
        self.inner
            .subscribers
            .lock()
            .retain(|tx| match tx.try_send(update.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(state = %update.state, "status subscriber backlog full; update dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// The most recent update, if any was published.
    pub fn latest(&self) -> Option<StatusUpdate> {
        self.inner.latest.lock().clone()
    }

    pub fn current_state(&self) -> CompositorState {
        self.latest()
            .map(|u| u.state)
            .unwrap_or(CompositorState::Uninitialized)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(previous: CompositorState, state: CompositorState, reason: Option<&str>) -> StatusUpdate {
        StatusUpdate {
            previous,
            state,
            reason: reason.map(str::to_owned),
            at: Instant::now(),
        }
    }

    #[test]
    fn every_subscriber_receives_updates() {
        let publisher = StatusPublisher::new();
        let a = publisher.subscribe();
        let b = publisher.subscribe();
        publisher.publish(update(
            CompositorState::Uninitialized,
            CompositorState::InstanceReady,
            None,
        ));
        assert_eq!(a.try_recv().unwrap().state, CompositorState::InstanceReady);
        assert_eq!(b.try_recv().unwrap().state, CompositorState::InstanceReady);
        assert_eq!(publisher.current_state(), CompositorState::InstanceReady);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let publisher = StatusPublisher::new();
        let rx = publisher.subscribe();
        drop(rx);
        publisher.publish(update(
            CompositorState::Uninitialized,
            CompositorState::InstanceReady,
            None,
        ));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn stalled_subscriber_backlog_is_bounded() {
        use CompositorState::*;
        let publisher = StatusPublisher::new();
        let rx = publisher.subscribe();
        for _ in 0..STATUS_BACKLOG + 10 {
            publisher.publish(update(Uninitialized, InstanceReady, None));
        }
        publisher.publish(update(InstanceReady, SessionReady, None));

        assert_eq!(rx.len(), STATUS_BACKLOG);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.current_state(), SessionReady);

        let _ = rx.try_iter().count();
        publisher.publish(update(SessionReady, Synchronized, None));
        assert_eq!(rx.try_recv().unwrap().state, Synchronized);
    }

    #[test]
    fn failure_notice_is_not_a_transition() {
        use CompositorState::*;
        let notice = StatusUpdate::failure(Uninitialized, "runtime unavailable");
        assert!(!notice.is_transition());
        assert!(notice.is_failure());
        assert_eq!(notice.display(), DisplayStatus::Error);

        let notice = StatusUpdate::failure(Focused, "swapchain lost");
        assert_eq!(notice.display(), DisplayStatus::Error);
        assert!(update(SessionReady, Synchronized, None).is_transition());
    }

    #[test]
    fn display_status_mapping() {
        use CompositorState::*;
        assert_eq!(update(SessionReady, Focused, None).display(), DisplayStatus::Running);
        assert_eq!(update(Stopping, Exiting, None).display(), DisplayStatus::Stopped);
        assert_eq!(
            update(LossPending, Uninitialized, Some("session lost")).display(),
            DisplayStatus::Error
        );
        assert_eq!(DisplayStatus::Running.label(), "VR Status: Running");
    }
}
