use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::context::GraphicsContext;

/// Who holds (or wants) the graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseOwner {
    /// The head-mounted display frame loop.
    Compositor,
    /// The 2D game-world renderer.
    Renderer2d,
    /// Start/stop paths releasing GPU resources.
    Lifecycle,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("context contended: held by {holder:?} for {held_for:?}")]
    Contended {
        holder: Option<LeaseOwner>,
        held_for: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct ArbiterConfig {
    /// How long the 2D renderer may keep the compositor waiting before a
    /// contention warning is raised.
    pub grace: Duration,
    /// Consecutive contended acquisitions before escalating to a warning.
    pub escalate_after: u32,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_nanos(1_000_000_000 / 90),
            escalate_after: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub exclusive_grants: u64,
    pub shared_grants: u64,
    pub contended: u64,
    /// Times the 2D renderer was seen holding the context past grace while
    /// the compositor waited.
    pub grace_overruns: u64,
    pub consecutive_contention: u32,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    owner: LeaseOwner,
    since: Instant,
}

/// Mediates access to the single graphics context.
///
/// At most one exclusive lease exists at a time and only exclusive leases
/// can issue commands. Leases are never preempted: a compositor that cannot
/// get the context by its deadline gives up and drops the frame instead.
/// Dropping an exclusive lease resets the context to its neutral state.
pub struct SharedContextArbiter<C: GraphicsContext> {
    context: RwLock<C>,
    holder: Mutex<Option<Holder>>,
    compositor_waiting: AtomicBool,
    consecutive_contention: AtomicU32,
    exclusive_grants: AtomicU64,
    shared_grants: AtomicU64,
    contended: AtomicU64,
    grace_overruns: AtomicU64,
    config: ArbiterConfig,
}

impl<C: GraphicsContext> SharedContextArbiter<C> {
    pub fn new(context: C, config: ArbiterConfig) -> Self {
        Self {
            context: RwLock::new(context),
            holder: Mutex::new(None),
            compositor_waiting: AtomicBool::new(false),
            consecutive_contention: AtomicU32::new(0),
            exclusive_grants: AtomicU64::new(0),
            shared_grants: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            grace_overruns: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> ArbiterConfig {
        self.config
    }

    /// Block until the context is free.
    ///
    /// Non-compositor owners first give way, for at most one grace period,
    /// while the compositor is waiting.
    pub fn acquire_exclusive(&self, owner: LeaseOwner) -> ExclusiveLease<'_, C> {
        if owner != LeaseOwner::Compositor {
            let yield_until = Instant::now() + self.config.grace;
            while self.compositor_waiting.load(Ordering::Acquire) && Instant::now() < yield_until {
                std::thread::yield_now();
            }
        }
        let guard = self.context.write();
        self.grant(owner, guard)
    }

    /// Try to take the context, giving up at `deadline`.
    pub fn try_acquire_exclusive_until(
        &self,
        owner: LeaseOwner,
        deadline: Instant,
    ) -> Result<ExclusiveLease<'_, C>, LeaseError> {
        let is_compositor = owner == LeaseOwner::Compositor;
        if is_compositor {
            self.compositor_waiting.store(true, Ordering::Release);
        }

        let grace_end = (Instant::now() + self.config.grace).min(deadline);
        let mut guard = self.context.try_write_until(grace_end);
        if guard.is_none() {
            if is_compositor {
                self.check_grace_overrun();
            }
            guard = self.context.try_write_until(deadline);
        }

        if is_compositor {
            self.compositor_waiting.store(false, Ordering::Release);
        }

        match guard {
            Some(guard) => {
                self.consecutive_contention.store(0, Ordering::Relaxed);
                Ok(self.grant(owner, guard))
            }
            None => Err(self.contention(owner)),
        }
    }

    /// Read-only access; never issues commands.
    pub fn acquire_shared(&self, owner: LeaseOwner) -> SharedLease<'_, C> {
        let guard = self.context.read();
        self.shared_grants.fetch_add(1, Ordering::Relaxed);
        SharedLease { guard, owner }
    }

    /// Current exclusive holder and how long it has held the context.
    pub fn holder(&self) -> Option<(LeaseOwner, Duration)> {
        self.holder.lock().map(|h| (h.owner, h.since.elapsed()))
    }

    pub fn compositor_waiting(&self) -> bool {
        self.compositor_waiting.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ArbiterStats {
        ArbiterStats {
            exclusive_grants: self.exclusive_grants.load(Ordering::Relaxed),
            shared_grants: self.shared_grants.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            grace_overruns: self.grace_overruns.load(Ordering::Relaxed),
            consecutive_contention: self.consecutive_contention.load(Ordering::Relaxed),
        }
    }

    fn grant<'a>(&'a self, owner: LeaseOwner, guard: RwLockWriteGuard<'a, C>) -> ExclusiveLease<'a, C> {
        *self.holder.lock() = Some(Holder {
            owner,
            since: Instant::now(),
        });
        self.exclusive_grants.fetch_add(1, Ordering::Relaxed);
        ExclusiveLease {
            guard,
            arbiter: self,
            owner,
        }
    }

    fn check_grace_overrun(&self) {
        if let Some((LeaseOwner::Renderer2d, held_for)) = self.holder() {
            if held_for >= self.config.grace {
                self.grace_overruns.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    held_ms = held_for.as_secs_f64() * 1000.0,
                    grace_ms = self.config.grace.as_secs_f64() * 1000.0,
                    "2D renderer holding graphics context past grace while compositor waits"
                );
            }
        }
    }

    fn contention(&self, owner: LeaseOwner) -> LeaseError {
        self.contended.fetch_add(1, Ordering::Relaxed);
        let streak = self.consecutive_contention.fetch_add(1, Ordering::Relaxed) + 1;
        let (holder, held_for) = match self.holder() {
            Some((h, d)) => (Some(h), d),
            None => (None, Duration::ZERO),
        };
        if streak >= self.config.escalate_after {
            tracing::warn!(
                ?owner,
                ?holder,
                streak,
                "repeated graphics context contention; possible 2D renderer starvation"
            );
        } else {
            tracing::debug!(?owner, ?holder, streak, "graphics context contended");
        }
        LeaseError::Contended { holder, held_for }
    }
}

impl<C: GraphicsContext + std::fmt::Debug> std::fmt::Debug for SharedContextArbiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedContextArbiter")
            .field("holder", &self.holder())
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}

/// Scoped exclusive grant. Dereferences to the context.
pub struct ExclusiveLease<'a, C: GraphicsContext> {
    guard: RwLockWriteGuard<'a, C>,
    arbiter: &'a SharedContextArbiter<C>,
    owner: LeaseOwner,
}

impl<C: GraphicsContext> ExclusiveLease<'_, C> {
    pub fn owner(&self) -> LeaseOwner {
        self.owner
    }
}

impl<C: GraphicsContext> Deref for ExclusiveLease<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.guard
    }
}

impl<C: GraphicsContext> DerefMut for ExclusiveLease<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.guard
    }
}

impl<C: GraphicsContext> Drop for ExclusiveLease<'_, C> {
    fn drop(&mut self) {
        self.guard.reset_state();
        self.arbiter.holder.lock().take();
    }
}

/// Scoped read-only grant.
pub struct SharedLease<'a, C: GraphicsContext> {
    guard: RwLockReadGuard<'a, C>,
    owner: LeaseOwner,
}

impl<C: GraphicsContext> SharedLease<'_, C> {
    pub fn owner(&self) -> LeaseOwner {
        self.owner
    }
}

impl<C: GraphicsContext> Deref for SharedLease<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RenderTarget, ViewPass, Viewport};
    use crate::headless::HeadlessContext;
    use glam::Mat4;
    use std::sync::{Arc, Barrier};

    fn arbiter(grace_ms: u64) -> SharedContextArbiter<HeadlessContext> {
        SharedContextArbiter::new(
            HeadlessContext::new(),
            ArbiterConfig {
                grace: Duration::from_millis(grace_ms),
                escalate_after: 3,
            },
        )
    }

    #[test]
    fn release_restores_neutral_state() {
        let arb = arbiter(5);
        {
            let mut lease = arb.acquire_exclusive(LeaseOwner::Renderer2d);
            lease
                .begin_view(&ViewPass {
                    target: RenderTarget::Surface2d,
                    viewport: Viewport::full(8, 8),
                    view_proj: Mat4::IDENTITY,
                })
                .unwrap();
            assert!(!lease.state().is_neutral());
            assert_eq!(arb.holder().map(|h| h.0), Some(LeaseOwner::Renderer2d));
        }
        assert!(arb.holder().is_none());
        assert!(arb.acquire_shared(LeaseOwner::Compositor).state().is_neutral());
    }

    #[test]
    fn free_context_is_granted_immediately() {
        let arb = arbiter(5);
        let lease = arb
            .try_acquire_exclusive_until(LeaseOwner::Compositor, Instant::now())
            .unwrap();
        assert_eq!(lease.owner(), LeaseOwner::Compositor);
        drop(lease);
        assert_eq!(arb.stats().exclusive_grants, 1);
        assert!(!arb.compositor_waiting());
    }

    #[test]
    fn contention_past_deadline_fails_without_preempting() {
        let arb = Arc::new(arbiter(2));
        let held = Arc::new(Barrier::new(2));
        let done = Arc::new(Barrier::new(2));

        let holder = {
            let arb = Arc::clone(&arb);
            let held = Arc::clone(&held);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let _lease = arb.acquire_exclusive(LeaseOwner::Renderer2d);
                held.wait();
                done.wait();
            })
        };
        held.wait();
        std::thread::sleep(Duration::from_millis(5));

        for _ in 0..3 {
            let deadline = Instant::now() + Duration::from_millis(4);
            let err = arb
                .try_acquire_exclusive_until(LeaseOwner::Compositor, deadline)
                .err()
                .unwrap();
            let LeaseError::Contended { holder, .. } = err;
            assert_eq!(holder, Some(LeaseOwner::Renderer2d));
        }
        let stats = arb.stats();
        assert_eq!(stats.contended, 3);
        assert_eq!(stats.consecutive_contention, 3);
        assert_eq!(stats.grace_overruns, 3);

        done.wait();
        holder.join().unwrap();

        let lease = arb
            .try_acquire_exclusive_until(LeaseOwner::Compositor, Instant::now() + Duration::from_millis(50))
            .unwrap();
        drop(lease);
        assert_eq!(arb.stats().consecutive_contention, 0);
    }

    #[test]
    fn shared_leases_coexist() {
        let arb = arbiter(5);
        let a = arb.acquire_shared(LeaseOwner::Compositor);
        let b = arb.acquire_shared(LeaseOwner::Lifecycle);
        assert_eq!(a.resident_buffers(), b.resident_buffers());
        assert_eq!(arb.stats().shared_grants, 2);
    }
}
