//! Server lifecycle state and in-flight operation tracking.
//!
//! Health state lives in an `ArcSwap` so probes never contend with request
//! tasks. Every `/operations` request holds an [`InFlightGuard`] until its
//! reply is produced; shutdown waits for the last guard to drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Server health state.
///
/// Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Listener bound, registry not yet sealed.
    Starting,
    /// Accepting operations.
    Ready,
    /// Refusing new operations with `SERVER_SHUTTING_DOWN`; in-flight ones finish.
    Draining,
    /// All in-flight operations completed.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }

    /// Whether new operations may be admitted.
    #[must_use]
    pub fn is_accepting(self) -> bool {
        matches!(self, Self::Ready)
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

/// Lifecycle state shared by the probes, the operations handler and the
/// network module. `trigger_shutdown()` stops admission; `wait_for_drain()`
/// waits out whatever was admitted before.
#[derive(Debug)]
pub struct ShutdownController {
    in_flight: Arc<InFlight>,
    health_state: ArcSwap<HealthState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(InFlight::default()),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    /// Moves to `Draining`. A no-op once draining or stopped.
    pub fn trigger_shutdown(&self) {
        if !self.is_shutting_down() {
            self.health_state.store(Arc::new(HealthState::Draining));
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.health_state(),
            HealthState::Draining | HealthState::Stopped
        )
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Counts one admitted request until the guard drops, panics included.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for the in-flight count to reach zero.
    ///
    /// On success the state becomes `Stopped` and `true` is returned. On
    /// timeout the state stays as it was.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            // Register before checking so a guard dropped in between still wakes us.
            idle.as_mut().enable();

            if self.in_flight_count() == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return false;
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the lifetime of one admitted `/operations` request.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_gates_admission() {
        let ctrl = ShutdownController::new();
        assert_eq!(ctrl.health_state(), HealthState::Starting);
        assert!(!ctrl.health_state().is_accepting());

        ctrl.set_ready();
        assert!(ctrl.health_state().is_accepting());
        assert!(!ctrl.is_shutting_down());

        ctrl.trigger_shutdown();
        assert_eq!(ctrl.health_state().as_str(), "draining");
        assert!(!ctrl.health_state().is_accepting());
        assert!(ctrl.is_shutting_down());
    }

    #[tokio::test]
    async fn stopped_is_not_reopened_by_a_second_trigger() {
        let ctrl = ShutdownController::new();
        ctrl.set_ready();
        ctrl.trigger_shutdown();
        assert!(ctrl.wait_for_drain(Duration::from_millis(10)).await);

        ctrl.trigger_shutdown();
        assert_eq!(ctrl.health_state(), HealthState::Stopped);
    }

    #[test]
    fn guards_count_admitted_requests() {
        let ctrl = ShutdownController::new();
        let a = ctrl.in_flight_guard();
        let b = ctrl.in_flight_guard();
        assert_eq!(ctrl.in_flight_count(), 2);

        drop(a);
        assert_eq!(ctrl.in_flight_count(), 1);
        drop(b);
        assert_eq!(ctrl.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_wakes_when_last_guard_drops() {
        let ctrl = Arc::new(ShutdownController::new());
        ctrl.set_ready();
        let first = ctrl.in_flight_guard();
        let second = ctrl.in_flight_guard();
        ctrl.trigger_shutdown();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(second);
        });

        assert!(ctrl.wait_for_drain(Duration::from_secs(5)).await);
        assert_eq!(ctrl.health_state(), HealthState::Stopped);
        releaser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_at_deadline() {
        let ctrl = ShutdownController::new();
        ctrl.set_ready();
        let _held = ctrl.in_flight_guard();
        ctrl.trigger_shutdown();

        assert!(!ctrl.wait_for_drain(Duration::from_millis(50)).await);
        assert_eq!(ctrl.health_state(), HealthState::Draining);
    }
}
