//! FIFO mutual exclusion for foreground operations.
//!
//! The gate is a binary mutex with an explicit wait queue: `Idle` until a
//! foreground request acquires it, `Held(owner)` while that request's handler
//! runs. Waiters are granted strictly in arrival order. Release is tied to
//! [`GateGuard`] drop, so handler errors, panics and timeouts all hand the gate on.
//!
//! The gate is not re-entrant. A foreground handler that dispatches another
//! foreground operation and awaits it deadlocks.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use armgate_core::RequestId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

/// Identity of a gate holder or waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOwner {
    pub request_id: RequestId,
    pub client_id: Option<String>,
    pub operation: Arc<str>,
}

impl fmt::Display for GateOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (request {})", self.operation, self.request_id)
    }
}

/// Observable gate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Idle,
    Held(GateOwner),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("gate closed: server shutting down")]
    ShuttingDown,
    #[error("gate held by {holder}")]
    Busy { holder: GateOwner },
    #[error("gate queue full: {limit} requests already waiting")]
    QueueFull { limit: usize },
}

#[derive(Debug)]
struct Holder {
    ticket: u64,
    owner: GateOwner,
}

#[derive(Debug)]
struct Waiter {
    ticket: u64,
    owner: GateOwner,
    wake: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct GateState {
    holder: Option<Holder>,
    waiters: VecDeque<Waiter>,
    queue_limit: Option<usize>,
    next_ticket: u64,
    closed: bool,
}

impl GateState {
    fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    /// Hands the gate to the oldest live waiter, or leaves it idle.
    fn grant_next(&mut self) {
        self.holder = None;
        while let Some(waiter) = self.waiters.pop_front() {
            self.holder = Some(Holder {
                ticket: waiter.ticket,
                owner: waiter.owner,
            });
            if waiter.wake.send(()).is_ok() {
                return;
            }
            // Receiver gone: the waiter was cancelled between grant and wake.
            self.holder = None;
        }
    }

    fn busy_error(&self) -> GateError {
        let holder = self
            .holder
            .as_ref()
            .map(|h| h.owner.clone())
            .or_else(|| self.waiters.front().map(|w| w.owner.clone()));
        match holder {
            Some(holder) => GateError::Busy { holder },
            None => GateError::ShuttingDown,
        }
    }
}

/// FIFO exclusion gate shared by every foreground dispatch. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ExclusionGate {
    inner: Arc<Mutex<GateState>>,
}

impl ExclusionGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that refuses to queue more than `limit` waiters behind the holder.
    #[must_use]
    pub fn with_queue_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GateState {
                queue_limit: Some(limit),
                ..GateState::default()
            })),
        }
    }

    /// Waits for the gate, in FIFO order behind any existing waiters.
    ///
    /// Dropping the returned future before it resolves removes the request
    /// from the queue. If it was already granted, the gate moves to the next waiter.
    ///
    /// # Errors
    ///
    /// - `GateError::ShuttingDown` if the gate is closed before or while waiting
    /// - `GateError::QueueFull` if the wait queue is at its limit
    pub async fn acquire(&self, owner: GateOwner) -> Result<GateGuard, GateError> {
        let (ticket, wake) = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(GateError::ShuttingDown);
            }
            let ticket = state.issue_ticket();
            if state.holder.is_none() && state.waiters.is_empty() {
                trace!(%owner, "gate granted immediately");
                state.holder = Some(Holder { ticket, owner });
                return Ok(self.guard(ticket));
            }
            if let Some(limit) = state.queue_limit {
                if state.waiters.len() >= limit {
                    return Err(GateError::QueueFull { limit });
                }
            }
            let (tx, rx) = oneshot::channel();
            trace!(%owner, queued_behind = state.waiters.len() + 1, "gate busy, queueing");
            state.waiters.push_back(Waiter {
                ticket,
                owner,
                wake: tx,
            });
            (ticket, rx)
        };

        let mut pending = PendingAcquire {
            gate: self,
            ticket,
            settled: false,
        };
        let outcome = wake.await;
        pending.settled = true;
        match outcome {
            Ok(()) => Ok(self.guard(ticket)),
            Err(_) => Err(GateError::ShuttingDown),
        }
    }

    /// Takes the gate only if it is idle with nobody queued.
    ///
    /// # Errors
    ///
    /// `GateError::Busy` naming the current holder, or `GateError::ShuttingDown`
    /// if the gate is closed.
    pub fn try_acquire(&self, owner: GateOwner) -> Result<GateGuard, GateError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(GateError::ShuttingDown);
        }
        if state.holder.is_some() || !state.waiters.is_empty() {
            return Err(state.busy_error());
        }
        let ticket = state.issue_ticket();
        state.holder = Some(Holder { ticket, owner });
        Ok(self.guard(ticket))
    }

    /// Refuses future acquires and fails every queued waiter.
    ///
    /// The current holder keeps the gate until its guard drops. Returns how
    /// many waiters were failed.
    pub fn close(&self) -> usize {
        let mut state = self.inner.lock();
        state.closed = true;
        // Dropping the wake senders resolves each waiter with ShuttingDown.
        let failed = state.waiters.len();
        state.waiters.clear();
        failed
    }

    #[must_use]
    pub fn status(&self) -> GateStatus {
        match &self.inner.lock().holder {
            Some(holder) => GateStatus::Held(holder.owner.clone()),
            None => GateStatus::Idle,
        }
    }

    /// Number of requests queued behind the holder.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.lock().holder.is_none()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn guard(&self, ticket: u64) -> GateGuard {
        GateGuard {
            gate: self.clone(),
            ticket,
        }
    }

    fn release(&self, ticket: u64) {
        let mut state = self.inner.lock();
        if state.holder.as_ref().is_some_and(|h| h.ticket == ticket) {
            state.grant_next();
        }
    }

    fn abandon(&self, ticket: u64) {
        let mut state = self.inner.lock();
        if state.holder.as_ref().is_some_and(|h| h.ticket == ticket) {
            state.grant_next();
        } else {
            state.waiters.retain(|w| w.ticket != ticket);
        }
    }
}

/// Proof of holding the gate. Dropping it releases the gate.
#[derive(Debug)]
pub struct GateGuard {
    gate: ExclusionGate,
    ticket: u64,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.gate.release(self.ticket);
    }
}

/// Cleans up a queued acquire whose future was dropped before resolving.
struct PendingAcquire<'a> {
    gate: &'a ExclusionGate,
    ticket: u64,
    settled: bool,
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.gate.abandon(self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn owner(id: u64) -> GateOwner {
        GateOwner {
            request_id: RequestId(id),
            client_id: None,
            operation: Arc::from("op"),
        }
    }

    async fn wait_until_queued(gate: &ExclusionGate, count: usize) {
        while gate.waiting() != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn idle_acquire_and_release() {
        let gate = ExclusionGate::new();
        assert_eq!(gate.status(), GateStatus::Idle);

        let guard = gate.acquire(owner(1)).await.unwrap();
        assert_eq!(gate.status(), GateStatus::Held(owner(1)));

        drop(guard);
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn waiters_are_granted_in_arrival_order() {
        let gate = ExclusionGate::new();
        let first = gate.acquire(owner(1)).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for id in 2..=4 {
            let queued = gate.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _guard = queued.acquire(owner(id)).await.unwrap();
                order.lock().push(id);
            }));
            wait_until_queued(&gate, tasks.len()).await;
        }

        drop(first);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![2, 3, 4]);
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn try_acquire_reports_holder() {
        let gate = ExclusionGate::new();
        let _held = gate.try_acquire(owner(1)).unwrap();

        let err = gate.try_acquire(owner(2)).unwrap_err();
        assert_eq!(err, GateError::Busy { holder: owner(1) });
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_queue() {
        let gate = ExclusionGate::new();
        let held = gate.acquire(owner(1)).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(owner(2)).await.map(drop) })
        };
        wait_until_queued(&gate, 1).await;

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(gate.waiting(), 0);

        drop(held);
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn timeout_while_queued_does_not_wedge_the_gate() {
        let gate = ExclusionGate::new();
        let held = gate.acquire(owner(1)).await.unwrap();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), gate.acquire(owner(2))).await;
        assert!(timed_out.is_err());
        assert_eq!(gate.waiting(), 0);

        drop(held);
        let _again = gate.try_acquire(owner(3)).unwrap();
    }

    #[tokio::test]
    async fn granted_but_cancelled_waiter_hands_gate_on() {
        let gate = ExclusionGate::new();
        let held = gate.acquire(owner(1)).await.unwrap();

        let mut second = Box::pin(gate.acquire(owner(2)));
        // Poll once so the request is queued.
        let first_poll =
            std::future::poll_fn(|cx| std::task::Poll::Ready(second.as_mut().poll(cx))).await;
        assert!(first_poll.is_pending());
        let third = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(owner(3)).await.map(drop) })
        };
        wait_until_queued(&gate, 2).await;

        // Grant passes to request 2, whose future is then dropped unpolled.
        drop(held);
        assert_eq!(gate.status(), GateStatus::Held(owner(2)));
        drop(second);

        third.await.unwrap().unwrap();
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn close_fails_waiters_and_future_acquires() {
        let gate = ExclusionGate::new();
        let held = gate.acquire(owner(1)).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(owner(2)).await.map(drop) })
        };
        wait_until_queued(&gate, 1).await;

        assert_eq!(gate.close(), 1);
        assert_eq!(waiter.await.unwrap(), Err(GateError::ShuttingDown));
        assert_eq!(
            gate.acquire(owner(3)).await.unwrap_err(),
            GateError::ShuttingDown
        );

        // The holder keeps running and releases normally.
        assert_eq!(gate.status(), GateStatus::Held(owner(1)));
        drop(held);
        assert!(gate.is_idle());
    }

    #[tokio::test]
    async fn queue_limit_refuses_extra_waiters() {
        let gate = ExclusionGate::with_queue_limit(1);
        let held = gate.acquire(owner(1)).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(owner(2)).await.map(drop) })
        };
        wait_until_queued(&gate, 1).await;

        assert_eq!(
            gate.acquire(owner(3)).await.unwrap_err(),
            GateError::QueueFull { limit: 1 }
        );
        assert_eq!(gate.waiting(), 1);

        drop(held);
        waiter.await.unwrap().unwrap();
        let _free = gate.acquire(owner(4)).await.unwrap();
    }

    proptest! {
        #[test]
        fn grants_follow_arrival_order_minus_cancellations(
            cancel in proptest::collection::vec(any::<bool>(), 1..12)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let (granted, expected) = rt.block_on(async {
                let gate = ExclusionGate::new();
                let held = gate.acquire(owner(0)).await.unwrap();
                let granted = Arc::new(Mutex::new(Vec::new()));
                let active = Arc::new(AtomicUsize::new(0));

                let mut tasks = Vec::new();
                for (i, _) in cancel.iter().enumerate() {
                    let id = i as u64 + 1;
                    let gate_c = gate.clone();
                    let granted_c = Arc::clone(&granted);
                    let active_c = Arc::clone(&active);
                    tasks.push(tokio::spawn(async move {
                        let _guard = gate_c.acquire(owner(id)).await.unwrap();
                        let now = active_c.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(now, 0, "two holders at once");
                        tokio::task::yield_now().await;
                        granted_c.lock().push(id);
                        active_c.fetch_sub(1, Ordering::SeqCst);
                    }));
                    wait_until_queued(&gate, i + 1).await;
                }

                let mut expected = Vec::new();
                let mut kept = Vec::new();
                let mut remaining = cancel.len();
                for (i, task) in tasks.into_iter().enumerate() {
                    if cancel[i] {
                        task.abort();
                        let _ = task.await;
                        remaining -= 1;
                        wait_until_queued(&gate, remaining).await;
                    } else {
                        expected.push(i as u64 + 1);
                        kept.push(task);
                    }
                }

                drop(held);
                for task in kept {
                    task.await.unwrap();
                }
                assert!(gate.is_idle());
                let granted = granted.lock().clone();
                (granted, expected)
            });

            prop_assert_eq!(granted, expected);
        }
    }
}
