//! Background worker driving the controller values poller.
//!
//! A [`BackgroundWorker`] owns one [`BackgroundRunnable`] on a spawned task
//! and feeds it two kinds of events: tasks submitted through a
//! [`WorkerHandle`], and interval ticks. [`ValuesPoller`] is the runnable
//! that turns controller snapshots into `Values` updates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use armgate_core::Value;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::updates::UpdatePublisher;
use crate::controller::Controller;

const TASK_QUEUE: usize = 64;

/// Work executed on a [`BackgroundWorker`]'s task. Never runs concurrently
/// with itself, so `&mut self` needs no locking.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    async fn on_tick(&mut self) {}
}

// ---------------------------------------------------------------------------
// ValuesPoller
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ValuesTask {
    /// Publish every channel, changed or not. Sent when a subscriber connects.
    Resync,
}

/// Snapshots the controller on every tick and publishes the channels that
/// changed since the previous tick.
pub struct ValuesPoller {
    controller: Arc<dyn Controller>,
    updates: UpdatePublisher,
    last: BTreeMap<String, Value>,
}

impl ValuesPoller {
    #[must_use]
    pub fn new(controller: Arc<dyn Controller>, updates: UpdatePublisher) -> Self {
        Self {
            controller,
            updates,
            last: BTreeMap::new(),
        }
    }

    fn changed(&mut self) -> BTreeMap<String, Value> {
        let current = self.controller.snapshot().to_values();
        let changed = current
            .iter()
            .filter(|(name, value)| self.last.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        self.last = current;
        changed
    }
}

#[async_trait]
impl BackgroundRunnable for ValuesPoller {
    type Task = ValuesTask;

    async fn run(&mut self, task: ValuesTask) {
        match task {
            ValuesTask::Resync => {
                self.last = self.controller.snapshot().to_values();
                debug!(channels = self.last.len(), "values resync");
                self.updates.values(self.last.clone());
            }
        }
    }

    async fn on_tick(&mut self) {
        let changed = self.changed();
        if !changed.is_empty() {
            debug!(channels = changed.len(), "controller values changed");
            self.updates.values(changed);
        }
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Owns the task running a [`BackgroundRunnable`].
///
/// Ticks that fall behind (a slow `run` or `on_tick`) are skipped rather
/// than replayed in a burst.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns `runnable`; the first tick fires one `tick_every` after start.
    pub fn start(mut runnable: R, tick_every: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(TASK_QUEUE);
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticks =
                tokio::time::interval_at(tokio::time::Instant::now() + tick_every, tick_every);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    task = rx.recv() => match task {
                        Some(task) => runnable.run(task).await,
                        None => break,
                    },
                    _ = ticks.tick() => runnable.on_tick().await,
                }
            }
        });

        Self {
            tx: Some(tx),
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Submission handle for other tasks. `None` once stopped.
    #[must_use]
    pub fn handle(&self) -> Option<WorkerHandle<R::Task>> {
        self.tx.clone().map(|tx| WorkerHandle { tx })
    }

    /// Stops the worker and waits for its task to exit. Outstanding
    /// [`WorkerHandle`]s start failing their submissions.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.tx = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Submission side of a running [`BackgroundWorker`].
#[derive(Debug)]
pub struct WorkerHandle<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for WorkerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> WorkerHandle<T> {
    /// Queues a task without waiting. `false` if the worker is gone or backed up.
    pub fn try_submit(&self, task: T) -> bool {
        self.tx.try_send(task).is_ok()
    }
}
