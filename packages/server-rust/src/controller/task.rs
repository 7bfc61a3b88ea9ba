//! Driving a controller-side foreground program to completion.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::{Controller, ControllerError};

/// Timing knobs for [`run_foreground_task`].
#[derive(Debug, Clone)]
pub struct ForegroundTiming {
    /// Settling delay after a channel write before the controller sees it.
    pub process_delay: Duration,
    /// How long the controller has to report the program as running.
    pub start_timeout: Duration,
    /// Interval between `foreground_done` polls.
    pub poll_interval: Duration,
}

impl Default for ForegroundTiming {
    fn default() -> Self {
        Self {
            process_delay: Duration::from_millis(300),
            start_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Runs the named foreground program on the controller and waits for its result.
///
/// Sequence: refuse if a program is already running, stage `args`, issue the
/// command, wait for the controller to report busy, wait for it to report done,
/// then parse `task_result`.
///
/// There is no deadline on the completion wait; the dispatcher's operation
/// timeout bounds it.
///
/// # Errors
///
/// - `ControllerError::Busy` if `foreground_done` is false on entry
/// - `ControllerError::FailedToStart` if the program does not start within `start_timeout`
/// - `ControllerError::TaskFailed` if the program reports a non-`ok` result
/// - `ControllerError::Channel` if a channel write is rejected
pub async fn run_foreground_task(
    controller: &dyn Controller,
    name: &str,
    args: &str,
    timing: &ForegroundTiming,
) -> Result<String, ControllerError> {
    if !controller.foreground_done() {
        return Err(ControllerError::Busy);
    }
    controller.set_run_args(args)?;
    tokio::time::sleep(timing.process_delay).await;
    controller.set_generic_command(name)?;
    debug!(program = name, args, "foreground program issued");

    wait_for_busy(controller, timing).await?;
    while !controller.foreground_done() {
        tokio::time::sleep(timing.poll_interval).await;
    }
    tokio::time::sleep(timing.process_delay).await;

    parse_task_result(&controller.task_result())
}

async fn wait_for_busy(
    controller: &dyn Controller,
    timing: &ForegroundTiming,
) -> Result<(), ControllerError> {
    let deadline = Instant::now() + timing.start_timeout;
    while Instant::now() < deadline {
        if !controller.foreground_done() {
            return Ok(());
        }
        tokio::time::sleep(timing.poll_interval).await;
    }
    Err(ControllerError::FailedToStart)
}

/// Splits a controller result string into success message or failure.
///
/// `"ok done"` → `Ok("done")`, `"ok"` → `Ok("")`,
/// `"error Motors must be on"` → `Err(TaskFailed("Motors must be on"))`.
///
/// # Errors
///
/// Returns `ControllerError::TaskFailed` when the status word is not `ok`.
pub fn parse_task_result(raw: &str) -> Result<String, ControllerError> {
    let raw = raw.trim();
    let (status, rest) = raw.split_once(' ').unwrap_or((raw, ""));
    if status == "ok" {
        Ok(rest.trim().to_string())
    } else if rest.is_empty() {
        Err(ControllerError::TaskFailed(raw.to_string()))
    } else {
        Err(ControllerError::TaskFailed(rest.trim().to_string()))
    }
}
