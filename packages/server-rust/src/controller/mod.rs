//! Typed interface to the robot controller.
//!
//! The dispatch core treats the controller as an opaque capability handed to
//! handlers. Every readable and writable hardware channel is a typed method
//! here; nothing is looked up by name at runtime.

mod simulated;
mod task;

use std::collections::BTreeMap;

use armgate_core::Value;
use serde::{Deserialize, Serialize};

pub use simulated::SimulatedController;
pub use task::{parse_task_result, run_foreground_task, ForegroundTiming};

// ---------------------------------------------------------------------------
// ControllerError
// ---------------------------------------------------------------------------

/// Failures reported by the controller or by a foreground program it runs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// A foreground program is already running on the controller.
    #[error("busy")]
    Busy,
    /// The controller never acknowledged the command.
    #[error("operation failed to start")]
    FailedToStart,
    /// The foreground program finished with a non-`ok` result.
    #[error("{0}")]
    TaskFailed(String),
    /// A channel write was refused.
    #[error("write to {channel} failed: {message}")]
    Channel {
        channel: &'static str,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Controller trait
// ---------------------------------------------------------------------------

/// Readable and writable channels of the robot controller.
///
/// Reads are cheap and side-effect free, so background handlers may call them
/// at any time. Writes that drive motion are foreground-only by convention.
pub trait Controller: Send + Sync + 'static {
    fn model(&self) -> String;
    fn motors_on(&self) -> bool;
    fn at_home(&self) -> bool;
    /// `true` when no foreground program is running on the controller.
    fn foreground_done(&self) -> bool;
    fn foreground_error(&self) -> bool;
    fn foreground_error_message(&self) -> String;
    fn safety_gate(&self) -> bool;
    fn toolset(&self) -> i64;
    fn closest_point(&self) -> i64;
    fn task_message(&self) -> String;
    fn task_progress(&self) -> String;
    /// Raw result string of the last foreground program, e.g. `"ok done"`.
    fn task_result(&self) -> String;
    fn system_error_message(&self) -> String;

    /// Stages the argument string for the next foreground program.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Channel` if the controller rejects the write.
    fn set_run_args(&self, args: &str) -> Result<(), ControllerError>;

    /// Starts the named foreground program with the staged arguments.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError::Channel` if the controller rejects the write.
    fn set_generic_command(&self, name: &str) -> Result<(), ControllerError>;

    /// # Errors
    ///
    /// Returns `ControllerError::Channel` if the controller rejects the write.
    fn set_motors_on(&self, on: bool) -> Result<(), ControllerError>;

    /// # Errors
    ///
    /// Returns `ControllerError::Channel` if the controller rejects the write.
    fn set_toolset(&self, toolset: i64) -> Result<(), ControllerError>;

    /// Reads every readable channel at once.
    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            model: self.model(),
            motors_on: self.motors_on(),
            at_home: self.at_home(),
            foreground_done: self.foreground_done(),
            foreground_error: self.foreground_error(),
            foreground_error_message: self.foreground_error_message(),
            safety_gate: self.safety_gate(),
            toolset: self.toolset(),
            closest_point: self.closest_point(),
            task_message: self.task_message(),
            task_progress: self.task_progress(),
            task_result: self.task_result(),
            system_error_message: self.system_error_message(),
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of all readable controller channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub model: String,
    pub motors_on: bool,
    pub at_home: bool,
    pub foreground_done: bool,
    pub foreground_error: bool,
    pub foreground_error_message: String,
    pub safety_gate: bool,
    pub toolset: i64,
    pub closest_point: i64,
    pub task_message: String,
    pub task_progress: String,
    pub task_result: String,
    pub system_error_message: String,
}

impl ControllerSnapshot {
    /// Flattens the snapshot into channel-name → value pairs, the shape used by
    /// `Values` updates and the `refresh` operation.
    #[must_use]
    pub fn to_values(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let mut put = |name: &str, value: Value| {
            values.insert(name.to_string(), value);
        };
        put("model", Value::from(self.model.as_str()));
        put("motors_on", Value::from(self.motors_on));
        put("at_home", Value::from(self.at_home));
        put("foreground_done", Value::from(self.foreground_done));
        put("foreground_error", Value::from(self.foreground_error));
        put(
            "foreground_error_message",
            Value::from(self.foreground_error_message.as_str()),
        );
        put("safety_gate", Value::from(self.safety_gate));
        put("toolset", Value::from(self.toolset));
        put("closest_point", Value::from(self.closest_point));
        put("task_message", Value::from(self.task_message.as_str()));
        put("task_progress", Value::from(self.task_progress.as_str()));
        put("task_result", Value::from(self.task_result.as_str()));
        put(
            "system_error_message",
            Value::from(self.system_error_message.as_str()),
        );
        values
    }

    /// Same as [`to_values`](Self::to_values) but as a single `MsgPack` map value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.to_values()
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        )
    }
}
