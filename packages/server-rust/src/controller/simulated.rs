//! In-memory controller used by tests and the demo binary.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Controller, ControllerError};

/// A controller whose foreground programs "run" for a fixed cycle time.
///
/// Issuing a command marks the foreground busy until the cycle elapses; the
/// task result then reads `ok <command> <args>`, or `error <message>` for
/// commands registered with [`fail_command`](Self::fail_command). Uses
/// `tokio::time::Instant`, so paused test clocks drive it.
#[derive(Debug)]
pub struct SimulatedController {
    cycle_time: Duration,
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    motors_on: bool,
    at_home: bool,
    safety_gate: bool,
    toolset: i64,
    run_args: String,
    running: Option<RunningProgram>,
    task_result: String,
    task_message: String,
    failures: HashMap<String, String>,
    issued: Vec<String>,
}

#[derive(Debug)]
struct RunningProgram {
    name: String,
    args: String,
    done_at: Instant,
}

impl SimState {
    /// Completes the running program if its cycle has elapsed.
    fn settle(&mut self) {
        let finished = self
            .running
            .as_ref()
            .is_some_and(|program| Instant::now() >= program.done_at);
        if !finished {
            return;
        }
        if let Some(program) = self.running.take() {
            self.task_result = match self.failures.get(&program.name) {
                Some(message) => format!("error {message}"),
                None => format!("ok {} {}", program.name, program.args)
                    .trim_end()
                    .to_string(),
            };
            self.task_message = format!("{} finished", program.name);
            if program.name.eq_ignore_ascii_case("gohome") {
                self.at_home = true;
            }
        }
    }
}

impl SimulatedController {
    /// Creates an idle controller with motors off and a 200 ms cycle time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cycle_time: Duration::from_millis(200),
            state: Mutex::new(SimState {
                motors_on: false,
                at_home: true,
                safety_gate: false,
                toolset: 0,
                run_args: String::new(),
                running: None,
                task_result: String::new(),
                task_message: String::new(),
                failures: HashMap::new(),
                issued: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn with_cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    /// Makes every future run of `command` finish with `error <message>`.
    pub fn fail_command(&self, command: &str, message: &str) {
        self.state
            .lock()
            .failures
            .insert(command.to_string(), message.to_string());
    }

    /// Commands issued so far, formatted as `<command> <args>`.
    #[must_use]
    pub fn commands_issued(&self) -> Vec<String> {
        self.state.lock().issued.clone()
    }

    pub fn set_safety_gate(&self, on: bool) {
        self.state.lock().safety_gate = on;
    }
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for SimulatedController {
    fn model(&self) -> String {
        "simulated".to_string()
    }

    fn motors_on(&self) -> bool {
        self.state.lock().motors_on
    }

    fn at_home(&self) -> bool {
        let mut state = self.state.lock();
        state.settle();
        state.at_home
    }

    fn foreground_done(&self) -> bool {
        let mut state = self.state.lock();
        state.settle();
        state.running.is_none()
    }

    fn foreground_error(&self) -> bool {
        let mut state = self.state.lock();
        state.settle();
        state.task_result.starts_with("error")
    }

    fn foreground_error_message(&self) -> String {
        let mut state = self.state.lock();
        state.settle();
        state
            .task_result
            .strip_prefix("error ")
            .unwrap_or_default()
            .to_string()
    }

    fn safety_gate(&self) -> bool {
        self.state.lock().safety_gate
    }

    fn toolset(&self) -> i64 {
        self.state.lock().toolset
    }

    fn closest_point(&self) -> i64 {
        i64::from(!self.at_home())
    }

    fn task_message(&self) -> String {
        let mut state = self.state.lock();
        state.settle();
        state.task_message.clone()
    }

    fn task_progress(&self) -> String {
        let mut state = self.state.lock();
        state.settle();
        match &state.running {
            Some(program) => format!("running {}", program.name),
            None => "idle".to_string(),
        }
    }

    fn task_result(&self) -> String {
        let mut state = self.state.lock();
        state.settle();
        state.task_result.clone()
    }

    fn system_error_message(&self) -> String {
        String::new()
    }

    fn set_run_args(&self, args: &str) -> Result<(), ControllerError> {
        self.state.lock().run_args = args.to_string();
        Ok(())
    }

    fn set_generic_command(&self, name: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        state.settle();
        if state.running.is_some() {
            return Err(ControllerError::Channel {
                channel: "generic_command",
                message: "foreground program already running".to_string(),
            });
        }
        let args = std::mem::take(&mut state.run_args);
        state
            .issued
            .push(format!("{name} {args}").trim_end().to_string());
        state.at_home = false;
        state.task_message = format!("{name} started");
        state.running = Some(RunningProgram {
            name: name.to_string(),
            args,
            done_at: Instant::now() + self.cycle_time,
        });
        Ok(())
    }

    fn set_motors_on(&self, on: bool) -> Result<(), ControllerError> {
        self.state.lock().motors_on = on;
        Ok(())
    }

    fn set_toolset(&self, toolset: i64) -> Result<(), ControllerError> {
        self.state.lock().toolset = toolset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn command_runs_for_cycle_time() {
        let controller = SimulatedController::new().with_cycle_time(Duration::from_millis(100));
        controller.set_run_args("l A 1").unwrap();
        controller.set_generic_command("MountSamplePort").unwrap();

        assert!(!controller.foreground_done());
        assert_eq!(controller.task_progress(), "running MountSamplePort");

        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(controller.foreground_done());
        assert_eq!(controller.task_result(), "ok MountSamplePort l A 1");
        assert!(!controller.foreground_error());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_command_reports_error_channels() {
        let controller = SimulatedController::new().with_cycle_time(Duration::from_millis(10));
        controller.fail_command("Calibrate", "no toolset");
        controller.set_generic_command("Calibrate").unwrap();

        tokio::time::advance(Duration::from_millis(10)).await;

        assert!(controller.foreground_error());
        assert_eq!(controller.foreground_error_message(), "no toolset");
        assert_eq!(controller.task_result(), "error no toolset");
    }

    #[tokio::test(start_paused = true)]
    async fn second_command_while_running_is_rejected() {
        let controller = SimulatedController::new();
        controller.set_generic_command("First").unwrap();
        let err = controller.set_generic_command("Second").unwrap_err();
        assert!(matches!(err, ControllerError::Channel { channel: "generic_command", .. }));
        assert_eq!(controller.commands_issued(), vec!["First".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn go_home_restores_at_home() {
        let controller = SimulatedController::new().with_cycle_time(Duration::from_millis(10));
        controller.set_generic_command("GoHome").unwrap();
        assert!(!controller.at_home());
        assert_eq!(controller.closest_point(), 1);

        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(controller.at_home());
        assert_eq!(controller.closest_point(), 0);
    }

    #[test]
    fn writable_channels_round_trip() {
        let controller = SimulatedController::new();
        assert!(!controller.motors_on());
        controller.set_motors_on(true).unwrap();
        controller.set_toolset(2).unwrap();
        controller.set_safety_gate(true);
        assert!(controller.motors_on());
        assert_eq!(controller.toolset(), 2);
        assert!(controller.safety_gate());
    }
}
