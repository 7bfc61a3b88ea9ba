//! armgate-server - serves the demo robot operations over a simulated controller.
//!
//! Configuration comes from flags with `ARMGATE_*` environment fallbacks.
//! Logging honours `RUST_LOG` (default `info`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use armgate_core::{Arguments, Classification, Value};
use armgate_server::{
    run_foreground_task, BusyPolicy, Controller, DomainError, ForegroundTiming, HandlerContext,
    HandlerResult, NetworkConfig, ServerConfig, ServerContext, SimulatedController,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// armgate server - exclusive foreground operations for a robot controller
#[derive(Parser, Debug)]
#[command(name = "armgate-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "ARMGATE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, env = "ARMGATE_PORT", default_value_t = 8876)]
    port: u16,

    /// Name reported by /health
    #[arg(long, env = "ARMGATE_NODE_NAME", default_value = "armgate")]
    node_name: String,

    /// Default per-operation timeout in milliseconds
    #[arg(long, env = "ARMGATE_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    /// Upper bound on client-requested operation timeouts, in milliseconds
    #[arg(long, env = "ARMGATE_MAX_OPERATION_TIMEOUT_MS", default_value_t = 600_000)]
    max_operation_timeout_ms: u64,

    /// In-flight background operation limit before requests are shed
    #[arg(long, env = "ARMGATE_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent: u32,

    /// Foreground requests allowed to wait on the gate before more are shed
    #[arg(long, env = "ARMGATE_MAX_QUEUED_FOREGROUND", default_value_t = 64)]
    max_queued_foreground: usize,

    /// Controller poll interval for value updates, in milliseconds
    #[arg(long, env = "ARMGATE_POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// What a foreground request does when another one holds the gate (queue, reject)
    #[arg(long, env = "ARMGATE_BUSY_POLICY", default_value = "queue")]
    busy_policy: BusyPolicy,

    /// Simulated controller cycle time per foreground program, in milliseconds
    #[arg(long, env = "ARMGATE_SIM_CYCLE_MS", default_value_t = 1_000)]
    sim_cycle_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "ARMGATE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            node_name: self.node_name.clone(),
            default_operation_timeout_ms: self.operation_timeout_ms,
            max_operation_timeout_ms: self.max_operation_timeout_ms,
            max_concurrent_operations: self.max_concurrent,
            max_queued_foreground: self.max_queued_foreground,
            values_poll_interval_ms: self.poll_interval_ms,
            busy_policy: self.busy_policy,
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let controller = Arc::new(
        SimulatedController::new().with_cycle_time(Duration::from_millis(args.sim_cycle_ms)),
    );
    let mut server = ServerContext::new(args.server_config(), args.network_config(), controller)
        .context("failed to create server")?;

    server.register("mount_sample", Classification::Foreground, mount_sample)?;
    server.register("calibrate", Classification::Foreground, calibrate)?;
    server.register("set_motors", Classification::Background, set_motors)?;
    server.register("set_toolset", Classification::Background, set_toolset)?;

    let addr = server.start().await?;
    info!(address = %addr, "armgate-server ready");

    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

/// `mount_sample(port)`: mounts the sample at `port`, e.g. `"left A 1"`.
async fn mount_sample(ctx: HandlerContext, args: Arguments) -> HandlerResult {
    let port = args
        .str_at(0)
        .ok_or_else(|| DomainError::new("mount_sample requires a port argument"))?;
    require_motors(ctx.controller())?;

    ctx.progress(format!("mounting {port}"));
    let message = run_foreground_task(
        ctx.controller(),
        "MountSamplePort",
        port,
        &ForegroundTiming::default(),
    )
    .await?;
    Ok(Value::from(message))
}

/// `calibrate(target="middle")`: runs the controller calibration program.
async fn calibrate(ctx: HandlerContext, args: Arguments) -> HandlerResult {
    let target = args
        .keyword("target")
        .and_then(Value::as_str)
        .unwrap_or("middle")
        .to_string();
    require_motors(ctx.controller())?;

    ctx.progress(format!("calibrating {target}"));
    let message = run_foreground_task(
        ctx.controller(),
        "Calibrate",
        &target,
        &ForegroundTiming::default(),
    )
    .await?;
    Ok(Value::from(message))
}

async fn set_motors(ctx: HandlerContext, args: Arguments) -> HandlerResult {
    let on = args
        .get(0)
        .and_then(Value::as_bool)
        .ok_or_else(|| DomainError::new("set_motors requires a boolean argument"))?;
    ctx.controller().set_motors_on(on)?;
    Ok(Value::from(on))
}

async fn set_toolset(ctx: HandlerContext, args: Arguments) -> HandlerResult {
    let toolset = args
        .get(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| DomainError::new("set_toolset requires an integer argument"))?;
    ctx.controller().set_toolset(toolset)?;
    Ok(Value::from(toolset))
}

fn require_motors(controller: &dyn Controller) -> Result<(), DomainError> {
    if controller.motors_on() {
        Ok(())
    } else {
        Err(DomainError::new("Motors must be on"))
    }
}
