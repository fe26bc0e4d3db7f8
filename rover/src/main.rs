//! # Rover Supervisor
//!
//! Entry point for the companion-robot supervisor: opens both MCU
//! serial links, launches the worker fleet, and runs the 50 Hz control
//! loop until a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! # Run with an explicit config file
//! rover --config /etc/rover/rover.toml
//!
//! # Bench mode: no MCUs attached, workers only
//! rover -c config/rover.toml --no-mcu -v
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use rover_common::config::SupervisorConfig;
use rover_common::params::{
    default_params_path, load_params, save_param, ParamDef, ParamKind, ParamRegistry, ParamValue,
};
use rover_core::safety::VisionPolicy;
use rover_core::tick::TickLoop;
use rover_mcu::clock::ClockSyncEngine;
use rover_mcu::face::FaceClient;
use rover_mcu::motion::MotionClient;
use rover_mcu::transport::spawn_transport;
use rover_workers::WorkerSupervisor;

/// Companion robot supervisor
#[derive(Parser, Debug)]
#[command(name = "rover")]
#[command(version)]
#[command(about = "Companion robot supervisor core")]
#[command(long_about = None)]
struct Args {
    /// Path to the supervisor configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run without MCU serial links (workers and loop only)
    #[arg(long)]
    no_mcu: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args)) {
        error!("supervisor failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("rover supervisor v{} starting", env!("CARGO_PKG_VERSION"));

    // Configuration: explicit file required when given, defaults otherwise.
    let config = match &args.config {
        Some(path) => SupervisorConfig::load(path)?,
        None => {
            info!("no config file given, using defaults");
            SupervisorConfig::default()
        }
    };

    // Runtime parameter registry with persisted overrides.
    let mut params = build_param_registry(&config);
    let params_path = default_params_path();
    load_params(&mut params, &params_path);

    // Worker fleet.
    let (worker_tx, worker_rx) = mpsc::unbounded_channel();
    let workers = Arc::new(WorkerSupervisor::new(config.workers.clone(), worker_tx));
    workers.start().await;

    // Personality axes go down once at startup.
    let mut pe_config = serde_json::Map::new();
    pe_config.insert("energy".into(), config.personality.energy.into());
    pe_config.insert("reactivity".into(), config.personality.reactivity.into());
    pe_config.insert("initiative".into(), config.personality.initiative.into());
    pe_config.insert("vulnerability".into(), config.personality.vulnerability.into());
    pe_config.insert("predictability".into(), config.personality.predictability.into());
    workers
        .send_to(
            "personality",
            rover_common::messages::PERSONALITY_CONFIG_INIT,
            Some(pe_config),
        )
        .await;

    // MCU links, clients, and clock sync.
    let mut motion_client = None;
    let mut face_client = None;
    let mut motion_events = None;
    let mut face_events = None;
    let mut motion_sync = None;
    let mut face_sync = None;
    let mut sync_tasks = Vec::new();

    if !args.no_mcu {
        let motion_transport = spawn_transport(
            config.serial.motion_port.clone(),
            config.serial.baudrate,
            "motion",
        );
        let face_transport =
            spawn_transport(config.serial.face_port.clone(), config.serial.baudrate, "face");

        motion_events = Some(motion_transport.subscribe());
        face_events = Some(face_transport.subscribe());
        motion_client = Some(MotionClient::new(motion_transport.clone()));
        face_client = Some(FaceClient::new(face_transport.clone()));

        let motion_engine = ClockSyncEngine::new(motion_transport, "motion");
        let face_engine = ClockSyncEngine::new(face_transport, "face");
        motion_sync = Some(motion_engine.state_handle());
        face_sync = Some(face_engine.state_handle());
        sync_tasks.push(tokio::spawn(motion_engine.run()));
        sync_tasks.push(tokio::spawn(face_engine.run()));
    } else {
        info!("running without MCU links (--no-mcu)");
    }

    // The tick loop, wired to everything above.
    let mut tick_loop = TickLoop::new(
        &config,
        motion_client,
        face_client,
        motion_events,
        face_events,
        motion_sync,
        face_sync,
        workers.clone(),
        worker_rx,
    );
    apply_vision_params(&params, &mut tick_loop);
    let handle = tick_loop.handle();

    // Param writes persist to disk and re-apply the vision thresholds
    // live (the control surface mutates the registry at runtime).
    {
        let path = params_path.clone();
        let vision_handle = handle.clone();
        let policy = std::sync::Mutex::new(VisionPolicy {
            stale_ms: params.get_f64("safety.vision_stale_ms", config.safety.vision_stale_ms),
            clear_low: params.get_f64("safety.vision_clear_low", config.safety.vision_clear_low)
                as f32,
            clear_high: params.get_f64("safety.vision_clear_high", config.safety.vision_clear_high)
                as f32,
        });
        params.on_change(move |name, value| {
            if let Err(e) = save_param(&path, name, value) {
                warn!("failed to persist param {}: {}", name, e);
            }
            let Some(v) = value.as_f64() else { return };
            let Ok(mut policy) = policy.lock() else { return };
            match name {
                "safety.vision_stale_ms" => policy.stale_ms = v,
                "safety.vision_clear_low" => policy.clear_low = v as f32,
                "safety.vision_clear_high" => policy.clear_high = v as f32,
                _ => return,
            }
            vision_handle.set_vision_policy(*policy);
        });
    }

    // Run until the loop exits or a shutdown signal arrives.
    let loop_task = tokio::spawn(async move {
        tick_loop.run().await;
    });

    tokio::select! {
        result = loop_task => {
            match result {
                Ok(()) => info!("tick loop completed"),
                Err(e) => {
                    error!("tick loop panicked: {}", e);
                    workers.stop().await;
                    return Err(Box::from("tick loop task failed"));
                }
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            handle.shutdown();
        }
    }

    // Coordinated teardown: workers get the shutdown envelope and a
    // grace period, sync tasks are cancelled, sockets unlinked.
    workers.stop().await;
    for task in sync_tasks {
        task.abort();
    }

    info!("rover supervisor shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => {}
        Err(e) => error!("unable to listen for shutdown signal: {}", e),
    }
}

/// Declare the runtime-tunable parameters.
fn build_param_registry(config: &SupervisorConfig) -> ParamRegistry {
    let mut params = ParamRegistry::new();
    params.register(ParamDef::new(
        "safety.vision_stale_ms",
        ParamKind::Float,
        ParamValue::Float(config.safety.vision_stale_ms),
        Some(50.0),
        Some(5000.0),
        "vision age beyond which speed is halved",
    ));
    params.register(ParamDef::new(
        "safety.vision_clear_low",
        ParamKind::Float,
        ParamValue::Float(config.safety.vision_clear_low),
        Some(0.0),
        Some(1.0),
        "clear-path confidence below which speed is quartered",
    ));
    params.register(ParamDef::new(
        "safety.vision_clear_high",
        ParamKind::Float,
        ParamValue::Float(config.safety.vision_clear_high),
        Some(0.0),
        Some(1.0),
        "clear-path confidence below which speed is halved",
    ));
    params.register(ParamDef::new(
        "planner.enabled",
        ParamKind::Bool,
        ParamValue::Bool(config.planner.enabled),
        None,
        None,
        "request plans from the AI worker",
    ));
    params
}

/// Push the (possibly overridden) vision thresholds into the safety gate.
fn apply_vision_params(params: &ParamRegistry, tick_loop: &mut TickLoop) {
    tick_loop.configure_vision_policy(VisionPolicy {
        stale_ms: params.get_f64("safety.vision_stale_ms", 500.0),
        clear_low: params.get_f64("safety.vision_clear_low", 0.3) as f32,
        clear_high: params.get_f64("safety.vision_clear_high", 0.6) as f32,
    });
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
