//! Personality worker binary.
//!
//! Spawned by the supervisor with piped stdio: envelopes in on stdin,
//! snapshots and health out on stdout, logs on stderr (where the
//! supervisor's severity pump picks them up).

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Personality worker - Layer-0 affect engine
#[derive(Parser, Debug)]
#[command(name = "rover_personality")]
#[command(version)]
#[command(about = "Affect engine worker for the rover supervisor")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    // stderr keeps stdout clean for the NDJSON channel.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("personality worker starting (pid={})", std::process::id());

    if let Err(e) = rover_personality::worker::run().await {
        error!("worker failed: {}", e);
        std::process::exit(1);
    }

    info!("personality worker exited cleanly");
}
