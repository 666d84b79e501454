use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nxt_zenoh_runtime::config::BRICK_PORT;
use nxt_zenoh_runtime::robot::RobotModel;
use nxt_zenoh_runtime::runtime::{self, RunOptions};

/// Drive an NXT robot from zenoh commands
#[derive(Parser, Debug)]
#[command(name = "nxt-runtime", version, about, long_about = None)]
struct Args {
    /// Serial device bound to the brick (e.g. an rfcomm tty)
    #[arg(long, default_value = BRICK_PORT)]
    port: String,

    /// Robot build on the brick
    #[arg(long, value_enum, default_value_t = RobotModel::CastorBot)]
    robot: RobotModel,

    /// JSON file overriding link and timing defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let options = RunOptions {
        port: args.port,
        model: args.robot,
        config: args.config,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
