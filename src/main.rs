// The beacon agent binary: load config, start the runners, wait for a
// termination signal, stop everything within the shutdown deadline.

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use beacon::config::{self, AgentConfig, LogLevel};
use beacon::runner::STOP_TIMEOUT;
use beacon::supervisor::Supervisor;
use beacon::transport::CarbonTransport;
use beacon::version::Version;

/// Command line arguments for the beacon agent
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "A scheduled sampling agent that forwards metrics to a Carbon-style collector")]
struct Args {
    /// Path to the configuration file (required)
    #[arg(short, long)]
    config: PathBuf,

    /// Path to the version descriptor written by the build pipeline
    #[arg(long, default_value = "version.json")]
    version_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration from the specified file
    let config: AgentConfig = match config::load_config(&args.config) {
        Ok(config) => {
            beacon::init_logging(&config.log_level);
            info!("Configuration loaded from {}", args.config.display());
            config
        }
        Err(e) => {
            // Initialize logger with default level for error reporting
            beacon::init_logging(&LogLevel::Error);
            error!("Failed to load configuration: {}", e);
            return Err(anyhow::anyhow!("Failed to load configuration: {}", e));
        }
    };

    // A missing version file is not fatal; build-number metrics then
    // report zero
    let version = match Version::load(&args.version_file) {
        Ok(version) => version,
        Err(e) => {
            warn!("could not load version information: {}", e);
            Version::default()
        }
    };

    info!("beacon {} ({})", beacon::VERSION, version.build_hash());
    config.log_summary();

    // Bring up the shared transport; a collector that is down at startup
    // is logged and tolerated, the agent keeps running with no session
    let transport = Arc::new(CarbonTransport::new(
        config.collector.clone(),
        config.metric_prefix(),
    ));
    if let Err(e) = transport.connect().await {
        error!("error initializing transport: {}", e);
    }

    let mut supervisor = Supervisor::new(version, transport);
    supervisor.start_all(&config.metrics);

    wait_for_shutdown_signal().await;

    supervisor.stop_all(STOP_TIMEOUT).await?;
    info!("terminating");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt =
        signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = interrupt.recv() => info!("received interrupt signal from OS"),
        _ = terminate.recv() => info!("received terminate signal from OS"),
    }
}
