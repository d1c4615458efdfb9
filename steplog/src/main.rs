mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use steplog_core::{
    bootstrap::{init_services, load_config},
    logging,
};

use server::SteplogServer;

#[derive(Parser, Debug)]
#[command(name = "steplog")]
#[command(about = "Step log ingestion and live tail server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(short, long, env = "STEPLOG_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging; the guard keeps the file writer alive
    let _log_guard = logging::init_logging(&config.logging)?;
    info!("Steplog server starting...");
    info!(
        http_address = %config.http_address(),
        sink = ?config.sink.kind,
        "Configuration loaded and validated"
    );

    // 3. Sink and aggregator
    let services = init_services(&config).await?;

    // 4. Serve until a shutdown signal arrives
    SteplogServer::new(config, services).start().await
}
