//! braid - configuration-driven event-streaming integration runtime.
//!
//! Takes one or more YAML configuration files, merges them, builds the
//! declared apps and runs them until interrupted:
//!
//! ```text
//! braid main.yaml overrides.yaml
//! ```
//!
//! Exit codes: 0 after a graceful stop, 1 on a fatal configuration or
//! startup error.

mod logging;

use anyhow::Context;
use braid_runtime::config::load_files;
use braid_runtime::Connector;
use braid_types::ErrorCode;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Event-streaming integration runtime.
#[derive(Parser, Debug)]
#[command(name = "braid")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration files, merged in order (later files override).
    #[arg(required = true, value_name = "CONFIG")]
    configs: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            // Logging may not be initialized yet for config errors.
            eprintln!("braid: {error:#}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_files(&args.configs)
        .map_err(|e| anyhow::anyhow!("[{}] {e}", e.code()))
        .context("configuration rejected")?;

    logging::init(&config.log)?;

    let mut connector = Connector::new(config)
        .map_err(|e| anyhow::anyhow!("[{}] {e}", e.code()))
        .context("connector construction failed")?;

    if let Err(error) = connector.start().await {
        error!("startup failed: {error}");
        connector.stop().await;
        return Err(anyhow::anyhow!("[{}] {error}", error.code()));
    }

    info!("running, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    connector.stop().await;
    Ok(())
}
