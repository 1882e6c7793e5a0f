//! nerv: serves the agent WebSocket endpoint, the JSON API and the web UI.

mod cli;
mod config;

use crate::cli::{Cli, Commands};
use clap::Parser;
use nerv_types::config::{LogFormat, NervConfig};
use nerv_types::error::{NervError, NervResult};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &NervConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    match config.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn main() {
    let cli = Cli::parse();

    let (config, source) = match config::load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            init_tracing(&config);
            source.log();
            cmd_start(config)
        }
        Commands::Config => cmd_config(&config),
    };

    if let Err(e) = result {
        error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn cmd_start(config: NervConfig) -> NervResult<()> {
    info!("Starting...");
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = nerv_api::server::start(&config).await?;
        shutdown_signal().await;
        server.shutdown().await;
        Ok::<(), NervError>(())
    })
}

fn cmd_config(config: &NervConfig) -> NervResult<()> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| NervError::Config(format!("failed to render config: {e}")))?;
    print!("{rendered}");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    }
}
