use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use expe_session_client::{
    bootstrap::PageLoader,
    cli::{execute_command, Commands},
    config::{Config, LogFormat, LoggingConfig},
    session_sync::SessionSyncClient,
    store::{MemoryStore, SqliteStore},
};

/// Experiment session client
#[derive(Parser, Debug)]
#[command(name = "expe-session", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging first so configuration warnings are visible
    init_logging(&LoggingConfig::from_env());

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Experiment session client starting..."
    );

    let durable = match SqliteStore::new(&config.store).await {
        Ok(s) => {
            info!(path = %config.store.path.display(), "Profile store opened");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to open profile store");
            return Err(e.into());
        }
    };

    let client = match SessionSyncClient::new(&config.server, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.server.base_url, "Session sync client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize session sync client");
            return Err(e.into());
        }
    };

    let loader = PageLoader::new(
        &config,
        Arc::new(durable),
        Arc::new(MemoryStore::new()),
        client.clone(),
    );

    let result = execute_command(cli.command, &loader, &client).await;
    println!("{}", result.message);
    std::process::exit(result.exit_code);
}

/// Initialize tracing/logging
fn init_logging(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
