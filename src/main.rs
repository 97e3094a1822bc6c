use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reportflow::cli::{Cli, Command};
use reportflow::config::ReportflowConfig;
use reportflow::listener::{BackoffPolicy, ListenerSupervisor};
use reportflow::server::{self, AppState};
use reportflow::store::{MemoryStore, OrderStore};
use reportflow::workflow::OrderHandler;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ReportflowConfig::load(&cli.config)?;

    match cli.command {
        Command::Serve { start } => serve(config, start).await,
        Command::Config => {
            let rendered =
                toml::to_string_pretty(&config.redacted()).context("failed to render config")?;
            println!("{rendered}");
            match config.validate() {
                Ok(()) => println!("# configuration is valid"),
                Err(e) => println!("# configuration is invalid: {e:#}"),
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "reportflow=debug,tower_http=debug"
    } else {
        "reportflow=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .init();
}

/// Runs the control surface and the listener.
///
/// Orders live in a [`MemoryStore`] that starts empty and is lost on exit, so
/// this binary is a dry run of the pipeline. A deployment links the library
/// against its own `OrderStore` and `ChangeFeed` adapter.
async fn serve(config: ReportflowConfig, start: bool) -> Result<()> {
    config.validate()?;

    warn!("Using the in-memory order store; orders are not persisted");
    let store = MemoryStore::new();
    let orders: Arc<dyn OrderStore> = Arc::new(store.clone());
    let handler =
        Arc::new(OrderHandler::from_config(&config, orders).context("failed to build HTTP client")?);
    let listener = ListenerSupervisor::new(
        Arc::new(store),
        handler,
        BackoffPolicy::from(&config.listener),
    );

    if start || config.server.autostart {
        listener.start();
    }

    let app = server::app(AppState {
        listener: listener.clone(),
    });
    let addr = format!("0.0.0.0:{}", config.server.port);
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Control surface listening on {addr}");

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    listener.shutdown().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
