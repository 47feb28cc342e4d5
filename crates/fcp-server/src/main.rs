//! HTTP server binary for the fleet charge planner.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fcp_server::{router, AppState};
use fcp_store::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "fcp-server", about = "Fleet charge planner HTTP façade")]
struct Args {
    /// Path to the planner database.
    #[arg(long, default_value = "fcp.db")]
    db: String,

    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8000")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    fcp_algo::init_solver();

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("failed to open store at {}", args.db))?;
    let state = Arc::new(AppState {
        store: Arc::new(store),
    });

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    info!(addr = %args.addr, db = %args.db, "fcp-server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
