//! poolet daemon
//!
//! Main daemon process: seeds the in-memory store, runs the scheduler and
//! serves the REST API until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use poolet_api::{create_router, AppState};
use poolet_core::{DaemonConfig, LogFormat, LoggingConfig, Manifest, ResourceKind};
use poolet_scheduler::Scheduler;
use poolet_store::{EventLog, MemoryStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// poolet daemon - places volumes and buckets onto storage pools
#[derive(Parser, Debug)]
#[command(name = "pooletd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "POOLET_CONFIG")]
    config: Option<PathBuf>,

    /// Manifest of containers and instances to seed the store with
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Kind of instance this daemon schedules (volume or bucket)
    #[arg(long)]
    resource_kind: Option<String>,

    /// Log level or filter directive
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(self, config: &mut DaemonConfig) -> Result<()> {
        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(manifest) = self.manifest {
            config.store.manifest = Some(manifest);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(kind) = self.resource_kind {
            config.scheduler.resource_kind = match kind.to_lowercase().as_str() {
                "volume" => ResourceKind::Volume,
                "bucket" => ResourceKind::Bucket,
                other => anyhow::bail!("unknown resource kind: {}", other),
            };
        }
        Ok(())
    }
}

fn init_logging(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config)?;

    init_logging(&config.logging);

    info!("Starting poolet daemon v{}", env!("CARGO_PKG_VERSION"));

    // Create the store and seed it
    let store = Arc::new(MemoryStore::new(config.store.watch_buffer));
    if let Some(path) = &config.store.manifest {
        let manifest = Manifest::from_file(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        store
            .apply_manifest(&manifest)
            .await
            .context("Failed to apply manifest")?;
    }

    // Create scheduler
    let events = Arc::new(EventLog::new(config.store.event_history));
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        store.clone(),
        events.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler_handle = tokio::spawn(scheduler.clone().run(shutdown_rx.clone()));

    // Create API router
    let router = create_router(Arc::new(AppState {
        store,
        scheduler,
        events,
    }));

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid API address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(addr = %addr, kind = %config.scheduler.resource_kind, "API server listening");

    let mut server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx;
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    while !*shutdown_rx.borrow() {
                        if shutdown_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    info!("HTTP server shutting down");
                })
                .await
        }
    });

    let mut scheduler_done = false;
    let mut server_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut scheduler_handle => {
            scheduler_done = true;
            match result {
                Ok(Ok(())) => info!("Scheduler exited"),
                Ok(Err(e)) => error!(error = %e, "Scheduler failed"),
                Err(e) => error!(error = %e, "Scheduler task panicked"),
            }
        }
        result = &mut server_handle => {
            server_done = true;
            match result {
                Ok(Ok(())) => info!("Server exited"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    if !scheduler_done {
        if let Err(e) = scheduler_handle.await {
            warn!(error = %e, "Scheduler did not stop cleanly");
        }
    }
    if !server_done {
        if let Err(e) = server_handle.await {
            warn!(error = %e, "Server did not stop cleanly");
        }
    }

    info!("poolet daemon stopped");
    Ok(())
}
