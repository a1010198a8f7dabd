//! Casebook server binary.

use anyhow::{Context, Result};
use casebook_core::config::AppConfig;
use casebook_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Casebook - sequence ids and attachment storage for test management
#[derive(Parser, Debug)]
#[command(name = "casebookd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CASEBOOK_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Casebook v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    for warning in config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?
    {
        tracing::warn!("Configuration warning: {}", warning);
    }

    casebook_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let blobs = casebook_storage::from_config(&config.storage, &config.server.public_base_url)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = blobs.backend_name(), "Storage backend initialized");

    // Fail fast instead of reporting healthy with an unreachable store.
    blobs
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let metadata = casebook_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), blobs, metadata);

    if config.reconcile.enabled {
        let reconciler = state.services.reconciler.clone();
        let interval = config.reconcile.interval();

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Background reconciler enabled"
            );
            loop {
                tokio::time::sleep(interval).await;
                match reconciler.run_once().await {
                    Ok(stats) => casebook_server::metrics::record_reconcile(&stats),
                    Err(e) => tracing::error!(error = %e, "Reconcile pass failed"),
                }
            }
        });
    } else {
        tracing::info!("Background reconciler disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Load configuration from an optional TOML file and `CASEBOOK_` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path,
            "No config file found, using defaults and environment variables"
        );
    }

    figment
        .merge(Env::prefixed("CASEBOOK_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
