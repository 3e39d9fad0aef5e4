mod routes;
mod tls;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use rig_core::{BuildVersion, IngestConfig, IngestionHandler};
use routes::{router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Time granted to in-flight requests once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "ingestd")]
#[command(about = "Metrics ingestion endpoint - validates export batches and keeps recent outcomes")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/ingestd.toml")]
    config: PathBuf,

    /// Bind address (overrides server.bind)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = IngestConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logger.level)),
        )
        .init();

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;

    let handler = IngestionHandler::with_capacity(config.server.cache_capacity)
        .context("Invalid cache capacity")?;
    let version = BuildVersion::current().clone();
    info!(
        "Build commit={} built_at={} cache_capacity={}",
        version.git_commit_sha, version.build_timestamp, config.server.cache_capacity
    );

    let app = router(AppState { handler, version });

    let handle = axum_server::Handle::new();
    spawn_shutdown_listener(handle.clone());

    match &config.tls {
        Some(tls) => {
            let server_config = tls::load_server_config(tls)
                .with_context(|| format!("Failed to load TLS material from {:?}", tls))?;
            let rustls_config = RustlsConfig::from_config(Arc::new(server_config));
            info!("Ingestion endpoint listening on {} (mutual TLS)", addr);
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            warn!("TLS is not configured, serving plain HTTP; configure [tls] for mutual TLS");
            info!("Ingestion endpoint listening on {}", addr);
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
    }

    info!("Ingestion endpoint stopped");
    Ok(())
}

fn spawn_shutdown_listener(handle: axum_server::Handle<SocketAddr>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, draining in-flight requests");
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });
}
