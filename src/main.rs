//! glancemeta -- image metadata server.
//!
//! Crash-only design: every startup is a recovery. Seeded images are
//! registered idempotently and the store schema is created if missing.
//! SIGTERM/SIGINT only stop accepting connections; SIGHUP re-reads the
//! configuration file and applies the new metadata quota in place.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glancemeta::config::Config;
#[cfg(unix)]
use glancemeta::config::QuotaHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the glancemeta server.
#[derive(Parser, Debug)]
#[command(
    name = "glancemeta",
    version,
    about = "Image metadata server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "glancemeta.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = glancemeta::config::load_config(&cli.config)?;

    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        glancemeta::metrics::init_metrics()?;
        glancemeta::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(glancemeta::AppState::from_config(config)?);
    info!(
        "Metadata quota: {} items per image",
        state.quota.max_metadata_items()
    );

    #[cfg(unix)]
    tokio::spawn(reload_on_sighup(cli.config.clone(), state.quota.clone()));

    let app = glancemeta::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("glancemeta listening on {}", bind_addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    // The timeout only starts counting once a shutdown signal has arrived.
    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("Graceful shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    info!("glancemeta shut down");

    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over `logging.level`.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Re-read the configuration on every SIGHUP and apply the new quota.
/// Other settings need a restart.
#[cfg(unix)]
async fn reload_on_sighup(config_path: String, quota: QuotaHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to install SIGHUP handler, quota reload disabled: {err}");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match glancemeta::config::load_config(&config_path) {
            Ok(config) => {
                let limit = config.quota.max_metadata_items;
                quota.set_max_metadata_items(limit);
                info!("Reloaded {}: metadata quota is now {}", config_path, limit);
            }
            Err(err) => warn!("Failed to reload {}: {err:#}", config_path),
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
