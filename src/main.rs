//! pulsewatch - Target Health Monitor
//!
//! Polls HTTP targets on fixed intervals, evaluates alert thresholds,
//! notifies configured channels and serves a live dashboard.

mod alerts;
mod config;
mod monitor;
mod notify;
mod probe;
mod scheduler;
mod store;
mod web;

#[cfg(test)]
mod test_support;

use config::MonitorConfig;
use monitor::Monitor;
use web::Server;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsewatch=info".parse()?))
        .init();

    // Load configuration; any problem here is fatal
    let cfg = MonitorConfig::load()?;
    tracing::info!(
        "Starting pulsewatch with {} targets on port {}...",
        cfg.targets.len(),
        cfg.dashboard.port
    );
    if cfg.persistence.enabled {
        tracing::info!("Using state file at {}", cfg.persistence.path);
    }

    let dashboard = cfg.dashboard.clone();
    let monitor = Monitor::init(cfg)?;
    monitor.start().await?;

    // Serve until a shutdown signal arrives
    let server = Server::new(monitor.collector(), dashboard);
    let served = server.start(shutdown_signal()).await;

    monitor.shutdown().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
