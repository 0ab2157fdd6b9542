//! Web server module.

mod handlers;
mod ws;

pub use handlers::*;
pub use ws::*;

use crate::config::DashboardConfig;
use crate::monitor::Collector;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
    pub dashboard: DashboardConfig,
    pub started_at: DateTime<Utc>,
}

/// Dashboard web server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(collector: Arc<Collector>, dashboard: DashboardConfig) -> Self {
        Self {
            state: AppState {
                collector,
                dashboard,
                started_at: Utc::now(),
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Dashboard
            .route("/", get(handlers::handle_dashboard))
            .route("/static/{*path}", get(handlers::handle_static))
            // API endpoints
            .route("/health", get(handlers::handle_health))
            .route("/api/metrics", get(handlers::handle_metrics))
            .route("/api/metrics/{target}", get(handlers::handle_target_metrics))
            .route("/api/alerts", get(handlers::handle_alerts))
            .route("/api/report", get(handlers::handle_report))
            // Live updates
            .route("/ws", get(ws::handle_ws))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.dashboard.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
