//! ThreatCanvas -- geographic SSH intrusion dashboard engine.
//!
//! This crate aggregates per-IP intrusion incidents from a collector's bulk
//! query API and its live event feed, classifies them by severity, and keeps
//! map state (markers, clusters, heat layer, view) and headline counters in
//! sync for a front-end to draw.

pub mod aggregate;
pub mod api;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod incident;
pub mod live;
pub mod render;
pub mod stats;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::state::AppState;
use crate::client::HttpIncidentSource;
use crate::config::DashboardConfig;
use crate::dashboard::{DashboardController, SharedDashboard, ToastLog};

/// Capacity of the stdin live-event channel.
const LIVE_CHANNEL_CAPACITY: usize = 1024;

/// Start the dashboard engine: initial load, optional live feed from stdin,
/// and the state API server.
pub async fn serve(config: DashboardConfig, live_stdin: bool) -> Result<()> {
    // 1. Backend client
    let source = HttpIncidentSource::new(&config.backend.base_url, config.backend.timeout())
        .context("failed to build backend client")?;
    tracing::info!(backend = %source.base_url(), "Using collector backend");

    // 2. Controller
    let toasts = Arc::new(ToastLog::default());
    let controller =
        DashboardController::new(config.controller_settings(), Arc::new(source), toasts.clone());
    let dashboard = SharedDashboard::new(controller);

    // 3. Initial load and timers
    let outcome = dashboard.refresh().await;
    tracing::info!(?outcome, "Initial load finished");
    if config.refresh.enabled_on_start {
        dashboard.set_auto_refresh(true);
    }

    // 4. Live feed
    if live_stdin {
        let rx = live::spawn_line_feed(tokio::io::stdin(), LIVE_CHANNEL_CAPACITY);
        let feed = dashboard.clone();
        tokio::spawn(async move {
            feed.run_live(rx).await;
        });
    }

    // 5. API server
    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    let app = api::router(AppState::new(dashboard, toasts));

    tracing::info!(%addr, "ThreatCanvas listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
