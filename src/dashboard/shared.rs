//! Shared, task-safe handle to a [`DashboardController`].
//!
//! All mutation goes through one `tokio::sync::Mutex`, held only for the
//! synchronous parts of an operation. A refresh releases it while the fetch
//! is in flight so live events keep folding.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DashboardController, IngestOutcome, LoadOutcome, Notifier, Toast};
use crate::client::QueryFilters;

#[derive(Clone)]
pub struct SharedDashboard {
    inner: Arc<Mutex<DashboardController>>,
    notifier: Arc<dyn Notifier>,
    auto_refresh: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    period: Duration,
}

impl SharedDashboard {
    pub fn new(controller: DashboardController) -> Self {
        let notifier = controller.notifier();
        let period = controller.settings().auto_refresh_period;
        Self {
            inner: Arc::new(Mutex::new(controller)),
            notifier,
            auto_refresh: Arc::new(std::sync::Mutex::new(None)),
            period,
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, DashboardController> {
        self.inner.lock().await
    }

    /// Reload with the current filters.
    pub async fn refresh(&self) -> LoadOutcome {
        let (ticket, source) = {
            let mut controller = self.inner.lock().await;
            (controller.begin_load(), controller.source())
        };
        let result = source.fetch_incidents(&ticket.filters).await;
        self.inner.lock().await.complete_load(ticket, result)
    }

    /// Replace the filters and reload. Any load still in flight becomes stale.
    pub async fn apply_filters(&self, filters: QueryFilters) -> LoadOutcome {
        let (ticket, source) = {
            let mut controller = self.inner.lock().await;
            (controller.set_filters(filters), controller.source())
        };
        let result = source.fetch_incidents(&ticket.filters).await;
        self.inner.lock().await.complete_load(ticket, result)
    }

    pub async fn ingest_live(&self, payload: &serde_json::Value) -> IngestOutcome {
        self.inner.lock().await.ingest_live(payload)
    }

    pub async fn ingest_text(&self, text: &str) -> IngestOutcome {
        self.inner.lock().await.ingest_text(text)
    }

    /// Fold every payload from `rx` until the sender side closes. Returns the
    /// number of payloads consumed.
    pub async fn run_live(&self, mut rx: mpsc::Receiver<String>) -> u64 {
        self.notifier.notify(Toast::success("Real-time streaming active"));
        let mut consumed = 0u64;
        while let Some(payload) = rx.recv().await {
            self.ingest_text(&payload).await;
            consumed += 1;
        }
        info!(consumed, "live feed closed");
        consumed
    }

    /// Start or stop the periodic refresh task. Must be called from within a
    /// tokio runtime.
    pub fn set_auto_refresh(&self, enabled: bool) -> bool {
        let mut slot = self.auto_refresh.lock().unwrap_or_else(|e| e.into_inner());

        if !enabled {
            if let Some(token) = slot.take() {
                token.cancel();
                self.notifier.notify(Toast::success("Auto-refresh disabled"));
            }
            return false;
        }
        if slot.is_some() {
            return true;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let dashboard = self.clone();
        let period = self.period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcome = dashboard.refresh().await;
                        debug!(?outcome, "auto-refresh");
                    }
                }
            }
            debug!("auto-refresh stopped");
        });
        *slot = Some(token);

        info!(period_secs = period.as_secs(), "auto-refresh enabled");
        self.notifier.notify(Toast::success(format!(
            "Auto-refresh enabled ({}s)",
            period.as_secs()
        )));
        true
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.auto_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}
