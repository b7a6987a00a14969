//! Dashboard orchestration.
//!
//! [`DashboardController`] owns the incident set, the map state and the
//! counters, and sequences bulk loads against live events. Loads are split
//! into [`DashboardController::begin_load`] and
//! [`DashboardController::complete_load`] so the network await happens
//! outside any lock; every load bumps a generation counter and a response
//! whose ticket is no longer current is discarded.

pub mod notify;
pub mod shared;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::client::{ExportFormat, IncidentSource, QueryError, QueryFilters};
use crate::incident::{AttackerRank, GeoIncident, IncidentDetail};
use crate::live::{is_private_ip, LiveEvent};
use crate::render::{RendererSettings, SpatialRenderer};
use crate::stats::{compute_stats, AnimationSettings, DashboardStats, StatsAnimator};

pub use self::notify::{LogNotifier, Notifier, Toast, ToastLevel, ToastLog};
pub use self::shared::SharedDashboard;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub renderer: RendererSettings,
    pub animation: AnimationSettings,
    pub filters: QueryFilters,
    pub top_attackers: usize,
    pub auto_refresh_period: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            renderer: RendererSettings::default(),
            animation: AnimationSettings::default(),
            filters: QueryFilters::default(),
            top_attackers: 10,
            auto_refresh_period: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
}

/// Issued by [`DashboardController::begin_load`]; carries the filters the
/// fetch must use.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTicket {
    pub generation: u64,
    pub filters: QueryFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Applied { incidents: usize },
    Failed,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Folded { created: bool, mapped: bool },
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestMetrics {
    pub folded: u64,
    pub dropped: u64,
    pub stale_responses: u64,
    pub transport_errors: u64,
}

pub struct DashboardController {
    settings: ControllerSettings,
    source: Arc<dyn IncidentSource>,
    notifier: Arc<dyn Notifier>,
    aggregator: Aggregator,
    renderer: SpatialRenderer,
    animator: StatsAnimator,
    filters: QueryFilters,
    phase: LoadPhase,
    generation: u64,
    stats: DashboardStats,
    top_attackers: Vec<AttackerRank>,
    metrics: IngestMetrics,
    selected: Arc<watch::Sender<Option<String>>>,
    last_error: Option<String>,
}

impl std::fmt::Debug for DashboardController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardController")
            .field("phase", &self.phase)
            .field("generation", &self.generation)
            .field("incidents", &self.aggregator.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl DashboardController {
    pub fn new(
        settings: ControllerSettings,
        source: Arc<dyn IncidentSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (selected, _rx) = watch::channel(None);
        Self {
            renderer: SpatialRenderer::new(settings.renderer.clone()),
            animator: StatsAnimator::new(settings.animation),
            filters: settings.filters.clone(),
            settings,
            source,
            notifier,
            aggregator: Aggregator::new(),
            phase: LoadPhase::Idle,
            generation: 0,
            stats: DashboardStats::default(),
            top_attackers: Vec::new(),
            metrics: IngestMetrics::default(),
            selected: Arc::new(selected),
            last_error: None,
        }
    }

    // ------------------------------------------------------------------
    // Bulk loads
    // ------------------------------------------------------------------

    /// Start a reload with the current filters.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.phase = LoadPhase::Loading;
        debug!(generation = self.generation, "load started");
        LoadTicket {
            generation: self.generation,
            filters: self.filters.clone(),
        }
    }

    /// Replace the filters and start a reload that supersedes any in flight.
    pub fn set_filters(&mut self, filters: QueryFilters) -> LoadTicket {
        self.filters = filters;
        self.begin_load()
    }

    /// Apply the result of the fetch started by `ticket`.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<GeoIncident>, QueryError>,
    ) -> LoadOutcome {
        if ticket.generation != self.generation {
            self.metrics.stale_responses += 1;
            debug!(
                generation = ticket.generation,
                latest = self.generation,
                "discarding stale load response"
            );
            return LoadOutcome::Stale;
        }

        self.phase = LoadPhase::Ready;
        match result {
            Ok(incidents) => {
                self.aggregator.load_snapshot(incidents);
                let handler = self.select_handler();
                self.renderer.render(
                    self.aggregator.iter().filter(|i| is_mappable(&i.ip)),
                    handler,
                );
                if !self.aggregator.is_empty() {
                    self.renderer.fit_to_data();
                }
                self.refresh_derived();
                self.last_error = None;
                info!(
                    generation = ticket.generation,
                    incidents = self.aggregator.len(),
                    markers = self.renderer.marker_count(),
                    "snapshot applied"
                );
                LoadOutcome::Applied {
                    incidents: self.aggregator.len(),
                }
            }
            Err(e) => {
                self.metrics.transport_errors += 1;
                warn!(generation = ticket.generation, error = %e, "load failed, keeping previous data");
                self.notifier
                    .notify(Toast::error(format!("Failed to load data: {}", e)));
                self.last_error = Some(e.to_string());
                LoadOutcome::Failed
            }
        }
    }

    // ------------------------------------------------------------------
    // Live events
    // ------------------------------------------------------------------

    /// Fold one raw live payload. Malformed payloads are counted and dropped.
    pub fn ingest_live(&mut self, payload: &serde_json::Value) -> IngestOutcome {
        match LiveEvent::decode(payload) {
            Ok(event) => self.apply_event(&event),
            Err(e) => self.drop_event(e),
        }
    }

    /// Same as [`Self::ingest_live`] for a text frame.
    pub fn ingest_text(&mut self, text: &str) -> IngestOutcome {
        match LiveEvent::decode_text(text) {
            Ok(event) => self.apply_event(&event),
            Err(e) => self.drop_event(e),
        }
    }

    fn drop_event(&mut self, error: crate::live::MalformedEvent) -> IngestOutcome {
        self.metrics.dropped += 1;
        debug!(%error, "dropping malformed live event");
        IngestOutcome::Dropped
    }

    pub fn apply_event(&mut self, event: &LiveEvent) -> IngestOutcome {
        let outcome = self.aggregator.fold_event(event);
        let created = outcome.created;
        let mapped = if !is_mappable(&event.ip) {
            false
        } else {
            self.renderer.add_or_update_marker(outcome.incident);
            self.renderer.marker(&event.ip).is_some()
        };
        debug!(
            ip = %event.ip,
            status = %event.status,
            count = outcome.incident.count,
            created,
            "folded live event"
        );
        self.metrics.folded += 1;
        self.refresh_derived();
        IngestOutcome::Folded { created, mapped }
    }

    fn refresh_derived(&mut self) {
        self.stats = compute_stats(self.aggregator.iter());
        self.animator.animate_stats(&self.stats);
        self.top_attackers = self.aggregator.top_attackers(self.settings.top_attackers);
    }

    fn select_handler(&self) -> crate::render::SelectHandler {
        let selected = self.selected.clone();
        Box::new(move |ip: &str| {
            selected.send_replace(Some(ip.to_string()));
        })
    }

    // ------------------------------------------------------------------
    // Map controls
    // ------------------------------------------------------------------

    pub fn set_clustering(&mut self, enabled: bool) -> bool {
        self.renderer.set_clustering(enabled)
    }

    pub fn set_heatmap(&mut self, enabled: bool) -> bool {
        self.renderer.set_heatmap(enabled)
    }

    pub fn fit_to_data(&mut self) -> bool {
        self.renderer.fit_to_data().is_some()
    }

    /// Center on an attacker and show its detail view.
    pub fn focus(&mut self, ip: &str) -> bool {
        if !self.renderer.focus(ip) {
            return false;
        }
        self.renderer.select(ip)
    }

    /// Simulate a marker click.
    pub fn select(&self, ip: &str) -> bool {
        self.renderer.select(ip)
    }

    pub fn clear_selection(&self) {
        self.selected.send_replace(None);
    }

    pub fn selection(&self) -> watch::Receiver<Option<String>> {
        self.selected.subscribe()
    }

    pub fn selected_detail(&self) -> Option<IncidentDetail> {
        let ip = self.selected.borrow().clone()?;
        self.aggregator.get(&ip).map(GeoIncident::detail)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn filters(&self) -> &QueryFilters {
        &self.filters
    }

    pub fn stats(&self) -> DashboardStats {
        self.stats
    }

    /// Counter values as currently shown, mid-animation included.
    pub fn displayed_counters(&self) -> BTreeMap<String, u64> {
        self.animator.snapshot()
    }

    pub fn top_attackers(&self) -> &[AttackerRank] {
        &self.top_attackers
    }

    pub fn metrics(&self) -> IngestMetrics {
        self.metrics
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn incident(&self, ip: &str) -> Option<&GeoIncident> {
        self.aggregator.get(ip)
    }

    pub fn incidents(&self) -> Vec<&GeoIncident> {
        self.aggregator.sorted()
    }

    pub fn renderer(&self) -> &SpatialRenderer {
        &self.renderer
    }

    pub fn source(&self) -> Arc<dyn IncidentSource> {
        self.source.clone()
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------

    /// Pretty JSON of the current incident set, most active first.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.aggregator.sorted())
    }

    pub fn export_url(&self, format: ExportFormat, limit: usize) -> String {
        self.source.export_url(format, limit)
    }
}

/// Private and loopback sources are folded but never get a marker.
fn is_mappable(ip: &str) -> bool {
    !is_private_ip(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::{EventType, GeoLocation, Severity};
    use chrono::Utc;
    use serde_json::json;

    struct NoSource;

    #[async_trait::async_trait]
    impl IncidentSource for NoSource {
        async fn fetch_incidents(&self, _: &QueryFilters) -> Result<Vec<GeoIncident>, QueryError> {
            Ok(Vec::new())
        }
    }

    fn controller() -> (DashboardController, Arc<ToastLog>) {
        let toasts = Arc::new(ToastLog::default());
        let c = DashboardController::new(
            ControllerSettings::default(),
            Arc::new(NoSource),
            toasts.clone(),
        );
        (c, toasts)
    }

    fn located(ip: &str, lat: f64, lon: f64, count: u64) -> GeoIncident {
        let mut i = GeoIncident::first_sighting(
            ip,
            EventType::FailedLogin,
            Some(GeoLocation {
                lat: Some(lat),
                lon: Some(lon),
                country: "Germany".to_string(),
                ..Default::default()
            }),
            Utc::now(),
        );
        i.count = count;
        i
    }

    #[test]
    fn test_starts_idle_with_default_filters() {
        let (c, _) = controller();
        assert_eq!(c.phase(), LoadPhase::Idle);
        assert_eq!(c.generation(), 0);
        assert_eq!(c.filters(), &QueryFilters::default());
        assert_eq!(c.stats(), DashboardStats::default());
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let (mut c, _) = controller();
        let first = c.begin_load();
        let second = c.begin_load();
        assert_eq!(c.phase(), LoadPhase::Loading);

        let outcome = c.complete_load(second, Ok(vec![located("2.2.2.2", 10.0, 20.0, 5)]));
        assert_eq!(outcome, LoadOutcome::Applied { incidents: 1 });

        let late = c.complete_load(first, Ok(vec![located("1.1.1.1", 1.0, 1.0, 9)]));
        assert_eq!(late, LoadOutcome::Stale);
        assert!(c.incident("1.1.1.1").is_none());
        assert!(c.incident("2.2.2.2").is_some());
        assert_eq!(c.metrics().stale_responses, 1);
        assert_eq!(c.phase(), LoadPhase::Ready);
    }

    #[test]
    fn test_failed_load_keeps_previous_data() {
        let (mut c, toasts) = controller();
        let t = c.begin_load();
        c.complete_load(t, Ok(vec![located("3.3.3.3", 10.0, 20.0, 4)]));

        let t = c.begin_load();
        let outcome = c.complete_load(t, Err(QueryError::Status { status: 503 }));
        assert_eq!(outcome, LoadOutcome::Failed);
        assert_eq!(c.phase(), LoadPhase::Ready);
        assert!(c.incident("3.3.3.3").is_some());
        assert_eq!(c.last_error(), Some("HTTP 503"));
        assert_eq!(c.metrics().transport_errors, 1);

        let shown = toasts.all();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].level, ToastLevel::Error);
        assert_eq!(shown[0].message, "Failed to load data: HTTP 503");
    }

    #[test]
    fn test_snapshot_fits_located_incidents_only() {
        let (mut c, _) = controller();
        let t = c.begin_load();
        c.complete_load(
            t,
            Ok(vec![located("0.0.0.1", 0.0, 0.0, 1), located("5.5.5.5", 10.0, 20.0, 2)]),
        );
        assert_eq!(c.renderer().marker_count(), 1);
        let view = c.renderer().view();
        assert!((view.center.lat - 10.0).abs() < 1e-6);
        assert!((view.center.lon - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_snapshot_keeps_view() {
        let (mut c, _) = controller();
        let before = c.renderer().view();
        let t = c.begin_load();
        c.complete_load(t, Ok(Vec::new()));
        assert_eq!(c.renderer().view(), before);
    }

    #[test]
    fn test_live_folds_update_stats_and_severity() {
        let (mut c, toasts) = controller();
        let geo = json!({"lat": 48.1, "lon": 11.6, "country": "Germany", "city": "Munich"});
        for status in ["failed_login", "failed_login", "break_in_attempt"] {
            let outcome = c.ingest_live(&json!({"ip": "1.2.3.4", "status": status, "geo": geo}));
            assert!(matches!(outcome, IngestOutcome::Folded { mapped: true, .. }));
        }
        let incident = c.incident("1.2.3.4").unwrap();
        assert_eq!(incident.count, 3);
        assert_eq!(incident.types.len(), 2);
        assert_eq!(incident.severity(), Severity::Critical);
        assert_eq!(c.stats().total, 3);
        assert_eq!(c.stats().failed_total, 3);
        assert_eq!(c.top_attackers()[0].ip, "1.2.3.4");
        assert_eq!(c.renderer().marker("1.2.3.4").unwrap().color, "#ff4757");
        assert!(toasts.all().is_empty());
    }

    #[test]
    fn test_live_never_refits() {
        let (mut c, _) = controller();
        let before = c.renderer().view();
        c.ingest_live(&json!({"ip": "8.8.8.8", "status": "failed_login", "geo": {"lat": 50.0, "lon": 8.0}}));
        assert_eq!(c.renderer().view(), before);
    }

    #[test]
    fn test_malformed_events_are_counted() {
        let (mut c, _) = controller();
        assert_eq!(c.ingest_text("not json"), IngestOutcome::Dropped);
        assert_eq!(c.ingest_live(&json!({"status": "failed_login"})), IngestOutcome::Dropped);
        assert_eq!(c.ingest_live(&json!([1, 2])), IngestOutcome::Dropped);
        assert_eq!(c.metrics().dropped, 3);
        assert_eq!(c.metrics().folded, 0);
        assert_eq!(c.stats(), DashboardStats::default());
    }

    #[test]
    fn test_private_sources_counted_but_not_mapped() {
        let (mut c, _) = controller();
        let outcome = c.ingest_live(&json!({
            "ip": "192.168.1.20",
            "status": "accepted_login",
            "geo": {"lat": 10.0, "lon": 10.0}
        }));
        assert_eq!(outcome, IngestOutcome::Folded { created: true, mapped: false });
        assert_eq!(c.stats().unique_ips, 1);
        assert_eq!(c.renderer().marker_count(), 0);
    }

    #[test]
    fn test_private_snapshot_source_stays_off_the_map() {
        let (mut c, _) = controller();
        let t = c.begin_load();
        c.complete_load(
            t,
            Ok(vec![located("10.0.0.5", 52.0, 4.0, 1), located("5.5.5.5", 10.0, 20.0, 2)]),
        );
        assert!(c.renderer().marker("10.0.0.5").is_none());
        assert_eq!(c.renderer().marker_count(), 1);

        let outcome = c.ingest_live(&json!({"ip": "10.0.0.5", "status": "break_in_attempt"}));
        assert_eq!(outcome, IngestOutcome::Folded { created: false, mapped: false });
        assert_eq!(c.incident("10.0.0.5").unwrap().severity(), Severity::Critical);
        assert!(c.renderer().marker("10.0.0.5").is_none());
        assert_eq!(c.stats().unique_ips, 2);
    }

    #[test]
    fn test_live_arrivals_keep_clusters_across_toggle() {
        let (mut c, _) = controller();
        // 60 px apart on the equator at zoom 2, arriving out of address order
        let step = 60.0 / 1024.0 * 360.0;
        for (ip, k) in [("1.0.0.2", 1.0), ("1.0.0.3", 2.0), ("1.0.0.1", 0.0), ("1.0.0.4", 3.0)] {
            c.ingest_live(&json!({
                "ip": ip,
                "status": "failed_login",
                "geo": {"lat": 0.0, "lon": -40.0 + k * step}
            }));
        }
        assert_eq!(c.renderer().view().zoom, 2);
        let before = c.renderer().layers();
        assert_eq!(before.len(), 3);

        assert!(!c.set_clustering(false));
        assert!(c.set_clustering(true));
        assert_eq!(c.renderer().layers(), before);
    }

    #[test]
    fn test_focus_selects_detail() {
        let (mut c, _) = controller();
        let t = c.begin_load();
        c.complete_load(t, Ok(vec![located("9.9.9.9", 40.0, -3.0, 7)]));
        assert!(c.selected_detail().is_none());
        assert!(c.focus("9.9.9.9"));
        assert_eq!(c.renderer().view().zoom, 8);
        let detail = c.selected_detail().unwrap();
        assert_eq!(detail.ip, "9.9.9.9");
        assert_eq!(detail.org, "Unknown");
        assert!(!c.focus("10.10.10.10"));
        c.clear_selection();
        assert!(c.selected_detail().is_none());
    }

    #[test]
    fn test_export_json_orders_by_count() {
        let (mut c, _) = controller();
        let t = c.begin_load();
        c.complete_load(
            t,
            Ok(vec![located("1.1.1.1", 1.0, 1.0, 2), located("2.2.2.2", 2.0, 2.0, 8)]),
        );
        let exported: serde_json::Value = serde_json::from_str(&c.export_json().unwrap()).unwrap();
        assert_eq!(exported[0]["ip"], "2.2.2.2");
        assert_eq!(exported[1]["ip"], "1.1.1.1");
        assert_eq!(c.export_url(ExportFormat::Csv, 100), "/api/top?format=csv&limit=100");
    }
}
