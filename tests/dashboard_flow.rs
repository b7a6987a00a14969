//! End-to-end controller flows against an in-memory incident source.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::json;
use threatcanvas::client::{IncidentSource, QueryError, QueryFilters};
use threatcanvas::dashboard::{
    ControllerSettings, DashboardController, IngestOutcome, LoadOutcome, LoadPhase, SharedDashboard,
    ToastLevel, ToastLog,
};
use threatcanvas::incident::{EventType, GeoIncident, Severity, MAX_SAMPLES};
use threatcanvas::render::MapLayer;
use threatcanvas::stats::animator::{STAT_FAILED, STAT_TOTAL};

/// Serves whatever was last scripted and records the filters it was asked for.
#[derive(Default)]
struct ScriptedSource {
    next: Mutex<Option<Result<Vec<GeoIncident>, u16>>>,
    seen: Mutex<Vec<QueryFilters>>,
}

impl ScriptedSource {
    fn respond(&self, incidents: Vec<GeoIncident>) {
        *self.next.lock().unwrap() = Some(Ok(incidents));
    }

    fn fail(&self, status: u16) {
        *self.next.lock().unwrap() = Some(Err(status));
    }
}

#[async_trait::async_trait]
impl IncidentSource for ScriptedSource {
    async fn fetch_incidents(&self, filters: &QueryFilters) -> Result<Vec<GeoIncident>, QueryError> {
        self.seen.lock().unwrap().push(filters.clone());
        match self.next.lock().unwrap().clone() {
            Some(Ok(list)) => Ok(list),
            Some(Err(status)) => Err(QueryError::Status { status }),
            None => Ok(Vec::new()),
        }
    }
}

fn record(value: serde_json::Value) -> GeoIncident {
    serde_json::from_value(value).unwrap()
}

fn backend_snapshot() -> Vec<GeoIncident> {
    vec![
        record(json!({
            "ip": "45.155.205.1",
            "geo": {"lat": 52.37, "lon": 4.89, "country": "Netherlands", "countryCode": "NL", "city": "Amsterdam"},
            "types": ["failed_login", "invalid_user"],
            "count": 42,
            "samples": ["2025-10-28T10:15:23Z", "2025-10-28T10:14:00Z"],
            "last_seen": "2025-10-28T10:15:23Z"
        })),
        record(json!({
            "ip": "103.99.0.7",
            "geo": {"lat": 21.03, "lon": 105.85, "country": "Vietnam", "countryCode": "VN", "city": null},
            "types": ["break_in_attempt"],
            "count": 3,
            "samples": ["2025-10-28 09:00:00"],
            "last_seen": "2025-10-28 09:00:00"
        })),
        record(json!({
            "ip": "198.51.100.4",
            "geo": {"lat": 0.0, "lon": 0.0, "country": "", "countryCode": ""},
            "types": ["accepted_login"],
            "count": 1,
            "samples": [],
            "last_seen": "2025-10-28T08:00:00Z"
        })),
    ]
}

fn build(source: Arc<ScriptedSource>) -> (SharedDashboard, Arc<ToastLog>) {
    let toasts = Arc::new(ToastLog::default());
    let controller = DashboardController::new(ControllerSettings::default(), source, toasts.clone());
    (SharedDashboard::new(controller), toasts)
}

#[tokio::test]
async fn test_snapshot_then_live_folds() {
    let source = Arc::new(ScriptedSource::default());
    source.respond(backend_snapshot());
    let (dash, toasts) = build(source.clone());

    assert_eq!(dash.refresh().await, LoadOutcome::Applied { incidents: 3 });
    {
        let c = dash.lock().await;
        assert_eq!(c.phase(), LoadPhase::Ready);
        assert_eq!(c.renderer().marker_count(), 2);
        assert!(c.renderer().marker("198.51.100.4").is_none());
        assert_eq!(c.stats().total, 46);
        assert_eq!(c.stats().countries, 2);
        assert_eq!(c.stats().failed_total, 42);
        assert_eq!(c.top_attackers()[0].ip, "45.155.205.1");
        assert_eq!(
            c.incident("103.99.0.7").unwrap().geo.label(),
            ", Vietnam"
        );
    }

    let before = dash.lock().await.renderer().view();
    for status in ["failed_login", "failed_login", "break_in_attempt"] {
        let outcome = dash
            .ingest_live(&json!({
                "ip": "1.2.3.4",
                "status": status,
                "geo": {"lat": -33.87, "lon": 151.21, "country": "Australia", "city": "Sydney"},
                "timestamp": "2025-10-28T11:00:00Z"
            }))
            .await;
        assert!(matches!(outcome, IngestOutcome::Folded { mapped: true, .. }));
    }

    let c = dash.lock().await;
    let incident = c.incident("1.2.3.4").unwrap();
    assert_eq!(incident.count, 3);
    assert_eq!(
        incident.types,
        BTreeSet::from([EventType::FailedLogin, EventType::BreakInAttempt])
    );
    assert_eq!(incident.severity(), Severity::Critical);
    assert!(incident.samples.len() <= MAX_SAMPLES);
    assert_eq!(c.renderer().view(), before);
    assert_eq!(c.stats().total, 49);
    assert_eq!(c.stats().unique_ips, 4);
    assert!(toasts.all().is_empty());

    // the first request used the configured default filters
    assert_eq!(source.seen.lock().unwrap()[0], QueryFilters::default());
}

#[tokio::test]
async fn test_snapshot_replaces_live_state() {
    let source = Arc::new(ScriptedSource::default());
    let (dash, _) = build(source.clone());

    dash.ingest_text(r#"{"ip": "5.6.7.8", "status": "failed_login"}"#).await;
    assert!(dash.lock().await.incident("5.6.7.8").is_some());

    source.respond(backend_snapshot());
    dash.refresh().await;
    let c = dash.lock().await;
    assert!(c.incident("5.6.7.8").is_none());
    assert_eq!(c.incidents().len(), 3);
}

#[tokio::test]
async fn test_failure_retains_data_and_notifies() {
    let source = Arc::new(ScriptedSource::default());
    source.respond(backend_snapshot());
    let (dash, toasts) = build(source.clone());
    dash.refresh().await;

    source.fail(502);
    assert_eq!(dash.refresh().await, LoadOutcome::Failed);

    let c = dash.lock().await;
    assert_eq!(c.generation(), 2);
    assert_eq!(c.incidents().len(), 3);
    assert_eq!(c.phase(), LoadPhase::Ready);
    let shown = toasts.active(chrono::Utc::now());
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].level, ToastLevel::Error);
    assert!(shown[0].message.starts_with("Failed to load data"));
}

#[tokio::test]
async fn test_filter_change_requests_new_filters() {
    let source = Arc::new(ScriptedSource::default());
    let (dash, _) = build(source.clone());

    let filters = QueryFilters {
        since: "7d".to_string(),
        types: BTreeSet::from([EventType::InvalidUser]),
        search: "Amsterdam".to_string(),
        limit: Some(50),
    };
    dash.apply_filters(filters.clone()).await;
    assert_eq!(source.seen.lock().unwrap().last(), Some(&filters));
    assert_eq!(dash.lock().await.filters(), &filters);
}

#[tokio::test]
async fn test_clustering_toggle_restores_markers() {
    let source = Arc::new(ScriptedSource::default());
    source.respond(backend_snapshot());
    let (dash, _) = build(source);
    dash.refresh().await;

    let mut c = dash.lock().await;
    let before: Vec<_> = c.renderer().markers().cloned().collect();
    assert!(!c.set_clustering(false));
    let flat = c.renderer().layers();
    assert!(flat.iter().all(|l| matches!(l, MapLayer::Marker(_))));
    assert!(c.set_clustering(true));
    let after: Vec<_> = c.renderer().markers().cloned().collect();
    assert_eq!(before, after);
}

#[tokio::test(start_paused = true)]
async fn test_counters_settle_on_stats() {
    let source = Arc::new(ScriptedSource::default());
    source.respond(backend_snapshot());
    let (dash, _) = build(source);
    dash.refresh().await;

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    let counters = dash.lock().await.displayed_counters();
    assert_eq!(counters[STAT_TOTAL], 46);
    assert_eq!(counters[STAT_FAILED], 42);
}

#[test]
fn test_independent_controllers_do_not_share_state() {
    tokio_test::block_on(async {
        let a = build(Arc::new(ScriptedSource::default())).0;
        let b = build(Arc::new(ScriptedSource::default())).0;
        a.ingest_text(r#"{"ip": "9.9.9.9", "status": "invalid_user"}"#).await;
        assert!(a.lock().await.incident("9.9.9.9").is_some());
        assert!(b.lock().await.incident("9.9.9.9").is_none());
    });
}
