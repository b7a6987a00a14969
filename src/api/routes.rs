//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::state::AppState;
use crate::client::{ExportFormat, QueryFilters};
use crate::dashboard::Toast;
use crate::incident::EventType;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/dashboard", get(dashboard))
        .route("/map", get(map))
        .route("/map/clustering", post(set_clustering))
        .route("/map/heatmap", post(set_heatmap))
        .route("/map/fit", post(fit_to_data))
        .route("/map/focus/{ip}", post(focus))
        .route("/incidents", get(list_incidents))
        .route("/incidents/{ip}", get(incident_detail))
        .route("/attackers", get(top_attackers))
        .route("/notifications", get(notifications))
        .route("/filters", post(set_filters))
        .route("/refresh", post(refresh))
        .route("/events", post(ingest_event))
        .route("/auto-refresh", post(set_auto_refresh))
        .route("/export", get(export_json))
        .route("/export/url", get(export_url))
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.into() })))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn dashboard(State(state): State<AppState>) -> Json<Value> {
    let auto_refresh = state.dashboard.auto_refresh_enabled();
    let c = state.dashboard.lock().await;
    Json(json!({
        "data": {
            "phase": c.phase(),
            "stats": c.stats(),
            "counters": c.displayed_counters(),
            "filters": c.filters(),
            "metrics": c.metrics(),
            "clustering": c.renderer().clustering_enabled(),
            "heatmap": c.renderer().heatmap_enabled(),
            "auto_refresh": auto_refresh,
            "last_error": c.last_error(),
        },
        "meta": { "generation": c.generation() }
    }))
}

async fn map(State(state): State<AppState>) -> Json<Value> {
    let c = state.dashboard.lock().await;
    let renderer = c.renderer();
    Json(json!({
        "data": {
            "view": renderer.view(),
            "layers": renderer.layers(),
            "heat": renderer.heat_layer(),
            "popup": renderer.open_popup(),
        },
        "meta": { "markers": renderer.marker_count() }
    }))
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

async fn set_clustering(State(state): State<AppState>, Json(req): Json<ToggleRequest>) -> Json<Value> {
    let enabled = state.dashboard.lock().await.set_clustering(req.enabled);
    Json(json!({ "data": { "clustering": enabled } }))
}

async fn set_heatmap(State(state): State<AppState>, Json(req): Json<ToggleRequest>) -> Json<Value> {
    let enabled = state.dashboard.lock().await.set_heatmap(req.enabled);
    Json(json!({ "data": { "heatmap": enabled } }))
}

async fn fit_to_data(State(state): State<AppState>) -> Json<Value> {
    let mut c = state.dashboard.lock().await;
    let fitted = c.fit_to_data();
    Json(json!({ "data": { "fitted": fitted, "view": c.renderer().view() } }))
}

async fn focus(State(state): State<AppState>, Path(ip): Path<String>) -> ApiResult {
    let mut c = state.dashboard.lock().await;
    if !c.focus(&ip) {
        return Err(error(StatusCode::NOT_FOUND, format!("no mapped incident for {}", ip)));
    }
    Ok(Json(json!({
        "data": {
            "view": c.renderer().view(),
            "detail": c.selected_detail(),
        }
    })))
}

async fn list_incidents(State(state): State<AppState>) -> Json<Value> {
    let c = state.dashboard.lock().await;
    let incidents = c.incidents();
    Json(json!({ "data": incidents, "meta": { "total": incidents.len() } }))
}

async fn incident_detail(State(state): State<AppState>, Path(ip): Path<String>) -> ApiResult {
    let c = state.dashboard.lock().await;
    match c.incident(&ip) {
        Some(incident) => Ok(Json(json!({ "data": incident.detail() }))),
        None => Err(error(StatusCode::NOT_FOUND, format!("unknown ip {}", ip))),
    }
}

async fn top_attackers(State(state): State<AppState>) -> Json<Value> {
    let c = state.dashboard.lock().await;
    let ranks = c.top_attackers();
    Json(json!({ "data": ranks, "meta": { "total": ranks.len() } }))
}

async fn notifications(State(state): State<AppState>) -> Json<Value> {
    let active = state.toasts.active(chrono::Utc::now());
    Json(json!({ "data": active, "meta": { "total": active.len() } }))
}

/// Partial filter update; omitted fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterRequest {
    since: Option<String>,
    types: Option<Vec<String>>,
    search: Option<String>,
    limit: Option<u32>,
}

impl FilterRequest {
    fn merge_into(self, mut filters: QueryFilters) -> QueryFilters {
        if let Some(since) = self.since {
            filters.since = since;
        }
        if let Some(types) = self.types {
            filters.types = types.iter().map(|t| EventType::from(t.as_str())).collect();
        }
        if let Some(search) = self.search {
            filters.search = search;
        }
        if self.limit.is_some() {
            filters.limit = self.limit;
        }
        filters
    }
}

async fn set_filters(State(state): State<AppState>, Json(req): Json<FilterRequest>) -> Json<Value> {
    let current = state.dashboard.lock().await.filters().clone();
    let filters = req.merge_into(current);
    info!(since = %filters.since, types = filters.types.len(), "filters changed");
    let outcome = state.dashboard.apply_filters(filters.clone()).await;
    Json(json!({ "data": { "outcome": outcome, "filters": filters } }))
}

async fn refresh(State(state): State<AppState>) -> Json<Value> {
    let outcome = state.dashboard.refresh().await;
    Json(json!({ "data": { "outcome": outcome } }))
}

async fn ingest_event(State(state): State<AppState>, body: String) -> (StatusCode, Json<Value>) {
    let outcome = state.dashboard.ingest_text(&body).await;
    (StatusCode::ACCEPTED, Json(json!({ "data": outcome })))
}

async fn set_auto_refresh(State(state): State<AppState>, Json(req): Json<ToggleRequest>) -> Json<Value> {
    let enabled = state.dashboard.set_auto_refresh(req.enabled);
    Json(json!({ "data": { "auto_refresh": enabled } }))
}

async fn export_json(State(state): State<AppState>) -> ApiResult {
    let c = state.dashboard.lock().await;
    let exported = c
        .export_json()
        .and_then(|text| serde_json::from_str::<Value>(&text))
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    c.notifier().notify(Toast::success("JSON export ready"));
    Ok(Json(json!({
        "data": exported,
        "meta": { "exported_at": chrono::Utc::now().to_rfc3339() }
    })))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
    limit: Option<usize>,
}

async fn export_url(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> ApiResult {
    let format = match query.format.as_deref() {
        Some(raw) => raw
            .parse::<ExportFormat>()
            .map_err(|e| error(StatusCode::BAD_REQUEST, e))?,
        None => ExportFormat::Csv,
    };
    let limit = query.limit.unwrap_or(100);
    let url = state.dashboard.lock().await.export_url(format, limit);
    Ok(Json(json!({ "data": { "url": url, "format": format, "limit": limit } })))
}
