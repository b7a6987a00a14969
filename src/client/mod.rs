//! Bulk query API of the backend collector.
//!
//! The dashboard talks to the backend only through [`IncidentSource`], so a
//! controller can be driven by the HTTP client in production and by an
//! in-memory source in tests.

pub mod http;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::incident::{AttackerRank, EventType, GeoIncident};

pub use self::http::HttpIncidentSource;

/// A failed bulk fetch.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP {status}")]
    Status { status: u16 },
    #[error("{0}")]
    Api(String),
    #[error("response carried no data")]
    MissingData,
    #[error("{0} query is not supported by this source")]
    Unsupported(&'static str),
}

/// Active filters of the incident query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Time window such as `1h`, `24h`, `7d`, or an ISO timestamp.
    pub since: String,
    pub types: BTreeSet<EventType>,
    pub search: String,
    pub limit: Option<u32>,
}

impl Default for QueryFilters {
    fn default() -> Self {
        Self {
            since: "24h".to_string(),
            types: EventType::KNOWN.into_iter().collect(),
            search: String::new(),
            limit: Some(1000),
        }
    }
}

impl QueryFilters {
    /// Query-string pairs, omitting empty filters.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if !self.since.is_empty() {
            pairs.push(("since", self.since.clone()));
        }
        if !self.types.is_empty() {
            let joined = self.types.iter().map(EventType::as_str).collect::<Vec<_>>().join(",");
            pairs.push(("types", joined));
        }
        let search = self.search.trim();
        if !search.is_empty() {
            pairs.push(("q", search.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// `{success, data?, error?}` wrapper used by every backend endpoint.
/// Anything short of `"success": true` is a failure.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Result<T, QueryError> {
        if !self.success {
            return Err(QueryError::Api(
                self.error.unwrap_or_else(|| "Unknown API error".to_string()),
            ));
        }
        self.data.ok_or(QueryError::MissingData)
    }
}

/// One bucket of the timeline query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    #[serde(alias = "time", alias = "timestamp")]
    pub bucket: String,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{}' (expected csv or json)", other)),
        }
    }
}

/// Build the server-side export URL of the top-N attacker list.
pub fn export_url(base_url: &str, format: ExportFormat, limit: usize) -> String {
    format!("{}/api/top?format={}&limit={}", base_url.trim_end_matches('/'), format, limit)
}

/// Source of bulk incident data.
#[async_trait::async_trait]
pub trait IncidentSource: Send + Sync {
    /// Full filtered incident list.
    async fn fetch_incidents(&self, filters: &QueryFilters) -> Result<Vec<GeoIncident>, QueryError>;

    async fn fetch_top_attackers(&self, _limit: usize) -> Result<Vec<AttackerRank>, QueryError> {
        Err(QueryError::Unsupported("top attackers"))
    }

    async fn fetch_timeline(
        &self,
        _since: &str,
        _interval: &str,
    ) -> Result<Vec<TimelineBucket>, QueryError> {
        Err(QueryError::Unsupported("timeline"))
    }

    async fn fetch_stats(&self) -> Result<serde_json::Value, QueryError> {
        Err(QueryError::Unsupported("stats"))
    }

    fn export_url(&self, format: ExportFormat, limit: usize) -> String {
        export_url("", format, limit)
    }
}
