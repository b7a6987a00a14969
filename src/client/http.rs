use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    export_url, Envelope, ExportFormat, IncidentSource, QueryError, QueryFilters, TimelineBucket,
};
use crate::incident::{AttackerRank, GeoIncident};

/// reqwest-backed [`IncidentSource`] for the collector's `/api/*` endpoints.
#[derive(Debug, Clone)]
pub struct HttpIncidentSource {
    client: Client,
    base_url: String,
}

impl HttpIncidentSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QueryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T, Q>(&self, path: &str, query: &Q) -> Result<T, QueryError>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        debug!(%url, status = status.as_u16(), "backend query");
        if !status.is_success() {
            return Err(QueryError::Status {
                status: status.as_u16(),
            });
        }
        response.json::<Envelope<T>>().await?.into_result()
    }
}

#[async_trait::async_trait]
impl IncidentSource for HttpIncidentSource {
    async fn fetch_incidents(&self, filters: &QueryFilters) -> Result<Vec<GeoIncident>, QueryError> {
        self.get_json("/api/incidents", &filters.query_pairs()).await
    }

    async fn fetch_top_attackers(&self, limit: usize) -> Result<Vec<AttackerRank>, QueryError> {
        self.get_json("/api/top", &[("limit", limit.to_string())]).await
    }

    async fn fetch_timeline(&self, since: &str, interval: &str) -> Result<Vec<TimelineBucket>, QueryError> {
        self.get_json("/api/timeline", &[("since", since), ("interval", interval)])
            .await
    }

    async fn fetch_stats(&self) -> Result<serde_json::Value, QueryError> {
        self.get_json("/api/stats", &[] as &[(&str, &str)]).await
    }

    fn export_url(&self, format: ExportFormat, limit: usize) -> String {
        export_url(&self.base_url, format, limit)
    }
}
