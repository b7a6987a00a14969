//! Per-IP incident model and severity classification.

pub mod event;
pub mod severity;
pub mod timestamp;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub use self::event::EventType;
pub use self::severity::{classify, Severity};

/// Number of recent timestamps kept per incident for the detail view.
pub const MAX_SAMPLES: usize = 5;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

impl LatLng {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Last-known location of a source IP, as supplied by the collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoLocation {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(deserialize_with = "null_as_empty")]
    pub country: String,
    #[serde(rename = "countryCode", alias = "country_code", deserialize_with = "null_as_empty")]
    pub country_code: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub city: String,
    pub org: Option<String>,
    pub isp: Option<String>,
}

impl GeoLocation {
    /// Map position, or `None` when the location is unusable for placement:
    /// missing coordinates, the `(0, 0)` placeholder, or non-finite values.
    pub fn position(&self) -> Option<LatLng> {
        let (lat, lon) = (self.lat?, self.lon?);
        if !lat.is_finite() || !lon.is_finite() || (lat == 0.0 && lon == 0.0) {
            return None;
        }
        Some(LatLng::new(lat, lon))
    }

    /// `"city, country"` as shown in popups.
    pub fn label(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }
}

/// Aggregated activity of one source IP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoIncident {
    pub ip: String,
    #[serde(default)]
    pub geo: GeoLocation,
    #[serde(default)]
    pub types: BTreeSet<EventType>,
    #[serde(default)]
    pub count: u64,
    /// Newest first, at most [`MAX_SAMPLES`].
    #[serde(default, deserialize_with = "timestamp::deserialize_list")]
    pub samples: Vec<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    pub last_seen: DateTime<Utc>,
}

impl GeoIncident {
    /// First sighting of an IP.
    pub fn first_sighting(
        ip: impl Into<String>,
        status: EventType,
        geo: Option<GeoLocation>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            ip: ip.into(),
            geo: geo.unwrap_or_default(),
            types: BTreeSet::from([status]),
            count: 1,
            samples: vec![timestamp],
            last_seen: timestamp,
        }
    }

    pub fn position(&self) -> Option<LatLng> {
        self.geo.position()
    }

    pub fn severity(&self) -> Severity {
        classify(self)
    }

    pub fn has_type(&self, tag: &EventType) -> bool {
        self.types.contains(tag)
    }

    /// Record a timestamp, keeping samples newest-first and bounded.
    pub fn push_sample(&mut self, timestamp: DateTime<Utc>) {
        // in-order delivery always lands at index 0
        let at = self.samples.partition_point(|s| *s > timestamp);
        self.samples.insert(at, timestamp);
        self.samples.truncate(MAX_SAMPLES);
        if timestamp > self.last_seen {
            self.last_seen = timestamp;
        }
    }

    /// Repair a record received from the bulk API so the local invariants hold.
    pub fn normalize(&mut self) {
        self.samples.sort_by(|a, b| b.cmp(a));
        self.samples.truncate(MAX_SAMPLES);
        if let Some(newest) = self.samples.first() {
            if *newest > self.last_seen {
                self.last_seen = *newest;
            }
        }
    }

    /// Sorted, comma-joined type tags.
    pub fn types_label(&self) -> String {
        self.types.iter().map(EventType::as_str).collect::<Vec<_>>().join(", ")
    }

    pub fn detail(&self) -> IncidentDetail {
        IncidentDetail {
            ip: self.ip.clone(),
            count: self.count,
            location: self.geo.label(),
            country_code: self.geo.country_code.clone(),
            org: self.geo.org.clone().unwrap_or_else(|| "Unknown".to_string()),
            isp: self.geo.isp.clone().unwrap_or_else(|| "Unknown".to_string()),
            types: self.types.iter().map(|t| t.as_str().to_string()).collect(),
            last_seen: self.last_seen,
            samples: self.samples.clone(),
            severity: self.severity(),
        }
    }
}

/// Detail-view projection of an incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentDetail {
    pub ip: String,
    pub count: u64,
    pub location: String,
    pub country_code: String,
    pub org: String,
    pub isp: String,
    pub types: Vec<String>,
    pub last_seen: DateTime<Utc>,
    pub samples: Vec<DateTime<Utc>>,
    pub severity: Severity,
}

/// One row of the ranked attacker list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackerRank {
    pub ip: String,
    pub count: u64,
    #[serde(default)]
    pub country: String,
}
