//! Aggregate counters derived from the incident set.

pub mod animator;

use std::collections::HashSet;

use serde::Serialize;

use crate::incident::{EventType, GeoIncident};

pub use self::animator::{AnimationSettings, StatsAnimator};

/// Headline numbers shown above the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    /// Sum of event counts.
    pub total: u64,
    pub unique_ips: u64,
    /// Distinct non-empty country names.
    pub countries: u64,
    /// Sum of event counts over incidents with at least one failed login.
    pub failed_total: u64,
}

pub fn compute_stats<'a, I>(incidents: I) -> DashboardStats
where
    I: IntoIterator<Item = &'a GeoIncident>,
{
    let mut stats = DashboardStats::default();
    let mut countries: HashSet<&str> = HashSet::new();

    for incident in incidents {
        stats.total += incident.count;
        stats.unique_ips += 1;
        if !incident.geo.country.is_empty() {
            countries.insert(incident.geo.country.as_str());
        }
        if incident.has_type(&EventType::FailedLogin) {
            stats.failed_total += incident.count;
        }
    }

    stats.countries = countries.len() as u64;
    stats
}
