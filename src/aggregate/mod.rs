//! Canonical per-IP incident set, merged from bulk snapshots and live events.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::incident::{AttackerRank, GeoIncident};
use crate::live::LiveEvent;

/// Result of folding one live event.
#[derive(Debug)]
pub struct FoldOutcome<'a> {
    pub incident: &'a GeoIncident,
    /// The IP had not been seen before.
    pub created: bool,
    /// The event supplied the first usable location for an existing IP.
    pub relocated: bool,
}

/// Holds exactly one [`GeoIncident`] per source IP.
#[derive(Debug, Default)]
pub struct Aggregator {
    incidents: HashMap<String, GeoIncident>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with a bulk query result.
    ///
    /// IPs missing from `snapshot` are dropped. A repeated IP keeps the later
    /// record.
    pub fn load_snapshot(&mut self, snapshot: Vec<GeoIncident>) {
        let mut incidents = HashMap::with_capacity(snapshot.len());
        for mut incident in snapshot {
            incident.normalize();
            if let Some(previous) = incidents.insert(incident.ip.clone(), incident) {
                warn!(ip = %previous.ip, "duplicate IP in snapshot, keeping the later record");
            }
        }
        debug!(replaced = self.incidents.len(), loaded = incidents.len(), "snapshot loaded");
        self.incidents = incidents;
    }

    /// Merge one live event into the set.
    pub fn fold_event(&mut self, event: &LiveEvent) -> FoldOutcome<'_> {
        let mut created = false;
        let mut relocated = false;

        let incident = self
            .incidents
            .entry(event.ip.clone())
            .and_modify(|incident| {
                incident.count += 1;
                incident.types.insert(event.status.clone());
                incident.push_sample(event.timestamp);
                if incident.geo.lat.is_none() {
                    if let Some(geo) = &event.geo {
                        incident.geo = geo.clone();
                        relocated = incident.geo.position().is_some();
                    }
                }
            })
            .or_insert_with(|| {
                created = true;
                GeoIncident::first_sighting(
                    event.ip.clone(),
                    event.status.clone(),
                    event.geo.clone(),
                    event.timestamp,
                )
            });

        FoldOutcome {
            incident,
            created,
            relocated,
        }
    }

    pub fn get(&self, ip: &str) -> Option<&GeoIncident> {
        self.incidents.get(ip)
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeoIncident> {
        self.incidents.values()
    }

    /// Incidents ordered for display: most events first, then by IP.
    pub fn sorted(&self) -> Vec<&GeoIncident> {
        let mut list: Vec<&GeoIncident> = self.incidents.values().collect();
        list.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
        list
    }

    /// Ranked attacker list, ties broken by ascending IP.
    pub fn top_attackers(&self, limit: usize) -> Vec<AttackerRank> {
        self.sorted()
            .into_iter()
            .take(limit)
            .map(|incident| AttackerRank {
                ip: incident.ip.clone(),
                count: incident.count,
                country: incident.geo.country.clone(),
            })
            .collect()
    }
}
