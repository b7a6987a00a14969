//! Greedy proximity clustering in projected pixel space.
//!
//! Each marker joins the nearest existing cluster whose centroid lies within
//! the radius at the current zoom, otherwise it starts a new cluster. Cluster
//! centroids are indexed in a uniform grid with cell size equal to the radius,
//! so a lookup only inspects the 3x3 neighbourhood and insertion is O(1)
//! amortized.

use std::collections::HashMap;

use serde::Serialize;

use super::projection::{project, unproject, Point};
use crate::incident::LatLng;

/// Display size class of a cluster icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterSize {
    Small,
    Medium,
    Large,
}

impl ClusterSize {
    pub fn for_count(count: usize) -> Self {
        if count > 100 {
            ClusterSize::Large
        } else if count > 20 {
            ClusterSize::Medium
        } else {
            ClusterSize::Small
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cluster {
    sum_x: f64,
    sum_y: f64,
    cell: (i64, i64),
    members: Vec<String>,
}

impl Cluster {
    fn centroid(&self) -> Point {
        let n = self.members.len() as f64;
        Point {
            x: self.sum_x / n,
            y: self.sum_y / n,
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterIndex {
    zoom: u8,
    radius: f64,
    clusters: Vec<Cluster>,
    grid: HashMap<(i64, i64), Vec<usize>>,
}

impl ClusterIndex {
    pub fn new(zoom: u8, radius: f64) -> Self {
        Self {
            zoom,
            radius: radius.max(1.0),
            clusters: Vec::new(),
            grid: HashMap::new(),
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    fn cell_of(&self, p: Point) -> (i64, i64) {
        ((p.x / self.radius).floor() as i64, (p.y / self.radius).floor() as i64)
    }

    fn nearest_within_radius(&self, p: Point) -> Option<usize> {
        let (cx, cy) = self.cell_of(p);
        let mut best: Option<(usize, f64)> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(ids) = self.grid.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &id in ids {
                    let d = self.clusters[id].centroid().distance(p);
                    if d <= self.radius && best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((id, d));
                    }
                }
            }
        }
        best.map(|(id, _)| id)
    }

    /// Place one marker.
    pub fn insert(&mut self, ip: &str, pos: LatLng) {
        let p = project(pos, self.zoom);
        match self.nearest_within_radius(p) {
            Some(id) => {
                let old_cell = self.clusters[id].cell;
                let cluster = &mut self.clusters[id];
                cluster.sum_x += p.x;
                cluster.sum_y += p.y;
                cluster.members.push(ip.to_string());
                let new_cell = self.cell_of(self.clusters[id].centroid());
                if new_cell != old_cell {
                    if let Some(ids) = self.grid.get_mut(&old_cell) {
                        ids.retain(|&other| other != id);
                    }
                    self.grid.entry(new_cell).or_default().push(id);
                    self.clusters[id].cell = new_cell;
                }
            }
            None => {
                let id = self.clusters.len();
                let cell = self.cell_of(p);
                self.clusters.push(Cluster {
                    sum_x: p.x,
                    sum_y: p.y,
                    cell,
                    members: vec![ip.to_string()],
                });
                self.grid.entry(cell).or_default().push(id);
            }
        }
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn center_of(&self, cluster: &Cluster) -> LatLng {
        unproject(cluster.centroid(), self.zoom)
    }

    /// Total markers placed.
    pub fn member_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }
}
