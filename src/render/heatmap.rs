//! Density overlay weighted by per-incident event count.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::projection::{project, unproject, Point};
use crate::incident::LatLng;

/// Weight of one incident: `min(count / 10, 1.0)`, so a handful of very
/// noisy IPs cannot wash out the gradient.
pub fn heat_weight(count: u64) -> f64 {
    (count as f64 / 10.0).min(1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapOptions {
    pub radius: f64,
    pub blur: f64,
    pub max_zoom: u8,
    pub max: f64,
    pub gradient: Vec<(f64, &'static str)>,
}

impl Default for HeatmapOptions {
    fn default() -> Self {
        Self {
            radius: 25.0,
            blur: 35.0,
            max_zoom: 10,
            max: 1.0,
            gradient: vec![
                (0.0, "#2ed573"),
                (0.3, "#ffd32a"),
                (0.6, "#ffa502"),
                (1.0, "#ff4757"),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lon: f64,
    pub weight: f64,
}

/// One bin of the intensity grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatCell {
    pub center: LatLng,
    pub intensity: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HeatLayer {
    pub options: HeatmapOptions,
    #[serde(serialize_with = "points_as_list")]
    points: BTreeMap<String, HeatPoint>,
}

fn points_as_list<S>(points: &BTreeMap<String, HeatPoint>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(points.values())
}

impl HeatLayer {
    pub fn new(options: HeatmapOptions) -> Self {
        Self {
            options,
            points: BTreeMap::new(),
        }
    }

    pub fn upsert(&mut self, ip: &str, pos: LatLng, count: u64) {
        self.points.insert(
            ip.to_string(),
            HeatPoint {
                lat: pos.lat,
                lon: pos.lon,
                weight: heat_weight(count),
            },
        );
    }

    pub fn remove(&mut self, ip: &str) {
        self.points.remove(ip);
    }

    pub fn points(&self) -> impl Iterator<Item = &HeatPoint> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bin the points into `radius`-sized pixel cells at `zoom`.
    ///
    /// Below `max_zoom` each point is dimmed by a factor of two per zoom level
    /// (at most 12 levels), and every cell is capped at `max`.
    pub fn intensity_grid(&self, zoom: u8) -> Vec<HeatCell> {
        let cell = self.options.radius.max(1.0);
        let levels = i32::from(self.options.max_zoom.saturating_sub(zoom)).min(12);
        let scale = 1.0 / 2f64.powi(levels);

        let mut bins: HashMap<(i64, i64), (f64, f64, f64)> = HashMap::new();
        for point in self.points.values() {
            let p = project(LatLng::new(point.lat, point.lon), zoom);
            let key = ((p.x / cell).floor() as i64, (p.y / cell).floor() as i64);
            let w = point.weight * scale;
            let bin = bins.entry(key).or_insert((0.0, 0.0, 0.0));
            bin.0 += p.x * w;
            bin.1 += p.y * w;
            bin.2 += w;
        }

        let mut cells: Vec<HeatCell> = bins
            .into_iter()
            .filter(|(_, (_, _, w))| *w > 0.0)
            .map(|(_, (sx, sy, w))| HeatCell {
                center: unproject(Point { x: sx / w, y: sy / w }, zoom),
                intensity: w.min(self.options.max),
            })
            .collect();
        cells.sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        cells
    }
}
