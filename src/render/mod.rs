//! Library-neutral map rendering state.
//!
//! [`SpatialRenderer`] keeps markers, proximity clusters, the heat layer and
//! the view in sync with the incident set. It does not draw anything: a
//! front-end reads [`SpatialRenderer::layers`], [`SpatialRenderer::heat_layer`]
//! and [`SpatialRenderer::view`] and paints them with whatever map library it
//! uses.

pub mod cluster;
pub mod heatmap;
pub mod projection;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use self::cluster::{ClusterIndex, ClusterSize};
use self::heatmap::{HeatLayer, HeatmapOptions};
use self::projection::{project, unproject, GeoBounds, Point};
use crate::incident::{classify, GeoIncident, LatLng, Severity};

/// Invoked with the IP of a clicked marker.
pub type SelectHandler = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub cluster_radius_px: f64,
    pub fit_padding_px: f64,
    pub focus_zoom: u8,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub initial_center: LatLng,
    pub initial_zoom: u8,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub clustering: bool,
    pub heatmap: bool,
    pub heatmap_options: HeatmapOptions,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            cluster_radius_px: 80.0,
            fit_padding_px: 50.0,
            focus_zoom: 8,
            min_zoom: 2,
            max_zoom: 18,
            initial_center: LatLng::new(20.0, 0.0),
            initial_zoom: 2,
            viewport_width: 1280,
            viewport_height: 720,
            clustering: true,
            heatmap: false,
            heatmap_options: HeatmapOptions::default(),
        }
    }
}

/// Current viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MapView {
    pub center: LatLng,
    pub zoom: u8,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerPopup {
    pub ip: String,
    pub location: String,
    pub count: u64,
    pub types: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub ip: String,
    pub position: LatLng,
    pub severity: Severity,
    pub color: &'static str,
    pub popup: MarkerPopup,
}

impl Marker {
    fn from_incident(incident: &GeoIncident, position: LatLng) -> Self {
        let severity = classify(incident);
        Self {
            ip: incident.ip.clone(),
            position,
            severity,
            color: severity.color(),
            popup: MarkerPopup {
                ip: incident.ip.clone(),
                location: incident.geo.label(),
                count: incident.count,
                types: incident.types_label(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterView {
    pub center: LatLng,
    pub count: usize,
    pub size: ClusterSize,
    pub members: Vec<String>,
}

/// One drawable item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MapLayer {
    Marker(Marker),
    Cluster(ClusterView),
}

/// What [`SpatialRenderer::add_or_update_marker`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerChange {
    Added,
    Updated,
    Removed,
    Skipped,
}

pub struct SpatialRenderer {
    settings: RendererSettings,
    view: MapView,
    markers: BTreeMap<String, Marker>,
    /// Placement sequence per marker. Rebuilds replay markers in this order
    /// so greedy clustering groups them the same way every time.
    arrival: HashMap<String, u64>,
    next_arrival: u64,
    clustering_enabled: bool,
    heatmap_enabled: bool,
    clusters: Option<ClusterIndex>,
    heat: Option<HeatLayer>,
    open_popup: Option<String>,
    on_select: Option<SelectHandler>,
}

impl std::fmt::Debug for SpatialRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialRenderer")
            .field("view", &self.view)
            .field("markers", &self.markers.len())
            .field("clustering_enabled", &self.clustering_enabled)
            .field("heatmap_enabled", &self.heatmap_enabled)
            .finish()
    }
}

impl SpatialRenderer {
    pub fn new(settings: RendererSettings) -> Self {
        let view = MapView {
            center: settings.initial_center,
            zoom: settings.initial_zoom.clamp(settings.min_zoom, settings.max_zoom),
            width: settings.viewport_width,
            height: settings.viewport_height,
        };
        let mut renderer = Self {
            clustering_enabled: settings.clustering,
            heatmap_enabled: settings.heatmap,
            settings,
            view,
            markers: BTreeMap::new(),
            arrival: HashMap::new(),
            next_arrival: 0,
            clusters: None,
            heat: None,
            open_popup: None,
            on_select: None,
        };
        renderer.rebuild_clusters();
        renderer.rebuild_heat();
        renderer
    }

    /// Full rebuild from `incidents`. Unlocated incidents get no marker.
    pub fn render<'a, I>(&mut self, incidents: I, on_select: SelectHandler)
    where
        I: IntoIterator<Item = &'a GeoIncident>,
    {
        self.markers.clear();
        self.arrival.clear();
        self.next_arrival = 0;
        for incident in incidents {
            if let Some(position) = incident.position() {
                self.markers
                    .insert(incident.ip.clone(), Marker::from_incident(incident, position));
                self.record_arrival(&incident.ip);
            }
        }
        self.on_select = Some(on_select);
        if let Some(ip) = &self.open_popup {
            if !self.markers.contains_key(ip) {
                self.open_popup = None;
            }
        }
        self.rebuild_clusters();
        self.rebuild_heat();
        debug!(markers = self.markers.len(), "map rendered");
    }

    /// Incremental path for a single incident.
    pub fn add_or_update_marker(&mut self, incident: &GeoIncident) -> MarkerChange {
        let Some(position) = incident.position() else {
            if self.markers.remove(&incident.ip).is_some() {
                self.arrival.remove(&incident.ip);
                if let Some(heat) = self.heat.as_mut() {
                    heat.remove(&incident.ip);
                }
                self.rebuild_clusters();
                return MarkerChange::Removed;
            }
            return MarkerChange::Skipped;
        };

        let marker = Marker::from_incident(incident, position);
        if let Some(heat) = self.heat.as_mut() {
            heat.upsert(&incident.ip, position, incident.count);
        }

        match self.markers.insert(incident.ip.clone(), marker) {
            Some(previous) => {
                if previous.position != position {
                    self.rebuild_clusters();
                }
                MarkerChange::Updated
            }
            None => {
                self.record_arrival(&incident.ip);
                if let Some(index) = self.clusters.as_mut() {
                    index.insert(&incident.ip, position);
                }
                MarkerChange::Added
            }
        }
    }

    pub fn set_clustering(&mut self, enabled: bool) -> bool {
        if enabled != self.clustering_enabled {
            self.clustering_enabled = enabled;
            self.rebuild_clusters();
        }
        self.clustering_enabled
    }

    pub fn toggle_clustering(&mut self) -> bool {
        self.set_clustering(!self.clustering_enabled)
    }

    pub fn set_heatmap(&mut self, enabled: bool) -> bool {
        if enabled != self.heatmap_enabled {
            self.heatmap_enabled = enabled;
            self.rebuild_heat();
        }
        self.heatmap_enabled
    }

    pub fn toggle_heatmap(&mut self) -> bool {
        self.set_heatmap(!self.heatmap_enabled)
    }

    pub fn clustering_enabled(&self) -> bool {
        self.clustering_enabled
    }

    pub fn heatmap_enabled(&self) -> bool {
        self.heatmap_enabled
    }

    /// Frame every located incident, returning the bounds used. Leaves the
    /// view untouched when nothing is located.
    pub fn fit_to_data(&mut self) -> Option<GeoBounds> {
        let bounds = GeoBounds::enclosing(self.markers.values().map(|m| m.position))?;
        let (center, zoom) = self.fit_bounds(&bounds);
        self.set_view(center, zoom);
        Some(bounds)
    }

    /// Largest zoom at which the padded bounds fit the viewport.
    fn fit_bounds(&self, bounds: &GeoBounds) -> (LatLng, u8) {
        let pad = self.settings.fit_padding_px * 2.0;
        let avail_w = f64::from(self.view.width) - pad;
        let avail_h = f64::from(self.view.height) - pad;

        let mut zoom = self.settings.min_zoom;
        if avail_w > 0.0 && avail_h > 0.0 {
            for z in (self.settings.min_zoom..=self.settings.max_zoom).rev() {
                let sw = project(bounds.south_west(), z);
                let ne = project(bounds.north_east(), z);
                if (ne.x - sw.x).abs() <= avail_w && (sw.y - ne.y).abs() <= avail_h {
                    zoom = z;
                    break;
                }
            }
        }

        let sw = project(bounds.south_west(), zoom);
        let ne = project(bounds.north_east(), zoom);
        let mid = Point {
            x: (sw.x + ne.x) / 2.0,
            y: (sw.y + ne.y) / 2.0,
        };
        (unproject(mid, zoom), zoom)
    }

    /// Center on one incident at the close zoom and open its popup.
    /// Returns `false` for unknown or unlocated IPs.
    pub fn focus(&mut self, ip: &str) -> bool {
        let Some(position) = self.markers.get(ip).map(|m| m.position) else {
            return false;
        };
        self.set_view(position, self.settings.focus_zoom);
        self.open_popup = Some(ip.to_string());
        true
    }

    /// Simulate a marker click.
    pub fn select(&self, ip: &str) -> bool {
        if !self.markers.contains_key(ip) {
            return false;
        }
        if let Some(handler) = &self.on_select {
            handler(ip);
        }
        true
    }

    pub fn set_view(&mut self, center: LatLng, zoom: u8) {
        let zoom = zoom.clamp(self.settings.min_zoom, self.settings.max_zoom);
        let zoom_changed = zoom != self.view.zoom;
        self.view.center = center;
        self.view.zoom = zoom;
        if zoom_changed {
            self.rebuild_clusters();
        }
    }

    pub fn view(&self) -> MapView {
        self.view
    }

    pub fn open_popup(&self) -> Option<&Marker> {
        self.open_popup.as_ref().and_then(|ip| self.markers.get(ip))
    }

    pub fn marker(&self, ip: &str) -> Option<&Marker> {
        self.markers.get(ip)
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn heat_layer(&self) -> Option<&HeatLayer> {
        self.heat.as_ref()
    }

    /// Drawable items: clusters and lone markers when clustering is on,
    /// every marker otherwise.
    pub fn layers(&self) -> Vec<MapLayer> {
        match &self.clusters {
            Some(index) => index
                .clusters()
                .iter()
                .filter_map(|cluster| match cluster.members() {
                    [ip] => self.markers.get(ip).cloned().map(MapLayer::Marker),
                    members => Some(MapLayer::Cluster(ClusterView {
                        center: index.center_of(cluster),
                        count: members.len(),
                        size: ClusterSize::for_count(members.len()),
                        members: members.to_vec(),
                    })),
                })
                .collect(),
            None => self.markers.values().cloned().map(MapLayer::Marker).collect(),
        }
    }

    fn record_arrival(&mut self, ip: &str) {
        self.arrival.insert(ip.to_string(), self.next_arrival);
        self.next_arrival += 1;
    }

    /// Markers in the order they were placed.
    fn markers_by_arrival(&self) -> Vec<&Marker> {
        let mut ordered: Vec<&Marker> = self.markers.values().collect();
        ordered.sort_by_key(|m| self.arrival.get(&m.ip).copied().unwrap_or(u64::MAX));
        ordered
    }

    fn rebuild_clusters(&mut self) {
        if !self.clustering_enabled {
            self.clusters = None;
            return;
        }
        let mut index = ClusterIndex::new(self.view.zoom, self.settings.cluster_radius_px);
        for marker in self.markers_by_arrival() {
            index.insert(&marker.ip, marker.position);
        }
        self.clusters = Some(index);
    }

    fn rebuild_heat(&mut self) {
        if !self.heatmap_enabled {
            self.heat = None;
            return;
        }
        let mut layer = HeatLayer::new(self.settings.heatmap_options.clone());
        for marker in self.markers_by_arrival() {
            layer.upsert(&marker.ip, marker.position, marker.popup.count);
        }
        self.heat = Some(layer);
    }
}
