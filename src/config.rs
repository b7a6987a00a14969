//! TOML configuration for the dashboard engine.
//!
//! Every section is optional and falls back to compiled-in defaults. The file
//! is looked up from an explicit path, then `THREATCANVAS_CONFIG`, then
//! `/etc/threatcanvas/threatcanvas.toml`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::QueryFilters;
use crate::dashboard::ControllerSettings;
use crate::incident::{EventType, LatLng};
use crate::render::RendererSettings;
use crate::stats::AnimationSettings;

pub const CONFIG_ENV: &str = "THREATCANVAS_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/threatcanvas/threatcanvas.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DashboardConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded dashboard configuration");
        Ok(config)
    }

    /// Resolve the configuration. A path given explicitly must load; the
    /// environment and system locations fall through to defaults on error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "THREATCANVAS_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn default_filters(&self) -> QueryFilters {
        QueryFilters {
            since: self.filters.since.clone(),
            types: self.filters.types.iter().map(|t| EventType::from(t.as_str())).collect(),
            search: String::new(),
            limit: Some(self.filters.limit),
        }
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        let map = &self.map;
        RendererSettings {
            cluster_radius_px: map.cluster_radius_px,
            fit_padding_px: map.fit_padding_px,
            focus_zoom: map.focus_zoom,
            min_zoom: map.min_zoom,
            max_zoom: map.max_zoom.max(map.min_zoom),
            initial_center: LatLng::new(map.initial_center[0], map.initial_center[1]),
            initial_zoom: map.initial_zoom,
            viewport_width: map.viewport_width,
            viewport_height: map.viewport_height,
            clustering: map.clustering,
            heatmap: map.heatmap,
            ..RendererSettings::default()
        }
    }

    pub fn animation_settings(&self) -> AnimationSettings {
        AnimationSettings {
            duration: Duration::from_millis(self.animation.duration_ms),
            steps: self.animation.steps,
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            renderer: self.renderer_settings(),
            animation: self.animation_settings(),
            filters: self.default_filters(),
            top_attackers: self.refresh.top_attackers,
            auto_refresh_period: Duration::from_secs(self.refresh.auto_refresh_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Bulk query API of the collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Filters applied on the first load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Time window (`1h`, `24h`, `7d`, ...).
    pub since: String,
    pub types: Vec<String>,
    pub limit: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            since: "24h".to_string(),
            types: EventType::KNOWN.iter().map(|t| t.as_str().to_string()).collect(),
            limit: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub cluster_radius_px: f64,
    pub fit_padding_px: f64,
    /// Zoom used when focusing a single attacker.
    pub focus_zoom: u8,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// `[lat, lon]`
    pub initial_center: [f64; 2],
    pub initial_zoom: u8,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub clustering: bool,
    pub heatmap: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            cluster_radius_px: 80.0,
            fit_padding_px: 50.0,
            focus_zoom: 8,
            min_zoom: 2,
            max_zoom: 18,
            initial_center: [20.0, 0.0],
            initial_zoom: 2,
            viewport_width: 1280,
            viewport_height: 720,
            clustering: true,
            heatmap: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Animation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub duration_ms: u64,
    pub steps: u32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            duration_ms: 500,
            steps: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub auto_refresh_secs: u64,
    /// Start the periodic refresh when the server boots.
    pub enabled_on_start: bool,
    /// Length of the ranked attacker list.
    pub top_attackers: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            auto_refresh_secs: 30,
            enabled_on_start: false,
            top_attackers: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = DashboardConfig::default();

        assert_eq!(cfg.backend.base_url, "http://127.0.0.1:5000");
        assert_eq!(cfg.backend.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.filters.since, "24h");
        assert_eq!(cfg.filters.types.len(), 4);
        assert_eq!(cfg.filters.limit, 1000);
        assert_eq!(cfg.map.cluster_radius_px, 80.0);
        assert_eq!(cfg.map.focus_zoom, 8);
        assert!(cfg.map.clustering);
        assert!(!cfg.map.heatmap);
        assert_eq!(cfg.animation.duration_ms, 500);
        assert_eq!(cfg.animation.steps, 30);
        assert_eq!(cfg.refresh.auto_refresh_secs, 30);
        assert!(!cfg.refresh.enabled_on_start);
        assert_eq!(cfg.refresh.top_attackers, 10);
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_default_filters_match_query_defaults() {
        assert_eq!(DashboardConfig::default().default_filters(), QueryFilters::default());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[map]
heatmap = true
initial_center = [51.5, -0.1]

[filters]
since = "7d"
types = ["failed_login", "invalid"]
"#;
        let cfg: DashboardConfig = toml::from_str(toml_str).unwrap();
        assert!(cfg.map.heatmap);
        assert_eq!(cfg.map.cluster_radius_px, 80.0);
        assert_eq!(cfg.backend.timeout_secs, 10);

        let filters = cfg.default_filters();
        assert_eq!(filters.since, "7d");
        assert!(filters.types.contains(&EventType::InvalidUser));
        assert_eq!(filters.types.len(), 2);

        let renderer = cfg.renderer_settings();
        assert!(renderer.heatmap);
        assert_eq!(renderer.initial_center, LatLng::new(51.5, -0.1));
    }

    #[test]
    fn test_controller_settings() {
        let cfg: DashboardConfig = toml::from_str(
            r#"
[animation]
duration_ms = 1000
steps = 10

[refresh]
auto_refresh_secs = 60
top_attackers = 5
"#,
        )
        .unwrap();
        let settings = cfg.controller_settings();
        assert_eq!(settings.animation.duration, Duration::from_secs(1));
        assert_eq!(settings.animation.steps, 10);
        assert_eq!(settings.auto_refresh_period, Duration::from_secs(60));
        assert_eq!(settings.top_attackers, 5);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("threatcanvas.toml");
        std::fs::write(
            &path,
            r#"
[backend]
base_url = "http://collector.lan:5000"

[server]
bind = "127.0.0.1:9090"
"#,
        )
        .unwrap();

        let cfg = DashboardConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(cfg.backend.base_url, "http://collector.lan:5000");
        assert_eq!(cfg.server.bind, "127.0.0.1:9090");
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let result = DashboardConfig::load_or_default(Some(Path::new("/nonexistent/threatcanvas.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = DashboardConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: DashboardConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.map.initial_center, cfg.map.initial_center);
        assert_eq!(back.filters.types, cfg.filters.types);
    }
}
