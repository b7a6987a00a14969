//! Spherical Web-Mercator projection and view bounds.

use serde::Serialize;

use crate::incident::LatLng;

pub const TILE_SIZE: f64 = 256.0;
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// World pixel coordinate at a given zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * 2f64.powi(i32::from(zoom))
}

pub fn project(pos: LatLng, zoom: u8) -> Point {
    let size = world_size(zoom);
    let lat = pos.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let sin = lat.sin();
    Point {
        x: (pos.lon + 180.0) / 360.0 * size,
        y: (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * std::f64::consts::PI)) * size,
    }
}

pub fn unproject(point: Point, zoom: u8) -> LatLng {
    let size = world_size(zoom);
    let n = std::f64::consts::PI - 2.0 * std::f64::consts::PI * point.y / size;
    LatLng {
        lat: n.sinh().atan().to_degrees(),
        lon: point.x / size * 360.0 - 180.0,
    }
}

/// Axis-aligned geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    /// Smallest box containing every position; `None` for an empty input.
    pub fn enclosing(positions: impl IntoIterator<Item = LatLng>) -> Option<Self> {
        positions.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => GeoBounds {
                    south: p.lat,
                    west: p.lon,
                    north: p.lat,
                    east: p.lon,
                },
                Some(b) => GeoBounds {
                    south: b.south.min(p.lat),
                    west: b.west.min(p.lon),
                    north: b.north.max(p.lat),
                    east: b.east.max(p.lon),
                },
            })
        })
    }

    pub fn south_west(&self) -> LatLng {
        LatLng::new(self.south, self.west)
    }

    pub fn north_east(&self) -> LatLng {
        LatLng::new(self.north, self.east)
    }

    pub fn contains(&self, p: LatLng) -> bool {
        p.lat >= self.south && p.lat <= self.north && p.lon >= self.west && p.lon <= self.east
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_projects_to_world_center() {
        let p = project(LatLng::new(0.0, 0.0), 0);
        assert!((p.x - 128.0).abs() < 1e-9);
        assert!((p.y - 128.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_round_trip() {
        let pos = LatLng::new(52.52, 13.405);
        let back = unproject(project(pos, 7), 7);
        assert!((back.lat - pos.lat).abs() < 1e-9);
        assert!((back.lon - pos.lon).abs() < 1e-9);
    }

    #[test]
    fn test_enclosing_bounds() {
        assert!(GeoBounds::enclosing(Vec::new()).is_none());
        let b = GeoBounds::enclosing(vec![LatLng::new(10.0, 20.0), LatLng::new(-5.0, 40.0)]).unwrap();
        assert_eq!(b.south, -5.0);
        assert_eq!(b.north, 10.0);
        assert_eq!(b.west, 20.0);
        assert_eq!(b.east, 40.0);
        assert!(b.contains(LatLng::new(0.0, 30.0)));
    }
}
