//! # Geographic Utilities
//!
//! Distance and bounding-box helpers shared by the matcher and the pipeline.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`point_to_polyline_distance`] | Minimum distance from a point to a polyline |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//!
//! ## Distance Metric
//!
//! Point-to-way distances are measured in a local equirectangular projection
//! centred on the query point ([`LocalProjection`]). At the distances this crate
//! cares about (tens of meters) the error against the haversine distance is well
//! under a millimeter, and using one projection for every segment keeps the
//! distance filter monotonic.
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use crate::{Bounds, GpsPoint};

/// Mean Earth radius in meters, matching the radius used by [`geo::Haversine`].
pub const EARTH_RADIUS: f64 = 6_371_008.8;

/// Northern edge of the Web-Mercator tile grid, rounded up.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.06;

// =============================================================================
// Distance Functions
// =============================================================================

/// Equirectangular projection around a fixed origin, in meters.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin: GpsPoint,
    meters_per_deg_lat: f64,
    meters_per_deg_lng: f64,
}

impl LocalProjection {
    pub fn new(origin: GpsPoint) -> Self {
        let meters_per_deg_lat = EARTH_RADIUS.to_radians();
        let meters_per_deg_lng = meters_per_deg_lat * origin.latitude.to_radians().cos();
        Self {
            origin,
            meters_per_deg_lat,
            meters_per_deg_lng,
        }
    }

    /// Project a point to (east, north) meters relative to the origin.
    #[inline]
    pub fn project(&self, p: &GpsPoint) -> (f64, f64) {
        let mut dlng = p.longitude - self.origin.longitude;
        // Take the short way around the antimeridian
        if dlng > 180.0 {
            dlng -= 360.0;
        } else if dlng < -180.0 {
            dlng += 360.0;
        }
        (
            dlng * self.meters_per_deg_lng,
            (p.latitude - self.origin.latitude) * self.meters_per_deg_lat,
        )
    }
}

/// Distance from the origin (0, 0) to the segment `a`-`b` in the plane.
#[inline]
fn origin_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (-(a.0 * dx + a.1 * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    (cx * cx + cy * cy).sqrt()
}

/// Minimum distance in meters from `point` to any segment of `polyline`.
///
/// A single-point polyline degenerates to point distance; an empty one is
/// infinitely far away.
///
/// # Example
///
/// ```rust
/// use missing_ways::{GpsPoint, geo_utils};
///
/// // East-west line, query point ~111m north of its middle
/// let line = vec![GpsPoint::new(0.0, -0.01), GpsPoint::new(0.0, 0.01)];
/// let d = geo_utils::point_to_polyline_distance(&GpsPoint::new(0.001, 0.0), &line);
/// assert!((d - 111.2).abs() < 0.5);
/// ```
pub fn point_to_polyline_distance(point: &GpsPoint, polyline: &[GpsPoint]) -> f64 {
    let projection = LocalProjection::new(*point);
    match polyline {
        [] => f64::INFINITY,
        [single] => {
            let (x, y) = projection.project(single);
            (x * x + y * y).sqrt()
        }
        _ => polyline
            .windows(2)
            .map(|w| origin_to_segment(projection.project(&w[0]), projection.project(&w[1])))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Returns the longitude span, which is never smaller than the latitude span, so
/// the value is safe to use as a square search radius in both axes.
///
/// # Notes
///
/// - One degree of latitude is `EARTH_RADIUS * π / 180` ≈ 111,195 meters
/// - Latitude is clamped to [`MAX_MERCATOR_LATITUDE`], so the box stays finite
///   and is still wide enough anywhere a tile exists
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.abs().min(MAX_MERCATOR_LATITUDE).to_radians();
    let meters_per_degree = EARTH_RADIUS.to_radians() * lat_rad.cos();
    meters / meters_per_degree
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a set of points.
///
/// For empty input, returns a bounds with MIN/MAX values that will fail any
/// containment check.
pub fn compute_bounds(points: &[GpsPoint]) -> Bounds {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Bounds { min_lat, max_lat, min_lng, max_lng }
}

// =============================================================================
// Unit Tests
// =============================================================================
