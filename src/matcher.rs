//! Nearest-way filtering of candidate points.
//!
//! Ways are indexed by their bounding boxes in an R-tree. A query expands the
//! point into a square of the search radius, collects ways whose boxes touch
//! it, and takes the minimum point-to-polyline distance over them.

use geo::{Contains, Coord, LineString, Polygon};
use log::{debug, warn};
use rstar::{RTree, RTreeObject, AABB};

use crate::area::AreaOfInterest;
use crate::geo_utils::{meters_to_degrees, point_to_polyline_distance};
use crate::tiles::TileKey;
use crate::ways::WayGeometry;
use crate::GpsPoint;

/// Distance gate configuration.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// A candidate closer than this to any way is explained by it (meters).
    pub max_distance: f64,
    /// Ways are searched out to `max_distance * search_factor`, so near misses
    /// still report a distance.
    pub search_factor: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_distance: 35.0,
            search_factor: 2.0,
        }
    }
}

impl MatchConfig {
    pub fn search_radius(&self) -> f64 {
        self.max_distance * self.search_factor
    }
}

/// A georeferenced blob on its way to becoming a task.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePoint {
    pub position: GpsPoint,
    /// Tile (and phase) the blob was found in.
    pub tile: TileKey,
    pub pixel_count: usize,
    pub max_intensity: u8,
    /// Ground size of one pixel in meters.
    pub pixel_size: f64,
    pub identity: String,
    /// Distance to the nearest way; `None` when nothing is within the search radius.
    pub distance_to_way: Option<f64>,
}

/// Result of running a point through the gates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Outside the area of interest.
    OutsideArea,
    /// A way passes within `max_distance`.
    NearWay { distance: f64, way_id: i64 },
    /// Unexplained traffic.
    Unmatched { distance: Option<f64> },
}

/// R-tree entry: bounding box of one indexed way
#[derive(Debug, Clone)]
struct WayBounds {
    slot: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for WayBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[derive(Debug)]
struct IndexedWay {
    way: WayGeometry,
    surface: Option<Polygon<f64>>,
}

/// Spatial index over reference ways.
pub struct WayIndex {
    ways: Vec<IndexedWay>,
    tree: RTree<WayBounds>,
}

impl WayIndex {
    /// Index `ways`. Ways with fewer than two valid points are dropped.
    pub fn new(ways: Vec<WayGeometry>) -> Self {
        let mut indexed = Vec::with_capacity(ways.len());
        let mut entries = Vec::with_capacity(ways.len());

        for way in ways {
            if way.points.len() < 2 || way.points.iter().any(|p| !p.is_valid()) {
                warn!("[WayIndex] Dropping way {}: degenerate geometry", way.id);
                continue;
            }
            let b = way.bounds();
            entries.push(WayBounds {
                slot: indexed.len(),
                envelope: AABB::from_corners([b.min_lng, b.min_lat], [b.max_lng, b.max_lat]),
            });
            let surface = way.is_area.then(|| {
                let ring: LineString<f64> = way
                    .points
                    .iter()
                    .map(|p| Coord { x: p.longitude, y: p.latitude })
                    .collect();
                Polygon::new(ring, vec![])
            });
            indexed.push(IndexedWay { way, surface });
        }

        debug!("[WayIndex] Indexed {} ways", indexed.len());
        Self {
            ways: indexed,
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.ways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ways.is_empty()
    }

    /// Distance (meters) and id of the nearest way within `radius` of `point`.
    ///
    /// An area way containing the point is at distance 0.
    pub fn nearest_distance(&self, point: &GpsPoint, radius: f64) -> Option<(f64, i64)> {
        let deg = meters_to_degrees(radius, point.latitude);
        let query = AABB::from_corners(
            [point.longitude - deg, point.latitude - deg],
            [point.longitude + deg, point.latitude + deg],
        );

        self.tree
            .locate_in_envelope_intersecting(&query)
            .map(|entry| {
                let indexed = &self.ways[entry.slot];
                let inside = indexed
                    .surface
                    .as_ref()
                    .is_some_and(|s| s.contains(&point.to_geo()));
                let distance = if inside {
                    0.0
                } else {
                    point_to_polyline_distance(point, &indexed.way.points)
                };
                (distance, indexed.way.id)
            })
            .filter(|(distance, _)| *distance <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
    }
}

/// Apply the area gate (when an area is given) and the distance gate.
pub fn match_and_filter(
    point: &GpsPoint,
    index: &WayIndex,
    area: Option<&AreaOfInterest>,
    config: &MatchConfig,
) -> MatchOutcome {
    if let Some(area) = area {
        if !area.contains(point) {
            return MatchOutcome::OutsideArea;
        }
    }
    match index.nearest_distance(point, config.search_radius()) {
        Some((distance, way_id)) if distance <= config.max_distance => {
            MatchOutcome::NearWay { distance, way_id }
        }
        Some((distance, _)) => MatchOutcome::Unmatched { distance: Some(distance) },
        None => MatchOutcome::Unmatched { distance: None },
    }
}
