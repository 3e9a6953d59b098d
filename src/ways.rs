//! Reference way geometries and where they come from.
//!
//! A [`WaySource`] returns every way intersecting a bounding box. The pipeline
//! queries it once per run for the whole scope, so implementations may be
//! slow (e.g. [`OverpassClient`](crate::http::OverpassClient)).

use std::future::Future;
use std::path::Path;

use log::{info, warn};
use serde_json::Value;

use crate::area::parse_positions;
use crate::error::{Error, Result};
use crate::{geo_utils, Bounds, GpsPoint};

/// A mapped way as a polyline (or closed ring for areas).
#[derive(Debug, Clone, PartialEq)]
pub struct WayGeometry {
    pub id: i64,
    pub points: Vec<GpsPoint>,
    /// Closed way describing a surface (plaza, pitch, multipolygon member).
    pub is_area: bool,
}

impl WayGeometry {
    pub fn new(id: i64, points: Vec<GpsPoint>, is_area: bool) -> Self {
        Self { id, points, is_area }
    }

    pub fn bounds(&self) -> Bounds {
        geo_utils::compute_bounds(&self.points)
    }

    /// First and last vertex coincide.
    pub fn is_closed(&self) -> bool {
        self.points.len() >= 4 && self.points.first() == self.points.last()
    }
}

/// Supplier of reference ways.
pub trait WaySource: Send + Sync {
    fn load(&self, bounds: Bounds) -> impl Future<Output = Result<Vec<WayGeometry>>> + Send;
}

/// A fixed set of ways held in memory, optionally loaded from GeoJSON.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWays {
    ways: Vec<WayGeometry>,
}

impl InMemoryWays {
    pub fn new(ways: Vec<WayGeometry>) -> Self {
        Self { ways }
    }

    pub fn len(&self) -> usize {
        self.ways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ways.is_empty()
    }

    /// Load ways from a GeoJSON file of LineString / Polygon features.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let ways = Self::from_geojson_str(&text)?;
        info!("[Ways] Loaded {} ways from {}", ways.len(), path.display());
        Ok(ways)
    }

    /// Parse a GeoJSON `FeatureCollection`.
    ///
    /// Lines become ways, polygon rings become area ways. A feature's id is
    /// taken from `id` or `properties.id`, falling back to its position.
    /// Malformed features are skipped with a warning.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let features = value
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Geometry("ways file must be a FeatureCollection".to_string()))?;

        let mut ways = Vec::new();
        for (index, feature) in features.iter().enumerate() {
            match parse_feature(feature, index as i64) {
                Ok(parsed) => ways.extend(parsed),
                Err(e) => warn!("[Ways] Skipping feature {}: {}", index, e),
            }
        }
        Ok(Self { ways })
    }
}

impl WaySource for InMemoryWays {
    async fn load(&self, bounds: Bounds) -> Result<Vec<WayGeometry>> {
        Ok(self
            .ways
            .iter()
            .filter(|w| {
                let b = w.bounds();
                b.min_lat <= bounds.max_lat
                    && b.max_lat >= bounds.min_lat
                    && b.min_lng <= bounds.max_lng
                    && b.max_lng >= bounds.min_lng
            })
            .cloned()
            .collect())
    }
}

fn parse_feature(feature: &Value, index: i64) -> Result<Vec<WayGeometry>> {
    let id = feature
        .get("id")
        .or_else(|| feature.pointer("/properties/id"))
        .and_then(Value::as_i64)
        .unwrap_or(index);
    let area_tag = feature.pointer("/properties/area").and_then(Value::as_str) == Some("yes");

    let geometry = feature
        .get("geometry")
        .filter(|g| !g.is_null())
        .ok_or_else(|| Error::Geometry("feature without geometry".to_string()))?;
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or_default();
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| Error::Geometry("geometry without coordinates".to_string()))?;

    let lines: Vec<(&Value, bool)> = match kind {
        "LineString" => vec![(coordinates, area_tag)],
        "MultiLineString" => as_array(coordinates)?.iter().map(|l| (l, area_tag)).collect(),
        "Polygon" => as_array(coordinates)?.iter().map(|r| (r, true)).collect(),
        "MultiPolygon" => as_array(coordinates)?
            .iter()
            .map(as_array)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .map(|r| (r, true))
            .collect(),
        other => return Err(Error::Geometry(format!("unsupported way geometry {:?}", other))),
    };

    lines
        .into_iter()
        .map(|(positions, is_area)| {
            let points = parse_positions(positions)?
                .into_iter()
                .map(|c| GpsPoint::new(c.y, c.x))
                .collect();
            let mut way = WayGeometry::new(id, points, is_area);
            // An open line cannot enclose anything
            way.is_area &= way.is_closed();
            Ok(way)
        })
        .collect()
}

fn as_array(value: &Value) -> Result<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| Error::Geometry("coordinates must be an array".to_string()))
}
