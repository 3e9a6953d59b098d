//! Area of interest: the (multi)polygon boundary a run is limited to.
//!
//! Accepts a GeoJSON `FeatureCollection`, `Feature`, `GeometryCollection` or a
//! bare `Polygon`/`MultiPolygon` geometry. Non-polygonal members are skipped with
//! a warning; malformed polygons are a fatal [`Error::Geometry`].

use std::path::Path;

use geo::{Contains, Coord, LineString, MultiPolygon, Polygon};
use log::{debug, warn};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::{Bounds, GpsPoint};

/// Immutable area boundary, loaded once per run.
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    shape: MultiPolygon<f64>,
    bounds: Bounds,
}

impl AreaOfInterest {
    /// Build an area from polygons in lon/lat order.
    pub fn new(polygons: Vec<Polygon<f64>>) -> Result<Self> {
        if polygons.is_empty() {
            return Err(Error::Geometry("area contains no polygon".to_string()));
        }
        let points: Vec<GpsPoint> = polygons
            .iter()
            .flat_map(|p| p.exterior().coords())
            .map(|c| GpsPoint::new(c.y, c.x))
            .collect();
        if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
            return Err(Error::Geometry(format!(
                "area vertex out of range: {}, {}",
                bad.latitude, bad.longitude
            )));
        }
        let bounds = crate::geo_utils::compute_bounds(&points);
        Ok(Self {
            shape: MultiPolygon(polygons),
            bounds,
        })
    }

    /// Load an area from a GeoJSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let area = Self::from_geojson_str(&text)?;
        debug!(
            "[Area] Loaded {} polygon(s) from {}, bounds {:?}",
            area.shape.0.len(),
            path.display(),
            area.bounds
        );
        Ok(area)
    }

    /// Parse an area from GeoJSON text.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let mut polygons = Vec::new();
        collect_polygons(&value, &mut polygons)?;
        Self::new(polygons)
    }

    pub fn polygons(&self) -> impl Iterator<Item = &Polygon<f64>> {
        self.shape.0.iter()
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Exact point-in-polygon test (holes respected).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        self.bounds.contains(point) && self.shape.contains(&point.to_geo())
    }
}

fn collect_polygons(value: &Value, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::Geometry("FeatureCollection without features".to_string()))?;
            for feature in features {
                collect_polygons(feature, out)?;
            }
        }
        "Feature" => match value.get("geometry") {
            Some(geometry) if !geometry.is_null() => collect_polygons(geometry, out)?,
            _ => warn!("[Area] Skipping feature without geometry"),
        },
        "GeometryCollection" => {
            for geometry in value.get("geometries").and_then(Value::as_array).into_iter().flatten() {
                collect_polygons(geometry, out)?;
            }
        }
        "Polygon" => out.push(parse_polygon(coordinates(value)?)?),
        "MultiPolygon" => {
            let parts = coordinates(value)?
                .as_array()
                .ok_or_else(|| Error::Geometry("MultiPolygon coordinates must be an array".to_string()))?;
            for part in parts {
                out.push(parse_polygon(part)?);
            }
        }
        other => warn!("[Area] Ignoring non-polygonal geometry {:?}", other),
    }
    Ok(())
}

fn coordinates(value: &Value) -> Result<&Value> {
    value
        .get("coordinates")
        .ok_or_else(|| Error::Geometry("geometry without coordinates".to_string()))
}

fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value
        .as_array()
        .ok_or_else(|| Error::Geometry("polygon coordinates must be an array of rings".to_string()))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| Error::Geometry("polygon without exterior ring".to_string()))??;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

pub(crate) fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let coords = parse_positions(value)?;
    if coords.len() < 4 {
        return Err(Error::Geometry(format!(
            "polygon ring needs at least 4 positions, got {}",
            coords.len()
        )));
    }
    Ok(LineString::new(coords))
}

/// Parse a GeoJSON position array (`[[lng, lat], ...]`).
pub(crate) fn parse_positions(value: &Value) -> Result<Vec<Coord<f64>>> {
    let positions = value
        .as_array()
        .ok_or_else(|| Error::Geometry("expected an array of positions".to_string()))?;
    positions
        .iter()
        .map(|position| {
            let pair = position.as_array().filter(|p| p.len() >= 2);
            match pair.map(|p| (p[0].as_f64(), p[1].as_f64())) {
                Some((Some(x), Some(y))) if x.is_finite() && y.is_finite() => Ok(Coord { x, y }),
                _ => Err(Error::Geometry(format!("invalid position {}", position))),
            }
        })
        .collect()
}
