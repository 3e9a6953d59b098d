//! GeoJSON output of detected tasks.
//!
//! Two layouts are supported:
//!
//! - [`OutputFormat::FeatureCollection`]: one collection holding every task.
//! - [`OutputFormat::Sequence`]: one single-feature collection per line, each
//!   prefixed with the ASCII record separator (RFC 8142), which is the
//!   line-by-line format challenge importers accept.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    FeatureCollection,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PointGeometry,
    pub properties: TaskProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProperties {
    pub id: String,
    /// Source tile as `zoom/x/y/quadrant`.
    pub tile: String,
    pub size: usize,
    pub max_intensity: u8,
    /// Meters to the nearest way, `null` when none was found nearby.
    pub distance: Option<f64>,
    pub pixel_size: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl FeatureCollection {
    fn of(features: Vec<Feature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }
}

fn round(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

fn feature(task: &Task) -> Feature {
    let latitude = round(task.position.latitude, 7);
    let longitude = round(task.position.longitude, 7);
    Feature {
        kind: "Feature".to_string(),
        geometry: PointGeometry {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        },
        properties: TaskProperties {
            id: task.identity.clone(),
            tile: format!("{}/{}", task.tile.coord, task.tile.quadrant),
            size: task.pixel_count,
            max_intensity: task.max_intensity,
            distance: task.distance.map(|d| round(d, 1)),
            pixel_size: round(task.pixel_size, 2),
            latitude,
            longitude,
        },
    }
}

/// One Point feature per task, in task order.
pub fn emit(tasks: &[Task]) -> FeatureCollection {
    FeatureCollection::of(tasks.iter().map(feature).collect())
}

/// Serialize `tasks` to `writer` in the given layout.
pub fn write_geojson<W: Write>(mut writer: W, tasks: &[Task], format: OutputFormat) -> Result<()> {
    let io_error = |e| Error::io("<output>", e);
    match format {
        OutputFormat::FeatureCollection => {
            serde_json::to_writer(&mut writer, &emit(tasks))?;
            writer.write_all(b"\n").map_err(io_error)?;
        }
        OutputFormat::Sequence => {
            for task in tasks {
                writer.write_all(b"\x1e").map_err(io_error)?;
                serde_json::to_writer(&mut writer, &FeatureCollection::of(vec![feature(task)]))?;
                writer.write_all(b"\n").map_err(io_error)?;
            }
        }
    }
    writer.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::{OffsetQuadrant, TileCoord, TileKey};
    use crate::GpsPoint;
    use serde_json::Value;

    fn task(identity: &str, distance: Option<f64>) -> Task {
        Task {
            identity: identity.to_string(),
            position: GpsPoint::new(48.148_612_345, 17.107_712_345),
            tile: TileKey::new(
                TileCoord::new(17_941, 11_370, 15).unwrap(),
                "run",
                OffsetQuadrant::new(1).unwrap(),
            ),
            pixel_count: 25,
            max_intensity: 200,
            pixel_size: 3.186_12,
            distance,
        }
    }

    #[test]
    fn test_empty_collection_is_valid() {
        let mut out = Vec::new();
        write_geojson(&mut out, &[], OutputFormat::FeatureCollection).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_feature_properties() {
        let collection = emit(&[task("15/17941/11370/20/8", Some(48.04))]);
        let json = serde_json::to_value(&collection).unwrap();
        let feature = &json["features"][0];
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "Point");
        assert_eq!(feature["geometry"]["coordinates"][0], 17.1077123);
        assert_eq!(feature["geometry"]["coordinates"][1], 48.1486123);
        assert_eq!(feature["properties"]["id"], "15/17941/11370/20/8");
        assert_eq!(feature["properties"]["tile"], "15/17941/11370/1");
        assert_eq!(feature["properties"]["size"], 25);
        assert_eq!(feature["properties"]["distance"], 48.0);
        assert_eq!(feature["properties"]["pixel_size"], 3.19);
    }

    #[test]
    fn test_unknown_distance_is_null() {
        let json = serde_json::to_value(emit(&[task("a", None)])).unwrap();
        assert!(json["features"][0]["properties"]["distance"].is_null());
    }

    #[test]
    fn test_sequence_format() {
        let mut out = Vec::new();
        write_geojson(&mut out, &[task("a", None), task("b", Some(40.0))], OutputFormat::Sequence).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for (line, id) in lines.iter().zip(["a", "b"]) {
            let body = line.strip_prefix('\u{1e}').unwrap();
            let parsed: FeatureCollection = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.features.len(), 1);
            assert_eq!(parsed.features[0].properties.id, id);
        }
    }
}
