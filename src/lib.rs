//! # Missing Ways
//!
//! Finds places where GPS activity heatmap tiles show sustained traffic that no
//! mapped way explains, and exports them as review tasks.
//!
//! This library provides:
//! - Tile coverage of an area at a zoom level, with four phase-shifted tilings
//! - A persistent tile cache with atomic writes
//! - Hot-pixel clustering of heatmap tiles into blobs
//! - Nearest-way filtering backed by an R-tree
//! - Cross-run deduplication against previously reviewed tasks
//! - GeoJSON output for task-tracking imports
//!
//! ## Features
//!
//! - **`parallel`** - Process tiles in parallel with rayon
//! - **`http`** - HTTP heatmap tile fetcher and Overpass way source
//! - **`cli`** - The `missing-ways` command-line tool (default)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use missing_ways::{heat, HeatmapTile, OffsetQuadrant, TileCoord, TileKey};
//!
//! // A 16x16 tile with a hot 5x5 square
//! let mut intensity = vec![0u8; 16 * 16];
//! for row in 4..9 {
//!     for col in 4..9 {
//!         intensity[row * 16 + col] = 200;
//!     }
//! }
//! let key = TileKey::new(TileCoord::new(16_384, 10_896, 15).unwrap(), "run", OffsetQuadrant::ZERO);
//! let tile = HeatmapTile::new(key, 16, intensity).unwrap();
//!
//! let blobs = heat::extract(&tile, 100, 20);
//! assert_eq!(blobs.len(), 1);
//! assert_eq!(blobs[0].pixel_count, 25);
//! ```

pub mod area;
pub mod cache;
pub mod emit;
pub mod error;
pub mod geo_utils;
pub mod georef;
pub mod heat;
pub mod matcher;
pub mod palette;
pub mod pipeline;
pub mod provider;
pub mod tasks;
pub mod tiles;
pub mod ways;

// HTTP module for tile and way fetching
#[cfg(feature = "http")]
pub mod http;

pub use area::AreaOfInterest;
pub use cache::{CachedTile, DiskTileCache, TileStore};
pub use emit::{emit, write_geojson, FeatureCollection, OutputFormat};
pub use error::{Error, Result};
pub use heat::{extract, Blob, HeatmapTile};
pub use matcher::{match_and_filter, CandidatePoint, MatchConfig, MatchOutcome, WayIndex};
pub use pipeline::{DetectionConfig, DetectionReport, Detector, ProgressCallback, RunStats, Scope, Task};
pub use provider::{FetchOutcome, OfflineSource, TileProvider, TileSource};
pub use tasks::{task_identity, Deduplicator, KnownTasks, TaskRecord, TaskStatus};
pub use tiles::{compute_coverage, tile_bounds, OffsetQuadrant, TileCoord, TileKey};
pub use ways::{InMemoryWays, WayGeometry, WaySource};

#[cfg(feature = "http")]
pub use http::{FetchConfig, HeatmapTileFetcher, OverpassClient, OverpassConfig};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use missing_ways::GpsPoint;
/// let point = GpsPoint::new(48.1486, 17.1077); // Bratislava
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    pub(crate) fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// Geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Grow the box by `meters` on every side.
    ///
    /// Uses the conservative degree conversion from [`geo_utils::meters_to_degrees`],
    /// so the result always contains every point within `meters` of the box.
    pub fn expanded(&self, meters: f64) -> Self {
        let widest_lat = self.min_lat.abs().max(self.max_lat.abs());
        let deg = geo_utils::meters_to_degrees(meters, widest_lat);
        Self {
            min_lat: (self.min_lat - deg).max(-90.0),
            max_lat: (self.max_lat + deg).min(90.0),
            min_lng: (self.min_lng - deg).max(-180.0),
            max_lng: (self.max_lng + deg).min(180.0),
        }
    }

    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// Tests
// ============================================================================
