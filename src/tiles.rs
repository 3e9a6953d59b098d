//! Tile addressing: which heatmap tiles cover an area of interest.
//!
//! Tiles use the standard slippy-map scheme (`x` grows east, `y` grows south,
//! `2^zoom` tiles per axis). On top of that, an [`OffsetQuadrant`] shifts the
//! whole grid by half a tile in x and/or y, giving four phase-shifted tilings
//! of the same area:
//!
//! | Quadrant | Shift (tiles) |
//! |----------|---------------|
//! | 0 | (0, 0) |
//! | 1 | (0, ½) south |
//! | 2 | (½, 0) east |
//! | 3 | (½, ½) |
//!
//! A blob cut in two by a tile edge in one phase lies inside a single tile in
//! another, so repeated runs over the quadrants recover what edges would hide.

use std::collections::BTreeSet;
use std::fmt;

use geo::{Coord, Intersects, LineString, Polygon, Rect};

use crate::area::AreaOfInterest;
use crate::error::{Error, Result};
use crate::georef;
use crate::Bounds;

/// Highest zoom level a [`TileCoord`] accepts.
pub const MAX_ZOOM: u8 = 24;

/// Integer tile address; `0 <= x, y < 2^zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Create a tile coordinate, rejecting out-of-range values.
    pub fn new(x: u32, y: u32, zoom: u8) -> Result<Self> {
        if zoom > MAX_ZOOM {
            return Err(Error::Configuration(format!(
                "zoom {} exceeds maximum {}",
                zoom, MAX_ZOOM
            )));
        }
        let n = tiles_per_axis(zoom);
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(Error::Configuration(format!(
                "tile {}/{}/{} outside the {}x{} grid",
                zoom, x, y, n, n
            )));
        }
        Ok(Self { zoom, x, y })
    }

    /// Neighbouring tile `dx`/`dy` steps away. Wraps around the antimeridian;
    /// returns `None` past the north or south edge.
    pub fn offset(&self, dx: i64, dy: i64) -> Option<Self> {
        let n = tiles_per_axis(self.zoom) as i64;
        let y = i64::from(self.y) + dy;
        if y < 0 || y >= n {
            return None;
        }
        let x = (i64::from(self.x) + dx).rem_euclid(n);
        Some(Self { zoom: self.zoom, x: x as u32, y: y as u32 })
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn tiles_per_axis(zoom: u8) -> u64 {
    1u64 << zoom
}

/// One of the four phase-shifted tilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct OffsetQuadrant(u8);

impl OffsetQuadrant {
    pub const ZERO: OffsetQuadrant = OffsetQuadrant(0);

    pub const ALL: [OffsetQuadrant; 4] = [
        OffsetQuadrant(0),
        OffsetQuadrant(1),
        OffsetQuadrant(2),
        OffsetQuadrant(3),
    ];

    pub fn new(value: u8) -> Result<Self> {
        if value > 3 {
            return Err(Error::Configuration(format!(
                "offset quadrant must be 0-3, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// Grid origin shift in tile units, `(east, south)`.
    #[inline]
    pub fn shift(self) -> (f64, f64) {
        (f64::from(self.0 >> 1) * 0.5, f64::from(self.0 & 1) * 0.5)
    }

    /// True when the tiles of this phase straddle the unshifted grid.
    pub fn is_shifted(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for OffsetQuadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache and identity key of a heatmap tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub coord: TileCoord,
    pub activity: String,
    pub quadrant: OffsetQuadrant,
}

impl TileKey {
    pub fn new(coord: TileCoord, activity: &str, quadrant: OffsetQuadrant) -> Self {
        Self {
            coord,
            activity: activity.to_string(),
            quadrant,
        }
    }

    /// Key of the unshifted tile at `coord` for the same activity.
    pub fn base(&self, coord: TileCoord) -> Self {
        Self::new(coord, &self.activity, OffsetQuadrant::ZERO)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/q{}", self.activity, self.coord, self.quadrant)
    }
}

/// Geographic footprint of a tile in the given phase.
pub fn tile_bounds(coord: TileCoord, quadrant: OffsetQuadrant) -> Bounds {
    let (sx, sy) = quadrant.shift();
    let fx = f64::from(coord.x) + sx;
    let fy = f64::from(coord.y) + sy;
    let north_west = georef::tile_space_to_lonlat(fx, fy, coord.zoom);
    let south_east = georef::tile_space_to_lonlat(fx + 1.0, fy + 1.0, coord.zoom);
    Bounds {
        min_lat: south_east.latitude,
        max_lat: north_west.latitude,
        min_lng: north_west.longitude,
        max_lng: south_east.longitude,
    }
}

/// Every tile of the given phase whose footprint touches the area.
///
/// Only exterior rings are rasterized: a hole never removes a tile, since a
/// missing tile can only hide detections. Tiles that merely clip the boundary
/// are included; exact containment is checked per candidate point later.
///
/// # Example
///
/// ```rust
/// use missing_ways::{AreaOfInterest, OffsetQuadrant, compute_coverage};
///
/// let area = AreaOfInterest::from_geojson_str(r#"{
///     "type": "Polygon",
///     "coordinates": [[[17.10, 48.14], [17.12, 48.14], [17.12, 48.15], [17.10, 48.15], [17.10, 48.14]]]
/// }"#).unwrap();
///
/// let tiles = compute_coverage(&area, 15, OffsetQuadrant::ZERO);
/// assert!(!tiles.is_empty());
/// assert_eq!(tiles, compute_coverage(&area, 15, OffsetQuadrant::ZERO));
/// ```
pub fn compute_coverage(
    area: &AreaOfInterest,
    zoom: u8,
    quadrant: OffsetQuadrant,
) -> BTreeSet<TileCoord> {
    let n = tiles_per_axis(zoom) as f64;
    let (sx, sy) = quadrant.shift();
    let mut tiles = BTreeSet::new();

    for polygon in area.polygons() {
        // Exterior ring in shifted tile space
        let ring: LineString<f64> = polygon
            .exterior()
            .coords()
            .map(|c| {
                let (fx, fy) = georef::lonlat_to_tile_space(
                    &crate::GpsPoint::new(c.y, c.x),
                    zoom,
                );
                Coord { x: fx - sx, y: fy - sy }
            })
            .collect();
        if ring.0.is_empty() {
            continue;
        }
        let footprint = Polygon::new(ring, vec![]);

        let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
        for c in footprint.exterior().coords() {
            min_x = min_x.min(c.x);
            max_x = max_x.max(c.x);
            min_y = min_y.min(c.y);
            max_y = max_y.max(c.y);
        }
        if max_x < 0.0 || max_y < 0.0 || min_x >= n || min_y >= n {
            continue;
        }

        let x_range = (min_x.floor().max(0.0) as u32)..=(max_x.floor().min(n - 1.0) as u32);
        let y_range = (min_y.floor().max(0.0) as u32)..=(max_y.floor().min(n - 1.0) as u32);

        for x in x_range {
            for y in y_range.clone() {
                let cell = Rect::new(
                    Coord { x: f64::from(x), y: f64::from(y) },
                    Coord { x: f64::from(x) + 1.0, y: f64::from(y) + 1.0 },
                );
                if cell.intersects(&footprint) {
                    tiles.insert(TileCoord { zoom, x, y });
                }
            }
        }
    }

    tiles
}
