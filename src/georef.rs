//! Web-Mercator conversions between geographic coordinates and tile pixels.
//!
//! "Tile space" is the fractional tile grid at a zoom level: the integer part is
//! the tile index, the fractional part the position inside the tile. Pixel
//! positions inside a tile are measured from the top-left corner; the centre of
//! pixel `(col, row)` is `(col + 0.5, row + 0.5)`.
//!
//! [`to_geo`] and [`to_pixel`] are exact algebraic inverses of each other, and
//! [`lonlat_to_tile_space`] is the same forward transform that
//! [`compute_coverage`](crate::compute_coverage) uses, so a point recovered from
//! a blob always lands inside the tile that produced it.

use std::f64::consts::PI;

use crate::geo_utils::EARTH_RADIUS;
use crate::tiles::{tiles_per_axis, OffsetQuadrant, TileCoord};
use crate::GpsPoint;

/// Forward slippy-map projection to fractional tile coordinates.
#[inline]
pub fn lonlat_to_tile_space(point: &GpsPoint, zoom: u8) -> (f64, f64) {
    let n = tiles_per_axis(zoom) as f64;
    let lat_rad = point.latitude.to_radians();
    let fx = (point.longitude + 180.0) / 360.0 * n;
    let fy = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
    (fx, fy)
}

/// Inverse slippy-map projection from fractional tile coordinates.
#[inline]
pub fn tile_space_to_lonlat(fx: f64, fy: f64, zoom: u8) -> GpsPoint {
    let n = tiles_per_axis(zoom) as f64;
    let longitude = fx / n * 360.0 - 180.0;
    let latitude = (PI * (1.0 - 2.0 * fy / n)).sinh().atan().to_degrees();
    GpsPoint::new(latitude, longitude)
}

/// Position of an in-tile pixel on the unshifted global grid, in tile units.
#[inline]
pub fn pixel_to_tile_space(
    coord: TileCoord,
    quadrant: OffsetQuadrant,
    pixel: (f64, f64),
    tile_size: u32,
) -> (f64, f64) {
    let (sx, sy) = quadrant.shift();
    let size = f64::from(tile_size);
    (
        f64::from(coord.x) + sx + (pixel.0 + 0.5) / size,
        f64::from(coord.y) + sy + (pixel.1 + 0.5) / size,
    )
}

/// Geographic position of a (fractional) pixel `(col, row)` inside a tile.
///
/// # Example
///
/// ```rust
/// use missing_ways::{georef, OffsetQuadrant, TileCoord};
///
/// let coord = TileCoord::new(0, 0, 0).unwrap();
/// // Centre of a 256px world tile is (0, 0)
/// let p = georef::to_geo(coord, OffsetQuadrant::ZERO, (127.5, 127.5), 256);
/// assert!(p.latitude.abs() < 1e-9 && p.longitude.abs() < 1e-9);
/// ```
pub fn to_geo(
    coord: TileCoord,
    quadrant: OffsetQuadrant,
    pixel: (f64, f64),
    tile_size: u32,
) -> GpsPoint {
    let (fx, fy) = pixel_to_tile_space(coord, quadrant, pixel, tile_size);
    tile_space_to_lonlat(fx, fy, coord.zoom)
}

/// Pixel `(col, row)` of a geographic point relative to a tile. Inverse of [`to_geo`].
pub fn to_pixel(
    coord: TileCoord,
    quadrant: OffsetQuadrant,
    point: &GpsPoint,
    tile_size: u32,
) -> (f64, f64) {
    let (sx, sy) = quadrant.shift();
    let size = f64::from(tile_size);
    let (fx, fy) = lonlat_to_tile_space(point, coord.zoom);
    (
        (fx - f64::from(coord.x) - sx) * size - 0.5,
        (fy - f64::from(coord.y) - sy) * size - 0.5,
    )
}

/// Ground size of one pixel in meters at the tile's centre latitude.
pub fn pixel_size_meters(coord: TileCoord, tile_size: u32) -> f64 {
    let n = tiles_per_axis(coord.zoom) as f64;
    let centre = tile_space_to_lonlat(f64::from(coord.x) + 0.5, f64::from(coord.y) + 0.5, coord.zoom);
    2.0 * PI * EARTH_RADIUS * centre.latitude.to_radians().cos() / (n * f64::from(tile_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tile_origin() {
        // Tile 15/17941/11370 covers central Bratislava
        let p = GpsPoint::new(48.1486, 17.1077);
        let (fx, fy) = lonlat_to_tile_space(&p, 15);
        assert_eq!(fx.floor() as u32, 17_941);
        assert_eq!(fy.floor() as u32, 11_370);
    }

    #[test]
    fn test_tile_space_round_trip() {
        for &(lat, lng) in &[(0.0, 0.0), (48.1486, 17.1077), (-33.86, 151.21), (70.0, -150.0)] {
            let p = GpsPoint::new(lat, lng);
            let (fx, fy) = lonlat_to_tile_space(&p, 15);
            let back = tile_space_to_lonlat(fx, fy, 15);
            assert!((back.latitude - lat).abs() < 1e-9);
            assert!((back.longitude - lng).abs() < 1e-9);
        }
    }

    #[test]
    fn test_pixel_round_trip_in_every_quadrant() {
        let coord = TileCoord::new(17_941, 11_370, 15).unwrap();
        for q in OffsetQuadrant::ALL {
            for &pixel in &[(0.0, 0.0), (255.0, 255.0), (12.25, 200.75), (511.0, 3.5)] {
                let geo = to_geo(coord, q, pixel, 512);
                let (col, row) = to_pixel(coord, q, &geo, 512);
                assert!((col - pixel.0).abs() < 1e-6, "q{} col {} vs {}", q, col, pixel.0);
                assert!((row - pixel.1).abs() < 1e-6, "q{} row {} vs {}", q, row, pixel.1);
            }
        }
    }

    #[test]
    fn test_shifted_quadrant_moves_half_a_tile() {
        let coord = TileCoord::new(100, 100, 10).unwrap();
        let base = to_geo(coord, OffsetQuadrant::ZERO, (128.0, 0.0), 256);
        let east = to_geo(coord, OffsetQuadrant::new(2).unwrap(), (0.0, 0.0), 256);
        assert!((base.longitude - east.longitude).abs() < 1e-9);
        assert!((base.latitude - east.latitude).abs() < 1e-9);
    }

    #[test]
    fn test_pixel_size_shrinks_with_latitude() {
        let equator = TileCoord::new(16_384, 16_384, 15).unwrap();
        let north = TileCoord::new(16_384, 5_000, 15).unwrap();
        let at_equator = pixel_size_meters(equator, 256);
        assert!((at_equator - 4.772).abs() < 0.01);
        assert!(pixel_size_meters(north, 256) < at_equator);
    }
}
