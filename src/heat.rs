//! Hot-pixel clustering of heatmap tiles.
//!
//! A pixel is *hot* when its intensity reaches `min_level`. Hot pixels are
//! grouped by 4-connectivity (no diagonals) into [`Blob`]s; blobs smaller than
//! `min_size` pixels are noise and are dropped. Because every hot set at a
//! higher level is a subset of the hot set at a lower level, raising
//! `min_level` can only split or shrink blobs, never grow them.

use std::io::Cursor;

use image::error::{ParameterError, ParameterErrorKind};
use image::{DynamicImage, GrayImage, ImageError, ImageFormat};

use crate::error::{Error, Result};
use crate::palette;
use crate::tiles::TileKey;

/// A decoded heatmap tile: a square grid of intensities, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapTile {
    pub key: TileKey,
    size: u32,
    intensity: Vec<u8>,
}

impl HeatmapTile {
    /// Wrap an intensity grid of `size * size` values.
    pub fn new(key: TileKey, size: u32, intensity: Vec<u8>) -> Result<Self> {
        if size == 0 || intensity.len() != (size as usize) * (size as usize) {
            return Err(Error::ImageDecode {
                coord: key.coord,
                source: dimension_mismatch(),
            });
        }
        Ok(Self { key, size, intensity })
    }

    /// Decode an encoded image (PNG) into intensities.
    ///
    /// Grayscale images carry intensity directly; colour images are mapped
    /// through the heatmap [`palette`].
    pub fn decode(key: TileKey, bytes: &[u8]) -> Result<Self> {
        let coord = key.coord;
        let image = image::load_from_memory(bytes)
            .map_err(|source| Error::ImageDecode { coord, source })?;
        Self::from_image(key, &image)
    }

    pub fn from_image(key: TileKey, image: &DynamicImage) -> Result<Self> {
        let (width, height) = (image.width(), image.height());
        if width != height {
            return Err(Error::ImageDecode {
                coord: key.coord,
                source: dimension_mismatch(),
            });
        }
        let intensity = match image {
            DynamicImage::ImageLuma8(gray) => gray.as_raw().clone(),
            DynamicImage::ImageLumaA8(gray) => gray
                .pixels()
                .map(|p| (u16::from(p.0[0]) * u16::from(p.0[1]) / 255) as u8)
                .collect(),
            other => other.to_rgba8().pixels().map(|p| palette::intensity(p.0)).collect(),
        };
        Self::new(key, width, intensity)
    }

    /// Encode as an 8-bit grayscale PNG (decodes back to the same intensities).
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let coord = self.key.coord;
        let gray = GrayImage::from_raw(self.size, self.size, self.intensity.clone()).ok_or_else(|| {
            Error::ImageDecode { coord, source: dimension_mismatch() }
        })?;
        let mut out = Cursor::new(Vec::new());
        gray.write_to(&mut out, ImageFormat::Png)
            .map_err(|source| Error::ImageDecode { coord, source })?;
        Ok(out.into_inner())
    }

    /// Edge length in pixels.
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn get(&self, col: u32, row: u32) -> u8 {
        self.intensity[(row * self.size + col) as usize]
    }

    pub fn intensities(&self) -> &[u8] {
        &self.intensity
    }
}

fn dimension_mismatch() -> ImageError {
    ImageError::Parameter(ParameterError::from_kind(ParameterErrorKind::DimensionMismatch))
}

/// A 4-connected group of hot pixels inside one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Member pixels as `(col, row)`.
    pub pixels: Vec<(u32, u32)>,
    pub pixel_count: usize,
    /// Mean pixel position `(col, row)`, not rounded.
    pub centroid: (f64, f64),
    pub max_intensity: u8,
}

/// Find all blobs of at least `min_size` pixels with intensity `>= min_level`.
///
/// Blobs come back hottest first; ties keep raster order.
pub fn extract(tile: &HeatmapTile, min_level: u8, min_size: usize) -> Vec<Blob> {
    let size = tile.size;
    let side = size as usize;
    let mut visited = vec![false; side * side];
    let mut blobs = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for row in 0..size {
        for col in 0..size {
            let start = row as usize * side + col as usize;
            if visited[start] || tile.intensity[start] < min_level {
                continue;
            }

            visited[start] = true;
            stack.push((col, row));
            let mut pixels = Vec::new();
            let mut max_intensity = 0u8;

            while let Some((c, r)) = stack.pop() {
                pixels.push((c, r));
                max_intensity = max_intensity.max(tile.get(c, r));

                let neighbours = [
                    (c.wrapping_sub(1), r),
                    (c + 1, r),
                    (c, r.wrapping_sub(1)),
                    (c, r + 1),
                ];
                for (nc, nr) in neighbours {
                    // wrapping_sub turns -1 into u32::MAX, rejected here too
                    if nc >= size || nr >= size {
                        continue;
                    }
                    let idx = nr as usize * side + nc as usize;
                    if !visited[idx] && tile.intensity[idx] >= min_level {
                        visited[idx] = true;
                        stack.push((nc, nr));
                    }
                }
            }

            if pixels.len() < min_size {
                continue;
            }

            let n = pixels.len() as f64;
            let (sum_c, sum_r) = pixels.iter().fold((0.0, 0.0), |(sc, sr), &(c, r)| {
                (sc + f64::from(c), sr + f64::from(r))
            });
            blobs.push(Blob {
                pixel_count: pixels.len(),
                centroid: (sum_c / n, sum_r / n),
                max_intensity,
                pixels,
            });
        }
    }

    blobs.sort_by(|a, b| b.max_intensity.cmp(&a.max_intensity));
    blobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::{OffsetQuadrant, TileCoord};
    use image::{Rgba, RgbaImage};

    fn key() -> TileKey {
        TileKey::new(TileCoord::new(10, 10, 5).unwrap(), "run", OffsetQuadrant::ZERO)
    }

    fn tile_from(size: u32, f: impl Fn(u32, u32) -> u8) -> HeatmapTile {
        let mut data = Vec::new();
        for row in 0..size {
            for col in 0..size {
                data.push(f(col, row));
            }
        }
        HeatmapTile::new(key(), size, data).unwrap()
    }

    #[test]
    fn test_single_square_blob() {
        let tile = tile_from(32, |c, r| if (10..15).contains(&c) && (20..25).contains(&r) { 200 } else { 0 });
        let blobs = extract(&tile, 100, 20);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].pixel_count, 25);
        assert_eq!(blobs[0].centroid, (12.0, 22.0));
        assert_eq!(blobs[0].max_intensity, 200);
    }

    #[test]
    fn test_centroid_is_fractional() {
        // L-shape: (0,0), (1,0), (0,1)
        let tile = tile_from(4, |c, r| if (c, r) == (0, 0) || (c, r) == (1, 0) || (c, r) == (0, 1) { 255 } else { 0 });
        let blobs = extract(&tile, 1, 1);
        assert_eq!(blobs.len(), 1);
        let (cx, cy) = blobs[0].centroid;
        assert!((cx - 1.0 / 3.0).abs() < 1e-12);
        assert!((cy - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_diagonal_pixels_are_separate() {
        let tile = tile_from(4, |c, r| if c == r { 255 } else { 0 });
        let blobs = extract(&tile, 100, 1);
        assert_eq!(blobs.len(), 4);
        assert!(blobs.iter().all(|b| b.pixel_count == 1));
    }

    #[test]
    fn test_small_blobs_are_dropped() {
        let tile = tile_from(32, |c, r| {
            let big = (2..8).contains(&c) && (2..8).contains(&r);
            let small = (20..23).contains(&c) && (20..23).contains(&r);
            if big || small { 180 } else { 0 }
        });
        let blobs = extract(&tile, 100, 20);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].pixel_count, 36);
        // minSize is inclusive
        assert_eq!(extract(&tile, 100, 9).len(), 2);
    }

    #[test]
    fn test_hottest_blob_first() {
        let tile = tile_from(16, |c, r| match (c, r) {
            (0..=2, 0..=2) => 120,
            (10..=12, 10..=12) => 250,
            _ => 0,
        });
        let blobs = extract(&tile, 100, 1);
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].max_intensity, 250);
    }

    #[test]
    fn test_raising_threshold_nests_blobs() {
        // Deterministic pseudo-random field with ridges
        let tile = tile_from(64, |c, r| {
            let v = (c * 37 + r * 101 + (c * r) % 23) % 256;
            if (c + r) % 7 == 0 { 255 } else { v as u8 }
        });

        let mut previous: Option<Vec<Blob>> = None;
        for level in (20..=250).step_by(10) {
            let blobs = extract(&tile, level as u8, 3);
            if let Some(lower) = &previous {
                for blob in &blobs {
                    // Each blob at the higher level sits inside one lower-level blob
                    let parent = lower
                        .iter()
                        .find(|l| l.pixels.contains(&blob.pixels[0]))
                        .expect("higher-level blob without parent");
                    assert!(blob.pixels.iter().all(|p| parent.pixels.contains(p)));
                    assert!(blob.pixel_count <= parent.pixel_count);
                }
                let total: usize = blobs.iter().map(|b| b.pixel_count).sum();
                let lower_total: usize = lower.iter().map(|b| b.pixel_count).sum();
                assert!(total <= lower_total);
            }
            previous = Some(blobs);
        }
    }

    #[test]
    fn test_cooler_bridge_splits_blob_at_higher_level() {
        let tile = tile_from(32, |c, r| {
            // Two plateaus joined by a cooler bridge
            if (2..10).contains(&c) && (2..10).contains(&r) {
                220
            } else if (20..28).contains(&c) && (2..10).contains(&r) {
                220
            } else if (10..20).contains(&c) && (5..7).contains(&r) {
                150
            } else {
                0
            }
        });
        let min_size = 20;
        let low = extract(&tile, 100, min_size);
        let high = extract(&tile, 200, min_size);
        // Blob count may grow once the bridge cools below the level
        assert_eq!(low.len(), 1);
        assert_eq!(high.len(), 2);
        for blob in &high {
            assert!(blob.pixels.iter().all(|p| low[0].pixels.contains(p)));
        }
        let hot: usize = high.iter().map(|b| b.pixel_count).sum();
        assert!(hot <= low[0].pixel_count);
        let highest = extract(&tile, 230, min_size);
        assert!(highest.is_empty());
    }

    #[test]
    fn test_decode_palette_png() {
        let mut img = RgbaImage::new(8, 8);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = if x < 4 && y < 4 { Rgba(palette::color(200)) } else { Rgba([0, 0, 0, 0]) };
        }
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();

        let tile = HeatmapTile::decode(key(), bytes.get_ref()).unwrap();
        assert_eq!(tile.size(), 8);
        assert!((i16::from(tile.get(1, 1)) - 200).abs() <= 4);
        assert_eq!(tile.get(7, 7), 0);
    }

    #[test]
    fn test_grayscale_png_round_trip() {
        let tile = tile_from(16, |c, r| (c * 16 + r) as u8);
        let decoded = HeatmapTile::decode(key(), &tile.to_png().unwrap()).unwrap();
        assert_eq!(decoded.intensities(), tile.intensities());
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = HeatmapTile::decode(key(), b"definitely not a png").unwrap_err();
        assert!(matches!(err, Error::ImageDecode { .. }));
    }
}
