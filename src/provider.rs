//! Cache-then-fetch loading of decoded heatmap tiles.
//!
//! Quadrant-0 tiles come straight from a [`TileSource`] and are stored as
//! received. Tiles of a shifted quadrant do not exist on any server: they are
//! composed from the (up to four) quadrant-0 tiles under their footprint and
//! stored as grayscale PNGs under their own key, so a later run reads them back
//! without touching the neighbours again.

use std::future::Future;

use log::{debug, warn};

use crate::cache::{CachedTile, TileStore};
use crate::error::{Error, Result};
use crate::heat::HeatmapTile;
use crate::tiles::{OffsetQuadrant, TileCoord, TileKey};

/// What a tile source returned for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Encoded image bytes.
    Image(Vec<u8>),
    /// The source has no tile here (e.g. HTTP 404). Remembered in the cache.
    Missing,
    /// The source cannot tell right now (e.g. a cache-only run). Not
    /// remembered, so a later run with a real source still fetches the tile.
    Unavailable,
}

/// A remote (or otherwise expensive) origin of quadrant-0 heatmap tiles.
pub trait TileSource: Send + Sync {
    fn fetch(
        &self,
        coord: TileCoord,
        activity: &str,
    ) -> impl Future<Output = Result<FetchOutcome>> + Send;
}

/// Source for cache-only runs: every tile not already cached is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSource;

impl TileSource for OfflineSource {
    async fn fetch(&self, coord: TileCoord, activity: &str) -> Result<FetchOutcome> {
        debug!("[OfflineSource] {}/{} not cached", activity, coord);
        Ok(FetchOutcome::Unavailable)
    }
}

/// A base tile lookup, and whether its answer is final.
struct BaseLookup {
    tile: Option<HeatmapTile>,
    settled: bool,
}

impl BaseLookup {
    fn settled(tile: Option<HeatmapTile>) -> Self {
        Self { tile, settled: true }
    }
}

/// Loads decoded tiles for one activity through a cache.
pub struct TileProvider<S, C> {
    source: S,
    cache: C,
    activity: String,
}

impl<S: TileSource, C: TileStore> TileProvider<S, C> {
    pub fn new(source: S, cache: C, activity: &str) -> Self {
        Self {
            source,
            cache,
            activity: activity.to_string(),
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Load the tile at `coord` in the given phase.
    ///
    /// `Ok(None)` means the source has no data there. A cached entry is never
    /// re-fetched; one that fails to decode is evicted and reported.
    pub async fn load(&self, coord: TileCoord, quadrant: OffsetQuadrant) -> Result<Option<HeatmapTile>> {
        let key = TileKey::new(coord, &self.activity, quadrant);
        if let Some(entry) = self.cached(&key)? {
            return self.decode_entry(key, entry);
        }
        if quadrant.is_shifted() {
            self.compose(key).await
        } else {
            Ok(self.fetch_base(key).await?.tile)
        }
    }

    fn cached(&self, key: &TileKey) -> Result<Option<CachedTile>> {
        self.cache.get(key).map_err(|e| Error::io(key.to_string(), e))
    }

    fn decode_entry(&self, key: TileKey, entry: CachedTile) -> Result<Option<HeatmapTile>> {
        match entry {
            CachedTile::Missing => Ok(None),
            CachedTile::Image(bytes) => match HeatmapTile::decode(key.clone(), &bytes) {
                Ok(tile) => Ok(Some(tile)),
                Err(e) => {
                    warn!("[TileProvider] Evicting undecodable entry {}: {}", key, e);
                    self.cache.evict(&key).map_err(|io| Error::io(key.to_string(), io))?;
                    Err(e)
                }
            },
        }
    }

    async fn fetch_base(&self, key: TileKey) -> Result<BaseLookup> {
        match self.source.fetch(key.coord, &self.activity).await? {
            FetchOutcome::Missing => {
                debug!("[TileProvider] {} missing at source", key);
                self.cache.put_missing(&key).map_err(|e| Error::io(key.to_string(), e))?;
                Ok(BaseLookup::settled(None))
            }
            FetchOutcome::Unavailable => {
                debug!("[TileProvider] {} unavailable, not cached", key);
                Ok(BaseLookup { tile: None, settled: false })
            }
            FetchOutcome::Image(bytes) => {
                self.cache.put(&key, &bytes).map_err(|e| Error::io(key.to_string(), e))?;
                Ok(BaseLookup::settled(self.decode_entry(key, CachedTile::Image(bytes))?))
            }
        }
    }

    async fn load_base(&self, coord: TileCoord) -> Result<BaseLookup> {
        let key = TileKey::new(coord, &self.activity, OffsetQuadrant::ZERO);
        match self.cached(&key)? {
            Some(entry) => Ok(BaseLookup::settled(self.decode_entry(key, entry)?)),
            None => self.fetch_base(key).await,
        }
    }

    /// Build a shifted tile from the base tiles it overlaps.
    ///
    /// The result is cached only when every base tile under it is settled.
    async fn compose(&self, key: TileKey) -> Result<Option<HeatmapTile>> {
        let (sx, sy) = key.quadrant.shift();
        let dxs: &[i64] = if sx > 0.0 { &[0, 1] } else { &[0] };
        let dys: &[i64] = if sy > 0.0 { &[0, 1] } else { &[0] };

        // parts[dy][dx]
        let mut parts: Vec<Vec<Option<HeatmapTile>>> = Vec::with_capacity(dys.len());
        let mut settled = true;
        for &dy in dys {
            let mut row = Vec::with_capacity(dxs.len());
            for &dx in dxs {
                row.push(match key.coord.offset(dx, dy) {
                    Some(neighbour) => {
                        let lookup = self.load_base(neighbour).await?;
                        settled &= lookup.settled;
                        lookup.tile
                    }
                    None => None,
                });
            }
            parts.push(row);
        }

        let Some(size) = parts.iter().flatten().flatten().map(HeatmapTile::size).next() else {
            debug!("[TileProvider] No base tiles under {}", key);
            if settled {
                self.cache.put_missing(&key).map_err(|e| Error::io(key.to_string(), e))?;
            }
            return Ok(None);
        };

        let side = size as usize;
        let offset_x = if sx > 0.0 { side / 2 } else { 0 };
        let offset_y = if sy > 0.0 { side / 2 } else { 0 };
        let mut intensity = vec![0u8; side * side];
        for row in 0..side {
            let gy = row + offset_y;
            for col in 0..side {
                let gx = col + offset_x;
                let part = parts[gy / side][gx / side].as_ref().filter(|t| t.size() == size);
                if let Some(tile) = part {
                    intensity[row * side + col] = tile.get((gx % side) as u32, (gy % side) as u32);
                }
            }
        }

        let tile = HeatmapTile::new(key.clone(), size, intensity)?;
        if !settled {
            debug!("[TileProvider] {} composed from partial data, not cached", key);
            return Ok(Some(tile));
        }
        let bytes = tile.to_png()?;
        self.cache.put(&key, &bytes).map_err(|e| Error::io(key.to_string(), e))?;
        debug!("[TileProvider] Composed {} from {} base tile(s)", key, dxs.len() * dys.len());
        Ok(Some(tile))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source serving preset intensity grids as PNG.
    #[derive(Default)]
    pub(crate) struct StaticTiles {
        pub tiles: HashMap<TileCoord, Vec<u8>>,
        pub calls: AtomicUsize,
    }

    impl StaticTiles {
        pub fn with_tile(mut self, coord: TileCoord, size: u32, intensity: Vec<u8>) -> Self {
            let key = TileKey::new(coord, "run", OffsetQuadrant::ZERO);
            let png = HeatmapTile::new(key, size, intensity).unwrap().to_png().unwrap();
            self.tiles.insert(coord, png);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TileSource for StaticTiles {
        async fn fetch(&self, coord: TileCoord, _activity: &str) -> Result<FetchOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(match self.tiles.get(&coord) {
                Some(bytes) => FetchOutcome::Image(bytes.clone()),
                None => FetchOutcome::Missing,
            })
        }
    }

    impl TileSource for std::sync::Arc<StaticTiles> {
        async fn fetch(&self, coord: TileCoord, activity: &str) -> Result<FetchOutcome> {
            self.as_ref().fetch(coord, activity).await
        }
    }
}
