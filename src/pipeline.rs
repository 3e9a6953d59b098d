//! End-to-end detection run.
//!
//! ```text
//! scope ─► coverage ─► batches of tiles ─► load (concurrent)
//!                                         ─► ways around the loaded tiles ─► WayIndex
//!                                         ─► extract/georeference/match (parallel with `parallel`)
//!                     ─► merge by identity ─► dedup ─► tasks
//! ```
//!
//! Ways are queried once per batch, over the footprint of the tiles that
//! actually loaded, so each query stays small on large areas.
//!
//! Failures confined to one tile (fetch, decode) are logged and counted; the
//! run carries on. A failing way source, tasks database or cache aborts it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::area::AreaOfInterest;
use crate::cache::TileStore;
use crate::error::{Error, Result};
use crate::heat::{self, HeatmapTile};
use crate::matcher::{match_and_filter, CandidatePoint, MatchConfig, MatchOutcome, WayIndex};
use crate::provider::{TileProvider, TileSource};
use crate::tasks::{task_identity, Deduplicator, KnownTasks};
use crate::tiles::{compute_coverage, tile_bounds, OffsetQuadrant, TileCoord, TileKey, MAX_ZOOM};
use crate::ways::WaySource;
use crate::{georef, Bounds, GpsPoint};

/// Progress callback: `(tiles done, tiles planned)`.
pub type ProgressCallback = Arc<dyn Fn(u32, u32) + Send + Sync>;

/// Run parameters.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub zoom: u8,
    /// Heatmap layer, e.g. `run`, `ride`, `all`.
    pub activity: String,
    pub quadrant: OffsetQuadrant,
    /// Minimum intensity of a hot pixel (0-255).
    pub min_level: u8,
    /// Minimum blob size in pixels.
    pub min_size: usize,
    pub matching: MatchConfig,
    /// Pixel block that task identities snap to.
    pub identity_block: u32,
    /// Tile loads in flight at once.
    pub fetch_concurrency: usize,
    /// Tiles loaded before a processing pass.
    pub batch_size: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            zoom: 15,
            activity: "run".to_string(),
            quadrant: OffsetQuadrant::ZERO,
            min_level: 100,
            min_size: 20,
            matching: MatchConfig::default(),
            identity_block: 4,
            fetch_concurrency: 8,
            batch_size: 64,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.zoom > MAX_ZOOM {
            return Err(Error::Configuration(format!("zoom {} exceeds maximum {}", self.zoom, MAX_ZOOM)));
        }
        if self.activity.is_empty() || self.activity.contains(['/', '\\']) {
            return Err(Error::Configuration(format!("invalid activity {:?}", self.activity)));
        }
        if !(self.matching.max_distance.is_finite() && self.matching.max_distance >= 0.0) {
            return Err(Error::Configuration(format!(
                "max distance must be a non-negative number, got {}",
                self.matching.max_distance
            )));
        }
        if self.matching.search_factor < 1.0 {
            return Err(Error::Configuration("search factor must be at least 1".to_string()));
        }
        if self.min_size == 0 || self.identity_block == 0 {
            return Err(Error::Configuration("min size and identity block must be positive".to_string()));
        }
        if self.fetch_concurrency == 0 || self.batch_size == 0 {
            return Err(Error::Configuration("concurrency and batch size must be positive".to_string()));
        }
        Ok(())
    }
}

/// What to scan.
#[derive(Debug, Clone)]
pub enum Scope {
    /// Every tile touching the area; candidates outside it are dropped.
    Area(AreaOfInterest),
    /// One tile, no area gate.
    Tile(TileCoord),
}

/// A candidate that survived every gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub identity: String,
    pub position: GpsPoint,
    pub tile: TileKey,
    pub pixel_count: usize,
    pub max_intensity: u8,
    pub pixel_size: f64,
    pub distance: Option<f64>,
}

impl From<CandidatePoint> for Task {
    fn from(c: CandidatePoint) -> Self {
        Self {
            identity: c.identity,
            position: c.position,
            tile: c.tile,
            pixel_count: c.pixel_count,
            max_intensity: c.max_intensity,
            pixel_size: c.pixel_size,
            distance: c.distance_to_way,
        }
    }
}

/// Counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub tiles_planned: usize,
    pub tiles_processed: usize,
    /// Tiles that failed to load.
    pub tiles_skipped: usize,
    /// Tiles the source has no data for.
    pub tiles_missing: usize,
    pub blobs: usize,
    pub outside_area: usize,
    pub near_way: usize,
    /// Way source queries issued.
    pub way_queries: usize,
    /// Candidates folded into another with the same identity.
    pub merged: usize,
    /// Candidates already dismissed by reviewers.
    pub suppressed: usize,
    pub emitted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    pub tasks: Vec<Task>,
    pub stats: RunStats,
}

/// Per-tile result of the CPU stage
#[derive(Debug, Default)]
struct TileFindings {
    candidates: Vec<CandidatePoint>,
    blobs: usize,
    outside_area: usize,
    near_way: usize,
}

/// Blob extraction, georeferencing and matching for one tile.
fn process_tile(
    tile: &HeatmapTile,
    index: &WayIndex,
    area: Option<&AreaOfInterest>,
    config: &DetectionConfig,
) -> TileFindings {
    let coord = tile.key.coord;
    let quadrant = tile.key.quadrant;
    let size = tile.size();
    let pixel_size = georef::pixel_size_meters(coord, size);
    let mut findings = TileFindings::default();

    for blob in heat::extract(tile, config.min_level, config.min_size) {
        findings.blobs += 1;
        let position = georef::to_geo(coord, quadrant, blob.centroid, size);
        match match_and_filter(&position, index, area, &config.matching) {
            MatchOutcome::OutsideArea => findings.outside_area += 1,
            MatchOutcome::NearWay { distance, way_id } => {
                debug!(
                    "[Detector] Blob at {:.6},{:.6} explained by way {} ({:.1}m)",
                    position.latitude, position.longitude, way_id, distance
                );
                findings.near_way += 1;
            }
            MatchOutcome::Unmatched { distance } => findings.candidates.push(CandidatePoint {
                position,
                tile: tile.key.clone(),
                pixel_count: blob.pixel_count,
                max_intensity: blob.max_intensity,
                pixel_size,
                identity: task_identity(coord, quadrant, blob.centroid, size, config.identity_block),
                distance_to_way: distance,
            }),
        }
    }
    findings
}

/// Fold candidates sharing an identity into one, keeping the larger blob.
///
/// Order follows first appearance. Returns the survivors and the number merged.
fn merge_by_identity(candidates: Vec<CandidatePoint>) -> (Vec<CandidatePoint>, usize) {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<CandidatePoint> = Vec::with_capacity(candidates.len());
    let mut folded = 0;

    for candidate in candidates {
        match slots.get(&candidate.identity) {
            Some(&slot) => {
                folded += 1;
                if candidate.pixel_count > merged[slot].pixel_count {
                    merged[slot] = candidate;
                }
            }
            None => {
                slots.insert(candidate.identity.clone(), merged.len());
                merged.push(candidate);
            }
        }
    }
    (merged, folded)
}

fn union_bounds(tiles: &[TileCoord], quadrant: OffsetQuadrant) -> Option<Bounds> {
    tiles.iter().map(|&c| tile_bounds(c, quadrant)).reduce(|a, b| Bounds {
        min_lat: a.min_lat.min(b.min_lat),
        max_lat: a.max_lat.max(b.max_lat),
        min_lng: a.min_lng.min(b.min_lng),
        max_lng: a.max_lng.max(b.max_lng),
    })
}

/// Detection pipeline over a tile source, a tile cache and a way source.
pub struct Detector<S, C, W> {
    provider: TileProvider<S, C>,
    ways: W,
    dedup: Deduplicator,
    config: DetectionConfig,
    progress: Option<ProgressCallback>,
}

impl<S: TileSource, C: TileStore, W: WaySource> Detector<S, C, W> {
    pub fn new(source: S, cache: C, ways: W, config: DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider: TileProvider::new(source, cache, &config.activity),
            ways,
            dedup: Deduplicator::default(),
            config,
            progress: None,
        })
    }

    /// Suppress candidates already reviewed in `known`.
    pub fn with_known_tasks(mut self, known: KnownTasks) -> Self {
        self.dedup = Deduplicator::new(known);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Scan `scope` and return the new tasks, ordered by tile then blob.
    pub async fn run(&self, scope: &Scope) -> Result<DetectionReport> {
        let start = Instant::now();
        let quadrant = self.config.quadrant;
        let (tiles, area): (Vec<TileCoord>, Option<&AreaOfInterest>) = match scope {
            Scope::Area(area) => (
                compute_coverage(area, self.config.zoom, quadrant).into_iter().collect(),
                Some(area),
            ),
            Scope::Tile(coord) => (vec![*coord], None),
        };

        let mut stats = RunStats {
            tiles_planned: tiles.len(),
            ..RunStats::default()
        };
        info!(
            "[Detector] {} tiles at zoom {} quadrant {} ({})",
            tiles.len(),
            self.config.zoom,
            quadrant,
            self.config.activity
        );

        if tiles.is_empty() {
            info!("[Detector] Nothing to scan");
            return Ok(DetectionReport { tasks: Vec::new(), stats });
        }

        let total = tiles.len() as u32;
        let mut done = 0u32;
        let mut candidates = Vec::new();

        for batch in tiles.chunks(self.config.batch_size) {
            let provider = &self.provider;
            let mut loaded: Vec<(TileCoord, Result<Option<HeatmapTile>>)> = stream::iter(batch.iter().copied())
                .map(|coord| async move { (coord, provider.load(coord, quadrant).await) })
                .buffer_unordered(self.config.fetch_concurrency)
                .collect()
                .await;
            loaded.sort_by_key(|(coord, _)| *coord);

            let mut ready = Vec::with_capacity(loaded.len());
            for (coord, outcome) in loaded {
                match outcome {
                    Ok(Some(tile)) => ready.push(tile),
                    Ok(None) => stats.tiles_missing += 1,
                    Err(e) if e.is_tile_local() => {
                        warn!("[Detector] Skipping tile {}: {}", coord, e);
                        stats.tiles_skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            let index = match self.batch_ways(&ready, &mut stats).await? {
                Some(index) => index,
                None => {
                    done += batch.len() as u32;
                    if let Some(ref cb) = self.progress {
                        cb(done, total);
                    }
                    continue;
                }
            };
            let config = &self.config;
            let index = &index;

            #[cfg(feature = "parallel")]
            let findings: Vec<TileFindings> = {
                use rayon::prelude::*;
                ready.par_iter().map(|tile| process_tile(tile, index, area, config)).collect()
            };

            #[cfg(not(feature = "parallel"))]
            let findings: Vec<TileFindings> = ready
                .iter()
                .map(|tile| process_tile(tile, index, area, config))
                .collect();

            stats.tiles_processed += ready.len();
            for found in findings {
                stats.blobs += found.blobs;
                stats.outside_area += found.outside_area;
                stats.near_way += found.near_way;
                candidates.extend(found.candidates);
            }

            done += batch.len() as u32;
            if let Some(ref cb) = self.progress {
                cb(done, total);
            }
            debug!("[Detector] {}/{} tiles, {} candidates so far", done, total, candidates.len());
        }

        let (candidates, merged) = merge_by_identity(candidates);
        stats.merged = merged;

        let mut tasks = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if self.dedup.is_new(&candidate.identity) {
                tasks.push(Task::from(candidate));
            } else {
                stats.suppressed += 1;
            }
        }
        stats.emitted = tasks.len();

        info!(
            "[Detector] Done in {:.2}s: {} tasks ({} tiles, {} missing, {} skipped, {} way queries, {} blobs, {} near ways, {} suppressed)",
            start.elapsed().as_secs_f64(),
            stats.emitted,
            stats.tiles_processed,
            stats.tiles_missing,
            stats.tiles_skipped,
            stats.way_queries,
            stats.blobs,
            stats.near_way,
            stats.suppressed
        );
        Ok(DetectionReport { tasks, stats })
    }

    /// Way index around the loaded tiles of one batch, `None` if none loaded.
    async fn batch_ways(&self, ready: &[HeatmapTile], stats: &mut RunStats) -> Result<Option<WayIndex>> {
        let coords: Vec<TileCoord> = ready.iter().map(|t| t.key.coord).collect();
        let Some(bounds) = union_bounds(&coords, self.config.quadrant) else {
            return Ok(None);
        };
        let ways = self.ways.load(bounds.expanded(self.config.matching.search_radius())).await?;
        stats.way_queries += 1;
        let index = WayIndex::new(ways);
        debug!("[Detector] {} reference ways around {} tiles", index.len(), coords.len());
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskTileCache;
    use crate::emit::{write_geojson, OutputFormat};
    use crate::provider::fixtures::StaticTiles;
    use crate::provider::FetchOutcome;
    use crate::tasks::{TaskRecord, TaskStatus};
    use crate::ways::{InMemoryWays, WayGeometry};
    use std::sync::atomic::{AtomicU32, Ordering};

    const SIZE: u32 = 256;

    fn tile_coord() -> TileCoord {
        TileCoord::new(17_941, 11_370, 15).unwrap()
    }

    /// 256px tile with a 5x5 block of intensity 200 at cols/rows 100..105
    fn blob_tile() -> Vec<u8> {
        let mut data = vec![0u8; (SIZE * SIZE) as usize];
        for row in 100..105 {
            for col in 100..105 {
                data[row * SIZE as usize + col] = 200;
            }
        }
        data
    }

    fn blob_position() -> GpsPoint {
        georef::to_geo(tile_coord(), OffsetQuadrant::ZERO, (102.0, 102.0), SIZE)
    }

    /// Short east-west way `meters` north of the blob
    fn way_north_of_blob(meters: f64) -> WayGeometry {
        let p = blob_position();
        let lat = p.latitude + meters / 111_195.0;
        WayGeometry::new(
            1,
            vec![GpsPoint::new(lat, p.longitude - 0.002), GpsPoint::new(lat, p.longitude + 0.002)],
            false,
        )
    }

    fn config() -> DetectionConfig {
        DetectionConfig {
            min_size: 20,
            min_level: 100,
            ..DetectionConfig::default()
        }
    }

    fn source() -> Arc<StaticTiles> {
        Arc::new(StaticTiles::default().with_tile(tile_coord(), SIZE, blob_tile()))
    }

    #[tokio::test]
    async fn test_unexplained_blob_becomes_task() {
        let dir = tempfile::tempdir().unwrap();
        let detector = Detector::new(
            source(),
            DiskTileCache::open(dir.path()).unwrap(),
            InMemoryWays::new(vec![way_north_of_blob(50.0)]),
            config(),
        )
        .unwrap();

        let report = detector.run(&Scope::Tile(tile_coord())).await.unwrap();
        assert_eq!(report.tasks.len(), 1);
        let task = &report.tasks[0];
        let expected = blob_position();
        assert!((task.position.latitude - expected.latitude).abs() < 1e-9);
        assert!((task.position.longitude - expected.longitude).abs() < 1e-9);
        let distance = task.distance.unwrap();
        assert!(distance > 35.0 && (distance - 50.0).abs() < 0.5, "distance {}", distance);
        assert_eq!(task.pixel_count, 25);
        assert_eq!(task.identity, "15/17941/11370/100/100");
        assert_eq!(report.stats.emitted, 1);
        assert_eq!(report.stats.blobs, 1);
    }

    #[tokio::test]
    async fn test_blob_near_way_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let detector = Detector::new(
            source(),
            DiskTileCache::open(dir.path()).unwrap(),
            InMemoryWays::new(vec![way_north_of_blob(10.0)]),
            config(),
        )
        .unwrap();

        let report = detector.run(&Scope::Tile(tile_coord())).await.unwrap();
        assert!(report.tasks.is_empty());
        assert_eq!(report.stats.near_way, 1);
    }

    #[tokio::test]
    async fn test_dismissed_task_is_not_reported_again() {
        let dir = tempfile::tempdir().unwrap();
        let source = source();
        let ways = InMemoryWays::new(vec![]);

        let first = Detector::new(Arc::clone(&source), DiskTileCache::open(dir.path()).unwrap(), ways.clone(), config())
            .unwrap()
            .run(&Scope::Tile(tile_coord()))
            .await
            .unwrap();
        assert_eq!(first.tasks.len(), 1);
        assert_eq!(first.tasks[0].distance, None);

        let known = KnownTasks::new(HashMap::from([(
            first.tasks[0].identity.clone(),
            TaskRecord { status: TaskStatus::NotAnIssue, mapper: None, link: None },
        )]));
        let second = Detector::new(Arc::clone(&source), DiskTileCache::open(dir.path()).unwrap(), ways, config())
            .unwrap()
            .with_known_tasks(known)
            .run(&Scope::Tile(tile_coord()))
            .await
            .unwrap();
        assert!(second.tasks.is_empty());
        assert_eq!(second.stats.suppressed, 1);
        // Second run was served from the cache
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_area_without_tiles_gives_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let area = AreaOfInterest::from_geojson_str(
            r#"{"type":"Polygon","coordinates":[[[10,86],[11,86],[11,87],[10,87],[10,86]]]}"#,
        )
        .unwrap();
        let detector = Detector::new(
            source(),
            DiskTileCache::open(dir.path()).unwrap(),
            InMemoryWays::default(),
            config(),
        )
        .unwrap();

        let report = detector.run(&Scope::Area(area)).await.unwrap();
        assert!(report.tasks.is_empty());
        assert_eq!(report.stats, RunStats::default());

        let mut out = Vec::new();
        write_geojson(&mut out, &report.tasks, OutputFormat::FeatureCollection).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert!(value["features"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blob_outside_area_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        // West half of the tile only; the blob sits at column 102 of 256
        let b = tile_bounds(tile_coord(), OffsetQuadrant::ZERO);
        let split = b.min_lng + (b.max_lng - b.min_lng) * 0.3;
        let area = AreaOfInterest::from_geojson_str(&format!(
            r#"{{"type":"Polygon","coordinates":[[[{w},{s}],[{e},{s}],[{e},{n}],[{w},{n}],[{w},{s}]]]}}"#,
            w = b.min_lng + 1e-6,
            e = split,
            s = b.min_lat + 1e-6,
            n = b.max_lat - 1e-6,
        ))
        .unwrap();
        let detector = Detector::new(
            source(),
            DiskTileCache::open(dir.path()).unwrap(),
            InMemoryWays::default(),
            config(),
        )
        .unwrap();

        let report = detector.run(&Scope::Area(area)).await.unwrap();
        assert_eq!(report.stats.tiles_planned, 1);
        assert_eq!(report.stats.outside_area, 1);
        assert!(report.tasks.is_empty());
    }

    struct FlakySource;

    impl TileSource for FlakySource {
        async fn fetch(&self, coord: TileCoord, _activity: &str) -> Result<FetchOutcome> {
            if coord.x % 2 == 0 {
                Err(Error::network(coord, "connection reset"))
            } else {
                Ok(FetchOutcome::Missing)
            }
        }
    }

    #[tokio::test]
    async fn test_tile_failures_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let area = AreaOfInterest::from_geojson_str(
            r#"{"type":"Polygon","coordinates":[[[17.0,48.0],[17.3,48.0],[17.3,48.2],[17.0,48.2],[17.0,48.0]]]}"#,
        )
        .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let detector = Detector::new(
            FlakySource,
            DiskTileCache::open(dir.path()).unwrap(),
            InMemoryWays::default(),
            DetectionConfig { zoom: 12, batch_size: 2, ..config() },
        )
        .unwrap()
        .with_progress(Arc::new(move |done: u32, total: u32| {
            assert!(done <= total);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let report = detector.run(&Scope::Area(area)).await.unwrap();
        let stats = &report.stats;
        assert!(stats.tiles_planned > 1);
        assert!(stats.tiles_skipped > 0);
        assert_eq!(stats.tiles_skipped + stats.tiles_missing, stats.tiles_planned);
        assert_eq!(stats.way_queries, 0);
        assert_eq!(calls.load(Ordering::SeqCst) as usize, stats.tiles_planned.div_ceil(2));
    }

    /// Records every bounding box it is asked for.
    #[derive(Default)]
    struct RecordingWays {
        queries: std::sync::Mutex<Vec<Bounds>>,
    }

    impl WaySource for Arc<RecordingWays> {
        async fn load(&self, bounds: Bounds) -> Result<Vec<WayGeometry>> {
            self.queries.lock().unwrap().push(bounds);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_ways_are_queried_per_loaded_batch() {
        let dir = tempfile::tempdir().unwrap();
        let east = TileCoord::new(17_943, 11_370, 15).unwrap();
        let source = Arc::new(
            StaticTiles::default()
                .with_tile(tile_coord(), SIZE, blob_tile())
                .with_tile(east, SIZE, blob_tile()),
        );
        let west = tile_bounds(tile_coord(), OffsetQuadrant::ZERO);
        let far = tile_bounds(east, OffsetQuadrant::ZERO);
        let area = AreaOfInterest::from_geojson_str(&format!(
            r#"{{"type":"Polygon","coordinates":[[[{w},{s}],[{e},{s}],[{e},{n}],[{w},{n}],[{w},{s}]]]}}"#,
            w = west.min_lng + 1e-6,
            e = far.max_lng - 1e-6,
            s = west.min_lat + 1e-6,
            n = west.max_lat - 1e-6,
        ))
        .unwrap();
        let ways = Arc::new(RecordingWays::default());
        let detector = Detector::new(
            source,
            DiskTileCache::open(dir.path()).unwrap(),
            Arc::clone(&ways),
            DetectionConfig { batch_size: 1, ..config() },
        )
        .unwrap();

        let report = detector.run(&Scope::Area(area)).await.unwrap();
        assert_eq!(report.stats.tiles_planned, 3);
        assert_eq!(report.stats.tiles_missing, 1);
        assert_eq!(report.stats.way_queries, 2);
        assert_eq!(report.tasks.len(), 2);

        let tile_width = west.max_lng - west.min_lng;
        let queries = ways.queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        for bounds in queries.iter() {
            assert!(bounds.max_lng - bounds.min_lng < 1.5 * tile_width);
        }
    }

    #[test]
    fn test_merge_keeps_larger_blob() {
        let candidate = |identity: &str, pixel_count: usize| CandidatePoint {
            position: GpsPoint::new(48.0, 17.0),
            tile: TileKey::new(tile_coord(), "run", OffsetQuadrant::ZERO),
            pixel_count,
            max_intensity: 200,
            pixel_size: 3.2,
            identity: identity.to_string(),
            distance_to_way: None,
        };
        let (merged, folded) = merge_by_identity(vec![
            candidate("a", 20),
            candidate("b", 30),
            candidate("a", 40),
            candidate("a", 25),
        ]);
        assert_eq!(folded, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].identity, "a");
        assert_eq!(merged[0].pixel_count, 40);
        assert_eq!(merged[1].identity, "b");
    }

    #[test]
    fn test_config_validation() {
        assert!(DetectionConfig::default().validate().is_ok());
        assert!(DetectionConfig { zoom: 30, ..DetectionConfig::default() }.validate().is_err());
        assert!(DetectionConfig { activity: "../x".into(), ..DetectionConfig::default() }.validate().is_err());
        assert!(DetectionConfig { batch_size: 0, ..DetectionConfig::default() }.validate().is_err());
        let mut negative = DetectionConfig::default();
        negative.matching.max_distance = -1.0;
        assert!(negative.validate().is_err());
    }
}
