//! Scan a cache-only tile set against local ways and print the tasks.
//!
//! A synthetic heatmap tile with two traces is written into a fresh cache;
//! one trace follows a mapped footway, the other crosses open ground.
//!
//! Run with: `cargo run --example offline_scan`

use missing_ways::provider::OfflineSource;
use missing_ways::{
    georef, write_geojson, DetectionConfig, Detector, DiskTileCache, GpsPoint, HeatmapTile, InMemoryWays,
    OffsetQuadrant, OutputFormat, Scope, TileCoord, TileKey, TileStore, WayGeometry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new().filter_level(log::LevelFilter::Info).init();

    let coord = TileCoord::new(17_941, 11_370, 15)?;
    let size = 256u32;

    // Two vertical traces, 4 px wide, at columns 40 and 180
    let mut intensity = vec![0u8; (size * size) as usize];
    for row in 20..220 {
        for col in (40..44).chain(180..184) {
            intensity[row * size as usize + col] = 230;
        }
    }

    let dir = tempfile::tempdir()?;
    let cache = DiskTileCache::open(dir.path())?;
    let key = TileKey::new(coord, "run", OffsetQuadrant::ZERO);
    cache.put(&key, &HeatmapTile::new(key.clone(), size, intensity)?.to_png()?)?;

    // Footway along the first trace
    let top = georef::to_geo(coord, OffsetQuadrant::ZERO, (41.5, 20.0), size);
    let bottom = georef::to_geo(coord, OffsetQuadrant::ZERO, (41.5, 220.0), size);
    let ways = InMemoryWays::new(vec![WayGeometry::new(
        1,
        vec![
            GpsPoint::new(top.latitude, top.longitude),
            GpsPoint::new(bottom.latitude, bottom.longitude),
        ],
        false,
    )]);

    let detector = Detector::new(OfflineSource, cache, ways, DetectionConfig::default())?;
    let report = detector.run(&Scope::Tile(coord)).await?;

    eprintln!("{:#?}", report.stats);
    write_geojson(std::io::stdout().lock(), &report.tasks, OutputFormat::FeatureCollection)?;
    Ok(())
}
