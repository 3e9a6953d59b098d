//! `missing-ways`: scan heatmap tiles for traffic with no mapped way nearby.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, LevelFilter};

use missing_ways::{
    write_geojson, AreaOfInterest, DetectionConfig, DetectionReport, Detector, DiskTileCache, Error, FetchConfig,
    HeatmapTileFetcher, InMemoryWays, KnownTasks, MatchConfig, OffsetQuadrant, OutputFormat, OverpassClient,
    OverpassConfig, Result, Scope, TileCoord, WaySource,
};

#[derive(Parser, Debug)]
#[command(name = "missing-ways", version, about = "Find heatmap traffic that no mapped way explains")]
struct Cli {
    /// Area of interest (GeoJSON polygon or multipolygon)
    #[arg(short, long)]
    area: Option<PathBuf>,

    /// Minimum heat level of a hot pixel (0-255)
    #[arg(short = 'm', long = "minlevel", default_value_t = 100)]
    min_level: u8,

    /// Distance to the nearest way that explains a blob (meters)
    #[arg(short, long, default_value_t = 35.0)]
    distance: f64,

    /// Minimum blob size (pixels)
    #[arg(short, long, default_value_t = 20)]
    size: usize,

    /// Tile zoom level
    #[arg(short, long, default_value_t = 15, value_parser = clap::value_parser!(u8).range(10..=15))]
    zoom: u8,

    /// Heatmap activity layer (run, ride, all, ...)
    #[arg(short = 'c', long, default_value = "run")]
    activity: String,

    /// Tile grid offset quadrant: 0 none, 1 half a tile south, 2 east, 3 both
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    offset: u8,

    /// Tasks database of already reviewed tasks (SQLite)
    #[arg(short = 'b', long = "tasks-db")]
    tasks_db: Option<PathBuf>,

    /// Output GeoJSON file (stdout if absent)
    #[arg(short = 'g', long = "geojson")]
    geojson: Option<PathBuf>,

    /// Write one RS-prefixed feature per line instead of a single collection
    #[arg(long)]
    sequence: bool,

    /// Tile column (with -y: scan a single tile instead of an area)
    #[arg(short = 'x', long = "x")]
    tile_x: Option<u32>,

    /// Tile row (with -x)
    #[arg(short = 'y', long = "y")]
    tile_y: Option<u32>,

    /// Tile cache directory
    #[arg(long, default_value = "/var/cache/strava")]
    cache_dir: PathBuf,

    /// Tile URL template with {activity}, {z}, {x} and {y}
    #[arg(long)]
    tile_url: Option<String>,

    /// Overpass API endpoint
    #[arg(long)]
    overpass_url: Option<String>,

    /// Reference ways from a local GeoJSON file instead of Overpass
    #[arg(long)]
    ways: Option<PathBuf>,

    /// Parallel tile loads
    #[arg(long, default_value_t = 8)]
    concurrency: usize,

    #[arg(short, long)]
    verbose: bool,

    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,

    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else if self.verbose {
            LevelFilter::Info
        } else if self.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Warn
        }
    }

    fn scope(&self) -> Result<Scope> {
        match (self.tile_x, self.tile_y, &self.area) {
            (Some(x), Some(y), _) => Ok(Scope::Tile(TileCoord::new(x, y, self.zoom)?)),
            (Some(_), None, _) | (None, Some(_), _) => {
                Err(Error::Configuration("tile coordinates need both -x and -y".to_string()))
            }
            (None, None, Some(path)) => Ok(Scope::Area(AreaOfInterest::from_path(path)?)),
            (None, None, None) => Err(Error::Configuration(
                "provide either an area (-a) or tile coordinates (-x, -y)".to_string(),
            )),
        }
    }

    fn detection_config(&self) -> Result<DetectionConfig> {
        Ok(DetectionConfig {
            zoom: self.zoom,
            activity: self.activity.clone(),
            quadrant: OffsetQuadrant::new(self.offset)?,
            min_level: self.min_level,
            min_size: self.size,
            matching: MatchConfig {
                max_distance: self.distance,
                ..MatchConfig::default()
            },
            fetch_concurrency: self.concurrency,
            ..DetectionConfig::default()
        })
    }

    fn output_format(&self) -> OutputFormat {
        if self.sequence {
            OutputFormat::Sequence
        } else {
            OutputFormat::FeatureCollection
        }
    }
}

async fn detect<W: WaySource>(cli: &Cli, scope: &Scope, ways: W) -> Result<DetectionReport> {
    let mut fetch = FetchConfig {
        max_idle_connections: cli.concurrency * 2,
        ..FetchConfig::default()
    };
    if let Some(url) = &cli.tile_url {
        fetch.url_template = url.clone();
    }
    let cache = DiskTileCache::open(&cli.cache_dir).map_err(|e| Error::Io {
        path: cli.cache_dir.clone(),
        source: e,
    })?;

    let mut detector = Detector::new(HeatmapTileFetcher::new(fetch)?, cache, ways, cli.detection_config()?)?;
    if let Some(path) = &cli.tasks_db {
        detector = detector.with_known_tasks(KnownTasks::open_sqlite(path)?);
    }
    detector.run(scope).await
}

fn write_output(path: Option<&Path>, report: &DetectionReport, format: OutputFormat) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| Error::Io { path: path.to_path_buf(), source: e })?;
            write_geojson(BufWriter::new(file), &report.tasks, format)
        }
        None => write_geojson(io::stdout().lock(), &report.tasks, format),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let scope = cli.scope()?;

    let report = match &cli.ways {
        Some(path) => detect(&cli, &scope, InMemoryWays::from_path(path)?).await?,
        None => {
            let mut overpass = OverpassConfig::default();
            if let Some(url) = &cli.overpass_url {
                overpass.url = url.clone();
            }
            detect(&cli, &scope, OverpassClient::new(overpass)?).await?
        }
    };

    write_output(cli.geojson.as_deref(), &report, cli.output_format())?;
    info!("{} new task(s)", report.stats.emitted);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
