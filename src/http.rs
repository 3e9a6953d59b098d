//! HTTP tile fetching and Overpass way queries.
//!
//! [`HeatmapTileFetcher`] downloads heatmap tiles with:
//! - Connection pooling
//! - Dispatch rate limiting (spaces out request starts)
//! - Automatic retry with exponential backoff on 429, 5xx and transport errors
//! - HTTP 404 reported as a missing tile, which the cache remembers
//!
//! [`OverpassClient`] loads reference ways for a bounding box from an
//! Overpass API endpoint, retrying a fixed number of times with a pause in
//! between (public instances answer "too busy" rather often).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::provider::{FetchOutcome, TileSource};
use crate::tiles::TileCoord;
use crate::ways::{WayGeometry, WaySource};
use crate::{Bounds, GpsPoint};

const USER_AGENT: &str = concat!("missing-ways/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Configuration
// ============================================================================

/// Heatmap tile fetcher settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Tile URL with `{activity}`, `{z}`, `{x}` and `{y}` placeholders.
    pub url_template: String,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Minimum spacing between request starts.
    pub dispatch_interval: Duration,
    pub timeout: Duration,
    pub max_idle_connections: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url_template: "https://strava-heatmap.tiles.freemap.sk/{activity}/hot/{z}/{x}/{y}.png".to_string(),
            max_retries: 3,
            dispatch_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(30),
            max_idle_connections: 16,
        }
    }
}

/// Overpass way source settings.
#[derive(Debug, Clone)]
pub struct OverpassConfig {
    pub url: String,
    /// Total attempts before giving up.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Server-side query timeout.
    pub query_timeout: Duration,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            url: "https://overpass-api.de/api/interpreter".to_string(),
            max_attempts: 10,
            retry_delay: Duration::from_secs(5),
            query_timeout: Duration::from_secs(180),
        }
    }
}

// ============================================================================
// Dispatch Rate Limiter
// ============================================================================

/// Dispatch rate limiter - spaces out when requests START.
///
/// Each caller reserves the next free slot; slots are `interval` apart no
/// matter how many requests are in flight.
struct DispatchRateLimiter {
    interval: Duration,
    next_dispatch: Mutex<Instant>,
    dispatched_count: AtomicU32,
    consecutive_throttles: AtomicU32,
}

impl DispatchRateLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_dispatch: Mutex::new(Instant::now()),
            dispatched_count: AtomicU32::new(0),
            consecutive_throttles: AtomicU32::new(0),
        }
    }

    /// Wait for our dispatch slot.
    async fn wait_for_dispatch_slot(&self) -> u32 {
        let (wait_duration, dispatch_num) = {
            let mut next = self.next_dispatch.lock().await;
            let now = Instant::now();
            let dispatch_at = if *next > now { *next } else { now };
            *next = dispatch_at + self.interval;

            let num = self.dispatched_count.fetch_add(1, Ordering::Relaxed) + 1;
            (dispatch_at.saturating_duration_since(now), num)
        };

        // Wait outside the lock
        if wait_duration > Duration::from_millis(5) {
            debug!("[Dispatch #{}] Waiting {:?} for slot", dispatch_num, wait_duration);
            tokio::time::sleep(wait_duration).await;
        }

        dispatch_num
    }

    fn record_success(&self) {
        self.consecutive_throttles.store(0, Ordering::Relaxed);
    }

    fn record_throttle(&self) -> Duration {
        let count = self.consecutive_throttles.fetch_add(1, Ordering::Relaxed) + 1;
        // Exponential backoff: 1s, 2s, 4s, 8s max
        let backoff = Duration::from_millis(500 * (1 << count.min(4)));
        warn!("[DispatchRateLimiter] Throttled! Consecutive: {}, backing off {:?}", count, backoff);
        backoff
    }
}

// ============================================================================
// Heatmap Tiles
// ============================================================================

/// HTTP [`TileSource`] for heatmap tiles.
pub struct HeatmapTileFetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<DispatchRateLimiter>,
}

impl HeatmapTileFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        for placeholder in ["{z}", "{x}", "{y}"] {
            if !config.url_template.contains(placeholder) {
                return Err(Error::Configuration(format!(
                    "tile URL template {:?} lacks {}",
                    config.url_template, placeholder
                )));
            }
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(config.max_idle_connections)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            rate_limiter: Arc::new(DispatchRateLimiter::new(config.dispatch_interval)),
            client,
            config,
        })
    }

    pub fn tile_url(&self, coord: TileCoord, activity: &str) -> String {
        self.config
            .url_template
            .replace("{activity}", activity)
            .replace("{z}", &coord.zoom.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }
}

fn transport_backoff(retries: u32) -> Duration {
    Duration::from_millis(200 * (1 << retries.min(5)))
}

impl TileSource for HeatmapTileFetcher {
    async fn fetch(&self, coord: TileCoord, activity: &str) -> Result<FetchOutcome> {
        let url = self.tile_url(coord, activity);
        let dispatch_num = self.rate_limiter.wait_for_dispatch_slot().await;
        let req_start = Instant::now();
        let mut retries = 0;

        loop {
            let failure = match self.client.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::NOT_FOUND {
                        self.rate_limiter.record_success();
                        debug!("[Fetch {}] 404, no tile", coord);
                        return Ok(FetchOutcome::Missing);
                    }
                    if status.is_success() {
                        match resp.bytes().await {
                            Ok(bytes) => {
                                self.rate_limiter.record_success();
                                debug!(
                                    "[Fetch #{} {}] {:.1}KB in {:?}",
                                    dispatch_num,
                                    coord,
                                    bytes.len() as f64 / 1024.0,
                                    req_start.elapsed()
                                );
                                if bytes.is_empty() {
                                    return Ok(FetchOutcome::Missing);
                                }
                                return Ok(FetchOutcome::Image(bytes.to_vec()));
                            }
                            // Truncated transfer
                            Err(e) => (format!("body download error: {}", e), transport_backoff(retries)),
                        }
                    } else if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(Error::network(&url, format!("HTTP {}", status)));
                    } else {
                        (format!("HTTP {}", status), self.rate_limiter.record_throttle())
                    }
                }
                Err(e) => (format!("request error: {}", e), transport_backoff(retries)),
            };

            retries += 1;
            if retries > self.config.max_retries {
                return Err(Error::network(&url, format!("{} (gave up after {} retries)", failure.0, self.config.max_retries)));
            }
            warn!("[Fetch {}] {}, retry {} after {:?}", coord, failure.0, retries, failure.1);
            tokio::time::sleep(failure.1).await;
        }
    }
}

// ============================================================================
// Overpass Ways
// ============================================================================

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl Element {
    /// Surface-like: `area=yes`, a non-track `leisure`, or a multipolygon;
    /// `area=no` always wins.
    fn is_area(&self) -> bool {
        let tag = |k: &str| self.tags.get(k).map(String::as_str);
        if tag("area") == Some("no") {
            return false;
        }
        tag("area") == Some("yes")
            || tag("leisure").is_some_and(|v| v != "track")
            || (self.kind == "relation" && tag("type") == Some("multipolygon"))
    }
}

fn to_points(geometry: &[Option<LatLon>]) -> Vec<GpsPoint> {
    geometry.iter().flatten().map(|p| GpsPoint::new(p.lat, p.lon)).collect()
}

fn way(id: i64, points: Vec<GpsPoint>, area: bool) -> WayGeometry {
    let mut way = WayGeometry::new(id, points, area);
    way.is_area &= way.is_closed();
    way
}

/// Convert an Overpass `out geom` JSON response into way geometries.
fn parse_overpass(body: &[u8]) -> Result<Vec<WayGeometry>> {
    let response: OverpassResponse = serde_json::from_slice(body)?;
    let mut ways = Vec::new();
    for element in &response.elements {
        match element.kind.as_str() {
            "way" => ways.push(way(element.id, to_points(&element.geometry), element.is_area())),
            "relation" => {
                let area = element.is_area();
                ways.extend(
                    element
                        .members
                        .iter()
                        .filter(|m| m.kind == "way")
                        .map(|m| way(element.id, to_points(&m.geometry), area)),
                );
            }
            _ => {}
        }
    }
    Ok(ways)
}

/// Build the Overpass QL query for reference ways in `bounds`.
pub fn overpass_query(bounds: &Bounds, timeout: Duration) -> String {
    format!(
        "[out:json][timeout:{}][bbox:{},{},{},{}];\
         (nwr[highway];nwr[railway];nwr[leisure~\"track|pitch\"];nwr[route=ferry];);out geom;",
        timeout.as_secs(),
        bounds.min_lat,
        bounds.min_lng,
        bounds.max_lat,
        bounds.max_lng
    )
}

/// [`WaySource`] backed by an Overpass API endpoint.
pub struct OverpassClient {
    client: Client,
    config: OverpassConfig,
}

impl OverpassClient {
    pub fn new(config: OverpassConfig) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(Error::Configuration("Overpass needs at least one attempt".to_string()));
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.query_timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, query: &str) -> std::result::Result<Vec<WayGeometry>, String> {
        let resp = self
            .client
            .post(&self.config.url)
            .form(&[("data", query)])
            .send()
            .await
            .map_err(|e| format!("request error: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }
        let body = resp.bytes().await.map_err(|e| format!("body download error: {}", e))?;
        parse_overpass(&body).map_err(|e| e.to_string())
    }
}

impl WaySource for OverpassClient {
    async fn load(&self, bounds: Bounds) -> Result<Vec<WayGeometry>> {
        let query = overpass_query(&bounds, self.config.query_timeout);
        let start = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=self.config.max_attempts {
            match self.attempt(&query).await {
                Ok(ways) => {
                    info!(
                        "[Overpass] {} ways in {:.2}s (attempt {})",
                        ways.len(),
                        start.elapsed().as_secs_f64(),
                        attempt
                    );
                    return Ok(ways);
                }
                Err(e) => {
                    warn!("[Overpass] Attempt {}/{} failed: {}", attempt, self.config.max_attempts, e);
                    last_error = e;
                }
            }
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }
        Err(Error::network(&self.config.url, format!("no answer from Overpass: {}", last_error)))
    }
}
