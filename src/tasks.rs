//! Task identity and cross-run deduplication.
//!
//! Every candidate gets an identity string derived from where its blob sits
//! on the unshifted tile grid, `"{zoom}/{x}/{y}/{row}/{col}"`, with `row`/`col`
//! snapped down to a block of pixels. The same physical blob seen through any
//! phase, or on a later run, maps to the same identity, which is what the
//! review database is keyed by.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::tiles::{tiles_per_axis, OffsetQuadrant, TileCoord};

/// Review status of a previously published task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Created,
    Fixed,
    NotAnIssue,
    Skipped,
    Deleted,
    AlreadyFixed,
    TooHard,
    Answered,
    Validated,
    Disabled,
    Other(String),
}

impl TaskStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "Created" => TaskStatus::Created,
            "Fixed" => TaskStatus::Fixed,
            "Not_an_Issue" => TaskStatus::NotAnIssue,
            "Skipped" => TaskStatus::Skipped,
            "Deleted" => TaskStatus::Deleted,
            "Already_Fixed" => TaskStatus::AlreadyFixed,
            "Too_Hard" => TaskStatus::TooHard,
            "Answered" => TaskStatus::Answered,
            "Validated" => TaskStatus::Validated,
            "Disabled" => TaskStatus::Disabled,
            other => TaskStatus::Other(other.to_string()),
        }
    }

    /// Reviewers decided there is nothing to map here.
    pub fn is_dismissed(&self) -> bool {
        matches!(self, TaskStatus::NotAnIssue | TaskStatus::TooHard)
    }

    /// Reviewers claim it was mapped.
    pub fn is_fixed(&self) -> bool {
        matches!(self, TaskStatus::Fixed | TaskStatus::AlreadyFixed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Created => "Created",
            TaskStatus::Fixed => "Fixed",
            TaskStatus::NotAnIssue => "Not_an_Issue",
            TaskStatus::Skipped => "Skipped",
            TaskStatus::Deleted => "Deleted",
            TaskStatus::AlreadyFixed => "Already_Fixed",
            TaskStatus::TooHard => "Too_Hard",
            TaskStatus::Answered => "Answered",
            TaskStatus::Validated => "Validated",
            TaskStatus::Disabled => "Disabled",
            TaskStatus::Other(name) => name,
        };
        f.write_str(name)
    }
}

/// What the review database knows about one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub mapper: Option<String>,
    pub link: Option<String>,
}

/// Canonical identity of a blob centroid.
///
/// `centroid` is a pixel position inside the tile `coord` of phase
/// `quadrant`; the result names the unshifted tile containing that pixel and
/// the pixel's row/column snapped down to a multiple of `block`.
pub fn task_identity(
    coord: TileCoord,
    quadrant: OffsetQuadrant,
    centroid: (f64, f64),
    tile_size: u32,
    block: u32,
) -> String {
    let size = u64::from(tile_size);
    let block = u64::from(block.max(1));
    let n = tiles_per_axis(coord.zoom);
    let (sx, sy) = quadrant.shift();

    let global = |index: u32, shift: f64, offset: f64| -> u64 {
        let position = (f64::from(index) + shift) * size as f64 + offset;
        position.max(0.0).floor() as u64
    };
    let gx = global(coord.x, sx, centroid.0) % (n * size);
    let gy = global(coord.y, sy, centroid.1).min(n * size - 1);

    let (col, row) = ((gx % size) / block * block, (gy % size) / block * block);
    format!("{}/{}/{}/{}/{}", coord.zoom, gx / size, gy / size, row, col)
}

/// Previously published tasks, keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct KnownTasks {
    records: HashMap<String, TaskRecord>,
}

impl KnownTasks {
    pub fn new(records: HashMap<String, TaskRecord>) -> Self {
        Self { records }
    }

    /// Read the `tasks` table of a review database (opened read-only).
    ///
    /// Expects columns `TaskName`, `TaskStatus`, `Mapper`, `TaskLink`.
    pub fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db_error = |source| Error::Database { path: path.to_path_buf(), source };

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(db_error)?;
        let mut stmt = conn
            .prepare("SELECT TaskName, TaskStatus, Mapper, TaskLink FROM tasks")
            .map_err(db_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    TaskRecord {
                        status: TaskStatus::parse(&row.get::<_, Option<String>>(1)?.unwrap_or_default()),
                        mapper: row.get(2)?,
                        link: row.get(3)?,
                    },
                ))
            })
            .map_err(db_error)?;

        let records = rows.collect::<std::result::Result<HashMap<_, _>, _>>().map_err(db_error)?;
        info!("[Tasks] Loaded {} known tasks from {}", records.len(), path.display());
        Ok(Self { records })
    }

    pub fn get(&self, identity: &str) -> Option<&TaskRecord> {
        self.records.get(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Decides whether a candidate is worth publishing again.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    known: KnownTasks,
}

impl Deduplicator {
    pub fn new(known: KnownTasks) -> Self {
        Self { known }
    }

    /// False if reviewers already dismissed this identity.
    ///
    /// Candidates whose task was marked fixed are still reported, with a
    /// warning: the heatmap disagrees with the claim.
    pub fn is_new(&self, identity: &str) -> bool {
        let Some(record) = self.known.get(identity) else {
            return true;
        };
        if record.status.is_dismissed() {
            debug!("[Dedup] {} already reviewed as {}", identity, record.status);
            return false;
        }
        if record.status.is_fixed() {
            warn!(
                "[Dedup] {} marked {} by {} ({}) but still unmatched",
                identity,
                record.status,
                record.mapper.as_deref().unwrap_or("unknown mapper"),
                record.link.as_deref().unwrap_or("no link"),
            );
        }
        true
    }
}
