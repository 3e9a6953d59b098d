//! Error taxonomy for the detection pipeline.
//!
//! Failures local to one tile (`Network`, `ImageDecode`) are logged and the
//! tile is skipped. Failures in global inputs (area, tasks database, way
//! source) are fatal and abort the run before tile work starts.

use std::path::PathBuf;

use crate::tiles::TileCoord;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or incomplete run configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Fetch failure after retries were exhausted.
    #[error("network error for {target}: {message}")]
    Network { target: String, message: String },

    /// A fetched or cached tile could not be decoded.
    #[error("cannot decode tile {coord}: {source}")]
    ImageDecode {
        coord: TileCoord,
        #[source]
        source: image::ImageError,
    },

    /// Malformed area or way geometry.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// The tasks database could not be read.
    #[error("tasks database {path}: {source}")]
    Database {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn network(target: impl ToString, message: impl ToString) -> Self {
        Error::Network {
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    /// True for failures that only affect a single tile.
    pub fn is_tile_local(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::ImageDecode { .. })
    }
}
