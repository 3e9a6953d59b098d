//! Persistent heatmap tile cache.
//!
//! The cache is plain files under a root directory, one entry per
//! `(activity, zoom, x, y, quadrant)`:
//!
//! ```text
//! {root}/{activity}/{zoom}/{x}/{y}.png        quadrant 0 (raw server response)
//! {root}/{activity}/{zoom}/q{q}/{x}/{y}.png   quadrants 1-3 (composed tiles)
//! ```
//!
//! An empty file records a tile the server does not have (HTTP 404), so it is
//! not requested again. Entries never expire; removing files is up to the
//! operator.
//!
//! Writes land in a temporary file in the destination directory and are
//! renamed into place once complete, so an interrupted run never leaves a
//! truncated entry behind.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use log::debug;
use tempfile::NamedTempFile;

use crate::tiles::TileKey;

/// A cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedTile {
    /// Encoded image bytes.
    Image(Vec<u8>),
    /// The source has no tile at this address.
    Missing,
}

/// Storage for tile bytes, shared by concurrent tile loads.
///
/// Implementations must make `put` atomic per key: a reader sees either no
/// entry or the complete bytes.
pub trait TileStore: Send + Sync {
    fn get(&self, key: &TileKey) -> io::Result<Option<CachedTile>>;

    fn put(&self, key: &TileKey, bytes: &[u8]) -> io::Result<()>;

    /// Record that the source has no tile at `key`.
    fn put_missing(&self, key: &TileKey) -> io::Result<()>;

    /// Remove an entry (e.g. one that no longer decodes).
    fn evict(&self, key: &TileKey) -> io::Result<()>;
}

/// File-system backed [`TileStore`].
#[derive(Debug, Clone)]
pub struct DiskTileCache {
    root: PathBuf,
}

impl DiskTileCache {
    /// Open (and create if absent) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// File path of the entry for `key`.
    pub fn entry_path(&self, key: &TileKey) -> PathBuf {
        let mut path = self.root.join(&key.activity).join(key.coord.zoom.to_string());
        if key.quadrant.is_shifted() {
            path.push(format!("q{}", key.quadrant));
        }
        path.push(key.coord.x.to_string());
        path.push(format!("{}.png", key.coord.y));
        path
    }

    fn write_atomic(&self, key: &TileKey, bytes: &[u8]) -> io::Result<()> {
        let path = self.entry_path(key);
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "cache entry without parent"))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!("[TileCache] Stored {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }
}

impl TileStore for DiskTileCache {
    fn get(&self, key: &TileKey) -> io::Result<Option<CachedTile>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Ok(Some(CachedTile::Missing)),
            Ok(bytes) => Ok(Some(CachedTile::Image(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&self, key: &TileKey, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            // An empty file means "missing"; never store an empty image under it
            return Err(io::Error::new(io::ErrorKind::InvalidData, "empty tile body"));
        }
        self.write_atomic(key, bytes)
    }

    fn put_missing(&self, key: &TileKey) -> io::Result<()> {
        self.write_atomic(key, &[])
    }

    fn evict(&self, key: &TileKey) -> io::Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::{OffsetQuadrant, TileCoord};

    fn key(q: u8) -> TileKey {
        TileKey::new(
            TileCoord::new(17_941, 11_370, 15).unwrap(),
            "run",
            OffsetQuadrant::new(q).unwrap(),
        )
    }

    #[test]
    fn test_layout_matches_activity_zoom_x_y() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTileCache::open(dir.path()).unwrap();
        assert_eq!(
            cache.entry_path(&key(0)),
            dir.path().join("run/15/17941/11370.png")
        );
        assert_eq!(
            cache.entry_path(&key(3)),
            dir.path().join("run/15/q3/17941/11370.png")
        );
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTileCache::open(dir.path().join("nested")).unwrap();
        assert_eq!(cache.get(&key(0)).unwrap(), None);

        cache.put(&key(0), b"png bytes").unwrap();
        assert_eq!(
            cache.get(&key(0)).unwrap(),
            Some(CachedTile::Image(b"png bytes".to_vec()))
        );
        // Quadrants are separate entries
        assert_eq!(cache.get(&key(1)).unwrap(), None);
    }

    #[test]
    fn test_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTileCache::open(dir.path()).unwrap();
        cache.put_missing(&key(0)).unwrap();
        assert_eq!(cache.get(&key(0)).unwrap(), Some(CachedTile::Missing));
        assert!(cache.put(&key(2), &[]).is_err());
    }

    #[test]
    fn test_evict() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTileCache::open(dir.path()).unwrap();
        cache.put(&key(0), b"corrupt").unwrap();
        cache.evict(&key(0)).unwrap();
        assert_eq!(cache.get(&key(0)).unwrap(), None);
        // Evicting an absent entry is fine
        cache.evict(&key(0)).unwrap();
    }

    #[test]
    fn test_no_temporary_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTileCache::open(dir.path()).unwrap();
        cache.put(&key(0), b"first").unwrap();
        cache.put(&key(0), b"second").unwrap();

        let entry_dir = cache.entry_path(&key(0)).parent().unwrap().to_path_buf();
        let names: Vec<_> = fs::read_dir(entry_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("11370.png")]);
        assert_eq!(
            cache.get(&key(0)).unwrap(),
            Some(CachedTile::Image(b"second".to_vec()))
        );
    }
}
