//! Persistent on-disk tile cache.
//!
//! Layout: `<root>/<theme id>/<level>/<y>/<y>_<x>.<ext>` (or the theme's own
//! layout). The size limit is enforced lazily: a running byte total is kept
//! and a directory scan is only run when it crosses the limit, or every
//! `scan_every_stores` writes to correct drift.
//!
//! A tile's modification time is its download time and drives expiry; the
//! access time is bumped on every load and drives pruning order.

use crate::core::config::DiskPrunePolicy;
use crate::core::geo::TileId;
use crate::tiles::texture::GeoSceneTexture;
use crate::Result;
use std::fs::{self, FileTimes};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

#[derive(Debug, Default)]
struct Usage {
    /// Best known byte total, `None` until the first scan
    total: Option<u64>,
    stores_since_scan: u32,
}

#[derive(Debug)]
pub struct PersistentTileCache {
    root: PathBuf,
    limit: u64,
    policy: DiskPrunePolicy,
    usage: Mutex<Usage>,
}

impl PersistentTileCache {
    /// Cache below `root` holding at most `limit_bytes` (0 disables pruning)
    pub fn new(root: impl Into<PathBuf>, limit_bytes: u64, policy: DiskPrunePolicy) -> Self {
        Self {
            root: root.into(),
            limit: limit_bytes,
            policy,
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a tile
    pub fn path_for(&self, texture: &GeoSceneTexture, id: &TileId) -> PathBuf {
        self.root.join(texture.relative_tile_path(id))
    }

    pub fn contains(&self, texture: &GeoSceneTexture, id: &TileId) -> bool {
        self.path_for(texture, id).is_file()
    }

    /// Time since the tile was written; `None` when it is not on disk
    pub fn age(&self, texture: &GeoSceneTexture, id: &TileId) -> Option<Duration> {
        let modified = fs::metadata(self.path_for(texture, id)).ok()?.modified().ok()?;
        // a clock set backwards makes the file look brand new
        Some(modified.elapsed().unwrap_or_default())
    }

    /// Whether the tile is on disk and younger than `expiry`
    pub fn is_fresh(&self, texture: &GeoSceneTexture, id: &TileId, expiry: Option<Duration>) -> bool {
        match (self.age(texture, id), expiry) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(age), Some(expiry)) => age <= expiry,
        }
    }

    /// Reads the encoded bytes of a tile; `Ok(None)` when it is not on disk.
    ///
    /// Marks the tile as recently used so pruning keeps it.
    pub fn load(&self, texture: &GeoSceneTexture, id: &TileId) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(texture, id);
        match fs::read(&path) {
            Ok(bytes) => {
                touch(&path);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the encoded bytes of a tile atomically (temp file + rename)
    pub fn store(&self, texture: &GeoSceneTexture, id: &TileId, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(texture, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let previous = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let tmp = path.with_extension("part");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        let needs_scan = {
            let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
            usage.stores_since_scan += 1;
            if let Some(total) = usage.total.as_mut() {
                *total = total.saturating_sub(previous) + bytes.len() as u64;
            }
            self.limit > 0
                && (usage.total.map_or(true, |total| total > self.limit)
                    || usage.stores_since_scan >= self.policy.scan_every_stores)
        };
        if needs_scan {
            self.prune()?;
        }
        Ok(())
    }

    /// Removes a tile from disk
    pub fn remove(&self, texture: &GeoSceneTexture, id: &TileId) -> Result<()> {
        let path = self.path_for(texture, id);
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(&path) {
            Ok(()) => {
                let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(total) = usage.total.as_mut() {
                    *total = total.saturating_sub(size);
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Scans the cache directory and deletes the least recently used
    /// files until the total is at or below `target_ratio * limit`.
    /// Temp files of stores in flight are neither counted nor deleted.
    ///
    /// Returns the number of bytes freed.
    pub fn prune(&self) -> Result<u64> {
        let mut files = Vec::new();
        collect_files(&self.root, &mut files)?;
        let mut total: u64 = files.iter().map(|f| f.size).sum();

        let mut freed = 0;
        if self.limit > 0 && total > self.limit {
            let target = (self.limit as f64 * self.policy.target_ratio) as u64;
            files.sort_by_key(|f| f.last_used);
            for file in files {
                if total <= target {
                    break;
                }
                match fs::remove_file(&file.path) {
                    Ok(()) => {
                        total -= file.size;
                        freed += file.size;
                    }
                    Err(e) => log::warn!("could not prune {}: {}", file.path.display(), e),
                }
            }
            log::info!(
                "pruned {} bytes from persistent tile cache {}",
                freed,
                self.root.display()
            );
        }

        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        usage.total = Some(total);
        usage.stores_since_scan = 0;
        Ok(freed)
    }

    /// Last known byte total (scans once if unknown)
    pub fn bytes_used(&self) -> Result<u64> {
        let known = self.usage.lock().unwrap_or_else(|e| e.into_inner()).total;
        match known {
            Some(total) => Ok(total),
            None => {
                let mut files = Vec::new();
                collect_files(&self.root, &mut files)?;
                let total = files.iter().map(|f| f.size).sum();
                self.usage.lock().unwrap_or_else(|e| e.into_inner()).total = Some(total);
                Ok(total)
            }
        }
    }
}

struct CachedFile {
    path: PathBuf,
    size: u64,
    last_used: SystemTime,
}

fn touch(path: &Path) {
    let times = FileTimes::new().set_accessed(SystemTime::now());
    if let Err(e) = fs::File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_times(times))
    {
        log::debug!("could not touch {}: {}", path.display(), e);
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "part")
}

fn collect_files(dir: &Path, out: &mut Vec<CachedFile>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        // concurrent stores rename their temp files away
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if meta.is_file() && !is_temp_file(&entry.path()) {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let accessed = meta.accessed().unwrap_or(modified);
            out.push(CachedFile {
                path: entry.path(),
                size: meta.len(),
                last_used: modified.max(accessed),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scratch_dir(name: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "tessera-disk-{}-{}-{}",
            name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_store_and_load_uses_layout() {
        let root = scratch_dir("layout");
        let cache = PersistentTileCache::new(&root, 0, DiskPrunePolicy::default());
        let texture = GeoSceneTexture::new("earth/bluemarble", 2, 1);
        let id = texture.tile_id(2, 3, 1);

        assert_eq!(cache.load(&texture, &id).unwrap(), None);
        cache.store(&texture, &id, b"tile-bytes").unwrap();
        assert!(root.join("earth/bluemarble/2/000001/000001_000003.jpg").is_file());
        assert_eq!(cache.load(&texture, &id).unwrap().unwrap(), b"tile-bytes");

        cache.remove(&texture, &id).unwrap();
        assert!(!cache.contains(&texture, &id));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_prune_removes_oldest_first() {
        let root = scratch_dir("prune");
        let policy = DiskPrunePolicy {
            scan_every_stores: 1000,
            target_ratio: 1.0,
        };
        let cache = PersistentTileCache::new(&root, 250, policy);
        let texture = GeoSceneTexture::new("earth/srtm", 1, 1);

        for x in 0..3 {
            cache.store(&texture, &texture.tile_id(0, x, 0), &[0u8; 100]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        assert!(!cache.contains(&texture, &texture.tile_id(0, 0, 0)));
        assert!(cache.contains(&texture, &texture.tile_id(0, 1, 0)));
        assert!(cache.contains(&texture, &texture.tile_id(0, 2, 0)));
        assert_eq!(cache.bytes_used().unwrap(), 200);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_loaded_tile_survives_prune() {
        let root = scratch_dir("touch");
        let policy = DiskPrunePolicy {
            scan_every_stores: 1000,
            target_ratio: 1.0,
        };
        let cache = PersistentTileCache::new(&root, 250, policy);
        let texture = GeoSceneTexture::new("earth/srtm", 1, 1);

        for x in 0..2 {
            cache.store(&texture, &texture.tile_id(0, x, 0), &[0u8; 100]).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        // reading the oldest tile makes the second one the pruning victim
        assert!(cache.load(&texture, &texture.tile_id(0, 0, 0)).unwrap().is_some());
        std::thread::sleep(Duration::from_millis(20));
        cache.store(&texture, &texture.tile_id(0, 2, 0), &[0u8; 100]).unwrap();

        assert!(cache.contains(&texture, &texture.tile_id(0, 0, 0)));
        assert!(!cache.contains(&texture, &texture.tile_id(0, 1, 0)));
        assert!(cache.contains(&texture, &texture.tile_id(0, 2, 0)));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_prune_keeps_temp_files() {
        let root = scratch_dir("part");
        let policy = DiskPrunePolicy {
            scan_every_stores: 1000,
            target_ratio: 0.5,
        };
        let cache = PersistentTileCache::new(&root, 100, policy);
        let texture = GeoSceneTexture::new("earth/srtm", 1, 1);

        // an old, large store still being written by another thread
        let in_flight = cache.path_for(&texture, &texture.tile_id(0, 1, 0)).with_extension("part");
        fs::create_dir_all(in_flight.parent().unwrap()).unwrap();
        fs::write(&in_flight, [0u8; 500]).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        cache.store(&texture, &texture.tile_id(0, 0, 0), &[0u8; 80]).unwrap();
        cache.store(&texture, &texture.tile_id(1, 0, 0), &[0u8; 80]).unwrap();

        assert!(in_flight.is_file());
        assert!(cache.bytes_used().unwrap() <= 100);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_age_and_freshness() {
        let root = scratch_dir("age");
        let cache = PersistentTileCache::new(&root, 0, DiskPrunePolicy::default());
        let texture = GeoSceneTexture::new("earth/osm", 1, 1);
        let id = texture.tile_id(0, 0, 0);

        assert_eq!(cache.age(&texture, &id), None);
        assert!(!cache.is_fresh(&texture, &id, None));

        cache.store(&texture, &id, b"tile").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.age(&texture, &id).unwrap() < Duration::from_secs(60));
        assert!(cache.is_fresh(&texture, &id, None));
        assert!(cache.is_fresh(&texture, &id, Some(Duration::from_secs(3600))));
        assert!(!cache.is_fresh(&texture, &id, Some(Duration::ZERO)));

        // loading does not renew the download time
        cache.load(&texture, &id).unwrap();
        assert!(!cache.is_fresh(&texture, &id, Some(Duration::ZERO)));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_prune_is_lazy_under_limit() {
        let root = scratch_dir("lazy");
        let cache = PersistentTileCache::new(&root, 10_000, DiskPrunePolicy::default());
        let texture = GeoSceneTexture::new("earth/srtm", 1, 1);
        cache.store(&texture, &texture.tile_id(0, 0, 0), &[1u8; 64]).unwrap();
        cache.store(&texture, &texture.tile_id(0, 1, 0), &[1u8; 64]).unwrap();
        assert_eq!(cache.bytes_used().unwrap(), 128);
        let _ = fs::remove_dir_all(root);
    }
}
