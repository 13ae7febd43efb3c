use crossbeam_channel::{unbounded, Receiver, Sender};

use super::cache::VolatileTileCache;
use super::disk::PersistentTileCache;
use super::download::{HostSlots, OfflineFetcher, TileFetcher, DEFAULT_HOST_CONNECTIONS};
use super::texture::{url_host, DownloadUsage, GeoSceneTexture};
use super::tile::{TextureTile, TileImage};
use super::TileProvider;
use crate::core::config::{EngineConfig, TileLoaderConfig};
use crate::core::geo::TileId;
use crate::planning::pyramid::TileCoordsPyramid;
use crate::{MapError, Result};
use fxhash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Notification sent to subscribers when the loader finishes a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    /// A real tile arrived in the volatile cache; repaint
    Updated(TileId),
    /// A bulk (region) download stored the tile on disk
    Downloaded(TileId),
    /// The tile could not be loaded or decoded and will not be retried
    Failed(TileId),
}

/// Cooperative cancellation flag for batch jobs.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Job {
    id: TileId,
    usage: DownloadUsage,
    cancel: Option<CancellationToken>,
}

struct Shared {
    config: TileLoaderConfig,
    textures: RwLock<FxHashMap<u64, Arc<GeoSceneTexture>>>,
    volatile: VolatileTileCache,
    disk: Option<PersistentTileCache>,
    fetcher: Arc<dyn TileFetcher>,
    host_slots: Arc<HostSlots>,
    pending: Mutex<FxHashSet<(TileId, DownloadUsage)>>,
    failed: Mutex<FxHashSet<TileId>>,
    subscribers: Mutex<Vec<Sender<TileEvent>>>,
    shutdown: AtomicBool,
}

/// Serves decoded tiles from memory and loads missing ones in the
/// background from disk or the network.
///
/// `request_tile` never blocks: a miss schedules a job on the worker pool
/// and returns a provisional tile upscaled from the nearest cached ancestor
/// (if any). Subscribers receive a [`TileEvent::Updated`] once the real tile
/// is in memory.
pub struct TileLoader {
    shared: Arc<Shared>,
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

/// Builder for [`TileLoader`]
pub struct TileLoaderBuilder {
    config: TileLoaderConfig,
    volatile_budget: usize,
    textures: Vec<GeoSceneTexture>,
    disk: Option<PersistentTileCache>,
    fetcher: Arc<dyn TileFetcher>,
}

impl TileLoaderBuilder {
    pub fn new() -> Self {
        let config = EngineConfig::default();
        Self {
            config: config.loader,
            volatile_budget: config.cache.volatile_bytes(),
            textures: Vec::new(),
            disk: None,
            fetcher: Arc::new(OfflineFetcher),
        }
    }

    /// Takes loader settings and the volatile budget from an engine config
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.config = config.loader.clone();
        self.volatile_budget = config.cache.volatile_bytes();
        self
    }

    pub fn volatile_budget(mut self, bytes: usize) -> Self {
        self.volatile_budget = bytes;
        self
    }

    pub fn texture(mut self, texture: GeoSceneTexture) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn disk_cache(mut self, disk: PersistentTileCache) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn TileFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn build(self) -> TileLoader {
        let textures = self
            .textures
            .into_iter()
            .map(|texture| (texture.theme_hash(), Arc::new(texture)))
            .collect();
        let shared = Arc::new(Shared {
            config: self.config,
            textures: RwLock::new(textures),
            volatile: VolatileTileCache::new(self.volatile_budget),
            disk: self.disk,
            fetcher: self.fetcher,
            host_slots: HostSlots::new(),
            pending: Mutex::new(FxHashSet::default()),
            failed: Mutex::new(FxHashSet::default()),
            subscribers: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        });

        let (job_tx, job_rx) = unbounded::<Job>();
        let workers = (0..shared.config.worker_threads.max(1))
            .map(|n| {
                let shared = Arc::clone(&shared);
                let job_rx = job_rx.clone();
                std::thread::Builder::new()
                    .name(format!("tessera-loader-{n}"))
                    .spawn(move || worker_loop(shared, job_rx))
            })
            .filter_map(|spawned| {
                spawned
                    .map_err(|e| log::error!("failed to spawn tile loader worker: {}", e))
                    .ok()
            })
            .collect();

        TileLoader {
            shared,
            job_tx: Some(job_tx),
            workers,
        }
    }
}

impl Default for TileLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileLoader {
    pub fn builder() -> TileLoaderBuilder {
        TileLoaderBuilder::new()
    }

    /// Registers another texture layer
    pub fn add_texture(&self, texture: GeoSceneTexture) {
        if let Ok(mut textures) = self.shared.textures.write() {
            textures.insert(texture.theme_hash(), Arc::new(texture));
        }
    }

    /// Metadata of a registered texture by theme hash
    pub fn texture(&self, theme: u64) -> Option<Arc<GeoSceneTexture>> {
        self.shared.texture(theme)
    }

    /// Receives every [`TileEvent`] from now on
    pub fn subscribe(&self) -> Receiver<TileEvent> {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Returns the cached tile for `id`, or schedules its loading and
    /// returns a provisional stand-in (or `None` if no ancestor is cached).
    pub fn request_tile(&self, id: TileId) -> Option<Arc<TextureTile>> {
        if let Some(tile) = self.shared.volatile.get(&id) {
            if (tile.provisional || tile.is_expired()) && !self.is_failed(&id) {
                // stale or provisional pixels are still the best we have
                self.schedule(id, DownloadUsage::Browse, None);
            }
            return Some(tile);
        }

        if !self.is_failed(&id) {
            self.schedule(id, DownloadUsage::Browse, None);
        }
        if !self.shared.config.show_parent_tiles {
            return None;
        }

        let provisional = self.provisional_tile(id)?;
        log::debug!("serving provisional tile for {:?}", id);
        self.shared.volatile.insert(Arc::clone(&provisional));
        Some(provisional)
    }

    /// Queues every tile of `pyramid` for a bulk download to the
    /// persistent cache.
    ///
    /// The token is checked between tiles here and again by the workers
    /// before each job; returns the number of queued tiles.
    pub fn download_region(
        &self,
        theme: u64,
        pyramid: &TileCoordsPyramid,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut queued = 0;
        for id in pyramid.tile_ids(theme) {
            if cancel.is_cancelled() {
                log::info!("region download cancelled after {} tiles", queued);
                return Err(MapError::Cancelled);
            }
            if self.schedule(id, DownloadUsage::Bulk, Some(cancel.clone())) {
                queued += 1;
            }
        }
        log::info!("queued {} tiles for region download", queued);
        Ok(queued)
    }

    /// Drops a tile from memory and forgets a permanent failure so the next
    /// request reloads it.
    pub fn invalidate(&self, id: &TileId) {
        self.shared.volatile.remove(id);
        if let Ok(mut failed) = self.shared.failed.lock() {
            failed.remove(id);
        }
    }

    pub fn clear_volatile(&self) {
        self.shared.volatile.clear();
    }

    pub fn volatile_cache(&self) -> &VolatileTileCache {
        &self.shared.volatile
    }

    pub fn persistent_cache(&self) -> Option<&PersistentTileCache> {
        self.shared.disk.as_ref()
    }

    /// Number of queued or running jobs
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_failed(&self, id: &TileId) -> bool {
        self.shared
            .failed
            .lock()
            .map(|failed| failed.contains(id))
            .unwrap_or(false)
    }

    /// Queues a job unless the same tile is already pending for `usage`
    fn schedule(&self, id: TileId, usage: DownloadUsage, cancel: Option<CancellationToken>) -> bool {
        let Some(job_tx) = &self.job_tx else {
            return false;
        };
        let Ok(mut pending) = self.shared.pending.lock() else {
            return false;
        };
        if !pending.insert((id, usage)) {
            return false;
        }
        if let Err(e) = job_tx.send(Job { id, usage, cancel }) {
            pending.remove(&(id, usage));
            log::warn!("failed to queue tile {:?}: {}", id, e);
            return false;
        }
        true
    }

    fn provisional_tile(&self, id: TileId) -> Option<Arc<TextureTile>> {
        (0..id.level).rev().find_map(|level| {
            let ancestor = self.shared.volatile.get(&id.ancestor(level)?)?;
            if ancestor.provisional {
                return None;
            }
            TextureTile::provisional_from(&ancestor, id).map(Arc::new)
        })
    }
}

impl TileProvider for TileLoader {
    fn tile(&self, id: TileId) -> Option<Arc<TextureTile>> {
        self.request_tile(id)
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Shared {
    fn texture(&self, theme: u64) -> Option<Arc<GeoSceneTexture>> {
        self.textures.read().ok()?.get(&theme).cloned()
    }

    fn notify(&self, event: TileEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event).is_ok());
        }
    }

    fn finish(&self, job: &Job) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&(job.id, job.usage));
        }
    }

    fn fail(&self, job: &Job, reason: &str) {
        log::warn!("giving up on tile {:?}: {}", job.id, reason);
        if job.usage == DownloadUsage::Browse {
            if let Ok(mut failed) = self.failed.lock() {
                failed.insert(job.id);
            }
        }
        self.finish(job);
        self.notify(TileEvent::Failed(job.id));
    }

    fn process(&self, job: &Job) {
        let Some(texture) = self.texture(job.id.theme) else {
            self.fail(job, "unknown theme");
            return;
        };

        if job.usage == DownloadUsage::Bulk {
            let on_disk = self
                .disk
                .as_ref()
                .map(|disk| disk.is_fresh(&texture, &job.id, texture.expiry()))
                .unwrap_or(false);
            if !on_disk {
                if let Err(e) = self.download(&texture, job) {
                    self.fail(job, &e.to_string());
                    return;
                }
            }
            self.finish(job);
            self.notify(TileEvent::Downloaded(job.id));
            return;
        }

        let (bytes, age) = match self.load_from_disk(&texture, job) {
            DiskLookup::Fresh(bytes, age) => (bytes, age),
            DiskLookup::Stale(stale, age) => match self.download(&texture, job) {
                Ok(bytes) => (bytes, Duration::ZERO),
                Err(e) => {
                    log::warn!("refreshing expired tile {:?} failed, keeping it: {}", job.id, e);
                    (stale, age)
                }
            },
            DiskLookup::Missing => match self.download(&texture, job) {
                Ok(bytes) => (bytes, Duration::ZERO),
                Err(e) => return self.fail(job, &e.to_string()),
            },
        };

        match TileImage::decode(&bytes) {
            Ok(image) => {
                let tile = TextureTile::new(job.id, image)
                    .with_expiry(texture.expiry())
                    .with_age(age);
                self.volatile.insert(Arc::new(tile));
                self.finish(job);
                log::debug!("tile {:?} loaded", job.id);
                self.notify(TileEvent::Updated(job.id));
            }
            Err(e) => self.fail(job, &format!("undecodable image: {e}")),
        }
    }

    fn load_from_disk(&self, texture: &GeoSceneTexture, job: &Job) -> DiskLookup {
        let Some(disk) = &self.disk else {
            return DiskLookup::Missing;
        };
        let Some(age) = disk.age(texture, &job.id) else {
            return DiskLookup::Missing;
        };
        match disk.load(texture, &job.id) {
            Ok(Some(bytes)) if texture.expiry().is_some_and(|expiry| age > expiry) => {
                log::debug!("tile {:?} on disk expired {:?} old", job.id, age);
                DiskLookup::Stale(bytes, age)
            }
            Ok(Some(bytes)) => DiskLookup::Fresh(bytes, age),
            Ok(None) => DiskLookup::Missing,
            Err(e) => {
                log::warn!("reading tile {:?} from disk failed: {}", job.id, e);
                DiskLookup::Missing
            }
        }
    }

    /// Downloads a tile respecting the host policy and stores it on disk
    fn download(&self, texture: &GeoSceneTexture, job: &Job) -> Result<Vec<u8>> {
        let url = texture
            .tile_url(&job.id)
            .ok_or_else(|| MapError::Fetch(format!("no download url for {}", texture.theme_id)))?;
        let host = url_host(&url).to_string();
        let max = texture
            .max_connections(&host, job.usage)
            .unwrap_or(DEFAULT_HOST_CONNECTIONS);

        let mut attempt = 0;
        let bytes = loop {
            let result = {
                let _slot = self.host_slots.acquire(&host, job.usage, max);
                log::debug!("fetch tile {:?} attempt {}", job.id, attempt + 1);
                self.fetcher.fetch(&url)
            };
            match result {
                Ok(bytes) => break bytes,
                Err(e) if attempt < self.config.max_retries => {
                    log::warn!("tile {:?} download failed on attempt {}: {}", job.id, attempt + 1, e);
                    attempt += 1;
                    std::thread::sleep(Duration::from_millis(self.config.retry_delay_ms));
                }
                Err(e) => return Err(e),
            }
        };
        log::info!("downloaded tile {:?} ({} bytes)", job.id, bytes.len());

        if let Some(disk) = &self.disk {
            if let Err(e) = disk.store(texture, &job.id, &bytes) {
                log::warn!("could not store tile {:?} on disk: {}", job.id, e);
            }
        }
        Ok(bytes)
    }
}

/// Encoded bytes found in the persistent cache and their age
enum DiskLookup {
    Fresh(Vec<u8>, Duration),
    Stale(Vec<u8>, Duration),
    Missing,
}

fn worker_loop(shared: Arc<Shared>, job_rx: Receiver<Job>) {
    while let Ok(job) = job_rx.recv() {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if job.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            shared.finish(&job);
            continue;
        }
        shared.process(&job);
    }
    log::debug!("tile loader worker exiting");
}
