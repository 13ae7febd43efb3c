pub mod addressing;
pub mod cache;
pub mod disk;
pub mod download;
pub mod loader;
pub mod texture;
pub mod tile;

// Re-exports for convenience
pub use addressing::TileGrid;
pub use cache::VolatileTileCache;
pub use disk::PersistentTileCache;
pub use download::{HostSlots, OfflineFetcher, TileFetcher};
pub use loader::{CancellationToken, TileEvent, TileLoader, TileLoaderBuilder};
pub use texture::{BlendingRole, DownloadPolicy, DownloadUsage, GeoSceneTexture, StorageLayout};
pub use tile::{TextureTile, TileImage};

#[cfg(feature = "http")]
pub use download::HttpFetcher;

use crate::core::geo::TileId;
use fxhash::FxHashMap;
use std::sync::{Arc, RwLock};

/// Source of decoded tiles for the projectors and the decorator.
///
/// Implementations must not block on I/O: a missing tile is `None` and the
/// caller draws a transparent pixel instead.
pub trait TileProvider: Send + Sync {
    fn tile(&self, id: TileId) -> Option<Arc<TextureTile>>;
}

/// Provider over a fixed set of preloaded tiles.
#[derive(Debug, Default)]
pub struct StaticTileProvider {
    tiles: RwLock<FxHashMap<TileId, Arc<TextureTile>>>,
}

impl StaticTileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tile: TextureTile) {
        if let Ok(mut tiles) = self.tiles.write() {
            tiles.insert(tile.id, Arc::new(tile));
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.read().map(|tiles| tiles.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TileProvider for StaticTileProvider {
    fn tile(&self, id: TileId) -> Option<Arc<TextureTile>> {
        self.tiles.read().ok()?.get(&id).cloned()
    }
}

impl<T: TileProvider + ?Sized> TileProvider for Arc<T> {
    fn tile(&self, id: TileId) -> Option<Arc<TextureTile>> {
        (**self).tile(id)
    }
}
