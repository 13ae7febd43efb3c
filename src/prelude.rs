//! Prelude module for common tessera types and traits
//!
//! `use tessera::prelude::*;` brings in everything needed to describe a
//! texture, load its tiles and render a view.

pub use crate::core::{
    config::{EngineConfig, EngineProfile, MapQuality, RenderConfig, ViewContext},
    geo::{GeoCoord, GlobalPixel, ScreenPixel, TileId},
    projection::{Projection, TextureProjection},
    viewport::ViewportState,
};

pub use crate::tiles::{
    addressing::TileGrid,
    cache::VolatileTileCache,
    disk::PersistentTileCache,
    download::TileFetcher,
    loader::{CancellationToken, TileEvent, TileLoader, TileLoaderBuilder},
    texture::{BlendingRole, DownloadUsage, GeoSceneTexture},
    tile::{TextureTile, TileImage},
    StaticTileProvider, TileProvider,
};

#[cfg(feature = "http")]
pub use crate::tiles::download::HttpFetcher;

pub use crate::rendering::{
    canvas::Canvas,
    decorator::{MergedLayerDecorator, StackedTileBuilder, SunPosition},
    mapper::TextureMapper,
    scanline::{FrameStats, ScanlineProjector},
};

pub use crate::planning::{
    pyramid::{TileCoordsPyramid, TileRect},
    region::{GeoBox, RegionDownloadPlanner, RegionPlan, Verdict},
};

pub use crate::{MapError, Result};
