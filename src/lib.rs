//! # Tessera
//!
//! A Rust-native texture mapping engine for virtual globes.
//!
//! The crate turns a pyramid of raster tiles into a projected destination
//! image: tiles are addressed per zoom level, kept in a volatile and a
//! persistent cache, loaded asynchronously, mapped scanline by scanline for
//! the equirectangular, Mercator and spherical projections and finally
//! decorated with clouds, sun shading and debug stamps.

pub mod core;
pub mod planning;
pub mod rendering;
pub mod tiles;
pub mod prelude;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{EngineConfig, MapQuality, ViewContext},
    geo::{GeoCoord, GlobalPixel, ScreenPixel, TileId},
    projection::Projection,
    viewport::ViewportState,
};

pub use crate::tiles::{
    addressing::TileGrid,
    cache::VolatileTileCache,
    disk::PersistentTileCache,
    loader::{TileEvent, TileLoader},
    texture::GeoSceneTexture,
    tile::{TextureTile, TileImage},
    TileProvider,
};

pub use crate::rendering::{
    canvas::Canvas,
    decorator::{MergedLayerDecorator, SunPosition},
    mapper::TextureMapper,
    scanline::ScanlineProjector,
};

pub use crate::planning::{
    pyramid::{TileCoordsPyramid, TileRect},
    region::{GeoBox, RegionDownloadPlanner, RegionPlan},
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, MapError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "http")]
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Invalid tile pyramid: levels {top}..={bottom} are inverted or deeper than the maximum tile level")]
    InvalidPyramid { top: u32, bottom: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Error type alias for convenience
pub type Error = MapError;
