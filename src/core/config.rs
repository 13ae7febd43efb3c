//! Configuration system for rendering quality, caching and tile loading
//!
//! This module provides a hierarchical configuration that can be built from
//! presets or loaded from JSON, mirroring the options the map widget exposes:
//! cache limits, per-context map quality, interlacing, tile level limits and
//! the debug tile-id stamp.

use crate::core::constants::{
    ABSOLUTE_MAX_TILE_LEVEL, DEFAULT_MAX_INTERPOLATION_STEP, DEFAULT_MAX_REGION_TILES,
    DEFAULT_PERSISTENT_CACHE_KB, DEFAULT_VOLATILE_CACHE_KB,
};
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rendering fidelity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapQuality {
    /// Nearest sampling, interpolated, optionally interlaced
    Low,
    /// Bilinear sampling, interpolated
    High,
    /// Bilinear sampling of every pixel
    Print,
}

impl MapQuality {
    /// Whether texture lookups use bilinear filtering
    pub fn is_bilinear(&self) -> bool {
        !matches!(self, Self::Low)
    }

    /// Whether scanlines may be interpolated between exact samples
    pub fn allows_interpolation(&self) -> bool {
        !matches!(self, Self::Print)
    }
}

/// What the view is doing while it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewContext {
    Still,
    Animation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineProfile {
    Balanced,
    LowQuality,
    HighQuality,
    Custom(EngineConfig),
}

impl EngineProfile {
    pub fn resolve(&self) -> EngineConfig {
        match self {
            Self::Balanced => EngineConfig::default(),
            Self::LowQuality => EngineConfig {
                cache: CacheConfig {
                    volatile_tile_cache_limit: 30 * 1024,
                    ..CacheConfig::default()
                },
                render: RenderConfig {
                    still_quality: MapQuality::Low,
                    animation_quality: MapQuality::Low,
                    interlaced: true,
                    max_interpolation_step: 16,
                    ..RenderConfig::default()
                },
                loader: TileLoaderConfig {
                    worker_threads: 2,
                    ..TileLoaderConfig::default()
                },
                region: RegionConfig::default(),
            },
            Self::HighQuality => EngineConfig {
                cache: CacheConfig {
                    volatile_tile_cache_limit: 400 * 1024,
                    ..CacheConfig::default()
                },
                render: RenderConfig {
                    still_quality: MapQuality::Print,
                    animation_quality: MapQuality::High,
                    interlaced: false,
                    max_interpolation_step: 4,
                    ..RenderConfig::default()
                },
                loader: TileLoaderConfig {
                    worker_threads: 8,
                    ..TileLoaderConfig::default()
                },
                region: RegionConfig::default(),
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

impl Default for EngineProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub render: RenderConfig,
    pub loader: TileLoaderConfig,
    pub region: RegionConfig,
}

impl EngineConfig {
    /// Parses a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serializes the configuration to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.render.max_tile_level > ABSOLUTE_MAX_TILE_LEVEL {
            return Err(MapError::InvalidConfig(format!(
                "max_tile_level {} exceeds {}",
                self.render.max_tile_level, ABSOLUTE_MAX_TILE_LEVEL
            )));
        }
        if self.render.max_interpolation_step == 0 {
            return Err(MapError::InvalidConfig(
                "max_interpolation_step must be at least 1".into(),
            ));
        }
        if self.loader.worker_threads == 0 {
            return Err(MapError::InvalidConfig("worker_threads must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.prune.target_ratio) {
            return Err(MapError::InvalidConfig(
                "prune target_ratio must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Map quality for the given view context
    pub fn quality_for(&self, context: ViewContext) -> MapQuality {
        match context {
            ViewContext::Still => self.render.still_quality,
            ViewContext::Animation => self.render.animation_quality,
        }
    }
}

/// Cache budgets, in kilobytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub volatile_tile_cache_limit: u64,
    pub persistent_tile_cache_limit: u64,
    pub prune: DiskPrunePolicy,
}

impl CacheConfig {
    pub fn volatile_bytes(&self) -> usize {
        (self.volatile_tile_cache_limit as usize).saturating_mul(1024)
    }

    pub fn persistent_bytes(&self) -> u64 {
        self.persistent_tile_cache_limit.saturating_mul(1024)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            volatile_tile_cache_limit: DEFAULT_VOLATILE_CACHE_KB,
            persistent_tile_cache_limit: DEFAULT_PERSISTENT_CACHE_KB,
            prune: DiskPrunePolicy::default(),
        }
    }
}

/// When and how far the persistent cache is pruned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskPrunePolicy {
    /// Force a directory scan after this many stores even if the running
    /// total looks fine (it drifts when other processes touch the cache).
    pub scan_every_stores: u32,
    /// Prune down to this fraction of the limit
    pub target_ratio: f64,
}

impl Default for DiskPrunePolicy {
    fn default() -> Self {
        Self {
            scan_every_stores: 500,
            target_ratio: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub still_quality: MapQuality,
    pub animation_quality: MapQuality,
    /// Compute every other scanline in low quality
    pub interlaced: bool,
    pub max_tile_level: u32,
    /// Upper bound for the adaptive interpolation step
    pub max_interpolation_step: u32,
    /// Number of row bands rendered in parallel; 0 uses the rayon default
    pub render_threads: usize,
    pub show_tile_id: bool,
    pub show_clouds: bool,
    pub show_sun_shading: bool,
    pub show_city_lights: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            still_quality: MapQuality::High,
            animation_quality: MapQuality::Low,
            interlaced: false,
            max_tile_level: ABSOLUTE_MAX_TILE_LEVEL,
            max_interpolation_step: DEFAULT_MAX_INTERPOLATION_STEP,
            render_threads: 0,
            show_tile_id: false,
            show_clouds: true,
            show_sun_shading: false,
            show_city_lights: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileLoaderConfig {
    /// Size of the download/decode worker pool
    pub worker_threads: usize,
    /// Maximum number of retry attempts per network fetch
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Render a provisional upscaled ancestor while the real tile loads
    pub show_parent_tiles: bool,
}

impl Default for TileLoaderConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_retries: 2,
            retry_delay_ms: 250,
            show_parent_tiles: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub max_region_tiles: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            max_region_tiles: DEFAULT_MAX_REGION_TILES,
        }
    }
}
