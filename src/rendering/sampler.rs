//! Texture sampling for the scanline projectors.

use crate::core::constants::TRANSPARENT;
use crate::core::geo::{GeoCoord, GlobalPixel, TileId};
use crate::tiles::addressing::TileGrid;
use crate::tiles::texture::GeoSceneTexture;
use crate::tiles::tile::{alpha, argb, blue, green, red, TextureTile};
use crate::tiles::TileProvider;
use fxhash::FxHashSet;
use std::sync::Arc;

/// One level of one texture: the global pixel space a frame samples from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureLevel {
    pub theme: u64,
    pub grid: TileGrid,
    pub level: u32,
    global_width: f64,
    global_height: f64,
}

impl TextureLevel {
    pub fn new(theme: u64, grid: TileGrid, level: u32) -> Self {
        Self {
            theme,
            grid,
            level,
            global_width: grid.global_width(level) as f64,
            global_height: grid.global_height(level) as f64,
        }
    }

    pub fn for_texture(texture: &GeoSceneTexture, level: u32) -> Self {
        Self::new(texture.theme_hash(), texture.grid(), level)
    }

    pub fn global_width(&self) -> f64 {
        self.global_width
    }

    pub fn global_height(&self) -> f64 {
        self.global_height
    }

    /// Global pixel of a coordinate, latitude clamped to what the texture covers
    #[inline]
    pub fn position(&self, coord: GeoCoord) -> GlobalPixel {
        let max_lat = self.grid.projection.max_lat();
        let coord = GeoCoord::new(coord.lon, coord.lat.clamp(-max_lat, max_lat));
        self.grid.geo_to_global(coord, self.level)
    }

    /// Offset from `from` to `to` taking the shorter way across the dateline
    #[inline]
    pub fn delta(&self, from: GlobalPixel, to: GlobalPixel) -> (f64, f64) {
        let mut dx = to.x - from.x;
        if dx > self.global_width / 2.0 {
            dx -= self.global_width;
        } else if dx < -self.global_width / 2.0 {
            dx += self.global_width;
        }
        (dx, to.y - from.y)
    }
}

/// Per-band sampler resolving global pixels to tile pixels.
///
/// Remembers the last tile it used (hits and misses) so consecutive pixels
/// of a sweep only go back to the provider when they cross a tile border.
pub struct TileSampler<'a> {
    source: TextureLevel,
    provider: &'a dyn TileProvider,
    last: Option<((i64, i64), Option<Arc<TextureTile>>)>,
    touched: FxHashSet<TileId>,
}

impl<'a> TileSampler<'a> {
    pub fn new(source: TextureLevel, provider: &'a dyn TileProvider) -> Self {
        Self {
            source,
            provider,
            last: None,
            touched: FxHashSet::default(),
        }
    }

    pub fn source(&self) -> &TextureLevel {
        &self.source
    }

    /// Tile ids this sampler asked the provider for
    pub fn touched(&self) -> &FxHashSet<TileId> {
        &self.touched
    }

    pub fn into_touched(self) -> FxHashSet<TileId> {
        self.touched
    }

    /// Nearest texel
    #[inline]
    pub fn nearest(&mut self, pos: GlobalPixel) -> u32 {
        self.texel(pos.x.floor() as i64, pos.y.floor() as i64)
    }

    /// Bilinear blend of the four texels around `pos`
    pub fn bilinear(&mut self, pos: GlobalPixel) -> u32 {
        let fx = pos.x - 0.5;
        let fy = pos.y - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let wx = fx - x0;
        let wy = fy - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = lerp_pixel(self.texel(x0, y0), self.texel(x0 + 1, y0), wx);
        let bottom = lerp_pixel(self.texel(x0, y0 + 1), self.texel(x0 + 1, y0 + 1), wx);
        lerp_pixel(top, bottom, wy)
    }

    /// Texel at integer global coordinates; x wraps around the globe and y
    /// is clamped to the texture.
    pub fn texel(&mut self, x: i64, y: i64) -> u32 {
        let grid = self.source.grid;
        let width = self.source.global_width as i64;
        let height = self.source.global_height as i64;
        if width == 0 || height == 0 {
            return TRANSPARENT;
        }
        let x = x.rem_euclid(width);
        let y = y.clamp(0, height - 1);
        let (tw, th) = (grid.tile_width as i64, grid.tile_height as i64);
        let index = (x / tw, y / th);

        let cached = match &self.last {
            Some((cached, tile)) if *cached == index => Some(tile.clone()),
            _ => None,
        };
        let tile = match cached {
            Some(tile) => tile,
            None => {
                let id = TileId::new(self.source.theme, self.source.level, index.0 as i32, index.1 as i32);
                self.touched.insert(id);
                let tile = self.provider.tile(id);
                self.last = Some((index, tile.clone()));
                tile
            }
        };
        let Some(tile) = tile else {
            return TRANSPARENT;
        };

        let image = &tile.image;
        let (mut lx, mut ly) = ((x % tw) as u32, (y % th) as u32);
        if image.width() != grid.tile_width || image.height() != grid.tile_height {
            lx = (lx as u64 * image.width() as u64 / tw as u64) as u32;
            ly = (ly as u64 * image.height() as u64 / th as u64) as u32;
        }
        if lx >= image.width() || ly >= image.height() {
            return TRANSPARENT;
        }
        image.pixel(lx, ly)
    }
}

/// Per-channel linear blend, `t = 0` gives `a`
#[inline]
pub fn lerp_pixel(a: u32, b: u32, t: f64) -> u32 {
    if a == b {
        return a;
    }
    let mix = |ca: u8, cb: u8| (ca as f64 + (cb as f64 - ca as f64) * t).round() as u8;
    argb(
        mix(alpha(a), alpha(b)),
        mix(red(a), red(b)),
        mix(green(a), green(b)),
        mix(blue(a), blue(b)),
    )
}
