//! Post-processing of merged tiles: cloud overlay, sun shading and the
//! debug tile id stamp, always applied in that order.

use super::scanline::max_divisor;
use crate::core::config::RenderConfig;
use crate::core::constants::TWILIGHT_ZONE;
use crate::core::geo::{wrap_lon, GeoCoord, GlobalPixel, TileId};
use crate::tiles::addressing::TileGrid;
use crate::tiles::cache::VolatileTileCache;
use crate::tiles::texture::GeoSceneTexture;
use crate::tiles::tile::{alpha, argb, blue, green, red, rgb, TextureTile, TileImage};
use crate::tiles::TileProvider;
use lru::LruCache;
use std::f64::consts::PI;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const FULLY_LIT: f64 = 0.99999;
const FULLY_DARK: f64 = 0.00001;

/// Upper bound of the shading step along a tile row
const MAX_SHADING_STEP: u32 = 30;

/// Sub-solar point in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    pub lon: f64,
    pub lat: f64,
}

impl SunPosition {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: wrap_lon(lon),
            lat,
        }
    }

    /// Sub-solar point at a unix timestamp (seconds), from the low
    /// precision solar coordinates of the Astronomical Almanac.
    pub fn at_unix_time(secs: i64) -> Self {
        let n = secs as f64 / 86_400.0 + 2_440_587.5 - 2_451_545.0;
        let mean_lon = (280.460 + 0.985_647_4 * n).rem_euclid(360.0).to_radians();
        let anomaly = (357.528 + 0.985_600_3 * n).rem_euclid(360.0).to_radians();
        let ecliptic_lon =
            mean_lon + 1.915f64.to_radians() * anomaly.sin() + 0.020f64.to_radians() * (2.0 * anomaly).sin();
        let obliquity = (23.439 - 0.000_000_4 * n).to_radians();

        let declination = (obliquity.sin() * ecliptic_lon.sin()).asin();
        let right_ascension = (obliquity.cos() * ecliptic_lon.sin()).atan2(ecliptic_lon.cos());
        let gmst = (18.697_374_558 + 24.065_709_824_419_08 * n).rem_euclid(24.0) * PI / 12.0;
        Self::new(right_ascension - gmst, declination)
    }

    /// Latitude dependent terms of [`SunPosition::shading`] for one row
    #[inline]
    pub fn row_terms(&self, lat: f64) -> (f64, f64) {
        (((lat - self.lat) / 2.0).sin(), lat.cos() * self.lat.cos())
    }

    /// Brightness at `lon` given the row terms `(a, c)`: 1 in daylight, 0 at
    /// night, linear across the twilight zone.
    #[inline]
    pub fn shading_with(&self, lon: f64, a: f64, c: f64) -> f64 {
        let b = ((lon - self.lon) / 2.0).sin();
        let h = a * a + c * b * b;
        if h <= 0.5 - TWILIGHT_ZONE / 2.0 {
            1.0
        } else if h >= 0.5 + TWILIGHT_ZONE / 2.0 {
            0.0
        } else {
            (0.5 + TWILIGHT_ZONE / 2.0 - h) / TWILIGHT_ZONE
        }
    }

    pub fn shading(&self, coord: GeoCoord) -> f64 {
        let (a, c) = self.row_terms(coord.lat);
        self.shading_with(coord.lon, a, c)
    }
}

/// Darkens a pixel: halved at night, scaled by `0.5 + 0.5 * brightness` in
/// twilight.
#[inline]
pub fn shade_pixel(pixel: u32, brightness: f64) -> u32 {
    if brightness > FULLY_LIT {
        return pixel;
    }
    if brightness < FULLY_DARK {
        return (pixel & 0xff00_0000) | ((pixel >> 1) & 0x007f_7f7f);
    }
    let d = 0.5 * brightness + 0.5;
    let scale = |c: u8| (c as f64 * d) as u8;
    argb(alpha(pixel), scale(red(pixel)), scale(green(pixel)), scale(blue(pixel)))
}

/// Blends a pixel with the night side texture by brightness.
#[inline]
pub fn shade_pixel_composite(pixel: u32, night: u32, brightness: f64) -> u32 {
    if brightness > FULLY_LIT {
        return pixel;
    }
    if brightness < FULLY_DARK {
        return night;
    }
    let d = brightness;
    let mix = |day: u8, dark: u8| (d * day as f64 + (1.0 - d) * dark as f64) as u8;
    rgb(
        mix(red(pixel), red(night)),
        mix(green(pixel), green(night)),
        mix(blue(pixel), blue(night)),
    )
}

/// Cloud overlay: `base + (255 - base) * cloud` per channel, the cloud
/// value being its red channel or raw 8-bit value.
///
/// Returns `false` without touching `base` when the sizes differ.
pub fn blend_clouds(base: &mut TileImage, clouds: &TileImage) -> bool {
    if base.width() != clouds.width() || base.height() != clouds.height() {
        log::debug!(
            "cloud tile is {}x{}, base is {}x{}; skipping",
            clouds.width(),
            clouds.height(),
            base.width(),
            base.height()
        );
        return false;
    }
    for y in 0..base.height() {
        let row = base.row_mut(y);
        for (x, pixel) in row.iter_mut().enumerate() {
            let c = clouds.value(x as u32, y) as f64 / 255.0;
            if c == 0.0 {
                continue;
            }
            let lift = |v: u8| (v as f64 + (255.0 - v as f64) * c) as u8;
            *pixel = argb(alpha(*pixel), lift(red(*pixel)), lift(green(*pixel)), lift(blue(*pixel)));
        }
    }
    true
}

/// Applies the optional decorations to merged tiles.
///
/// Each pass can be switched off on its own; a pass whose auxiliary
/// texture is not configured or whose tile is not available is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedLayerDecorator {
    clouds: Option<u64>,
    city_lights: Option<u64>,
    sun: Option<SunPosition>,
    show_clouds: bool,
    show_sun_shading: bool,
    show_city_lights: bool,
    show_tile_id: bool,
    body_is_earth: bool,
}

impl Default for MergedLayerDecorator {
    fn default() -> Self {
        Self::new(&RenderConfig::default())
    }
}

impl MergedLayerDecorator {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            clouds: None,
            city_lights: None,
            sun: None,
            show_clouds: config.show_clouds,
            show_sun_shading: config.show_sun_shading,
            show_city_lights: config.show_city_lights,
            show_tile_id: config.show_tile_id,
            body_is_earth: true,
        }
    }

    /// Uses `texture` as the cloud layer
    pub fn with_clouds(mut self, texture: &GeoSceneTexture) -> Self {
        self.clouds = Some(texture.theme_hash());
        self
    }

    /// Uses `texture` as the night side layer
    pub fn with_city_lights(mut self, texture: &GeoSceneTexture) -> Self {
        self.city_lights = Some(texture.theme_hash());
        self
    }

    pub fn set_sun(&mut self, sun: Option<SunPosition>) {
        self.sun = sun;
    }

    pub fn sun(&self) -> Option<SunPosition> {
        self.sun
    }

    pub fn set_show_sun_shading(&mut self, show: bool) {
        self.show_sun_shading = show;
    }

    pub fn set_show_clouds(&mut self, show: bool) {
        self.show_clouds = show;
    }

    pub fn set_show_city_lights(&mut self, show: bool) {
        self.show_city_lights = show;
    }

    pub fn set_show_tile_id(&mut self, show: bool) {
        self.show_tile_id = show;
    }

    /// City lights are only drawn on Earth
    pub fn set_body_is_earth(&mut self, is_earth: bool) {
        self.body_is_earth = is_earth;
    }

    /// Themes of the auxiliary tiles [`MergedLayerDecorator::decorate`]
    /// reads with the current settings
    pub fn aux_themes(&self) -> impl Iterator<Item = u64> {
        let clouds = self.clouds.filter(|_| self.show_clouds);
        let lights = self.city_lights.filter(|_| {
            self.show_sun_shading && self.sun.is_some() && self.show_city_lights && self.body_is_earth
        });
        clouds.into_iter().chain(lights)
    }

    /// Decorates the merged tile `id` in place.
    ///
    /// Returns `false` if an enabled pass had to use a missing or
    /// provisional auxiliary tile, so the result should not be cached.
    pub fn decorate(&self, id: TileId, image: &mut TileImage, grid: &TileGrid, provider: &dyn TileProvider) -> bool {
        let mut complete = true;
        image.make_argb();

        if let (true, Some(theme)) = (self.show_clouds, self.clouds) {
            match provider.tile(id.with_theme(theme)) {
                Some(clouds) => {
                    complete &= !clouds.provisional;
                    blend_clouds(image, &clouds.image);
                }
                None => complete = false,
            }
        }

        if let (true, Some(sun)) = (self.show_sun_shading, self.sun) {
            let night = match self.city_lights {
                Some(theme) if self.show_city_lights && self.body_is_earth => {
                    let tile = provider.tile(id.with_theme(theme));
                    complete &= tile.as_ref().is_some_and(|t| !t.provisional);
                    tile
                }
                _ => None,
            };
            paint_sun_shading(image, id, grid, sun, night.as_ref().map(|t| &t.image));
        }

        if self.show_tile_id {
            stamp_tile_id(image, id);
        }
        complete
    }
}

fn paint_sun_shading(image: &mut TileImage, id: TileId, grid: &TileGrid, sun: SunPosition, night: Option<&TileImage>) {
    let (w, h) = (image.width(), image.height());
    if w == 0 || h == 0 {
        return;
    }
    let night = night.filter(|n| n.width() == w && n.height() == h);
    let sx = grid.tile_width as f64 / w as f64;
    let sy = grid.tile_height as f64 / h as f64;
    let origin_x = id.x as f64 * grid.tile_width as f64;
    let origin_y = id.y as f64 * grid.tile_height as f64;
    let lon_at = |x: u32| {
        grid.global_to_geo(GlobalPixel::new(origin_x + (x as f64 + 0.5) * sx, origin_y), id.level)
            .lon
    };
    let step = max_divisor(MAX_SHADING_STEP, w);

    for y in 0..h {
        let lat = grid
            .global_to_geo(GlobalPixel::new(origin_x, origin_y + (y as f64 + 0.5) * sy), id.level)
            .lat;
        let (a, c) = sun.row_terms(lat);
        let shade = |x: u32, pixel: u32, brightness: f64| match night {
            Some(night) => shade_pixel_composite(pixel, night.pixel(x, y), brightness),
            None => shade_pixel(pixel, brightness),
        };

        let row = image.row_mut(y);
        let mut x = 0;
        while x < w {
            let end = (x + step).min(w);
            let first = sun.shading_with(lon_at(x), a, c);
            let last = sun.shading_with(lon_at(end - 1), a, c);
            if first > FULLY_LIT && last > FULLY_LIT {
                x = end;
                continue;
            }
            for px in x..end {
                let brightness = if first < FULLY_DARK && last < FULLY_DARK {
                    0.0
                } else {
                    sun.shading_with(lon_at(px), a, c)
                };
                row[px as usize] = shade(px, row[px as usize], brightness);
            }
            x = end;
        }
    }
}

const STAMP_BORDER: u32 = 0xffff_0000;
const STAMP_TEXT: u32 = 0xffff_ffff;
const STAMP_SHADOW: u32 = 0xff00_0000;

/// Draws a border and `L<level> X<x> Y<y>` plus the theme hash on the tile
fn stamp_tile_id(image: &mut TileImage, id: TileId) {
    let (w, h) = (image.width(), image.height());
    if w < 2 || h < 2 {
        return;
    }
    for x in 0..w {
        image.set_pixel(x, 0, STAMP_BORDER);
        image.set_pixel(x, h - 1, STAMP_BORDER);
    }
    for y in 0..h {
        image.set_pixel(0, y, STAMP_BORDER);
        image.set_pixel(w - 1, y, STAMP_BORDER);
    }

    let scale = (w / 128).clamp(1, 4);
    let line_height = (GLYPH_HEIGHT + 2) * scale;
    let label = format!("L{} X{} Y{}", id.level, id.x, id.y);
    let theme = format!("{:08X}", id.theme as u32);
    draw_text(image, &label, 4, 4, scale);
    draw_text(image, &theme, 4, 4 + line_height, scale);
}

const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;

/// 3x5 bitmap glyphs, one byte per row, most significant of 3 bits first
fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        _ => return None,
    })
}

fn draw_text(image: &mut TileImage, text: &str, left: u32, top: u32, scale: u32) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else {
            continue;
        };
        let gx = left + i as u32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = gx + col * scale + dx;
                        let y = top + row as u32 * scale + dy;
                        if x + 1 < image.width() && y + 1 < image.height() {
                            image.set_pixel(x + 1, y + 1, STAMP_SHADOW);
                            image.set_pixel(x, y, STAMP_TEXT);
                        }
                    }
                }
            }
        }
    }
}

/// Serves tiles of a stack of texture layers merged into one image and
/// decorated.
///
/// The first available layer is the background, later layers are
/// alpha-composited over it. Results built only from real (not
/// provisional) tiles are kept in a volatile cache of their own.
/// Incomplete results are remembered together with the input tiles they
/// were built from and reused until one of those inputs changes.
pub struct StackedTileBuilder<P: TileProvider> {
    provider: P,
    layers: Vec<u64>,
    grid: TileGrid,
    decorator: MergedLayerDecorator,
    merged: VolatileTileCache,
    incomplete: Mutex<LruCache<TileId, IncompleteTile>>,
}

/// Input tiles per layer, then per auxiliary theme
type Inputs = Vec<Option<Arc<TextureTile>>>;

struct IncompleteTile {
    inputs: Inputs,
    tile: Arc<TextureTile>,
}

/// Holding the input `Arc`s keeps their addresses from being reused
fn same_inputs(a: &Inputs, b: &Inputs) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|pair| match pair {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        })
}

impl<P: TileProvider> StackedTileBuilder<P> {
    /// Stack served under the theme of `base`.
    ///
    /// Complete tiles get `budget_bytes`; incomplete ones are kept for a
    /// quarter of that on top.
    pub fn new(provider: P, base: &GeoSceneTexture, decorator: MergedLayerDecorator, budget_bytes: usize) -> Self {
        let grid = base.grid();
        let tile_bytes = (grid.tile_width as usize * grid.tile_height as usize * 4).max(1);
        let capacity = NonZeroUsize::new(budget_bytes / 4 / tile_bytes).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            layers: vec![base.theme_hash()],
            grid,
            decorator,
            merged: VolatileTileCache::new(budget_bytes),
            incomplete: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Adds a layer on top of the stack
    pub fn add_layer(&mut self, texture: &GeoSceneTexture) {
        self.layers.push(texture.theme_hash());
        self.clear();
    }

    fn clear(&self) {
        self.merged.clear();
        if let Ok(mut incomplete) = self.incomplete.lock() {
            incomplete.clear();
        }
    }

    pub fn decorator(&self) -> &MergedLayerDecorator {
        &self.decorator
    }

    /// Changes the decoration; every merged tile is rebuilt afterwards
    pub fn update_decorator(&mut self, update: impl FnOnce(&mut MergedLayerDecorator)) {
        let before = self.decorator.clone();
        update(&mut self.decorator);
        if self.decorator != before {
            self.clear();
        }
    }

    pub fn invalidate(&self, id: &TileId) {
        self.merged.remove(id);
        if let Ok(mut incomplete) = self.incomplete.lock() {
            incomplete.pop(id);
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Merges and decorates the tile `id` (theme of the base layer)
    pub fn build(&self, id: TileId) -> Option<TextureTile> {
        self.build_from(id, &self.inputs(id))
    }

    fn inputs(&self, id: TileId) -> Inputs {
        self.layers
            .iter()
            .copied()
            .chain(self.decorator.aux_themes())
            .map(|theme| self.provider.tile(id.with_theme(theme)))
            .collect()
    }

    fn build_from(&self, id: TileId, inputs: &Inputs) -> Option<TextureTile> {
        let mut provisional = false;
        let mut image: Option<TileImage> = None;
        for layer in inputs.iter().take(self.layers.len()).flatten() {
            provisional |= layer.provisional;
            match image.as_mut() {
                None => image = Some(layer.image.clone()),
                Some(merged) => composite_over(merged, &layer.image),
            }
        }
        let mut image = image?;
        let complete = self.decorator.decorate(id, &mut image, &self.grid, &self.provider);

        let mut tile = TextureTile::new(id, image);
        tile.provisional = provisional || !complete;
        Some(tile)
    }
}

impl<P: TileProvider> TileProvider for StackedTileBuilder<P> {
    fn tile(&self, id: TileId) -> Option<Arc<TextureTile>> {
        if let Some(tile) = self.merged.get(&id) {
            return Some(tile);
        }
        let inputs = self.inputs(id);
        if let Ok(mut incomplete) = self.incomplete.lock() {
            if let Some(memo) = incomplete.get(&id) {
                if same_inputs(&memo.inputs, &inputs) {
                    return Some(Arc::clone(&memo.tile));
                }
            }
        }

        let tile = Arc::new(self.build_from(id, &inputs)?);
        let Ok(mut incomplete) = self.incomplete.lock() else {
            return Some(tile);
        };
        if tile.provisional {
            incomplete.put(
                id,
                IncompleteTile {
                    inputs,
                    tile: Arc::clone(&tile),
                },
            );
        } else {
            incomplete.pop(&id);
            self.merged.insert(Arc::clone(&tile));
        }
        Some(tile)
    }
}

/// Source-over compositing of a same sized layer
fn composite_over(dst: &mut TileImage, src: &TileImage) {
    if dst.width() != src.width() || dst.height() != src.height() {
        log::debug!("layer size mismatch, not stacking");
        return;
    }
    for y in 0..dst.height() {
        let row = dst.row_mut(y);
        for (x, pixel) in row.iter_mut().enumerate() {
            let s = src.pixel(x as u32, y);
            let sa = alpha(s) as f64 / 255.0;
            if sa == 0.0 {
                continue;
            }
            if sa == 1.0 {
                *pixel = s;
                continue;
            }
            let d = *pixel;
            let da = alpha(d) as f64 / 255.0;
            let out_a = sa + da * (1.0 - sa);
            let mix = |sc: u8, dc: u8| {
                ((sc as f64 * sa + dc as f64 * da * (1.0 - sa)) / out_a).round() as u8
            };
            *pixel = argb(
                (out_a * 255.0).round() as u8,
                mix(red(s), red(d)),
                mix(green(s), green(d)),
                mix(blue(s), blue(d)),
            );
        }
    }
}
