//! Scanline texture mapping shared by all projections.
//!
//! A projection only describes its geometry: which canvas rows show the
//! globe and, for each row, which pixels and what coordinates along them.
//! [`ScanlineEngine`] does the rest: clearing unpainted rows, splitting the
//! painted rows into bands rendered in parallel, the interpolated sweep and
//! the sampling.

use super::canvas::Canvas;
use super::sampler::{TextureLevel, TileSampler};
use crate::core::config::{MapQuality, RenderConfig};
use crate::core::constants::TRANSPARENT;
use crate::core::geo::{wrap_lon, GeoCoord, GlobalPixel, TileId};
use crate::core::projection::Projection;
use crate::core::viewport::ViewportState;
use crate::tiles::TileProvider;
use fxhash::FxHashSet;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapperState {
    #[default]
    Idle,
    MappingInProgress,
}

/// What a finished frame used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Tile ids requested from the provider, sorted
    pub tiles: Vec<TileId>,
    pub level: u32,
    /// Interpolation step of the sweep
    pub step: u32,
    pub painted_rows: Range<u32>,
    pub bands: usize,
    pub elapsed: Duration,
}

/// Projects a tiled texture onto a canvas for a viewport.
///
/// Rendering never fails: missing tiles end up as transparent pixels and
/// the provider is expected to have scheduled them.
pub trait ScanlineProjector: Send {
    fn projection(&self) -> Projection;

    fn state(&self) -> MapperState;

    fn map_texture(
        &mut self,
        viewport: &ViewportState,
        canvas: &mut Canvas,
        source: &TextureLevel,
        provider: &dyn TileProvider,
        quality: MapQuality,
    ) -> FrameStats;
}

/// Coordinates along one canvas row.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RowCursor<'a> {
    /// Constant latitude, longitude advancing by `step` radians per pixel
    Flat { lat: f64, lon: f64, step: f64 },
    /// Orthographic globe; `qy` is the row's height on the unit disc
    Sphere {
        viewport: &'a ViewportState,
        qy: f64,
        center_x: f64,
    },
}

impl RowCursor<'_> {
    /// Coordinate of pixel `x`; for flat rows this is the cursor position
    #[inline]
    pub(crate) fn coord_at(&self, x: u32) -> GeoCoord {
        match *self {
            RowCursor::Flat { lat, lon, .. } => GeoCoord::new(lon, lat),
            RowCursor::Sphere {
                viewport,
                qy,
                center_x,
            } => {
                let qx = (x as f64 - center_x) / viewport.radius;
                let qz = (1.0 - qx * qx - qy * qy).max(0.0).sqrt();
                viewport.rotate_to_globe(qx, qy, qz)
            }
        }
    }

    /// Moves a flat cursor `pixels` to the right
    #[inline]
    pub(crate) fn advance(&mut self, pixels: u32) {
        if let RowCursor::Flat { lon, step, .. } = self {
            *lon = wrap_lon(*lon + *step * pixels as f64);
        }
    }
}

/// Per projection geometry of the canvas.
pub(crate) trait RowGeometry: Sync {
    /// Canvas rows covered by the globe, not clipped
    fn painted_rows(&self) -> Range<i64>;

    /// Visible pixels of row `y` and a cursor positioned at the first one
    fn row(&self, y: u32) -> Option<(Range<u32>, RowCursor<'_>)>;
}

/// Interpolation step for a row of `width` pixels: the step up to `limit`
/// that leaves the fewest exactly computed pixels.
pub fn max_divisor(limit: u32, width: u32) -> u32 {
    (1..=limit.max(1))
        .min_by_key(|&n| width / n + width % n)
        .unwrap_or(1)
}

/// Fills `out` with the texture position of every pixel in `span`.
///
/// Every `step`-th position is exact, the ones in between are linear in
/// texture space, across the dateline where needed.
pub(crate) fn row_positions(
    cursor: &mut RowCursor<'_>,
    span: Range<u32>,
    step: u32,
    source: &TextureLevel,
    out: &mut Vec<GlobalPixel>,
) {
    out.clear();
    if span.is_empty() {
        return;
    }
    let step = step.max(1);
    let last = span.end - 1;
    let mut x = span.start;
    let mut prev = source.position(cursor.coord_at(x));
    out.push(prev);

    while x < last {
        let next_x = (x + step).min(last);
        let n = next_x - x;
        cursor.advance(n);
        let next = source.position(cursor.coord_at(next_x));
        if n > 1 {
            let (dx, dy) = source.delta(prev, next);
            for k in 1..n {
                let t = k as f64 / n as f64;
                out.push(GlobalPixel::new(prev.x + dx * t, prev.y + dy * t));
            }
        }
        out.push(next);
        prev = next;
        x = next_x;
    }
}

/// Band partitioned, interpolating renderer shared by the projectors.
#[derive(Clone)]
pub struct ScanlineEngine {
    max_step: u32,
    interlaced: bool,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for ScanlineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanlineEngine")
            .field("max_step", &self.max_step)
            .field("interlaced", &self.interlaced)
            .field("threads", &self.threads())
            .finish()
    }
}

impl Default for ScanlineEngine {
    fn default() -> Self {
        Self::new(&RenderConfig::default())
    }
}

impl ScanlineEngine {
    pub fn new(config: &RenderConfig) -> Self {
        let pool = (config.render_threads > 0)
            .then(|| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.render_threads)
                    .thread_name(|i| format!("tessera-render-{i}"))
                    .build()
                    .map_err(|e| log::warn!("using the global render pool: {}", e))
                    .ok()
            })
            .flatten()
            .map(Arc::new);
        Self {
            max_step: config.max_interpolation_step.max(1),
            interlaced: config.interlaced,
            pool,
        }
    }

    /// Number of row bands a frame is split into
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(|pool| pool.current_num_threads())
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    pub fn step_for(&self, quality: MapQuality, width: u32) -> u32 {
        if quality.allows_interpolation() {
            max_divisor(self.max_step, width)
        } else {
            1
        }
    }

    pub(crate) fn render<G: RowGeometry>(
        &self,
        geometry: &G,
        canvas: &mut Canvas,
        source: &TextureLevel,
        provider: &dyn TileProvider,
        quality: MapQuality,
    ) -> FrameStats {
        let started = Instant::now();
        let (width, height) = (canvas.width(), canvas.height());
        let painted = geometry.painted_rows();
        let start = painted.start.clamp(0, height as i64) as u32;
        let rows = start..(painted.end.clamp(0, height as i64) as u32).max(start);

        let w = width as usize;
        let (above, rest) = canvas.pixels_mut().split_at_mut(rows.start as usize * w);
        let (band_pixels, below) = rest.split_at_mut(rows.len() * w);
        above.fill(TRANSPARENT);
        below.fill(TRANSPARENT);

        let step = self.step_for(quality, width);
        let bilinear = quality.is_bilinear();
        let interlaced = self.interlaced && quality == MapQuality::Low;
        let bands = self.threads();
        let mut rows_per_band = rows.len().div_ceil(bands).max(1);
        if interlaced && rows_per_band % 2 == 1 {
            rows_per_band += 1;
        }

        let mut render_bands = || {
            if w == 0 {
                return FxHashSet::default();
            }
            band_pixels
                .par_chunks_mut(rows_per_band * w)
                .enumerate()
                .map(|(band, pixels)| {
                    let first = rows.start + (band * rows_per_band) as u32;
                    let band_started = Instant::now();
                    let mut sampler = TileSampler::new(*source, provider);
                    let mut positions = Vec::with_capacity(w);
                    let mut render_row = |y: u32, row: &mut [u32]| {
                        self.render_row(geometry, y, row, step, bilinear, &mut sampler, &mut positions)
                    };
                    if interlaced {
                        for (k, pair) in pixels.chunks_mut(2 * w).enumerate() {
                            let (row, next) = pair.split_at_mut(w);
                            render_row(first + 2 * k as u32, row);
                            if !next.is_empty() {
                                next.copy_from_slice(row);
                            }
                        }
                    } else {
                        for (k, row) in pixels.chunks_mut(w).enumerate() {
                            render_row(first + k as u32, row);
                        }
                    }
                    log::trace!("band {} rendered in {:?}", band, band_started.elapsed());
                    sampler.into_touched()
                })
                .reduce(FxHashSet::default, |mut a, b| {
                    a.extend(b);
                    a
                })
        };
        let touched = match &self.pool {
            Some(pool) => pool.install(render_bands),
            None => render_bands(),
        };

        let mut tiles: Vec<TileId> = touched.into_iter().collect();
        tiles.sort();
        FrameStats {
            tiles,
            level: source.level,
            step,
            painted_rows: rows,
            bands,
            elapsed: started.elapsed(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_row<G: RowGeometry>(
        &self,
        geometry: &G,
        y: u32,
        row: &mut [u32],
        step: u32,
        bilinear: bool,
        sampler: &mut TileSampler<'_>,
        positions: &mut Vec<GlobalPixel>,
    ) {
        let Some((span, mut cursor)) = geometry.row(y) else {
            row.fill(TRANSPARENT);
            return;
        };
        let span = span.start.min(row.len() as u32)..span.end.min(row.len() as u32);
        row[..span.start as usize].fill(TRANSPARENT);
        row[span.end as usize..].fill(TRANSPARENT);

        let source = *sampler.source();
        row_positions(&mut cursor, span.clone(), step, &source, positions);
        let out = &mut row[span.start as usize..span.end as usize];
        for (pixel, &pos) in out.iter_mut().zip(positions.iter()) {
            *pixel = if bilinear {
                sampler.bilinear(pos)
            } else {
                sampler.nearest(pos)
            };
        }
    }
}
