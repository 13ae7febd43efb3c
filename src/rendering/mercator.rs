use super::canvas::Canvas;
use super::sampler::TextureLevel;
use super::scanline::{FrameStats, MapperState, RowCursor, RowGeometry, ScanlineEngine, ScanlineProjector};
use crate::core::config::MapQuality;
use crate::core::constants::MERCATOR_MAX_GD_INV;
use crate::core::geo::wrap_lon;
use crate::core::projection::{clamp_mercator_lat, gd, gd_inv, Projection};
use crate::core::viewport::ViewportState;
use crate::tiles::TileProvider;
use std::ops::Range;

/// Mercator geometry. Rows are linear in `gd_inv(lat)`, which saturates at
/// the clamp latitude, so the painted band is finite.
struct MercatorGeometry {
    /// `gd_inv` of the center latitude
    y0: f64,
    lon0: f64,
    center_x: f64,
    center_y: f64,
    pixel2rad: f64,
    rad2pixel: f64,
    width: u32,
}

impl MercatorGeometry {
    fn new(viewport: &ViewportState, width: u32) -> Self {
        let center = viewport.image_center();
        Self {
            y0: gd_inv(clamp_mercator_lat(viewport.center.lat)),
            lon0: viewport.center.lon,
            center_x: center.x,
            center_y: center.y,
            pixel2rad: viewport.pixel2rad(),
            rad2pixel: viewport.rad2pixel(),
            width,
        }
    }
}

impl RowGeometry for MercatorGeometry {
    fn painted_rows(&self) -> Range<i64> {
        let top = self.center_y - (MERCATOR_MAX_GD_INV - self.y0) * self.rad2pixel;
        let bottom = self.center_y + (MERCATOR_MAX_GD_INV + self.y0) * self.rad2pixel;
        top.ceil() as i64..bottom.floor() as i64 + 1
    }

    fn row(&self, y: u32) -> Option<(Range<u32>, RowCursor<'_>)> {
        let merc_y = self.y0 - (y as f64 - self.center_y) * self.pixel2rad;
        if merc_y.abs() > MERCATOR_MAX_GD_INV + 1e-9 {
            return None;
        }
        let cursor = RowCursor::Flat {
            lat: gd(merc_y.clamp(-MERCATOR_MAX_GD_INV, MERCATOR_MAX_GD_INV)),
            lon: wrap_lon(self.lon0 - self.center_x * self.pixel2rad),
            step: self.pixel2rad,
        };
        Some((0..self.width, cursor))
    }
}

/// Scanline projector for the Mercator view.
#[derive(Debug, Default)]
pub struct MercatorScanlineProjector {
    engine: ScanlineEngine,
    state: MapperState,
}

impl MercatorScanlineProjector {
    pub fn new(engine: ScanlineEngine) -> Self {
        Self {
            engine,
            state: MapperState::Idle,
        }
    }
}

impl ScanlineProjector for MercatorScanlineProjector {
    fn projection(&self) -> Projection {
        Projection::Mercator
    }

    fn state(&self) -> MapperState {
        self.state
    }

    fn map_texture(
        &mut self,
        viewport: &ViewportState,
        canvas: &mut Canvas,
        source: &TextureLevel,
        provider: &dyn TileProvider,
        quality: MapQuality,
    ) -> FrameStats {
        self.state = MapperState::MappingInProgress;
        canvas.resize(viewport.width, viewport.height);
        let geometry = MercatorGeometry::new(viewport, canvas.width());
        let stats = self.engine.render(&geometry, canvas, source, provider, quality);
        self.state = MapperState::Idle;
        log::debug!(
            "mercator frame: level {}, {} tiles, step {}, {:?}",
            stats.level,
            stats.tiles.len(),
            stats.step,
            stats.elapsed
        );
        stats
    }
}
