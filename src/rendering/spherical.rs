use super::canvas::Canvas;
use super::sampler::TextureLevel;
use super::scanline::{FrameStats, MapperState, RowCursor, RowGeometry, ScanlineEngine, ScanlineProjector};
use crate::core::config::MapQuality;
use crate::core::projection::Projection;
use crate::core::viewport::ViewportState;
use crate::tiles::TileProvider;
use std::ops::Range;

/// Orthographic globe: every row is a chord of the globe disc, and each
/// pixel is rotated back onto the sphere.
struct SphericalGeometry<'a> {
    viewport: &'a ViewportState,
    center_x: f64,
    center_y: f64,
    width: u32,
}

impl<'a> SphericalGeometry<'a> {
    fn new(viewport: &'a ViewportState, width: u32) -> Self {
        let center = viewport.image_center();
        Self {
            viewport,
            center_x: center.x,
            center_y: center.y,
            width,
        }
    }
}

impl RowGeometry for SphericalGeometry<'_> {
    fn painted_rows(&self) -> Range<i64> {
        let radius = self.viewport.radius;
        (self.center_y - radius).ceil() as i64..(self.center_y + radius).floor() as i64 + 1
    }

    fn row(&self, y: u32) -> Option<(Range<u32>, RowCursor<'_>)> {
        let radius = self.viewport.radius;
        let qy = (self.center_y - y as f64) / radius;
        if qy.abs() > 1.0 {
            return None;
        }
        let half = (1.0 - qy * qy).sqrt() * radius;
        let start = (self.center_x - half).ceil().max(0.0) as u32;
        let end = ((self.center_x + half).floor() + 1.0).clamp(0.0, self.width as f64) as u32;
        if start >= end {
            return None;
        }
        let cursor = RowCursor::Sphere {
            viewport: self.viewport,
            qy,
            center_x: self.center_x,
        };
        Some((start..end, cursor))
    }
}

/// Scanline projector for the globe view.
#[derive(Debug, Default)]
pub struct SphericalScanlineProjector {
    engine: ScanlineEngine,
    state: MapperState,
}

impl SphericalScanlineProjector {
    pub fn new(engine: ScanlineEngine) -> Self {
        Self {
            engine,
            state: MapperState::Idle,
        }
    }
}

impl ScanlineProjector for SphericalScanlineProjector {
    fn projection(&self) -> Projection {
        Projection::Spherical
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
        let geometry = SphericalGeometry::new(viewport, canvas.width());
        let stats = self.engine.render(&geometry, canvas, source, provider, quality);
        self.state = MapperState::Idle;
        log::debug!(
            "globe frame: level {}, {} tiles, step {}, {:?}",
            stats.level,
            stats.tiles.len(),
            stats.step,
            stats.elapsed
        );
        stats
    }
}
