use super::canvas::Canvas;
use super::sampler::TextureLevel;
use super::scanline::{FrameStats, MapperState, RowCursor, RowGeometry, ScanlineEngine, ScanlineProjector};
use crate::core::config::MapQuality;
use crate::core::geo::wrap_lon;
use crate::core::projection::Projection;
use crate::core::viewport::ViewportState;
use crate::tiles::TileProvider;
use std::f64::consts::FRAC_PI_2;
use std::ops::Range;

/// Plate carrée geometry: latitude linear in y, longitude linear in x.
struct EquirectGeometry {
    lat0: f64,
    lon0: f64,
    center_x: f64,
    center_y: f64,
    pixel2rad: f64,
    rad2pixel: f64,
    width: u32,
}

impl EquirectGeometry {
    fn new(viewport: &ViewportState, width: u32) -> Self {
        let center = viewport.image_center();
        Self {
            lat0: viewport.center.lat.clamp(-FRAC_PI_2, FRAC_PI_2),
            lon0: viewport.center.lon,
            center_x: center.x,
            center_y: center.y,
            pixel2rad: viewport.pixel2rad(),
            rad2pixel: viewport.rad2pixel(),
            width,
        }
    }
}

impl RowGeometry for EquirectGeometry {
    fn painted_rows(&self) -> Range<i64> {
        let top = self.center_y - (FRAC_PI_2 - self.lat0) * self.rad2pixel;
        let bottom = self.center_y + (FRAC_PI_2 + self.lat0) * self.rad2pixel;
        top.ceil() as i64..bottom.floor() as i64 + 1
    }

    fn row(&self, y: u32) -> Option<(Range<u32>, RowCursor<'_>)> {
        let lat = self.lat0 - (y as f64 - self.center_y) * self.pixel2rad;
        if lat.abs() > FRAC_PI_2 + 1e-9 {
            return None;
        }
        let cursor = RowCursor::Flat {
            lat: lat.clamp(-FRAC_PI_2, FRAC_PI_2),
            lon: wrap_lon(self.lon0 - self.center_x * self.pixel2rad),
            step: self.pixel2rad,
        };
        Some((0..self.width, cursor))
    }
}

/// Scanline projector for the equirectangular view.
#[derive(Debug, Default)]
pub struct EquirectScanlineProjector {
    engine: ScanlineEngine,
    state: MapperState,
}

impl EquirectScanlineProjector {
    pub fn new(engine: ScanlineEngine) -> Self {
        Self {
            engine,
            state: MapperState::Idle,
        }
    }
}

impl ScanlineProjector for EquirectScanlineProjector {
    fn projection(&self) -> Projection {
        Projection::Equirectangular
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
        let geometry = EquirectGeometry::new(viewport, canvas.width());
        let stats = self.engine.render(&geometry, canvas, source, provider, quality);
        self.state = MapperState::Idle;
        log::debug!(
            "equirect frame: level {}, {} tiles, step {}, {:?}",
            stats.level,
            stats.tiles.len(),
            stats.step,
            stats.elapsed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RenderConfig;
    use crate::core::constants::{DEFAULT_TILE_SIZE, TRANSPARENT};
    use crate::core::geo::{GeoCoord, TileId};
    use crate::tiles::tile::{rgb, TextureTile, TileImage};
    use crate::tiles::{GeoSceneTexture, StaticTileProvider};

    fn two_tile_world() -> (GeoSceneTexture, StaticTileProvider) {
        let texture = GeoSceneTexture::new("earth/test", 2, 1);
        let provider = StaticTileProvider::new();
        let size = DEFAULT_TILE_SIZE;
        provider.insert(TextureTile::new(
            texture.tile_id(0, 0, 0),
            TileImage::filled(size, size, rgb(200, 0, 0)),
        ));
        provider.insert(TextureTile::new(
            texture.tile_id(0, 1, 0),
            TileImage::filled(size, size, rgb(0, 0, 200)),
        ));
        (texture, provider)
    }

    #[test]
    fn test_whole_globe_touches_both_level_zero_tiles() {
        let (texture, provider) = two_tile_world();
        let viewport = ViewportState::new(Projection::Equirectangular, GeoCoord::new(0.0, 0.0), 150.0, 800, 400);
        let level = texture.grid().tile_level_for_radius(viewport.radius, 20);
        assert_eq!(level, 0);

        let mut canvas = Canvas::new(800, 400);
        let mut projector = EquirectScanlineProjector::default();
        let stats = projector.map_texture(
            &viewport,
            &mut canvas,
            &TextureLevel::for_texture(&texture, level),
            &provider,
            MapQuality::High,
        );

        assert_eq!(
            stats.tiles,
            vec![texture.tile_id(0, 0, 0), texture.tile_id(0, 1, 0)]
        );
        assert_eq!(projector.state(), MapperState::Idle);

        // west of the center is the western tile
        let west = viewport
            .geo_to_screen(GeoCoord::from_degrees(-90.0, 10.0))
            .unwrap();
        let east = viewport.geo_to_screen(GeoCoord::from_degrees(90.0, 10.0)).unwrap();
        assert_eq!(canvas.pixel(west.x as u32, west.y as u32), rgb(200, 0, 0));
        assert_eq!(canvas.pixel(east.x as u32, east.y as u32), rgb(0, 0, 200));
    }

    #[test]
    fn test_rows_beyond_the_poles_are_cleared() {
        let (texture, provider) = two_tile_world();
        let viewport = ViewportState::new(Projection::Equirectangular, GeoCoord::new(0.0, 0.0), 100.0, 300, 300);
        let mut canvas = Canvas::new(300, 300);
        canvas.fill(rgb(9, 9, 9));

        let stats = EquirectScanlineProjector::default().map_texture(
            &viewport,
            &mut canvas,
            &TextureLevel::for_texture(&texture, 0),
            &provider,
            MapQuality::Low,
        );

        // the globe is 2 * radius = 200 px tall
        assert!((50..=51).contains(&stats.painted_rows.start));
        assert!((250..=251).contains(&stats.painted_rows.end));
        assert!(canvas.row(10).iter().all(|&p| p == TRANSPARENT));
        assert!(canvas.row(290).iter().all(|&p| p == TRANSPARENT));
        assert!(canvas.row(150).iter().all(|&p| p != TRANSPARENT));
    }

    #[test]
    fn test_interlaced_rows_are_copied() {
        let texture = GeoSceneTexture::new("earth/gradient", 1, 1).with_tile_size(64, 64);
        let provider = StaticTileProvider::new();
        let data = (0..64 * 64).map(|i| rgb(0, (i / 64) as u8 * 4, 0)).collect();
        provider.insert(TextureTile::new(TileId::new(texture.theme_hash(), 0, 0, 0), TileImage::from_argb(64, 64, data)));

        let config = RenderConfig {
            interlaced: true,
            ..RenderConfig::default()
        };
        let viewport = ViewportState::new(Projection::Equirectangular, GeoCoord::new(0.0, 0.0), 60.0, 100, 100);
        let mut canvas = Canvas::new(100, 100);
        let stats = EquirectScanlineProjector::new(ScanlineEngine::new(&config)).map_texture(
            &viewport,
            &mut canvas,
            &TextureLevel::for_texture(&texture, 0),
            &provider,
            MapQuality::Low,
        );

        let first = stats.painted_rows.start;
        assert_eq!(canvas.row(first), canvas.row(first + 1));
        assert_eq!(canvas.row(first + 2), canvas.row(first + 3));
        assert_ne!(canvas.row(first + 1), canvas.row(first + 20));
    }
}
