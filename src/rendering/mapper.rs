use super::canvas::Canvas;
use super::equirect::EquirectScanlineProjector;
use super::mercator::MercatorScanlineProjector;
use super::sampler::TextureLevel;
use super::scanline::{FrameStats, MapperState, ScanlineEngine, ScanlineProjector};
use super::spherical::SphericalScanlineProjector;
use crate::core::config::{EngineConfig, MapQuality, RenderConfig, ViewContext};
use crate::core::constants::ABSOLUTE_MAX_TILE_LEVEL;
use crate::core::projection::Projection;
use crate::core::viewport::ViewportState;
use crate::tiles::texture::GeoSceneTexture;
use crate::tiles::TileProvider;

/// Creates the projector for a view projection
pub fn projector_for(projection: Projection, engine: ScanlineEngine) -> Box<dyn ScanlineProjector> {
    match projection {
        Projection::Equirectangular => Box::new(EquirectScanlineProjector::new(engine)),
        Projection::Mercator => Box::new(MercatorScanlineProjector::new(engine)),
        Projection::Spherical => Box::new(SphericalScanlineProjector::new(engine)),
    }
}

/// Entry point of the render path.
///
/// Picks the projector matching the viewport, the tile level matching the
/// zoom and the quality matching the view context, then maps the texture.
pub struct TextureMapper {
    config: RenderConfig,
    engine: ScanlineEngine,
    projector: Box<dyn ScanlineProjector>,
}

impl TextureMapper {
    pub fn new(config: &EngineConfig) -> Self {
        let engine = ScanlineEngine::new(&config.render);
        Self {
            config: config.render.clone(),
            projector: projector_for(Projection::default(), engine.clone()),
            engine,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn projection(&self) -> Projection {
        self.projector.projection()
    }

    pub fn state(&self) -> MapperState {
        self.projector.state()
    }

    /// Tile level used for `texture` at the viewport's zoom
    pub fn tile_level(&self, texture: &GeoSceneTexture, viewport: &ViewportState) -> u32 {
        let max_level = texture
            .max_tile_level
            .unwrap_or(ABSOLUTE_MAX_TILE_LEVEL)
            .min(self.config.max_tile_level)
            .min(ABSOLUTE_MAX_TILE_LEVEL);
        texture.grid().tile_level_for_radius(viewport.radius, max_level)
    }

    pub fn quality(&self, context: ViewContext) -> MapQuality {
        match context {
            ViewContext::Still => self.config.still_quality,
            ViewContext::Animation => self.config.animation_quality,
        }
    }

    /// Renders `texture` as seen through `viewport` into `canvas`
    pub fn render(
        &mut self,
        viewport: &ViewportState,
        texture: &GeoSceneTexture,
        provider: &dyn TileProvider,
        context: ViewContext,
        canvas: &mut Canvas,
    ) -> FrameStats {
        if self.projector.projection() != viewport.projection {
            log::debug!("switching projector to {:?}", viewport.projection);
            self.projector = projector_for(viewport.projection, self.engine.clone());
        }
        let level = self.tile_level(texture, viewport);
        let source = TextureLevel::for_texture(texture, level);
        self.projector
            .map_texture(viewport, canvas, &source, provider, self.quality(context))
    }
}

impl std::fmt::Debug for TextureMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureMapper")
            .field("projection", &self.projection())
            .field("engine", &self.engine)
            .finish()
    }
}
