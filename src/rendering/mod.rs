pub mod canvas;
pub mod decorator;
pub mod equirect;
pub mod mapper;
pub mod mercator;
pub mod sampler;
pub mod scanline;
pub mod spherical;

// Re-export main types
pub use canvas::Canvas;
pub use decorator::{MergedLayerDecorator, StackedTileBuilder, SunPosition};
pub use equirect::EquirectScanlineProjector;
pub use mapper::TextureMapper;
pub use mercator::MercatorScanlineProjector;
pub use sampler::{TextureLevel, TileSampler};
pub use scanline::{FrameStats, MapperState, ScanlineEngine, ScanlineProjector};
pub use spherical::SphericalScanlineProjector;
