//! Planning of bulk tile downloads for a geographic selection.

pub mod pyramid;
pub mod region;

pub use pyramid::{TileCoordsPyramid, TileRect};
pub use region::{GeoBox, RegionDownloadPlanner, RegionPlan, Verdict};
