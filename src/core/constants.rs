//! Engine-wide constants for tile addressing, projections and rendering.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile edge in pixels for the bundled equirectangular themes.
pub const DEFAULT_TILE_SIZE: u32 = 675;

/// Latitude (radians) at which the Mercator projection saturates (~85.05°).
pub const MERCATOR_MAX_LAT: f64 = 1.4835;

/// `asinh(tan(MERCATOR_MAX_LAT))`, the saturated inverse Gudermannian value.
pub const MERCATOR_MAX_GD_INV: f64 = 3.130_958_736_728_699;

/// Deepest tile level any theme may request.
pub const ABSOLUTE_MAX_TILE_LEVEL: u32 = 20;

/// Default ceiling on the number of tiles a region download may contain.
pub const DEFAULT_MAX_REGION_TILES: u64 = 100_000;

/// Default upper bound for the adaptive interpolation step.
pub const DEFAULT_MAX_INTERPOLATION_STEP: u32 = 8;

/// Width of the twilight band used by the sun shading, in haversine units.
pub const TWILIGHT_ZONE: f64 = 0.1;

/// Fully transparent ARGB pixel used for unpainted rows and missing tiles.
pub const TRANSPARENT: u32 = 0x0000_0000;

/// Default volatile (RAM) tile cache budget in kilobytes.
pub const DEFAULT_VOLATILE_CACHE_KB: u64 = 100 * 1024;

/// Default persistent (disk) tile cache budget in kilobytes.
pub const DEFAULT_PERSISTENT_CACHE_KB: u64 = 300 * 1024;
