use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// A geographical coordinate, both components in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoord {
    pub lon: f64,
    pub lat: f64,
}

impl GeoCoord {
    /// Creates a new coordinate from radians
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Creates a new coordinate from degrees
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self::new(lon.to_radians(), lat.to_radians())
    }

    /// Validates that the coordinate lies on the globe
    pub fn is_valid(&self) -> bool {
        self.lat.abs() <= PI / 2.0 && self.lon.abs() <= PI
    }

    /// Returns a copy with the longitude wrapped into [-π, π]
    pub fn wrapped(&self) -> Self {
        Self::new(wrap_lon(self.lon), self.lat)
    }
}

impl Default for GeoCoord {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Wraps a longitude in radians into [-π, π].
pub fn wrap_lon(lon: f64) -> f64 {
    if (-PI..=PI).contains(&lon) {
        return lon;
    }
    let wrapped = (lon + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI && lon > 0.0 {
        PI
    } else {
        wrapped
    }
}

/// A position in global texture pixel space: the pixel grid of the whole
/// planet raster at one tile level, origin at the north-west corner
/// (antimeridian / north pole).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalPixel {
    pub x: f64,
    pub y: f64,
}

impl GlobalPixel {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Rescales the position by `2^(to - from)` tile levels.
    pub fn rescaled(&self, from_level: u32, to_level: u32) -> Self {
        let factor = 2_f64.powi(to_level as i32 - from_level as i32);
        Self::new(self.x * factor, self.y * factor)
    }
}

/// A position in viewport pixel space, origin at the top-left corner of the
/// destination image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPixel {
    pub x: f64,
    pub y: f64,
}

impl ScreenPixel {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Identifies one raster tile of one theme.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub theme: u64,
    pub level: u32,
    pub x: i32,
    pub y: i32,
}

impl TileId {
    pub fn new(theme: u64, level: u32, x: i32, y: i32) -> Self {
        Self { theme, level, x, y }
    }

    /// Creates an id keyed by the hash of a theme id string
    pub fn for_theme(theme_id: &str, level: u32, x: i32, y: i32) -> Self {
        Self::new(theme_hash(theme_id), level, x, y)
    }

    /// Gets the tile covering this one at the next coarser level
    pub fn parent(&self) -> Option<TileId> {
        if self.level == 0 {
            None
        } else {
            Some(TileId::new(self.theme, self.level - 1, self.x >> 1, self.y >> 1))
        }
    }

    /// Gets the tile covering this one at a coarser `level`
    pub fn ancestor(&self, level: u32) -> Option<TileId> {
        if level > self.level {
            return None;
        }
        let delta = self.level - level;
        Some(TileId::new(self.theme, level, self.x >> delta, self.y >> delta))
    }

    /// Returns the same tile position for another theme
    pub fn with_theme(&self, theme: u64) -> TileId {
        TileId::new(theme, self.level, self.x, self.y)
    }
}

impl fmt::Debug for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileId({:x}:{}/{}/{})", self.theme, self.level, self.x, self.y)
    }
}

/// Stable 64-bit FNV-1a hash of a theme id.
///
/// Tile ids are persisted in cache keys across runs, so `std`'s randomly
/// seeded hasher cannot be used here.
pub fn theme_hash(theme_id: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    theme_id
        .bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_lon() {
        assert_eq!(wrap_lon(0.5), 0.5);
        assert!((wrap_lon(PI + 0.25) - (-PI + 0.25)).abs() < 1e-12);
        assert!((wrap_lon(-PI - 0.25) - (PI - 0.25)).abs() < 1e-12);
        assert!((wrap_lon(5.0 * PI) - PI).abs() < 1e-12);
    }

    #[test]
    fn test_tile_id_parent_chain() {
        let id = TileId::for_theme("earth/bluemarble", 3, 5, 6);
        let parent = id.parent().unwrap();
        assert_eq!((parent.level, parent.x, parent.y), (2, 2, 3));
        assert_eq!(id.ancestor(0).unwrap().x, 0);
        assert!(id.ancestor(4).is_none());
        assert!(TileId::for_theme("a", 0, 0, 0).parent().is_none());
    }

    #[test]
    fn test_tile_id_equality_covers_all_fields() {
        let a = TileId::for_theme("earth/srtm", 2, 1, 1);
        assert_eq!(a, TileId::for_theme("earth/srtm", 2, 1, 1));
        assert_ne!(a, TileId::for_theme("earth/clouds", 2, 1, 1));
        assert_ne!(a, TileId::for_theme("earth/srtm", 3, 1, 1));
        assert_ne!(a, TileId::for_theme("earth/srtm", 2, 0, 1));
        assert_ne!(a, TileId::for_theme("earth/srtm", 2, 1, 0));
    }

    #[test]
    fn test_theme_hash_is_stable() {
        assert_eq!(theme_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(theme_hash("earth"), theme_hash("earth"));
        assert_ne!(theme_hash("earth"), theme_hash("moon"));
    }
}
