//! Tile pyramid addressing.
//!
//! Pure functions between geographic coordinates (radians), global texture
//! pixel space and tile indices. Every function here works in global pixel
//! space of one tile level; screen space never appears in this module.

use crate::core::geo::{GeoCoord, GlobalPixel};
use crate::core::projection::{gd, gd_inv, TextureProjection};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Shape of a theme's tile pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub level_zero_columns: u32,
    pub level_zero_rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub projection: TextureProjection,
}

impl TileGrid {
    pub fn new(
        level_zero_columns: u32,
        level_zero_rows: u32,
        tile_width: u32,
        tile_height: u32,
        projection: TextureProjection,
    ) -> Self {
        Self {
            level_zero_columns: level_zero_columns.max(1),
            level_zero_rows: level_zero_rows.max(1),
            tile_width: tile_width.max(1),
            tile_height: tile_height.max(1),
            projection,
        }
    }

    /// Number of tile columns at `level`
    pub fn columns(&self, level: u32) -> u64 {
        (self.level_zero_columns as u64) << level
    }

    /// Number of tile rows at `level`
    pub fn rows(&self, level: u32) -> u64 {
        (self.level_zero_rows as u64) << level
    }

    /// Width in pixels of the fully tiled planet at `level`
    pub fn global_width(&self, level: u32) -> u64 {
        self.columns(level) * self.tile_width as u64
    }

    /// Height in pixels of the fully tiled planet at `level`
    pub fn global_height(&self, level: u32) -> u64 {
        self.rows(level) * self.tile_height as u64
    }

    /// Horizontal normalization factor, global pixels per radian
    pub fn lon_norm(&self, level: u32) -> f64 {
        self.global_width(level) as f64 / (2.0 * PI)
    }

    /// Vertical normalization factor, global pixels per radian of latitude
    /// (equirectangular) or per unit of `gd_inv` (Mercator)
    pub fn lat_norm(&self, level: u32) -> f64 {
        match self.projection {
            TextureProjection::Equirectangular => self.global_height(level) as f64 / PI,
            TextureProjection::Mercator => self.global_height(level) as f64 / (2.0 * PI),
        }
    }

    /// Projects a coordinate into global pixel space at `level`
    pub fn geo_to_global(&self, coord: GeoCoord, level: u32) -> GlobalPixel {
        GlobalPixel::new(
            lon_to_global_pixel_x(coord.lon, self.lon_norm(level)),
            lat_to_global_pixel_y(coord.lat, self.projection, self.lat_norm(level))
                + self.global_height(level) as f64 / 2.0,
        )
    }

    /// Inverse of [`TileGrid::geo_to_global`]
    pub fn global_to_geo(&self, pixel: GlobalPixel, level: u32) -> GeoCoord {
        let y = pixel.y - self.global_height(level) as f64 / 2.0;
        GeoCoord::new(
            global_pixel_x_to_lon(pixel.x, self.lon_norm(level)),
            global_pixel_y_to_lat(y, self.projection, self.lat_norm(level)),
        )
    }

    /// Tile index containing a global pixel
    pub fn tile_index(&self, pixel: GlobalPixel) -> (i32, i32) {
        pixel_to_tile_index(pixel, self.tile_width, self.tile_height)
    }

    /// Whether a tile index exists at `level`
    pub fn contains_tile(&self, level: u32, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u64) < self.columns(level) && (y as u64) < self.rows(level)
    }

    /// Geographic bounds `(west, north, east, south)` of one tile
    pub fn tile_geo_bounds(&self, level: u32, x: i32, y: i32) -> (f64, f64, f64, f64) {
        let nw = self.global_to_geo(
            GlobalPixel::new(
                x as f64 * self.tile_width as f64,
                y as f64 * self.tile_height as f64,
            ),
            level,
        );
        let se = self.global_to_geo(
            GlobalPixel::new(
                (x + 1) as f64 * self.tile_width as f64,
                (y + 1) as f64 * self.tile_height as f64,
            ),
            level,
        );
        (nw.lon, nw.lat, se.lon, se.lat)
    }

    /// Smallest level whose global width covers the on-screen circumference
    /// of a globe with `radius` pixels, clamped to `max_level`.
    pub fn tile_level_for_radius(&self, radius: f64, max_level: u32) -> u32 {
        let needed = 4.0 * radius;
        let mut level = 0;
        while level < max_level && (self.global_width(level) as f64) < needed {
            level += 1;
        }
        level
    }
}

/// Global pixel x of a longitude, `(lon + π) * norm`. No wraparound; callers
/// wrap the longitude into [-π, π] first.
pub fn lon_to_global_pixel_x(lon: f64, norm: f64) -> f64 {
    (lon + PI) * norm
}

/// Global pixel y of a latitude relative to the equator row (north is negative).
///
/// Equirectangular is linear; Mercator uses the polynomial inverse
/// Gudermannian which saturates beyond the pole clamp.
pub fn lat_to_global_pixel_y(lat: f64, projection: TextureProjection, norm: f64) -> f64 {
    match projection {
        TextureProjection::Equirectangular => -lat * norm,
        TextureProjection::Mercator => -gd_inv(lat) * norm,
    }
}

/// Longitude of a global pixel x
pub fn global_pixel_x_to_lon(x: f64, norm: f64) -> f64 {
    x / norm - PI
}

/// Latitude of a global pixel y measured from the equator row
pub fn global_pixel_y_to_lat(y: f64, projection: TextureProjection, norm: f64) -> f64 {
    match projection {
        TextureProjection::Equirectangular => (-y / norm).clamp(-FRAC_PI_2, FRAC_PI_2),
        TextureProjection::Mercator => gd(-y / norm),
    }
}

/// Tile index of a global pixel, flooring towards negative infinity so that
/// pixels left of / above the origin land in tile -1.
pub fn pixel_to_tile_index(pixel: GlobalPixel, tile_width: u32, tile_height: u32) -> (i32, i32) {
    let x = pixel.x.floor() as i64;
    let y = pixel.y.floor() as i64;
    (
        x.div_euclid(tile_width as i64) as i32,
        y.div_euclid(tile_height as i64) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn marble_grid() -> TileGrid {
        TileGrid::new(2, 1, 675, 675, TextureProjection::Equirectangular)
    }

    #[test]
    fn test_global_size() {
        let grid = marble_grid();
        assert_eq!(grid.global_width(0), 1350);
        assert_eq!(grid.global_height(0), 675);
        assert_eq!(grid.global_width(3), 1350 * 8);
        assert_eq!(grid.rows(2), 4);
    }

    #[test]
    fn test_round_trip_equirect_and_mercator() {
        for projection in [TextureProjection::Equirectangular, TextureProjection::Mercator] {
            let grid = TileGrid::new(2, 1, 256, 256, projection);
            for level in [0, 3, 9] {
                for (lon, lat) in [(-3.0, -1.2), (0.0, 0.0), (1.7, 0.4), (3.1, 1.4)] {
                    let coord = GeoCoord::new(lon, lat);
                    let pixel = grid.geo_to_global(coord, level);
                    let back = grid.global_to_geo(pixel, level);
                    // sub-pixel tolerance at this level
                    let tol = 0.5 / grid.lon_norm(level);
                    assert!((back.lon - lon).abs() < tol, "{projection:?} lvl {level}");
                    assert!((back.lat - lat).abs() < 1e-4, "{projection:?} lvl {level}");
                }
            }
        }
    }

    #[test]
    fn test_mercator_clamp_saturates() {
        let norm = 100.0;
        let clamped = lat_to_global_pixel_y(1.4835, TextureProjection::Mercator, norm);
        let pole = lat_to_global_pixel_y(1.5708, TextureProjection::Mercator, norm);
        assert_eq!(clamped, pole);
        assert_relative_eq!(-clamped / norm, 3.1309587, epsilon = 1e-6);

        let mut previous = 0.0;
        let mut lat = 0.0;
        while lat <= 1.5708 {
            let magnitude = lat_to_global_pixel_y(lat, TextureProjection::Mercator, norm).abs();
            assert!(magnitude >= previous, "not monotonic at {lat}");
            previous = magnitude;
            lat += 0.0005;
        }
    }

    #[test]
    fn test_pixel_to_tile_index_floors_negative() {
        assert_eq!(pixel_to_tile_index(GlobalPixel::new(-1.0, -0.5), 256, 256), (-1, -1));
        assert_eq!(pixel_to_tile_index(GlobalPixel::new(255.9, 256.0), 256, 256), (0, 1));
        assert_eq!(pixel_to_tile_index(GlobalPixel::new(-256.0, 0.0), 256, 256), (-1, 0));
        assert_eq!(pixel_to_tile_index(GlobalPixel::new(-257.0, 0.0), 256, 256), (-2, 0));
    }

    #[test]
    fn test_tile_bounds_level_zero() {
        let grid = marble_grid();
        let (west, north, east, south) = grid.tile_geo_bounds(0, 1, 0);
        assert_relative_eq!(west, 0.0, epsilon = 1e-12);
        assert_relative_eq!(east, PI, epsilon = 1e-12);
        assert_relative_eq!(north, FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(south, -FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_tile_level_for_radius() {
        let grid = marble_grid();
        assert_eq!(grid.tile_level_for_radius(300.0, 10), 0);
        assert_eq!(grid.tile_level_for_radius(400.0, 10), 1);
        assert_eq!(grid.tile_level_for_radius(1e9, 4), 4);
    }
}
