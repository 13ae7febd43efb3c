use super::pyramid::{TileCoordsPyramid, TileRect};
use crate::core::config::RegionConfig;
use crate::core::constants::ABSOLUTE_MAX_TILE_LEVEL;
use crate::core::geo::GeoCoord;
use crate::tiles::addressing::TileGrid;
use crate::tiles::texture::GeoSceneTexture;
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Geographic bounding box in radians. `west > east` means the box crosses
/// the dateline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        let (south, north) = (south.min(north), south.max(north));
        Self {
            west,
            south: south.max(-FRAC_PI_2),
            east,
            north: north.min(FRAC_PI_2),
        }
    }

    pub fn from_degrees(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self::new(west.to_radians(), south.to_radians(), east.to_radians(), north.to_radians())
    }

    pub fn world() -> Self {
        Self::new(-PI, -FRAC_PI_2, PI, FRAC_PI_2)
    }

    pub fn crosses_dateline(&self) -> bool {
        self.west > self.east
    }

    /// Splits a box crossing the dateline into its western and eastern part
    pub fn split_at_dateline(&self) -> Vec<GeoBox> {
        if self.crosses_dateline() {
            vec![
                GeoBox::new(self.west, self.south, PI, self.north),
                GeoBox::new(-PI, self.south, self.east, self.north),
            ]
        } else {
            vec![*self]
        }
    }

    fn is_degenerate(&self) -> bool {
        self.west == self.east || self.south >= self.north
    }
}

/// Outcome of planning, used to enable or disable the download action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// The selection covers no tile
    Empty,
    TooManyTiles { count: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionPlan {
    pub pyramids: Vec<TileCoordsPyramid>,
    pub tiles_count: u64,
    pub verdict: Verdict,
}

impl RegionPlan {
    pub fn is_acceptable(&self) -> bool {
        self.verdict == Verdict::Ok
    }

    /// Advisory text for a selection that cannot be downloaded
    pub fn message(&self) -> Option<String> {
        match self.verdict {
            Verdict::Ok => None,
            Verdict::Empty => Some("The selected region contains no tiles.".to_string()),
            Verdict::TooManyTiles { count, limit } => Some(format!(
                "The selected region contains {count} tiles, more than the allowed {limit}. Please refine your selection."
            )),
        }
    }
}

/// Turns a geographic selection into tile pyramids for bulk download.
///
/// Planning does no I/O; hand the pyramids to
/// [`crate::tiles::loader::TileLoader::download_region`].
#[derive(Debug, Clone)]
pub struct RegionDownloadPlanner {
    grid: TileGrid,
    max_tiles: u64,
}

impl RegionDownloadPlanner {
    pub fn new(grid: TileGrid, config: &RegionConfig) -> Self {
        Self {
            grid,
            max_tiles: config.max_region_tiles,
        }
    }

    pub fn for_texture(texture: &GeoSceneTexture, config: &RegionConfig) -> Self {
        Self::new(texture.grid(), config)
    }

    pub fn max_tiles(&self) -> u64 {
        self.max_tiles
    }

    /// Plans the download of `area`, selected while `visible_level` was
    /// shown, for the levels `top_level..=bottom_level`.
    ///
    /// Fails for an inverted level range or levels deeper than
    /// [`ABSOLUTE_MAX_TILE_LEVEL`]; oversized and empty selections are
    /// reported through the plan's verdict.
    pub fn plan(&self, area: &GeoBox, visible_level: u32, top_level: u32, bottom_level: u32) -> Result<RegionPlan> {
        // validates the level range even for empty selections
        TileCoordsPyramid::new(top_level, bottom_level)?;
        if visible_level > ABSOLUTE_MAX_TILE_LEVEL {
            return Err(MapError::InvalidConfig(format!(
                "visible level {visible_level} is deeper than {ABSOLUTE_MAX_TILE_LEVEL}"
            )));
        }

        let mut pyramids = Vec::new();
        if !area.is_degenerate() {
            for part in area.split_at_dateline() {
                if let Some(rect) = self.bottom_rect(&part, visible_level, bottom_level) {
                    pyramids.push(TileCoordsPyramid::new(top_level, bottom_level)?.with_bottom_rect(rect));
                }
            }
        }

        let tiles_count = pyramids.iter().map(|p| p.tiles_count()).sum();
        let verdict = if tiles_count == 0 {
            Verdict::Empty
        } else if tiles_count > self.max_tiles {
            Verdict::TooManyTiles {
                count: tiles_count,
                limit: self.max_tiles,
            }
        } else {
            Verdict::Ok
        };
        log::debug!(
            "region plan: {} pyramids, {} tiles, {:?}",
            pyramids.len(),
            tiles_count,
            verdict
        );
        Ok(RegionPlan {
            pyramids,
            tiles_count,
            verdict,
        })
    }

    /// Tile rectangle covering `area` at `bottom_level`
    fn bottom_rect(&self, area: &GeoBox, visible_level: u32, bottom_level: u32) -> Option<TileRect> {
        let nw = self
            .grid
            .geo_to_global(GeoCoord::new(area.west, area.north), visible_level);
        let se = self
            .grid
            .geo_to_global(GeoCoord::new(area.east, area.south), visible_level);

        let rescale = |v: f64, round_up: bool| -> i64 {
            let v = (if round_up { v.ceil() } else { v.floor() }) as i64;
            if bottom_level >= visible_level {
                v << (bottom_level - visible_level)
            } else {
                let shift = visible_level - bottom_level;
                if round_up {
                    (v + (1 << shift) - 1) >> shift
                } else {
                    v >> shift
                }
            }
        };
        let (x0, y0) = (rescale(nw.x, false), rescale(nw.y, false));
        let (x1, y1) = (rescale(se.x, true), rescale(se.y, true));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let (tw, th) = (self.grid.tile_width as i64, self.grid.tile_height as i64);
        let end_x = x1 / tw + i64::from(x1 % tw != 0);
        let end_y = y1 / th + i64::from(y1 % th != 0);
        let max_x = self.grid.columns(bottom_level) as i64 - 1;
        let max_y = self.grid.rows(bottom_level) as i64 - 1;

        let rect = TileRect::new(
            (x0 / tw).clamp(0, max_x) as i32,
            (y0 / th).clamp(0, max_y) as i32,
            (end_x - 1).clamp(0, max_x) as i32,
            (end_y - 1).clamp(0, max_y) as i32,
        );
        Some(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::TextureProjection;

    fn planner(columns: u32, rows: u32, limit: u64) -> RegionDownloadPlanner {
        RegionDownloadPlanner::new(
            TileGrid::new(columns, rows, 256, 256, TextureProjection::Equirectangular),
            &RegionConfig {
                max_region_tiles: limit,
            },
        )
    }

    #[test]
    fn test_world_pyramid_has_21_tiles() {
        let plan = planner(1, 1, 100_000).plan(&GeoBox::world(), 0, 0, 2).unwrap();
        assert_eq!(plan.pyramids.len(), 1);
        assert_eq!(plan.pyramids[0].bottom_rect(), TileRect::new(0, 0, 3, 3));
        assert_eq!(plan.tiles_count, 21);
        assert!(plan.is_acceptable());
        assert_eq!(plan.message(), None);
    }

    #[test]
    fn test_partial_tiles_are_included() {
        // a sliver just east of the prime meridian and north of the equator
        let area = GeoBox::from_degrees(1.0, 1.0, 2.0, 2.0);
        let plan = planner(2, 1, 100_000).plan(&area, 3, 3, 3).unwrap();
        let rect = plan.pyramids[0].bottom_rect();
        assert_eq!(rect.count(), 1);
        assert_eq!((rect.x0, rect.y0), (8, 3));
    }

    #[test]
    fn test_rescaling_from_visible_level() {
        let area = GeoBox::from_degrees(1.0, 1.0, 89.0, 44.0);
        let p = planner(2, 1, 100_000);
        let from_low = p.plan(&area, 1, 4, 4).unwrap();
        let from_high = p.plan(&area, 6, 4, 4).unwrap();
        assert_eq!(from_low.pyramids[0].bottom_rect(), from_high.pyramids[0].bottom_rect());
        assert_eq!(from_low.pyramids[0].bottom_rect(), TileRect::new(16, 4, 23, 7));
    }

    #[test]
    fn test_too_many_tiles() {
        let plan = planner(2, 1, 1000).plan(&GeoBox::world(), 0, 0, 6).unwrap();
        assert_eq!(
            plan.verdict,
            Verdict::TooManyTiles {
                count: plan.tiles_count,
                limit: 1000
            }
        );
        assert!(!plan.is_acceptable());
        assert!(plan.message().unwrap().contains("1000"));
    }

    #[test]
    fn test_empty_selection() {
        let area = GeoBox::from_degrees(10.0, 5.0, 10.0, 20.0);
        let plan = planner(2, 1, 1000).plan(&area, 2, 0, 3).unwrap();
        assert_eq!(plan.verdict, Verdict::Empty);
        assert!(plan.pyramids.is_empty());
    }

    #[test]
    fn test_dateline_box_is_split() {
        let area = GeoBox::from_degrees(170.0, -10.0, -170.0, 10.0);
        let plan = planner(2, 1, 100_000).plan(&area, 2, 2, 2).unwrap();
        assert_eq!(plan.pyramids.len(), 2);
        let west = plan.pyramids[0].bottom_rect();
        let east = plan.pyramids[1].bottom_rect();
        assert_eq!(west.x1, 7);
        assert_eq!(east.x0, 0);
    }

    #[test]
    fn test_inverted_levels_fail() {
        assert!(planner(2, 1, 10).plan(&GeoBox::world(), 0, 3, 1).is_err());
    }

    #[test]
    fn test_levels_beyond_maximum_fail() {
        let area = GeoBox::from_degrees(1.0, 1.0, 2.0, 2.0);
        let p = planner(2, 1, u64::MAX);
        for level in [32, 64] {
            assert!(matches!(
                p.plan(&area, 0, 0, level),
                Err(MapError::InvalidPyramid { .. })
            ));
            assert!(matches!(p.plan(&area, level, 0, 4), Err(MapError::InvalidConfig(_))));
        }

        let deepest = p.plan(&area, 2, ABSOLUTE_MAX_TILE_LEVEL, ABSOLUTE_MAX_TILE_LEVEL).unwrap();
        let rect = deepest.pyramids[0].bottom_rect();
        assert!(rect.x0 > 0 && rect.x1 < (2 << ABSOLUTE_MAX_TILE_LEVEL));
    }
}
