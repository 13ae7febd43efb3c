use crate::core::constants::ABSOLUTE_MAX_TILE_LEVEL;
use crate::core::geo::TileId;
use crate::{MapError, Result};
use serde::{Deserialize, Serialize};

/// Inclusive rectangle of tile indices at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl TileRect {
    /// Rectangle spanning both corners, in any order
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> u64 {
        (self.x1 as i64 - self.x0 as i64 + 1) as u64
    }

    pub fn height(&self) -> u64 {
        (self.y1 as i64 - self.y0 as i64 + 1) as u64
    }

    pub fn count(&self) -> u64 {
        self.width() * self.height()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        (self.x0..=self.x1).contains(&x) && (self.y0..=self.y1).contains(&y)
    }

    pub fn contains_rect(&self, other: &TileRect) -> bool {
        self.contains(other.x0, other.y0) && self.contains(other.x1, other.y1)
    }

    /// The same area `levels` levels up (coarser)
    pub fn shifted_up(&self, levels: u32) -> TileRect {
        TileRect {
            x0: self.x0 >> levels,
            y0: self.y0 >> levels,
            x1: self.x1 >> levels,
            y1: self.y1 >> levels,
        }
    }

    /// The area covered by this rectangle `levels` levels down (finer)
    pub fn shifted_down(&self, levels: u32) -> TileRect {
        let last = (1i32 << levels) - 1;
        TileRect {
            x0: self.x0 << levels,
            y0: self.y0 << levels,
            x1: (self.x1 << levels) + last,
            y1: (self.y1 << levels) + last,
        }
    }

    /// Iterates row by row
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (self.y0..=self.y1).flat_map(move |y| (self.x0..=self.x1).map(move |x| (x, y)))
    }
}

/// Tile ranges over a span of levels, derived from the rectangle at the
/// bottom (finest) level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileCoordsPyramid {
    top_level: u32,
    bottom_level: u32,
    bottom_rect: TileRect,
}

impl TileCoordsPyramid {
    /// Pyramid from `top_level` down to `bottom_level` (inclusive) with an
    /// empty single tile rectangle; set the area with
    /// [`TileCoordsPyramid::with_bottom_rect`].
    ///
    /// Fails for an inverted range or a bottom level deeper than
    /// [`ABSOLUTE_MAX_TILE_LEVEL`].
    pub fn new(top_level: u32, bottom_level: u32) -> Result<Self> {
        if top_level > bottom_level || bottom_level > ABSOLUTE_MAX_TILE_LEVEL {
            return Err(MapError::InvalidPyramid {
                top: top_level,
                bottom: bottom_level,
            });
        }
        Ok(Self {
            top_level,
            bottom_level,
            bottom_rect: TileRect::new(0, 0, 0, 0),
        })
    }

    pub fn with_bottom_rect(mut self, rect: TileRect) -> Self {
        self.bottom_rect = rect;
        self
    }

    pub fn top_level(&self) -> u32 {
        self.top_level
    }

    pub fn bottom_level(&self) -> u32 {
        self.bottom_level
    }

    pub fn bottom_rect(&self) -> TileRect {
        self.bottom_rect
    }

    pub fn levels(&self) -> impl Iterator<Item = u32> {
        self.top_level..=self.bottom_level
    }

    /// Tile rectangle at `level`, `None` outside the pyramid
    pub fn coords(&self, level: u32) -> Option<TileRect> {
        if !(self.top_level..=self.bottom_level).contains(&level) {
            return None;
        }
        Some(self.bottom_rect.shifted_up(self.bottom_level - level))
    }

    /// Number of tiles over all levels
    pub fn tiles_count(&self) -> u64 {
        self.levels()
            .filter_map(|level| self.coords(level))
            .map(|rect| rect.count())
            .sum()
    }

    /// Every tile id of the pyramid, coarsest level first
    pub fn tile_ids(&self, theme: u64) -> impl Iterator<Item = TileId> + '_ {
        self.levels().flat_map(move |level| {
            let rect = self.coords(level).unwrap_or(self.bottom_rect);
            (rect.y0..=rect.y1)
                .flat_map(move |y| (rect.x0..=rect.x1).map(move |x| TileId::new(theme, level, x, y)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pyramid_counts_all_levels() {
        let pyramid = TileCoordsPyramid::new(0, 2)
            .unwrap()
            .with_bottom_rect(TileRect::new(0, 0, 3, 3));
        assert_eq!(pyramid.coords(2).unwrap().count(), 16);
        assert_eq!(pyramid.coords(1).unwrap(), TileRect::new(0, 0, 1, 1));
        assert_eq!(pyramid.coords(0).unwrap(), TileRect::new(0, 0, 0, 0));
        assert_eq!(pyramid.coords(3), None);
        assert_eq!(pyramid.tiles_count(), 21);
        assert_eq!(pyramid.tile_ids(9).count(), 21);
    }

    #[test]
    fn test_inverted_levels_rejected() {
        assert!(matches!(
            TileCoordsPyramid::new(5, 2),
            Err(MapError::InvalidPyramid { top: 5, bottom: 2 })
        ));
    }

    #[test]
    fn test_levels_beyond_maximum_rejected() {
        assert!(TileCoordsPyramid::new(0, ABSOLUTE_MAX_TILE_LEVEL).is_ok());
        for bottom in [ABSOLUTE_MAX_TILE_LEVEL + 1, 32, 64] {
            assert!(matches!(
                TileCoordsPyramid::new(0, bottom),
                Err(MapError::InvalidPyramid { top: 0, bottom: b }) if b == bottom
            ));
        }
    }

    #[test]
    fn test_deepest_level_does_not_overflow() {
        let pyramid = TileCoordsPyramid::new(0, ABSOLUTE_MAX_TILE_LEVEL)
            .unwrap()
            .with_bottom_rect(TileRect::new(1 << 20, 0, (1 << 21) - 1, 3));
        assert_eq!(pyramid.coords(0).unwrap(), TileRect::new(1, 0, 1, 0));
        let full = TileRect::new(1, 0, 1, 0).shifted_down(ABSOLUTE_MAX_TILE_LEVEL);
        assert_eq!(full.x1, (1 << 21) - 1);
    }

    #[test]
    fn test_tile_count_grows_with_depth() {
        let rect = TileRect::new(5, 9, 37, 20);
        let mut previous = 0;
        for top in (0..=8).rev() {
            let count = TileCoordsPyramid::new(top, 8)
                .unwrap()
                .with_bottom_rect(rect)
                .tiles_count();
            assert!(count >= previous);
            previous = count;
        }
    }

    #[test]
    fn test_level_shift_round_trip_covers_rect() {
        for rect in [TileRect::new(0, 0, 3, 3), TileRect::new(5, 9, 37, 20), TileRect::new(7, 7, 7, 7)] {
            for k in 0..5 {
                let round_trip = rect.shifted_up(k).shifted_down(k);
                assert!(round_trip.contains_rect(&rect), "{rect:?} shifted by {k}");
            }
        }
    }

    #[test]
    fn test_tile_ids_start_at_top() {
        let pyramid = TileCoordsPyramid::new(1, 2)
            .unwrap()
            .with_bottom_rect(TileRect::new(2, 2, 3, 3));
        let ids: Vec<_> = pyramid.tile_ids(1).collect();
        assert_eq!(ids[0], TileId::new(1, 1, 1, 1));
        assert_eq!(ids.len(), 5);
        assert!(ids[1..].iter().all(|id| id.level == 2));
    }
}
