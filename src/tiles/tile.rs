//! Decoded tile images.
//!
//! Pixels are stored either 8-bit indexed (with a 256 entry palette) or as
//! 32-bit ARGB words (`0xAARRGGBB`). A row offset jump table is built once so
//! pixel access is a table lookup plus an add, whatever the depth.

use crate::core::geo::TileId;
use crate::{MapError, Result};
use image::{DynamicImage, RgbaImage};
use std::time::{Duration, Instant};

/// Packs channels into an ARGB word
#[inline]
pub fn argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    (a as u32) << 24 | (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// Opaque ARGB word
#[inline]
pub fn rgb(r: u8, g: u8, b: u8) -> u32 {
    argb(0xff, r, g, b)
}

#[inline]
pub fn alpha(pixel: u32) -> u8 {
    (pixel >> 24) as u8
}

#[inline]
pub fn red(pixel: u32) -> u8 {
    (pixel >> 16) as u8
}

#[inline]
pub fn green(pixel: u32) -> u8 {
    (pixel >> 8) as u8
}

#[inline]
pub fn blue(pixel: u32) -> u8 {
    pixel as u8
}

/// Storage depth of a tile image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelDepth {
    Indexed8,
    Argb32,
}

#[derive(Debug, Clone, PartialEq)]
enum Pixels {
    Indexed { data: Vec<u8>, palette: Box<[u32; 256]> },
    Argb(Vec<u32>),
}

/// A raster image with O(1) pixel access at either depth.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    width: u32,
    height: u32,
    pixels: Pixels,
    /// Index of the first pixel of each row
    row_offsets: Vec<usize>,
}

impl TileImage {
    fn with_pixels(width: u32, height: u32, pixels: Pixels) -> Self {
        let row_offsets = (0..height as usize).map(|y| y * width as usize).collect();
        Self {
            width,
            height,
            pixels,
            row_offsets,
        }
    }

    /// Creates a 32-bit image filled with `fill`
    pub fn filled(width: u32, height: u32, fill: u32) -> Self {
        Self::from_argb(width, height, vec![fill; width as usize * height as usize])
    }

    /// Wraps ARGB words; `data` must hold exactly `width * height` pixels
    pub fn from_argb(width: u32, height: u32, data: Vec<u32>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self::with_pixels(width, height, Pixels::Argb(data))
    }

    /// Wraps palette indices with their palette
    pub fn from_indexed(width: u32, height: u32, data: Vec<u8>, palette: [u32; 256]) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self::with_pixels(
            width,
            height,
            Pixels::Indexed {
                data,
                palette: Box::new(palette),
            },
        )
    }

    /// Wraps 8-bit values with an opaque grey ramp palette
    pub fn from_grayscale(width: u32, height: u32, data: Vec<u8>) -> Self {
        let mut palette = [0u32; 256];
        for (i, entry) in palette.iter_mut().enumerate() {
            *entry = rgb(i as u8, i as u8, i as u8);
        }
        Self::from_indexed(width, height, data, palette)
    }

    /// Decodes an encoded tile (PNG, JPEG).
    ///
    /// Single channel images keep their 8-bit depth; everything else is
    /// converted to ARGB.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(MapError::Decode("empty tile image".into()));
        }
        Ok(Self::from_dynamic(decoded))
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => {
                let (width, height) = gray.dimensions();
                Self::from_grayscale(width, height, gray.into_raw())
            }
            other => {
                let rgba = other.to_rgba8();
                let (width, height) = rgba.dimensions();
                let data = rgba
                    .pixels()
                    .map(|p| argb(p[3], p[0], p[1], p[2]))
                    .collect();
                Self::from_argb(width, height, data)
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> PixelDepth {
        match self.pixels {
            Pixels::Indexed { .. } => PixelDepth::Indexed8,
            Pixels::Argb(_) => PixelDepth::Argb32,
        }
    }

    /// Approximate heap footprint, used by the byte-bounded caches
    pub fn byte_size(&self) -> usize {
        let pixels = match &self.pixels {
            Pixels::Indexed { data, .. } => data.len() + 256 * 4,
            Pixels::Argb(data) => data.len() * 4,
        };
        pixels + self.row_offsets.len() * std::mem::size_of::<usize>()
    }

    /// ARGB value at `(x, y)`; callers keep coordinates in range
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        let index = self.row_offsets[y as usize] + x as usize;
        match &self.pixels {
            Pixels::Indexed { data, palette } => palette[data[index] as usize],
            Pixels::Argb(data) => data[index],
        }
    }

    /// Raw 8-bit value at `(x, y)`: the palette index for indexed images,
    /// the red channel otherwise
    #[inline]
    pub fn value(&self, x: u32, y: u32) -> u8 {
        let index = self.row_offsets[y as usize] + x as usize;
        match &self.pixels {
            Pixels::Indexed { data, .. } => data[index],
            Pixels::Argb(data) => red(data[index]),
        }
    }

    /// Converts an indexed image to 32-bit in place
    pub fn make_argb(&mut self) {
        if let Pixels::Indexed { data, palette } = &self.pixels {
            let converted = data.iter().map(|&i| palette[i as usize]).collect();
            self.pixels = Pixels::Argb(converted);
        }
    }

    /// Mutable ARGB words of the whole image, converting to 32-bit first
    pub fn argb_mut(&mut self) -> &mut [u32] {
        self.make_argb();
        match &mut self.pixels {
            Pixels::Argb(data) => data,
            Pixels::Indexed { .. } => unreachable!("converted by make_argb"),
        }
    }

    /// Mutable ARGB row, converting to 32-bit first
    pub fn row_mut(&mut self, y: u32) -> &mut [u32] {
        let start = self.row_offsets[y as usize];
        let width = self.width as usize;
        &mut self.argb_mut()[start..start + width]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: u32) {
        self.row_mut(y)[x as usize] = pixel;
    }

    /// Copies into an `image` buffer for export
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            image::Rgba([red(p), green(p), blue(p), alpha(p)])
        })
    }

    /// Nearest-neighbour upscale of the part of `self` covered by a
    /// descendant tile `delta` levels deeper at relative position
    /// `(rel_x, rel_y)` (in descendant tile units inside this tile).
    pub fn upscaled_crop(&self, delta: u32, rel_x: u32, rel_y: u32) -> Self {
        let (w, h) = (self.width as u64, self.height as u64);
        let mut data = Vec::with_capacity((w * h) as usize);
        for py in 0..h {
            let sy = ((rel_y as u64 * h + py) >> delta).min(h - 1) as u32;
            for px in 0..w {
                let sx = ((rel_x as u64 * w + px) >> delta).min(w - 1) as u32;
                data.push(self.pixel(sx, sy));
            }
        }
        Self::from_argb(self.width, self.height, data)
    }
}

/// A decoded tile as held by the caches.
#[derive(Debug, Clone)]
pub struct TextureTile {
    pub id: TileId,
    pub image: TileImage,
    /// Upscaled stand-in for a tile that has not arrived yet
    pub provisional: bool,
    created: Instant,
    expiry: Option<Duration>,
}

impl TextureTile {
    pub fn new(id: TileId, image: TileImage) -> Self {
        Self {
            id,
            image,
            provisional: false,
            created: Instant::now(),
            expiry: None,
        }
    }

    pub fn with_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Backdates the tile, e.g. to the time its bytes were written to disk
    pub fn with_age(mut self, age: Duration) -> Self {
        self.created = Instant::now().checked_sub(age).unwrap_or(self.created);
        self
    }

    /// Builds a provisional stand-in for `id` from a cached ancestor tile
    pub fn provisional_from(ancestor: &TextureTile, id: TileId) -> Option<Self> {
        if ancestor.id.level >= id.level || id.ancestor(ancestor.id.level)? != ancestor.id {
            return None;
        }
        let delta = id.level - ancestor.id.level;
        let rel_x = (id.x - (ancestor.id.x << delta)) as u32;
        let rel_y = (id.y - (ancestor.id.y << delta)) as u32;
        Some(Self {
            id,
            image: ancestor.image.upscaled_crop(delta, rel_x, rel_y),
            provisional: true,
            created: Instant::now(),
            expiry: None,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expiry
            .map(|expiry| self.created.elapsed() > expiry)
            .unwrap_or(false)
    }

    pub fn byte_size(&self) -> usize {
        self.image.byte_size() + std::mem::size_of::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageOutputFormat, Luma};
    use std::io::Cursor;

    fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_rgb_png_to_argb() {
        let rgba = RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255]));
        let tile = TileImage::decode(&encode_png(DynamicImage::ImageRgba8(rgba))).unwrap();
        assert_eq!(tile.depth(), PixelDepth::Argb32);
        assert_eq!((tile.width(), tile.height()), (4, 3));
        assert_eq!(tile.pixel(3, 2), rgb(10, 20, 30));
    }

    #[test]
    fn test_decode_gray_png_keeps_indexed_depth() {
        let gray = GrayImage::from_fn(2, 2, |x, y| Luma([(x * 100 + y * 50) as u8]));
        let tile = TileImage::decode(&encode_png(DynamicImage::ImageLuma8(gray))).unwrap();
        assert_eq!(tile.depth(), PixelDepth::Indexed8);
        assert_eq!(tile.value(1, 1), 150);
        assert_eq!(tile.pixel(1, 0), rgb(100, 100, 100));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(TileImage::decode(b"definitely not a png").is_err());
    }

    #[test]
    fn test_make_argb_preserves_pixels() {
        let mut tile = TileImage::from_grayscale(2, 1, vec![7, 200]);
        tile.set_pixel(0, 0, rgb(1, 2, 3));
        assert_eq!(tile.depth(), PixelDepth::Argb32);
        assert_eq!(tile.pixel(0, 0), rgb(1, 2, 3));
        assert_eq!(tile.pixel(1, 0), rgb(200, 200, 200));
    }

    #[test]
    fn test_provisional_crop_from_parent() {
        // 4x4 parent, each quadrant a distinct colour
        let data = (0..16)
            .map(|i| {
                let (x, y) = (i % 4, i / 4);
                rgb((x / 2) as u8 * 100, (y / 2) as u8 * 100, 0)
            })
            .collect();
        let parent = TextureTile::new(TileId::new(1, 0, 0, 0), TileImage::from_argb(4, 4, data));
        let child_id = TileId::new(1, 1, 1, 1);
        let child = TextureTile::provisional_from(&parent, child_id).unwrap();
        assert!(child.provisional);
        assert_eq!(child.id, child_id);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(child.image.pixel(x, y), rgb(100, 100, 0));
            }
        }
        assert!(TextureTile::provisional_from(&parent, TileId::new(2, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_expiry() {
        let tile = TextureTile::new(TileId::new(1, 0, 0, 0), TileImage::filled(1, 1, 0))
            .with_expiry(Some(Duration::from_secs(0)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(tile.is_expired());
        let fresh = TextureTile::new(TileId::new(1, 0, 0, 0), TileImage::filled(1, 1, 0));
        assert!(!fresh.is_expired());

        let aged = TextureTile::new(TileId::new(1, 0, 0, 0), TileImage::filled(1, 1, 0))
            .with_expiry(Some(Duration::from_secs(60)))
            .with_age(Duration::from_secs(120));
        assert!(aged.is_expired());
    }
}
