use crate::tiles::tile::{alpha, blue, green, red};
use crate::core::constants::TRANSPARENT;
use crate::Result;
use image::RgbaImage;
use std::path::Path;

/// Destination image of a render pass: `width * height` ARGB words, row major.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Canvas {
    /// Creates a fully transparent canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![TRANSPARENT; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resizes and clears the canvas if the size changed
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            *self = Self::new(width, height);
        }
    }

    pub fn fill(&mut self, pixel: u32) {
        self.pixels.fill(pixel);
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: u32) {
        let width = self.width as usize;
        self.pixels[y as usize * width + x as usize] = pixel;
    }

    pub fn row(&self, y: u32) -> &[u32] {
        let start = y as usize * self.width as usize;
        &self.pixels[start..start + self.width as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u32] {
        let start = y as usize * self.width as usize;
        let width = self.width as usize;
        &mut self.pixels[start..start + width]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// Number of non-transparent pixels
    pub fn painted_pixels(&self) -> usize {
        self.pixels.iter().filter(|&&p| p != TRANSPARENT).count()
    }

    /// Copies into an `image` buffer
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            image::Rgba([red(p), green(p), blue(p), alpha(p)])
        })
    }

    /// Writes the canvas as PNG
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_rgba_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::tile::rgb;

    #[test]
    fn test_canvas_rows() {
        let mut canvas = Canvas::new(4, 3);
        assert_eq!(canvas.painted_pixels(), 0);
        canvas.row_mut(1).fill(rgb(10, 20, 30));
        assert_eq!(canvas.pixel(3, 1), rgb(10, 20, 30));
        assert_eq!(canvas.row(0), &[TRANSPARENT; 4]);
        assert_eq!(canvas.painted_pixels(), 4);

        let image = canvas.to_rgba_image();
        assert_eq!(image.get_pixel(2, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_resize_clears() {
        let mut canvas = Canvas::new(2, 2);
        canvas.fill(rgb(1, 1, 1));
        canvas.resize(2, 2);
        assert_eq!(canvas.painted_pixels(), 4);
        canvas.resize(3, 2);
        assert_eq!(canvas.painted_pixels(), 0);
        assert_eq!(canvas.pixels().len(), 6);
    }
}
