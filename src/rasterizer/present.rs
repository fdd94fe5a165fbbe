//! RGBA8 framebuffer for putting a float color surface on screen

use std::path::Path;

use super::error::{Error, Result};
use super::surface::Surface;

/// Framebuffer for presentation
pub struct Framebuffer {
    pub pixels: Vec<u8>, // RGBA, 4 bytes per pixel
    pub width: usize,
    pub height: usize,
}

impl Framebuffer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![0; width * height * 4],
            width,
            height,
        }
    }

    /// Convert a color surface, resizing the framebuffer to match. Channels
    /// are saturated to [0, 1]; missing alpha reads as opaque.
    pub fn copy_from_surface(&mut self, surface: &Surface) -> Result<()> {
        let img = surface.to_rgba8()?;
        self.width = img.width() as usize;
        self.height = img.height() as usize;
        self.pixels = img.into_raw();
        Ok(())
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let img = image::RgbaImage::from_raw(self.width as u32, self.height as u32, self.pixels.clone())
            .ok_or(Error::InvalidParameters("framebuffer size mismatch"))?;
        img.save(path).map_err(|_| Error::Unknown("failed to write image"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::math::Vec4;
    use crate::rasterizer::types::Format;

    #[test]
    fn test_copy_from_rgb_surface() {
        let surface = Surface::new(2, 1, Format::R32G32B32F).unwrap();
        surface.clear(Vec4::new(1.0, 0.5, 2.0, 0.0)).unwrap();
        let mut fb = Framebuffer::new(1, 1);
        fb.copy_from_surface(&surface).unwrap();
        assert_eq!((fb.width, fb.height), (2, 1));
        assert_eq!(&fb.pixels[0..4], &[255, 128, 255, 255]);
        assert_eq!(&fb.pixels[4..8], &[255, 128, 255, 255]);
    }
}
