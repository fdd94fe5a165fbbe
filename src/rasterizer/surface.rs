//! Float backed 2D image storage
//!
//! A `Surface` is width x height pixels of 1-4 float channels. Access goes
//! through lock guards; holding a guard keeps the surface locked, dropping it
//! releases the lock.

use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;

use log::{info, warn};

use super::error::{Error, Result};
use super::math::Vec4;
use super::types::{Format, Rect, TextureFilter};

pub struct Surface {
    width: u32,
    height: u32,
    format: Format,
    data: RefCell<Vec<f32>>,
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

impl Surface {
    pub fn new(width: u32, height: u32, format: Format) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameters("surface dimensions must be non-zero"));
        }
        let len = width as usize * height as usize * format.channels();
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory("surface storage"))?;
        data.resize(len, 0.0);
        Ok(Self { width, height, format, data: RefCell::new(data) })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Lock the whole surface for writing
    pub fn lock(&self) -> Result<RefMut<'_, [f32]>> {
        let data = self.data.try_borrow_mut()
            .map_err(|_| Error::InvalidState("surface is already locked"))?;
        Ok(RefMut::map(data, |v| v.as_mut_slice()))
    }

    /// Shared read access to the whole surface
    pub fn read(&self) -> Result<Ref<'_, [f32]>> {
        let data = self.data.try_borrow()
            .map_err(|_| Error::InvalidState("surface is locked for writing"))?;
        Ok(Ref::map(data, |v| v.as_slice()))
    }

    pub fn is_locked(&self) -> bool {
        self.data.try_borrow_mut().is_err()
    }

    /// Lock a sub rectangle. The returned staging buffer holds only the
    /// rectangle's pixels, row-major, and is written back when dropped.
    pub fn lock_rect(&self, rect: Rect) -> Result<RectLock<'_>> {
        if !rect.fits(self.width, self.height) {
            return Err(Error::InvalidParameters("lock rectangle outside surface"));
        }
        let target = self.lock()?;
        let channels = self.channels();
        let row_len = rect.width() as usize * channels;
        let mut staging = Vec::with_capacity(row_len * rect.height() as usize);
        for y in rect.top..rect.bottom {
            let start = (y as usize * self.width as usize + rect.left as usize) * channels;
            staging.extend_from_slice(&target[start..start + row_len]);
        }
        Ok(RectLock {
            target,
            staging,
            rect,
            surface_width: self.width,
            channels,
        })
    }

    /// Fill every pixel with the first `channels` components of `color`
    pub fn clear(&self, color: Vec4) -> Result<()> {
        let channels = self.channels();
        let src = color.to_array();
        let mut data = self.lock()?;
        for px in data.chunks_exact_mut(channels) {
            px.copy_from_slice(&src[..channels]);
        }
        Ok(())
    }

    pub fn clear_rect(&self, color: Vec4, rect: Rect) -> Result<()> {
        let channels = self.channels();
        let src = color.to_array();
        let mut lock = self.lock_rect(rect)?;
        for px in lock.chunks_exact_mut(channels) {
            px.copy_from_slice(&src[..channels]);
        }
        Ok(())
    }

    /// Read one pixel; missing channels read as (0, 0, 0, 1)
    pub fn pixel(&self, x: u32, y: u32) -> Result<Vec4> {
        if x >= self.width || y >= self.height {
            return Err(Error::InvalidParameters("pixel outside surface"));
        }
        let data = self.read()?;
        Ok(fetch_texel(&data, self.width, self.channels(), x, y))
    }

    /// Resample `src_rect` of this surface into `dest_rect` of `dest`.
    /// `None` rectangles mean the whole surface.
    pub fn copy_to_surface(
        &self,
        src_rect: Option<Rect>,
        dest: &Surface,
        dest_rect: Option<Rect>,
        filter: TextureFilter,
    ) -> Result<()> {
        if std::ptr::eq(self, dest) {
            return Err(Error::InvalidParameters("source and destination are the same surface"));
        }
        let src_rect = src_rect.unwrap_or(Rect::new(0, 0, self.width, self.height));
        let dest_rect = dest_rect.unwrap_or(Rect::new(0, 0, dest.width, dest.height));
        if !src_rect.fits(self.width, self.height) || !dest_rect.fits(dest.width, dest.height) {
            return Err(Error::InvalidParameters("copy rectangle outside surface"));
        }

        let src = self.read()?;
        let mut dst = dest.lock()?;
        let src_channels = self.channels();
        let dst_channels = dest.channels();
        let step_x = src_rect.width() as f32 / dest_rect.width() as f32;
        let step_y = src_rect.height() as f32 / dest_rect.height() as f32;

        for dy in 0..dest_rect.height() {
            let sy = src_rect.top as f32 + (dy as f32 + 0.5) * step_y;
            for dx in 0..dest_rect.width() {
                let sx = src_rect.left as f32 + (dx as f32 + 0.5) * step_x;
                let color = match filter {
                    TextureFilter::Point => {
                        let x = (sx as u32).min(src_rect.right - 1);
                        let y = (sy as u32).min(src_rect.bottom - 1);
                        fetch_texel(&src, self.width, src_channels, x, y)
                    }
                    TextureFilter::Linear => {
                        bilinear_in_rect(&src, self.width, src_channels, src_rect, sx, sy)
                    }
                };
                let x = (dest_rect.left + dx) as usize;
                let y = (dest_rect.top + dy) as usize;
                let idx = (y * dest.width as usize + x) * dst_channels;
                dst[idx..idx + dst_channels].copy_from_slice(&color.to_array()[..dst_channels]);
            }
        }
        Ok(())
    }

    /// Build a surface from a decoded image
    pub fn from_image(img: &image::DynamicImage, format: Format) -> Result<Self> {
        let rgba = img.to_rgba32f();
        let surface = Surface::new(rgba.width(), rgba.height(), format)?;
        {
            let channels = format.channels();
            let mut data = surface.lock()?;
            for (dst, src) in data.chunks_exact_mut(channels).zip(rgba.pixels()) {
                dst.copy_from_slice(&src.0[..channels]);
            }
        }
        Ok(surface)
    }

    /// Load a surface from an image file (PNG, JPEG, BMP)
    pub fn load<P: AsRef<Path>>(path: P, format: Format) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| {
            warn!("Failed to load {}: {}", path.display(), e);
            Error::InvalidFormat("image could not be decoded")
        })?;
        let surface = Self::from_image(&img, format)?;
        info!("Loaded surface: {} ({}x{})", path.display(), surface.width, surface.height);
        Ok(surface)
    }

    /// Convert to 8-bit RGBA, saturating each channel
    pub fn to_rgba8(&self) -> Result<image::RgbaImage> {
        let data = self.read()?;
        let channels = self.channels();
        let mut img = image::RgbaImage::new(self.width, self.height);
        for (px, src) in img.pixels_mut().zip(data.chunks_exact(channels)) {
            let c = Vec4::from_slice(src).saturate();
            *px = image::Rgba([
                (c.x * 255.0 + 0.5) as u8,
                (c.y * 255.0 + 0.5) as u8,
                (c.z * 255.0 + 0.5) as u8,
                (c.w * 255.0 + 0.5) as u8,
            ]);
        }
        Ok(img)
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.to_rgba8()?.save(path).map_err(|e| {
            warn!("Failed to save {}: {}", path.display(), e);
            Error::Unknown("png encoding failed")
        })
    }
}

/// Partial lock staging buffer; copied back into the surface on drop
pub struct RectLock<'a> {
    target: RefMut<'a, [f32]>,
    staging: Vec<f32>,
    rect: Rect,
    surface_width: u32,
    channels: usize,
}

impl RectLock<'_> {
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Floats per staging row
    pub fn pitch(&self) -> usize {
        self.rect.width() as usize * self.channels
    }
}

impl std::ops::Deref for RectLock<'_> {
    type Target = [f32];
    fn deref(&self) -> &[f32] {
        &self.staging
    }
}

impl std::ops::DerefMut for RectLock<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.staging
    }
}

impl Drop for RectLock<'_> {
    fn drop(&mut self) {
        let row_len = self.pitch();
        for (row, y) in (self.rect.top..self.rect.bottom).enumerate() {
            let start = (y as usize * self.surface_width as usize + self.rect.left as usize) * self.channels;
            self.target[start..start + row_len]
                .copy_from_slice(&self.staging[row * row_len..(row + 1) * row_len]);
        }
    }
}

/// Read texel (x, y) of a row-major float array
#[inline]
pub(crate) fn fetch_texel(data: &[f32], width: u32, channels: usize, x: u32, y: u32) -> Vec4 {
    let idx = (y as usize * width as usize + x as usize) * channels;
    Vec4::from_slice(&data[idx..idx + channels])
}

/// Bilinear sample at continuous texel position (sx, sy), clamped to `rect`
fn bilinear_in_rect(data: &[f32], width: u32, channels: usize, rect: Rect, sx: f32, sy: f32) -> Vec4 {
    let fx = sx - 0.5;
    let fy = sy - 0.5;
    let x0f = fx.floor();
    let y0f = fy.floor();
    let tx = fx - x0f;
    let ty = fy - y0f;
    let clamp_x = |x: i64| x.clamp(rect.left as i64, rect.right as i64 - 1) as u32;
    let clamp_y = |y: i64| y.clamp(rect.top as i64, rect.bottom as i64 - 1) as u32;
    let (x0, x1) = (clamp_x(x0f as i64), clamp_x(x0f as i64 + 1));
    let (y0, y1) = (clamp_y(y0f as i64), clamp_y(y0f as i64 + 1));
    let top = fetch_texel(data, width, channels, x0, y0).lerp(fetch_texel(data, width, channels, x1, y0), tx);
    let bottom = fetch_texel(data, width, channels, x0, y1).lerp(fetch_texel(data, width, channels, x1, y1), tx);
    top.lerp(bottom, ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(Surface::new(0, 4, Format::R32F), Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_clear_and_read_pixel() {
        let s = Surface::new(4, 4, Format::R32G32B32F).unwrap();
        s.clear(Vec4::new(0.25, 0.5, 0.75, 0.1)).unwrap();
        let p = s.pixel(3, 3).unwrap();
        assert_eq!(p, Vec4::new(0.25, 0.5, 0.75, 1.0));
    }

    #[test]
    fn test_double_lock_is_invalid_state() {
        let s = Surface::new(2, 2, Format::R32F).unwrap();
        let _guard = s.lock().unwrap();
        assert!(matches!(s.lock(), Err(Error::InvalidState(_))));
        assert!(s.is_locked());
    }

    #[test]
    fn test_rect_lock_writes_back_on_drop() {
        let s = Surface::new(4, 4, Format::R32F).unwrap();
        {
            let mut lock = s.lock_rect(Rect::new(1, 1, 3, 3)).unwrap();
            assert_eq!(lock.len(), 4);
            lock.fill(7.0);
        }
        assert_eq!(s.pixel(1, 1).unwrap().x, 7.0);
        assert_eq!(s.pixel(2, 2).unwrap().x, 7.0);
        assert_eq!(s.pixel(0, 0).unwrap().x, 0.0);
        assert_eq!(s.pixel(3, 2).unwrap().x, 0.0);
    }

    #[test]
    fn test_copy_downsamples() {
        let src = Surface::new(4, 4, Format::R32F).unwrap();
        src.clear(Vec4::splat(1.0)).unwrap();
        let dst = Surface::new(2, 2, Format::R32G32B32A32F).unwrap();
        src.copy_to_surface(None, &dst, None, TextureFilter::Linear).unwrap();
        let p = dst.pixel(1, 1).unwrap();
        assert!((p.x - 1.0).abs() < 1e-6);
        assert!(src.copy_to_surface(None, &src, None, TextureFilter::Point).is_err());
    }
}
