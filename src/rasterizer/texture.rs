//! Mip-mapped textures: 2D, cube and volume
//!
//! Textures own their mip chains as shared surfaces so a single level can
//! also be bound as a render target.

use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;
use std::rc::Rc;

use log::info;

use super::error::{Error, Result};
use super::math::Vec4;
use super::sampler::{LevelView, TextureView};
use super::surface::{fetch_texel, Surface};
use super::types::{Format, TextureFilter};

/// Number of levels in a full mip chain for the largest dimension
pub fn full_mip_chain(largest: u32) -> u32 {
    32 - largest.max(1).leading_zeros()
}

fn level_dim(base: u32, level: u32) -> u32 {
    (base >> level).max(1)
}

fn resolve_mip_levels(requested: u32, largest: u32) -> Result<u32> {
    let full = full_mip_chain(largest);
    match requested {
        0 => Ok(full),
        n if n <= full => Ok(n),
        _ => Err(Error::InvalidParameters("more mip levels than the dimensions allow")),
    }
}

/// 2D texture with a mip chain
#[derive(Debug)]
pub struct Texture {
    levels: Vec<Rc<Surface>>,
    format: Format,
    /// Squared base dimensions, used for mip level selection
    sq_width: f32,
    sq_height: f32,
}

impl Texture {
    /// `mip_levels == 0` creates the full chain down to 1x1
    pub fn new(width: u32, height: u32, mip_levels: u32, format: Format) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameters("texture dimensions must be non-zero"));
        }
        let count = resolve_mip_levels(mip_levels, width.max(height))?;
        let levels = (0..count)
            .map(|i| Surface::new(level_dim(width, i), level_dim(height, i), format).map(Rc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            levels,
            format,
            sq_width: (width as f32) * (width as f32),
            sq_height: (height as f32) * (height as f32),
        })
    }

    /// Load level 0 from an image file and build the rest of the chain
    pub fn load<P: AsRef<Path>>(path: P, mip_levels: u32, format: Format) -> Result<Self> {
        let image = Surface::load(path, format)?;
        let texture = Self::new(image.width(), image.height(), mip_levels, format)?;
        image.copy_to_surface(None, &texture.levels[0], None, TextureFilter::Point)?;
        texture.generate_mip_sub_levels(0)?;
        Ok(texture)
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn width(&self) -> u32 {
        self.levels[0].width()
    }

    pub fn height(&self) -> u32 {
        self.levels[0].height()
    }

    pub fn squared_dimensions(&self) -> (f32, f32) {
        (self.sq_width, self.sq_height)
    }

    pub fn level(&self, level: u32) -> Option<Rc<Surface>> {
        self.levels.get(level as usize).cloned()
    }

    pub fn clear(&self, color: Vec4) -> Result<()> {
        self.levels.iter().try_for_each(|l| l.clear(color))
    }

    /// Rebuild every level below `src_level` by 2x2 box filtering
    pub fn generate_mip_sub_levels(&self, src_level: u32) -> Result<()> {
        let src = src_level as usize;
        if src >= self.levels.len() {
            return Err(Error::InvalidParameters("source mip level out of range"));
        }
        for pair in self.levels[src..].windows(2) {
            pair[0].copy_to_surface(None, &pair[1], None, TextureFilter::Linear)?;
        }
        Ok(())
    }

    pub(crate) fn view(&self) -> Result<TextureView<'_>> {
        let levels = self.levels.iter()
            .map(|s| {
                Ok(LevelView {
                    data: s.read().map_err(|_| Error::InvalidState("bound texture is locked"))?,
                    width: s.width(),
                    height: s.height(),
                    depth: 1,
                    channels: s.channels(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TextureView {
            levels,
            sq_dims: [self.sq_width, self.sq_height, 1.0],
        })
    }
}

/// Cube map faces, in storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Six square textures sharing format and mip count
#[derive(Debug)]
pub struct CubeTexture {
    faces: [Texture; 6],
}

impl CubeTexture {
    pub fn new(edge_length: u32, mip_levels: u32, format: Format) -> Result<Self> {
        let faces = [
            Texture::new(edge_length, edge_length, mip_levels, format)?,
            Texture::new(edge_length, edge_length, mip_levels, format)?,
            Texture::new(edge_length, edge_length, mip_levels, format)?,
            Texture::new(edge_length, edge_length, mip_levels, format)?,
            Texture::new(edge_length, edge_length, mip_levels, format)?,
            Texture::new(edge_length, edge_length, mip_levels, format)?,
        ];
        Ok(Self { faces })
    }

    pub fn face(&self, face: CubeFace) -> &Texture {
        &self.faces[face.index()]
    }

    pub fn format(&self) -> Format {
        self.faces[0].format()
    }

    pub fn mip_levels(&self) -> u32 {
        self.faces[0].mip_levels()
    }

    pub fn edge_length(&self) -> u32 {
        self.faces[0].width()
    }

    pub fn generate_mip_sub_levels(&self, src_level: u32) -> Result<()> {
        self.faces.iter().try_for_each(|f| f.generate_mip_sub_levels(src_level))
    }

    pub(crate) fn views(&self) -> Result<[TextureView<'_>; 6]> {
        Ok([
            self.faces[0].view()?,
            self.faces[1].view()?,
            self.faces[2].view()?,
            self.faces[3].view()?,
            self.faces[4].view()?,
            self.faces[5].view()?,
        ])
    }
}

/// Float backed 3D image storage
pub struct Volume {
    width: u32,
    height: u32,
    depth: u32,
    format: Format,
    data: RefCell<Vec<f32>>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("format", &self.format)
            .finish()
    }
}

impl Volume {
    pub fn new(width: u32, height: u32, depth: u32, format: Format) -> Result<Self> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::InvalidParameters("volume dimensions must be non-zero"));
        }
        let len = width as usize * height as usize * depth as usize * format.channels();
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory("volume storage"))?;
        data.resize(len, 0.0);
        Ok(Self { width, height, depth, format, data: RefCell::new(data) })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Lock for writing; slices are stored one after another, rows within a slice
    pub fn lock(&self) -> Result<RefMut<'_, [f32]>> {
        let data = self.data.try_borrow_mut()
            .map_err(|_| Error::InvalidState("volume is already locked"))?;
        Ok(RefMut::map(data, |v| v.as_mut_slice()))
    }

    pub fn read(&self) -> Result<Ref<'_, [f32]>> {
        let data = self.data.try_borrow()
            .map_err(|_| Error::InvalidState("volume is locked for writing"))?;
        Ok(Ref::map(data, |v| v.as_slice()))
    }

    pub fn clear(&self, color: Vec4) -> Result<()> {
        let channels = self.channels();
        let src = color.to_array();
        let mut data = self.lock()?;
        for px in data.chunks_exact_mut(channels) {
            px.copy_from_slice(&src[..channels]);
        }
        Ok(())
    }

    pub fn voxel(&self, x: u32, y: u32, z: u32) -> Result<Vec4> {
        if x >= self.width || y >= self.height || z >= self.depth {
            return Err(Error::InvalidParameters("voxel outside volume"));
        }
        let data = self.read()?;
        Ok(fetch_texel(&data, self.width, self.channels(), x, y + z * self.height))
    }

    /// 2x2x2 box filter into a volume of half the size
    fn downsample_into(&self, dest: &Volume) -> Result<()> {
        let src = self.read()?;
        let mut dst = dest.lock()?;
        let channels = self.channels();
        let sample = |x: u32, y: u32, z: u32| {
            let x = x.min(self.width - 1);
            let y = y.min(self.height - 1);
            let z = z.min(self.depth - 1);
            fetch_texel(&src, self.width, channels, x, y + z * self.height)
        };
        for z in 0..dest.depth {
            for y in 0..dest.height {
                for x in 0..dest.width {
                    let mut sum = Vec4::ZERO;
                    for (ox, oy, oz) in [(0, 0, 0), (1, 0, 0), (0, 1, 0), (1, 1, 0), (0, 0, 1), (1, 0, 1), (0, 1, 1), (1, 1, 1)] {
                        sum += sample(x * 2 + ox, y * 2 + oy, z * 2 + oz);
                    }
                    let idx = ((z * dest.height + y) as usize * dest.width as usize + x as usize) * channels;
                    dst[idx..idx + channels].copy_from_slice(&(sum * 0.125).to_array()[..channels]);
                }
            }
        }
        Ok(())
    }
}

/// 3D texture with a mip chain
#[derive(Debug)]
pub struct VolumeTexture {
    levels: Vec<Rc<Volume>>,
    format: Format,
    sq_dims: [f32; 3],
}

impl VolumeTexture {
    pub fn new(width: u32, height: u32, depth: u32, mip_levels: u32, format: Format) -> Result<Self> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::InvalidParameters("volume texture dimensions must be non-zero"));
        }
        let count = resolve_mip_levels(mip_levels, width.max(height).max(depth))?;
        let levels = (0..count)
            .map(|i| {
                Volume::new(level_dim(width, i), level_dim(height, i), level_dim(depth, i), format)
                    .map(Rc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        let sq = |d: u32| (d as f32) * (d as f32);
        Ok(Self { levels, format, sq_dims: [sq(width), sq(height), sq(depth)] })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level(&self, level: u32) -> Option<Rc<Volume>> {
        self.levels.get(level as usize).cloned()
    }

    pub fn generate_mip_sub_levels(&self, src_level: u32) -> Result<()> {
        let src = src_level as usize;
        if src >= self.levels.len() {
            return Err(Error::InvalidParameters("source mip level out of range"));
        }
        for pair in self.levels[src..].windows(2) {
            pair[0].downsample_into(&pair[1])?;
        }
        Ok(())
    }

    pub(crate) fn view(&self) -> Result<TextureView<'_>> {
        let levels = self.levels.iter()
            .map(|v| {
                Ok(LevelView {
                    data: v.read().map_err(|_| Error::InvalidState("bound texture is locked"))?,
                    width: v.width,
                    height: v.height,
                    depth: v.depth,
                    channels: v.channels(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TextureView { levels, sq_dims: self.sq_dims })
    }
}

/// Anything that can be bound to a sampler unit
#[derive(Debug, Clone)]
pub enum TextureResource {
    Texture(Rc<Texture>),
    Cube(Rc<CubeTexture>),
    Volume(Rc<VolumeTexture>),
}

impl From<Rc<Texture>> for TextureResource {
    fn from(t: Rc<Texture>) -> Self {
        TextureResource::Texture(t)
    }
}

impl From<Rc<CubeTexture>> for TextureResource {
    fn from(t: Rc<CubeTexture>) -> Self {
        TextureResource::Cube(t)
    }
}

impl From<Rc<VolumeTexture>> for TextureResource {
    fn from(t: Rc<VolumeTexture>) -> Self {
        TextureResource::Volume(t)
    }
}

/// Log a one-line summary of a freshly created texture
pub fn describe(resource: &TextureResource) {
    match resource {
        TextureResource::Texture(t) => {
            info!("Texture {}x{} {:?}, {} levels", t.width(), t.height(), t.format(), t.mip_levels())
        }
        TextureResource::Cube(c) => {
            info!("Cube texture {} {:?}, {} levels", c.edge_length(), c.format(), c.mip_levels())
        }
        TextureResource::Volume(v) => info!("Volume texture {:?}, {} levels", v.format(), v.mip_levels()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_chain_length() {
        assert_eq!(full_mip_chain(1), 1);
        assert_eq!(full_mip_chain(8), 4);
        assert_eq!(full_mip_chain(10), 4);
        let t = Texture::new(8, 4, 0, Format::R32F).unwrap();
        assert_eq!(t.mip_levels(), 4);
        assert_eq!(t.level(3).unwrap().width(), 1);
        assert_eq!(t.level(3).unwrap().height(), 1);
        assert_eq!(t.squared_dimensions(), (64.0, 16.0));
    }

    #[test]
    fn test_too_many_levels_rejected() {
        assert!(matches!(Texture::new(4, 4, 4, Format::R32F), Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_generate_mips_box_filters() {
        let t = Texture::new(2, 2, 0, Format::R32F).unwrap();
        {
            let base = t.level(0).unwrap();
            let mut data = base.lock().unwrap();
            data.copy_from_slice(&[0.0, 1.0, 1.0, 0.0]);
        }
        t.generate_mip_sub_levels(0).unwrap();
        let top = t.level(1).unwrap().pixel(0, 0).unwrap();
        assert!((top.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_volume_mips() {
        let v = VolumeTexture::new(2, 2, 2, 0, Format::R32F).unwrap();
        assert_eq!(v.mip_levels(), 2);
        {
            let base = v.level(0).unwrap();
            let mut data = base.lock().unwrap();
            data.copy_from_slice(&[1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        }
        v.generate_mip_sub_levels(0).unwrap();
        let top = v.level(1).unwrap().voxel(0, 0, 0).unwrap();
        assert!((top.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cube_faces_share_layout() {
        let c = CubeTexture::new(4, 0, Format::R32G32B32F).unwrap();
        for face in CubeFace::ALL {
            assert_eq!(c.face(face).width(), 4);
            assert_eq!(c.face(face).mip_levels(), 3);
        }
    }
}
