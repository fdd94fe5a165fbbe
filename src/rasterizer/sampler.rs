//! Texture sampling: addressing, mip selection, point/linear filtering and
//! cube face resolution.

use std::cell::Ref;

use super::error::{Error, Result};
use super::math::{Vec3, Vec4};
use super::surface::fetch_texel;
use super::texture::{CubeFace, TextureResource};
use super::types::{AddressMode, MipFilter, SamplerStates, TextureFilter};

/// Read access to one mip level for the duration of a draw
pub(crate) struct LevelView<'a> {
    pub data: Ref<'a, [f32]>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub channels: usize,
}

/// Read access to a whole mip chain
pub(crate) struct TextureView<'a> {
    pub levels: Vec<LevelView<'a>>,
    /// Squared base dimensions (width, height, depth)
    pub sq_dims: [f32; 3],
}

pub(crate) enum BoundTexture<'a> {
    Texture(TextureView<'a>),
    Volume(TextureView<'a>),
    Cube(Box<[TextureView<'a>; 6]>),
}

impl<'a> BoundTexture<'a> {
    fn acquire(resource: &'a TextureResource) -> Result<Self> {
        Ok(match resource {
            TextureResource::Texture(t) => BoundTexture::Texture(t.view()?),
            TextureResource::Volume(v) => BoundTexture::Volume(v.view()?),
            TextureResource::Cube(c) => BoundTexture::Cube(Box::new(c.views()?)),
        })
    }

    fn sample(&self, states: &SamplerStates, coords: Vec4, gradients: Option<(Vec4, Vec4)>) -> Vec4 {
        match self {
            BoundTexture::Texture(view) => {
                let c = [address(coords.x, states.address_u), address(coords.y, states.address_v), 0.0];
                view.sample(states, c, 2, gradients)
            }
            BoundTexture::Volume(view) => {
                let c = [
                    address(coords.x, states.address_u),
                    address(coords.y, states.address_v),
                    address(coords.z, states.address_w),
                ];
                view.sample(states, c, 3, gradients)
            }
            BoundTexture::Cube(faces) => {
                let (face, u, v) = resolve_cube_face(coords.xyz());
                let face_gradients = gradients.map(|(gx, gy)| {
                    (
                        cube_face_gradient(face, coords.xyz(), gx.xyz()),
                        cube_face_gradient(face, coords.xyz(), gy.xyz()),
                    )
                });
                let c = [u.clamp(0.0, 1.0), v.clamp(0.0, 1.0), 0.0];
                faces[face.index()].sample(states, c, 2, face_gradients)
            }
        }
    }
}

/// Samplers as seen by a pixel shader: every bound texture, read-locked
pub struct TextureSampler<'a> {
    units: Vec<Option<BoundTexture<'a>>>,
    states: &'a [SamplerStates],
}

impl<'a> TextureSampler<'a> {
    pub(crate) fn bind(textures: &'a [Option<TextureResource>], states: &'a [SamplerStates]) -> Result<Self> {
        let units = textures.iter()
            .map(|t| t.as_ref().map(BoundTexture::acquire).transpose())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { units, states })
    }

    /// Sample texture unit `unit`. `coords` uses xy (2D), xyz (volume) or
    /// xyz as a direction (cube). `gradients` are the screen-space
    /// derivatives (d/dx, d/dy) of `coords`; without them level 0 is
    /// sampled with the magnification filter.
    pub fn sample(&self, unit: usize, coords: Vec4, gradients: Option<(Vec4, Vec4)>) -> Result<Vec4> {
        let texture = self.units.get(unit)
            .ok_or(Error::InvalidParameters("sampler unit out of range"))?
            .as_ref()
            .ok_or(Error::InvalidState("no texture bound to sampler unit"))?;
        Ok(texture.sample(&self.states[unit], coords, gradients))
    }
}

/// Sample a texture outside of a draw call
pub fn sample_texture(
    resource: &TextureResource,
    states: &SamplerStates,
    coords: Vec4,
    gradients: Option<(Vec4, Vec4)>,
) -> Result<Vec4> {
    Ok(BoundTexture::acquire(resource)?.sample(states, coords, gradients))
}

/// Apply an address mode to one normalized coordinate
#[inline]
pub fn address(c: f32, mode: AddressMode) -> f32 {
    match mode {
        AddressMode::Wrap => c - c.floor(),
        AddressMode::Clamp => c.clamp(0.0, 1.0),
    }
}

#[inline]
fn texel_index(i: i32, size: u32, mode: AddressMode) -> u32 {
    match mode {
        AddressMode::Wrap => i.rem_euclid(size as i32) as u32,
        AddressMode::Clamp => i.clamp(0, size as i32 - 1) as u32,
    }
}

/// Continuous mip level for the given coordinate gradients, before bias and
/// clamping. `None` when the footprint is at most one texel per pixel
/// (magnification).
pub fn mip_level(sq_dims: [f32; 3], dims: usize, grad_x: Vec4, grad_y: Vec4) -> Option<f32> {
    let footprint = |g: Vec4| {
        let mut len = g.x * g.x * sq_dims[0] + g.y * g.y * sq_dims[1];
        if dims == 3 {
            len += g.z * g.z * sq_dims[2];
        }
        len
    };
    let max_sq = footprint(grad_x).max(footprint(grad_y));
    if max_sq <= 1.0 {
        None
    } else {
        Some(0.5 * max_sq.log2())
    }
}

impl LevelView<'_> {
    fn fetch(&self, x: u32, y: u32, z: u32) -> Vec4 {
        fetch_texel(&self.data, self.width, self.channels, x, y + z * self.height)
    }

    fn sample_point(&self, c: [f32; 3], dims: usize) -> Vec4 {
        let x = ((c[0] * self.width as f32) as u32).min(self.width - 1);
        let y = ((c[1] * self.height as f32) as u32).min(self.height - 1);
        let z = if dims == 3 {
            ((c[2] * self.depth as f32) as u32).min(self.depth - 1)
        } else {
            0
        };
        self.fetch(x, y, z)
    }

    fn sample_linear(&self, c: [f32; 3], dims: usize, states: &SamplerStates) -> Vec4 {
        let fx = c[0] * self.width as f32 - 0.5;
        let fy = c[1] * self.height as f32 - 0.5;
        let (x0f, y0f) = (fx.floor(), fy.floor());
        let (tx, ty) = (fx - x0f, fy - y0f);
        let x0 = texel_index(x0f as i32, self.width, states.address_u);
        let x1 = texel_index(x0f as i32 + 1, self.width, states.address_u);
        let y0 = texel_index(y0f as i32, self.height, states.address_v);
        let y1 = texel_index(y0f as i32 + 1, self.height, states.address_v);

        let bilinear = |z: u32| {
            let top = self.fetch(x0, y0, z).lerp(self.fetch(x1, y0, z), tx);
            let bottom = self.fetch(x0, y1, z).lerp(self.fetch(x1, y1, z), tx);
            top.lerp(bottom, ty)
        };

        if dims < 3 {
            return bilinear(0);
        }
        let fz = c[2] * self.depth as f32 - 0.5;
        let z0f = fz.floor();
        let z0 = texel_index(z0f as i32, self.depth, states.address_w);
        let z1 = texel_index(z0f as i32 + 1, self.depth, states.address_w);
        bilinear(z0).lerp(bilinear(z1), fz - z0f)
    }

    fn sample(&self, c: [f32; 3], dims: usize, filter: TextureFilter, states: &SamplerStates) -> Vec4 {
        match filter {
            TextureFilter::Point => self.sample_point(c, dims),
            TextureFilter::Linear => self.sample_linear(c, dims, states),
        }
    }
}

impl TextureView<'_> {
    fn sample(&self, states: &SamplerStates, c: [f32; 3], dims: usize, gradients: Option<(Vec4, Vec4)>) -> Vec4 {
        let lod = gradients.and_then(|(gx, gy)| mip_level(self.sq_dims, dims, gx, gy));
        let Some(lod) = lod else {
            return self.levels[0].sample(c, dims, states.mag_filter, states);
        };

        let max_level = states.max_mip_level.min((self.levels.len() - 1) as f32).max(0.0);
        let lod = (lod + states.mip_lod_bias).clamp(0.0, max_level);

        match states.mip_filter {
            MipFilter::None => self.levels[0].sample(c, dims, states.min_filter, states),
            MipFilter::Point => {
                let level = ((lod + 0.5) as usize).min(self.levels.len() - 1);
                self.levels[level].sample(c, dims, states.min_filter, states)
            }
            MipFilter::Linear => {
                let l0 = lod as usize;
                let l1 = (l0 + 1).min(max_level as usize);
                let a = self.levels[l0].sample(c, dims, states.min_filter, states);
                if l1 == l0 {
                    return a;
                }
                let b = self.levels[l1].sample(c, dims, states.min_filter, states);
                a.lerp(b, lod - l0 as f32)
            }
        }
    }
}

/// (axis, sign) triples per face: s coordinate, t coordinate, major axis
const CUBE_FACE_TABLE: [[(usize, f32); 3]; 6] = [
    [(2, -1.0), (1, -1.0), (0, 1.0)],  // +X
    [(2, 1.0), (1, -1.0), (0, -1.0)],  // -X
    [(0, 1.0), (2, 1.0), (1, 1.0)],    // +Y
    [(0, 1.0), (2, -1.0), (1, -1.0)],  // -Y
    [(0, 1.0), (1, -1.0), (2, 1.0)],   // +Z
    [(0, -1.0), (1, -1.0), (2, -1.0)], // -Z
];

fn component(v: Vec3, axis: usize) -> f32 {
    match axis {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

/// Pick the cube face of the dominant axis and project the direction onto
/// it. Returned (u, v) lie in [0, 1].
pub fn resolve_cube_face(dir: Vec3) -> (CubeFace, f32, f32) {
    let (ax, ay, az) = (dir.x.abs(), dir.y.abs(), dir.z.abs());
    let face = if ax >= ay && ax >= az {
        if dir.x >= 0.0 { CubeFace::PositiveX } else { CubeFace::NegativeX }
    } else if ay >= az {
        if dir.y >= 0.0 { CubeFace::PositiveY } else { CubeFace::NegativeY }
    } else if dir.z >= 0.0 {
        CubeFace::PositiveZ
    } else {
        CubeFace::NegativeZ
    };

    let [(s_axis, s_sign), (t_axis, t_sign), (m_axis, _)] = CUBE_FACE_TABLE[face.index()];
    let ma = component(dir, m_axis).abs();
    if ma == 0.0 {
        return (face, 0.5, 0.5);
    }
    let sc = component(dir, s_axis) * s_sign;
    let tc = component(dir, t_axis) * t_sign;
    (face, (sc / ma + 1.0) * 0.5, (tc / ma + 1.0) * 0.5)
}

/// Derivative of the in-face (u, v) along `d_dir` (quotient rule on sc/ma)
fn cube_face_gradient(face: CubeFace, dir: Vec3, d_dir: Vec3) -> Vec4 {
    let [(s_axis, s_sign), (t_axis, t_sign), (m_axis, m_sign)] = CUBE_FACE_TABLE[face.index()];
    let ma = component(dir, m_axis) * m_sign;
    if ma == 0.0 {
        return Vec4::ZERO;
    }
    let dma = component(d_dir, m_axis) * m_sign;
    let sc = component(dir, s_axis) * s_sign;
    let tc = component(dir, t_axis) * t_sign;
    let dsc = component(d_dir, s_axis) * s_sign;
    let dtc = component(d_dir, t_axis) * t_sign;
    let inv = 0.5 / (ma * ma);
    Vec4::new((dsc * ma - sc * dma) * inv, (dtc * ma - tc * dma) * inv, 0.0, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use crate::rasterizer::texture::{CubeTexture, Texture};
    use crate::rasterizer::types::Format;

    fn gradient_texture() -> Rc<Texture> {
        // 4x4 base, each level filled with its own index
        let t = Texture::new(4, 4, 0, Format::R32F).unwrap();
        for level in 0..t.mip_levels() {
            t.level(level).unwrap().clear(Vec4::splat(level as f32)).unwrap();
        }
        Rc::new(t)
    }

    #[test]
    fn test_one_texel_per_pixel_is_magnification() {
        let sq = [64.0 * 64.0, 64.0 * 64.0, 1.0];
        let g = Vec4::new(1.0 / 64.0, 0.0, 0.0, 0.0);
        assert_eq!(mip_level(sq, 2, g, Vec4::ZERO), None);
    }

    #[test]
    fn test_four_texels_per_pixel_selects_level_two() {
        let sq = [64.0 * 64.0, 64.0 * 64.0, 1.0];
        let g = Vec4::new(4.0 / 64.0, 0.0, 0.0, 0.0);
        let lod = mip_level(sq, 2, g, Vec4::new(0.0, 1.0 / 64.0, 0.0, 0.0)).unwrap();
        assert!((lod - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_mip_point_and_linear_selection() {
        let tex = TextureResource::Texture(gradient_texture());
        let mut states = SamplerStates { mip_filter: MipFilter::Point, ..Default::default() };
        // 2 texels per pixel on a 4x4 base -> level 1
        let g = Vec4::new(0.5, 0.0, 0.0, 0.0);
        let c = sample_texture(&tex, &states, Vec4::new(0.3, 0.3, 0.0, 0.0), Some((g, Vec4::ZERO))).unwrap();
        assert!((c.x - 1.0).abs() < 1e-6);

        // ~2.83 texels per pixel -> lod 1.5, linear blend of levels 1 and 2
        states.mip_filter = MipFilter::Linear;
        let g = Vec4::new(2.0f32.powf(1.5) / 4.0, 0.0, 0.0, 0.0);
        let c = sample_texture(&tex, &states, Vec4::new(0.3, 0.3, 0.0, 0.0), Some((g, Vec4::ZERO))).unwrap();
        assert!((c.x - 1.5).abs() < 1e-3);

        // max mip level clamps
        states.max_mip_level = 1.0;
        let g = Vec4::new(4.0, 0.0, 0.0, 0.0);
        let c = sample_texture(&tex, &states, Vec4::new(0.3, 0.3, 0.0, 0.0), Some((g, Vec4::ZERO))).unwrap();
        assert!((c.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_address_modes() {
        assert!((address(1.25, AddressMode::Wrap) - 0.25).abs() < 1e-6);
        assert!((address(-0.25, AddressMode::Wrap) - 0.75).abs() < 1e-6);
        assert_eq!(address(1.25, AddressMode::Clamp), 1.0);
        assert_eq!(address(-0.5, AddressMode::Clamp), 0.0);
    }

    #[test]
    fn test_bilinear_blends_neighbours() {
        let t = Texture::new(2, 1, 1, Format::R32F).unwrap();
        t.level(0).unwrap().lock().unwrap().copy_from_slice(&[0.0, 1.0]);
        let tex = TextureResource::Texture(Rc::new(t));
        let states = SamplerStates {
            mag_filter: TextureFilter::Linear,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            ..Default::default()
        };
        let c = sample_texture(&tex, &states, Vec4::new(0.5, 0.5, 0.0, 0.0), None).unwrap();
        assert!((c.x - 0.5).abs() < 1e-6);
        let c = sample_texture(&tex, &states, Vec4::new(0.0, 0.5, 0.0, 0.0), None).unwrap();
        assert!(c.x.abs() < 1e-6);
    }

    #[test]
    fn test_cube_face_resolution() {
        let (face, u, v) = resolve_cube_face(Vec3::new(1.0, 0.2, 0.1));
        assert_eq!(face, CubeFace::PositiveX);
        assert!((0.0..=1.0).contains(&u) && (0.0..=1.0).contains(&v));
        assert!((u - 0.45).abs() < 1e-6 && (v - 0.4).abs() < 1e-6);

        let (face, u, v) = resolve_cube_face(Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(face, CubeFace::NegativeY);
        assert!((u - 0.5).abs() < 1e-6 && (v - 0.5).abs() < 1e-6);

        let (face, _, _) = resolve_cube_face(Vec3::new(0.1, 0.2, -0.9));
        assert_eq!(face, CubeFace::NegativeZ);
    }

    #[test]
    fn test_cube_sampling_reads_resolved_face() {
        let cube = CubeTexture::new(2, 1, Format::R32F).unwrap();
        for face in CubeFace::ALL {
            cube.face(face).clear(Vec4::splat(face.index() as f32)).unwrap();
        }
        let tex = TextureResource::Cube(Rc::new(cube));
        let c = sample_texture(&tex, &SamplerStates::default(), Vec4::new(0.0, -1.0, 0.0, 0.0), None).unwrap();
        assert_eq!(c.x, CubeFace::NegativeY.index() as f32);
    }

    #[test]
    fn test_locked_texture_cannot_be_sampled() {
        let t = gradient_texture();
        let level = t.level(0).unwrap();
        let _lock = level.lock().unwrap();
        let tex = TextureResource::Texture(t.clone());
        assert!(matches!(
            sample_texture(&tex, &SamplerStates::default(), Vec4::ZERO, None),
            Err(Error::InvalidState(_))
        ));
    }
}
