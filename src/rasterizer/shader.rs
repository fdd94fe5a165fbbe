//! Shader contracts and the register model
//!
//! Shaders are plain Rust trait objects. The pipeline hands them fixed-size
//! register arrays; which output registers are live (and how many
//! components they carry) is declared by the vertex shader.

use super::math::{ShaderRegister, Vec4};
use super::raster::TriangleGradients;
use super::sampler::TextureSampler;
use super::error::Result;
use super::types::{MAX_VS_INPUTS, MAX_VS_OUTPUTS};

/// Output registers of the vertex stage (= inputs of the pixel stage)
pub type Registers = [ShaderRegister; MAX_VS_OUTPUTS];

/// Width of a vertex shader output register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterType {
    #[default]
    Unused,
    Float,
    Vec2,
    Vec3,
    Vec4,
}

impl RegisterType {
    pub fn components(self) -> usize {
        match self {
            RegisterType::Unused => 0,
            RegisterType::Float => 1,
            RegisterType::Vec2 => 2,
            RegisterType::Vec3 => 3,
            RegisterType::Vec4 => 4,
        }
    }
}

/// Vertex shader input registers, filled by stream decoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VsInput {
    pub registers: [ShaderRegister; MAX_VS_INPUTS],
}

impl Default for VsInput {
    fn default() -> Self {
        Self { registers: [Vec4::ZERO; MAX_VS_INPUTS] }
    }
}

impl VsInput {
    pub fn lerp(&self, other: &VsInput, t: f32) -> VsInput {
        let mut out = *self;
        for (o, b) in out.registers.iter_mut().zip(other.registers.iter()) {
            *o = o.lerp(*b, t);
        }
        out
    }

    pub fn average3(a: &VsInput, b: &VsInput, c: &VsInput) -> VsInput {
        let mut out = VsInput::default();
        for i in 0..MAX_VS_INPUTS {
            out.registers[i] = (a.registers[i] + b.registers[i] + c.registers[i]) * (1.0 / 3.0);
        }
        out
    }
}

/// A shaded vertex: clip-space position, output registers and the input it
/// was produced from (subdivision re-runs the vertex shader on interpolated
/// inputs).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VsOutput {
    pub position: Vec4,
    pub registers: Registers,
    pub input: VsInput,
}

impl Default for VsOutput {
    fn default() -> Self {
        Self {
            position: Vec4::ZERO,
            registers: [Vec4::ZERO; MAX_VS_OUTPUTS],
            input: VsInput::default(),
        }
    }
}

/// Active output registers of the current vertex shader, resolved once per draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterLayout {
    pub types: [RegisterType; MAX_VS_OUTPUTS],
}

impl RegisterLayout {
    pub fn from_shader(shader: &dyn VertexShader) -> Self {
        let mut types = [RegisterType::Unused; MAX_VS_OUTPUTS];
        for (i, t) in types.iter_mut().enumerate() {
            *t = shader.output_register_type(i);
        }
        Self { types }
    }

    /// (register, component count) of every live register
    pub fn active(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.types.iter()
            .enumerate()
            .filter(|(_, t)| **t != RegisterType::Unused)
            .map(|(i, t)| (i, t.components()))
    }

    /// a + (b - a) * t over the live components only
    pub fn lerp(&self, a: &Registers, b: &Registers, t: f32) -> Registers {
        let mut out = [Vec4::ZERO; MAX_VS_OUTPUTS];
        for (i, n) in self.active() {
            for c in 0..n {
                out[i][c] = a[i][c] + (b[i][c] - a[i][c]) * t;
            }
        }
        out
    }

    /// Multiply the live components by `s`
    pub fn scale(&self, regs: &mut Registers, s: f32) {
        for (i, n) in self.active() {
            for c in 0..n {
                regs[i][c] *= s;
            }
        }
    }
}

/// Vertex stage: transforms one vertex
pub trait VertexShader {
    /// Write the clip-space position and the output registers
    fn execute(&self, input: &VsInput, position: &mut Vec4, output: &mut Registers);

    fn output_register_type(&self, register: usize) -> RegisterType;
}

/// Optional stage run on every leaf triangle after subdivision; returning
/// false discards that triangle
pub trait TriangleShader {
    fn execute(&self, r0: &mut Registers, r1: &mut Registers, r2: &mut Registers) -> bool;
}

/// What a pixel shader writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelShaderOutput {
    ColorOnly,
    ColorAndDepth,
}

/// Pixel stage
pub trait PixelShader {
    /// Shade one pixel. `depth` holds the interpolated depth on entry; it is
    /// only read back for `ColorAndDepth` shaders. Returning false kills the
    /// pixel.
    fn execute(&self, ctx: &PixelContext<'_, '_>, input: &Registers, color: &mut Vec4, depth: &mut f32) -> bool;

    fn output_kind(&self) -> PixelShaderOutput {
        PixelShaderOutput::ColorOnly
    }

    fn might_kill_pixels(&self) -> bool {
        true
    }
}

/// Per-pixel view of the pipeline handed to pixel shaders
pub struct PixelContext<'a, 's> {
    pub x: u32,
    pub y: u32,
    pub(crate) sampler: &'a TextureSampler<'s>,
    pub(crate) gradients: &'a TriangleGradients,
    /// Registers premultiplied by 1/w at this pixel
    pub(crate) projected: &'a Registers,
    pub(crate) inv_w: f32,
}

impl PixelContext<'_, '_> {
    /// Sample a bound texture (see `TextureSampler::sample`)
    pub fn sample(&self, unit: usize, coords: Vec4, gradients: Option<(Vec4, Vec4)>) -> Result<Vec4> {
        self.sampler.sample(unit, coords, gradients)
    }

    /// Screen-space derivatives (d/dx, d/dy) of an input register at this pixel
    pub fn derivatives(&self, register: usize) -> (Vec4, Vec4) {
        let q = self.inv_w;
        let p = self.projected[register];
        let value = p * (1.0 / q);
        let ddx = (self.gradients.register_ddx[register] - value * self.gradients.inv_w_ddx) * (1.0 / q);
        let ddy = (self.gradients.register_ddy[register] - value * self.gradients.inv_w_ddy) * (1.0 / q);
        (ddx, ddy)
    }

    /// Sample using the derivatives of `coord_register` for mip selection
    pub fn sample_register(&self, unit: usize, coord_register: usize, coords: Vec4) -> Result<Vec4> {
        let grads = self.derivatives(coord_register);
        self.sampler.sample(unit, coords, Some(grads))
    }
}
