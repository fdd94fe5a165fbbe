//! Core types for the pipeline: formats, state tables and limits

use serde::{Serialize, Deserialize};

/// Number of vertex shader input registers
pub const MAX_VS_INPUTS: usize = 8;
/// Number of vertex shader output registers (= pixel shader inputs)
pub const MAX_VS_OUTPUTS: usize = 8;
/// Number of vertex streams a format may reference
pub const MAX_VERTEX_STREAMS: usize = 8;
/// Number of texture sampler units
pub const MAX_TEXTURE_SAMPLERS: usize = 16;
/// Number of user-defined clip planes
pub const MAX_USER_CLIP_PLANES: usize = 6;
/// Frustum + user + scissor planes
pub const MAX_CLIP_PLANES: usize = 6 + MAX_USER_CLIP_PLANES + 4;
/// Entries in the per-draw vertex cache
pub const VERTEX_CACHE_SIZE: usize = 32;
/// Upper bound for subdivision recursion (both edge and inner levels)
pub const MAX_SUBDIVISION_LEVELS: u32 = 8;

/// Storage format: one to four 32-bit float channels per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    R32F,
    R32G32F,
    R32G32B32F,
    R32G32B32A32F,
}

impl Format {
    /// Floats per pixel
    pub fn channels(self) -> usize {
        match self {
            Format::R32F => 1,
            Format::R32G32F => 2,
            Format::R32G32B32F => 3,
            Format::R32G32B32A32F => 4,
        }
    }
}

/// Depth compare function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareFunc {
    Never,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Always,
}

impl CompareFunc {
    /// Does a new value pass against the stored one?
    #[inline]
    pub fn passes(self, new: f32, existing: f32) -> bool {
        match self {
            CompareFunc::Never => false,
            CompareFunc::Equal => new == existing,
            CompareFunc::NotEqual => new != existing,
            CompareFunc::Less => new < existing,
            CompareFunc::LessEqual => new <= existing,
            CompareFunc::Greater => new > existing,
            CompareFunc::GreaterEqual => new >= existing,
            CompareFunc::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillMode {
    Solid,
    Wireframe,
}

/// Which screen-space winding gets rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    None,
    Cw,
    Ccw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubdivisionMode {
    None,
    Simple,
    Smooth,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveType {
    /// Offsets of the three vertices of primitive `i`, winding preserved
    pub fn triangle(self, i: u32) -> [u32; 3] {
        match self {
            PrimitiveType::TriangleList => [i * 3, i * 3 + 1, i * 3 + 2],
            PrimitiveType::TriangleStrip => {
                if i & 1 == 0 {
                    [i, i + 1, i + 2]
                } else {
                    [i + 1, i, i + 2]
                }
            }
            PrimitiveType::TriangleFan => [0, i + 1, i + 2],
        }
    }
}

/// Pipeline-wide render states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderStates {
    pub depth_enable: bool,
    pub depth_func: CompareFunc,
    pub depth_write_enable: bool,
    pub color_write_enable: bool,
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub subdivision_mode: SubdivisionMode,
    /// Recursion depth for simple/smooth subdivision and adaptive edges
    pub subdivision_levels: u32,
    /// Input register holding the position (xyz) for smooth/adaptive subdivision
    pub subdivision_position_register: usize,
    /// Input register holding the normal (xyz) for smooth subdivision
    pub subdivision_normal_register: usize,
    /// Adaptive: keep splitting while the projected area exceeds this (pixels)
    pub subdivision_max_screen_area: f32,
    /// Adaptive: recursion limit for the inner part
    pub subdivision_max_inner_levels: u32,
    pub scissor_enable: bool,
    /// Wireframe line width in pixels
    pub line_thickness: u32,
}

impl Default for RenderStates {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_func: CompareFunc::LessEqual,
            depth_write_enable: true,
            color_write_enable: true,
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Ccw,
            subdivision_mode: SubdivisionMode::None,
            subdivision_levels: 1,
            subdivision_position_register: 0,
            subdivision_normal_register: 1,
            subdivision_max_screen_area: 1.0,
            subdivision_max_inner_levels: 1,
            scissor_enable: false,
            line_thickness: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMode {
    Wrap,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureFilter {
    Point,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MipFilter {
    None,
    Point,
    Linear,
}

/// Per texture unit sampler states
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerStates {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub min_filter: TextureFilter,
    pub mag_filter: TextureFilter,
    pub mip_filter: MipFilter,
    pub mip_lod_bias: f32,
    /// Highest (smallest) mip level that may be selected
    pub max_mip_level: f32,
}

impl Default for SamplerStates {
    fn default() -> Self {
        Self {
            address_u: AddressMode::Wrap,
            address_v: AddressMode::Wrap,
            address_w: AddressMode::Wrap,
            min_filter: TextureFilter::Point,
            mag_filter: TextureFilter::Point,
            mip_filter: MipFilter::None,
            mip_lod_bias: 0.0,
            max_mip_level: 16.0,
        }
    }
}

/// Integer rectangle, right/bottom exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Fits inside a width x height area
    pub fn fits(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.right <= width && self.bottom <= height
    }
}

/// Screen area triangles are mapped to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, min_z: 0.0, max_z: 1.0 }
    }

    /// Covered pixels; `None` when the far edge overflows
    pub fn rect(&self) -> Option<Rect> {
        let right = self.x.checked_add(self.width)?;
        let bottom = self.y.checked_add(self.height)?;
        Some(Rect::new(self.x, self.y, right, bottom))
    }
}

/// Draw statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderInfo {
    pub rendered_pixels: u64,
    pub rendered_triangles: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_compare_truth_table() {
        use CompareFunc::*;
        // (new, existing)
        let pairs = [(0.25f32, 0.5f32), (0.5, 0.5), (0.75, 0.5)];
        let expect: [(CompareFunc, [bool; 3]); 8] = [
            (Never, [false, false, false]),
            (Equal, [false, true, false]),
            (NotEqual, [true, false, true]),
            (Less, [true, false, false]),
            (LessEqual, [true, true, false]),
            (Greater, [false, false, true]),
            (GreaterEqual, [false, true, true]),
            (Always, [true, true, true]),
        ];
        for (func, results) in expect {
            for ((new, existing), want) in pairs.iter().zip(results) {
                assert_eq!(func.passes(*new, *existing), want, "{:?} {} {}", func, new, existing);
            }
        }
    }

    #[test]
    fn test_strip_keeps_winding() {
        assert_eq!(PrimitiveType::TriangleStrip.triangle(0), [0, 1, 2]);
        assert_eq!(PrimitiveType::TriangleStrip.triangle(1), [2, 1, 3]);
        assert_eq!(PrimitiveType::TriangleFan.triangle(2), [0, 3, 4]);
    }

    #[test]
    fn test_viewport_rect_overflow() {
        assert_eq!(Viewport::new(2, 3, 10, 20).rect(), Some(Rect::new(2, 3, 12, 23)));
        assert_eq!(Viewport::new(u32::MAX - 4, 0, 10, 10).rect(), None);
        assert_eq!(Viewport::new(0, u32::MAX, 1, 1).rect(), None);
    }

    #[test]
    fn test_rect_fits() {
        assert!(Rect::new(0, 0, 10, 10).fits(10, 10));
        assert!(!Rect::new(0, 0, 11, 10).fits(10, 10));
        assert!(!Rect::new(5, 5, 5, 10).fits(10, 10));
    }
}
