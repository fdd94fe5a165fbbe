//! Programmable software rasterizer
//!
//! Features:
//! - Vertex, triangle and pixel shaders as trait objects
//! - Vertex cache, homogeneous + user plane + scissor clipping
//! - Simple, smooth and adaptive triangle subdivision
//! - Perspective-correct interpolation, depth test, wireframe
//! - 2D, cube and volume textures with mip mapping

mod error;
mod math;
mod types;
mod surface;
mod texture;
mod sampler;
mod stream;
mod shader;
mod cache;
mod clipper;
mod subdivide;
mod raster;
mod device;
pub mod config;
pub mod present;

pub use error::*;
pub use math::*;
pub use types::*;
pub use surface::*;
pub use texture::*;
pub use sampler::{address, mip_level, resolve_cube_face, sample_texture, TextureSampler};
pub use stream::{ElementType, IndexBuffer, IndexFormat, VertexBuffer, VertexElement, VertexFormat, VertexStream};
pub use shader::*;
pub use cache::VertexCache;
pub use clipper::{clip_to_plane, scissor_planes, ClipVertexPool, Clipper, CLIP_POOL_CAPACITY, FRUSTUM_PLANES};
pub use subdivide::{projected_area, shade_vertex, smooth_midpoint, Subdivider};
pub use raster::{is_culled, project, signed_area, PixelStrategy, TriangleGradients};
pub use device::*;
