//! softpipe: a programmable software rasterization pipeline
//!
//! Vertex data flows from typed vertex streams through a vertex cache,
//! user shaders, optional subdivision, homogeneous clipping and a scanline
//! rasterizer into float color/depth surfaces. Everything runs on the CPU,
//! single-threaded.

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod rasterizer;
