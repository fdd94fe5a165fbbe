//! The pipeline state machine
//!
//! `Device` owns every state table and binding and exposes the draw calls.
//! A draw validates the pipeline (`pre_render`), which locks the render
//! target and read-locks every bound resource into a `DrawContext`. The
//! context is dropped when the draw returns, successfully or not, which
//! releases all locks.

use std::cell::RefMut;
use std::rc::Rc;

use log::{debug, warn};

use super::cache::VertexCache;
use super::clipper::{scissor_planes, Clipper};
use super::error::{Error, Result};
use super::math::{Mat4, Plane, Vec4};
use super::raster::{PixelStrategy, RasterTarget, Rasterizer};
use super::sampler::TextureSampler;
use super::shader::{PixelShader, RegisterLayout, TriangleShader, VertexShader, VsOutput};
use super::stream::{IndexBuffer, IndexView, StreamView, VertexBuffer, VertexFormat, VertexStream};
use super::subdivide::{shade_vertex, validate_registers, Subdivider};
use super::surface::Surface;
use super::texture::TextureResource;
use super::types::{
    FillMode, Format, PrimitiveType, Rect, RenderInfo, RenderStates, SamplerStates, SubdivisionMode, Viewport,
    MAX_SUBDIVISION_LEVELS, MAX_TEXTURE_SAMPLERS, MAX_USER_CLIP_PLANES, MAX_VERTEX_STREAMS,
};

/// Color and depth surfaces plus the viewport mapped onto them
#[derive(Debug, Clone)]
pub struct RenderTarget {
    color: Option<Rc<Surface>>,
    depth: Option<Rc<Surface>>,
    viewport: Viewport,
}

impl RenderTarget {
    /// The viewport initially covers the whole target
    pub fn new(color: Option<Rc<Surface>>, depth: Option<Rc<Surface>>) -> Self {
        let (width, height) = color.as_ref()
            .or(depth.as_ref())
            .map(|s| (s.width(), s.height()))
            .unwrap_or((0, 0));
        Self { color, depth, viewport: Viewport::new(0, 0, width, height) }
    }

    pub fn color_surface(&self) -> Option<&Rc<Surface>> {
        self.color.as_ref()
    }

    pub fn depth_surface(&self) -> Option<&Rc<Surface>> {
        self.depth.as_ref()
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport_matrix(&self) -> Mat4 {
        let vp = &self.viewport;
        Mat4::viewport(vp.x as f32, vp.y as f32, vp.width as f32, vp.height as f32, vp.min_z, vp.max_z)
    }
}

/// Everything a draw reads; kept apart from the per-draw scratch so a
/// draw context can borrow it while the cache and clipper are mutated.
struct PipelineState {
    render_states: RenderStates,
    sampler_states: Vec<SamplerStates>,
    textures: Vec<Option<TextureResource>>,
    vertex_format: Option<Rc<VertexFormat>>,
    streams: Vec<Option<VertexStream>>,
    index_buffer: Option<Rc<IndexBuffer>>,
    vertex_shader: Option<Rc<dyn VertexShader>>,
    triangle_shader: Option<Rc<dyn TriangleShader>>,
    pixel_shader: Option<Rc<dyn PixelShader>>,
    render_target: Option<RenderTarget>,
    clip_planes: [Option<Plane>; MAX_USER_CLIP_PLANES],
    scissor_rect: Rect,
}

pub struct Device {
    state: PipelineState,
    vertex_cache: VertexCache,
    clipper: Clipper,
    render_info: RenderInfo,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(err: Error) -> Error {
    warn!("Draw rejected: {}", err);
    err
}

fn ensure(condition: bool, err: Error) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(rejected(err))
    }
}

impl Device {
    pub fn new() -> Self {
        Self {
            state: PipelineState {
                render_states: RenderStates::default(),
                sampler_states: vec![SamplerStates::default(); MAX_TEXTURE_SAMPLERS],
                textures: vec![None; MAX_TEXTURE_SAMPLERS],
                vertex_format: None,
                streams: vec![None; MAX_VERTEX_STREAMS],
                index_buffer: None,
                vertex_shader: None,
                triangle_shader: None,
                pixel_shader: None,
                render_target: None,
                clip_planes: [None; MAX_USER_CLIP_PLANES],
                scissor_rect: Rect::default(),
            },
            vertex_cache: VertexCache::default(),
            clipper: Clipper::new(),
            render_info: RenderInfo::default(),
        }
    }

    // ---- state tables ----

    pub fn render_states(&self) -> &RenderStates {
        &self.state.render_states
    }

    pub fn render_states_mut(&mut self) -> &mut RenderStates {
        &mut self.state.render_states
    }

    pub fn set_render_states(&mut self, states: RenderStates) {
        self.state.render_states = states;
    }

    pub fn sampler_states(&self, unit: usize) -> Result<&SamplerStates> {
        self.state.sampler_states.get(unit)
            .ok_or(Error::InvalidParameters("sampler unit out of range"))
    }

    pub fn set_sampler_states(&mut self, unit: usize, states: SamplerStates) -> Result<()> {
        let slot = self.state.sampler_states.get_mut(unit)
            .ok_or(Error::InvalidParameters("sampler unit out of range"))?;
        *slot = states;
        Ok(())
    }

    // ---- bindings ----

    pub fn texture(&self, unit: usize) -> Option<&TextureResource> {
        self.state.textures.get(unit).and_then(|t| t.as_ref())
    }

    pub fn set_texture(&mut self, unit: usize, texture: Option<TextureResource>) -> Result<()> {
        let slot = self.state.textures.get_mut(unit)
            .ok_or(Error::InvalidParameters("sampler unit out of range"))?;
        *slot = texture;
        Ok(())
    }

    pub fn set_vertex_format(&mut self, format: Option<Rc<VertexFormat>>) {
        self.state.vertex_format = format;
    }

    /// Bind `buffer` to stream slot `stream`; `None` unbinds it
    pub fn set_vertex_stream(
        &mut self,
        stream: usize,
        buffer: Option<Rc<VertexBuffer>>,
        offset: usize,
        stride: usize,
    ) -> Result<()> {
        let slot = self.state.streams.get_mut(stream)
            .ok_or(Error::InvalidParameters("vertex stream out of range"))?;
        *slot = buffer.map(|buffer| VertexStream { buffer, offset, stride });
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: Option<Rc<IndexBuffer>>) {
        self.state.index_buffer = buffer;
    }

    pub fn set_vertex_shader(&mut self, shader: Option<Rc<dyn VertexShader>>) {
        self.state.vertex_shader = shader;
    }

    pub fn set_triangle_shader(&mut self, shader: Option<Rc<dyn TriangleShader>>) {
        self.state.triangle_shader = shader;
    }

    pub fn set_pixel_shader(&mut self, shader: Option<Rc<dyn PixelShader>>) {
        self.state.pixel_shader = shader;
    }

    pub fn render_target(&self) -> Option<&RenderTarget> {
        self.state.render_target.as_ref()
    }

    pub fn render_target_mut(&mut self) -> Option<&mut RenderTarget> {
        self.state.render_target.as_mut()
    }

    pub fn set_render_target(&mut self, target: Option<RenderTarget>) {
        self.state.render_target = target;
    }

    pub fn clip_plane(&self, index: usize) -> Option<Plane> {
        self.state.clip_planes.get(index).copied().flatten()
    }

    /// Enable (`Some`) or disable (`None`) user clip plane `index`
    pub fn set_clip_plane(&mut self, index: usize, plane: Option<Plane>) -> Result<()> {
        let slot = self.state.clip_planes.get_mut(index)
            .ok_or(Error::InvalidParameters("clip plane index out of range"))?;
        *slot = plane;
        Ok(())
    }

    pub fn scissor_rect(&self) -> Rect {
        self.state.scissor_rect
    }

    pub fn set_scissor_rect(&mut self, rect: Rect) {
        self.state.scissor_rect = rect;
    }

    // ---- target operations ----

    /// Fill the color surface of the render target
    pub fn clear(&self, color: Vec4) -> Result<()> {
        self.state.render_target.as_ref()
            .and_then(|t| t.color.as_ref())
            .ok_or(Error::InvalidState("no color surface bound"))?
            .clear(color)
    }

    /// Fill the depth surface of the render target
    pub fn clear_depth(&self, depth: f32) -> Result<()> {
        self.state.render_target.as_ref()
            .and_then(|t| t.depth.as_ref())
            .ok_or(Error::InvalidState("no depth surface bound"))?
            .clear(Vec4::splat(depth))
    }

    pub fn render_info(&self) -> RenderInfo {
        self.render_info
    }

    pub fn reset_render_info(&mut self) {
        self.render_info = RenderInfo::default();
    }

    /// Vertex cache (hits, misses) of the last draw
    pub fn vertex_cache_stats(&self) -> (u64, u64) {
        (self.vertex_cache.hits(), self.vertex_cache.misses())
    }

    // ---- draw calls ----

    /// Draw `count` primitives from consecutive vertices starting at `start_vertex`
    pub fn draw_primitive(&mut self, kind: PrimitiveType, start_vertex: u32, count: u32) -> Result<()> {
        ensure(count > 0, Error::InvalidParameters("primitive count is zero"))?;
        let ctx = DrawContext::pre_render(&self.state, false)?;
        self.vertex_cache.reset();
        let result = ctx.execute(kind, count, &mut self.vertex_cache, &mut self.clipper, &mut self.render_info, |i| {
            start_vertex.checked_add(i)
                .ok_or(Error::InvalidParameters("vertex index overflow"))
        });
        self.log_draw(kind, count);
        result
    }

    /// Draw `count` primitives reading indices from `start_index`; each
    /// index is offset by `base_vertex`
    pub fn draw_indexed_primitive(
        &mut self,
        kind: PrimitiveType,
        base_vertex: i32,
        start_index: u32,
        count: u32,
    ) -> Result<()> {
        ensure(count > 0, Error::InvalidParameters("primitive count is zero"))?;
        let mut ctx = DrawContext::pre_render(&self.state, true)?;
        self.vertex_cache.reset();
        let indices = ctx.indices.take();
        let result = match indices.as_ref() {
            Some(indices) => {
                let resolve = |i: u32| -> Result<u32> {
                    let position = start_index.checked_add(i)
                        .ok_or(Error::InvalidParameters("index position overflow"))?;
                    let index = indices.get(position)? as i64 + base_vertex as i64;
                    u32::try_from(index).map_err(|_| Error::InvalidParameters("vertex index out of range"))
                };
                ctx.execute(kind, count, &mut self.vertex_cache, &mut self.clipper, &mut self.render_info, resolve)
            }
            None => Err(Error::InvalidState("no index buffer bound")),
        };
        self.log_draw(kind, count);
        result
    }

    fn log_draw(&self, kind: PrimitiveType, count: u32) {
        debug!(
            "{:?} x{}: cache {} hits / {} misses, totals {} triangles {} pixels",
            kind,
            count,
            self.vertex_cache.hits(),
            self.vertex_cache.misses(),
            self.render_info.rendered_triangles,
            self.render_info.rendered_pixels
        );
    }
}

/// Locks and resolved state for one draw; dropping it releases the locks
struct DrawContext<'a> {
    states: &'a RenderStates,
    vertex_shader: &'a dyn VertexShader,
    triangle_shader: Option<&'a dyn TriangleShader>,
    pixel_shader: &'a dyn PixelShader,
    format: &'a VertexFormat,
    layout: RegisterLayout,
    streams: Vec<Option<StreamView<'a>>>,
    indices: Option<IndexView<'a>>,
    sampler: TextureSampler<'a>,
    color: RefMut<'a, [f32]>,
    channels: usize,
    depth: Option<RefMut<'a, [f32]>>,
    width: u32,
    bounds: Rect,
    viewport: Mat4,
    user_planes: Vec<Plane>,
    scissor: Option<[Plane; 4]>,
}

impl<'a> DrawContext<'a> {
    /// Validate the pipeline and lock everything the draw touches
    fn pre_render(state: &'a PipelineState, indexed: bool) -> Result<Self> {
        let rs = &state.render_states;

        let format = state.vertex_format.as_deref()
            .ok_or_else(|| rejected(Error::InvalidState("no vertex format set")))?;
        let vertex_shader = state.vertex_shader.as_deref()
            .ok_or_else(|| rejected(Error::InvalidState("no vertex shader set")))?;
        let pixel_shader = state.pixel_shader.as_deref()
            .ok_or_else(|| rejected(Error::InvalidState("no pixel shader set")))?;
        let target = state.render_target.as_ref()
            .ok_or_else(|| rejected(Error::InvalidState("no render target set")))?;

        let color_surface = target.color.as_ref()
            .ok_or_else(|| rejected(Error::InvalidState("render target has no color surface")))?;
        let channels = color_surface.channels();
        ensure(channels >= 3, Error::InvalidFormat("color surface needs 3 or 4 channels"))?;

        let (width, height) = (color_surface.width(), color_surface.height());
        let needs_depth = rs.depth_enable || rs.depth_write_enable;
        let depth_surface = if needs_depth {
            let depth = target.depth.as_ref()
                .ok_or_else(|| rejected(Error::InvalidState("depth test needs a depth surface")))?;
            ensure(depth.format() == Format::R32F, Error::InvalidFormat("depth surface must be R32F"))?;
            ensure(
                depth.width() == width && depth.height() == height,
                Error::InvalidParameters("depth surface size differs from color surface"),
            )?;
            Some(depth)
        } else {
            None
        };

        let bounds = target.viewport.rect()
            .filter(|r| r.fits(width, height))
            .ok_or_else(|| rejected(Error::InvalidParameters("viewport outside render target")))?;

        let mask = format.stream_mask();
        for (i, stream) in state.streams.iter().enumerate() {
            ensure(mask & (1 << i) == 0 || stream.is_some(), Error::InvalidState("referenced vertex stream not bound"))?;
        }

        ensure(rs.subdivision_levels <= MAX_SUBDIVISION_LEVELS, Error::InvalidParameters("too many subdivision levels"))?;
        ensure(
            rs.subdivision_max_inner_levels <= MAX_SUBDIVISION_LEVELS,
            Error::InvalidParameters("too many inner subdivision levels"),
        )?;
        if matches!(rs.subdivision_mode, SubdivisionMode::Smooth) {
            ensure(validate_registers(rs), Error::InvalidParameters("invalid subdivision registers"))?;
        }
        if matches!(rs.subdivision_mode, SubdivisionMode::Adaptive) {
            ensure(rs.subdivision_max_screen_area > 0.0, Error::InvalidParameters("adaptive area threshold must be positive"))?;
        }

        if rs.fill_mode == FillMode::Wireframe {
            ensure(rs.line_thickness > 0, Error::InvalidParameters("line thickness is zero"))?;
        }

        let scissor = if rs.scissor_enable {
            let r = state.scissor_rect;
            ensure(
                !r.is_empty() && r.left >= bounds.left && r.top >= bounds.top && r.right <= bounds.right && r.bottom <= bounds.bottom,
                Error::InvalidParameters("scissor rect outside viewport"),
            )?;
            Some(scissor_planes(r))
        } else {
            None
        };

        // Lock order: target first, so a texture aliasing it fails to bind
        let color = color_surface.lock().map_err(rejected)?;
        let depth = depth_surface.map(|d| d.lock())
            .transpose()
            .map_err(rejected)?;

        let streams = state.streams.iter()
            .map(|s| s.as_ref().map(|s| s.view()).transpose())
            .collect::<Result<Vec<_>>>()
            .map_err(rejected)?;

        let indices = if indexed {
            let buffer = state.index_buffer.as_ref()
                .ok_or_else(|| rejected(Error::InvalidState("no index buffer bound")))?;
            Some(buffer.view().map_err(rejected)?)
        } else {
            None
        };

        let sampler = TextureSampler::bind(&state.textures, &state.sampler_states)
            .map_err(rejected)?;

        Ok(Self {
            states: rs,
            vertex_shader,
            triangle_shader: state.triangle_shader.as_deref(),
            pixel_shader,
            format,
            layout: RegisterLayout::from_shader(vertex_shader),
            streams,
            indices,
            sampler,
            color,
            channels,
            depth,
            width,
            bounds,
            viewport: target.viewport_matrix(),
            user_planes: state.clip_planes.iter().flatten().copied().collect(),
            scissor,
        })
    }

    /// Fetch, shade and rasterize every primitive. `resolve` maps a vertex
    /// position within the primitive stream to a source vertex index.
    fn execute<F>(
        self,
        kind: PrimitiveType,
        count: u32,
        cache: &mut VertexCache,
        clipper: &mut Clipper,
        info: &mut RenderInfo,
        resolve: F,
    ) -> Result<()>
    where
        F: Fn(u32) -> Result<u32>,
    {
        let DrawContext {
            states,
            vertex_shader,
            triangle_shader,
            pixel_shader,
            format,
            layout,
            streams,
            sampler,
            mut color,
            channels,
            mut depth,
            width,
            bounds,
            viewport,
            user_planes,
            scissor,
            ..
        } = self;

        let mut raster = Rasterizer {
            states,
            layout,
            shader: pixel_shader,
            strategy: PixelStrategy::for_shader(pixel_shader),
            sampler: &sampler,
            target: RasterTarget {
                color: &mut color[..],
                channels,
                depth: depth.as_deref_mut(),
                width,
                bounds,
            },
            viewport,
            rendered_pixels: 0,
            rendered_triangles: 0,
        };
        let subdivider = Subdivider { states, shader: vertex_shader, viewport: &viewport };
        let shade = |index: u32| -> Result<VsOutput> {
            let input = format.decode(&streams, index)?;
            Ok(shade_vertex(vertex_shader, &input))
        };

        let mut run = || -> Result<()> {
            for i in 0..count {
                let mut tri = [VsOutput::default(); 3];
                for (v, offset) in tri.iter_mut().zip(kind.triangle(i)) {
                    *v = cache.fetch(resolve(offset)?, &shade)?;
                }
                subdivider.subdivide(&tri[0], &tri[1], &tri[2], &mut |a: &VsOutput, b: &VsOutput, c: &VsOutput| {
                    // cached and subdivided vertices stay untouched
                    let (mut a, mut b, mut c) = (*a, *b, *c);
                    if let Some(shader) = triangle_shader {
                        if !shader.execute(&mut a.registers, &mut b.registers, &mut c.registers) {
                            return Ok(());
                        }
                    }
                    raster.draw_triangle(clipper, &a, &b, &c, &user_planes, scissor.as_ref())
                })?;
            }
            Ok(())
        };
        let result = run();

        info.rendered_pixels += raster.rendered_pixels;
        info.rendered_triangles += raster.rendered_triangles;
        result
    }
}
