//! Triangle rasterization
//!
//! Per leaf triangle: clip, project, cull, compute screen-space gradients,
//! then scan-convert (solid) or draw the edges as thick lines (wireframe).
//!
//! After projection every register is premultiplied by 1/w, and 1/w itself
//! sits in the position's w slot. All of these are affine in screen space,
//! so one set of d/dx, d/dy gradients per triangle evaluates them anywhere;
//! dividing by the interpolated 1/w recovers perspective-correct values.

use super::clipper::Clipper;
use super::error::Result;
use super::math::{ceil_i, ftol, Mat4, Plane, Vec4};
use super::sampler::TextureSampler;
use super::shader::{PixelContext, PixelShader, PixelShaderOutput, RegisterLayout, Registers, VsOutput};
use super::types::{CullMode, FillMode, Rect, RenderStates, MAX_VS_OUTPUTS};

/// Screen-space partial derivatives of everything interpolated across a
/// triangle, anchored at its base vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGradients {
    /// Projected base vertex: screen x, y, depth and 1/w
    pub base: Vec4,
    /// Base vertex registers, premultiplied by 1/w
    pub base_registers: Registers,
    pub depth_ddx: f32,
    pub depth_ddy: f32,
    pub inv_w_ddx: f32,
    pub inv_w_ddy: f32,
    pub register_ddx: Registers,
    pub register_ddy: Registers,
}

impl TriangleGradients {
    /// Solve for the gradients of three projected vertices. `None` for
    /// degenerate (zero-area) triangles.
    pub fn compute(v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, layout: &RegisterLayout) -> Option<Self> {
        let (p0, p1, p2) = (v0.position, v1.position, v2.position);
        let dx = [p1.x - p0.x, p2.x - p0.x];
        let dy = [p1.y - p0.y, p2.y - p0.y];
        let det = dx[1] * dy[0] - dx[0] * dy[1];
        if det.abs() < 1e-12 {
            return None;
        }
        let common = 1.0 / det;
        let solve = |f0: f32, f1: f32, f2: f32| {
            let df = [f1 - f0, f2 - f0];
            (
                (df[1] * dy[0] - df[0] * dy[1]) * common,
                -(df[1] * dx[0] - df[0] * dx[1]) * common,
            )
        };

        let (depth_ddx, depth_ddy) = solve(p0.z, p1.z, p2.z);
        let (inv_w_ddx, inv_w_ddy) = solve(p0.w, p1.w, p2.w);
        let mut register_ddx = [Vec4::ZERO; MAX_VS_OUTPUTS];
        let mut register_ddy = [Vec4::ZERO; MAX_VS_OUTPUTS];
        for (i, n) in layout.active() {
            for c in 0..n {
                let (gx, gy) = solve(v0.registers[i][c], v1.registers[i][c], v2.registers[i][c]);
                register_ddx[i][c] = gx;
                register_ddy[i][c] = gy;
            }
        }

        Some(Self {
            base: p0,
            base_registers: v0.registers,
            depth_ddx,
            depth_ddy,
            inv_w_ddx,
            inv_w_ddy,
            register_ddx,
            register_ddy,
        })
    }

    pub fn depth_at(&self, x: f32, y: f32) -> f32 {
        self.base.z + (x - self.base.x) * self.depth_ddx + (y - self.base.y) * self.depth_ddy
    }

    pub fn inv_w_at(&self, x: f32, y: f32) -> f32 {
        self.base.w + (x - self.base.x) * self.inv_w_ddx + (y - self.base.y) * self.inv_w_ddy
    }

    /// Premultiplied registers at (x, y)
    pub fn registers_at(&self, x: f32, y: f32, layout: &RegisterLayout) -> Registers {
        let (ox, oy) = (x - self.base.x, y - self.base.y);
        let mut out = [Vec4::ZERO; MAX_VS_OUTPUTS];
        for (i, n) in layout.active() {
            for c in 0..n {
                out[i][c] = self.base_registers[i][c] + ox * self.register_ddx[i][c] + oy * self.register_ddy[i][c];
            }
        }
        out
    }
}

/// Perspective divide and viewport transform. Stores 1/w in `position.w`
/// and premultiplies the live registers by it. False if w is zero.
pub fn project(v: &mut VsOutput, viewport: &Mat4, layout: &RegisterLayout) -> bool {
    if v.position.w == 0.0 {
        return false;
    }
    let inv_w = 1.0 / v.position.w;
    let ndc = Vec4::new(v.position.x * inv_w, v.position.y * inv_w, v.position.z * inv_w, 1.0);
    let mut screen = viewport.transform(ndc);
    screen.w = inv_w;
    v.position = screen;
    layout.scale(&mut v.registers, inv_w);
    true
}

/// Twice the signed screen area; positive for clockwise triangles on a
/// y-down screen.
pub fn signed_area(p0: Vec4, p1: Vec4, p2: Vec4) -> f32 {
    (p1.x - p0.x) * (p2.y - p0.y) - (p1.y - p0.y) * (p2.x - p0.x)
}

/// Should a triangle with this signed area be rejected?
pub fn is_culled(area: f32, cull: CullMode) -> bool {
    if area == 0.0 {
        return true;
    }
    match cull {
        CullMode::None => false,
        CullMode::Cw => area > 0.0,
        CullMode::Ccw => area < 0.0,
    }
}

/// How the pixel loop drives the pixel shader, resolved once per draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelStrategy {
    /// Depth test first; the shader never kills
    ColorOnly,
    /// Depth test first; the shader may kill
    ColorOnlyKillable,
    /// Shader first (it writes depth), then the depth test
    ColorAndDepth,
}

impl PixelStrategy {
    pub fn for_shader(shader: &dyn PixelShader) -> Self {
        match (shader.output_kind(), shader.might_kill_pixels()) {
            (PixelShaderOutput::ColorAndDepth, _) => PixelStrategy::ColorAndDepth,
            (PixelShaderOutput::ColorOnly, true) => PixelStrategy::ColorOnlyKillable,
            (PixelShaderOutput::ColorOnly, false) => PixelStrategy::ColorOnly,
        }
    }
}

/// Locked render target memory for one draw
pub(crate) struct RasterTarget<'t> {
    pub color: &'t mut [f32],
    pub channels: usize,
    pub depth: Option<&'t mut [f32]>,
    pub width: u32,
    /// Pixels outside this rectangle are never touched
    pub bounds: Rect,
}

/// Per-draw rasterizer state
pub(crate) struct Rasterizer<'t, 's> {
    pub states: &'t RenderStates,
    pub layout: RegisterLayout,
    pub shader: &'t dyn PixelShader,
    pub strategy: PixelStrategy,
    pub sampler: &'t TextureSampler<'s>,
    pub target: RasterTarget<'t>,
    pub viewport: Mat4,
    pub rendered_pixels: u64,
    pub rendered_triangles: u64,
}

impl Rasterizer<'_, '_> {
    /// Clip, project and fill one (leaf) triangle
    pub fn draw_triangle(
        &mut self,
        clipper: &mut Clipper,
        v0: &VsOutput,
        v1: &VsOutput,
        v2: &VsOutput,
        user_planes: &[Plane],
        scissor: Option<&[Plane; 4]>,
    ) -> Result<()> {
        clipper.begin(v0, v1, v2)?;
        if !clipper.clip(&super::clipper::FRUSTUM_PLANES, true, &self.layout)? {
            return Ok(());
        }
        if !clipper.clip(user_planes, true, &self.layout)? {
            return Ok(());
        }

        let polygon: Vec<usize> = clipper.polygon().to_vec();
        for &i in &polygon {
            if !project(clipper.pool.get_mut(i), &self.viewport, &self.layout) {
                return Ok(());
            }
        }

        if let Some(planes) = scissor {
            if !clipper.clip(planes, false, &self.layout)? {
                return Ok(());
            }
        }

        for [a, b, c] in clipper.fan() {
            let (a, b, c) = (clipper.pool.get(a), clipper.pool.get(b), clipper.pool.get(c));
            self.rasterize(a, b, c);
        }
        Ok(())
    }

    /// Cull, compute gradients and fill an already projected triangle
    pub fn rasterize(&mut self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput) {
        let area = signed_area(v0.position, v1.position, v2.position);
        if is_culled(area, self.states.cull_mode) {
            return;
        }
        let Some(gradients) = TriangleGradients::compute(v0, v1, v2, &self.layout) else {
            return;
        };
        self.rendered_triangles += 1;
        match self.states.fill_mode {
            FillMode::Solid => self.fill_solid(v0, v1, v2, &gradients),
            FillMode::Wireframe => {
                self.draw_line(v0.position, v1.position, &gradients);
                self.draw_line(v1.position, v2.position, &gradients);
                self.draw_line(v2.position, v0.position, &gradients);
            }
        }
    }

    fn fill_solid(&mut self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, g: &TriangleGradients) {
        let mut sorted = [v0.position, v1.position, v2.position];
        sorted.sort_by(|a, b| a.y.total_cmp(&b.y));
        let [a, b, c] = sorted;
        if c.y <= a.y {
            return;
        }

        let bounds = self.target.bounds;
        let y_top = ceil_i(a.y - 0.5).max(bounds.top as i32);
        let y_mid = ceil_i(b.y - 0.5).clamp(bounds.top as i32, bounds.bottom as i32);
        let y_bottom = ceil_i(c.y - 0.5).min(bounds.bottom as i32);

        let long_slope = (c.x - a.x) / (c.y - a.y);

        if b.y > a.y {
            let short_slope = (b.x - a.x) / (b.y - a.y);
            for y in y_top..y_mid.min(y_bottom) {
                let yc = y as f32 + 0.5;
                let x_long = a.x + (yc - a.y) * long_slope;
                let x_short = a.x + (yc - a.y) * short_slope;
                self.fill_span(y, x_long.min(x_short), x_long.max(x_short), g);
            }
        }
        if c.y > b.y {
            let short_slope = (c.x - b.x) / (c.y - b.y);
            for y in y_mid.max(y_top)..y_bottom {
                let yc = y as f32 + 0.5;
                let x_long = a.x + (yc - a.y) * long_slope;
                let x_short = b.x + (yc - b.y) * short_slope;
                self.fill_span(y, x_long.min(x_short), x_long.max(x_short), g);
            }
        }
    }

    /// Pixels whose centers lie in [left, right) on row `y`
    fn fill_span(&mut self, y: i32, left: f32, right: f32, g: &TriangleGradients) {
        let bounds = self.target.bounds;
        let x_start = ceil_i(left - 0.5).max(bounds.left as i32);
        let x_end = ceil_i(right - 0.5).min(bounds.right as i32);
        if x_start >= x_end {
            return;
        }

        let px = x_start as f32 + 0.5;
        let py = y as f32 + 0.5;
        let mut depth = g.depth_at(px, py);
        let mut inv_w = g.inv_w_at(px, py);
        let mut regs = g.registers_at(px, py, &self.layout);

        for x in x_start..x_end {
            self.shade_pixel(x as u32, y as u32, depth, inv_w, &regs, g);
            depth += g.depth_ddx;
            inv_w += g.inv_w_ddx;
            for (i, n) in self.layout.active() {
                for c in 0..n {
                    regs[i][c] += g.register_ddx[i][c];
                }
            }
        }
    }

    /// Thick line along the dominant axis, attributes from the triangle gradients
    fn draw_line(&mut self, p: Vec4, q: Vec4, g: &TriangleGradients) {
        let dx = q.x - p.x;
        let dy = q.y - p.y;
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        let thickness = self.states.line_thickness.max(1) as i32;
        let spread = (thickness - 1) / 2;
        let bounds = self.target.bounds;
        let x_major = dx.abs() >= dy.abs();

        let (from, to, start_minor, slope) = if x_major {
            let (s, e) = if p.x <= q.x { (p, q) } else { (q, p) };
            (s.x, e.x, s, dy / dx)
        } else {
            let (s, e) = if p.y <= q.y { (p, q) } else { (q, p) };
            (s.y, e.y, s, dx / dy)
        };

        for major in ceil_i(from - 0.5)..ceil_i(to - 0.5) {
            let mc = major as f32 + 0.5;
            let minor_center = if x_major {
                start_minor.y + (mc - start_minor.x) * slope
            } else {
                start_minor.x + (mc - start_minor.y) * slope
            };
            let minor_first = ftol(minor_center.floor()) - spread;
            for minor in minor_first..minor_first + thickness {
                let (x, y) = if x_major { (major, minor) } else { (minor, major) };
                if x < bounds.left as i32 || x >= bounds.right as i32 || y < bounds.top as i32 || y >= bounds.bottom as i32 {
                    continue;
                }
                let (sx, sy) = (x as f32 + 0.5, y as f32 + 0.5);
                let regs = g.registers_at(sx, sy, &self.layout);
                self.shade_pixel(x as u32, y as u32, g.depth_at(sx, sy), g.inv_w_at(sx, sy), &regs, g);
            }
        }
    }

    fn depth_passes(&self, idx: usize, z: f32) -> bool {
        if !self.states.depth_enable {
            return true;
        }
        match &self.target.depth {
            Some(depth) => self.states.depth_func.passes(z, depth[idx]),
            None => true,
        }
    }

    fn shade_pixel(&mut self, x: u32, y: u32, z: f32, inv_w: f32, projected: &Registers, g: &TriangleGradients) {
        let idx = y as usize * self.target.width as usize + x as usize;
        let early_test = self.strategy != PixelStrategy::ColorAndDepth;
        if early_test && !self.depth_passes(idx, z) {
            return;
        }

        let mut input = [Vec4::ZERO; MAX_VS_OUTPUTS];
        let w = 1.0 / inv_w;
        for (i, n) in self.layout.active() {
            for c in 0..n {
                input[i][c] = projected[i][c] * w;
            }
        }

        let ctx = PixelContext {
            x,
            y,
            sampler: self.sampler,
            gradients: g,
            projected,
            inv_w,
        };
        let mut color = Vec4::ZERO;
        let mut depth = z;
        let alive = self.shader.execute(&ctx, &input, &mut color, &mut depth);

        match self.strategy {
            PixelStrategy::ColorOnly => {}
            PixelStrategy::ColorOnlyKillable => {
                if !alive {
                    return;
                }
            }
            PixelStrategy::ColorAndDepth => {
                if !alive || !self.depth_passes(idx, depth) {
                    return;
                }
            }
        }

        if self.states.depth_enable && self.states.depth_write_enable {
            if let Some(buffer) = self.target.depth.as_deref_mut() {
                buffer[idx] = depth;
            }
        }
        if self.states.color_write_enable {
            let n = self.target.channels;
            let start = idx * n;
            self.target.color[start..start + n].copy_from_slice(&color.to_array()[..n]);
        }
        self.rendered_pixels += 1;
    }
}
