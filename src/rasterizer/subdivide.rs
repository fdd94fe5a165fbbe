//! Triangle subdivision ahead of clipping
//!
//! New vertices are always built from interpolated vertex *inputs* and run
//! through the vertex shader again, so lighting and displacement are
//! recomputed rather than blended.

use super::error::Result;
use super::math::{Mat4, Vec3, Vec4};
use super::raster::signed_area;
use super::shader::{VertexShader, VsInput, VsOutput};
use super::types::{RenderStates, SubdivisionMode, MAX_SUBDIVISION_LEVELS, MAX_VS_INPUTS};

/// Run the vertex shader on one input
pub fn shade_vertex(shader: &dyn VertexShader, input: &VsInput) -> VsOutput {
    let mut out = VsOutput { input: *input, ..Default::default() };
    shader.execute(input, &mut out.position, &mut out.registers);
    out
}

/// Edge midpoint displaced along the curvature implied by the endpoint
/// normals. Returns (position, normal).
pub fn smooth_midpoint(p0: Vec3, n0: Vec3, p1: Vec3, n1: Vec3) -> (Vec3, Vec3) {
    let mid = (p0 + p1) * 0.5;
    let d0 = n0 * (p1 - p0).dot(n0);
    let d1 = n1 * (p0 - p1).dot(n1);
    let curvature = (d0 + d1) * 0.5;
    (mid - curvature * 0.25, (n0 + n1).normalize())
}

/// Screen-space area of a clip-space triangle; infinite when a vertex is on
/// or behind the eye plane.
pub fn projected_area(v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, viewport: &Mat4) -> f32 {
    let mut p = [Vec4::ZERO; 3];
    for (out, v) in p.iter_mut().zip([v0, v1, v2]) {
        let w = v.position.w;
        if w <= 1e-6 {
            return f32::INFINITY;
        }
        let inv_w = 1.0 / w;
        *out = viewport.transform(Vec4::new(v.position.x * inv_w, v.position.y * inv_w, v.position.z * inv_w, 1.0));
    }
    signed_area(p[0], p[1], p[2]).abs() * 0.5
}

pub struct Subdivider<'a> {
    pub states: &'a RenderStates,
    pub shader: &'a dyn VertexShader,
    pub viewport: &'a Mat4,
}

impl Subdivider<'_> {
    /// Emit the leaf triangles of (v0, v1, v2) into `sink`, winding preserved
    pub fn subdivide<F>(&self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, sink: &mut F) -> Result<()>
    where
        F: FnMut(&VsOutput, &VsOutput, &VsOutput) -> Result<()>,
    {
        let levels = self.states.subdivision_levels.min(MAX_SUBDIVISION_LEVELS);
        match self.states.subdivision_mode {
            SubdivisionMode::None => sink(v0, v1, v2),
            SubdivisionMode::Simple | SubdivisionMode::Smooth => self.split(v0, v1, v2, levels, sink),
            SubdivisionMode::Adaptive => self.adaptive(v0, v1, v2, levels, sink),
        }
    }

    fn midpoint(&self, a: &VsOutput, b: &VsOutput, smooth: bool) -> VsOutput {
        let mut input = a.input.lerp(&b.input, 0.5);
        if smooth {
            let pr = self.states.subdivision_position_register.min(MAX_VS_INPUTS - 1);
            let nr = self.states.subdivision_normal_register.min(MAX_VS_INPUTS - 1);
            let (pa, pb) = (a.input.registers[pr], b.input.registers[pr]);
            let (na, nb) = (a.input.registers[nr], b.input.registers[nr]);
            let (p, n) = smooth_midpoint(pa.xyz(), na.xyz().normalize(), pb.xyz(), nb.xyz().normalize());
            input.registers[pr] = Vec4::from_vec3(p, input.registers[pr].w);
            input.registers[nr] = Vec4::from_vec3(n, input.registers[nr].w);
        }
        shade_vertex(self.shader, &input)
    }

    /// 1 -> 4 split, `levels` deep
    fn split<F>(&self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, levels: u32, sink: &mut F) -> Result<()>
    where
        F: FnMut(&VsOutput, &VsOutput, &VsOutput) -> Result<()>,
    {
        if levels == 0 {
            return sink(v0, v1, v2);
        }
        let smooth = self.states.subdivision_mode == SubdivisionMode::Smooth;
        let m01 = self.midpoint(v0, v1, smooth);
        let m12 = self.midpoint(v1, v2, smooth);
        let m20 = self.midpoint(v2, v0, smooth);

        self.split(v0, &m01, &m20, levels - 1, sink)?;
        self.split(&m01, v1, &m12, levels - 1, sink)?;
        self.split(&m20, &m12, v2, levels - 1, sink)?;
        self.split(&m01, &m12, &m20, levels - 1, sink)
    }

    /// Interior vertices of edge a -> b after `levels` midpoint splits, in order
    fn split_edge(&self, a: &VsOutput, b: &VsOutput, levels: u32, out: &mut Vec<VsOutput>) {
        if levels == 0 {
            return;
        }
        let mid = self.midpoint(a, b, false);
        self.split_edge(a, &mid, levels - 1, out);
        out.push(mid);
        self.split_edge(&mid, b, levels - 1, out);
    }

    fn adaptive<F>(&self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, edge_levels: u32, sink: &mut F) -> Result<()>
    where
        F: FnMut(&VsOutput, &VsOutput, &VsOutput) -> Result<()>,
    {
        let center = shade_vertex(self.shader, &VsInput::average3(&v0.input, &v1.input, &v2.input));

        let mut chain = Vec::with_capacity((1usize << edge_levels) + 1);
        for (a, b) in [(v0, v1), (v1, v2), (v2, v0)] {
            chain.clear();
            chain.push(*a);
            self.split_edge(a, b, edge_levels, &mut chain);
            chain.push(*b);
            for pair in chain.windows(2) {
                self.refine(&pair[0], &pair[1], &center, 0, sink)?;
            }
        }
        Ok(())
    }

    /// Split while the projected area is above the threshold
    fn refine<F>(&self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput, level: u32, sink: &mut F) -> Result<()>
    where
        F: FnMut(&VsOutput, &VsOutput, &VsOutput) -> Result<()>,
    {
        let max_level = self.states.subdivision_max_inner_levels.min(MAX_SUBDIVISION_LEVELS);
        if level >= max_level || projected_area(v0, v1, v2, self.viewport) <= self.states.subdivision_max_screen_area {
            return sink(v0, v1, v2);
        }
        let m01 = self.midpoint(v0, v1, false);
        let m12 = self.midpoint(v1, v2, false);
        let m20 = self.midpoint(v2, v0, false);

        self.refine(v0, &m01, &m20, level + 1, sink)?;
        self.refine(&m01, v1, &m12, level + 1, sink)?;
        self.refine(&m20, &m12, v2, level + 1, sink)?;
        self.refine(&m01, &m12, &m20, level + 1, sink)
    }
}

/// Registers consumed by smooth/adaptive subdivision must exist
pub fn validate_registers(states: &RenderStates) -> bool {
    states.subdivision_position_register < MAX_VS_INPUTS
        && states.subdivision_normal_register < MAX_VS_INPUTS
        && states.subdivision_position_register != states.subdivision_normal_register
}
