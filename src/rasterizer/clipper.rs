//! Sutherland-Hodgman polygon clipping.
//!
//! A triangle is clipped plane by plane; vertices created on the way live in
//! a fixed-capacity pool and polygons are lists of pool indices. The
//! surviving convex polygon is fan-triangulated from its first vertex.

use super::error::{Error, Result};
use super::math::{Plane, Vec4};
use super::shader::{RegisterLayout, VsOutput};
use super::types::{Rect, MAX_CLIP_PLANES};

/// Clip volume (D3D convention): -w <= x <= w, -w <= y <= w, 0 <= z <= w
pub const FRUSTUM_PLANES: [Plane; 6] = [
    Plane { a: 1.0, b: 0.0, c: 0.0, d: 1.0 },  // left
    Plane { a: -1.0, b: 0.0, c: 0.0, d: 1.0 }, // right
    Plane { a: 0.0, b: 1.0, c: 0.0, d: 1.0 },  // bottom
    Plane { a: 0.0, b: -1.0, c: 0.0, d: 1.0 }, // top
    Plane { a: 0.0, b: 0.0, c: 1.0, d: 0.0 },  // near
    Plane { a: 0.0, b: 0.0, c: -1.0, d: 1.0 }, // far
];

/// Worst case: the source triangle plus two new vertices per plane
pub const CLIP_POOL_CAPACITY: usize = 3 + 2 * MAX_CLIP_PLANES;

/// Screen-space planes bounding a scissor rectangle
pub fn scissor_planes(rect: Rect) -> [Plane; 4] {
    [
        Plane::new(1.0, 0.0, 0.0, -(rect.left as f32)),
        Plane::new(-1.0, 0.0, 0.0, rect.right as f32),
        Plane::new(0.0, 1.0, 0.0, -(rect.top as f32)),
        Plane::new(0.0, -1.0, 0.0, rect.bottom as f32),
    ]
}

/// Arena for vertices produced while clipping one triangle
#[derive(Debug)]
pub struct ClipVertexPool {
    vertices: Vec<VsOutput>,
    capacity: usize,
}

impl Default for ClipVertexPool {
    fn default() -> Self {
        Self::new(CLIP_POOL_CAPACITY)
    }
}

impl ClipVertexPool {
    pub fn new(capacity: usize) -> Self {
        Self { vertices: Vec::with_capacity(capacity), capacity }
    }

    pub fn reset(&mut self) {
        self.vertices.clear();
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn push(&mut self, v: VsOutput) -> Result<usize> {
        if self.vertices.len() >= self.capacity {
            return Err(Error::OutOfMemory("clip vertex pool exhausted"));
        }
        self.vertices.push(v);
        Ok(self.vertices.len() - 1)
    }

    pub fn get(&self, i: usize) -> &VsOutput {
        &self.vertices[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut VsOutput {
        &mut self.vertices[i]
    }
}

#[inline]
fn signed_distance(plane: &Plane, position: Vec4, homogeneous: bool) -> f32 {
    if homogeneous {
        plane.distance_homogeneous(position)
    } else {
        plane.distance(position.xyz())
    }
}

/// Clip `polygon` (pool indices, convex, ordered) against one plane into
/// `out`. `homogeneous` tests all four position components; otherwise the
/// screen-space xyz is tested.
pub fn clip_to_plane(
    pool: &mut ClipVertexPool,
    polygon: &[usize],
    plane: &Plane,
    homogeneous: bool,
    layout: &RegisterLayout,
    out: &mut Vec<usize>,
) -> Result<()> {
    out.clear();
    let n = polygon.len();
    if n == 0 {
        return Ok(());
    }

    let mut prev = polygon[n - 1];
    let mut d_prev = signed_distance(plane, pool.get(prev).position, homogeneous);
    for &curr in polygon {
        let d_curr = signed_distance(plane, pool.get(curr).position, homogeneous);

        // Edge prev -> curr crosses the plane
        if (d_prev > 0.0 && d_curr < 0.0) || (d_prev < 0.0 && d_curr > 0.0) {
            let t = d_prev / (d_prev - d_curr);
            let a = pool.get(prev);
            let b = pool.get(curr);
            let v = VsOutput {
                position: a.position.lerp(b.position, t),
                registers: layout.lerp(&a.registers, &b.registers, t),
                input: a.input.lerp(&b.input, t),
            };
            out.push(pool.push(v)?);
        }
        if d_curr >= 0.0 {
            out.push(curr);
        }

        prev = curr;
        d_prev = d_curr;
    }
    Ok(())
}

/// Clips one triangle through a sequence of plane sets
#[derive(Debug, Default)]
pub struct Clipper {
    pub pool: ClipVertexPool,
    polygon: Vec<usize>,
    scratch: Vec<usize>,
}

impl Clipper {
    pub fn new() -> Self {
        Self {
            pool: ClipVertexPool::default(),
            polygon: Vec::with_capacity(CLIP_POOL_CAPACITY),
            scratch: Vec::with_capacity(CLIP_POOL_CAPACITY),
        }
    }

    /// Start a new triangle
    pub fn begin(&mut self, v0: &VsOutput, v1: &VsOutput, v2: &VsOutput) -> Result<()> {
        self.pool.reset();
        self.polygon.clear();
        for v in [v0, v1, v2] {
            let i = self.pool.push(*v)?;
            self.polygon.push(i);
        }
        Ok(())
    }

    /// Clip the current polygon; false once it has been rejected
    pub fn clip(&mut self, planes: &[Plane], homogeneous: bool, layout: &RegisterLayout) -> Result<bool> {
        for plane in planes {
            if self.polygon.len() < 3 {
                break;
            }
            clip_to_plane(&mut self.pool, &self.polygon, plane, homogeneous, layout, &mut self.scratch)?;
            std::mem::swap(&mut self.polygon, &mut self.scratch);
        }
        Ok(self.polygon.len() >= 3)
    }

    pub fn polygon(&self) -> &[usize] {
        &self.polygon
    }

    /// Triangles of the fan around the first polygon vertex
    pub fn fan(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        let p = &self.polygon;
        (1..p.len().saturating_sub(1)).map(move |i| [p[0], p[i], p[i + 1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::shader::RegisterType;

    fn vertex(x: f32, y: f32, z: f32, w: f32, r: f32) -> VsOutput {
        let mut v = VsOutput { position: Vec4::new(x, y, z, w), ..Default::default() };
        v.registers[0] = Vec4::new(r, 0.0, 0.0, 0.0);
        v
    }

    fn layout() -> RegisterLayout {
        let mut l = RegisterLayout::default();
        l.types[0] = RegisterType::Float;
        l
    }

    #[test]
    fn test_inside_polygon_unchanged() {
        let mut c = Clipper::new();
        c.begin(&vertex(0.0, 0.0, 0.5, 1.0, 0.0), &vertex(0.5, 0.0, 0.5, 1.0, 0.0), &vertex(0.0, 0.5, 0.5, 1.0, 0.0))
            .unwrap();
        assert!(c.clip(&FRUSTUM_PLANES, true, &layout()).unwrap());
        assert_eq!(c.polygon(), &[0, 1, 2]);
        assert_eq!(c.pool.len(), 3);
    }

    #[test]
    fn test_outside_polygon_rejected() {
        let mut c = Clipper::new();
        c.begin(&vertex(2.0, 0.0, 0.5, 1.0, 0.0), &vertex(3.0, 0.0, 0.5, 1.0, 0.0), &vertex(2.0, 0.5, 0.5, 1.0, 0.0))
            .unwrap();
        assert!(!c.clip(&FRUSTUM_PLANES, true, &layout()).unwrap());
        assert_eq!(c.fan().count(), 0);
    }

    #[test]
    fn test_single_plane_adds_at_most_one_vertex() {
        let mut pool = ClipVertexPool::default();
        let a = pool.push(vertex(-1.0, 0.0, 0.0, 1.0, 0.0)).unwrap();
        let b = pool.push(vertex(1.0, 0.0, 0.0, 1.0, 2.0)).unwrap();
        let c = pool.push(vertex(1.0, 1.0, 0.0, 1.0, 2.0)).unwrap();
        // keep x >= 0
        let plane = Plane::new(1.0, 0.0, 0.0, 0.0);
        let mut out = Vec::new();
        clip_to_plane(&mut pool, &[a, b, c], &plane, false, &layout(), &mut out).unwrap();
        assert_eq!(out.len(), 4);
        // first intersection on edge c -> a at x = 0, register halfway
        let first = pool.get(out[0]);
        assert!(first.position.x.abs() < 1e-6);
        assert!((first.registers[0].x - 1.0).abs() < 1e-6);
        assert!(out.len() <= 3 + 1);
    }

    #[test]
    fn test_near_plane_clip_fans() {
        let mut c = Clipper::new();
        // one vertex behind the near plane -> quad -> two triangles
        c.begin(&vertex(0.0, 0.0, -0.5, 1.0, 0.0), &vertex(0.5, 0.0, 0.5, 1.0, 0.0), &vertex(0.0, 0.5, 0.5, 1.0, 0.0))
            .unwrap();
        assert!(c.clip(&FRUSTUM_PLANES, true, &layout()).unwrap());
        assert_eq!(c.polygon().len(), 4);
        assert_eq!(c.fan().count(), 2);
        for &i in c.polygon() {
            assert!(c.pool.get(i).position.z >= -1e-6);
        }
    }

    #[test]
    fn test_pool_capacity_is_explicit() {
        let mut pool = ClipVertexPool::new(1);
        pool.push(VsOutput::default()).unwrap();
        assert!(matches!(pool.push(VsOutput::default()), Err(Error::OutOfMemory(_))));
    }

    #[test]
    fn test_scissor_planes_bound_rect() {
        let planes = scissor_planes(Rect::new(10, 20, 30, 40));
        let inside = Vec4::new(15.0, 25.0, 0.0, 1.0);
        let outside = Vec4::new(5.0, 25.0, 0.0, 1.0);
        assert!(planes.iter().all(|p| p.distance(inside.xyz()) >= 0.0));
        assert!(planes.iter().any(|p| p.distance(outside.xyz()) < 0.0));
    }
}
