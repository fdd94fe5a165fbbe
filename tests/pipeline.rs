//! End-to-end draws through the device

use std::rc::Rc;

use softpipe::rasterizer::{
    CompareFunc, CullMode, Device, ElementType, Error, FillMode, Format, IndexBuffer, Plane, PixelContext,
    PixelShader, PixelShaderOutput, PrimitiveType, RegisterType, Registers, RenderTarget, Surface, Texture,
    TextureResource, Vec4, VertexBuffer, VertexElement, VertexFormat, VertexShader, Viewport, VsInput,
};

/// position = input 0, output 0 = input 1
struct Passthrough;

impl VertexShader for Passthrough {
    fn execute(&self, input: &VsInput, position: &mut Vec4, output: &mut Registers) {
        *position = input.registers[0];
        output[0] = input.registers[1];
    }

    fn output_register_type(&self, register: usize) -> RegisterType {
        if register == 0 { RegisterType::Vec4 } else { RegisterType::Unused }
    }
}

/// Constant white, constant depth
struct WhiteAtDepth(f32);

impl PixelShader for WhiteAtDepth {
    fn execute(&self, _ctx: &PixelContext<'_, '_>, _input: &Registers, color: &mut Vec4, depth: &mut f32) -> bool {
        *color = Vec4::ONE;
        *depth = self.0;
        true
    }

    fn output_kind(&self) -> PixelShaderOutput {
        PixelShaderOutput::ColorAndDepth
    }

    fn might_kill_pixels(&self) -> bool {
        false
    }
}

/// Writes the interpolated register 0
struct Interpolated;

impl PixelShader for Interpolated {
    fn execute(&self, _ctx: &PixelContext<'_, '_>, input: &Registers, color: &mut Vec4, _depth: &mut f32) -> bool {
        *color = input[0];
        true
    }
}

/// Samples unit 0 at register 0 without gradients
struct Textured;

impl PixelShader for Textured {
    fn execute(&self, ctx: &PixelContext<'_, '_>, input: &Registers, color: &mut Vec4, _depth: &mut f32) -> bool {
        match ctx.sample(0, input[0], None) {
            Ok(c) => {
                *color = c;
                true
            }
            Err(_) => false,
        }
    }
}

/// Kills the left half of a 100 pixel wide target
struct KillLeft;

impl PixelShader for KillLeft {
    fn execute(&self, ctx: &PixelContext<'_, '_>, _input: &Registers, color: &mut Vec4, _depth: &mut f32) -> bool {
        *color = Vec4::ONE;
        ctx.x >= 50
    }
}

struct Target {
    color: Rc<Surface>,
    depth: Rc<Surface>,
}

fn setup(size: u32) -> (Device, Target) {
    let mut device = Device::new();
    let color = Rc::new(Surface::new(size, size, Format::R32G32B32A32F).unwrap());
    let depth = Rc::new(Surface::new(size, size, Format::R32F).unwrap());
    device.set_render_target(Some(RenderTarget::new(Some(color.clone()), Some(depth.clone()))));
    device.clear(Vec4::new(0.0, 0.0, 0.0, 1.0)).unwrap();
    device.clear_depth(1.0).unwrap();
    device.set_vertex_format(Some(Rc::new(
        VertexFormat::new(&[
            VertexElement::new(0, ElementType::Float4, 0),
            VertexElement::new(0, ElementType::Float4, 1),
        ])
        .unwrap(),
    )));
    device.set_vertex_shader(Some(Rc::new(Passthrough)));
    (device, Target { color, depth })
}

/// (clip position, register 0) pairs
fn bind_vertices(device: &mut Device, vertices: &[([f32; 4], [f32; 4])]) {
    let data: Vec<f32> = vertices.iter().flat_map(|(p, r)| p.iter().chain(r.iter()).copied()).collect();
    let vb = Rc::new(VertexBuffer::from_pod(&data).unwrap());
    device.set_vertex_stream(0, Some(vb), 0, 32).unwrap();
}

/// Fan over the full clip square at depth z, register 0 = uv
fn bind_quad(device: &mut Device, z: f32) {
    bind_vertices(
        device,
        &[
            ([-1.0, -1.0, z, 1.0], [0.0, 1.0, 0.0, 0.0]),
            ([-1.0, 1.0, z, 1.0], [0.0, 0.0, 0.0, 0.0]),
            ([1.0, 1.0, z, 1.0], [1.0, 0.0, 0.0, 0.0]),
            ([1.0, -1.0, z, 1.0], [1.0, 1.0, 0.0, 0.0]),
        ],
    );
}

fn count_pixels(surface: &Surface, color: Vec4) -> usize {
    let mut n = 0;
    for y in 0..surface.height() {
        for x in 0..surface.width() {
            if surface.pixel(x, y).unwrap() == color {
                n += 1;
            }
        }
    }
    n
}

#[test]
fn test_quad_fills_color_and_depth() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.25))));
    device.render_states_mut().depth_func = CompareFunc::Always;

    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    assert_eq!(device.render_info().rendered_pixels, 100 * 100);
    assert_eq!(count_pixels(&target.color, Vec4::ONE), 100 * 100);
    let depth = target.depth.read().unwrap();
    assert!(depth.iter().all(|d| *d == 0.25));
}

#[test]
fn test_interpolation_is_perspective_correct() {
    let (mut device, target) = setup(64);
    device.render_states_mut().cull_mode = CullMode::None;
    device.set_pixel_shader(Some(Rc::new(Interpolated)));

    let ndc = [[-0.8f32, -0.8], [-0.8, 0.8], [0.8, 0.8]];
    let w = [1.0f32, 4.0, 2.0];
    let a = [0.0f32, 1.0, 0.5];
    let vertices: Vec<([f32; 4], [f32; 4])> = (0..3)
        .map(|i| ([ndc[i][0] * w[i], ndc[i][1] * w[i], 0.5 * w[i], w[i]], [a[i], 0.0, 0.0, 1.0]))
        .collect();
    bind_vertices(&mut device, &vertices);
    device.draw_primitive(PrimitiveType::TriangleList, 0, 1).unwrap();

    // screen-space barycentrics of the pixel center, then undo the perspective
    let screen: Vec<(f32, f32)> = ndc.iter().map(|p| ((p[0] + 1.0) * 32.0, (1.0 - p[1]) * 32.0)).collect();
    let (px, py) = (20.5f32, 30.5f32);
    let area = |a: (f32, f32), b: (f32, f32), c: (f32, f32)| (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0);
    let total = area(screen[0], screen[1], screen[2]);
    let l0 = area((px, py), screen[1], screen[2]) / total;
    let l1 = area(screen[0], (px, py), screen[2]) / total;
    let l2 = 1.0 - l0 - l1;
    let num = l0 * a[0] / w[0] + l1 * a[1] / w[1] + l2 * a[2] / w[2];
    let den = l0 / w[0] + l1 / w[1] + l2 / w[2];
    let expected = num / den;

    let got = target.color.pixel(20, 30).unwrap();
    assert!((got.x - expected).abs() < 1e-4, "got {} expected {}", got.x, expected);
    // and it is not the affine (screen-linear) value
    let affine = l0 * a[0] + l1 * a[1] + l2 * a[2];
    assert!((got.x - affine).abs() > 1e-2);
}

#[test]
fn test_depth_test_keeps_nearest() {
    let (mut device, target) = setup(32);
    device.set_pixel_shader(Some(Rc::new(Interpolated)));
    let red = [1.0, 0.0, 0.0, 1.0];
    let blue = [0.0, 0.0, 1.0, 1.0];
    let quad = |z: f32, c: [f32; 4]| {
        vec![
            ([-1.0, -1.0, z, 1.0], c),
            ([-1.0, 1.0, z, 1.0], c),
            ([1.0, 1.0, z, 1.0], c),
            ([1.0, -1.0, z, 1.0], c),
        ]
    };

    bind_vertices(&mut device, &quad(0.2, red));
    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();
    bind_vertices(&mut device, &quad(0.6, blue));
    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    assert_eq!(count_pixels(&target.color, Vec4::new(1.0, 0.0, 0.0, 1.0)), 32 * 32);
    assert_eq!(device.render_info().rendered_pixels, 32 * 32);
}

#[test]
fn test_user_clip_plane_cuts_half() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));
    // keep x >= 0
    device.set_clip_plane(0, Some(Plane::new(1.0, 0.0, 0.0, 0.0))).unwrap();

    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    assert_eq!(count_pixels(&target.color, Vec4::ONE), 50 * 100);
    assert_eq!(target.color.pixel(49, 10).unwrap(), Vec4::new(0.0, 0.0, 0.0, 1.0));
    assert_eq!(target.color.pixel(50, 10).unwrap(), Vec4::ONE);
}

#[test]
fn test_near_plane_clipping() {
    let (mut device, target) = setup(64);
    device.render_states_mut().cull_mode = CullMode::None;
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));
    // one vertex behind the eye
    bind_vertices(
        &mut device,
        &[
            ([0.0, 0.0, -1.0, 0.5], [0.0; 4]),
            ([-0.5, 0.5, 0.5, 1.0], [0.0; 4]),
            ([0.5, 0.5, 0.5, 1.0], [0.0; 4]),
        ],
    );
    device.draw_primitive(PrimitiveType::TriangleList, 0, 1).unwrap();
    let covered = count_pixels(&target.color, Vec4::ONE);
    assert!(covered > 0 && covered < 64 * 64);
    assert!(!target.color.is_locked());
}

#[test]
fn test_strip_winding_and_culling() {
    let (mut device, target) = setup(100);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));
    bind_vertices(
        &mut device,
        &[
            ([-1.0, -1.0, 0.5, 1.0], [0.0; 4]),
            ([-1.0, 1.0, 0.5, 1.0], [0.0; 4]),
            ([1.0, -1.0, 0.5, 1.0], [0.0; 4]),
            ([1.0, 1.0, 0.5, 1.0], [0.0; 4]),
        ],
    );

    device.render_states_mut().cull_mode = CullMode::Cw;
    device.draw_primitive(PrimitiveType::TriangleStrip, 0, 2).unwrap();
    assert_eq!(device.render_info().rendered_pixels, 0);

    device.render_states_mut().cull_mode = CullMode::Ccw;
    device.draw_primitive(PrimitiveType::TriangleStrip, 0, 2).unwrap();
    assert_eq!(device.render_info().rendered_pixels, 100 * 100);
    assert_eq!(count_pixels(&target.color, Vec4::ONE), 100 * 100);
}

#[test]
fn test_indexed_draw_and_recovery() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));

    device.set_index_buffer(Some(Rc::new(IndexBuffer::from_u16(&[0, 1, 2, 0, 2, 7]).unwrap())));
    let err = device.draw_indexed_primitive(PrimitiveType::TriangleList, 0, 0, 2);
    assert!(matches!(err, Err(Error::InvalidState(_))));

    device.set_index_buffer(Some(Rc::new(IndexBuffer::from_u32(&[10, 11, 12, 10, 12, 13]).unwrap())));
    device.reset_render_info();
    device.draw_indexed_primitive(PrimitiveType::TriangleList, -10, 0, 2).unwrap();
    assert_eq!(device.render_info().rendered_pixels, 100 * 100);
    assert_eq!(count_pixels(&target.color, Vec4::ONE), 100 * 100);
}

#[test]
fn test_wireframe_draws_edges_only() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));
    device.render_states_mut().fill_mode = FillMode::Wireframe;

    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    let covered = count_pixels(&target.color, Vec4::ONE);
    assert!(covered > 0 && covered < 100 * 100 / 4);
    // on the shared diagonal
    assert_eq!(target.color.pixel(49, 50).unwrap(), Vec4::ONE);
    // interior
    assert_eq!(target.color.pixel(20, 40).unwrap(), Vec4::new(0.0, 0.0, 0.0, 1.0));
}

#[test]
fn test_point_sampled_texture() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(Textured)));

    let texture = Rc::new(Texture::new(2, 2, 1, Format::R32G32B32A32F).unwrap());
    {
        let level = texture.level(0).unwrap();
        let mut data = level.lock().unwrap();
        data.copy_from_slice(&[
            1.0, 0.0, 0.0, 1.0, // (0, 0) red
            0.0, 1.0, 0.0, 1.0, // (1, 0) green
            0.0, 0.0, 1.0, 1.0, // (0, 1) blue
            1.0, 1.0, 1.0, 1.0, // (1, 1) white
        ]);
    }
    device.set_texture(0, Some(TextureResource::from(texture))).unwrap();
    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    let c = &target.color;
    assert_eq!(c.pixel(25, 25).unwrap(), Vec4::new(1.0, 0.0, 0.0, 1.0));
    assert_eq!(c.pixel(75, 25).unwrap(), Vec4::new(0.0, 1.0, 0.0, 1.0));
    assert_eq!(c.pixel(25, 75).unwrap(), Vec4::new(0.0, 0.0, 1.0, 1.0));
    assert_eq!(c.pixel(75, 75).unwrap(), Vec4::ONE);
}

#[test]
fn test_viewport_limits_output() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));
    if let Some(rt) = device.render_target_mut() {
        rt.set_viewport(Viewport::new(25, 25, 50, 50));
    }

    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    assert_eq!(count_pixels(&target.color, Vec4::ONE), 50 * 50);
    assert_eq!(target.color.pixel(10, 10).unwrap(), Vec4::new(0.0, 0.0, 0.0, 1.0));
    assert_eq!(target.color.pixel(50, 50).unwrap(), Vec4::ONE);
}

#[test]
fn test_viewport_outside_target_rejected() {
    let (mut device, _target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(WhiteAtDepth(0.5))));
    if let Some(rt) = device.render_target_mut() {
        rt.set_viewport(Viewport::new(60, 0, 50, 50));
    }
    assert!(matches!(
        device.draw_primitive(PrimitiveType::TriangleFan, 0, 2),
        Err(Error::InvalidParameters(_))
    ));
}

#[test]
fn test_killed_pixels_are_not_written() {
    let (mut device, target) = setup(100);
    bind_quad(&mut device, 0.5);
    device.set_pixel_shader(Some(Rc::new(KillLeft)));

    device.draw_primitive(PrimitiveType::TriangleFan, 0, 2).unwrap();

    assert_eq!(device.render_info().rendered_pixels, 50 * 100);
    assert_eq!(count_pixels(&target.color, Vec4::ONE), 50 * 100);
    // depth untouched where killed
    assert_eq!(target.depth.pixel(10, 10).unwrap().x, 1.0);
    assert_eq!(target.depth.pixel(90, 10).unwrap().x, 0.5);
}
