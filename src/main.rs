//! softpipe viewer: a spinning textured cube rendered through the software
//! pipeline and blitted into a macroquad window.
//!
//! Keys: W wireframe, S subdivision mode, C cull mode, F texture filtering,
//! P save a PNG, F5/F9 save/load render states.

use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use log::{error, info};
use macroquad::prelude::*;

use softpipe::rasterizer::config::{load_states, save_states, States};
use softpipe::rasterizer::present::Framebuffer;
use softpipe::rasterizer::{
    describe, CullMode, Device, ElementType, FillMode, Format, IndexBuffer, Mat4, MipFilter, PixelContext,
    PixelShader, PrimitiveType, RegisterType, Registers, RenderTarget, SubdivisionMode, Surface, Texture,
    TextureFilter, TextureResource, Vec3, Vec4, VertexBuffer, VertexElement, VertexFormat, VertexShader, VsInput,
};
use softpipe::VERSION;

/// Internal render resolution
const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

const STATES_PATH: &str = "softpipe_states.ron";
const SCREENSHOT_PATH: &str = "softpipe.png";

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CubeVertex {
    position: [f32; 3],
    uv: [f32; 2],
    normal: [f32; 3],
}

/// Transforms to clip space; outputs uv (r0) and a diffuse term (r1)
struct CubeShader {
    world: Cell<Mat4>,
    world_view_proj: Cell<Mat4>,
}

impl VertexShader for CubeShader {
    fn execute(&self, input: &VsInput, position: &mut Vec4, output: &mut Registers) {
        *position = self.world_view_proj.get().transform(input.registers[0]);
        output[0] = input.registers[1];

        let normal = self.world.get().transform(Vec4::from_vec3(input.registers[2].xyz(), 0.0)).xyz().normalize();
        let light = Vec3::new(-0.4, 0.7, -0.6).normalize();
        output[1].x = normal.dot(light).max(0.0) * 0.8 + 0.2;
    }

    fn output_register_type(&self, register: usize) -> RegisterType {
        match register {
            0 => RegisterType::Vec2,
            1 => RegisterType::Float,
            _ => RegisterType::Unused,
        }
    }
}

/// Texture (unit 0) modulated by the diffuse term
struct TexturedShader;

impl PixelShader for TexturedShader {
    fn execute(&self, ctx: &PixelContext<'_, '_>, input: &Registers, color: &mut Vec4, _depth: &mut f32) -> bool {
        let Ok(texel) = ctx.sample_register(0, 0, input[0]) else {
            return false;
        };
        *color = texel * input[1].x;
        color.w = 1.0;
        true
    }
}

/// 24 vertices / 36 indices, faces clockwise when seen from outside
fn cube_geometry() -> (Vec<CubeVertex>, Vec<u16>) {
    let normals = [
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, -1.0),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for n in normals {
        let v = if n.y != 0.0 { Vec3::new(0.0, 0.0, 1.0) } else { Vec3::new(0.0, 1.0, 0.0) };
        let u = n.cross(v);
        let base = vertices.len() as u16;
        for (su, sv, uv) in [(-1.0, -1.0, [0.0, 1.0]), (-1.0, 1.0, [0.0, 0.0]), (1.0, 1.0, [1.0, 0.0]), (1.0, -1.0, [1.0, 1.0])] {
            let p = n + u * su + v * sv;
            vertices.push(CubeVertex { position: [p.x, p.y, p.z], uv, normal: [n.x, n.y, n.z] });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Checkerboard with a full mip chain
fn checker_texture() -> softpipe::rasterizer::Result<Texture> {
    let texture = Texture::new(64, 64, 0, Format::R32G32B32A32F)?;
    if let Some(level0) = texture.level(0) {
        let mut data = level0.lock()?;
        for (i, px) in data.chunks_exact_mut(4).enumerate() {
            let (x, y) = (i % 64, i / 64);
            let c = if (x / 8 + y / 8) % 2 == 0 { [0.9, 0.75, 0.4, 1.0] } else { [0.25, 0.2, 0.35, 1.0] };
            px.copy_from_slice(&c);
        }
    }
    texture.generate_mip_sub_levels(0)?;
    Ok(texture)
}

struct Viewer {
    device: Device,
    shader: Rc<CubeShader>,
    color: Rc<Surface>,
    framebuffer: Framebuffer,
}

impl Viewer {
    fn new(texture_path: Option<&Path>) -> softpipe::rasterizer::Result<Self> {
        let mut device = Device::new();

        let color = Rc::new(Surface::new(WIDTH, HEIGHT, Format::R32G32B32A32F)?);
        let depth = Rc::new(Surface::new(WIDTH, HEIGHT, Format::R32F)?);
        device.set_render_target(Some(RenderTarget::new(Some(color.clone()), Some(depth))));

        let (vertices, indices) = cube_geometry();
        let stride = std::mem::size_of::<CubeVertex>();
        device.set_vertex_stream(0, Some(Rc::new(VertexBuffer::from_pod(&vertices)?)), 0, stride)?;
        device.set_index_buffer(Some(Rc::new(IndexBuffer::from_u16(&indices)?)));
        device.set_vertex_format(Some(Rc::new(VertexFormat::new(&[
            VertexElement::new(0, ElementType::Float3, 0),
            VertexElement::new(0, ElementType::Float2, 1),
            VertexElement::new(0, ElementType::Float3, 2),
        ])?)));

        let texture = match texture_path {
            Some(path) => Texture::load(path, 0, Format::R32G32B32A32F)?,
            None => checker_texture()?,
        };
        let texture = TextureResource::from(Rc::new(texture));
        describe(&texture);
        device.set_texture(0, Some(texture))?;
        let mut sampler = *device.sampler_states(0)?;
        sampler.mip_filter = MipFilter::Linear;
        device.set_sampler_states(0, sampler)?;

        let shader = Rc::new(CubeShader { world: Cell::new(Mat4::IDENTITY), world_view_proj: Cell::new(Mat4::IDENTITY) });
        device.set_vertex_shader(Some(shader.clone()));
        device.set_pixel_shader(Some(Rc::new(TexturedShader)));

        Ok(Self { device, shader, color, framebuffer: Framebuffer::new(WIDTH as usize, HEIGHT as usize) })
    }

    fn handle_input(&mut self) -> softpipe::rasterizer::Result<()> {
        let states = self.device.render_states_mut();
        if is_key_pressed(KeyCode::W) {
            states.fill_mode = match states.fill_mode {
                FillMode::Solid => FillMode::Wireframe,
                FillMode::Wireframe => FillMode::Solid,
            };
        }
        if is_key_pressed(KeyCode::S) {
            states.subdivision_mode = match states.subdivision_mode {
                SubdivisionMode::None => SubdivisionMode::Simple,
                SubdivisionMode::Simple => SubdivisionMode::Adaptive,
                SubdivisionMode::Adaptive | SubdivisionMode::Smooth => SubdivisionMode::None,
            };
            states.subdivision_position_register = 0;
            states.subdivision_normal_register = 2;
            states.subdivision_levels = 2;
            states.subdivision_max_screen_area = 200.0;
            states.subdivision_max_inner_levels = 2;
        }
        if is_key_pressed(KeyCode::C) {
            states.cull_mode = match states.cull_mode {
                CullMode::Ccw => CullMode::Cw,
                CullMode::Cw => CullMode::None,
                CullMode::None => CullMode::Ccw,
            };
        }
        if is_key_pressed(KeyCode::F) {
            let mut sampler = *self.device.sampler_states(0)?;
            let next = match sampler.mag_filter {
                TextureFilter::Point => TextureFilter::Linear,
                TextureFilter::Linear => TextureFilter::Point,
            };
            sampler.mag_filter = next;
            sampler.min_filter = next;
            self.device.set_sampler_states(0, sampler)?;
        }
        if is_key_pressed(KeyCode::P) {
            self.framebuffer.save_png(SCREENSHOT_PATH)?;
            info!("Saved {}", SCREENSHOT_PATH);
        }
        if is_key_pressed(KeyCode::F5) {
            match save_states(&States::from_device(&self.device), STATES_PATH) {
                Ok(()) => info!("Saved states to {}", STATES_PATH),
                Err(e) => error!("Failed to save states: {}", e),
            }
        }
        if is_key_pressed(KeyCode::F9) {
            match load_states(STATES_PATH).and_then(|s| s.apply(&mut self.device)) {
                Ok(()) => {}
                Err(e) => error!("Failed to load states: {}", e),
            }
        }
        Ok(())
    }

    fn render(&mut self, time: f32) -> softpipe::rasterizer::Result<()> {
        let world = Mat4::rotation_y(time)
            .mul(&Mat4::rotation_x(time * 0.7))
            .mul(&Mat4::translation(Vec3::new(0.0, 0.0, 4.0)));
        let proj = Mat4::perspective_fov_lh(std::f32::consts::FRAC_PI_3, WIDTH as f32 / HEIGHT as f32, 0.1, 100.0);
        self.shader.world.set(world);
        self.shader.world_view_proj.set(world.mul(&proj));

        self.device.clear(Vec4::new(0.12, 0.12, 0.14, 1.0))?;
        self.device.clear_depth(1.0)?;
        self.device.reset_render_info();
        self.device.draw_indexed_primitive(PrimitiveType::TriangleList, 0, 0, 12)?;
        self.framebuffer.copy_from_surface(&self.color)
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: format!("softpipe viewer v{}", VERSION),
        window_width: WIDTH as i32 * 3,
        window_height: HEIGHT as i32 * 3,
        window_resizable: true,
        high_dpi: true,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("=== softpipe viewer v{} ===", VERSION);

    let texture_path = std::env::args().nth(1);
    let mut viewer = match Viewer::new(texture_path.as_deref().map(Path::new)) {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to set up the pipeline: {}", e);
            return;
        }
    };

    loop {
        if let Err(e) = viewer.handle_input() {
            error!("{}", e);
        }
        if let Err(e) = viewer.render(get_time() as f32) {
            error!("Frame failed: {}", e);
        }

        clear_background(Color::from_rgba(30, 30, 35, 255));

        // Fit the framebuffer to the window, keeping the aspect ratio
        let fb = &viewer.framebuffer;
        let scale = (screen_width() / fb.width as f32).min(screen_height() / fb.height as f32);
        let (draw_w, draw_h) = (fb.width as f32 * scale, fb.height as f32 * scale);
        let texture = Texture2D::from_rgba8(fb.width as u16, fb.height as u16, &fb.pixels);
        texture.set_filter(FilterMode::Nearest);
        draw_texture_ex(
            &texture,
            (screen_width() - draw_w) * 0.5,
            (screen_height() - draw_h) * 0.5,
            WHITE,
            DrawTextureParams {
                dest_size: Some(macroquad::math::Vec2::new(draw_w, draw_h)),
                ..Default::default()
            },
        );

        let info = viewer.device.render_info();
        let states = viewer.device.render_states();
        draw_text(
            &format!(
                "{} px | {} tris | {:?} {:?} {:?}",
                info.rendered_pixels, info.rendered_triangles, states.fill_mode, states.subdivision_mode, states.cull_mode
            ),
            10.0,
            20.0,
            20.0,
            WHITE,
        );

        next_frame().await;
    }
}
