//! The multipass engine: resource lifecycle, uniform upload and the
//! per-frame render loop.
//!
//! One [`MultipassShader`] drives one display surface. Construction is
//! pure (parse + channel inference, no GPU); `init_gl` builds the shared
//! quad, the noise atlas and the per-pass ping-pong targets once a context
//! is current; `compile_all` turns sources into programs; `render` then
//! runs every frame: adaptive update, optimizer scheduling, buffer passes
//! A through D in order, and the Image pass into the host's framebuffer.
//!
//! Pass cross-references are integer indices resolved once at compile
//! time; the ping-pong discipline is what makes A-reads-B-reads-A cycles
//! well-defined (every producer slot is the previous completed render).

use std::time::{SystemTime, UNIX_EPOCH};

use smallvec::SmallVec;

use crate::adaptive::{AdaptiveConfig, AdaptiveController, AdaptiveStats};
use crate::caps::{CapabilityRegistry, Features};
use crate::channels::{self, ChannelSource};
use crate::error::{Result, ShaderError};
use crate::gpu::{
    BufferId, Capability, FramebufferId, GpuContext, PrimitiveMode, QueryId, TextureFilter,
    TextureFormat, TextureId, TextureWrap, UniformLocation, VertexArrayId,
};
use crate::optimizer::{MultipassOptimizer, OptimizerMode};
use crate::parser;
use crate::pass::{Pass, PassType, UniformLocations, CHANNEL_COUNT, MAX_PASSES};
use crate::rewrite;
use crate::state_cache::{StateCache, StateStats};

/// Noise atlas extent.
const NOISE_SIZE: u32 = 1024;

/// LCG parameters for the noise atlas (numerical recipes constants).
const NOISE_SEED: u32 = 12345;
const LCG_MUL: u32 = 1_664_525;
const LCG_ADD: u32 = 1_013_904_223;

/// Host-facing floor and ceiling for `set_resolution_scale`, independent
/// of the adaptive controller's configured band.
const SCALE_HARD_MIN: f32 = 0.1;
const SCALE_HARD_MAX: f32 = 2.0;

/// Scale changes below this don't trigger a buffer resize.
const SCALE_RESIZE_EPSILON: f32 = 1e-3;

/// The four fullscreen-quad vertices, drawn as a triangle strip.
const QUAD_VERTICES: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

/// Combined per-engine statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub adaptive: AdaptiveStats,
    pub state: StateStats,
    /// Rendered buffer workload over full-quality workload.
    pub workload_ratio: f32,
    pub frame_count: u64,
}

/// Everything gathered from a pass before touching the context, so the
/// draw itself borrows nothing from the pass table.
#[derive(Clone, Copy)]
struct PassDraw {
    program: crate::gpu::ProgramId,
    fbo: Option<FramebufferId>,
    write_texture: Option<TextureId>,
    width: u32,
    height: u32,
    needs_clear: bool,
    needs_mipmaps: bool,
    uniforms: UniformLocations,
    channel_textures: [Option<TextureId>; CHANNEL_COUNT],
    is_buffer: bool,
}

/// A Shadertoy-style multipass shader bound to one display surface.
pub struct MultipassShader {
    common_source: String,
    passes: SmallVec<[Pass; MAX_PASSES]>,
    image_pass_index: Option<usize>,
    is_multipass: bool,

    quad_vao: Option<VertexArrayId>,
    quad_vbo: Option<BufferId>,
    noise_texture: Option<TextureId>,
    default_framebuffer: FramebufferId,

    timer_queries: [Option<QueryId>; 2],
    timer_in_flight: [bool; 2],
    timer_write_slot: usize,
    timer_supported: bool,

    surface_width: u32,
    surface_height: u32,
    resolution_scale: f32,
    scaled_width: u32,
    scaled_height: u32,

    frame_count: u64,
    gl_initialized: bool,
    mouse_pos: (f32, f32),
    last_click_pos: (f32, f32),
    mouse_held: bool,

    adaptive: AdaptiveController,
    optimizer: MultipassOptimizer,
    state: StateCache,
    caps: Option<CapabilityRegistry>,
}

impl MultipassShader {
    /// Parse a source into passes and infer channel bindings. Pure: no GPU
    /// work happens until [`init_gl`](Self::init_gl).
    pub fn new(source: &str) -> Result<Self> {
        let parsed = parser::parse(source)?;

        let mut passes: SmallVec<[Pass; MAX_PASSES]> = parsed
            .passes
            .iter()
            .map(|p| Pass::new(p.pass_type, p.name.clone(), p.source.clone()))
            .collect();

        for pass in passes.iter_mut() {
            pass.channels = match pass.pass_type {
                PassType::Image => channels::image_channels(),
                t if t.is_buffer() => channels::infer_buffer_channels(&pass.source),
                _ => pass.channels,
            };
        }

        // Last Image-typed pass wins when markers produce several.
        let image_pass_index = passes
            .iter()
            .rposition(|p| p.pass_type == PassType::Image);

        let mut engine = Self {
            common_source: parsed.common_source,
            passes,
            image_pass_index,
            is_multipass: parsed.is_multipass,
            quad_vao: None,
            quad_vbo: None,
            noise_texture: None,
            default_framebuffer: FramebufferId(0),
            timer_queries: [None, None],
            timer_in_flight: [false, false],
            timer_write_slot: 0,
            timer_supported: false,
            surface_width: 0,
            surface_height: 0,
            resolution_scale: 1.0,
            scaled_width: 0,
            scaled_height: 0,
            frame_count: 0,
            gl_initialized: false,
            mouse_pos: (-1.0, -1.0),
            last_click_pos: (0.0, 0.0),
            mouse_held: false,
            adaptive: AdaptiveController::default(),
            optimizer: MultipassOptimizer::new(),
            state: StateCache::new(),
            caps: None,
        };
        engine.resolve_channel_producers();
        let sources: Vec<&str> = engine.passes.iter().map(|p| p.source.as_str()).collect();
        engine.optimizer.analyze(&sources);
        Ok(engine)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Create the shared GPU objects and per-pass targets. Call once, with
    /// the context current and the surface size known.
    pub fn init_gl<G: GpuContext>(&mut self, gl: &mut G, width: u32, height: u32) -> Result<()> {
        let caps = CapabilityRegistry::detect(gl);
        self.timer_supported = gl.supports_timer_queries()
            && caps.supports(Features::TIMER_QUERIES)
            && self.adaptive.config().use_gpu_timing;
        if !self.timer_supported {
            log::info!("{}", ShaderError::TimerUnavailable);
        }
        self.caps = Some(caps);

        self.surface_width = width.max(1);
        self.surface_height = height.max(1);
        self.recompute_scaled_size();

        self.default_framebuffer = gl.current_framebuffer_binding();

        // Shared fullscreen quad.
        let vao = gl.create_vertex_array();
        gl.bind_vertex_array(vao);
        let vbo = gl.create_buffer();
        gl.bind_array_buffer(vbo);
        gl.buffer_data(bytemuck::cast_slice(&QUAD_VERTICES));
        gl.vertex_attrib_pointer_f32(0, 2);
        gl.enable_vertex_attrib(0);
        self.quad_vao = Some(vao);
        self.quad_vbo = Some(vbo);

        // Procedural noise atlas.
        let noise = gl.create_texture();
        gl.texture_pixels(
            noise,
            TextureFormat::Rgba8,
            NOISE_SIZE,
            NOISE_SIZE,
            &generate_noise_texels(),
        );
        gl.texture_filter(noise, TextureFilter::Nearest, TextureFilter::Nearest);
        gl.texture_wrap(noise, TextureWrap::Repeat);
        self.noise_texture = Some(noise);

        // Ping-pong targets for every buffer pass.
        for index in 0..self.passes.len() {
            if !self.passes[index].pass_type.is_buffer() {
                if self.passes[index].pass_type == PassType::Image {
                    self.passes[index].width = self.surface_width;
                    self.passes[index].height = self.surface_height;
                }
                continue;
            }
            let (w, h) = self
                .optimizer
                .pass_resolution(index, self.scaled_width, self.scaled_height);
            let fbo = gl.create_framebuffer();
            let mut textures = [None, None];
            for slot in &mut textures {
                let tex = gl.create_texture();
                gl.texture_storage(tex, TextureFormat::Rgba16F, w, h);
                gl.texture_filter(tex, TextureFilter::Linear, TextureFilter::Linear);
                gl.texture_wrap(tex, TextureWrap::ClampToEdge);
                *slot = Some(tex);
            }
            if let Some(tex) = textures[0] {
                gl.framebuffer_color_attachment(fbo, tex);
                if !gl.framebuffer_complete(fbo) {
                    return Err(ShaderError::Resource(format!(
                        "framebuffer incomplete for pass '{}' at {w}x{h}",
                        self.passes[index].name
                    )));
                }
            }
            let pass = &mut self.passes[index];
            pass.fbo = Some(fbo);
            pass.textures = textures;
            pass.width = w;
            pass.height = h;
            pass.needs_clear = true;
        }

        if self.timer_supported {
            self.timer_queries = [Some(gl.create_query()), Some(gl.create_query())];
        }

        self.gl_initialized = true;
        log::debug!(
            "GL initialized: {}x{} surface, {} passes",
            self.surface_width,
            self.surface_height,
            self.passes.len()
        );
        Ok(())
    }

    /// Compile every renderable pass. Returns true when all of them
    /// compiled; failures are recorded per pass and never abort the rest.
    pub fn compile_all<G: GpuContext>(&mut self, gl: &mut G) -> bool {
        for index in 0..self.passes.len() {
            if self.passes[index].pass_type == PassType::Sound {
                continue;
            }
            self.compile_pass(gl, index);
        }

        self.propagate_mipmap_needs(gl);
        self.resolve_channel_producers();

        let sources: Vec<&str> = self.passes.iter().map(|p| p.source.as_str()).collect();
        self.optimizer.analyze(&sources);
        if self.gl_initialized {
            self.apply_pass_extents(gl);
        }

        self.passes
            .iter()
            .filter(|p| p.pass_type != PassType::Sound)
            .all(|p| p.is_ready())
    }

    fn compile_pass<G: GpuContext>(&mut self, gl: &mut G, index: usize) {
        let rewritten_common = rewrite::apply_compat_rewrites(&self.common_source);
        let rewritten = rewrite::apply_compat_rewrites(&self.passes[index].source);
        let fragment = rewrite::wrap_fragment_source(&rewritten_common, &rewritten);

        if let Some(old) = self.passes[index].program.take() {
            self.state.forget_program(old);
            gl.delete_program(old);
        }

        match gl.compile_program(rewrite::FULLSCREEN_VERTEX_SHADER, &fragment) {
            Ok(program) => {
                let uniforms = resolve_uniform_locations(gl, program);
                let pass = &mut self.passes[index];
                pass.program = Some(program);
                pass.compile_error = None;
                pass.uniforms = uniforms;
                pass.needs_mipmaps = crate::scanner::find_pattern(&pass.source, "textureLod").is_some();
            }
            Err(info_log) => {
                let pass = &mut self.passes[index];
                pass.program = None;
                log::warn!(
                    "{}",
                    ShaderError::Compile {
                        pass: pass.name.clone(),
                        log: info_log.clone(),
                    }
                );
                pass.compile_error = Some(info_log);
            }
        }
    }

    /// A buffer needs mipmaps when it uses LOD sampling itself or any
    /// reader of it does. Promoted buffers get a trilinear min filter.
    fn propagate_mipmap_needs<G: GpuContext>(&mut self, gl: &mut G) {
        let mut promoted = [false; MAX_PASSES];
        for (i, pass) in self.passes.iter().enumerate() {
            let mut needs = pass.needs_mipmaps;
            if pass.pass_type.is_buffer() {
                for reader in &self.passes {
                    let reads_me = reader
                        .channels
                        .iter()
                        .any(|c| *c == ChannelSource::Buffer(pass.pass_type));
                    if reads_me && reader.needs_mipmaps {
                        needs = true;
                    }
                }
            }
            promoted[i] = needs;
        }
        for (i, needs) in promoted.iter().enumerate().take(self.passes.len()) {
            let pass = &mut self.passes[i];
            pass.needs_mipmaps = *needs;
            if *needs && pass.pass_type.is_buffer() {
                for tex in pass.textures.into_iter().flatten() {
                    gl.texture_filter(tex, TextureFilter::LinearMipmapLinear, TextureFilter::Linear);
                    gl.generate_mipmaps(tex);
                }
            }
        }
    }

    /// Cache producer pass indices so per-frame channel resolution is a
    /// table lookup.
    fn resolve_channel_producers(&mut self) {
        for index in 0..self.passes.len() {
            for c in 0..CHANNEL_COUNT {
                let wanted = match self.passes[index].channels[c] {
                    ChannelSource::Buffer(t) => Some(t),
                    _ => None,
                };
                self.passes[index].channel_buffer_index[c] = match wanted {
                    Some(t) => {
                        let producer = self.passes.iter().position(|p| p.pass_type == t);
                        if producer.is_none() && self.passes[index].pass_type.is_buffer() {
                            log::warn!(
                                "{}",
                                ShaderError::MissingProducer {
                                    channel: c,
                                    wanted: t
                                }
                            );
                        }
                        producer.map_or(-1, |j| j as i32)
                    }
                    None => -1,
                };
            }
        }
    }

    /// Surface size changed. Buffer extents follow the optimizer at the
    /// new scaled base; textures are respecified in place.
    pub fn resize<G: GpuContext>(&mut self, gl: &mut G, width: u32, height: u32) {
        self.surface_width = width.max(1);
        self.surface_height = height.max(1);
        self.recompute_scaled_size();
        self.apply_pass_extents(gl);
    }

    /// Release every GPU object this engine created.
    pub fn destroy<G: GpuContext>(&mut self, gl: &mut G) {
        for pass in self.passes.iter_mut() {
            if let Some(program) = pass.program.take() {
                self.state.forget_program(program);
                gl.delete_program(program);
            }
            if let Some(fbo) = pass.fbo.take() {
                gl.delete_framebuffer(fbo);
            }
            for tex in &mut pass.textures {
                if let Some(t) = tex.take() {
                    gl.delete_texture(t);
                }
            }
        }
        if let Some(noise) = self.noise_texture.take() {
            gl.delete_texture(noise);
        }
        if let Some(vbo) = self.quad_vbo.take() {
            gl.delete_buffer(vbo);
        }
        if let Some(vao) = self.quad_vao.take() {
            gl.delete_vertex_array(vao);
        }
        for query in &mut self.timer_queries {
            if let Some(q) = query.take() {
                gl.delete_query(q);
            }
        }
        self.timer_in_flight = [false, false];
        self.gl_initialized = false;
        self.state.invalidate();
    }

    /// Re-parse a new source in place, keeping the engine and its GPU
    /// context wiring. Passes come back uncompiled; call
    /// [`compile_all`](Self::compile_all) next.
    pub fn replace_source<G: GpuContext>(&mut self, gl: &mut G, source: &str) -> Result<()> {
        let parsed = parser::parse(source)?;

        let was_initialized = self.gl_initialized;
        self.destroy(gl);

        self.common_source = parsed.common_source;
        self.is_multipass = parsed.is_multipass;
        self.passes = parsed
            .passes
            .iter()
            .map(|p| Pass::new(p.pass_type, p.name.clone(), p.source.clone()))
            .collect();
        for pass in self.passes.iter_mut() {
            pass.channels = match pass.pass_type {
                PassType::Image => channels::image_channels(),
                t if t.is_buffer() => channels::infer_buffer_channels(&pass.source),
                _ => pass.channels,
            };
        }
        self.image_pass_index = self
            .passes
            .iter()
            .rposition(|p| p.pass_type == PassType::Image);
        self.resolve_channel_producers();
        let sources: Vec<&str> = self.passes.iter().map(|p| p.source.as_str()).collect();
        self.optimizer.analyze(&sources);
        self.frame_count = 0;
        self.adaptive.reset();

        if was_initialized {
            self.init_gl(gl, self.surface_width, self.surface_height)?;
        }
        Ok(())
    }

    /// Clear feedback state: every buffer restarts from black, the frame
    /// counter rewinds and the adaptive controller recalibrates.
    pub fn reset(&mut self) {
        for pass in self.passes.iter_mut() {
            if pass.pass_type.is_buffer() {
                pass.needs_clear = true;
                pass.ping_pong_index = 0;
            }
        }
        self.frame_count = 0;
        self.adaptive.reset();
    }

    // ── Per-frame ────────────────────────────────────────────────────────

    /// Render one frame. `time` is the host's monotonic clock in seconds;
    /// mouse coordinates are surface pixels (negative for "unset").
    pub fn render<G: GpuContext>(
        &mut self,
        gl: &mut G,
        time: f32,
        mouse_x: f32,
        mouse_y: f32,
        mouse_click: bool,
    ) {
        if !self.gl_initialized {
            return;
        }

        let timing_this_frame = self.begin_gpu_timing(gl);

        // Adaptive update first; a scale change resizes the buffer chain
        // before anything samples it this frame.
        self.adaptive.update(time as f64);
        if self.adaptive.is_enabled() {
            let scale = self.adaptive.scale();
            if (scale - self.resolution_scale).abs() > SCALE_RESIZE_EPSILON {
                self.resolution_scale = scale;
                self.recompute_scaled_size();
            }
        }
        // Idempotent: only passes whose target extent drifted get touched.
        self.apply_pass_extents(gl);

        self.optimizer.begin_frame(time as f64, mouse_x, mouse_y, mouse_click);
        self.sync_optimizer_mode();

        self.mouse_pos = (mouse_x, mouse_y);
        if mouse_click {
            self.last_click_pos = (mouse_x.max(0.0), mouse_y.max(0.0));
        }
        self.mouse_held = mouse_click;

        // The host may have rebound its surface framebuffer (resize,
        // UI toolkits do this); never trust last frame's answer.
        self.default_framebuffer = gl.current_framebuffer_binding();
        self.state.invalidate_framebuffer();

        self.set_invariant_state(gl);

        if let (Some(vao), Some(vbo)) = (self.quad_vao, self.quad_vbo) {
            self.state.bind_vertex_array(gl, vao);
            self.state.bind_array_buffer(gl, vbo);
            gl.enable_vertex_attrib(0);
        }

        // Buffer passes in A..D order, then every remaining same-type pass
        // in index order, so producers land before the Image consumer.
        for buffer_type in PassType::BUFFERS {
            for index in 0..self.passes.len() {
                if self.passes[index].pass_type != buffer_type {
                    continue;
                }
                let ready = self.passes[index].is_ready();
                let wanted = ready && self.optimizer.should_render_pass(index);
                if wanted {
                    self.render_pass(gl, index, time);
                }
                let (w, h) = (self.passes[index].width, self.passes[index].height);
                self.optimizer
                    .record_pass(index, w, h, self.scaled_width, self.scaled_height, wanted);
            }
        }

        if let Some(image) = self.image_pass_index {
            if self.passes[image].is_ready() {
                self.render_pass(gl, image, time);
            }
        }

        self.optimizer.end_frame();
        self.frame_count += 1;
        self.end_gpu_timing(gl, timing_this_frame);
    }

    fn sync_optimizer_mode(&mut self) {
        if self.adaptive.is_calibrating() {
            return;
        }
        if self.adaptive.is_emergency() {
            self.optimizer.set_mode(OptimizerMode::Emergency);
        } else if self.adaptive.fps_ratio() < 0.90 {
            self.optimizer.set_mode(OptimizerMode::Aggressive);
        } else if self.adaptive.fps_ratio() > 0.98 && self.adaptive.stability() > 0.7 {
            self.optimizer.set_mode(OptimizerMode::Normal);
        }
    }

    fn set_invariant_state<G: GpuContext>(&mut self, gl: &mut G) {
        self.state.set_capability(gl, Capability::DepthTest, false);
        self.state.set_capability(gl, Capability::Blend, false);
        self.state.set_capability(gl, Capability::CullFace, false);
        self.state.set_capability(gl, Capability::ScissorTest, false);
        self.state.depth_mask(gl, false);
        self.state.color_mask(gl, true, true, true, true);
    }

    fn render_pass<G: GpuContext>(&mut self, gl: &mut G, index: usize, time: f32) {
        let Some(draw) = self.prepare_draw(index) else {
            return;
        };

        if draw.is_buffer {
            let (Some(fbo), Some(write)) = (draw.fbo, draw.write_texture) else {
                return;
            };
            gl.framebuffer_color_attachment(fbo, write);
            self.state.bind_framebuffer(gl, fbo);
        } else {
            self.state.bind_framebuffer(gl, self.default_framebuffer);
        }

        self.state
            .viewport(gl, 0, 0, draw.width as i32, draw.height as i32);

        if draw.needs_clear || !draw.is_buffer {
            self.state.clear_color(gl, 0.0, 0.0, 0.0, 1.0);
            gl.clear_color_buffer();
        }

        self.state.use_program(gl, draw.program);
        self.upload_uniforms(gl, &draw, time);

        for (unit, texture) in draw.channel_textures.iter().enumerate() {
            let location = draw.uniforms.i_channel[unit];
            if !location.is_present() {
                continue;
            }
            if let Some(tex) = texture {
                self.state.bind_texture(gl, unit as u32, *tex);
                self.state
                    .uniform_1i(gl, draw.program, location, unit as i32);
            }
        }

        gl.draw_arrays(PrimitiveMode::TriangleStrip, 0, 4);

        if draw.is_buffer {
            if draw.needs_mipmaps {
                if let Some(write) = draw.write_texture {
                    gl.generate_mipmaps(write);
                }
            }
            let pass = &mut self.passes[index];
            pass.needs_clear = false;
            pass.toggle_ping_pong();
        }
    }

    /// Snapshot everything a draw needs, resolving channel textures to
    /// concrete handles (producer read slot, own read slot for feedback,
    /// noise fallback otherwise).
    fn prepare_draw(&self, index: usize) -> Option<PassDraw> {
        let pass = self.passes.get(index)?;
        let program = pass.program?;
        let noise = self.noise_texture;

        let mut channel_textures = [None; CHANNEL_COUNT];
        for c in 0..CHANNEL_COUNT {
            channel_textures[c] = match pass.channels[c] {
                ChannelSource::Noise => noise,
                ChannelSource::Feedback => pass.read_texture().or(noise),
                ChannelSource::Buffer(_) => {
                    let producer = pass.channel_buffer_index[c];
                    if producer >= 0 {
                        self.passes
                            .get(producer as usize)
                            .and_then(|p| p.read_texture())
                            .or(noise)
                    } else {
                        noise
                    }
                }
            };
        }

        Some(PassDraw {
            program,
            fbo: pass.fbo,
            write_texture: pass.write_texture(),
            width: pass.width.max(1),
            height: pass.height.max(1),
            needs_clear: pass.needs_clear,
            needs_mipmaps: pass.needs_mipmaps,
            uniforms: pass.uniforms,
            channel_textures,
            is_buffer: pass.pass_type.is_buffer(),
        })
    }

    fn upload_uniforms<G: GpuContext>(&mut self, gl: &mut G, draw: &PassDraw, time: f32) {
        let u = &draw.uniforms;
        let program = draw.program;
        let w = draw.width as f32;
        let h = draw.height as f32;

        self.state.uniform_1f(gl, program, u.i_time, time);
        self.state
            .uniform_1f(gl, program, u.i_time_delta, 1.0 / 60.0);
        self.state.uniform_1f(gl, program, u.i_frame_rate, 60.0);
        self.state
            .uniform_1i(gl, program, u.i_frame, self.frame_count as i32);
        self.state
            .uniform_3f(gl, program, u.i_resolution, w, h, w / h.max(1.0));

        let (mx, my) = self.mouse_pos;
        let (cx, cy) = self.last_click_pos;
        let sign = if self.mouse_held { 1.0 } else { -1.0 };
        self.state
            .uniform_4f(gl, program, u.i_mouse, mx, my, cx * sign, cy * sign);

        let date = system_date();
        self.state
            .uniform_4f(gl, program, u.i_date, date[0], date[1], date[2], date[3]);
        self.state
            .uniform_1f(gl, program, u.i_sample_rate, 44_100.0);

        if u.i_channel_resolution.is_present() {
            gl.uniform_3f_array(
                u.i_channel_resolution,
                &[[256.0, 256.0, 1.0]; CHANNEL_COUNT],
            );
        }
    }

    // ── Timing ───────────────────────────────────────────────────────────

    fn begin_gpu_timing<G: GpuContext>(&mut self, gl: &mut G) -> bool {
        if !self.timer_supported {
            return false;
        }
        let slot = self.timer_write_slot;
        if self.timer_in_flight[slot] {
            return false;
        }
        let Some(query) = self.timer_queries[slot] else {
            return false;
        };
        gl.begin_time_query(query);
        true
    }

    fn end_gpu_timing<G: GpuContext>(&mut self, gl: &mut G, began: bool) {
        if began {
            gl.end_time_query();
            self.timer_in_flight[self.timer_write_slot] = true;
            self.timer_write_slot = 1 - self.timer_write_slot;
        }
        // Harvest whichever query has landed; never block on one.
        for slot in 0..2 {
            if !self.timer_in_flight[slot] {
                continue;
            }
            let Some(query) = self.timer_queries[slot] else {
                continue;
            };
            if gl.query_result_available(query) {
                let ns = gl.query_result_ns(query);
                self.timer_in_flight[slot] = false;
                self.adaptive.submit_gpu_frame_time(ns);
            }
        }
    }

    // ── Geometry bookkeeping ─────────────────────────────────────────────

    fn recompute_scaled_size(&mut self) {
        self.scaled_width =
            ((self.surface_width as f32 * self.resolution_scale).round() as u32).max(1);
        self.scaled_height =
            ((self.surface_height as f32 * self.resolution_scale).round() as u32).max(1);
    }

    fn apply_pass_extents<G: GpuContext>(&mut self, gl: &mut G) {
        for index in 0..self.passes.len() {
            let target = match self.passes[index].pass_type {
                PassType::Image => (self.surface_width, self.surface_height),
                t if t.is_buffer() => {
                    self.optimizer
                        .pass_resolution(index, self.scaled_width, self.scaled_height)
                }
                _ => continue,
            };
            let pass = &self.passes[index];
            if (pass.width, pass.height) == target {
                continue;
            }
            let textures = pass.textures;
            let is_buffer = pass.pass_type.is_buffer();
            {
                let pass = &mut self.passes[index];
                pass.width = target.0;
                pass.height = target.1;
                if is_buffer {
                    pass.needs_clear = true;
                }
            }
            if is_buffer && self.gl_initialized {
                for tex in textures.into_iter().flatten() {
                    gl.texture_storage(tex, TextureFormat::Rgba16F, target.0, target.1);
                    self.state.forget_texture(tex);
                }
            }
        }
    }

    // ── Configuration ────────────────────────────────────────────────────

    /// Force the base resolution scale. Clamped to the engine-wide
    /// [0.1, 2.0] range; the adaptive controller (when enabled) resumes
    /// from here within its own band.
    pub fn set_resolution_scale(&mut self, scale: f32) {
        self.resolution_scale = scale.clamp(SCALE_HARD_MIN, SCALE_HARD_MAX);
        self.adaptive.force_scale(self.resolution_scale);
        self.recompute_scaled_size();
    }

    /// Toggle adaptive resolution and retune its band in one call.
    pub fn set_adaptive_resolution(
        &mut self,
        enabled: bool,
        target_fps: f32,
        min_scale: f32,
        max_scale: f32,
    ) {
        self.adaptive.set_enabled(enabled);
        let mut config = self.adaptive.config().clone();
        config.target_fps = target_fps.max(1.0);
        config.min_scale = min_scale.clamp(0.01, 1.0);
        config.max_scale = max_scale.clamp(config.min_scale, 2.0);
        self.adaptive.configure(config);
    }

    /// Replace the full adaptive tuning.
    pub fn configure_adaptive(&mut self, config: AdaptiveConfig) {
        self.adaptive.configure(config);
    }

    /// Host-reported thermal throttling; drives the emergency degradation
    /// path (half-rate buffers, reduced quality) while set.
    pub fn set_thermal_throttled(&mut self, throttled: bool) {
        self.adaptive.set_thermal_throttled(throttled);
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn get_current_fps(&self) -> f32 {
        self.adaptive.current_fps()
    }

    pub fn get_resolution_scale(&self) -> f32 {
        self.resolution_scale
    }

    /// GL is up and every renderable pass has a program.
    pub fn is_ready(&self) -> bool {
        self.gl_initialized
            && !self.passes.is_empty()
            && self
                .passes
                .iter()
                .filter(|p| p.pass_type != PassType::Sound)
                .all(|p| p.is_ready())
    }

    pub fn has_errors(&self) -> bool {
        self.passes.iter().any(|p| p.compile_error.is_some())
    }

    /// Compile log of pass `index`, when it failed.
    pub fn get_error(&self, index: usize) -> Option<&str> {
        self.passes
            .get(index)
            .and_then(|p| p.compile_error.as_deref())
    }

    /// Every failed pass as "name: log" lines.
    pub fn get_all_errors(&self) -> Vec<String> {
        self.passes
            .iter()
            .filter_map(|p| {
                p.compile_error
                    .as_ref()
                    .map(|log| format!("{}: {log}", p.name))
            })
            .collect()
    }

    pub fn is_multipass(&self) -> bool {
        self.is_multipass
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn image_pass_index(&self) -> Option<usize> {
        self.image_pass_index
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn scaled_size(&self) -> (u32, u32) {
        (self.scaled_width, self.scaled_height)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            adaptive: self.adaptive.stats(),
            state: *self.state.stats(),
            workload_ratio: self.optimizer.workload_ratio(),
            frame_count: self.frame_count,
        }
    }

    pub fn capabilities(&self) -> Option<&CapabilityRegistry> {
        self.caps.as_ref()
    }
}

/// Resolve every well-known uniform once at link time.
fn resolve_uniform_locations<G: GpuContext>(gl: &mut G, program: crate::gpu::ProgramId) -> UniformLocations {
    let mut locations = UniformLocations {
        i_time: gl.uniform_location(program, "iTime"),
        i_time_delta: gl.uniform_location(program, "iTimeDelta"),
        i_frame_rate: gl.uniform_location(program, "iFrameRate"),
        i_frame: gl.uniform_location(program, "iFrame"),
        i_resolution: gl.uniform_location(program, "iResolution"),
        i_mouse: gl.uniform_location(program, "iMouse"),
        i_date: gl.uniform_location(program, "iDate"),
        i_sample_rate: gl.uniform_location(program, "iSampleRate"),
        i_channel_resolution: gl.uniform_location(program, "iChannelResolution"),
        i_channel: [UniformLocation::NONE; CHANNEL_COUNT],
    };
    for c in 0..CHANNEL_COUNT {
        let name = ["iChannel0", "iChannel1", "iChannel2", "iChannel3"][c];
        locations.i_channel[c] = gl.uniform_location(program, name);
    }
    locations
}

/// Fill the 1024x1024 RGBA8 noise atlas from a deterministic LCG.
fn generate_noise_texels() -> Vec<u8> {
    let mut seed = NOISE_SEED;
    let mut data = Vec::with_capacity((NOISE_SIZE * NOISE_SIZE * 4) as usize);
    for _ in 0..(NOISE_SIZE * NOISE_SIZE) {
        for _ in 0..4 {
            seed = seed.wrapping_mul(LCG_MUL).wrapping_add(LCG_ADD);
            data.push((seed >> 24) as u8);
        }
    }
    data
}

/// iDate: (year, month 0-based, day, seconds into the day), local-less
/// UTC wall clock.
fn system_date() -> [f32; 4] {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    [
        year as f32,
        (month - 1) as f32,
        day as f32,
        (secs % 86_400) as f32,
    ]
}

/// Days since 1970-01-01 to (year, month 1-based, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}
