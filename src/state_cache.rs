//! Redundant GL state elision.
//!
//! Every mutator mirrors the context state it last set and no-ops when the
//! requested state is already current. Uniform uploads are deduplicated per
//! program with a small epsilon so frame-invariant values are uploaded once
//! per program bind. Counters track attempted vs avoided calls per class so
//! hosts can see what the cache is worth.
//!
//! The cache only knows about state the engine itself sets. When the host
//! touches the context between frames, [`StateCache::invalidate`] resets
//! the mirror so nothing is elided against stale assumptions.

use rustc_hash::FxHashMap;

use crate::gpu::{
    BlendFactor, BufferId, Capability, FramebufferId, GpuContext, ProgramId, TextureId,
    UniformLocation, VertexArrayId,
};

/// Texture units the cache mirrors; the engine binds channels 0..3 only.
const TEXTURE_UNITS: usize = 8;

/// Tolerance for treating two uniform floats as equal.
const UNIFORM_EPSILON: f32 = 1e-4;

/// Attempted vs avoided counts for one class of call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElisionCounter {
    pub attempted: u64,
    pub avoided: u64,
}

impl ElisionCounter {
    #[inline]
    fn hit(&mut self) {
        self.attempted += 1;
        self.avoided += 1;
    }

    #[inline]
    fn miss(&mut self) {
        self.attempted += 1;
    }

    /// Fraction of calls that never reached the driver.
    pub fn avoided_ratio(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.avoided as f64 / self.attempted as f64
        }
    }
}

/// Per-class elision totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateStats {
    pub programs: ElisionCounter,
    pub vertex_arrays: ElisionCounter,
    pub buffers: ElisionCounter,
    pub framebuffers: ElisionCounter,
    pub textures: ElisionCounter,
    pub toggles: ElisionCounter,
    pub masks: ElisionCounter,
    pub blend_funcs: ElisionCounter,
    pub viewports: ElisionCounter,
    pub clear_colors: ElisionCounter,
    pub uniforms: ElisionCounter,
}

/// A cached uniform value for epsilon-compared deduplication.
#[derive(Debug, Clone, Copy)]
enum UniformValue {
    F1(f32),
    F2([f32; 2]),
    F3([f32; 3]),
    F4([f32; 4]),
    I1(i32),
    I2([i32; 2]),
    I3([i32; 3]),
    I4([i32; 4]),
    Mat3([f32; 9]),
    Mat4([f32; 16]),
}

impl UniformValue {
    fn approx_eq(&self, other: &UniformValue) -> bool {
        fn eq_f(a: &[f32], b: &[f32]) -> bool {
            a.iter().zip(b).all(|(x, y)| (x - y).abs() <= UNIFORM_EPSILON)
        }
        match (self, other) {
            (UniformValue::F1(a), UniformValue::F1(b)) => eq_f(&[*a], &[*b]),
            (UniformValue::F2(a), UniformValue::F2(b)) => eq_f(a, b),
            (UniformValue::F3(a), UniformValue::F3(b)) => eq_f(a, b),
            (UniformValue::F4(a), UniformValue::F4(b)) => eq_f(a, b),
            (UniformValue::I1(a), UniformValue::I1(b)) => a == b,
            (UniformValue::I2(a), UniformValue::I2(b)) => a == b,
            (UniformValue::I3(a), UniformValue::I3(b)) => a == b,
            (UniformValue::I4(a), UniformValue::I4(b)) => a == b,
            (UniformValue::Mat3(a), UniformValue::Mat3(b)) => eq_f(a, b),
            (UniformValue::Mat4(a), UniformValue::Mat4(b)) => eq_f(a, b),
            _ => false,
        }
    }
}

/// Mirror of the context state the engine sets, plus elision stats.
#[derive(Debug, Default)]
pub struct StateCache {
    program: Option<ProgramId>,
    vertex_array: Option<VertexArrayId>,
    array_buffer: Option<BufferId>,
    framebuffer: Option<FramebufferId>,
    active_unit: Option<u32>,
    unit_textures: [Option<TextureId>; TEXTURE_UNITS],
    capabilities: FxHashMap<Capability, bool>,
    depth_mask: Option<bool>,
    color_mask: Option<[bool; 4]>,
    blend_func: Option<(BlendFactor, BlendFactor)>,
    viewport: Option<(i32, i32, i32, i32)>,
    clear_color: Option<[f32; 4]>,
    uniform_values: FxHashMap<(ProgramId, i32), UniformValue>,
    stats: StateStats,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything. Call when the host may have touched the context.
    pub fn invalidate(&mut self) {
        let stats = self.stats;
        let uniforms = std::mem::take(&mut self.uniform_values);
        *self = Self::default();
        // Uniform values live in program objects, not context state; they
        // survive host context changes.
        self.uniform_values = uniforms;
        self.stats = stats;
    }

    /// Forget only the framebuffer binding (re-queried every frame).
    pub fn invalidate_framebuffer(&mut self) {
        self.framebuffer = None;
    }

    /// Drop cached uniforms of a deleted or recompiled program.
    pub fn forget_program(&mut self, program: ProgramId) {
        self.uniform_values.retain(|(p, _), _| *p != program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    pub fn stats(&self) -> &StateStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = StateStats::default();
    }

    // ── Binds ────────────────────────────────────────────────────────────

    pub fn use_program<G: GpuContext>(&mut self, gl: &mut G, program: ProgramId) {
        if self.program == Some(program) {
            self.stats.programs.hit();
            return;
        }
        self.stats.programs.miss();
        gl.use_program(program);
        self.program = Some(program);
    }

    pub fn bind_vertex_array<G: GpuContext>(&mut self, gl: &mut G, vao: VertexArrayId) {
        if self.vertex_array == Some(vao) {
            self.stats.vertex_arrays.hit();
            return;
        }
        self.stats.vertex_arrays.miss();
        gl.bind_vertex_array(vao);
        self.vertex_array = Some(vao);
    }

    pub fn bind_array_buffer<G: GpuContext>(&mut self, gl: &mut G, buffer: BufferId) {
        if self.array_buffer == Some(buffer) {
            self.stats.buffers.hit();
            return;
        }
        self.stats.buffers.miss();
        gl.bind_array_buffer(buffer);
        self.array_buffer = Some(buffer);
    }

    pub fn bind_framebuffer<G: GpuContext>(&mut self, gl: &mut G, fbo: FramebufferId) {
        if self.framebuffer == Some(fbo) {
            self.stats.framebuffers.hit();
            return;
        }
        self.stats.framebuffers.miss();
        gl.bind_framebuffer(fbo);
        self.framebuffer = Some(fbo);
    }

    /// Bind `texture` to `unit`, switching the active unit only if needed.
    pub fn bind_texture<G: GpuContext>(&mut self, gl: &mut G, unit: u32, texture: TextureId) {
        let slot = unit as usize;
        if slot < TEXTURE_UNITS && self.unit_textures[slot] == Some(texture) {
            self.stats.textures.hit();
            return;
        }
        self.stats.textures.miss();
        if self.active_unit != Some(unit) {
            gl.active_texture(unit);
            self.active_unit = Some(unit);
        }
        gl.bind_texture(texture);
        if slot < TEXTURE_UNITS {
            self.unit_textures[slot] = Some(texture);
        }
    }

    /// A texture's contents changed identity-wise (deleted/reallocated);
    /// stop trusting any unit that holds it.
    pub fn forget_texture(&mut self, texture: TextureId) {
        for slot in &mut self.unit_textures {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    // ── Fixed-function state ─────────────────────────────────────────────

    pub fn set_capability<G: GpuContext>(&mut self, gl: &mut G, cap: Capability, enabled: bool) {
        if self.capabilities.get(&cap) == Some(&enabled) {
            self.stats.toggles.hit();
            return;
        }
        self.stats.toggles.miss();
        gl.set_capability(cap, enabled);
        self.capabilities.insert(cap, enabled);
    }

    pub fn depth_mask<G: GpuContext>(&mut self, gl: &mut G, enabled: bool) {
        if self.depth_mask == Some(enabled) {
            self.stats.masks.hit();
            return;
        }
        self.stats.masks.miss();
        gl.depth_mask(enabled);
        self.depth_mask = Some(enabled);
    }

    pub fn color_mask<G: GpuContext>(&mut self, gl: &mut G, r: bool, g: bool, b: bool, a: bool) {
        let mask = [r, g, b, a];
        if self.color_mask == Some(mask) {
            self.stats.masks.hit();
            return;
        }
        self.stats.masks.miss();
        gl.color_mask(r, g, b, a);
        self.color_mask = Some(mask);
    }

    pub fn blend_func<G: GpuContext>(&mut self, gl: &mut G, src: BlendFactor, dst: BlendFactor) {
        if self.blend_func == Some((src, dst)) {
            self.stats.blend_funcs.hit();
            return;
        }
        self.stats.blend_funcs.miss();
        gl.blend_func(src, dst);
        self.blend_func = Some((src, dst));
    }

    pub fn viewport<G: GpuContext>(&mut self, gl: &mut G, x: i32, y: i32, w: i32, h: i32) {
        if self.viewport == Some((x, y, w, h)) {
            self.stats.viewports.hit();
            return;
        }
        self.stats.viewports.miss();
        gl.viewport(x, y, w, h);
        self.viewport = Some((x, y, w, h));
    }

    pub fn clear_color<G: GpuContext>(&mut self, gl: &mut G, r: f32, g: f32, b: f32, a: f32) {
        let color = [r, g, b, a];
        if self.clear_color == Some(color) {
            self.stats.clear_colors.hit();
            return;
        }
        self.stats.clear_colors.miss();
        gl.clear_color(r, g, b, a);
        self.clear_color = Some(color);
    }

    // ── Deduplicated uniform upload ──────────────────────────────────────
    //
    // Callers must have the program bound. Locations of `NONE` are skipped
    // without touching the stats: they are "uniform not in program", not an
    // avoided upload.

    fn upload<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        value: UniformValue,
        write: impl FnOnce(&mut G, UniformLocation),
    ) {
        if !location.is_present() {
            return;
        }
        let key = (program, location.0);
        if let Some(prev) = self.uniform_values.get(&key) {
            if prev.approx_eq(&value) {
                self.stats.uniforms.hit();
                return;
            }
        }
        self.stats.uniforms.miss();
        write(gl, location);
        self.uniform_values.insert(key, value);
    }

    pub fn uniform_1f<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: f32,
    ) {
        self.upload(gl, program, location, UniformValue::F1(x), |gl, loc| {
            gl.uniform_1f(loc, x);
        });
    }

    pub fn uniform_2f<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: f32,
        y: f32,
    ) {
        self.upload(gl, program, location, UniformValue::F2([x, y]), |gl, loc| {
            gl.uniform_2f(loc, x, y);
        });
    }

    pub fn uniform_3f<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: f32,
        y: f32,
        z: f32,
    ) {
        self.upload(gl, program, location, UniformValue::F3([x, y, z]), |gl, loc| {
            gl.uniform_3f(loc, x, y, z);
        });
    }

    pub fn uniform_4f<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: f32,
        y: f32,
        z: f32,
        w: f32,
    ) {
        self.upload(gl, program, location, UniformValue::F4([x, y, z, w]), |gl, loc| {
            gl.uniform_4f(loc, x, y, z, w);
        });
    }

    pub fn uniform_1i<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: i32,
    ) {
        self.upload(gl, program, location, UniformValue::I1(x), |gl, loc| {
            gl.uniform_1i(loc, x);
        });
    }

    pub fn uniform_2i<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: i32,
        y: i32,
    ) {
        self.upload(gl, program, location, UniformValue::I2([x, y]), |gl, loc| {
            gl.uniform_2i(loc, x, y);
        });
    }

    pub fn uniform_3i<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: i32,
        y: i32,
        z: i32,
    ) {
        self.upload(gl, program, location, UniformValue::I3([x, y, z]), |gl, loc| {
            gl.uniform_3i(loc, x, y, z);
        });
    }

    pub fn uniform_4i<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        x: i32,
        y: i32,
        z: i32,
        w: i32,
    ) {
        self.upload(gl, program, location, UniformValue::I4([x, y, z, w]), |gl, loc| {
            gl.uniform_4i(loc, x, y, z, w);
        });
    }

    pub fn uniform_matrix3<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        values: &[f32; 9],
    ) {
        self.upload(gl, program, location, UniformValue::Mat3(*values), |gl, loc| {
            gl.uniform_matrix3(loc, values);
        });
    }

    pub fn uniform_matrix4<G: GpuContext>(
        &mut self,
        gl: &mut G,
        program: ProgramId,
        location: UniformLocation,
        values: &[f32; 16],
    ) {
        self.upload(gl, program, location, UniformValue::Mat4(*values), |gl, loc| {
            gl.uniform_matrix4(loc, values);
        });
    }
}
