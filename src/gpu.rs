//! The GPU command interface the host must provide.
//!
//! The engine owns no GPU context. Everything it does on the GPU goes
//! through [`GpuContext`], a small GL-flavored command set the host
//! implements over whatever API actually talks to the hardware. All calls
//! happen on the thread that owns the context; the engine never spawns
//! threads and never blocks on GPU results (timer queries are polled, not
//! waited on).
//!
//! # Binding model
//!
//! Allocation and parameter calls take their handle explicitly. Per-draw
//! binding calls (`use_program`, `active_texture` + `bind_texture`,
//! `bind_framebuffer`, `bind_vertex_array`) are stateful, mirroring how a
//! GL-style backend works; the [`StateCache`] layer sits on top of them and
//! elides redundant transitions.
//!
//! [`StateCache`]: crate::state_cache::StateCache

/// A linked shader program handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// A 2D texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// A framebuffer handle. The host's surface framebuffer is whatever
/// [`GpuContext::current_framebuffer_binding`] reports; it may be nonzero
/// when the engine is embedded in a larger application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// A vertex buffer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// A vertex array object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayId(pub u32);

/// A timer query handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub u32);

/// A resolved uniform location. `-1` means the uniform does not exist in
/// the program (optimized out or never declared) and assignments to it are
/// skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub i32);

impl UniformLocation {
    /// The "not present in this program" sentinel.
    pub const NONE: UniformLocation = UniformLocation(-1);

    /// True if the location refers to an actual uniform.
    #[inline]
    pub fn is_present(self) -> bool {
        self.0 >= 0
    }
}

impl Default for UniformLocation {
    fn default() -> Self {
        Self::NONE
    }
}

/// Texel storage formats the engine allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA; used for the noise texture.
    Rgba8,
    /// Half-float RGBA; used for all ping-pong buffer targets so feedback
    /// accumulation keeps precision.
    Rgba16F,
}

/// Texture minification/magnification filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
    /// Trilinear; requires a mipmap chain.
    LinearMipmapLinear,
}

/// Texture coordinate wrap modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureWrap {
    Repeat,
    ClampToEdge,
}

/// Fixed-function toggles the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DepthTest,
    Blend,
    CullFace,
    ScissorTest,
}

/// Blend factors for [`GpuContext::blend_func`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Primitive assembly modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveMode {
    Triangles,
    /// The engine draws every pass as a four-vertex strip.
    TriangleStrip,
}

/// The command set the host implements over its GPU API.
///
/// Fallible operations report failure through return values rather than
/// panicking: program compilation returns the info log, framebuffer
/// completeness is a boolean. A mid-frame failure leaves the frame
/// partially composed; the engine logs and returns.
pub trait GpuContext {
    // ── Programs ─────────────────────────────────────────────────────────

    /// Compile and link a vertex + fragment shader pair. On failure the
    /// `Err` carries the compile/link info log verbatim.
    fn compile_program(
        &mut self,
        vertex_src: &str,
        fragment_src: &str,
    ) -> std::result::Result<ProgramId, String>;

    fn delete_program(&mut self, program: ProgramId);

    /// Make `program` current for subsequent uniform uploads and draws.
    fn use_program(&mut self, program: ProgramId);

    /// Resolve a uniform by name. Returns [`UniformLocation::NONE`] when
    /// the program has no such uniform.
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> UniformLocation;

    // ── Uniform upload (current program) ─────────────────────────────────

    fn uniform_1f(&mut self, location: UniformLocation, x: f32);
    fn uniform_2f(&mut self, location: UniformLocation, x: f32, y: f32);
    fn uniform_3f(&mut self, location: UniformLocation, x: f32, y: f32, z: f32);
    fn uniform_4f(&mut self, location: UniformLocation, x: f32, y: f32, z: f32, w: f32);
    fn uniform_1i(&mut self, location: UniformLocation, x: i32);
    fn uniform_2i(&mut self, location: UniformLocation, x: i32, y: i32);
    fn uniform_3i(&mut self, location: UniformLocation, x: i32, y: i32, z: i32);
    fn uniform_4i(&mut self, location: UniformLocation, x: i32, y: i32, z: i32, w: i32);

    /// Upload an array of `vec3` values (used for `iChannelResolution[4]`).
    fn uniform_3f_array(&mut self, location: UniformLocation, values: &[[f32; 3]]);

    /// Upload a column-major 3x3 matrix.
    fn uniform_matrix3(&mut self, location: UniformLocation, values: &[f32; 9]);

    /// Upload a column-major 4x4 matrix.
    fn uniform_matrix4(&mut self, location: UniformLocation, values: &[f32; 16]);

    // ── Textures ─────────────────────────────────────────────────────────

    fn create_texture(&mut self) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);

    /// Allocate (or respecify) texel storage. Calling this again with a new
    /// extent resizes the texture in place; the handle stays valid.
    fn texture_storage(&mut self, texture: TextureId, format: TextureFormat, width: u32, height: u32);

    /// Allocate storage and upload pixel data in one call. `data` is tightly
    /// packed rows in the given format.
    fn texture_pixels(
        &mut self,
        texture: TextureId,
        format: TextureFormat,
        width: u32,
        height: u32,
        data: &[u8],
    );

    fn texture_filter(&mut self, texture: TextureId, min: TextureFilter, mag: TextureFilter);
    fn texture_wrap(&mut self, texture: TextureId, wrap: TextureWrap);

    /// Regenerate the full mipmap chain from level 0.
    fn generate_mipmaps(&mut self, texture: TextureId);

    /// Select the active texture unit for the next `bind_texture`.
    fn active_texture(&mut self, unit: u32);

    /// Bind a 2D texture to the active unit.
    fn bind_texture(&mut self, texture: TextureId);

    // ── Framebuffers ─────────────────────────────────────────────────────

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId);

    /// Attach `texture` as color attachment 0 of `framebuffer`.
    fn framebuffer_color_attachment(&mut self, framebuffer: FramebufferId, texture: TextureId);

    /// Completeness check after attachment changes.
    fn framebuffer_complete(&mut self, framebuffer: FramebufferId) -> bool;

    /// Query the framebuffer currently bound in the context. The host may
    /// rebind its surface framebuffer between frames (e.g. on resize), so
    /// the engine re-queries this at the start of every frame.
    fn current_framebuffer_binding(&mut self) -> FramebufferId;

    // ── Vertex arrays & buffers ──────────────────────────────────────────

    fn create_vertex_array(&mut self) -> VertexArrayId;
    fn delete_vertex_array(&mut self, vao: VertexArrayId);
    fn bind_vertex_array(&mut self, vao: VertexArrayId);

    fn create_buffer(&mut self) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);
    fn bind_array_buffer(&mut self, buffer: BufferId);

    /// Upload static vertex data to the bound array buffer.
    fn buffer_data(&mut self, data: &[u8]);

    /// Describe attribute `index` as `components` tightly packed f32s.
    fn vertex_attrib_pointer_f32(&mut self, index: u32, components: i32);
    fn enable_vertex_attrib(&mut self, index: u32);

    // ── Draw & framebuffer state ─────────────────────────────────────────

    fn draw_arrays(&mut self, mode: PrimitiveMode, first: i32, count: i32);
    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);

    /// Clear the color buffer of the bound framebuffer.
    fn clear_color_buffer(&mut self);

    fn set_capability(&mut self, capability: Capability, enabled: bool);
    fn depth_mask(&mut self, enabled: bool);
    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool);
    fn blend_func(&mut self, src: BlendFactor, dst: BlendFactor);

    // ── Timer queries ────────────────────────────────────────────────────

    /// Whether elapsed-time queries exist on this context at all. When
    /// false the engine falls back to wall-clock frame timing.
    fn supports_timer_queries(&self) -> bool;

    fn create_query(&mut self) -> QueryId;
    fn delete_query(&mut self, query: QueryId);

    /// Begin measuring GPU time into `query`.
    fn begin_time_query(&mut self, query: QueryId);

    /// End the in-flight time query.
    fn end_time_query(&mut self);

    /// Non-blocking poll: has `query`'s result landed?
    fn query_result_available(&mut self, query: QueryId) -> bool;

    /// Read the elapsed nanoseconds of a completed query. Only call once
    /// `query_result_available` returned true, or this may stall.
    fn query_result_ns(&mut self, query: QueryId) -> u64;

    // ── Introspection ────────────────────────────────────────────────────

    /// (major, minor) of the context's API version.
    fn version(&self) -> (u32, u32);

    /// Extension strings exposed by the context.
    fn extensions(&self) -> Vec<String>;
}
