//! A recording in-memory implementation of the GPU command trait.
//!
//! Hands out sequential ids, mirrors texture/framebuffer bookkeeping, and
//! journals compiles, clears, draws (with a snapshot of bound textures and
//! current uniform values) and mipmap generations so tests can assert on
//! the exact command stream the engine produced.

use std::collections::HashMap;

use lucerna::prelude::*;

/// Test-wide logging init; safe to call from every test.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Snapshot of one draw call.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: u32,
    /// Framebuffer bound at draw time.
    pub framebuffer: u32,
    /// Color attachment of that framebuffer, if any was ever attached.
    pub attachment: Option<u32>,
    pub viewport: (i32, i32, i32, i32),
    /// Texture bound per unit at draw time.
    pub textures: [Option<u32>; 8],
    /// Current uniform values of the drawn program, by name.
    pub uniforms: HashMap<String, UniformSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformSample {
    Float(Vec<f32>),
    Int(Vec<i32>),
}

impl UniformSample {
    pub fn as_floats(&self) -> &[f32] {
        match self {
            UniformSample::Float(v) => v,
            UniformSample::Int(_) => &[],
        }
    }

    pub fn as_ints(&self) -> &[i32] {
        match self {
            UniformSample::Int(v) => v,
            UniformSample::Float(_) => &[],
        }
    }
}

/// Chronological journal entries.
#[derive(Debug, Clone)]
pub enum Op {
    Compile { program: u32 },
    Clear { framebuffer: u32 },
    Draw(DrawRecord),
    GenerateMipmaps { texture: u32 },
    TextureStorage { texture: u32, width: u32, height: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub min_filter: Option<TextureFilter>,
    pub wrap: Option<TextureWrap>,
    pub has_pixels: bool,
    pub mipmap_generations: u32,
}

#[derive(Default)]
pub struct RecordingGl {
    next_id: u32,

    pub ops: Vec<Op>,
    pub compiled_fragments: HashMap<u32, String>,
    pub deleted_programs: Vec<u32>,
    pub textures: HashMap<u32, TextureInfo>,

    /// Fragment sources containing this substring fail to compile.
    pub fail_pattern: Option<String>,
    /// What `current_framebuffer_binding` reports (the host surface).
    pub surface_framebuffer: u32,
    /// Whether timer queries exist at all.
    pub timer_support: bool,
    /// Elapsed nanoseconds every completed timer query reports.
    pub frame_time_ns: u64,
    pub api_version: (u32, u32),

    current_program: u32,
    bound_framebuffer: u32,
    fbo_attachments: HashMap<u32, u32>,
    active_unit: u32,
    unit_bindings: [Option<u32>; 8],
    query_in_flight: Option<u32>,
    query_complete: Vec<u32>,
    viewport_state: (i32, i32, i32, i32),

    /// (program, name) -> location and its reverse, so uniform writes can
    /// be journaled by name.
    locations: HashMap<(u32, String), i32>,
    location_names: HashMap<(u32, i32), String>,
    next_location: HashMap<u32, i32>,
    uniform_values: HashMap<(u32, String), UniformSample>,
}

impl RecordingGl {
    pub fn new() -> Self {
        Self {
            timer_support: true,
            frame_time_ns: 16_000_000,
            api_version: (3, 0),
            ..Self::default()
        }
    }

    fn fresh_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn draws(&self) -> Vec<&DrawRecord> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Draw(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn clears(&self) -> Vec<u32> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Clear { framebuffer } => Some(*framebuffer),
                _ => None,
            })
            .collect()
    }

    pub fn mipmap_generations(&self, texture: u32) -> u32 {
        self.textures
            .get(&texture)
            .map_or(0, |t| t.mipmap_generations)
    }

    fn record_uniform(&mut self, location: UniformLocation, value: UniformSample) {
        let key = (self.current_program, location.0);
        if let Some(name) = self.location_names.get(&key) {
            self.uniform_values
                .insert((self.current_program, name.clone()), value);
        }
    }
}

impl GpuContext for RecordingGl {
    fn compile_program(
        &mut self,
        _vertex_src: &str,
        fragment_src: &str,
    ) -> std::result::Result<ProgramId, String> {
        if let Some(pattern) = &self.fail_pattern {
            if fragment_src.contains(pattern.as_str()) {
                return Err(format!("0:1: error near '{pattern}'"));
            }
        }
        let id = self.fresh_id();
        self.compiled_fragments.insert(id, fragment_src.to_string());
        self.ops.push(Op::Compile { program: id });
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.deleted_programs.push(program.0);
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = program.0;
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> UniformLocation {
        let key = (program.0, name.to_string());
        if let Some(loc) = self.locations.get(&key) {
            return UniformLocation(*loc);
        }
        let next = self.next_location.entry(program.0).or_insert(0);
        let loc = *next;
        *next += 1;
        self.locations.insert(key, loc);
        self.location_names
            .insert((program.0, loc), name.to_string());
        UniformLocation(loc)
    }

    fn uniform_1f(&mut self, location: UniformLocation, x: f32) {
        self.record_uniform(location, UniformSample::Float(vec![x]));
    }

    fn uniform_2f(&mut self, location: UniformLocation, x: f32, y: f32) {
        self.record_uniform(location, UniformSample::Float(vec![x, y]));
    }

    fn uniform_3f(&mut self, location: UniformLocation, x: f32, y: f32, z: f32) {
        self.record_uniform(location, UniformSample::Float(vec![x, y, z]));
    }

    fn uniform_4f(&mut self, location: UniformLocation, x: f32, y: f32, z: f32, w: f32) {
        self.record_uniform(location, UniformSample::Float(vec![x, y, z, w]));
    }

    fn uniform_1i(&mut self, location: UniformLocation, x: i32) {
        self.record_uniform(location, UniformSample::Int(vec![x]));
    }

    fn uniform_2i(&mut self, location: UniformLocation, x: i32, y: i32) {
        self.record_uniform(location, UniformSample::Int(vec![x, y]));
    }

    fn uniform_3i(&mut self, location: UniformLocation, x: i32, y: i32, z: i32) {
        self.record_uniform(location, UniformSample::Int(vec![x, y, z]));
    }

    fn uniform_4i(&mut self, location: UniformLocation, x: i32, y: i32, z: i32, w: i32) {
        self.record_uniform(location, UniformSample::Int(vec![x, y, z, w]));
    }

    fn uniform_3f_array(&mut self, location: UniformLocation, values: &[[f32; 3]]) {
        let flat: Vec<f32> = values.iter().flatten().copied().collect();
        self.record_uniform(location, UniformSample::Float(flat));
    }

    fn uniform_matrix3(&mut self, location: UniformLocation, values: &[f32; 9]) {
        self.record_uniform(location, UniformSample::Float(values.to_vec()));
    }

    fn uniform_matrix4(&mut self, location: UniformLocation, values: &[f32; 16]) {
        self.record_uniform(location, UniformSample::Float(values.to_vec()));
    }

    fn create_texture(&mut self) -> TextureId {
        let id = self.fresh_id();
        self.textures.insert(id, TextureInfo::default());
        TextureId(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
    }

    fn texture_storage(&mut self, texture: TextureId, _format: TextureFormat, width: u32, height: u32) {
        if let Some(info) = self.textures.get_mut(&texture.0) {
            info.width = width;
            info.height = height;
        }
        self.ops.push(Op::TextureStorage {
            texture: texture.0,
            width,
            height,
        });
    }

    fn texture_pixels(
        &mut self,
        texture: TextureId,
        _format: TextureFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        if let Some(info) = self.textures.get_mut(&texture.0) {
            info.width = width;
            info.height = height;
            info.has_pixels = !data.is_empty();
        }
    }

    fn texture_filter(&mut self, texture: TextureId, min: TextureFilter, _mag: TextureFilter) {
        if let Some(info) = self.textures.get_mut(&texture.0) {
            info.min_filter = Some(min);
        }
    }

    fn texture_wrap(&mut self, texture: TextureId, wrap: TextureWrap) {
        if let Some(info) = self.textures.get_mut(&texture.0) {
            info.wrap = Some(wrap);
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureId) {
        if let Some(info) = self.textures.get_mut(&texture.0) {
            info.mipmap_generations += 1;
        }
        self.ops.push(Op::GenerateMipmaps { texture: texture.0 });
    }

    fn active_texture(&mut self, unit: u32) {
        self.active_unit = unit;
    }

    fn bind_texture(&mut self, texture: TextureId) {
        if (self.active_unit as usize) < self.unit_bindings.len() {
            self.unit_bindings[self.active_unit as usize] = Some(texture.0);
        }
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        FramebufferId(self.fresh_id())
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.fbo_attachments.remove(&framebuffer.0);
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.bound_framebuffer = framebuffer.0;
    }

    fn framebuffer_color_attachment(&mut self, framebuffer: FramebufferId, texture: TextureId) {
        self.fbo_attachments.insert(framebuffer.0, texture.0);
    }

    fn framebuffer_complete(&mut self, _framebuffer: FramebufferId) -> bool {
        true
    }

    fn current_framebuffer_binding(&mut self) -> FramebufferId {
        FramebufferId(self.surface_framebuffer)
    }

    fn create_vertex_array(&mut self) -> VertexArrayId {
        VertexArrayId(self.fresh_id())
    }

    fn delete_vertex_array(&mut self, _vao: VertexArrayId) {}

    fn bind_vertex_array(&mut self, _vao: VertexArrayId) {}

    fn create_buffer(&mut self) -> BufferId {
        BufferId(self.fresh_id())
    }

    fn delete_buffer(&mut self, _buffer: BufferId) {}

    fn bind_array_buffer(&mut self, _buffer: BufferId) {}

    fn buffer_data(&mut self, _data: &[u8]) {}

    fn vertex_attrib_pointer_f32(&mut self, _index: u32, _components: i32) {}

    fn enable_vertex_attrib(&mut self, _index: u32) {}

    fn draw_arrays(&mut self, _mode: PrimitiveMode, _first: i32, _count: i32) {
        let uniforms = self
            .uniform_values
            .iter()
            .filter(|((program, _), _)| *program == self.current_program)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect();
        let record = DrawRecord {
            program: self.current_program,
            framebuffer: self.bound_framebuffer,
            attachment: self.fbo_attachments.get(&self.bound_framebuffer).copied(),
            viewport: self.viewport_state,
            textures: self.unit_bindings,
            uniforms,
        };
        self.ops.push(Op::Draw(record));
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.viewport_state = (x, y, width, height);
    }

    fn clear_color(&mut self, _r: f32, _g: f32, _b: f32, _a: f32) {}

    fn clear_color_buffer(&mut self) {
        self.ops.push(Op::Clear {
            framebuffer: self.bound_framebuffer,
        });
    }

    fn set_capability(&mut self, _capability: Capability, _enabled: bool) {}

    fn depth_mask(&mut self, _enabled: bool) {}

    fn color_mask(&mut self, _r: bool, _g: bool, _b: bool, _a: bool) {}

    fn blend_func(&mut self, _src: BlendFactor, _dst: BlendFactor) {}

    fn supports_timer_queries(&self) -> bool {
        self.timer_support
    }

    fn create_query(&mut self) -> QueryId {
        QueryId(self.fresh_id())
    }

    fn delete_query(&mut self, _query: QueryId) {}

    fn begin_time_query(&mut self, query: QueryId) {
        self.query_in_flight = Some(query.0);
    }

    fn end_time_query(&mut self) {
        if let Some(q) = self.query_in_flight.take() {
            self.query_complete.push(q);
        }
    }

    fn query_result_available(&mut self, query: QueryId) -> bool {
        self.query_complete.contains(&query.0)
    }

    fn query_result_ns(&mut self, query: QueryId) -> u64 {
        self.query_complete.retain(|q| *q != query.0);
        self.frame_time_ns
    }

    fn version(&self) -> (u32, u32) {
        self.api_version
    }

    fn extensions(&self) -> Vec<String> {
        if self.timer_support {
            vec!["GL_EXT_disjoint_timer_query".to_string()]
        } else {
            Vec::new()
        }
    }
}
