//! Pass records: type, source, compiled program, ping-pong state and
//! cached uniform locations.

use crate::channels::ChannelSource;
use crate::gpu::{FramebufferId, ProgramId, TextureId, UniformLocation};

/// Shadertoy exposes four input channels per pass (`iChannel0..3`).
pub const CHANNEL_COUNT: usize = 4;

/// Hard cap on passes per shader. Sources with more `mainImage` functions
/// are truncated with a log message.
pub const MAX_PASSES: usize = 8;

/// The role a pass plays in the pipeline.
///
/// Only the four buffer types and `Image` are rendered. `Common` is prefix
/// source shared by every pass; `Sound` is recognized so its marker doesn't
/// confuse type assignment, then excluded from rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassType {
    BufferA,
    BufferB,
    BufferC,
    BufferD,
    Image,
    Common,
    Sound,
}

impl PassType {
    /// The buffer types in render order.
    pub const BUFFERS: [PassType; 4] = [
        PassType::BufferA,
        PassType::BufferB,
        PassType::BufferC,
        PassType::BufferD,
    ];

    /// True for the offscreen ping-pong targets.
    #[inline]
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            PassType::BufferA | PassType::BufferB | PassType::BufferC | PassType::BufferD
        )
    }

    /// The nth buffer type, saturating at Buffer D.
    pub fn buffer(index: usize) -> PassType {
        *Self::BUFFERS.get(index).unwrap_or(&PassType::BufferD)
    }

    /// Human-readable name matching the Shadertoy tab labels.
    pub fn label(self) -> &'static str {
        match self {
            PassType::BufferA => "Buffer A",
            PassType::BufferB => "Buffer B",
            PassType::BufferC => "Buffer C",
            PassType::BufferD => "Buffer D",
            PassType::Image => "Image",
            PassType::Common => "Common",
            PassType::Sound => "Sound",
        }
    }
}

impl std::fmt::Display for PassType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolved locations of every well-known Shadertoy uniform. `NONE` means
/// the program doesn't use that uniform and the per-frame upload skips it.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformLocations {
    pub i_time: UniformLocation,
    pub i_time_delta: UniformLocation,
    pub i_frame_rate: UniformLocation,
    pub i_frame: UniformLocation,
    pub i_resolution: UniformLocation,
    pub i_mouse: UniformLocation,
    pub i_date: UniformLocation,
    pub i_sample_rate: UniformLocation,
    pub i_channel_resolution: UniformLocation,
    pub i_channel: [UniformLocation; CHANNEL_COUNT],
}

/// One extracted pass and everything the render loop needs to drive it.
///
/// Created at parse time with no GPU state; `compile` and `init_gl` fill in
/// the program, framebuffer and ping-pong textures. Buffer passes own two
/// textures; `ping_pong_index` always points at the one holding the most
/// recently completed render, i.e. what readers should sample.
#[derive(Debug)]
pub struct Pass {
    pub pass_type: PassType,
    pub name: String,
    /// Extracted source, before the compatibility rewrite and wrapper.
    pub source: String,
    /// Info log of the last failed compile. A failed pass is skipped every
    /// frame but never aborts the engine.
    pub compile_error: Option<String>,
    pub program: Option<ProgramId>,
    pub channels: [ChannelSource; CHANNEL_COUNT],
    /// Producer pass index per channel, resolved once at compile-all time.
    /// `-1` means no producer; the bind falls back to the noise texture.
    pub channel_buffer_index: [i32; CHANNEL_COUNT],
    /// Offscreen target; buffer passes only.
    pub fbo: Option<FramebufferId>,
    /// Ping-pong texture pair; buffer passes only.
    pub textures: [Option<TextureId>; 2],
    /// Index of the texture holding the latest completed render (0 or 1).
    pub ping_pong_index: usize,
    pub width: u32,
    pub height: u32,
    /// Set on creation and after every resize; the next render clears the
    /// target before drawing.
    pub needs_clear: bool,
    /// True iff some reader samples this pass with level-of-detail lookups;
    /// promotes the min filter to trilinear and regenerates mipmaps after
    /// every render.
    pub needs_mipmaps: bool,
    pub uniforms: UniformLocations,
}

impl Pass {
    pub fn new(pass_type: PassType, name: impl Into<String>, source: String) -> Self {
        Self {
            pass_type,
            name: name.into(),
            source,
            compile_error: None,
            program: None,
            channels: [ChannelSource::Noise; CHANNEL_COUNT],
            channel_buffer_index: [-1; CHANNEL_COUNT],
            fbo: None,
            textures: [None, None],
            ping_pong_index: 0,
            width: 0,
            height: 0,
            needs_clear: true,
            needs_mipmaps: false,
            uniforms: UniformLocations::default(),
        }
    }

    /// The texture readers should sample: the latest completed render.
    #[inline]
    pub fn read_texture(&self) -> Option<TextureId> {
        self.textures[self.ping_pong_index]
    }

    /// The texture the next render writes into.
    #[inline]
    pub fn write_texture(&self) -> Option<TextureId> {
        self.textures[1 - self.ping_pong_index]
    }

    /// Flip after a completed render so the just-written texture becomes
    /// what subsequent readers (and the next frame) see.
    #[inline]
    pub fn toggle_ping_pong(&mut self) {
        self.ping_pong_index = 1 - self.ping_pong_index;
    }

    /// Compiled and renderable.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.program.is_some()
    }
}
