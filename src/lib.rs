//! lucerna — a multipass Shadertoy-style shader render engine.
//!
//! Feed it a fragment shader source with one or more `mainImage`
//! functions and it takes care of the rest: splitting the source into
//! buffer passes and an Image pass, inferring what each `iChannelN` input
//! should read (noise atlas, the pass's own history, or another buffer),
//! driving the passes every frame with ping-pong feedback, and holding a
//! target frame rate by adapting resolution and per-buffer quality.
//!
//! The engine owns no GPU context: the host implements the
//! [`GpuContext`] command trait over whatever API it uses, makes the
//! context current, and calls:
//!
//! ```rust,ignore
//! let mut shader = MultipassShader::new(&source)?;
//! shader.init_gl(&mut gl, width, height)?;
//! shader.compile_all(&mut gl);
//! loop {
//!     shader.render(&mut gl, time, mouse_x, mouse_y, mouse_down);
//! }
//! ```
//!
//! Compile failures never abort the engine: failed passes are skipped and
//! reported through [`MultipassShader::get_all_errors`].

pub mod adaptive;
pub mod caps;
pub mod channels;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod optimizer;
pub mod parser;
pub mod pass;
pub mod rewrite;
pub mod scanner;
pub mod state_cache;

pub use adaptive::{AdaptiveConfig, AdaptiveController, AdaptiveStats};
pub use engine::{EngineStats, MultipassShader};
pub use error::{Result, ShaderError};
pub use gpu::GpuContext;
pub use pass::{Pass, PassType};

/// The types a host typically needs in scope.
pub mod prelude {
    pub use crate::adaptive::{AdaptiveConfig, AdaptiveStats};
    pub use crate::caps::{ApiVersion, CapabilityRegistry, ExecutionMode, Features};
    pub use crate::channels::ChannelSource;
    pub use crate::engine::{EngineStats, MultipassShader};
    pub use crate::error::{Result, ShaderError};
    pub use crate::gpu::{
        BlendFactor, BufferId, Capability, FramebufferId, GpuContext, PrimitiveMode, ProgramId,
        QueryId, TextureFilter, TextureFormat, TextureId, TextureWrap, UniformLocation,
        VertexArrayId,
    };
    pub use crate::optimizer::{OptimizerMode, PassProfile};
    pub use crate::pass::{Pass, PassType, CHANNEL_COUNT, MAX_PASSES};
}
