//! Error types for the render engine.
//!
//! Parse and resource failures abort engine construction; compile failures
//! are recorded per pass and the pass is skipped each frame while remaining
//! reportable through [`MultipassShader::get_error`]. Missing producers and
//! unavailable GPU timers degrade behavior without failing anything.
//!
//! [`MultipassShader::get_error`]: crate::engine::MultipassShader::get_error

use thiserror::Error;

use crate::pass::PassType;

/// The error type for engine construction and GPU initialization.
#[derive(Error, Debug)]
pub enum ShaderError {
    /// The source contains no `mainImage` function and no `void main(`.
    #[error("source is not a shader: no mainImage or main function found")]
    Parse,

    /// A pass failed to compile or link. Carries the driver info log.
    ///
    /// Never propagated out of `compile_all`; stored on the pass instead.
    #[error("pass '{pass}' failed to compile: {log}")]
    Compile {
        /// Human-readable pass name (e.g. "Buffer A").
        pass: String,
        /// Compiler/linker info log as reported by the GPU interface.
        log: String,
    },

    /// GPU object creation failed (out of memory, incomplete framebuffer).
    #[error("GPU resource creation failed: {0}")]
    Resource(String),

    /// A channel resolved to a buffer type with no corresponding pass.
    /// The bind degrades to the noise texture.
    #[error("channel {channel} reads {wanted:?} but no such pass exists")]
    MissingProducer {
        /// Channel index in 0..4.
        channel: usize,
        /// The buffer pass type the channel asked for.
        wanted: PassType,
    },

    /// GPU timer queries are unsupported; frame timing falls back to the
    /// wall clock.
    #[error("GPU timer queries unavailable, using wall-clock timing")]
    TimerUnavailable,
}

/// Alias for `Result<T, ShaderError>`.
pub type Result<T> = std::result::Result<T, ShaderError>;
