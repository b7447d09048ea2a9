//! Error types for the frame-encoding subsystem.
//!
//! Codec and pipeline operations return typed errors; nothing in this crate
//! panics on bad input. Configuration problems are not errors at all: they
//! degrade the loaded config and are reported through
//! [`LoadStatus`](crate::gfx_config::LoadStatus).

use thiserror::Error;

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum GfxError {
    #[error("codec backend: {0}")]
    Backend(#[from] BackendError),

    #[error("encode command: {0}")]
    Command(#[from] CommandError),

    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ── BackendError ─────────────────────────────────────────────────

/// Status of a failed codec backend call.
///
/// Every variant is distinct so callers can tell a skipped frame from a
/// broken encoder from an undersized output buffer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The native encoder context could not be created or initialised.
    #[error("failed to create encoder context: {0}")]
    ContextCreate(String),

    /// The planar scratch buffer could not be allocated.
    #[error("failed to allocate {bytes} byte scratch buffer")]
    ScratchAlloc { bytes: usize },

    /// The native encode call reported an error.
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    /// Rate control dropped the frame; no bitstream was produced.
    #[error("frame skipped by rate control")]
    FrameSkipped,

    /// The bitstream does not fit in the destination buffer.
    /// Bytes already copied are garbage and must be discarded.
    #[error("output overflow: need {needed} bytes, have {capacity}")]
    Overflow { needed: usize, capacity: usize },

    /// The request geometry or pixel data is inconsistent.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ── CommandError ─────────────────────────────────────────────────

/// A command that cannot be turned into an encode request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("gfx header too short: need {needed} bytes, got {actual}")]
    HeaderTooShort { needed: usize, actual: usize },

    #[error("unknown pixel format {0:#x}")]
    UnknownFormat(u8),

    #[error("gfx command has no pixel payload")]
    MissingPayload,

    #[error("pixel data too short: need {needed} bytes, got {actual}")]
    PixelDataTooShort { needed: usize, actual: usize },
}

// ── PipelineError ────────────────────────────────────────────────

/// Misuse of the pipeline lifecycle.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline already started")]
    AlreadyStarted,

    /// The encode thread is gone; no more commands are accepted.
    #[error("pipeline is shut down")]
    ShutDown,

    #[error("failed to spawn encode thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("encode thread panicked")]
    ThreadPanicked,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PipelineError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PipelineError::ShutDown
    }
}
