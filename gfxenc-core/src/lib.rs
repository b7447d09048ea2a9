//! # gfxenc-core
//!
//! Frame-encoding subsystem of a remote-display server.
//!
//! This crate contains:
//! - **Parameter store**: `gfx.toml` loading with per-connection-type
//!   cascading ([`gfx_config`], [`connection`])
//! - **Codec backends**: the [`CodecBackend`] trait with OpenH264 and x264
//!   implementations over a 16-slot encoder pool ([`encoder`])
//! - **Pipeline**: [`EncodePipeline`], a dedicated encode thread between an
//!   inbound command queue and an outbound result queue, with frame-id flow
//!   control ([`pipeline`])
//! - **Error**: `thiserror`-based error types ([`error`])

pub mod connection;
pub mod encoder;
pub mod error;
pub mod gfx_config;
pub mod pipeline;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use connection::{ConnectionType, NUM_CONNECTION_TYPES, ParamTable};
pub use encoder::{
    CodecBackend, CodecId, EncodeFlags, EncodeOutcome, EncodeRequest, OpenH264Backend,
    PixelFormat, Rect, X264Backend, select_h264_backend,
};
pub use error::{BackendError, CommandError, GfxError, PipelineError};
pub use gfx_config::{
    CodecKind, CodecOrder, ConfigIssue, GfxConfig, GfxLoad, H264EncoderKind, LoadStatus,
    OpenH264Params, X264Params, load_gfx, load_gfx_str,
};
pub use pipeline::{
    EncodeCommand, EncodePipeline, EncodeResult, EncodeStatus, FlowControl, GfxCommand,
    PipelineConfig, PipelineState, ResultFlags, ResultReceiver, SurfaceUpdate,
};
