//! H.264 codec backends.
//!
//! - [`backend`]: the [`CodecBackend`] contract and backend selection.
//! - [`openh264`] / [`x264`]: the two H.264 implementations.
//! - [`pool`]: per-channel encoder contexts.
//! - [`native`]: the seam to the native codec libraries.
//! - [`convert`]: planar copies and RGB→NV12 conversion.

pub mod backend;
pub mod convert;
pub mod native;
pub mod openh264;
pub mod pool;
pub mod types;
pub mod x264;

pub use backend::{
    CodecBackend, CodecId, EncodeFlags, EncodeOutcome, EncodeRequest, select_h264_backend,
    select_h264_backend_with,
};
pub use native::{
    NalLayer, NativeEngine, NativeError, NativeOutput, NativeSession, Picture, PlaneLayout,
    UnlinkedEngine,
};
pub use openh264::OpenH264Backend;
pub use pool::{EncoderPool, POOL_CAPACITY, align_to_16};
pub use types::{PixelFormat, Rect};
pub use x264::X264Backend;
