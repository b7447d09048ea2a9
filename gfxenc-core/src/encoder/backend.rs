//! The codec backend contract and backend selection.

use bitflags::bitflags;

use super::native::{self, NativeEngine};
use super::openh264::OpenH264Backend;
use super::types::{PixelFormat, Rect};
use super::x264::X264Backend;
use crate::connection::ConnectionType;
use crate::error::BackendError;
use crate::gfx_config::{CodecKind, GfxConfig, H264EncoderKind, OpenH264Params, X264Params};

bitflags! {
    /// Context lifecycle events reported by one encode call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EncodeFlags: u32 {
        const CONTEXT_CREATED   = 1;
        const CONTEXT_DESTROYED = 2;
    }
}

/// Which codec a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    OpenH264,
    X264,
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CodecId::OpenH264 => "OpenH264",
            CodecId::X264 => "x264",
        })
    }
}

// ── EncodeRequest ────────────────────────────────────────────────

/// One encode call. Borrowed from the command being processed.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    /// Selects the pool slot (`channel_id % 16`).
    pub channel_id: u32,
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    /// Luma stride and row count of `data`.
    pub tile_width: usize,
    pub tile_height: usize,
    pub format: PixelFormat,
    /// NV12 pixels. Empty means "initialise the context only".
    pub data: &'a [u8],
    pub rects: &'a [Rect],
    pub connection_type: ConnectionType,
}

impl EncodeRequest<'_> {
    /// Check the pixel data against the declared tile geometry.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.data.is_empty() {
            return Ok(());
        }
        if self.format != PixelFormat::Nv12 {
            return Err(BackendError::InvalidInput(format!(
                "expected NV12 pixels, got {:?}",
                self.format
            )));
        }
        let needed = PixelFormat::Nv12.tile_len(self.tile_width, self.tile_height);
        if self.data.len() < needed {
            return Err(BackendError::InvalidInput(format!(
                "{}x{} NV12 tile needs {needed} bytes, got {}",
                self.tile_width,
                self.tile_height,
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Parameter-table class this request is tuned for.
    pub fn tuning_class(&self) -> ConnectionType {
        ConnectionType::clamp_for_encode(self.connection_type as u32)
    }
}

/// Result of a successful encode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodeOutcome {
    pub bytes_written: usize,
    pub flags: EncodeFlags,
}

// ── CodecBackend ─────────────────────────────────────────────────

/// A codec implementation driven by the encode thread.
///
/// Construction creates the backend; dropping it destroys every live
/// native context and scratch buffer.
pub trait CodecBackend: Send {
    fn codec(&self) -> CodecId;

    /// Encode `req` into `dest`, returning the number of bytes written.
    ///
    /// On [`BackendError::Overflow`] the bytes already in `dest` are garbage.
    fn encode(
        &mut self,
        req: &EncodeRequest<'_>,
        dest: &mut [u8],
    ) -> Result<EncodeOutcome, BackendError>;

    /// Whether the underlying codec library is functional.
    fn self_test(&self) -> bool;
}

impl std::fmt::Debug for dyn CodecBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CodecBackend({})", self.codec())
    }
}

// ── Selection ────────────────────────────────────────────────────

/// Build the H.264 backend the loaded config asks for, using the engines
/// linked into this build.
pub fn select_h264_backend(config: &GfxConfig) -> Option<Box<dyn CodecBackend>> {
    select_h264_backend_with(config, native::openh264_engine(), native::x264_engine())
}

/// Build the H.264 backend for `config` from explicit engines.
///
/// Returns `None` when H.264 is not in the codec order or when the selected
/// engine fails its self-test. Callers should then stop advertising H.264.
pub fn select_h264_backend_with<O, X>(
    config: &GfxConfig,
    openh264: O,
    x264: X,
) -> Option<Box<dyn CodecBackend>>
where
    O: NativeEngine<Params = OpenH264Params> + 'static,
    X: NativeEngine<Params = X264Params> + 'static,
{
    if !config.codec_order.contains(CodecKind::H264) {
        tracing::debug!(order = %config.codec_order, "H.264 not ordered, no backend");
        return None;
    }

    let backend: Box<dyn CodecBackend> = match config.h264_encoder {
        H264EncoderKind::OpenH264 => {
            Box::new(OpenH264Backend::new(openh264, config.openh264.clone()))
        }
        H264EncoderKind::X264 => Box::new(X264Backend::new(x264, config.x264.clone())),
    };

    if !backend.self_test() {
        tracing::warn!(codec = %backend.codec(), "H.264 encoder self-test failed, H.264 disabled");
        return None;
    }
    tracing::info!(codec = %backend.codec(), "H.264 encoder ready");
    Some(backend)
}
