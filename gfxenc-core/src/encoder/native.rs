//! Seam between the codec backends and the native codec libraries.
//!
//! A [`NativeEngine`] opens [`NativeSession`]s; a session turns one planar
//! picture into zero or more NAL layers. The OpenH264 engine is linked when
//! the `openh264` cargo feature is enabled. Everything else goes through
//! [`UnlinkedEngine`], which behaves like a stub library: sessions cannot be
//! opened and the self-test reports a non-functional codec.

use std::marker::PhantomData;

use thiserror::Error;

// ── Picture ──────────────────────────────────────────────────────

/// Plane arrangement of a [`Picture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneLayout {
    /// Y, then U, then V. Chroma pitch is `width / 2`.
    I420,
    /// Y, then interleaved UV. Both planes have pitch `width`.
    Nv12,
}

/// A planar 4:2:0 picture handed to a native session.
///
/// `width` and `height` are the coded dimensions (already padded to the
/// macroblock grid); `data` holds at least `width * height * 3 / 2` bytes.
#[derive(Debug, Clone, Copy)]
pub struct Picture<'a> {
    pub width: usize,
    pub height: usize,
    pub layout: PlaneLayout,
    pub data: &'a [u8],
}

impl<'a> Picture<'a> {
    pub fn luma(&self) -> &'a [u8] {
        &self.data[..self.width * self.height]
    }

    /// Chroma planes as `(u, v)` for I420, or `(uv, &[])` for NV12.
    pub fn chroma(&self) -> (&'a [u8], &'a [u8]) {
        let luma = self.width * self.height;
        match self.layout {
            PlaneLayout::I420 => {
                let plane = luma / 4;
                (
                    &self.data[luma..luma + plane],
                    &self.data[luma + plane..luma + 2 * plane],
                )
            }
            PlaneLayout::Nv12 => (&self.data[luma..luma + luma / 2], &[]),
        }
    }
}

// ── Output ───────────────────────────────────────────────────────

/// NAL units of one coded layer, in bitstream order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NalLayer {
    pub nals: Vec<Vec<u8>>,
}

impl NalLayer {
    pub fn len(&self) -> usize {
        self.nals.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a native encode call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeOutput {
    /// Rate control dropped the picture.
    Skipped,
    Coded(Vec<NalLayer>),
}

impl NativeOutput {
    /// Total bytes across all layers.
    pub fn len(&self) -> usize {
        match self {
            NativeOutput::Skipped => 0,
            NativeOutput::Coded(layers) => layers.iter().map(NalLayer::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum NativeError {
    #[error("{0} codec library is not linked into this build")]
    Unlinked(&'static str),

    #[error("{0}")]
    Library(String),
}

// ── Traits ───────────────────────────────────────────────────────

/// One live native encoder context.
pub trait NativeSession: Send {
    fn encode(&mut self, picture: &Picture<'_>) -> Result<NativeOutput, NativeError>;
}

/// A native codec library able to open encoder contexts.
pub trait NativeEngine: Send {
    /// Per-connection-type tuning record the engine consumes.
    type Params: Default;

    fn name(&self) -> &'static str;

    /// Open a context for `width × height` pictures (already padded).
    fn open(
        &self,
        width: usize,
        height: usize,
        params: &Self::Params,
    ) -> Result<Box<dyn NativeSession>, NativeError>;

    /// Open a minimal context and drop it again.
    fn self_test(&self) -> bool {
        match self.open(16, 16, &Self::Params::default()) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(engine = self.name(), error = %e, "self-test failed");
                false
            }
        }
    }
}

// ── UnlinkedEngine ───────────────────────────────────────────────

/// Stand-in for a codec library that is not part of this build.
pub struct UnlinkedEngine<P> {
    name: &'static str,
    _params: PhantomData<fn(&P)>,
}

impl<P> UnlinkedEngine<P> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _params: PhantomData,
        }
    }
}

impl<P> std::fmt::Debug for UnlinkedEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UnlinkedEngine").field(&self.name).finish()
    }
}

impl<P: Default> NativeEngine for UnlinkedEngine<P> {
    type Params = P;

    fn name(&self) -> &'static str {
        self.name
    }

    fn open(&self, _: usize, _: usize, _: &P) -> Result<Box<dyn NativeSession>, NativeError> {
        Err(NativeError::Unlinked(self.name))
    }

    fn self_test(&self) -> bool {
        false
    }
}

// ── OpenH264 ─────────────────────────────────────────────────────

#[cfg(feature = "openh264")]
pub use linked::OpenH264Engine;

/// The OpenH264 engine of this build: the linked library when the
/// `openh264` feature is enabled, an [`UnlinkedEngine`] otherwise.
#[cfg(feature = "openh264")]
pub fn openh264_engine() -> OpenH264Engine {
    OpenH264Engine
}

#[cfg(not(feature = "openh264"))]
pub fn openh264_engine() -> UnlinkedEngine<crate::gfx_config::OpenH264Params> {
    UnlinkedEngine::new("OpenH264")
}

/// No x264 binding is linked; the engine is always the stub.
pub fn x264_engine() -> UnlinkedEngine<crate::gfx_config::X264Params> {
    UnlinkedEngine::new("x264")
}

#[cfg(feature = "openh264")]
mod linked {
    use openh264::OpenH264API;
    use openh264::encoder::{
        BitRate, Encoder, EncoderConfig, FrameRate, FrameType, RateControlMode, SpsPpsStrategy,
        UsageType,
    };
    use openh264::formats::YUVSource;

    use super::{NalLayer, NativeEngine, NativeError, NativeOutput, NativeSession, Picture};
    use crate::gfx_config::OpenH264Params;

    /// Cisco OpenH264, compiled from source by the `openh264` crate.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct OpenH264Engine;

    impl NativeEngine for OpenH264Engine {
        type Params = OpenH264Params;

        fn name(&self) -> &'static str {
            "OpenH264"
        }

        fn open(
            &self,
            width: usize,
            height: usize,
            params: &OpenH264Params,
        ) -> Result<Box<dyn NativeSession>, NativeError> {
            let mut config = EncoderConfig::new()
                .usage_type(UsageType::CameraVideoRealTime)
                .rate_control_mode(RateControlMode::Bitrate)
                .skip_frames(params.enable_frame_skip)
                .sps_pps_strategy(SpsPpsStrategy::ConstantId);
            if params.target_bitrate > 0 {
                let bps = u32::try_from(params.target_bitrate).unwrap_or(u32::MAX);
                config = config.bitrate(BitRate::from_bps(bps));
            }
            if params.max_frame_rate > 0.0 {
                config = config.max_frame_rate(FrameRate::from_hz(params.max_frame_rate));
            }
            // The binding has no peak-bitrate knob; the target above governs.
            if params.max_bitrate > 0 {
                tracing::trace!(max_bitrate = params.max_bitrate, "max bitrate not applied");
            }

            let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
                .map_err(|e| NativeError::Library(e.to_string()))?;
            tracing::debug!(width, height, "OpenH264 context opened");
            Ok(Box::new(OpenH264Session { encoder }))
        }
    }

    struct OpenH264Session {
        encoder: Encoder,
    }

    struct I420View<'a> {
        width: usize,
        height: usize,
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
    }

    impl YUVSource for I420View<'_> {
        fn dimensions(&self) -> (usize, usize) {
            (self.width, self.height)
        }

        fn strides(&self) -> (usize, usize, usize) {
            (self.width, self.width / 2, self.width / 2)
        }

        fn y(&self) -> &[u8] {
            self.y
        }

        fn u(&self) -> &[u8] {
            self.u
        }

        fn v(&self) -> &[u8] {
            self.v
        }
    }

    impl NativeSession for OpenH264Session {
        fn encode(&mut self, picture: &Picture<'_>) -> Result<NativeOutput, NativeError> {
            let (u, v) = picture.chroma();
            let view = I420View {
                width: picture.width,
                height: picture.height,
                y: picture.luma(),
                u,
                v,
            };
            let bitstream = self
                .encoder
                .encode(&view)
                .map_err(|e| NativeError::Library(e.to_string()))?;

            if matches!(bitstream.frame_type(), FrameType::Skip) {
                return Ok(NativeOutput::Skipped);
            }

            let layers = (0..bitstream.num_layers())
                .filter_map(|i| bitstream.layer(i))
                .map(|layer| NalLayer {
                    nals: (0..layer.nal_count())
                        .filter_map(|j| layer.nal_unit(j))
                        .map(<[u8]>::to_vec)
                        .collect(),
                })
                .collect();
            Ok(NativeOutput::Coded(layers))
        }
    }
}
