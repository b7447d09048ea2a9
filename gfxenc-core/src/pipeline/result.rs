//! Results published by the encode thread.

use bitflags::bitflags;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::encoder::backend::EncodeFlags;
use crate::error::BackendError;

bitflags! {
    /// What kind of command a result answers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResultFlags: u32 {
        /// Produced for the dynamic graphics channel.
        const GFX      = 0x01;
        /// `frame_id` is meaningful.
        const FRAME_ID = 0x02;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeStatus {
    Encoded,
    Skipped,
    Failed(BackendError),
}

/// One block of compressed output.
///
/// `data` starts with `pad_bytes` zeroed bytes the transport may overwrite
/// with its own framing; the compressed payload follows.
#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub data: Bytes,
    pub pad_bytes: usize,
    /// Sequence number returned by `submit` for the originating command.
    pub seq: u64,
    pub x: i32,
    pub y: i32,
    pub cx: i32,
    pub cy: i32,
    pub flags: ResultFlags,
    pub frame_id: Option<u32>,
    /// Final result of its command.
    pub last: bool,
    /// Continues the previous result of the same command.
    pub continuation: bool,
    pub status: EncodeStatus,
    pub encode_flags: EncodeFlags,
}

impl EncodeResult {
    /// Compressed bytes without the padding prefix.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.pad_bytes.min(self.data.len())..]
    }

    pub fn is_encoded(&self) -> bool {
        self.status == EncodeStatus::Encoded
    }
}

// ── ResultReceiver ───────────────────────────────────────────────

/// Consumer end of the outbound queue.
///
/// Stays readable after the pipeline shuts down until every published
/// result has been taken.
#[derive(Debug)]
pub struct ResultReceiver {
    rx: UnboundedReceiver<EncodeResult>,
}

impl ResultReceiver {
    pub(crate) fn new(rx: UnboundedReceiver<EncodeResult>) -> Self {
        Self { rx }
    }

    /// Wait for the next result. `None` once the pipeline is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<EncodeResult> {
        self.rx.recv().await
    }

    /// Next result if one is ready.
    pub fn try_recv(&mut self) -> Option<EncodeResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking variant of [`recv`](Self::recv) for synchronous consumers.
    /// Must not be called from inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<EncodeResult> {
        self.rx.blocking_recv()
    }

    /// Take every result that is ready now.
    pub fn drain_ready(&mut self) -> Vec<EncodeResult> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
