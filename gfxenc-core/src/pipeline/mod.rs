//! The frame-encoding pipeline.
//!
//! The session thread submits [`EncodeCommand`]s; a dedicated encode thread
//! takes them off an unbounded inbound queue strictly in order, runs them
//! through a [`CodecBackend`], and publishes [`EncodeResult`]s on the
//! outbound queue read through a [`ResultReceiver`].
//!
//! ```text
//! submit ──► inbound ──► [encode thread] ──► outbound ──► ResultReceiver
//!                            │  ▲
//!                            ▼  │
//!                         CodecBackend
//! ```
//!
//! Lifecycle: `Idle → Running → Draining → Terminated`. Commands submitted
//! while idle wait in the queue until [`EncodePipeline::start`].
//! [`EncodePipeline::shutdown`] lets the current command finish, drops the
//! rest, and joins the thread. Results already published stay readable.

pub mod command;
pub mod flow;
pub mod result;
pub mod stats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionType;
use crate::encoder::backend::{CodecBackend, EncodeFlags, EncodeRequest};
use crate::encoder::convert::packed_rgb_to_nv12;
use crate::encoder::types::PixelFormat;
use crate::error::{BackendError, PipelineError};

pub use command::{EncodeCommand, GfxCommand, GfxFrameHeader, SurfaceUpdate};
pub use flow::{FlowControl, FrameFlightState};
pub use result::{EncodeResult, EncodeStatus, ResultFlags, ResultReceiver};
pub use stats::{PipelineStats, PipelineStatsSnapshot};

/// Destination capacity handed to the backend per command.
pub const DEFAULT_MAX_COMPRESSED_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: u32 = 2;

const ENCODE_THREAD_NAME: &str = "gfx-encode";

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_compressed_bytes: usize,
    /// Zeroed headroom in front of every result payload.
    pub pad_bytes: usize,
    /// Split compressed output into results of at most this many bytes.
    pub output_chunk_bytes: Option<usize>,
    pub max_frames_in_flight: u32,
    /// Client connection class used to pick encoder tuning.
    pub connection_type: ConnectionType,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_compressed_bytes: DEFAULT_MAX_COMPRESSED_BYTES,
            pad_bytes: 0,
            output_chunk_bytes: None,
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            connection_type: ConnectionType::Autodetect,
        }
    }
}

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Running = 1,
    Draining = 2,
    Terminated = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// State visible to both threads.
#[derive(Debug)]
struct Shared {
    stop: AtomicBool,
    state: AtomicU8,
    stats: PipelineStats,
}

impl Shared {
    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }
}

enum Inbound {
    Command { seq: u64, cmd: EncodeCommand },
    /// Wakes the encode thread so it notices the stop flag.
    Wake,
}

// ── EncodePipeline ───────────────────────────────────────────────

/// Owner handle of one encode thread and its queues.
pub struct EncodePipeline {
    inbound: UnboundedSender<Inbound>,
    /// Everything the encode thread takes ownership of at `start`.
    worker: Option<Worker>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    flow: FlowControl,
    next_seq: AtomicU64,
}

impl EncodePipeline {
    pub fn new(
        backend: Box<dyn CodecBackend>,
        config: PipelineConfig,
    ) -> (Self, ResultReceiver) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(PipelineState::Idle as u8),
            stats: PipelineStats::default(),
        });
        let flow = FlowControl::new(config.max_frames_in_flight);

        let worker = Worker {
            dest: Vec::new(),
            backend,
            config,
            inbound: in_rx,
            outbound: out_tx,
            shared: shared.clone(),
            flow: flow.clone(),
        };

        let pipeline = Self {
            inbound: in_tx,
            worker: Some(worker),
            thread: None,
            shared,
            flow,
            next_seq: AtomicU64::new(1),
        };
        (pipeline, ResultReceiver::new(out_rx))
    }

    /// Spawn the encode thread.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let Some(worker) = self.worker.take() else {
            return Err(match self.shared.state() {
                PipelineState::Terminated => PipelineError::ShutDown,
                _ => PipelineError::AlreadyStarted,
            });
        };
        let codec = worker.backend.codec();
        self.shared.set_state(PipelineState::Running);
        let handle = std::thread::Builder::new()
            .name(ENCODE_THREAD_NAME.into())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.shared.set_state(PipelineState::Terminated);
                PipelineError::Spawn(e)
            })?;
        self.thread = Some(handle);
        info!(%codec, "encode pipeline started");
        Ok(())
    }

    /// Queue a command. Returns its sequence number, which results echo.
    pub fn submit(&self, cmd: impl Into<EncodeCommand>) -> Result<u64, PipelineError> {
        if self.shared.stop.load(Ordering::Acquire) {
            return Err(PipelineError::ShutDown);
        }
        let cmd = cmd.into();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        if let Some(frame_id) = cmd.frame_id() {
            self.flow.frame_generated(frame_id);
        }
        self.inbound.send(Inbound::Command { seq, cmd })?;
        trace!(seq, "command queued");
        Ok(seq)
    }

    pub fn flow(&self) -> FlowControl {
        self.flow.clone()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Stop the encode thread after its current command and wait for it.
    /// Idempotent.
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        self.shared.stop.store(true, Ordering::Release);
        self.worker = None;

        let Some(handle) = self.thread.take() else {
            self.shared.set_state(PipelineState::Terminated);
            return Ok(());
        };
        self.shared.set_state(PipelineState::Draining);
        // The thread may already be gone; then there is nobody to wake.
        let _ = self.inbound.send(Inbound::Wake);

        let joined = handle.join();
        self.shared.set_state(PipelineState::Terminated);
        info!(stats = ?self.stats(), "encode pipeline terminated");
        joined.map_err(|_| PipelineError::ThreadPanicked)
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "encode pipeline shutdown failed");
        }
    }
}

impl std::fmt::Debug for EncodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodePipeline")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

// ── Encode thread ────────────────────────────────────────────────

struct Worker {
    /// Reused destination buffer of `max_compressed_bytes`.
    dest: Vec<u8>,
    backend: Box<dyn CodecBackend>,
    config: PipelineConfig,
    inbound: UnboundedReceiver<Inbound>,
    outbound: UnboundedSender<EncodeResult>,
    shared: Arc<Shared>,
    flow: FlowControl,
}

/// Where a command's results go and how they are labelled.
struct Envelope {
    seq: u64,
    x: i32,
    y: i32,
    cx: i32,
    cy: i32,
    flags: ResultFlags,
    frame_id: Option<u32>,
}

impl Worker {
    fn run(mut self) {
        debug!("encode thread running");
        self.dest.resize(self.config.max_compressed_bytes, 0);

        while !self.stopping() {
            let Some(msg) = self.inbound.blocking_recv() else {
                break;
            };
            if self.stopping() {
                break;
            }
            if let Inbound::Command { seq, cmd } = msg {
                self.process(seq, cmd);
            }
        }
        debug!("encode thread exiting");
    }

    fn stopping(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    fn process(&mut self, seq: u64, cmd: EncodeCommand) {
        self.shared.stats.command();

        let mut flags = ResultFlags::empty();
        if cmd.is_gfx() {
            flags |= ResultFlags::GFX;
        }
        let frame_id = cmd.frame_id();
        if frame_id.is_some() {
            flags |= ResultFlags::FRAME_ID;
        }

        let update = match cmd.into_surface() {
            Ok(u) => u,
            Err(e) => {
                warn!(seq, error = %e, "rejecting malformed command");
                let env = Envelope {
                    seq,
                    x: 0,
                    y: 0,
                    cx: 0,
                    cy: 0,
                    flags,
                    frame_id,
                };
                let status = EncodeStatus::Failed(BackendError::InvalidInput(e.to_string()));
                self.publish_empty(&env, status, EncodeFlags::empty());
                return;
            }
        };

        let env = Envelope {
            seq,
            x: update.left,
            y: update.top,
            cx: update.width,
            cy: update.height,
            flags,
            frame_id,
        };

        let converted;
        let pixels: &[u8] = if update.format.is_packed_rgb() && !update.data.is_empty() {
            let nv12_len = PixelFormat::Nv12.tile_len(update.tile_width, update.tile_height);
            let mut nv12 = vec![0u8; nv12_len];
            packed_rgb_to_nv12(
                &update.data,
                update.format,
                update.tile_width,
                update.tile_height,
                &update.rects,
                &mut nv12,
            );
            converted = nv12;
            &converted
        } else {
            &update.data
        };

        let req = EncodeRequest {
            channel_id: update.channel_id,
            left: update.left,
            top: update.top,
            width: update.width,
            height: update.height,
            tile_width: update.tile_width,
            tile_height: update.tile_height,
            format: PixelFormat::Nv12,
            data: pixels,
            rects: &update.rects,
            connection_type: self.config.connection_type,
        };

        match self.backend.encode(&req, &mut self.dest) {
            Ok(outcome) => {
                if outcome.flags.contains(EncodeFlags::CONTEXT_CREATED) {
                    self.shared.stats.reinit();
                }
                let len = outcome.bytes_written.min(self.dest.len());
                trace!(seq, bytes = len, "command encoded");
                self.publish_encoded(&env, len, outcome.flags);
            }
            Err(BackendError::FrameSkipped) => {
                self.shared.stats.skipped();
                self.publish_empty(&env, EncodeStatus::Skipped, EncodeFlags::empty());
            }
            Err(e) => {
                warn!(seq, channel = update.channel_id, error = %e, "encode failed");
                self.shared.stats.failed();
                self.publish_empty(&env, EncodeStatus::Failed(e), EncodeFlags::empty());
            }
        }
    }

    /// `range` of the destination buffer with the padding prefix in front.
    fn padded(&self, range: std::ops::Range<usize>) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.config.pad_bytes + range.len());
        buf.put_bytes(0, self.config.pad_bytes);
        buf.put_slice(&self.dest[range]);
        buf.freeze()
    }

    fn publish_encoded(&self, env: &Envelope, len: usize, encode_flags: EncodeFlags) {
        let chunk = match self.config.output_chunk_bytes {
            Some(n) if n > 0 && len > n => n,
            _ => len.max(1),
        };
        let count = len.div_ceil(chunk).max(1);

        for i in 0..count {
            let start = i * chunk;
            let end = (start + chunk).min(len);
            let result = self.result(
                env,
                self.padded(start..end),
                i == count - 1,
                i > 0,
                EncodeStatus::Encoded,
                encode_flags,
            );
            self.publish(result);
        }
    }

    fn publish_empty(&self, env: &Envelope, status: EncodeStatus, encode_flags: EncodeFlags) {
        let result = self.result(env, self.padded(0..0), true, false, status, encode_flags);
        self.publish(result);
    }

    fn result(
        &self,
        env: &Envelope,
        data: Bytes,
        last: bool,
        continuation: bool,
        status: EncodeStatus,
        encode_flags: EncodeFlags,
    ) -> EncodeResult {
        EncodeResult {
            data,
            pad_bytes: self.config.pad_bytes,
            seq: env.seq,
            x: env.x,
            y: env.y,
            cx: env.cx,
            cy: env.cy,
            flags: env.flags,
            frame_id: env.frame_id,
            last,
            continuation,
            status,
            encode_flags,
        }
    }

    fn publish(&self, result: EncodeResult) {
        let frame_done = result.last.then_some(result.frame_id).flatten();
        self.shared.stats.result(result.payload().len());
        if let Some(id) = frame_done {
            self.flow.frame_sent(id);
        }
        if self.outbound.send(result).is_err() {
            trace!("result receiver dropped");
        }
    }
}
