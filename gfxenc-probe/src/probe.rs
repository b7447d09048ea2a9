//! Probe core logic.
//!
//! Reports which native H.264 engines are usable for a given `gfx.toml`
//! and pushes a synthetic workload through an [`EncodePipeline`], playing
//! the part of both the session (submitting frames) and the client
//! (acknowledging them).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use gfxenc_core::encoder::NativeEngine;
use gfxenc_core::encoder::native::{openh264_engine, x264_engine};
use gfxenc_core::pipeline::{FrameFlightState, PipelineStatsSnapshot};
use gfxenc_core::{
    CodecBackend, EncodeFlags, EncodePipeline, EncodeResult, EncodeStatus, FlowControl, GfxError,
    GfxLoad, LoadStatus, PixelFormat, Rect, ResultReceiver, SurfaceUpdate, select_h264_backend,
};

use crate::config::{ProbeConfig, WorkloadConfig};

// ── Reports ──────────────────────────────────────────────────────

/// Engine availability for one loaded configuration.
#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub gfx_status: LoadStatus,
    pub codec_order: String,
    pub h264_encoder: String,
    pub openh264_functional: bool,
    pub x264_functional: bool,
    /// Backend the session would use, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

/// Outcome of a synthetic workload.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub frames_submitted: u32,
    pub frames_completed: u32,
    pub encoded: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Results that reported a fresh encoder context.
    pub contexts_created: u32,
    pub elapsed_ms: u64,
    pub stats: PipelineStatsSnapshot,
    pub flow: FrameFlightState,
}

/// Check both engines and resolve the backend `loaded` would select.
pub fn self_test(loaded: &GfxLoad) -> SelfTestReport {
    let openh264 = openh264_engine();
    let x264 = x264_engine();
    let report = SelfTestReport {
        gfx_status: loaded.status,
        codec_order: loaded.config.codec_order.to_string(),
        h264_encoder: loaded.config.h264_encoder.to_string(),
        openh264_functional: openh264.self_test(),
        x264_functional: x264.self_test(),
        selected: select_h264_backend(&loaded.config).map(|b| b.codec().to_string()),
    };
    info!(
        "engines: {}={} {}={}; selected: {}",
        openh264.name(),
        report.openh264_functional,
        x264.name(),
        report.x264_functional,
        report.selected.as_deref().unwrap_or("none")
    );
    report
}

// ── ProbeRunner ──────────────────────────────────────────────────

/// Drives a synthetic workload through an encode pipeline.
pub struct ProbeRunner {
    config: ProbeConfig,
    running: Arc<AtomicBool>,
}

impl ProbeRunner {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping the workload early from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Encode the configured workload with `backend`.
    ///
    /// Frames are only submitted while flow control allows it; otherwise
    /// the runner consumes results and acknowledges completed frames until
    /// a slot frees up. Acks are skipped entirely when the workload is
    /// configured as ack-suppressed.
    pub async fn run(&self, backend: Box<dyn CodecBackend>) -> Result<WorkloadReport, GfxError> {
        self.running.store(true, Ordering::SeqCst);
        let workload = &self.config.workload;
        let (mut pipeline, mut results) =
            EncodePipeline::new(backend, self.config.pipeline.clone());
        let flow = pipeline.flow();
        flow.set_ack_suppressed(workload.ack_off);
        pipeline.start()?;

        let started = Instant::now();
        let mut tally = Tally::default();
        let mut submitted = 0u32;

        for index in 0..workload.frames {
            if !self.running.load(Ordering::SeqCst) {
                warn!("workload stopped after {submitted} frames");
                break;
            }
            while !flow.may_dispatch() {
                let Some(result) = results.recv().await else {
                    break;
                };
                tally.record(&result, &flow, workload.ack_off);
            }

            let frame_id = index + 1;
            let update = synthetic_frame(workload, index, frame_id);
            let seq = pipeline.submit(update)?;
            debug!("submitted frame {frame_id} as command {seq}");
            submitted += 1;
        }

        while tally.frames_completed < submitted {
            match results.recv().await {
                Some(result) => tally.record(&result, &flow, workload.ack_off),
                None => break,
            }
        }
        pipeline.shutdown()?;
        drain(&mut results, &mut tally, &flow, workload.ack_off);

        let report = WorkloadReport {
            frames_submitted: submitted,
            frames_completed: tally.frames_completed,
            encoded: tally.encoded,
            skipped: tally.skipped,
            failed: tally.failed,
            contexts_created: tally.contexts_created,
            elapsed_ms: started.elapsed().as_millis() as u64,
            stats: pipeline.stats(),
            flow: flow.snapshot(),
        };
        info!(
            "{} frames in {} ms: {} encoded, {} skipped, {} failed",
            report.frames_completed, report.elapsed_ms, report.encoded, report.skipped,
            report.failed
        );
        self.running.store(false, Ordering::SeqCst);
        Ok(report)
    }
}

fn drain(results: &mut ResultReceiver, tally: &mut Tally, flow: &FlowControl, ack_off: bool) {
    for result in results.drain_ready() {
        tally.record(&result, flow, ack_off);
    }
}

// ── Result accounting ────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tally {
    frames_completed: u32,
    encoded: u32,
    skipped: u32,
    failed: u32,
    contexts_created: u32,
}

impl Tally {
    fn record(&mut self, result: &EncodeResult, flow: &FlowControl, ack_off: bool) {
        if result.encode_flags.contains(EncodeFlags::CONTEXT_CREATED) {
            self.contexts_created += 1;
        }
        match &result.status {
            EncodeStatus::Encoded => self.encoded += 1,
            EncodeStatus::Skipped => self.skipped += 1,
            EncodeStatus::Failed(e) => {
                warn!("command {} failed: {e}", result.seq);
                self.failed += 1;
            }
        }
        if !result.last {
            return;
        }
        self.frames_completed += 1;
        if let (Some(id), false) = (result.frame_id, ack_off) {
            flow.frame_acknowledged(id);
        }
    }
}

// ── Synthetic frames ─────────────────────────────────────────────

/// A full-region update whose content shifts with `index`.
pub fn synthetic_frame(workload: &WorkloadConfig, index: u32, frame_id: u32) -> SurfaceUpdate {
    let format = workload.pixel_format();
    let (w, h) = (workload.width as usize, workload.height as usize);
    let channels = workload.channels.max(1);
    SurfaceUpdate {
        data: Bytes::from(pattern(format, w, h, index)),
        rects: vec![Rect::new(0, 0, workload.width as i32, workload.height as i32)],
        left: 0,
        top: 0,
        width: workload.width as i32,
        height: workload.height as i32,
        tile_width: w,
        tile_height: h,
        format,
        channel_id: index % channels,
        frame_id: Some(frame_id),
    }
}

fn pattern(format: PixelFormat, width: usize, height: usize, index: u32) -> Vec<u8> {
    let shift = index as usize;
    match format {
        PixelFormat::Nv12 => {
            let mut data = vec![128u8; format.tile_len(width, height)];
            for (row, line) in data[..width * height].chunks_exact_mut(width.max(1)).enumerate() {
                for (col, px) in line.iter_mut().enumerate() {
                    *px = ((col + row + shift) & 0xff) as u8;
                }
            }
            data
        }
        PixelFormat::Bgra32 | PixelFormat::Rgba32 => {
            let mut data = vec![0u8; format.tile_len(width, height)];
            for (i, px) in data.chunks_exact_mut(4).enumerate() {
                let (row, col) = (i / width.max(1), i % width.max(1));
                px[0] = ((col + shift) & 0xff) as u8;
                px[1] = ((row + shift) & 0xff) as u8;
                px[2] = ((col ^ row) & 0xff) as u8;
                px[3] = 0xff;
            }
            data
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
