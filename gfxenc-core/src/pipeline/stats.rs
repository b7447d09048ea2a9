//! Per-pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    commands: AtomicU64,
    results: AtomicU64,
    bytes: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    reinits: AtomicU64,
}

/// Copy of [`PipelineStats`] at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineStatsSnapshot {
    /// Commands taken off the inbound queue.
    pub commands: u64,
    pub results: u64,
    /// Compressed payload bytes, padding excluded.
    pub bytes: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Encoder contexts (re)created.
    pub reinits: u64,
}

impl PipelineStats {
    pub(crate) fn command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn result(&self, payload_len: usize) {
        self.results.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub(crate) fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reinit(&self) {
        self.reinits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            results: self.results.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reinits: self.reinits.load(Ordering::Relaxed),
        }
    }
}
