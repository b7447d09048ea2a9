//! Per-channel encoder contexts.
//!
//! A fixed table of [`POOL_CAPACITY`] slots indexed by `channel_id % 16`.
//! Each slot lazily owns one native session plus the scratch picture it
//! encodes from. A slot is rebuilt destroy-then-create whenever the region
//! size changes; contexts are never resized in place.

use tracing::info;

use super::backend::EncodeFlags;
use super::native::{NativeEngine, NativeSession};
use crate::error::BackendError;

/// Number of encoder slots per backend.
pub const POOL_CAPACITY: usize = 16;

/// Round up to the next multiple of 16 (the H.264 macroblock size).
pub const fn align_to_16(value: usize) -> usize {
    (value + 15) & !15
}

pub const fn slot_index(channel_id: u32) -> usize {
    channel_id as usize % POOL_CAPACITY
}

// ── Slot ─────────────────────────────────────────────────────────

/// One encoder instance: a native session and its scratch picture.
#[derive(Default)]
pub struct Slot {
    session: Option<Box<dyn NativeSession>>,
    scratch: Vec<u8>,
    width: i32,
    height: i32,
}

impl Slot {
    pub fn is_live(&self) -> bool {
        self.session.is_some()
    }

    /// Region size the slot was last initialised for.
    pub fn dimensions(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    /// The session and scratch picture, when the slot is live.
    pub fn parts(&mut self) -> Option<(&mut (dyn NativeSession + 'static), &mut [u8])> {
        let session = self.session.as_deref_mut()?;
        Some((session, self.scratch.as_mut_slice()))
    }

    /// Drop the session and scratch buffer. Returns whether anything was live.
    fn destroy(&mut self) -> bool {
        self.scratch = Vec::new();
        self.session.take().is_some()
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("live", &self.is_live())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("scratch_len", &self.scratch.len())
            .finish()
    }
}

/// Zero-filled buffer of `bytes`, reporting allocation failure instead of
/// aborting.
fn alloc_scratch(bytes: usize) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| BackendError::ScratchAlloc { bytes })?;
    buf.resize(bytes, 0);
    Ok(buf)
}

// ── EncoderPool ──────────────────────────────────────────────────

#[derive(Debug)]
pub struct EncoderPool {
    slots: [Slot; POOL_CAPACITY],
}

impl Default for EncoderPool {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderPool {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }

    pub fn slot(&self, channel_id: u32) -> &Slot {
        &self.slots[slot_index(channel_id)]
    }

    pub fn slot_mut(&mut self, channel_id: u32) -> &mut Slot {
        &mut self.slots[slot_index(channel_id)]
    }

    /// Number of slots holding a native session.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }

    /// Make the slot for `channel_id` ready to encode `width × height`.
    ///
    /// Reuses the live session when the size is unchanged. Otherwise the old
    /// session is destroyed and, for a non-empty size, a new one is opened at
    /// the padded size with a `padded_w × padded_h × 2` scratch buffer.
    pub fn prepare<E: NativeEngine>(
        &mut self,
        engine: &E,
        channel_id: u32,
        width: i32,
        height: i32,
        params: &E::Params,
    ) -> Result<EncodeFlags, BackendError> {
        let slot = &mut self.slots[slot_index(channel_id)];
        let mut flags = EncodeFlags::empty();

        if slot.is_live() && slot.width == width && slot.height == height {
            return Ok(flags);
        }

        if slot.destroy() {
            flags |= EncodeFlags::CONTEXT_DESTROYED;
        }

        if width > 0 && height > 0 {
            let padded_w = align_to_16(width as usize);
            let padded_h = align_to_16(height as usize);

            let session = engine
                .open(padded_w, padded_h, params)
                .map_err(|e| BackendError::ContextCreate(e.to_string()))?;
            let scratch = alloc_scratch(padded_w * padded_h * 2)?;

            slot.session = Some(session);
            slot.scratch = scratch;
            flags |= EncodeFlags::CONTEXT_CREATED;
            info!(
                engine = engine.name(),
                slot = slot_index(channel_id),
                width,
                height,
                padded_w,
                padded_h,
                "encoder context created"
            );
        }

        slot.width = width;
        slot.height = height;
        Ok(flags)
    }

    /// Destroy every live session.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.destroy();
        }
    }
}
