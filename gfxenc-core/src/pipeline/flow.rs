//! Frame-id flow control.
//!
//! The session thread records generated frame ids and client acks, the
//! encode thread records sent ids. The pipeline itself never waits on these
//! counters; callers consult [`FlowControl::may_dispatch`] before capturing
//! more frames.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::trace;

/// Point-in-time view of the frame counters.
///
/// Always satisfies `last_acknowledged <= last_sent <= last_generated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FrameFlightState {
    pub last_acknowledged: u32,
    pub last_generated: u32,
    pub last_sent: u32,
    pub frames_in_flight: u32,
    /// The client asked not to send frame acknowledgements.
    pub ack_suppressed: bool,
    pub max_frames_in_flight: u32,
}

impl FrameFlightState {
    fn recompute(&mut self) {
        self.frames_in_flight = if self.ack_suppressed {
            0
        } else {
            self.last_sent - self.last_acknowledged
        };
    }

    pub fn may_dispatch(&self) -> bool {
        self.ack_suppressed || self.frames_in_flight < self.max_frames_in_flight
    }
}

/// Shared handle to the frame counters of one pipeline.
#[derive(Debug, Clone)]
pub struct FlowControl {
    inner: Arc<Mutex<FrameFlightState>>,
}

impl FlowControl {
    pub fn new(max_frames_in_flight: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FrameFlightState {
                max_frames_in_flight,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameFlightState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A frame id entered the pipeline. Older ids are ignored.
    pub fn frame_generated(&self, frame_id: u32) {
        let mut s = self.lock();
        if frame_id > s.last_generated {
            s.last_generated = frame_id;
        }
    }

    /// The last result of a frame left the encode thread.
    pub fn frame_sent(&self, frame_id: u32) {
        let mut s = self.lock();
        let id = frame_id.min(s.last_generated);
        if id > s.last_sent {
            s.last_sent = id;
            if s.ack_suppressed {
                s.last_acknowledged = id;
            }
            s.recompute();
        }
        trace!(frame_id, in_flight = s.frames_in_flight, "frame sent");
    }

    /// The client acknowledged a frame.
    pub fn frame_acknowledged(&self, frame_id: u32) {
        let mut s = self.lock();
        let id = frame_id.min(s.last_sent);
        if id > s.last_acknowledged {
            s.last_acknowledged = id;
            s.recompute();
        }
        trace!(frame_id, in_flight = s.frames_in_flight, "frame acknowledged");
    }

    /// Enable or disable acknowledgement suppression. While suppressed every
    /// sent frame counts as acknowledged.
    pub fn set_ack_suppressed(&self, suppressed: bool) {
        let mut s = self.lock();
        s.ack_suppressed = suppressed;
        if suppressed {
            s.last_acknowledged = s.last_sent;
        }
        s.recompute();
    }

    pub fn may_dispatch(&self) -> bool {
        self.lock().may_dispatch()
    }

    pub fn snapshot(&self) -> FrameFlightState {
        *self.lock()
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(crate::pipeline::DEFAULT_MAX_FRAMES_IN_FLIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_frames_between_sent_and_acked() {
        let flow = FlowControl::new(2);
        for id in 1..=3 {
            flow.frame_generated(id);
        }
        flow.frame_sent(1);
        flow.frame_sent(2);
        assert_eq!(flow.snapshot().frames_in_flight, 2);
        assert!(!flow.may_dispatch());

        flow.frame_acknowledged(1);
        assert_eq!(flow.snapshot().frames_in_flight, 1);
        assert!(flow.may_dispatch());
    }

    #[test]
    fn counters_never_cross() {
        let flow = FlowControl::new(4);
        flow.frame_generated(5);
        flow.frame_sent(9);
        flow.frame_acknowledged(12);
        let s = flow.snapshot();
        assert_eq!((s.last_generated, s.last_sent, s.last_acknowledged), (5, 5, 5));

        flow.frame_sent(3);
        flow.frame_acknowledged(2);
        flow.frame_generated(1);
        let s = flow.snapshot();
        assert_eq!((s.last_generated, s.last_sent, s.last_acknowledged), (5, 5, 5));
    }

    #[test]
    fn suppressed_acks_keep_nothing_in_flight() {
        let flow = FlowControl::new(1);
        flow.set_ack_suppressed(true);
        for id in 1..=10 {
            flow.frame_generated(id);
            flow.frame_sent(id);
        }
        assert_eq!(flow.snapshot().frames_in_flight, 0);
        assert!(flow.may_dispatch());

        flow.set_ack_suppressed(false);
        assert_eq!(flow.snapshot().last_acknowledged, 10);
        flow.frame_generated(11);
        flow.frame_sent(11);
        assert!(!flow.may_dispatch());
    }

    #[test]
    fn clones_share_state() {
        let a = FlowControl::new(3);
        let b = a.clone();
        a.frame_generated(4);
        assert_eq!(b.snapshot().last_generated, 4);
    }
}
