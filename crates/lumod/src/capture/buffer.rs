//! Single-slot latest-frame buffer.
//!
//! The acquisition loop is the only publisher; any number of readers take
//! the newest frame without blocking the publisher for longer than a
//! pointer swap. Older frames are simply replaced.
//!
//! Every publish carries the generation the publisher was started under.
//! [`FrameBuffer::reset`] bumps the generation, so a wedged loop that
//! returns after a forced teardown can never repopulate a cleared buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use lumo_core::{CapturedImage, Frame};

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u64,
    frame: Option<Arc<Frame>>,
}

/// Latest-frame slot with generation-guarded publishing.
#[derive(Debug)]
pub struct FrameBuffer {
    slot: watch::Sender<Slot>,

    /// Last sequence number handed out. Never reset, so sequences stay
    /// strictly increasing across restarts.
    last_sequence: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (slot, _rx) = watch::channel(Slot::default());
        Self {
            slot,
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Generation new publishers must be started under.
    pub fn generation(&self) -> u64 {
        self.slot.borrow().generation
    }

    /// Stores `image` as the latest frame if `generation` is still current.
    ///
    /// Returns the assigned sequence number, or `None` if the publisher
    /// belongs to an older generation and the image was discarded.
    pub fn publish(
        &self,
        generation: u64,
        image: CapturedImage,
        captured_at: DateTime<Utc>,
    ) -> Option<u64> {
        let mut assigned = None;
        self.slot.send_if_modified(|slot| {
            if slot.generation != generation {
                return false;
            }
            let sequence = self.last_sequence.fetch_add(1, Ordering::AcqRel) + 1;
            slot.frame = Some(Arc::new(Frame::from_captured(image, sequence, captured_at)));
            assigned = Some(sequence);
            true
        });
        assigned
    }

    /// Returns the latest frame, if any. Never blocks on the publisher.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.borrow().frame.clone()
    }

    /// Clears the slot and starts a new generation. Returns the new generation.
    pub fn reset(&self) -> u64 {
        let mut generation = 0;
        self.slot.send_modify(|slot| {
            slot.generation += 1;
            slot.frame = None;
            generation = slot.generation;
        });
        generation
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
