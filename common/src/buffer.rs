use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::frame::Frame;

/// The newest frame published for one device, with capture metadata.
#[derive(Debug)]
pub struct BufferedFrame {
    pub frame: Frame,
    /// Unix millis at publish time.
    pub captured_at_ms: i64,
    /// Per-device sequence number, starting at 1.
    pub seq: u64,
}

/// Upstream contract: hand out the latest frame for a device key.
///
/// Implementations must not block waiting for a new frame; `None` means the
/// device has nothing ready yet.
pub trait FrameSource: Send + Sync {
    fn latest(&self, device: &str) -> Option<Arc<BufferedFrame>>;
}

/// Latest-frame-per-device store filled by producers and read by workers.
///
/// Publishing replaces the previous frame; readers get an `Arc` to an
/// immutable frame, so a slow reader never holds up the producer.
#[derive(Default)]
pub struct SharedFrameBuffer {
    slots: RwLock<HashMap<String, Slot>>,
}

#[derive(Default)]
struct Slot {
    latest: Option<Arc<BufferedFrame>>,
    next_seq: u64,
}

impl SharedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame for `device`. Returns the assigned sequence number.
    pub fn publish(&self, device: &str, frame: Frame) -> u64 {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(device.to_string()).or_default();
        slot.next_seq += 1;
        let seq = slot.next_seq;
        if seq == 1 {
            debug!(device, "first frame published");
        }
        slot.latest = Some(Arc::new(BufferedFrame {
            frame,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            seq,
        }));
        seq
    }

    /// Keys of all devices that have published at least once.
    pub fn devices(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = slots.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl FrameSource for SharedFrameBuffer {
    fn latest(&self, device: &str) -> Option<Arc<BufferedFrame>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(device).and_then(|slot| slot.latest.clone())
    }
}
