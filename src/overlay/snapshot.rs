//! Current overlay snapshot
//!
//! The renderer publishes a fresh immutable bitmap at its own cadence; the
//! compositor grabs whichever one is current when a frame arrives. Publishing
//! swaps an `Arc` under a short write lock, so a reader always sees either the
//! old snapshot or the new one, never a partially drawn bitmap.

use super::image::Bitmap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable rendered overlay
#[derive(Debug)]
pub struct OverlaySnapshot {
    pub bitmap: Bitmap,
    /// Media clock seconds at which the telemetry was captured
    pub captured_at: f64,
    /// Increases by one with every publication
    pub sequence: u64,
}

/// Holder of the single current snapshot
#[derive(Debug, Default)]
pub struct SnapshotSlot {
    current: RwLock<Option<Arc<OverlaySnapshot>>>,
    next_sequence: AtomicU64,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot, returning its sequence number
    pub fn publish(&self, bitmap: Bitmap, captured_at: f64) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(OverlaySnapshot {
            bitmap,
            captured_at,
            sequence,
        });
        *self.current.write() = Some(snapshot);
        sequence
    }

    /// Most recently published snapshot, if any
    pub fn current(&self) -> Option<Arc<OverlaySnapshot>> {
        self.current.read().clone()
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    /// Number of snapshots published so far
    pub fn published(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_latest_publication_wins() {
        let slot = SnapshotSlot::new();
        assert!(slot.current().is_none());

        slot.publish(Bitmap::filled(2, 2, [1, 1, 1, 255]), 0.1);
        let seq = slot.publish(Bitmap::filled(2, 2, [2, 2, 2, 255]), 0.2);

        let current = slot.current().unwrap();
        assert_eq!(current.sequence, seq);
        assert_eq!(current.bitmap.pixel(0, 0), Some([2, 2, 2, 255]));
        assert_eq!(slot.published(), 2);

        slot.clear();
        assert!(slot.current().is_none());
    }

    #[test]
    fn test_held_snapshot_survives_replacement() {
        let slot = SnapshotSlot::new();
        slot.publish(Bitmap::filled(1, 1, [9, 9, 9, 255]), 0.0);
        let held = slot.current().unwrap();
        slot.publish(Bitmap::filled(1, 1, [7, 7, 7, 255]), 1.0);
        assert_eq!(held.bitmap.pixel(0, 0), Some([9, 9, 9, 255]));
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_bitmap() {
        let slot = Arc::new(SnapshotSlot::new());
        let writer_slot = Arc::clone(&slot);

        let writer = thread::spawn(move || {
            for i in 1..=500u32 {
                let shade = (i % 256) as u8;
                writer_slot.publish(Bitmap::filled(32, 32, [shade, shade, shade, 255]), i as f64);
            }
        });

        let mut last_sequence = 0;
        for _ in 0..2_000 {
            if let Some(snapshot) = slot.current() {
                // Every pixel of a published bitmap has the same shade
                let first = snapshot.bitmap.pixel(0, 0);
                assert!(snapshot
                    .bitmap
                    .pixels()
                    .chunks(4)
                    .all(|px| Some([px[0], px[1], px[2], px[3]]) == first));
                assert!(snapshot.sequence >= last_sequence);
                last_sequence = snapshot.sequence;
            }
        }

        writer.join().unwrap();
        assert_eq!(slot.current().unwrap().sequence, 500);
    }
}
