//! Overlay render loop
//!
//! Runs on its own tokio interval, independent of the camera. Each tick copies
//! the telemetry out of the estimator, draws a complete bitmap and publishes
//! it to the snapshot slot. A slow tick is skipped rather than bunched up.

use super::snapshot::SnapshotSlot;
use super::surface::TelemetrySurface;
use crate::clock::MediaClock;
use crate::telemetry::FusionHandle;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub struct OverlayRenderer {
    surface: Box<dyn TelemetrySurface>,
    fusion: FusionHandle,
    slot: Arc<SnapshotSlot>,
    clock: MediaClock,
}

impl OverlayRenderer {
    pub fn new(
        surface: Box<dyn TelemetrySurface>,
        fusion: FusionHandle,
        slot: Arc<SnapshotSlot>,
        clock: MediaClock,
    ) -> Self {
        Self {
            surface,
            fusion,
            slot,
            clock,
        }
    }

    /// Draw and publish one snapshot, returning its sequence number
    pub fn render_once(&mut self) -> u64 {
        let captured_at = self.clock.now_secs();
        let telemetry = self.fusion.telemetry();
        let bitmap = self.surface.draw(&telemetry);
        self.slot.publish(bitmap, captured_at)
    }

    /// Start rendering at `hz` until the handle is stopped
    pub fn spawn(mut self, hz: u32) -> RendererHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = Duration::from_secs_f64(1.0 / hz.max(1) as f64);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rendered = 0u64;

            tracing::info!("Overlay renderer started at {} Hz", hz);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.render_once();
                        rendered += 1;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Overlay renderer stopped after {} snapshots", rendered);
            rendered
        });

        RendererHandle { stop_tx, task }
    }
}

/// Running render loop
pub struct RendererHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl RendererHandle {
    /// Stop the loop and return how many snapshots it published
    pub async fn stop(self) -> u64 {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!("Overlay renderer task failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FusionConfig;
    use crate::overlay::image::Bitmap;
    use crate::telemetry::{LocationFix, TelemetryState};

    /// Encodes the speed into the single pixel it draws
    struct SpeedPixel;

    impl TelemetrySurface for SpeedPixel {
        fn size(&self) -> (u32, u32) {
            (1, 1)
        }

        fn draw(&mut self, telemetry: &TelemetryState) -> Bitmap {
            let v = telemetry.speed.value.round().clamp(0.0, 255.0) as u8;
            Bitmap::filled(1, 1, [v, 0, 0, 255])
        }
    }

    #[test]
    fn test_render_once_reflects_current_speed() {
        let fusion = FusionHandle::new(FusionConfig::default());
        let slot = Arc::new(SnapshotSlot::new());
        let mut renderer =
            OverlayRenderer::new(Box::new(SpeedPixel), fusion.clone(), slot.clone(), MediaClock::new());

        assert_eq!(renderer.render_once(), 1);
        assert_eq!(slot.current().unwrap().bitmap.pixel(0, 0), Some([0, 0, 0, 255]));

        fusion.on_location(LocationFix::new(1.0, 0.0, 0.0, 20.0, 0.0));
        assert_eq!(renderer.render_once(), 2);
        assert_eq!(slot.current().unwrap().bitmap.pixel(0, 0), Some([72, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_spawned_loop_publishes_until_stopped() {
        let fusion = FusionHandle::new(FusionConfig::default());
        let slot = Arc::new(SnapshotSlot::new());
        let renderer =
            OverlayRenderer::new(Box::new(SpeedPixel), fusion, slot.clone(), MediaClock::new());

        let handle = renderer.spawn(200);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let rendered = handle.stop().await;

        assert!(rendered > 0);
        assert_eq!(rendered, slot.published());
        let after = slot.published();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(slot.published(), after);
    }
}
