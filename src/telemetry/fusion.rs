//! GPS / inertial speed fusion
//!
//! Between fixes the speed is integrated from longitudinal acceleration at
//! sample rate. When a fix arrives the speed is re-anchored to the fix, plus the
//! increments recorded strictly between the previous fix and this one.
//!
//! Boundary rule: an increment contributes to a fix's correction only if its
//! timestamp is strictly after the previous fix and strictly before the
//! current fix. Everything else in the ledger is discarded when the fix is
//! applied.

use super::ledger::{AccelerationLedger, LedgerEntry, LedgerRejection};
use super::types::{AccelerationSample, LocationFix, SpeedEstimate, TelemetryState, MS_TO_KMH};
use crate::config::FusionConfig;
use parking_lot::Mutex;
use std::sync::Arc;

/// Single-owner speed estimator. Not synchronised; see [`FusionHandle`].
#[derive(Debug)]
pub struct SpeedFusionEstimator {
    config: FusionConfig,
    ledger: AccelerationLedger,
    current: SpeedEstimate,

    /// Speed established by the most recent fix, used when inertial data is lost
    fix_derived_kmh: Option<f64>,
    last_fix: Option<LocationFix>,
    inertial_available: bool,

    g_force: f64,
    peak_g: f64,
    accel_count: u64,
    fix_count: u64,
}

impl SpeedFusionEstimator {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            ledger: AccelerationLedger::new(),
            current: SpeedEstimate::default(),
            fix_derived_kmh: None,
            last_fix: None,
            inertial_available: true,
            g_force: 0.0,
            peak_g: 0.0,
            accel_count: 0,
            fix_count: 0,
        }
    }

    /// Fold one acceleration sample into the running speed
    pub fn on_acceleration(&mut self, sample: AccelerationSample) -> SpeedEstimate {
        if !self.inertial_available {
            return self.current;
        }
        if !sample.is_finite() {
            tracing::warn!("Ignoring non-finite acceleration sample: {:?}", sample);
            return self.current;
        }

        let mut delta =
            -sample.longitudinal * self.config.sample_interval_secs * self.config.gravity * MS_TO_KMH;
        if self.current.value + delta < 0.0 {
            delta = -self.current.value;
        }

        let entry = LedgerEntry {
            timestamp: sample.timestamp,
            delta_kmh: delta,
        };
        if let Err(reason) = self.ledger.push(entry) {
            match reason {
                LedgerRejection::BeforeFix => tracing::debug!(
                    "Dropping acceleration sample at {:.3}s, already covered by fix at {:?}",
                    sample.timestamp,
                    self.ledger.floor()
                ),
                LedgerRejection::OutOfOrder => tracing::warn!(
                    "Dropping out-of-order acceleration sample at {:.3}s",
                    sample.timestamp
                ),
            }
            return self.current;
        }

        self.current = SpeedEstimate {
            value: (self.current.value + delta).max(0.0),
            timestamp: sample.timestamp,
        };

        self.g_force = sample.longitudinal / self.config.gravity;
        self.peak_g = self.peak_g.max(self.g_force.abs());
        self.accel_count += 1;
        self.current
    }

    /// Re-anchor the speed to a GPS fix
    pub fn on_location(&mut self, fix: LocationFix) -> SpeedEstimate {
        if !fix.timestamp.is_finite() {
            tracing::warn!("Ignoring fix with non-finite timestamp");
            return self.current;
        }
        if let Some(floor) = self.ledger.floor() {
            if fix.timestamp <= floor {
                tracing::warn!(
                    "Ignoring stale fix at {:.3}s (last applied {:.3}s)",
                    fix.timestamp,
                    floor
                );
                return self.current;
            }
        }

        let reported = fix.speed_kmh();
        let pending = self.ledger.len();
        let correction = self.ledger.settle(fix.timestamp);
        let value = (reported + correction).max(0.0);

        tracing::debug!(
            "Fix at {:.3}s: reported {:.2} km/h, correction {:+.2} km/h from {} samples -> {:.2} km/h",
            fix.timestamp,
            reported,
            correction,
            pending,
            value
        );

        self.current = SpeedEstimate {
            value,
            timestamp: fix.timestamp,
        };
        self.fix_derived_kmh = Some(value);
        self.last_fix = Some(fix);
        self.fix_count += 1;
        self.current
    }

    /// Mark the inertial sensor as lost or restored
    ///
    /// While unavailable the speed holds at the last fix-derived value and only
    /// fixes change it.
    pub fn set_inertial_available(&mut self, available: bool) {
        if self.inertial_available == available {
            return;
        }
        self.inertial_available = available;
        if available {
            tracing::info!("Inertial sensor restored");
            return;
        }

        self.ledger.clear();
        if let Some(value) = self.fix_derived_kmh {
            self.current.value = value;
        }
        self.g_force = 0.0;
        tracing::warn!(
            "Inertial sensor lost, holding {:.2} km/h until the next fix",
            self.current.value
        );
    }

    pub fn current(&self) -> SpeedEstimate {
        self.current
    }

    pub fn ledger(&self) -> &AccelerationLedger {
        &self.ledger
    }

    pub fn last_fix(&self) -> Option<&LocationFix> {
        self.last_fix.as_ref()
    }

    pub fn inertial_available(&self) -> bool {
        self.inertial_available
    }

    /// (acceleration samples applied, fixes applied)
    pub fn counts(&self) -> (u64, u64) {
        (self.accel_count, self.fix_count)
    }

    pub fn telemetry(&self) -> TelemetryState {
        TelemetryState {
            speed: self.current,
            fix: self.last_fix,
            g_force: self.g_force,
            peak_g: self.peak_g,
            inertial_available: self.inertial_available,
        }
    }
}

/// Shared, lock-protected estimator
///
/// The ledger and the estimate are only ever touched under this one lock, so
/// a fix can never settle the ledger while a sample is half-applied.
#[derive(Debug, Clone)]
pub struct FusionHandle {
    inner: Arc<Mutex<SpeedFusionEstimator>>,
}

impl FusionHandle {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SpeedFusionEstimator::new(config))),
        }
    }

    pub fn on_acceleration(&self, sample: AccelerationSample) -> SpeedEstimate {
        self.inner.lock().on_acceleration(sample)
    }

    pub fn on_location(&self, fix: LocationFix) -> SpeedEstimate {
        self.inner.lock().on_location(fix)
    }

    pub fn set_inertial_available(&self, available: bool) {
        self.inner.lock().set_inertial_available(available)
    }

    pub fn current(&self) -> SpeedEstimate {
        self.inner.lock().current()
    }

    pub fn telemetry(&self) -> TelemetryState {
        self.inner.lock().telemetry()
    }

    /// Run `f` with exclusive access to the estimator
    pub fn with<R>(&self, f: impl FnOnce(&SpeedFusionEstimator) -> R) -> R {
        f(&self.inner.lock())
    }
}
