//! Sensor sample and telemetry value types

use serde::{Deserialize, Serialize};

/// Converts m/s to km/h
pub const MS_TO_KMH: f64 = 3.6;

/// Longitudinal acceleration sample
///
/// Positive `longitudinal` is deceleration along the direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    /// Seconds, sensor clock
    pub timestamp: f64,
    /// m/s²
    pub longitudinal: f64,
}

impl AccelerationSample {
    pub fn new(timestamp: f64, longitudinal: f64) -> Self {
        Self {
            timestamp,
            longitudinal,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite() && self.longitudinal.is_finite()
    }
}

/// GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub timestamp: f64,
    /// Degrees, signed
    pub latitude: f64,
    /// Degrees, signed
    pub longitude: f64,
    /// m/s; negative means the receiver had no valid speed
    pub speed: f64,
    /// Degrees
    pub heading: f64,
}

impl LocationFix {
    pub fn new(timestamp: f64, latitude: f64, longitude: f64, speed: f64, heading: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed,
            heading,
        }
    }

    pub fn has_valid_speed(&self) -> bool {
        self.speed.is_finite() && self.speed >= 0.0
    }

    /// Reported speed in km/h, floored at zero when invalid
    pub fn speed_kmh(&self) -> f64 {
        if self.has_valid_speed() {
            self.speed * MS_TO_KMH
        } else {
            0.0
        }
    }
}

/// Current fused speed
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedEstimate {
    /// km/h, never negative
    pub value: f64,
    pub timestamp: f64,
}

/// Everything the overlay draws, copied out of the estimator in one go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryState {
    pub speed: SpeedEstimate,
    pub fix: Option<LocationFix>,
    /// Latest longitudinal acceleration in g (positive = braking)
    pub g_force: f64,
    /// Largest |g| seen so far
    pub peak_g: f64,
    pub inertial_available: bool,
}
