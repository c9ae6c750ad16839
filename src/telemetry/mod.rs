pub mod fusion;
pub mod geo;
pub mod ledger;
pub mod source;
pub mod types;

pub use fusion::{FusionHandle, SpeedFusionEstimator};
pub use ledger::{AccelerationLedger, LedgerEntry, LedgerRejection};
pub use source::{spawn_ingest, IngestStats, SensorEvent, SimulatedDrive};
pub use types::{AccelerationSample, LocationFix, SpeedEstimate, TelemetryState, MS_TO_KMH};
