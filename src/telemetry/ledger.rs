//! Acceleration ledger
//!
//! Speed increments accumulated since the last applied GPS fix, waiting to be
//! reconciled against the next one.

/// Speed change contributed by one acceleration sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerEntry {
    pub timestamp: f64,
    /// km/h
    pub delta_kmh: f64,
}

/// Why a sample was not recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRejection {
    /// At or before the most recently applied fix
    BeforeFix,
    /// Earlier than the newest entry already recorded
    OutOfOrder,
}

/// Ordered, time-bounded sequence of speed increments
///
/// Invariants: timestamps are non-decreasing, and no entry is at or before
/// the timestamp of the most recently settled fix.
#[derive(Debug, Default)]
pub struct AccelerationLedger {
    entries: Vec<LedgerEntry>,
    /// Timestamp of the most recently settled fix
    floor: Option<f64>,
}

impl AccelerationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an increment
    pub fn push(&mut self, entry: LedgerEntry) -> Result<(), LedgerRejection> {
        if let Some(floor) = self.floor {
            if entry.timestamp <= floor {
                return Err(LedgerRejection::BeforeFix);
            }
        }
        if let Some(last) = self.entries.last() {
            if entry.timestamp < last.timestamp {
                return Err(LedgerRejection::OutOfOrder);
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Sum the entries strictly between the previous fix and `fix_timestamp`,
    /// then clear the ledger and make `fix_timestamp` the new floor.
    ///
    /// Entries at or after `fix_timestamp` are discarded without contributing.
    pub fn settle(&mut self, fix_timestamp: f64) -> f64 {
        let floor = self.floor;
        let correction = self
            .entries
            .iter()
            .filter(|e| floor.map_or(true, |f| e.timestamp > f) && e.timestamp < fix_timestamp)
            .map(|e| e.delta_kmh)
            .sum();
        self.entries.clear();
        self.floor = Some(fix_timestamp);
        correction
    }

    /// Drop all entries without moving the floor
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the most recently settled fix
    pub fn floor(&self) -> Option<f64> {
        self.floor
    }
}
