//! Readings parser: raw zone readings to named predicates.
//!
//! A zone publishes three readings:
//!
//! | id          | meaning                      | value     |
//! |-------------|------------------------------|-----------|
//! | `<zone>:M0` | depth                        | `"500m"`  |
//! | `<zone>:FS0`| high float switch ("full")   | `"True"`  |
//! | `<zone>:FS1`| low float switch ("empty")   | `"False"` |
//!
//! [`capture`] turns them into a [`ZoneSnapshot`] or fails with
//! [`ClassificationError::Missing`] / [`ClassificationError::Malformed`].
//! Contradictions (full and empty together) are detected lazily, only by
//! the predicates that need to know, so a contradiction that does not
//! affect the decision at hand does not stall the policy.

use log::{error, warn};

use crate::app::ports::PersistencePort;
use crate::arbitrator::{Arbitrator, Severity};
use crate::error::ClassificationError;
use crate::reading::{InvalidReadingId, Reading, ReadingId, ReadingStatus};

/// Reading ids of one zone's depth probe and float switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneReadings {
    pub zone: String,
    pub depth: ReadingId,
    pub high_switch: ReadingId,
    pub low_switch: ReadingId,
}

impl ZoneReadings {
    /// The standard `M0` / `FS0` / `FS1` layout.
    pub fn standard(zone: &str) -> Result<Self, InvalidReadingId> {
        Ok(Self {
            zone: zone.to_owned(),
            depth: ReadingId::new(zone, "M0")?,
            high_switch: ReadingId::new(zone, "FS0")?,
            low_switch: ReadingId::new(zone, "FS1")?,
        })
    }
}

/// One zone's readings at the start of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSnapshot {
    pub zone: String,
    pub level_mm: i32,
    /// High float switch made.
    pub full: bool,
    /// Low float switch made.
    pub empty: bool,
}

impl ZoneSnapshot {
    /// Full by switch or at/above `threshold`.  Errors if the low switch
    /// is made at the same time.
    pub fn full_at(&self, threshold: i32) -> Result<bool, ClassificationError> {
        if !(self.full || self.level_mm >= threshold) {
            return Ok(false);
        }
        if self.empty {
            Err(ClassificationError::contradiction(self.zone.as_str()))
        } else {
            Ok(true)
        }
    }

    /// Empty by switch or below `threshold`.  Errors if the high switch is
    /// made at the same time.
    pub fn empty_below(&self, threshold: i32) -> Result<bool, ClassificationError> {
        if !(self.empty || self.level_mm < threshold) {
            return Ok(false);
        }
        if self.full {
            Err(ClassificationError::contradiction(self.zone.as_str()))
        } else {
            Ok(true)
        }
    }

    /// At or above `threshold`, never while the low switch is made.
    pub fn at_or_above(&self, threshold: i32) -> bool {
        !self.empty && (self.full || self.level_mm >= threshold)
    }
}

fn fetch<P: PersistencePort>(
    arbiter: &mut Arbitrator<P>,
    id: &ReadingId,
) -> Result<Reading, ClassificationError> {
    match arbiter.latest_reading(id) {
        Ok(Some(r)) if r.status() == ReadingStatus::Fault => {
            Err(ClassificationError::malformed(id.to_string(), r.value()))
        }
        Ok(Some(r)) => Ok(r),
        Ok(None) => Err(ClassificationError::missing(id.to_string())),
        Err(e) => {
            warn!("Could not get reading {}: {}", id, e);
            Err(ClassificationError::missing(id.to_string()))
        }
    }
}

/// Fetch and parse one zone's readings.
pub fn capture<P: PersistencePort>(
    arbiter: &mut Arbitrator<P>,
    readings: &ZoneReadings,
) -> Result<ZoneSnapshot, ClassificationError> {
    let level_mm = fetch(arbiter, &readings.depth)?.depth_mm()?;
    let full = fetch(arbiter, &readings.high_switch)?.switch_made()?;
    let empty = fetch(arbiter, &readings.low_switch)?.switch_made()?;
    Ok(ZoneSnapshot {
        zone: readings.zone.clone(),
        level_mm,
        full,
        empty,
    })
}

/// Log a contradiction in detail and raise `event` remotely, best effort.
pub fn report_contradiction<P: PersistencePort>(
    arbiter: &mut Arbitrator<P>,
    snapshot: &ZoneSnapshot,
    event: &str,
) {
    error!(
        "{zone} reads as full and empty simultaneously: FS0 (high) = {}, FS1 (low) = {}, \
         M0 (depth) = {}mm. Check for sensor faults in {zone}.",
        snapshot.full,
        snapshot.empty,
        snapshot.level_mm,
        zone = snapshot.zone
    );
    arbiter.log_event_best_effort(event, Severity::Error);
}
