//! Sensor readings as they travel between nodes.
//!
//! A reading is the tuple `(time, tick, "<zone>:<sensor>", value, status)`.
//! Values stay strings on the wire; the typed accessors here are what
//! readings parsers use to classify them.

use core::fmt;
use core::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::ClassificationError;

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// `<zone>:<sensor>` identifier, e.g. `G4:M0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadingId {
    zone: String,
    sensor: String,
}

/// Rejected identifier text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidReadingId(pub String);

impl fmt::Display for InvalidReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid reading id {:?}, expected <zone>:<sensor>", self.0)
    }
}

impl std::error::Error for InvalidReadingId {}

impl ReadingId {
    pub fn new(zone: &str, sensor: &str) -> Result<Self, InvalidReadingId> {
        if zone.is_empty() || sensor.is_empty() || zone.contains(':') || sensor.contains(':') {
            return Err(InvalidReadingId(format!("{zone}:{sensor}")));
        }
        Ok(Self {
            zone: zone.to_owned(),
            sensor: sensor.to_owned(),
        })
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }
}

impl FromStr for ReadingId {
    type Err = InvalidReadingId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((zone, sensor)) => Self::new(zone, sensor).map_err(|_| InvalidReadingId(s.into())),
            None => Err(InvalidReadingId(s.into())),
        }
    }
}

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.zone, self.sensor)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAULT")]
    Fault,
}

/// One immutable sensor observation.
///
/// Equality compares identifier, value and status only; two readings taken
/// at different ticks with the same content are the same reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    time: NaiveDateTime,
    tick: u64,
    id: ReadingId,
    value: String,
    status: ReadingStatus,
}

impl PartialEq for Reading {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.value == other.value && self.status == other.status
    }
}

impl Eq for Reading {}

impl Reading {
    pub fn new(
        time: NaiveDateTime,
        tick: u64,
        id: ReadingId,
        value: impl Into<String>,
        status: ReadingStatus,
    ) -> Self {
        Self {
            time,
            tick,
            id,
            value: value.into(),
            status,
        }
    }

    /// Depth reading in the `"<mm>m"` form produced by level probes.
    pub fn depth(time: NaiveDateTime, tick: u64, id: ReadingId, depth_mm: i32) -> Self {
        Self::new(time, tick, id, format!("{depth_mm}m"), ReadingStatus::Ok)
    }

    /// Float switch reading, `"True"` when the switch is made.
    pub fn switch(time: NaiveDateTime, tick: u64, id: ReadingId, made: bool) -> Self {
        let value = if made { "True" } else { "False" };
        Self::new(time, tick, id, value, ReadingStatus::Ok)
    }

    pub fn time(&self) -> NaiveDateTime {
        self.time
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn id(&self) -> &ReadingId {
        &self.id
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn status(&self) -> ReadingStatus {
        self.status
    }

    /// Parse a depth value such as `500m`.
    pub fn depth_mm(&self) -> Result<i32, ClassificationError> {
        let trimmed = self.value.trim();
        let digits = trimmed.strip_suffix('m').unwrap_or(trimmed);
        digits
            .parse()
            .map_err(|_| ClassificationError::malformed(self.id.to_string(), &self.value))
    }

    /// Parse a float switch value; only `True` and `False` are accepted.
    pub fn switch_made(&self) -> Result<bool, ClassificationError> {
        match self.value.as_str() {
            "True" => Ok(true),
            "False" => Ok(false),
            other => Err(ClassificationError::malformed(self.id.to_string(), other)),
        }
    }
}
