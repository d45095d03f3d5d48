//! Managed devices and their capabilities.
//!
//! | device             | capability     | background loop         |
//! |--------------------|----------------|-------------------------|
//! | `ManagedGateValve` | `Positionable` | `gate_valve::ValveServo` |
//! | `ManagedLevelProbe`| `Readable`     | `level_probe::ProbeDecoder` |
//! | `SwitchDevice`     | `Enableable`   | none (driven by policies) |
//!
//! Devices with a loop split into a shared handle (atomics, read by the tick
//! loop) and a loop object that owns the bus and output pins.  Only the loop
//! writes measured values.

pub mod gate_valve;
pub mod level_probe;
pub mod switch;

use std::sync::Arc;

use chrono::NaiveDateTime;
use embedded_hal::digital::OutputPin;

use crate::error::BusIoError;
use crate::reading::Reading;

pub use gate_valve::ManagedGateValve;
pub use level_probe::ManagedLevelProbe;
pub use switch::SwitchDevice;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Two-state output: pump relay, solenoid.
pub trait Enableable {
    fn enable(&mut self) -> Result<(), BusIoError>;
    fn disable(&mut self) -> Result<(), BusIoError>;
    fn is_enabled(&self) -> bool;
}

/// Set-point actuator realised by a background servo.
pub trait Positionable {
    /// Record a new requested position (%), clamped to 100.
    fn set_position(&self, percent: u8);
    fn requested_position(&self) -> u8;
    /// Last measured position, `None` when the sensor could not be read.
    fn measured_position(&self) -> Option<u8>;
}

/// Sensor whose latest value can be published as a [`Reading`].
pub trait Readable {
    /// `None` until the device has produced its first value.
    fn latest_reading(&self, time: NaiveDateTime, tick: u64) -> Option<Reading>;
}

// ---------------------------------------------------------------------------
// Device handle
// ---------------------------------------------------------------------------

/// Any managed device a node can hold.
pub enum Device {
    GateValve(Arc<ManagedGateValve>),
    LevelProbe(Arc<ManagedLevelProbe>),
    Switch(Box<dyn Enableable + Send>),
}

impl Device {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GateValve(_) => "gate valve",
            Self::LevelProbe(_) => "level probe",
            Self::Switch(_) => "switch",
        }
    }

    pub fn as_positionable(&self) -> Option<&dyn Positionable> {
        match self {
            Self::GateValve(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn as_readable(&self) -> Option<&dyn Readable> {
        match self {
            Self::LevelProbe(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub fn as_enableable_mut(&mut self) -> Option<&mut (dyn Enableable + Send + 'static)> {
        match self {
            Self::Switch(s) => Some(s.as_mut()),
            _ => None,
        }
    }
}

/// Drive one digital line, naming it in the error.
pub(crate) fn drive_line<P: OutputPin>(
    pin: &mut P,
    high: bool,
    line: &'static str,
) -> Result<(), BusIoError> {
    let res = if high { pin.set_high() } else { pin.set_low() };
    res.map_err(|_| BusIoError::Digital { line })
}
