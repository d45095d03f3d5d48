//! Simulated hardware for host runs and tests.
//!
//! - [`SimPin`]: an `OutputPin` whose level is an `Arc<AtomicBool>`; clones
//!   observe the same line.
//! - [`SimAnalogBus`]: scripted channel voltages with per-channel fault
//!   injection, plus optional motor models that move a position channel
//!   while their drive pins are high.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::{self, ErrorKind, ErrorType, OutputPin};

use crate::app::ports::AnalogBus;
use crate::error::BusIoError;

// ---------------------------------------------------------------------------
// Digital output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPinError;

impl digital::Error for SimPinError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimPin {
    level: Arc<AtomicBool>,
    broken: Arc<AtomicBool>,
}

impl SimPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    /// While broken every write fails and the level is left as it was.
    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::Release);
    }

    fn write(&self, high: bool) -> Result<(), SimPinError> {
        if self.broken.load(Ordering::Acquire) {
            return Err(SimPinError);
        }
        self.level.store(high, Ordering::Release);
        Ok(())
    }
}

impl ErrorType for SimPin {
    type Error = SimPinError;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

// ---------------------------------------------------------------------------
// Analog bus
// ---------------------------------------------------------------------------

/// A valve motor turning a potentiometer on `channel`.
struct SimMotor {
    channel: u8,
    forward: SimPin,
    reverse: SimPin,
    /// Volts moved per read while driven.
    step: f32,
    max: f32,
}

#[derive(Default)]
pub struct SimAnalogBus {
    volts: HashMap<u8, f32>,
    failing: HashSet<u8>,
    motors: Vec<SimMotor>,
    reads: u64,
}

impl SimAnalogBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_voltage(&mut self, channel: u8, volts: f32) {
        self.volts.insert(channel, volts);
    }

    pub fn voltage(&self, channel: u8) -> f32 {
        self.volts.get(&channel).copied().unwrap_or(0.0)
    }

    pub fn fail_channel(&mut self, channel: u8, failing: bool) {
        if failing {
            self.failing.insert(channel);
        } else {
            self.failing.remove(&channel);
        }
    }

    /// Move `channel` up while `forward` is high and down while `reverse`
    /// is high, by `step` volts per read, within `[0, max]`.
    pub fn attach_motor(&mut self, channel: u8, forward: SimPin, reverse: SimPin, step: f32, max: f32) {
        self.motors.push(SimMotor {
            channel,
            forward,
            reverse,
            step,
            max,
        });
    }

    /// Successful reads so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn advance_motors(&mut self, channel: u8) {
        for m in self.motors.iter().filter(|m| m.channel == channel) {
            let delta = match (m.forward.is_high(), m.reverse.is_high()) {
                (true, false) => m.step,
                (false, true) => -m.step,
                _ => 0.0,
            };
            let v = self.volts.entry(channel).or_insert(0.0);
            *v = (*v + delta).clamp(0.0, m.max);
        }
    }
}

impl AnalogBus for SimAnalogBus {
    fn read_voltage(&mut self, channel: u8) -> Result<f32, BusIoError> {
        if self.failing.contains(&channel) {
            return Err(BusIoError::Analog { channel });
        }
        self.advance_motors(channel);
        self.reads += 1;
        Ok(self.voltage(channel))
    }
}
