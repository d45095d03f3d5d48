//! Single-line on/off actuator (solenoid valve, pump relay).
//!
//! The driver is a dumb actuator: policies decide, this writes the pin.
//! The recorded state only changes once the pin write succeeded.

use embedded_hal::digital::OutputPin;

use super::{Enableable, drive_line};
use crate::error::BusIoError;

pub struct SwitchDevice<P> {
    line: &'static str,
    pin: P,
    enabled: bool,
}

impl<P: OutputPin> SwitchDevice<P> {
    /// Wrap `pin`.  The line is assumed de-energised.
    pub fn new(line: &'static str, pin: P) -> Self {
        Self {
            line,
            pin,
            enabled: false,
        }
    }

    pub fn line(&self) -> &'static str {
        self.line
    }
}

impl<P: OutputPin> Enableable for SwitchDevice<P> {
    fn enable(&mut self) -> Result<(), BusIoError> {
        drive_line(&mut self.pin, true, self.line)?;
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), BusIoError> {
        drive_line(&mut self.pin, false, self.line)?;
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
