//! Motorised gate valve: shared handle plus closed-loop servo.
//!
//! ```text
//!   policy ──set_position──▶ ManagedGateValve (atomics) ◀──publish── ValveServo
//!                                                                      │
//!                          position pot ──▶ AnalogBus ──read_voltage──┘
//!                                                                      │
//!                               clutch / forward / reverse ◀──drive───┘
//! ```
//!
//! The servo compares the measured position with a tolerance band around
//! the request:
//!
//! | measured           | outputs                                  |
//! |--------------------|------------------------------------------|
//! | unknown / in band  | forward LOW, reverse LOW (hold)          |
//! | below band         | clutch HIGH, reverse LOW, forward HIGH   |
//! | above band         | clutch HIGH, forward LOW, reverse HIGH   |
//! | below and above    | fatal: node halts                        |
//!
//! On exit the clutch is always released.

use std::io;
use std::sync::atomic::{AtomicU8, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, error, info, warn};

use super::{Positionable, drive_line};
use crate::app::ports::AnalogBus;
use crate::config::ValveGeometry;
use crate::error::{BusIoError, Error, ImpossibleStateFault};
use crate::fsm::context::NodeContext;

/// Low margin kept below `max_open` when the request is clamped high.
const TOP_BAND_WIDTH: u8 = 6;
/// High margin kept above `min_open` when the request is clamped low.
const BOTTOM_BAND_WIDTH: u8 = 2;

const UNKNOWN: u8 = u8::MAX;

// ---------------------------------------------------------------------------
// Band and decision
// ---------------------------------------------------------------------------

/// Inclusive acceptance band in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub low: u8,
    pub high: u8,
}

impl Band {
    pub fn for_request(requested: u8, geometry: &ValveGeometry) -> Self {
        let req = i16::from(requested);
        let tol = i16::from(geometry.tolerance);

        if req + tol > i16::from(geometry.max_open) {
            Self {
                low: geometry.max_open.saturating_sub(TOP_BAND_WIDTH),
                high: geometry.max_open,
            }
        } else if req - tol < i16::from(geometry.min_open) {
            Self {
                low: geometry.min_open,
                high: geometry.min_open.saturating_add(BOTTOM_BAND_WIDTH),
            }
        } else {
            // Both ends are within [min_open, max_open] here.
            Self {
                low: (req - tol) as u8,
                high: (req + tol) as u8,
            }
        }
    }

    pub fn contains(&self, percent: u8) -> bool {
        percent >= self.low && percent <= self.high
    }

    fn pack(self) -> u16 {
        (u16::from(self.low) << 8) | u16::from(self.high)
    }

    fn unpack(raw: u16) -> Self {
        Self {
            low: (raw >> 8) as u8,
            high: (raw & 0xFF) as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drive {
    Hold,
    Open,
    Close,
}

/// Pick the servo action for one cycle.
pub fn decide(measured: Option<u8>, band: Band) -> Result<Drive, ImpossibleStateFault> {
    let Some(pos) = measured else {
        return Ok(Drive::Hold);
    };
    if band.contains(pos) {
        return Ok(Drive::Hold);
    }
    match (pos < band.low, pos > band.high) {
        (true, false) => Ok(Drive::Open),
        (false, true) => Ok(Drive::Close),
        _ => Err(ImpossibleStateFault {
            measured: pos,
            low: band.low,
            high: band.high,
        }),
    }
}

/// Potentiometer voltage to percent open, `None` when not a number.
pub fn position_from_voltage(volts: f32, ref_voltage: f32) -> Option<u8> {
    let pct = volts / ref_voltage * 100.0;
    if !pct.is_finite() {
        return None;
    }
    Some(pct.clamp(0.0, 100.0) as u8)
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Requested and measured position of one valve.
///
/// `requested` is written by the policy, `measured` and `band` only by the
/// valve's own servo loop.
#[derive(Debug)]
pub struct ManagedGateValve {
    name: String,
    geometry: ValveGeometry,
    requested: AtomicU8,
    measured: AtomicU8,
    band: AtomicU16,
}

impl ManagedGateValve {
    pub fn new(name: impl Into<String>, geometry: ValveGeometry) -> Self {
        Self {
            name: name.into(),
            geometry,
            requested: AtomicU8::new(0),
            measured: AtomicU8::new(UNKNOWN),
            band: AtomicU16::new(Band::for_request(0, &geometry).pack()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn geometry(&self) -> &ValveGeometry {
        &self.geometry
    }

    /// Band the servo is currently steering into.
    pub fn band(&self) -> Band {
        Band::unpack(self.band.load(Ordering::Acquire))
    }

    fn publish_measured(&self, measured: Option<u8>) {
        self.measured
            .store(measured.unwrap_or(UNKNOWN), Ordering::Release);
    }

    fn publish_band(&self, band: Band) {
        self.band.store(band.pack(), Ordering::Release);
    }
}

impl Positionable for ManagedGateValve {
    fn set_position(&self, percent: u8) {
        self.requested.store(percent.min(100), Ordering::Release);
    }

    fn requested_position(&self) -> u8 {
        self.requested.load(Ordering::Acquire)
    }

    fn measured_position(&self) -> Option<u8> {
        match self.measured.load(Ordering::Acquire) {
            UNKNOWN => None,
            pos => Some(pos),
        }
    }
}

// ---------------------------------------------------------------------------
// Servo loop
// ---------------------------------------------------------------------------

/// The three digital lines of a valve motor driver.
pub struct ServoOutputs<F, R, C> {
    pub forward: F,
    pub reverse: R,
    pub clutch: C,
}

#[derive(Debug, Clone, Copy)]
pub struct ServoTiming {
    /// Sleep after a hold cycle.
    pub hold: Duration,
    /// Sleep after a drive cycle.
    pub drive: Duration,
}

pub struct ValveServo<B, F, R, C> {
    valve: Arc<ManagedGateValve>,
    bus: Arc<Mutex<B>>,
    channel: u8,
    outputs: ServoOutputs<F, R, C>,
    node: Arc<NodeContext>,
    timing: ServoTiming,
    band: Band,
    last_request: Option<u8>,
}

impl<B, F, R, C> ValveServo<B, F, R, C>
where
    B: AnalogBus,
    F: OutputPin,
    R: OutputPin,
    C: OutputPin,
{
    pub fn new(
        valve: Arc<ManagedGateValve>,
        bus: Arc<Mutex<B>>,
        channel: u8,
        outputs: ServoOutputs<F, R, C>,
        node: Arc<NodeContext>,
        timing: ServoTiming,
    ) -> Self {
        let band = valve.band();
        Self {
            valve,
            bus,
            channel,
            outputs,
            node,
            timing,
            band,
            last_request: None,
        }
    }

    fn read_position(&mut self) -> Option<u8> {
        let volts = {
            let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
            bus.read_voltage(self.channel)
        };
        match volts {
            Ok(v) => position_from_voltage(v, self.valve.geometry.ref_voltage),
            Err(e) => {
                debug!("{}: position unknown: {}", self.valve.name, e);
                None
            }
        }
    }

    /// One measure / decide / drive pass.
    pub fn cycle(&mut self) -> Result<Drive, Error> {
        let measured = self.read_position();
        self.valve.publish_measured(measured);

        let requested = self.valve.requested_position();
        if self.last_request != Some(requested) {
            self.band = Band::for_request(requested, &self.valve.geometry);
            self.valve.publish_band(self.band);
            self.last_request = Some(requested);
            debug!(
                "{}: request {}% -> band [{}, {}]",
                self.valve.name, requested, self.band.low, self.band.high
            );
        }

        let drive = decide(measured, self.band)?;
        self.apply(drive)?;
        Ok(drive)
    }

    fn apply(&mut self, drive: Drive) -> Result<(), BusIoError> {
        let o = &mut self.outputs;
        match drive {
            Drive::Hold => {
                drive_line(&mut o.forward, false, "forward")?;
                drive_line(&mut o.reverse, false, "reverse")
            }
            Drive::Open => {
                drive_line(&mut o.clutch, true, "clutch")?;
                drive_line(&mut o.reverse, false, "reverse")?;
                drive_line(&mut o.forward, true, "forward")
            }
            Drive::Close => {
                drive_line(&mut o.clutch, true, "clutch")?;
                drive_line(&mut o.forward, false, "forward")?;
                drive_line(&mut o.reverse, true, "reverse")
            }
        }
    }

    /// De-energise every line.  The clutch goes last.
    pub fn shutdown(&mut self) {
        let o = &mut self.outputs;
        for res in [
            drive_line(&mut o.forward, false, "forward"),
            drive_line(&mut o.reverse, false, "reverse"),
            drive_line(&mut o.clutch, false, "clutch"),
        ] {
            if let Err(e) = res {
                error!("{}: shutdown: {}", self.valve.name, e);
            }
        }
    }

    /// Loop until the node exits.  Returns the fault that halted it, if any.
    pub fn run(mut self) -> Result<(), ImpossibleStateFault> {
        info!("{}: servo started", self.valve.name);
        while !self.node.is_exiting() {
            let pause = match self.cycle() {
                Ok(Drive::Hold) => self.timing.hold,
                Ok(_) => self.timing.drive,
                Err(Error::Impossible(fault)) => {
                    error!("CRITICAL {}: {}. Halting node.", self.valve.name, fault);
                    self.shutdown();
                    self.node.raise_fatal();
                    return Err(fault);
                }
                Err(e) => {
                    warn!("{}: servo cycle aborted: {}", self.valve.name, e);
                    self.timing.hold
                }
            };
            thread::sleep(pause);
        }
        self.shutdown();
        info!("{}: servo stopped, clutch released", self.valve.name);
        Ok(())
    }
}

impl<B, F, R, C> ValveServo<B, F, R, C>
where
    B: AnalogBus + Send + 'static,
    F: OutputPin + Send + 'static,
    R: OutputPin + Send + 'static,
    C: OutputPin + Send + 'static,
{
    pub fn spawn(self) -> io::Result<JoinHandle<Result<(), ImpossibleStateFault>>> {
        thread::Builder::new()
            .name(format!("servo-{}", self.valve.name))
            .spawn(move || self.run())
    }
}
