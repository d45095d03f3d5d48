//! Four-chain magnetic level probe and its decoder loop.
//!
//! Each chain has one Hall sensor per level, offset 25 mm from its
//! neighbours (columns: 100s, 25s, 50s, 75s).  The float magnet pulls the
//! nearest chain's voltage down ("dip").  Output impedance drift shifts all
//! four chains together, so the decoder works on the dip relative to the
//! other three:
//!
//! ```text
//!   v_min   = min(v0..v3)          dip = argmin
//!   v_comp  = (Σv − v_min) / 3 − v_min
//!   level   = first window with low ≤ v_comp ≤ high
//!   depth   = depths[dip][level]
//! ```
//!
//! When even the dip is at or above the shortcut voltage the magnet sits
//! between two zones; every chain then carries the same compensated value.
//! A cycle with no matching window, or a bus error, keeps the last depth.

use std::io;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use super::Readable;
use crate::app::ports::AnalogBus;
use crate::config::ProbeCalibration;
use crate::error::BusIoError;
use crate::fsm::context::NodeContext;
use crate::reading::{Reading, ReadingId};

pub const CHANNELS: usize = 4;

const NO_DEPTH: i32 = i32::MIN;

// ---------------------------------------------------------------------------
// Pure decode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compensated {
    pub volts: f32,
    /// Chain nearest the magnet.
    pub dip: usize,
    /// Magnet between two sensing zones.
    pub between_zones: bool,
}

pub fn compensate(volts: &[f32; CHANNELS], shortcut_volts: f32) -> Compensated {
    let (dip, v_min) = volts
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::INFINITY), |(i_min, v_min), (i, v)| {
            if v < v_min { (i, v) } else { (i_min, v_min) }
        });
    let total: f32 = volts.iter().sum();
    let others_avg = (total - v_min) / 3.0;

    Compensated {
        volts: others_avg - v_min,
        dip,
        between_zones: v_min >= shortcut_volts,
    }
}

/// Depth for a compensated sample, `None` when no level window matches.
pub fn decode(sample: &Compensated, calibration: &ProbeCalibration) -> Option<i32> {
    let level = calibration
        .windows
        .iter()
        .position(|w| w.contains(sample.volts))?;
    calibration.depths.get(sample.dip)?.get(level).copied()
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Latest probe values.  Written only by the probe's decoder loop.
///
/// Voltages are stored as `f32` bit patterns so readers never see a torn
/// value.
#[derive(Debug)]
pub struct ManagedLevelProbe {
    id: ReadingId,
    calibration: ProbeCalibration,
    raw: [AtomicU32; CHANNELS],
    compensated: AtomicU32,
    dip: AtomicU8,
    depth: AtomicI32,
}

impl ManagedLevelProbe {
    pub fn new(id: ReadingId, calibration: ProbeCalibration) -> Self {
        Self {
            id,
            calibration,
            raw: Default::default(),
            compensated: AtomicU32::new(0),
            dip: AtomicU8::new(0),
            depth: AtomicI32::new(NO_DEPTH),
        }
    }

    pub fn id(&self) -> &ReadingId {
        &self.id
    }

    pub fn calibration(&self) -> &ProbeCalibration {
        &self.calibration
    }

    pub fn raw_voltages(&self) -> [f32; CHANNELS] {
        core::array::from_fn(|i| f32::from_bits(self.raw[i].load(Ordering::Acquire)))
    }

    /// Last compensated voltage and its dip chain.
    pub fn compensated(&self) -> (f32, usize) {
        (
            f32::from_bits(self.compensated.load(Ordering::Acquire)),
            usize::from(self.dip.load(Ordering::Acquire)),
        )
    }

    /// Last decoded depth (mm), `None` before the first successful decode.
    pub fn depth_mm(&self) -> Option<i32> {
        match self.depth.load(Ordering::Acquire) {
            NO_DEPTH => None,
            mm => Some(mm),
        }
    }

    fn publish_raw(&self, volts: &[f32; CHANNELS]) {
        for (slot, v) in self.raw.iter().zip(volts) {
            slot.store(v.to_bits(), Ordering::Release);
        }
    }

    fn publish_compensated(&self, sample: &Compensated) {
        self.compensated
            .store(sample.volts.to_bits(), Ordering::Release);
        self.dip.store(sample.dip as u8, Ordering::Release);
    }

    fn publish_depth(&self, mm: i32) {
        self.depth.store(mm, Ordering::Release);
    }
}

impl Readable for ManagedLevelProbe {
    fn latest_reading(&self, time: NaiveDateTime, tick: u64) -> Option<Reading> {
        self.depth_mm()
            .map(|mm| Reading::depth(time, tick, self.id.clone(), mm))
    }
}

// ---------------------------------------------------------------------------
// Decoder loop
// ---------------------------------------------------------------------------

pub struct ProbeDecoder<B> {
    probe: Arc<ManagedLevelProbe>,
    bus: Arc<Mutex<B>>,
    channels: [u8; CHANNELS],
    node: Arc<NodeContext>,
    period: Duration,
}

impl<B: AnalogBus> ProbeDecoder<B> {
    pub fn new(
        probe: Arc<ManagedLevelProbe>,
        bus: Arc<Mutex<B>>,
        channels: [u8; CHANNELS],
        node: Arc<NodeContext>,
        period: Duration,
    ) -> Self {
        Self {
            probe,
            bus,
            channels,
            node,
            period,
        }
    }

    /// The bus is held for exactly the four reads.
    fn read_burst(&self) -> Result<[f32; CHANNELS], BusIoError> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let mut volts = [0.0; CHANNELS];
        for (v, ch) in volts.iter_mut().zip(self.channels) {
            *v = bus.read_voltage(ch)?;
        }
        Ok(volts)
    }

    /// One read / compensate / decode pass.  Returns the depth decoded this
    /// cycle, if any.
    pub fn cycle(&mut self) -> Result<Option<i32>, BusIoError> {
        let volts = self.read_burst()?;
        self.probe.publish_raw(&volts);

        let sample = compensate(&volts, self.probe.calibration.shortcut_volts);
        self.probe.publish_compensated(&sample);

        match decode(&sample, &self.probe.calibration) {
            Some(mm) => {
                self.probe.publish_depth(mm);
                Ok(Some(mm))
            }
            None => {
                debug!(
                    "{}: {:.3} V on chain {} matches no level{}",
                    self.probe.id,
                    sample.volts,
                    sample.dip,
                    if sample.between_zones { " (between zones)" } else { "" }
                );
                Ok(None)
            }
        }
    }

    pub fn run(mut self) {
        info!("{}: decoder started", self.probe.id);
        while !self.node.is_exiting() {
            if let Err(e) = self.cycle() {
                warn!("{}: read aborted, keeping last depth: {}", self.probe.id, e);
            }
            thread::sleep(self.period);
        }
        info!("{}: decoder stopped", self.probe.id);
    }
}

impl<B: AnalogBus + Send + 'static> ProbeDecoder<B> {
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("probe-{}", self.probe.id))
            .spawn(move || self.run())
    }
}
