//! Node service: the tick loop around one control state machine.
//!
//! [`NodeService`] owns the machine and its policy context.  Background
//! device loops run on their own threads and only meet the service through
//! the shared [`NodeContext`] flags and their device handles.
//!
//! ```text
//!  StoragePort ◀──┐ ┌──────────────────────────────┐ ──▶ EventSink
//!                 └─│  NodeService                  │
//!   Readable ──────▶│  tick · publish · FSM · persist│ ──▶ Arbitrator
//!                   └──────────────────────────────┘
//! ```
//!
//! Per iteration:
//!
//! 1. advance the tick on [`NodeContext`];
//! 2. publish readings of monitored devices through the arbitrator;
//! 3. run the machine's tick;
//! 4. on a state change, emit [`NodeEvent::StateChanged`];
//! 5. persist the state name with the tick, and store the tick remotely;
//! 6. sleep the returned interval in short slices, watching the exit and
//!    fatal flags.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::devices::Device;
use crate::error::{Error, Result};
use crate::fsm::context::{NodeContext, PolicyContext};
use crate::fsm::{ControlStateMachine, DEFAULT_INTERVAL_SECS, StateKey};

use super::events::NodeEvent;
use super::ports::{EventSink, PersistencePort, StorageError, StoragePort};

/// Storage namespace for machine records.
pub const RECORD_NAMESPACE: &str = "fsm";

const RECORD_BUF_LEN: usize = 256;

/// What survives a restart: which machine was in which state at which tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub machine: String,
    pub state: String,
    pub tick: u64,
}

// ───────────────────────────────────────────────────────────────
// NodeService
// ───────────────────────────────────────────────────────────────

pub struct NodeService<S: StateKey, P, X> {
    fsm: ControlStateMachine<S, PolicyContext<P, X>>,
    ctx: PolicyContext<P, X>,
    initial: S,
    monitored: Vec<Device>,
    interval: u32,
    /// Wall time of one interval second.  Shortened in simulation and tests.
    second: Duration,
}

impl<S: StateKey, P: PersistencePort, X> NodeService<S, P, X> {
    /// Wrap a built machine.  Fails if any state is unregistered.
    pub fn new(
        fsm: ControlStateMachine<S, PolicyContext<P, X>>,
        ctx: PolicyContext<P, X>,
        initial: S,
    ) -> Result<Self> {
        fsm.verify()?;
        Ok(Self {
            fsm,
            ctx,
            initial,
            monitored: Vec::new(),
            interval: DEFAULT_INTERVAL_SECS,
            second: Duration::from_secs(1),
        })
    }

    /// Publish this device's latest reading every tick.
    pub fn monitor(&mut self, device: Device) {
        if device.as_readable().is_none() {
            warn!("{}: {} has no readings to publish", self.fsm.name(), device.kind());
            return;
        }
        self.monitored.push(device);
    }

    pub fn set_second(&mut self, second: Duration) {
        self.second = second;
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Enter the persisted state if this machine left a record, otherwise
    /// the initial state.  Returns the first interval.
    pub fn start(&mut self, storage: &mut impl StoragePort, sink: &mut impl EventSink) -> u32 {
        let record = self.load_record(storage);
        let resumed = record.is_some();

        self.interval = match record {
            Some(rec) => {
                info!(
                    "{}: resuming in {} at tick {}",
                    self.fsm.name(),
                    rec.state,
                    rec.tick
                );
                self.ctx.node.set_tick(rec.tick);
                self.fsm.enter_named(&rec.state, self.initial, &mut self.ctx)
            }
            None => self.fsm.enter(self.initial, &mut self.ctx),
        };

        let state = self.state_name();
        self.save_record(storage);
        sink.emit(&NodeEvent::Started {
            machine: self.fsm.name(),
            state,
            resumed,
        });
        self.interval
    }

    /// One iteration of the loop, without the sleep.
    pub fn tick(
        &mut self,
        now: NaiveDateTime,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> u32 {
        let tick = self.ctx.node.advance_tick();
        self.publish_readings(now, tick);

        let before = self.fsm.current_state();
        self.interval = self.fsm.tick(&mut self.ctx, self.interval);
        let after = self.fsm.current_state();

        if before != after {
            let from = before.map_or("<none>", StateKey::name);
            sink.emit(&NodeEvent::StateChanged {
                from,
                to: self.state_name(),
            });
        }
        self.save_record(storage);

        match self.ctx.arbiter.store_tick(tick) {
            Ok(()) => sink.emit(&NodeEvent::TickStored(tick)),
            Err(e) => warn!("{}: could not store tick {}: {}", self.fsm.name(), tick, e),
        }
        self.interval
    }

    /// Tick until an exit is requested.
    ///
    /// Returns [`Error::Halted`] when a background loop raised the fatal
    /// flag.
    pub fn run(
        &mut self,
        now: impl Fn() -> NaiveDateTime,
        storage: &mut impl StoragePort,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        if self.fsm.current_state().is_none() {
            self.start(storage, sink);
        }

        loop {
            if let Some(result) = self.check_flags(sink) {
                return result;
            }
            self.tick(now(), storage, sink);
            self.sleep_interval();
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> Option<S> {
        self.fsm.current_state()
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn node(&self) -> &Arc<NodeContext> {
        &self.ctx.node
    }

    pub fn context(&self) -> &PolicyContext<P, X> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut PolicyContext<P, X> {
        &mut self.ctx
    }

    pub fn machine(&self) -> &ControlStateMachine<S, PolicyContext<P, X>> {
        &self.fsm
    }

    // ── Internal ──────────────────────────────────────────────

    fn state_name(&self) -> &'static str {
        self.fsm.current_state_name().unwrap_or("<none>")
    }

    fn check_flags(&self, sink: &mut impl EventSink) -> Option<Result<()>> {
        let node = &self.ctx.node;
        if node.is_fatal() {
            error!("CRITICAL: {} halting, a device loop hit a fatal fault", self.fsm.name());
            sink.emit(&NodeEvent::Fault(format!(
                "{} halted in {}",
                self.fsm.name(),
                self.state_name()
            )));
            return Some(Err(Error::Halted));
        }
        if node.is_exiting() {
            info!("{}: exit requested, stopping", self.fsm.name());
            sink.emit(&NodeEvent::Stopped { tick: node.tick() });
            return Some(Ok(()));
        }
        None
    }

    fn sleep_interval(&self) {
        for _ in 0..self.interval {
            if self.ctx.node.is_exiting() {
                return;
            }
            thread::sleep(self.second);
        }
    }

    fn publish_readings(&mut self, now: NaiveDateTime, tick: u64) {
        for device in &self.monitored {
            let Some(reading) = device
                .as_readable()
                .and_then(|r| r.latest_reading(now, tick))
            else {
                debug!("{}: {} has no reading yet", self.fsm.name(), device.kind());
                continue;
            };
            if let Err(e) = self.ctx.arbiter.publish_reading(&reading) {
                warn!("Could not publish reading {}: {}", reading.id(), e);
            }
        }
    }

    fn load_record(&self, storage: &impl StoragePort) -> Option<MachineRecord> {
        let mut buf = [0u8; RECORD_BUF_LEN];
        let len = match storage.read(RECORD_NAMESPACE, self.fsm.name(), &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => return None,
            Err(e) => {
                warn!("{}: could not read machine record: {}", self.fsm.name(), e);
                return None;
            }
        };
        match postcard::from_bytes::<MachineRecord>(&buf[..len]) {
            Ok(rec) if rec.machine == self.fsm.name() => Some(rec),
            Ok(rec) => {
                warn!(
                    "{}: ignoring record written by {}",
                    self.fsm.name(),
                    rec.machine
                );
                None
            }
            Err(e) => {
                warn!("{}: corrupt machine record ({}), starting fresh", self.fsm.name(), e);
                None
            }
        }
    }

    fn save_record(&self, storage: &mut impl StoragePort) {
        let Some(state) = self.fsm.current_state_name() else {
            return;
        };
        let record = MachineRecord {
            machine: self.fsm.name().to_owned(),
            state: state.to_owned(),
            tick: self.ctx.node.tick(),
        };
        let bytes = match postcard::to_allocvec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("{}: could not encode machine record: {}", self.fsm.name(), e);
                return;
            }
        };
        if let Err(e) = storage.write(RECORD_NAMESPACE, self.fsm.name(), &bytes) {
            warn!("{}: could not persist state {}: {}", self.fsm.name(), state, e);
        }
    }
}
