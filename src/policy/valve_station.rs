//! Gate valve station: follow the position requested in the valve's lock
//! record.
//!
//! The station never decides anything itself.  Whoever holds the valve's
//! lock writes `"NN%"` as the requested value; the station hands that to
//! the servo loop (see [`crate::devices::gate_valve`]) and reports what it
//! is doing through its status line.

use std::sync::Arc;

use log::{info, warn};

use crate::app::ports::PersistencePort;
use crate::arbitrator::{DeviceKey, Severity};
use crate::devices::{ManagedGateValve, Positionable};
use crate::error::ClassificationError;
use crate::fsm::context::PolicyContext;
use crate::fsm::{ControlStateMachine, StateDescriptor, StateKey};

pub const MACHINE_NAME: &str = "GateValveStationLogic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationState {
    Following,
}

impl StateKey for StationState {
    const ALL: &'static [Self] = &[Self::Following];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Following => "ValveFollowingState",
        }
    }
}

pub struct StationBoard {
    pub valve: Arc<ManagedGateValve>,
    pub key: DeviceKey,
    /// Last request handed to the servo.
    pub applied: Option<u8>,
}

impl StationBoard {
    pub fn new(valve: Arc<ManagedGateValve>, key: DeviceKey) -> Self {
        Self {
            valve,
            key,
            applied: None,
        }
    }
}

pub type StationContext<P> = PolicyContext<P, StationBoard>;

/// Parse `"NN%"` (0..=100).
pub fn parse_percent(value: &str) -> Option<u8> {
    let digits = value.trim().strip_suffix('%')?;
    digits.trim().parse::<u8>().ok().filter(|p| *p <= 100)
}

fn follow_control<P: PersistencePort>(ctx: &mut StationContext<P>) {
    let record = match ctx.arbiter.device_state(&ctx.board.key) {
        Ok(r) => r,
        Err(e) => {
            warn!("Could not fetch the requested position of {}: {}", ctx.board.key, e);
            return;
        }
    };

    let status = match record.request() {
        None => "Position requested: None".to_owned(),
        Some(raw) => match parse_percent(raw) {
            Some(percent) => {
                if ctx.board.applied != Some(percent) {
                    ctx.board.valve.set_position(percent);
                    ctx.board.applied = Some(percent);
                    info!("{}: new position {}%", ctx.board.key, percent);
                    let event = format!("New valve position: {percent}%");
                    ctx.arbiter.log_event_best_effort(&event, Severity::Info);
                }
                format!("Position requested: {percent}")
            }
            None => {
                warn!("{}: ignoring unusable position request {:?}", ctx.board.key, raw);
                return;
            }
        },
    };

    if let Err(e) = ctx.arbiter.update_status(&status) {
        warn!("Could not update status: {}", e);
    }
}

fn follow_transition<P: PersistencePort>(
    _ctx: &mut StationContext<P>,
) -> Result<Option<StationState>, ClassificationError> {
    Ok(None)
}

pub fn build_machine<P: PersistencePort>() -> ControlStateMachine<StationState, StationContext<P>> {
    let mut m = ControlStateMachine::new(MACHINE_NAME);
    m.register(
        StateDescriptor::new(
            StationState::Following,
            follow_control::<P>,
            follow_transition::<P>,
        )
        .interval(15),
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapters::memory_store::MemoryStore;
    use crate::arbitrator::{Arbitrator, DeviceLockRecord, RetryPolicy};
    use crate::config::ValveGeometry;
    use crate::fsm::context::NodeContext;

    type Ctx = StationContext<MemoryStore>;

    fn rig() -> (MemoryStore, Arc<ManagedGateValve>, Ctx, ControlStateMachine<StationState, Ctx>) {
        let store = MemoryStore::new();
        let valve = Arc::new(ManagedGateValve::new("V12", ValveGeometry::default()));
        let arbiter = Arbitrator::new(
            "VALVE12",
            store.clone(),
            RetryPolicy {
                attempts: 1,
                pause: Duration::ZERO,
            },
        );
        let board = StationBoard::new(valve.clone(), DeviceKey::new("VALVE12", "V12"));
        let ctx = PolicyContext::new(arbiter, NodeContext::new(), board);
        (store, valve, ctx, build_machine())
    }

    #[test]
    fn percent_parsing() {
        assert_eq!(parse_percent("25%"), Some(25));
        assert_eq!(parse_percent(" 100% "), Some(100));
        assert_eq!(parse_percent("0%"), Some(0));
        assert_eq!(parse_percent("101%"), None);
        assert_eq!(parse_percent("25"), None);
        assert_eq!(parse_percent("half%"), None);
    }

    #[test]
    fn follows_lock_record() {
        let (store, valve, mut ctx, mut fsm) = rig();
        let key = DeviceKey::new("VALVE12", "V12");
        store.force_lock(key.clone(), DeviceLockRecord::locked("G6", "50%"));
        assert_eq!(fsm.enter(StationState::Following, &mut ctx), 15);
        assert_eq!(valve.requested_position(), 50);
        assert_eq!(store.status("VALVE12").as_deref(), Some("Position requested: 50"));

        store.force_lock(key, DeviceLockRecord::locked("G6", "0%"));
        assert_eq!(fsm.tick(&mut ctx, 15), 15);
        assert_eq!(valve.requested_position(), 0);
        let moves: Vec<_> = store
            .events()
            .into_iter()
            .filter(|e| e.text.starts_with("New valve position"))
            .collect();
        assert_eq!(moves.len(), 2);
    }

    #[test]
    fn unchanged_request_is_not_reapplied() {
        let (store, _valve, mut ctx, mut fsm) = rig();
        store.force_lock(
            DeviceKey::new("VALVE12", "V12"),
            DeviceLockRecord::locked("G6", "25%"),
        );
        fsm.enter(StationState::Following, &mut ctx);
        fsm.tick(&mut ctx, 15);
        fsm.tick(&mut ctx, 15);
        let moves = store
            .events()
            .iter()
            .filter(|e| e.text == "New valve position: 25%")
            .count();
        assert_eq!(moves, 1);
        assert_eq!(fsm.current_state(), Some(StationState::Following));
    }

    #[test]
    fn unlocked_valve_reports_none() {
        let (store, valve, mut ctx, mut fsm) = rig();
        fsm.enter(StationState::Following, &mut ctx);
        assert_eq!(store.status("VALVE12").as_deref(), Some("Position requested: None"));
        assert_eq!(valve.requested_position(), 0);
    }

    #[test]
    fn garbage_request_leaves_position() {
        let (store, valve, mut ctx, mut fsm) = rig();
        let key = DeviceKey::new("VALVE12", "V12");
        store.force_lock(key.clone(), DeviceLockRecord::locked("G6", "75%"));
        fsm.enter(StationState::Following, &mut ctx);
        store.force_lock(key, DeviceLockRecord::locked("G6", "wide open"));
        fsm.tick(&mut ctx, 15);
        assert_eq!(valve.requested_position(), 75);
    }
}
