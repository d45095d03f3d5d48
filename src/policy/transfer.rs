//! Six-state water transfer from a source butts group (G6) into a
//! destination group (G4) through one arbitrated gate valve (V12).
//!
//! ```text
//!                 ┌──────────── G4 overfull (any state but Init routes here) ─────┐
//!                 ▼                                                               │
//!          G4Overfilled ──not overfull──▶ G4Filled ◀──full── G4VeryNearlyFilled  │
//!             valve 0%                    valve 0%  ──<full──▶  valve 25%         │
//!                                                              ▲   │ <very nearly │
//!                                               very nearly ───┘   ▼              │
//!                         G4Filling ──nearly──▶ G4NearlyFilled  valve 50%         │
//!                         valve 100% ◀──<nearly──┘                                │
//!
//!          G6 empty (from any fill state) ──▶ G6Empty, valve 0% ──G6 refills──▶ fill state
//! ```
//!
//! Each band is entered at its lower bound and left below it, so a level
//! sitting on one threshold does not flap between neighbours.  G4 overfull
//! outranks G6 empty: with both true the policy stays in (or moves to)
//! `G4Overfilled`.
//!
//! | state              | valve | interval |
//! |--------------------|-------|----------|
//! | Init               | none  | 15 s     |
//! | G4Overfilled       |  0 %  | 60 s     |
//! | G4Filled           |  0 %  | 60 s     |
//! | G4VeryNearlyFilled | 25 %  | 15 s     |
//! | G4NearlyFilled     | 50 %  | 30 s     |
//! | G4Filling          | 100 % | 60 s     |
//! | G6Empty            |  0 %  | 60 s     |

use log::{error, info, warn};

use super::readings::{self, ZoneReadings, ZoneSnapshot};
use crate::app::ports::PersistencePort;
use crate::arbitrator::DeviceKey;
use crate::config::TransferLevels;
use crate::error::ClassificationError;
use crate::fsm::context::PolicyContext;
use crate::fsm::{ControlStateMachine, StateDescriptor, StateKey};

pub const MACHINE_NAME: &str = "TransferControlLogic";

const SOURCE_CONTRADICTION_EVENT: &str = "G6 sensors contradict";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Init,
    G4Overfilled,
    G4Filled,
    G4VeryNearlyFilled,
    G4NearlyFilled,
    G4Filling,
    G6Empty,
}

impl StateKey for TransferState {
    const ALL: &'static [Self] = &[
        Self::Init,
        Self::G4Overfilled,
        Self::G4Filled,
        Self::G4VeryNearlyFilled,
        Self::G4NearlyFilled,
        Self::G4Filling,
        Self::G6Empty,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Init => "TransferInitState",
            Self::G4Overfilled => "TransferG4OverfilledState",
            Self::G4Filled => "TransferG4FilledState",
            Self::G4VeryNearlyFilled => "TransferG4VeryNearlyFilledState",
            Self::G4NearlyFilled => "TransferG4NearlyFilledState",
            Self::G4Filling => "TransferG4FillingState",
            Self::G6Empty => "TransferG6EmptyState",
        }
    }
}

/// Which way water should be moving between the two groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    Stopped,
    /// Source to destination through the valve.
    Forward,
    /// Destination back to source.  Needs a pump; with none fitted the
    /// valve is closed and the request is only recorded.
    Reverse,
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

pub struct TransferBoard {
    pub levels: TransferLevels,
    pub source: ZoneReadings,
    pub dest: ZoneReadings,
    pub valve: DeviceKey,
    pub flow: FlowDirection,
    /// Valve position last requested, `None` until the first request.
    pub valve_request: Option<u8>,
    /// Snapshot classified by this tick's transition, handed to the entry
    /// hook of the state it selects.
    stage: Option<Stage>,
}

impl TransferBoard {
    pub fn new(levels: TransferLevels, source: ZoneReadings, dest: ZoneReadings, valve: DeviceKey) -> Self {
        Self {
            levels,
            source,
            dest,
            valve,
            flow: FlowDirection::Stopped,
            valve_request: None,
            stage: None,
        }
    }

    /// G6 → G4 through `VALVE12:V12`.
    pub fn standard(levels: TransferLevels) -> Result<Self, crate::reading::InvalidReadingId> {
        Ok(Self::new(
            levels,
            ZoneReadings::standard("G6")?,
            ZoneReadings::standard("G4")?,
            DeviceKey::new("VALVE12", "V12"),
        ))
    }
}

pub type TransferContext<P> = PolicyContext<P, TransferBoard>;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Both zones at the start of a tick.
#[derive(Debug, Clone)]
struct Stage {
    source: ZoneSnapshot,
    dest: ZoneSnapshot,
    levels: TransferLevels,
}

impl Stage {
    fn capture<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Result<Self, ClassificationError> {
        ctx.board.stage = None;
        let dest = readings::capture(&mut ctx.arbiter, &ctx.board.dest)?;
        let source = readings::capture(&mut ctx.arbiter, &ctx.board.source)?;
        let stage = Self {
            source,
            dest,
            levels: ctx.board.levels,
        };
        ctx.board.stage = Some(stage.clone());
        Ok(stage)
    }

    /// The snapshot this tick's transition used, or a fresh one when the
    /// state is entered outside a tick (start-up, restart by name).
    fn current<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Result<Self, ClassificationError> {
        match ctx.board.stage.take() {
            Some(stage) => Ok(stage),
            None => Self::capture(ctx),
        }
    }

    fn source_empty<P: PersistencePort>(&self, ctx: &mut TransferContext<P>) -> Result<bool, ClassificationError> {
        self.source
            .empty_below(self.levels.source_not_empty)
            .inspect_err(|_| {
                readings::report_contradiction(&mut ctx.arbiter, &self.source, SOURCE_CONTRADICTION_EVENT)
            })
    }

    fn source_full<P: PersistencePort>(&self, ctx: &mut TransferContext<P>) -> Result<bool, ClassificationError> {
        self.source
            .full_at(self.levels.source_full)
            .inspect_err(|_| {
                readings::report_contradiction(&mut ctx.arbiter, &self.source, SOURCE_CONTRADICTION_EVENT)
            })
    }

    fn dest_overfull(&self) -> bool {
        self.dest.at_or_above(self.levels.dest_overfull)
    }

    fn dest_full_or_more(&self) -> bool {
        self.dest.at_or_above(self.levels.dest_full)
    }

    fn dest_very_nearly_full_or_more(&self) -> bool {
        self.dest.at_or_above(self.levels.dest_very_nearly_full)
    }

    fn dest_nearly_full_or_more(&self) -> bool {
        self.dest.at_or_above(self.levels.dest_nearly_full)
    }

    /// Fill state matching the destination level.
    fn fill_state(&self) -> TransferState {
        if self.dest_full_or_more() {
            TransferState::G4Filled
        } else if self.dest_very_nearly_full_or_more() {
            TransferState::G4VeryNearlyFilled
        } else if self.dest_nearly_full_or_more() {
            TransferState::G4NearlyFilled
        } else {
            TransferState::G4Filling
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

type Next = Result<Option<TransferState>, ClassificationError>;

fn init_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.dest_overfull() {
        return Ok(Some(TransferState::G4Overfilled));
    }
    if s.source_empty(ctx)? {
        return Ok(Some(TransferState::G6Empty));
    }
    Ok(Some(s.fill_state()))
}

fn overfilled_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.dest_overfull() {
        // Outranks an empty source.
        return Ok(None);
    }
    if s.source_empty(ctx)? {
        Ok(Some(TransferState::G6Empty))
    } else {
        Ok(Some(TransferState::G4Filled))
    }
}

fn filled_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.dest_overfull() {
        Ok(Some(TransferState::G4Overfilled))
    } else if s.source_empty(ctx)? {
        Ok(Some(TransferState::G6Empty))
    } else if !s.dest_full_or_more() {
        Ok(Some(TransferState::G4VeryNearlyFilled))
    } else {
        Ok(None)
    }
}

fn very_nearly_filled_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.source_empty(ctx)? {
        Ok(Some(TransferState::G6Empty))
    } else if s.dest_full_or_more() {
        Ok(Some(TransferState::G4Filled))
    } else if !s.dest_very_nearly_full_or_more() {
        Ok(Some(TransferState::G4NearlyFilled))
    } else {
        Ok(None)
    }
}

fn nearly_filled_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.source_empty(ctx)? {
        Ok(Some(TransferState::G6Empty))
    } else if s.dest_very_nearly_full_or_more() {
        Ok(Some(TransferState::G4VeryNearlyFilled))
    } else if !s.dest_nearly_full_or_more() {
        Ok(Some(TransferState::G4Filling))
    } else {
        Ok(None)
    }
}

fn filling_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.source_empty(ctx)? {
        Ok(Some(TransferState::G6Empty))
    } else if s.dest_nearly_full_or_more() {
        Ok(Some(TransferState::G4NearlyFilled))
    } else {
        Ok(None)
    }
}

fn source_empty_transition<P: PersistencePort>(ctx: &mut TransferContext<P>) -> Next {
    let s = Stage::capture(ctx)?;
    if s.dest_overfull() {
        Ok(Some(TransferState::G4Overfilled))
    } else if !s.source_empty(ctx)? {
        Ok(Some(s.fill_state()))
    } else {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Device control
// ---------------------------------------------------------------------------

fn request_valve<P: PersistencePort>(ctx: &mut TransferContext<P>, percent: u8) {
    let key = ctx.board.valve.clone();
    match ctx.arbiter.request_control(&key, &format!("{percent}%")) {
        Ok(true) => ctx.board.valve_request = Some(percent),
        Ok(false) => warn!("{} is controlled by another site; {}% not requested", key, percent),
        Err(e) => error!("Error trying to control valve {}: {}", key, e),
    }
}

fn init_control<P: PersistencePort>(_ctx: &mut TransferContext<P>) {}

fn closed_control<P: PersistencePort>(ctx: &mut TransferContext<P>) {
    ctx.board.flow = FlowDirection::Stopped;
    request_valve(ctx, 0);
}

/// Valve shut; any reverse flow chosen on entry is kept.
fn overfilled_control<P: PersistencePort>(ctx: &mut TransferContext<P>) {
    request_valve(ctx, 0);
}

fn quarter_open_control<P: PersistencePort>(ctx: &mut TransferContext<P>) {
    ctx.board.flow = FlowDirection::Forward;
    request_valve(ctx, 25);
}

fn half_open_control<P: PersistencePort>(ctx: &mut TransferContext<P>) {
    ctx.board.flow = FlowDirection::Forward;
    request_valve(ctx, 50);
}

fn fully_open_control<P: PersistencePort>(ctx: &mut TransferContext<P>) {
    ctx.board.flow = FlowDirection::Forward;
    request_valve(ctx, 100);
}

/// Pump G4 back into G6 unless G6 has no room.
fn overfilled_enter<P: PersistencePort>(ctx: &mut TransferContext<P>) {
    let direction = match Stage::current(ctx).and_then(|s| s.source_full(ctx)) {
        Ok(false) => FlowDirection::Reverse,
        Ok(true) => FlowDirection::Stopped,
        Err(e) => {
            warn!("Cannot tell whether G6 has room ({}); not reversing", e);
            FlowDirection::Stopped
        }
    };
    ctx.board.flow = direction;
    if direction == FlowDirection::Reverse {
        info!("G4 overfilled: reverse flow into G6 wanted, no pump fitted, holding V12 closed");
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub fn build_machine<P: PersistencePort>() -> ControlStateMachine<TransferState, TransferContext<P>> {
    use TransferState::*;

    let mut m = ControlStateMachine::new(MACHINE_NAME);
    m.register(StateDescriptor::new(Init, init_control::<P>, init_transition::<P>).interval(15));
    m.register(
        StateDescriptor::new(G4Overfilled, overfilled_control::<P>, overfilled_transition::<P>)
            .on_enter(overfilled_enter::<P>),
    );
    m.register(StateDescriptor::new(G4Filled, closed_control::<P>, filled_transition::<P>));
    m.register(
        StateDescriptor::new(
            G4VeryNearlyFilled,
            quarter_open_control::<P>,
            very_nearly_filled_transition::<P>,
        )
        .interval(15),
    );
    m.register(
        StateDescriptor::new(G4NearlyFilled, half_open_control::<P>, nearly_filled_transition::<P>)
            .interval(30),
    );
    m.register(StateDescriptor::new(G4Filling, fully_open_control::<P>, filling_transition::<P>));
    m.register(StateDescriptor::new(G6Empty, closed_control::<P>, source_empty_transition::<P>));
    m
}
