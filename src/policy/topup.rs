//! Daily mains-water top-up of one butts group through a solenoid valve.
//!
//! Two states:
//!
//! ```text
//!   Idle (solenoid off) ──needs top-up ∧ start window──▶ ToppingUp (solenoid on)
//!        ▲                                                   │
//!        └──── topped up ∨ after failsafe end ∨ before window ┘
//! ```
//!
//! The solenoid's manual override (see [`crate::manual_override`]) is read
//! every tick.  `off` blocks ToppingUp and ends a running top-up; `on`
//! blocks Idle and starts one; `auto` leaves the schedule in charge.  The
//! override also beats the failsafe end time.

use std::path::PathBuf;

use log::error;

use super::readings::{self, ZoneReadings};
use crate::app::ports::{Clock, PersistencePort};
use crate::arbitrator::{DeviceKey, Severity};
use crate::config::TopUpSchedule;
use crate::devices::Enableable;
use crate::error::ClassificationError;
use crate::fsm::context::PolicyContext;
use crate::fsm::{ControlStateMachine, StateDescriptor, StateKey};
use crate::manual_override::{self, OverrideMode};

pub const MACHINE_NAME: &str = "TempTopUpControlLogic";

const CONTRADICTION_EVENT: &str = "G1 sensors contradict";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopUpState {
    Idle,
    ToppingUp,
}

impl StateKey for TopUpState {
    const ALL: &'static [Self] = &[Self::Idle, Self::ToppingUp];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Idle => "TTUIdleState",
            Self::ToppingUp => "TTUToppingUpState",
        }
    }
}

pub struct TopUpBoard<S, K> {
    pub solenoid: S,
    pub solenoid_key: DeviceKey,
    pub clock: K,
    pub schedule: TopUpSchedule,
    pub readings: ZoneReadings,
    pub override_file: PathBuf,
}

impl<S: Enableable, K: Clock> TopUpBoard<S, K> {
    /// Zone G3 with solenoid `G3:S0`.
    pub fn standard(
        solenoid: S,
        clock: K,
        schedule: TopUpSchedule,
        override_file: PathBuf,
    ) -> Result<Self, crate::reading::InvalidReadingId> {
        Ok(Self {
            solenoid,
            solenoid_key: DeviceKey::new("G3", "S0"),
            clock,
            schedule,
            readings: ZoneReadings::standard("G3")?,
            override_file,
        })
    }
}

pub type TopUpContext<P, S, K> = PolicyContext<P, TopUpBoard<S, K>>;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

fn needs_top_up<P, S, K>(ctx: &mut TopUpContext<P, S, K>) -> Result<bool, ClassificationError>
where
    P: PersistencePort,
{
    let snap = readings::capture(&mut ctx.arbiter, &ctx.board.readings)?;
    snap.empty_below(ctx.board.schedule.start_level)
        .inspect_err(|_| readings::report_contradiction(&mut ctx.arbiter, &snap, CONTRADICTION_EVENT))
}

fn topped_up<P, S, K>(ctx: &mut TopUpContext<P, S, K>) -> Result<bool, ClassificationError>
where
    P: PersistencePort,
{
    let snap = readings::capture(&mut ctx.arbiter, &ctx.board.readings)?;
    snap.full_at(ctx.board.schedule.stop_level)
        .inspect_err(|_| readings::report_contradiction(&mut ctx.arbiter, &snap, CONTRADICTION_EVENT))
}

fn override_mode<P, S, K>(ctx: &mut TopUpContext<P, S, K>) -> OverrideMode
where
    P: PersistencePort,
{
    let setting = manual_override::read_override_file(&ctx.board.override_file);
    manual_override::resolve(setting, &mut ctx.arbiter, &ctx.board.solenoid_key, "Solenoid")
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

type Next = Result<Option<TopUpState>, ClassificationError>;

fn idle_transition<P, S, K>(ctx: &mut TopUpContext<P, S, K>) -> Next
where
    P: PersistencePort,
    K: Clock,
{
    match override_mode(ctx) {
        OverrideMode::Off => Ok(None),
        OverrideMode::On => Ok(Some(TopUpState::ToppingUp)),
        OverrideMode::Auto => {
            let needed = needs_top_up(ctx)?;
            let now = ctx.board.clock.time_of_day();
            let window = ctx.board.schedule.window_start..=ctx.board.schedule.window_end;
            Ok((needed && window.contains(&now)).then_some(TopUpState::ToppingUp))
        }
    }
}

fn topping_up_transition<P, S, K>(ctx: &mut TopUpContext<P, S, K>) -> Next
where
    P: PersistencePort,
    K: Clock,
{
    match override_mode(ctx) {
        OverrideMode::On => Ok(None),
        OverrideMode::Off => Ok(Some(TopUpState::Idle)),
        OverrideMode::Auto => match topped_up(ctx) {
            Ok(done) => {
                let now = ctx.board.clock.time_of_day();
                let s = &ctx.board.schedule;
                let finish = done || now >= s.failsafe_end || now < s.window_start;
                Ok(finish.then_some(TopUpState::Idle))
            }
            Err(e) => {
                error!("Could not parse sensor readings ({}). Falling back to idle as failsafe.", e);
                Ok(Some(TopUpState::Idle))
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Device control
// ---------------------------------------------------------------------------

fn idle_control<P, S: Enableable, K>(ctx: &mut TopUpContext<P, S, K>) {
    if let Err(e) = ctx.board.solenoid.disable() {
        error!("Error trying to control {}: {}", ctx.board.solenoid_key, e);
    }
}

fn topping_up_control<P, S: Enableable, K>(ctx: &mut TopUpContext<P, S, K>) {
    if let Err(e) = ctx.board.solenoid.enable() {
        error!("Error trying to control {}: {}", ctx.board.solenoid_key, e);
    }
}

fn announce<P: PersistencePort, S, K>(ctx: &mut TopUpContext<P, S, K>, word: &str) {
    let event = format!("New device state required: {}: {}", ctx.board.solenoid_key, word);
    ctx.arbiter.log_event_best_effort(&event, Severity::Info);
}

fn idle_enter<P: PersistencePort, S, K>(ctx: &mut TopUpContext<P, S, K>) {
    announce(ctx, "disable");
}

fn topping_up_enter<P: PersistencePort, S, K>(ctx: &mut TopUpContext<P, S, K>) {
    announce(ctx, "enable");
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub fn build_machine<P, S, K>() -> ControlStateMachine<TopUpState, TopUpContext<P, S, K>>
where
    P: PersistencePort,
    S: Enableable,
    K: Clock,
{
    let mut m = ControlStateMachine::new(MACHINE_NAME);
    m.register(
        StateDescriptor::new(TopUpState::Idle, idle_control::<P, S, K>, idle_transition::<P, S, K>)
            .on_enter(idle_enter::<P, S, K>),
    );
    m.register(
        StateDescriptor::new(
            TopUpState::ToppingUp,
            topping_up_control::<P, S, K>,
            topping_up_transition::<P, S, K>,
        )
        .on_enter(topping_up_enter::<P, S, K>),
    );
    m
}
