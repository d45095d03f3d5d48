//! Function-pointer control state machine engine.
//!
//! Every policy is a closed enum of states plus one row per state:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  StateTable (indexed by StateKey::index)                          │
//! │  ┌──────────┬──────────┬───────────┬──────────────┬────────────┐  │
//! │  │ id       │ interval │ on_enter  │ control      │ transition │  │
//! │  ├──────────┼──────────┼───────────┼──────────────┼────────────┤  │
//! │  │ G4Filled │ 60 s     │ fn(ctx)?  │ fn(ctx)      │ fn(ctx) -> │  │
//! │  │ G6Empty  │ 60 s     │ fn(ctx)?  │ fn(ctx)      │  Result<   │  │
//! │  │ ...      │          │           │              │  Option<S>>│  │
//! │  └──────────┴──────────┴───────────┴──────────────┴────────────┘  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `transition` for the **current** state:
//!
//! - `Ok(Some(next))` with `next != current`: enter `next` (entry log,
//!   `on_enter`, `control`) and adopt its interval.
//! - `Ok(None)` or `Ok(Some(current))`: call `control` again.  Outputs are
//!   re-asserted every tick whether or not anything changed.
//! - `Err(ClassificationError)`: hold the state, log, and still call
//!   `control`.  The engine never guesses a transition.
//!
//! Dispatch is by enum index.  State names are only looked up when a
//! persisted name is restored at start-up.

pub mod context;

use core::fmt;

use log::{debug, error, info, warn};

use crate::arbitrator::Severity;
use crate::error::{ClassificationError, Error};
use context::ControlContext;

/// Tick interval (seconds) of a state that states no preference.
pub const DEFAULT_INTERVAL_SECS: u32 = 60;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// A closed set of states.  Implemented by each policy's state enum.
pub trait StateKey: Copy + Eq + fmt::Debug + 'static {
    /// Every variant, in index order.
    const ALL: &'static [Self];

    /// Position in [`Self::ALL`].
    fn index(self) -> usize;

    /// Stable name used for persistence and logs.
    fn name(self) -> &'static str;

    /// Inverse of [`name`](Self::name).
    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Entry hook and per-tick device-control action.
pub type StateActionFn<C> = fn(&mut C);

/// Transition function.  Returns `Ok(Some(next))` to move, `Ok(None)` to stay.
pub type TransitionFn<S, C> = fn(&mut C) -> Result<Option<S>, ClassificationError>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor<S, C> {
    pub id: S,
    /// Preferred tick interval in seconds.
    pub preferred_interval: u32,
    /// Extra entry work beyond re-asserting outputs (event logging etc.).
    pub on_enter: Option<StateActionFn<C>>,
    /// Drive every device this state controls.  Must be idempotent.
    pub control: StateActionFn<C>,
    pub transition: TransitionFn<S, C>,
}

impl<S, C> StateDescriptor<S, C> {
    pub fn new(id: S, control: StateActionFn<C>, transition: TransitionFn<S, C>) -> Self {
        Self {
            id,
            preferred_interval: DEFAULT_INTERVAL_SECS,
            on_enter: None,
            control,
            transition,
        }
    }

    pub fn interval(mut self, secs: u32) -> Self {
        self.preferred_interval = secs;
        self
    }

    pub fn on_enter(mut self, hook: StateActionFn<C>) -> Self {
        self.on_enter = Some(hook);
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One policy's state machine.
///
/// The current-state pointer is the only mutable field and is written only
/// after a state's entry action has completed.
pub struct ControlStateMachine<S, C> {
    name: &'static str,
    table: Vec<Option<StateDescriptor<S, C>>>,
    current: Option<S>,
    transitions: u64,
}

impl<S: StateKey, C: ControlContext> ControlStateMachine<S, C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            table: S::ALL.iter().map(|_| None).collect(),
            current: None,
            transitions: 0,
        }
    }

    /// Add a state to the registry, replacing any earlier row for it.
    pub fn register(&mut self, descriptor: StateDescriptor<S, C>) {
        let idx = descriptor.id.index();
        if self.table[idx].is_some() {
            warn!("{}: state {} registered twice", self.name, descriptor.id.name());
        }
        self.table[idx] = Some(descriptor);
    }

    /// Check that every variant has a row.  Call once before the first `enter`.
    pub fn verify(&self) -> Result<(), Error> {
        match S::ALL.iter().find(|s| self.table[s.index()].is_none()) {
            Some(missing) => Err(Error::Unregistered(missing.name())),
            None => Ok(()),
        }
    }

    /// Make `state` current and run its entry action.
    ///
    /// Returns the state's preferred interval.  A failure to log the entry
    /// event remotely is kept to the local log.
    ///
    /// # Panics
    ///
    /// If `state` was never registered.  [`verify`](Self::verify) rules this out.
    pub fn enter(&mut self, state: S, ctx: &mut C) -> u32 {
        let row = self.descriptor(state);
        let (on_enter, control, interval) = (row.on_enter, row.control, row.preferred_interval);

        info!("{}: entering {}", self.name, state.name());
        if let Err(e) = ctx.log_event(&format!("Entering {}", state.name()), Severity::Info) {
            warn!("{}: state entry not logged remotely: {}", self.name, e);
        }
        if let Some(hook) = on_enter {
            hook(ctx);
        }
        control(ctx);

        self.current = Some(state);
        interval
    }

    /// Restore a persisted state by name, falling back to `fallback`.
    pub fn enter_named(&mut self, name: &str, fallback: S, ctx: &mut C) -> u32 {
        match S::from_name(name) {
            Some(state) => {
                info!("{}: restoring persisted state {}", self.name, name);
                self.enter(state, ctx)
            }
            None => {
                warn!(
                    "{}: unknown persisted state {:?}, starting in {}",
                    self.name,
                    name,
                    fallback.name()
                );
                self.enter(fallback, ctx)
            }
        }
    }

    /// Run one control tick and return the next interval in seconds.
    pub fn tick(&mut self, ctx: &mut C, current_interval: u32) -> u32 {
        let Some(current) = self.current else {
            warn!("{}: tick before any state was entered", self.name);
            return current_interval;
        };
        let row = self.descriptor(current);
        let (transition, control, interval) = (row.transition, row.control, row.preferred_interval);

        let next_interval = match transition(ctx) {
            Ok(Some(next)) if next != current => {
                info!(
                    "{}: {} requests transition into {}",
                    self.name,
                    current.name(),
                    next.name()
                );
                self.transitions += 1;
                self.enter(next, ctx)
            }
            Ok(_) => {
                control(ctx);
                interval
            }
            Err(e) => {
                error!(
                    "{}: could not parse sensor readings ({}). Control logic is stalled in {}.",
                    self.name,
                    e,
                    current.name()
                );
                let event = format!("Control logic stalled in {}: {}", current.name(), e);
                if let Err(re) = ctx.log_event(&event, Severity::Error) {
                    warn!("{}: stall not logged remotely: {}", self.name, re);
                }
                control(ctx);
                interval
            }
        };

        if next_interval != current_interval {
            debug!(
                "{}: tick interval {}s -> {}s",
                self.name, current_interval, next_interval
            );
        }
        next_interval
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fully-entered current state, `None` before the first `enter`.
    pub fn current_state(&self) -> Option<S> {
        self.current
    }

    pub fn current_state_name(&self) -> Option<&'static str> {
        self.current.map(StateKey::name)
    }

    /// Transitions taken through `tick` since construction.
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn descriptor(&self, state: S) -> &StateDescriptor<S, C> {
        match self.table.get(state.index()).and_then(Option::as_ref) {
            Some(row) => row,
            None => {
                error!("CRITICAL {}: state {} is not registered", self.name, state.name());
                panic!("{}: state {} is not registered", self.name, state.name());
            }
        }
    }
}
