//! Shared state threaded through every state handler and background loop.
//!
//! Two layers:
//!
//! - [`NodeContext`] is process-wide and shared by `Arc` between the tick
//!   loop and every device loop.  Each field has one writer:
//!
//!   | field     | written by                  | read by              |
//!   |-----------|-----------------------------|----------------------|
//!   | `tick`    | node service (tick loop)    | anyone, diagnostics  |
//!   | `exiting` | node service / fatal path   | every loop, per pass |
//!   | `fatal`   | a background loop on fault  | node service         |
//!
//! - [`PolicyContext`] is the per-machine "blackboard": the arbitrator the
//!   policy talks through, plus a policy-specific board `X` holding its
//!   devices and whatever the policy carries between handlers.  Readings
//!   are captured by the transition at the start of each tick; a board
//!   that needs them again in an entry hook keeps that capture (see
//!   `TransferBoard`) rather than reading the store twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::app::ports::PersistencePort;
use crate::arbitrator::{Arbitrator, Severity};
use crate::error::RemoteCallError;

// ---------------------------------------------------------------------------
// NodeContext
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct NodeContext {
    tick: AtomicU64,
    exiting: AtomicBool,
    fatal: AtomicBool,
}

impl NodeContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current logical tick.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Advance the logical clock by one and return the new value.
    pub fn advance_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Seed the counter, e.g. from the last persisted tick.
    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::Release);
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Ask every loop to wind down at its next pass.
    pub fn request_exit(&self) {
        self.exiting.store(true, Ordering::Release);
    }

    /// Flag an unrecoverable fault and stop every loop.
    pub fn raise_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
        self.request_exit();
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// ControlContext
// ---------------------------------------------------------------------------

/// What the state machine engine itself needs from a handler context.
pub trait ControlContext {
    /// Remote event log.  The engine treats failures as best-effort.
    fn log_event(&mut self, event: &str, severity: Severity) -> Result<(), RemoteCallError>;
}

// ---------------------------------------------------------------------------
// PolicyContext
// ---------------------------------------------------------------------------

/// The context passed to every state handler of one policy.
pub struct PolicyContext<P, X> {
    /// Gateway to the shared persistence engine.
    pub arbiter: Arbitrator<P>,
    /// Process-wide flags and clock.
    pub node: Arc<NodeContext>,
    /// Policy-specific devices and state.
    pub board: X,
}

impl<P: PersistencePort, X> PolicyContext<P, X> {
    pub fn new(arbiter: Arbitrator<P>, node: Arc<NodeContext>, board: X) -> Self {
        Self {
            arbiter,
            node,
            board,
        }
    }
}

impl<P: PersistencePort, X> ControlContext for PolicyContext<P, X> {
    fn log_event(&mut self, event: &str, severity: Severity) -> Result<(), RemoteCallError> {
        self.arbiter.log_event(event, severity)
    }
}
