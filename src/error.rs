//! Error taxonomy for the control core.
//!
//! Every fallible path in a node funnels into one of four families:
//!
//! ```text
//!  ClassificationError ── snapshot unusable ──▶ hold state, re-assert outputs
//!  RemoteCallError     ── retries exhausted ──▶ caller substitutes a safe default
//!  BusIoError          ── bus hiccup        ──▶ abort this servo/decoder cycle
//!  ImpossibleStateFault── servo contract    ──▶ halt the node
//! ```
//!
//! Only the last one is fatal.  The others are values the caller matches on
//! and degrades from; none of them unwind out of the tick loop.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core can convert into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Sensor snapshot could not be classified.
    Classification(ClassificationError),
    /// A persistence collaborator call exhausted its retry budget.
    Remote(RemoteCallError),
    /// Analog or digital bus access failed.
    Bus(BusIoError),
    /// A gate valve reached an undefined servo outcome.
    Impossible(ImpossibleStateFault),
    /// A state machine was started with a state missing from its registry.
    Unregistered(&'static str),
    /// A background loop raised the node's fatal flag.
    Halted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification(e) => write!(f, "classification: {e}"),
            Self::Remote(e) => write!(f, "remote: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Impossible(e) => write!(f, "fault: {e}"),
            Self::Unregistered(name) => write!(f, "state {name} was never registered"),
            Self::Halted => write!(f, "node halted after a fatal fault"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Classification errors
// ---------------------------------------------------------------------------

/// A readings parser could not turn the current snapshot into predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    /// Reading absent, or the persistence layer could not supply it.
    Missing { id: String },
    /// Reading present but its value does not parse.
    Malformed { id: String, value: String },
    /// "full" and "empty" both hold for one zone.
    Contradiction { zone: String },
}

impl ClassificationError {
    pub fn missing(id: impl Into<String>) -> Self {
        Self::Missing { id: id.into() }
    }

    pub fn malformed(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Malformed {
            id: id.into(),
            value: value.into(),
        }
    }

    pub fn contradiction(zone: impl Into<String>) -> Self {
        Self::Contradiction { zone: zone.into() }
    }
}

impl fmt::Display for ClassificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { id } => write!(f, "reading {id} unavailable"),
            Self::Malformed { id, value } => write!(f, "reading {id} has unusable value {value:?}"),
            Self::Contradiction { zone } => {
                write!(f, "{zone} reads as full and empty simultaneously")
            }
        }
    }
}

impl From<ClassificationError> for Error {
    fn from(e: ClassificationError) -> Self {
        Self::Classification(e)
    }
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// A single failed attempt against the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable (network down, database restarting).
    Unavailable,
    /// Backend did not answer in time.
    Timeout,
    /// A compare-and-set lost against a concurrent writer.
    Conflict,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "store unavailable"),
            Self::Timeout => write!(f, "store timed out"),
            Self::Conflict => write!(f, "concurrent update"),
        }
    }
}

/// A collaborator call that failed on every attempt of its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCallError {
    /// Name of the collaborator operation.
    pub op: &'static str,
    /// Attempts made before giving up.
    pub attempts: u8,
    /// Failure observed on the final attempt.
    pub last: StoreError,
}

impl fmt::Display for RemoteCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.op, self.attempts, self.last
        )
    }
}

impl From<RemoteCallError> for Error {
    fn from(e: RemoteCallError) -> Self {
        Self::Remote(e)
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusIoError {
    /// Analog-to-digital converter channel read failed.
    Analog { channel: u8 },
    /// Digital output line could not be driven.
    Digital { line: &'static str },
}

impl fmt::Display for BusIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analog { channel } => write!(f, "ADC channel {channel} read failed"),
            Self::Digital { line } => write!(f, "output line {line} write failed"),
        }
    }
}

impl From<BusIoError> for Error {
    fn from(e: BusIoError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Fatal servo fault
// ---------------------------------------------------------------------------

/// Measured valve position fits none of hold / open / close.
///
/// Only reachable through a calibration or logic defect (an inverted band).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpossibleStateFault {
    pub measured: u8,
    pub low: u8,
    pub high: u8,
}

impl fmt::Display for ImpossibleStateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "valve position {}% matches no servo outcome for band [{}, {}]",
            self.measured, self.low, self.high
        )
    }
}

impl From<ImpossibleStateFault> for Error {
    fn from(e: ImpossibleStateFault) -> Self {
        Self::Impossible(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
