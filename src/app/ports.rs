//! Port traits: the hexagonal boundary between the control core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ core (fsm · devices · arbitrator · policy)
//! ```
//!
//! Driven adapters (persistence, analog bus, clock, config, storage, event
//! sinks) implement these traits.  The core consumes them via generics, so
//! no domain module touches a database, a bus or the system clock directly.
//!
//! Digital outputs are not a port of their own: the core drives any
//! [`embedded_hal::digital::OutputPin`].

use chrono::NaiveTime;

use crate::arbitrator::{DeviceKey, DeviceLockRecord, Severity};
use crate::config::NodeConfig;
use crate::error::{BusIoError, StoreError};
use crate::reading::{Reading, ReadingId};

// ───────────────────────────────────────────────────────────────
// Persistence port (driven adapter: core ↔ shared database)
// ───────────────────────────────────────────────────────────────

/// Raw get/set/lock primitives of the shared persistence engine.
///
/// Each call is a single attempt.  Retry budgets, deduplication and lock
/// semantics live in [`Arbitrator`](crate::arbitrator::Arbitrator), never
/// in adapters.
pub trait PersistencePort {
    /// Most recent reading stored under `id`, if any.
    fn latest_reading(&mut self, id: &ReadingId) -> Result<Option<Reading>, StoreError>;

    /// Publish a reading, replacing the previous one under the same id.
    fn store_reading(&mut self, reading: &Reading) -> Result<(), StoreError>;

    /// Current lock record for a device.  `None` until first written.
    fn lock_record(&mut self, key: &DeviceKey) -> Result<Option<DeviceLockRecord>, StoreError>;

    /// Replace a lock record only if it still equals `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first.  The whole
    /// record (status, owner, request) is written in one step.
    fn swap_lock_record(
        &mut self,
        key: &DeviceKey,
        expected: Option<&DeviceLockRecord>,
        record: &DeviceLockRecord,
    ) -> Result<bool, StoreError>;

    /// Append to the site's event log.
    fn append_event(&mut self, site: &str, event: &str, severity: Severity)
    -> Result<(), StoreError>;

    /// Overwrite the site's status line.
    fn write_status(&mut self, site: &str, status: &str) -> Result<(), StoreError>;

    /// Record the site's current logical tick.
    fn store_tick(&mut self, site: &str, tick: u64) -> Result<(), StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Analog bus port (driven adapter: converter → core)
// ───────────────────────────────────────────────────────────────

/// One shared analog-to-digital converter.
///
/// Callers serialise access by holding the bus behind a mutex for the
/// duration of a read burst.
pub trait AnalogBus {
    /// Voltage on `channel`.
    fn read_voltage(&mut self, channel: u8) -> Result<f32, BusIoError>;
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Local wall-clock time of day, for policies with daily windows.
pub trait Clock {
    fn time_of_day(&self) -> NaiveTime;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: core → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The node service emits structured [`NodeEvent`](super::events::NodeEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::NodeEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads node configuration.
///
/// Implementations MUST validate before returning.  Invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Returns [`NodeConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<NodeConfig, ConfigError>;

    fn save(&self, config: &NodeConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: core ↔ local disk)
// ───────────────────────────────────────────────────────────────

/// Node-local key-value storage for small binary records.
///
/// Write operations MUST be atomic: a reader sees the old value or the new
/// one, never a torn mix.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug)]
pub enum StorageError {
    NotFound,
    /// Caller's buffer is smaller than the stored value.
    BufferTooSmall,
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for StorageError {}
