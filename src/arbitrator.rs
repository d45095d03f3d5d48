//! Device arbitration over the shared persistence engine.
//!
//! Every shared actuator has one lock record, keyed by `(site, device)`:
//!
//! ```text
//!  ┌──────────────┬──────────┬──────────┬───────────┐
//!  │ key          │ status   │ owner    │ requested │
//!  ├──────────────┼──────────┼──────────┼───────────┤
//!  │ VALVE12:V12  │ Locked   │ G6       │ 50%       │
//!  │ G3:S0        │ Unlocked │ -        │ None      │
//!  └──────────────┴──────────┴──────────┴───────────┘
//! ```
//!
//! A zone may (re)write a record when it is unlocked or already owned by
//! that zone; otherwise the request is refused.  The write is a
//! compare-and-set against the record that was read, so two nodes racing
//! for one device cannot both win.  No lock manager process exists: the
//! record is the lock.
//!
//! [`Arbitrator`] is also the node's single gateway to the persistence
//! collaborator.  Every call it makes is bounded by a retry budget and
//! reported as [`RemoteCallError`] once that budget is spent.

use core::fmt;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::PersistencePort;
use crate::error::{RemoteCallError, StoreError};
use crate::reading::{Reading, ReadingId};

/// Requested value meaning "no request".
pub const NO_REQUEST: &str = "None";

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

/// `(site, device)` pair naming one arbitrated device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub site: String,
    pub device: String,
}

impl DeviceKey {
    pub fn new(site: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            device: device.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.site, self.device)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Locked,
    Unlocked,
}

/// Persisted arbitration record.
///
/// Constructed only through [`DeviceLockRecord::unlocked`] and
/// [`DeviceLockRecord::locked`], so an owner is present exactly when the
/// record is locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLockRecord {
    status: LockStatus,
    owner: Option<String>,
    requested: String,
}

impl DeviceLockRecord {
    pub fn unlocked() -> Self {
        Self {
            status: LockStatus::Unlocked,
            owner: None,
            requested: NO_REQUEST.into(),
        }
    }

    pub fn locked(owner: impl Into<String>, requested: impl Into<String>) -> Self {
        Self {
            status: LockStatus::Locked,
            owner: Some(owner.into()),
            requested: requested.into(),
        }
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Raw requested value, `"None"` when nothing is requested.
    pub fn requested(&self) -> &str {
        &self.requested
    }

    /// Requested value, or `None` for the "no request" marker.
    pub fn request(&self) -> Option<&str> {
        (self.requested != NO_REQUEST).then_some(self.requested.as_str())
    }

    pub fn is_held_by(&self, site: &str) -> bool {
        self.status == LockStatus::Locked && self.owner.as_deref() == Some(site)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Retry budget
// ---------------------------------------------------------------------------

/// How hard a collaborator call tries before giving up.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause: Duration::from_millis(500),
        }
    }
}

fn with_retries<P, T>(
    store: &mut P,
    policy: RetryPolicy,
    op: &'static str,
    mut call: impl FnMut(&mut P) -> Result<T, StoreError>,
) -> Result<T, RemoteCallError> {
    let attempts = policy.attempts.max(1);
    let mut last = StoreError::Unavailable;
    for attempt in 1..=attempts {
        match call(store) {
            Ok(v) => return Ok(v),
            Err(e) => {
                debug!("{op}: attempt {attempt}/{attempts} failed: {e}");
                last = e;
                if attempt < attempts && !policy.pause.is_zero() {
                    thread::sleep(policy.pause);
                }
            }
        }
    }
    warn!("{op}: giving up after {attempts} attempt(s): {last}");
    Err(RemoteCallError { op, attempts, last })
}

// ---------------------------------------------------------------------------
// Arbitrator
// ---------------------------------------------------------------------------

enum Claim {
    Refused,
    Unchanged,
    Written,
}

/// Per-node gateway to the shared persistence engine.
pub struct Arbitrator<P> {
    site: String,
    store: P,
    retry: RetryPolicy,
    last_event: Option<(String, Severity)>,
    last_status: Option<String>,
}

impl<P: PersistencePort> Arbitrator<P> {
    pub fn new(site: impl Into<String>, store: P, retry: RetryPolicy) -> Self {
        Self {
            site: site.into(),
            store,
            retry,
            last_event: None,
            last_status: None,
        }
    }

    /// Zone id this node writes as.
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut P {
        &mut self.store
    }

    // ── Arbitration ───────────────────────────────────────────

    /// Ask to set `key`'s requested value to `value`.
    ///
    /// `Ok(true)` when this site now owns the device with that request,
    /// `Ok(false)` when another site holds the lock (record untouched).
    pub fn request_control(&mut self, key: &DeviceKey, value: &str) -> Result<bool, RemoteCallError> {
        let site = self.site.clone();
        let claim = with_retries(&mut self.store, self.retry, "request_control", |store| {
            let current = store.lock_record(key)?;
            let view = current.clone().unwrap_or_else(DeviceLockRecord::unlocked);

            if view.status() == LockStatus::Locked && !view.is_held_by(&site) {
                return Ok(Claim::Refused);
            }
            if view.is_held_by(&site) && view.requested() == value {
                return Ok(Claim::Unchanged);
            }

            let next = DeviceLockRecord::locked(site.as_str(), value);
            if store.swap_lock_record(key, current.as_ref(), &next)? {
                Ok(Claim::Written)
            } else {
                Err(StoreError::Conflict)
            }
        })?;

        match claim {
            Claim::Refused => {
                debug!("{}: {} is held by another site", self.site, key);
                Ok(false)
            }
            Claim::Unchanged => Ok(true),
            Claim::Written => {
                info!("{}: took control of {} (request {})", self.site, key, value);
                self.log_event_best_effort(
                    &format!("Taking control of {key}, Request: {value}"),
                    Severity::Info,
                );
                Ok(true)
            }
        }
    }

    /// Give up `key` if, and only if, this site holds it.
    pub fn release_control(&mut self, key: &DeviceKey) -> Result<(), RemoteCallError> {
        let site = self.site.clone();
        let released = with_retries(&mut self.store, self.retry, "release_control", |store| {
            let Some(current) = store.lock_record(key)? else {
                return Ok(false);
            };
            if !current.is_held_by(&site) {
                return Ok(false);
            }
            if store.swap_lock_record(key, Some(&current), &DeviceLockRecord::unlocked())? {
                Ok(true)
            } else {
                Err(StoreError::Conflict)
            }
        })?;

        if released {
            info!("{}: released {}", self.site, key);
            self.log_event_best_effort(&format!("Releasing control of {key}"), Severity::Info);
        }
        Ok(())
    }

    /// Current lock record; a device never written to reads as unlocked.
    pub fn device_state(&mut self, key: &DeviceKey) -> Result<DeviceLockRecord, RemoteCallError> {
        with_retries(&mut self.store, self.retry, "get_device_state", |store| {
            store.lock_record(key)
        })
        .map(|r| r.unwrap_or_else(DeviceLockRecord::unlocked))
    }

    // ── Collaborator facade ───────────────────────────────────

    pub fn latest_reading(&mut self, id: &ReadingId) -> Result<Option<Reading>, RemoteCallError> {
        with_retries(&mut self.store, self.retry, "get_latest_reading", |store| {
            store.latest_reading(id)
        })
    }

    pub fn publish_reading(&mut self, reading: &Reading) -> Result<(), RemoteCallError> {
        with_retries(&mut self.store, self.retry, "store_reading", |store| {
            store.store_reading(reading)
        })
    }

    /// Append to this site's event log, skipping exact repeats of the last event.
    pub fn log_event(&mut self, event: &str, severity: Severity) -> Result<(), RemoteCallError> {
        if self
            .last_event
            .as_ref()
            .is_some_and(|(e, s)| e == event && *s == severity)
        {
            return Ok(());
        }
        let site = self.site.clone();
        with_retries(&mut self.store, self.retry, "log_event", |store| {
            store.append_event(&site, event, severity)
        })?;
        self.last_event = Some((event.to_owned(), severity));
        Ok(())
    }

    /// [`log_event`](Self::log_event), with failures kept to the local log.
    pub fn log_event_best_effort(&mut self, event: &str, severity: Severity) {
        if let Err(e) = self.log_event(event, severity) {
            warn!("Could not log event {:?} over network: {}", event, e);
        }
    }

    /// Overwrite this site's status line, skipping identical repeats.
    pub fn update_status(&mut self, status: &str) -> Result<(), RemoteCallError> {
        if self.last_status.as_deref() == Some(status) {
            return Ok(());
        }
        let site = self.site.clone();
        with_retries(&mut self.store, self.retry, "update_status", |store| {
            store.write_status(&site, status)
        })?;
        self.last_status = Some(status.to_owned());
        Ok(())
    }

    pub fn store_tick(&mut self, tick: u64) -> Result<(), RemoteCallError> {
        let site = self.site.clone();
        with_retries(&mut self.store, self.retry, "store_tick", |store| {
            store.store_tick(&site, tick)
        })
    }
}
