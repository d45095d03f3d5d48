//! In-memory persistence adapter.
//!
//! Implements [`PersistencePort`] over a mutex-guarded map.  Clones share
//! one backing store, so several simulated nodes (or several arbitrators in
//! a test) see each other's lock records exactly as they would through the
//! real database.
//!
//! Fault injection (`fail_next`, `set_offline`) lets callers exercise the
//! retry budget without a network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::app::ports::PersistencePort;
use crate::arbitrator::{DeviceKey, DeviceLockRecord, Severity};
use crate::error::StoreError;
use crate::reading::{Reading, ReadingId};

/// One row of a site's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEntry {
    pub site: String,
    pub text: String,
    pub severity: Severity,
}

#[derive(Default)]
struct Inner {
    readings: HashMap<ReadingId, Reading>,
    locks: HashMap<DeviceKey, DeviceLockRecord>,
    events: Vec<EventEntry>,
    statuses: HashMap<String, String>,
    status_writes: usize,
    ticks: HashMap<String, u64>,
    fail_next: u32,
    offline: bool,
}

impl Inner {
    fn gate(&mut self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable);
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::Timeout);
        }
        Ok(())
    }
}

/// Shared in-memory store.  Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding / inspection ──────────────────────────────────

    /// Publish a reading as a monitor node would.
    pub fn put_reading(&self, reading: Reading) {
        self.lock_inner()
            .readings
            .insert(reading.id().clone(), reading);
    }

    pub fn reading(&self, id: &ReadingId) -> Option<Reading> {
        self.lock_inner().readings.get(id).cloned()
    }

    pub fn remove_reading(&self, id: &ReadingId) {
        self.lock_inner().readings.remove(id);
    }

    pub fn lock(&self, key: &DeviceKey) -> Option<DeviceLockRecord> {
        self.lock_inner().locks.get(key).cloned()
    }

    /// Overwrite a lock record directly, bypassing arbitration.
    pub fn force_lock(&self, key: DeviceKey, record: DeviceLockRecord) {
        self.lock_inner().locks.insert(key, record);
    }

    pub fn events(&self) -> Vec<EventEntry> {
        self.lock_inner().events.clone()
    }

    pub fn status(&self, site: &str) -> Option<String> {
        self.lock_inner().statuses.get(site).cloned()
    }

    /// Number of status writes that reached the store.
    pub fn status_writes(&self) -> usize {
        self.lock_inner().status_writes
    }

    pub fn tick(&self, site: &str) -> Option<u64> {
        self.lock_inner().ticks.get(site).copied()
    }

    // ── Fault injection ───────────────────────────────────────

    /// Fail the next `n` calls with [`StoreError::Timeout`].
    pub fn fail_next(&self, n: u32) {
        self.lock_inner().fail_next = n;
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.lock_inner().offline = offline;
    }
}

impl PersistencePort for MemoryStore {
    fn latest_reading(&mut self, id: &ReadingId) -> Result<Option<Reading>, StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        Ok(inner.readings.get(id).cloned())
    }

    fn store_reading(&mut self, reading: &Reading) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        inner.readings.insert(reading.id().clone(), reading.clone());
        Ok(())
    }

    fn lock_record(&mut self, key: &DeviceKey) -> Result<Option<DeviceLockRecord>, StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        Ok(inner.locks.get(key).cloned())
    }

    fn swap_lock_record(
        &mut self,
        key: &DeviceKey,
        expected: Option<&DeviceLockRecord>,
        record: &DeviceLockRecord,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        if inner.locks.get(key) != expected {
            return Ok(false);
        }
        inner.locks.insert(key.clone(), record.clone());
        Ok(true)
    }

    fn append_event(
        &mut self,
        site: &str,
        event: &str,
        severity: Severity,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        inner.events.push(EventEntry {
            site: site.to_owned(),
            text: event.to_owned(),
            severity,
        });
        Ok(())
    }

    fn write_status(&mut self, site: &str, status: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        inner.statuses.insert(site.to_owned(), status.to_owned());
        inner.status_writes += 1;
        Ok(())
    }

    fn store_tick(&mut self, site: &str, tick: u64) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner.gate()?;
        inner.ticks.insert(site.to_owned(), tick);
        Ok(())
    }
}
