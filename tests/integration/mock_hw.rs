//! Mock adapters for integration tests.
//!
//! Records every digital write and node event so tests can assert on the
//! full history without touching real lines, plus helpers that seed the
//! shared in-memory store the way monitor nodes would.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDateTime;
use embedded_hal::digital::{ErrorType, OutputPin};

use waterctl::adapters::memory_store::MemoryStore;
use waterctl::app::events::NodeEvent;
use waterctl::app::ports::{EventSink, StorageError, StoragePort};
use waterctl::arbitrator::{Arbitrator, RetryPolicy};
use waterctl::reading::{Reading, ReadingId};

// ── Recording output pin ──────────────────────────────────────

/// Output line that remembers every level written to it.  Clones share
/// the history.
#[derive(Debug, Clone, Default)]
pub struct RecordingPin {
    writes: Arc<Mutex<Vec<bool>>>,
}

#[allow(dead_code)]
impl RecordingPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<bool> {
        self.writes.lock().unwrap().clone()
    }

    pub fn is_high(&self) -> bool {
        self.writes().last().copied().unwrap_or(false)
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.writes.lock().unwrap().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.writes.lock().unwrap().push(true);
        Ok(())
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<NodeEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<(&'static str, &'static str)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                NodeEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &NodeEvent) {
        self.events.push(event.clone());
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct MockStorage {
    pub data: HashMap<String, Vec<u8>>,
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let v = self
            .data
            .get(&format!("{namespace}::{key}"))
            .ok_or(StorageError::NotFound)?;
        if v.len() > buf.len() {
            return Err(StorageError::BufferTooSmall);
        }
        buf[..v.len()].copy_from_slice(v);
        Ok(v.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.data.insert(format!("{namespace}::{key}"), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.data.remove(&format!("{namespace}::{key}"));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.data.contains_key(&format!("{namespace}::{key}"))
    }
}

// ── Store helpers ─────────────────────────────────────────────

/// Arbitrator for `site` with a single attempt per call and no pauses.
pub fn arbiter(site: &str, store: &MemoryStore) -> Arbitrator<MemoryStore> {
    Arbitrator::new(
        site,
        store.clone(),
        RetryPolicy {
            attempts: 1,
            pause: Duration::ZERO,
        },
    )
}

/// Publish a zone's depth and both float switches.
pub fn publish_zone(store: &MemoryStore, zone: &str, level_mm: i32, full: bool, empty: bool) {
    let t = NaiveDateTime::default();
    let id = |s: &str| ReadingId::new(zone, s).unwrap();
    store.put_reading(Reading::depth(t, 1, id("M0"), level_mm));
    store.put_reading(Reading::switch(t, 1, id("FS0"), full));
    store.put_reading(Reading::switch(t, 1, id("FS1"), empty));
}

#[allow(dead_code)]
pub fn now() -> NaiveDateTime {
    NaiveDateTime::default()
}
