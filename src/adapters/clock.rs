//! Wall-clock adapters.
//!
//! - [`SystemClock`]: local time from the host (`chrono::Local`).
//! - [`FixedClock`]: a settable time of day for simulation and tests.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{Local, NaiveDateTime, NaiveTime};

use crate::app::ports::Clock;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }

    /// Local date and time, as stamped on published readings.
    pub fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

impl Clock for SystemClock {
    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Clock frozen at a settable time.  Clones share the setting.
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<NaiveTime>>,
}

impl FixedClock {
    pub fn new(time: NaiveTime) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Convenience for `HH:MM`.  Out-of-range values clamp to midnight.
    pub fn at(hour: u32, minute: u32) -> Self {
        Self::new(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN))
    }

    pub fn set(&self, time: NaiveTime) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl Clock for FixedClock {
    fn time_of_day(&self) -> NaiveTime {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_clones_share_time() {
        let a = FixedClock::at(14, 1);
        let b = a.clone();
        a.set(NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(b.time_of_day(), NaiveTime::from_hms_opt(15, 0, 0).unwrap());
    }

    #[test]
    fn system_clock_is_consistent_with_now() {
        let c = SystemClock::new();
        let now = c.now();
        let tod = c.time_of_day();
        // Same day unless the test straddles midnight.
        assert!(tod >= now.time() || now.time() > NaiveTime::from_hms_opt(23, 59, 0).unwrap());
    }
}
