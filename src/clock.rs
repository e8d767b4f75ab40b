use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Local, NaiveDateTime};

/// Source of "now" in club-local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self {
            millis: AtomicI64::new(at.and_utc().timestamp_millis()),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        self.millis.store(at.and_utc().timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    }
}
