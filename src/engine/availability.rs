use dashmap::DashMap;

use crate::model::*;

use super::{EngineError, WalHandle};

/// Per-date open/closed flags. A date with no stored flag is closed.
/// Writes to different dates never coordinate with each other.
#[derive(Debug, Default)]
pub struct AvailabilityStore {
    days: DashMap<CalendarDate, bool>,
}

impl AvailabilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn from_events(events: &[Event]) -> Self {
        let store = Self::new();
        for event in events {
            if let Event::DayAvailabilitySet { date, open } = event {
                store.days.insert(*date, *open);
            }
        }
        store
    }

    /// Upsert the flag for `date`. Repeating the same call is a no-op in
    /// effect, though each call is logged.
    pub async fn set(&self, wal: &WalHandle, date: CalendarDate, open: bool) -> Result<(), EngineError> {
        let event = Event::DayAvailabilitySet { date, open };
        wal.commit(&event, || {
            self.days.insert(date, open);
        })
        .await
    }

    pub fn is_open(&self, date: CalendarDate) -> bool {
        self.days.get(&date).is_some_and(|open| *open)
    }

    /// Open dates in `[start, end]`, ascending. Empty when `end < start`.
    pub fn list_open_dates(&self, start: CalendarDate, end: CalendarDate) -> Vec<CalendarDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_open(*d))
            .collect()
    }

    /// Every date in `[start, end]` with its effective flag.
    pub fn range(&self, start: CalendarDate, end: CalendarDate) -> Vec<DayAvailability> {
        let open = self.list_open_dates(start, end);
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|date| DayAvailability {
                date,
                open: open.binary_search(&date).is_ok(),
            })
            .collect()
    }

    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let mut rows: Vec<(CalendarDate, bool)> =
            self.days.iter().map(|e| (*e.key(), *e.value())).collect();
        rows.sort();
        rows.into_iter()
            .map(|(date, open)| Event::DayAvailabilitySet { date, open })
            .collect()
    }
}
