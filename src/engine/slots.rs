use std::sync::Arc;

use chrono::{NaiveTime, Timelike};

use crate::config::SlotWindow;
use crate::model::{CalendarDate, SlotTime};

/// Maps a date to its candidate slot instants. Pure: the windows are fixed
/// at construction and nothing is cached.
#[derive(Debug, Clone)]
pub struct SlotGenerator {
    windows: Arc<[SlotWindow]>,
}

impl SlotGenerator {
    pub fn new(windows: Vec<SlotWindow>) -> Self {
        Self {
            windows: windows.into(),
        }
    }

    pub fn windows(&self) -> &[SlotWindow] {
        &self.windows
    }

    /// Every slot start for `date`, window by window, ascending. A trailing
    /// partial step that would run past the window end is dropped.
    pub fn generate(&self, date: CalendarDate) -> Vec<SlotTime> {
        let mut slots = Vec::new();
        for window in self.windows.iter() {
            let (start, end, step) = window_secs(window);
            let mut t = start;
            while t.checked_add(step).is_some_and(|next| next <= end) {
                if let Some(time) = NaiveTime::from_num_seconds_from_midnight_opt(t, 0) {
                    slots.push(date.and_time(time));
                }
                t += step;
            }
        }
        slots
    }

    /// True iff `generate(slot.date())` would contain `slot`, without building
    /// the list.
    pub fn contains(&self, slot: SlotTime) -> bool {
        let time = slot.time();
        if time.nanosecond() != 0 {
            return false;
        }
        let t = time.num_seconds_from_midnight();
        self.windows.iter().any(|window| {
            let (start, end, step) = window_secs(window);
            step > 0
                && t >= start
                && t.checked_add(step).is_some_and(|next| next <= end)
                && (t - start) % step == 0
        })
    }
}

fn window_secs(window: &SlotWindow) -> (u32, u32, u32) {
    (
        window.start.num_seconds_from_midnight(),
        window.end.num_seconds_from_midnight(),
        window.step_minutes.saturating_mul(60),
    )
}
