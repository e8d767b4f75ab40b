use tracing::info;

use crate::limits::MAX_RANGE_DAYS;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Open or close `date` for new bookings. Closing a day leaves its
    /// confirmed bookings in place; it only stops new ones.
    pub async fn set_availability(&self, date: CalendarDate, open: bool) -> Result<DayAvailability, EngineError> {
        self.availability.set(self.wal(), date, open).await?;
        info!(%date, open, "day availability set");
        Ok(DayAvailability { date, open })
    }

    /// Explicit open/closed state for every date in `[start, end]`.
    pub fn get_availability(
        &self,
        start: CalendarDate,
        end: CalendarDate,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        check_range(start, end)?;
        Ok(self.availability.range(start, end))
    }

    /// Open dates in `[start, end]`, ascending.
    pub fn open_dates(&self, start: CalendarDate, end: CalendarDate) -> Result<Vec<CalendarDate>, EngineError> {
        check_range(start, end)?;
        Ok(self.availability.list_open_dates(start, end))
    }

    /// Confirmed bookings on `date`, ascending by slot.
    pub async fn daily_bookings(&self, date: CalendarDate) -> Vec<Booking> {
        self.ledger.bookings_for_date(date).await
    }
}

fn check_range(start: CalendarDate, end: CalendarDate) -> Result<(), EngineError> {
    if end < start {
        return Err(EngineError::Invalid("end date before start date"));
    }
    if (end - start).num_days() >= MAX_RANGE_DAYS {
        return Err(EngineError::Invalid("date range too wide"));
    }
    Ok(())
}
