use ulid::Ulid;

use crate::model::{CalendarDate, SlotTime};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("slot {0} is already booked")]
    Conflict(SlotTime),
    #[error("{0} is not a bookable slot")]
    InvalidSlot(SlotTime),
    #[error("slot {0} is in the past")]
    PastSlot(SlotTime),
    #[error("bookings are closed on {0}")]
    DayClosed(CalendarDate),
    #[error("booking not found: {0}")]
    NotFound(Ulid),
    #[error("booking {0} belongs to another user")]
    Forbidden(Ulid),
    #[error("{0} already taken")]
    AlreadyExists(&'static str),
    #[error("invalid request: {0}")]
    Invalid(&'static str),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

