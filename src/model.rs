use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A calendar day with no time component. Availability and slot
/// generation both work at this granularity.
pub type CalendarDate = NaiveDate;

/// A slot instant in club-local time.
pub type SlotTime = NaiveDateTime;

pub type BookingId = Ulid;
pub type UserId = Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

/// A persisted reservation. Never deleted: cancellation flips the status
/// and the record stays for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub slot: SlotTime,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub cancelled_at: Option<NaiveDateTime>,
}

impl Booking {
    pub fn date(&self) -> CalendarDate {
        self.slot.date()
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }
}

/// Admin-controlled open/closed flag for one date. Dates without a stored
/// flag are reported with `open == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: CalendarDate,
    pub open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub role: Role,
}

/// Who is asking. Admins may act on bookings they do not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: UserId) -> Self {
        Self { user_id, is_admin: false }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self { user_id, is_admin: true }
    }

    pub fn may_act_on(&self, booking: &Booking) -> bool {
        self.is_admin || booking.user_id == self.user_id
    }
}

/// WAL record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    DayAvailabilitySet {
        date: CalendarDate,
        open: bool,
    },
    /// Carries the full record. After compaction the record may already be
    /// `Cancelled`, in which case it does not occupy its slot.
    BookingConfirmed {
        booking: Booking,
        idempotency_key: Option<String>,
    },
    BookingCancelled {
        id: BookingId,
        cancelled_at: NaiveDateTime,
    },
    UserRegistered {
        user: User,
    },
}
