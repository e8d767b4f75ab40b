use tracing::{info, warn};

use crate::limits::*;
use crate::model::*;
use crate::observability::{CANCELLATIONS_TOTAL, RESERVATIONS_TOTAL};

use super::{Engine, EngineError, Reservation};

/// Trim notes; blank becomes absent.
fn normalize_notes(notes: Option<String>) -> Result<Option<String>, EngineError> {
    let Some(notes) = notes else { return Ok(None) };
    let trimmed = notes.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_NOTES_LEN {
        return Err(EngineError::Invalid("notes too long"));
    }
    Ok(Some(trimmed.to_string()))
}

fn record_outcome(result: &Result<Booking, EngineError>) {
    let outcome = match result {
        Ok(_) => "confirmed",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::StoreUnavailable(_)) => "unavailable",
        Err(_) => "rejected",
    };
    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
}

impl Engine {
    /// Free slots on `date`, in generator order. A closed day has none.
    pub async fn list_available_slots(&self, date: CalendarDate) -> Vec<SlotTime> {
        if !self.availability.is_open(date) {
            return Vec::new();
        }
        let occupied = self.ledger.occupied_slots(date).await;
        self.slots
            .generate(date)
            .into_iter()
            .filter(|slot| !occupied.contains(slot))
            .collect()
    }

    /// Reserve `slot` for `user_id`.
    ///
    /// The day must be open, `slot` must be one of the generated instants,
    /// and it must not already have started. These are rechecked here
    /// because the caller's slot list may be stale. A retry carrying an
    /// idempotency key already bound for this user returns the original
    /// booking instead of reserving again.
    pub async fn create_booking(
        &self,
        user_id: UserId,
        slot: SlotTime,
        notes: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<Booking, EngineError> {
        let result = self
            .try_create_booking(user_id, slot, notes, idempotency_key)
            .await;
        record_outcome(&result);
        match &result {
            Ok(booking) => {
                info!(booking_id = %booking.id, %user_id, slot = %booking.slot, "booking confirmed")
            }
            Err(e) => warn!(%user_id, %slot, "booking rejected: {e}"),
        }
        result
    }

    async fn try_create_booking(
        &self,
        user_id: UserId,
        slot: SlotTime,
        notes: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<Booking, EngineError> {
        if let Some(key) = &idempotency_key {
            if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(EngineError::Invalid("bad idempotency key"));
            }
            if let Some(existing) = self.ledger.find_by_idempotency_key(user_id, Some(key.as_str())) {
                return Ok(existing);
            }
        }
        let notes = normalize_notes(notes)?;

        let date = slot.date();
        if !self.availability.is_open(date) {
            return Err(EngineError::DayClosed(date));
        }
        if !self.slots.contains(slot) {
            return Err(EngineError::InvalidSlot(slot));
        }
        let now = self.now();
        if slot < now {
            return Err(EngineError::PastSlot(slot));
        }

        self.ledger
            .reserve(
                self.wal(),
                Reservation {
                    user_id,
                    slot,
                    notes,
                    created_at: now,
                    idempotency_key,
                },
            )
            .await
    }

    /// Cancel a booking the requester owns (or any booking, for admins).
    pub async fn cancel_booking(&self, id: BookingId, requester: Requester) -> Result<(), EngineError> {
        let (booking, changed) = self
            .ledger
            .cancel(self.wal(), id, requester, self.now())
            .await
            .inspect_err(|e| warn!(booking_id = %id, user_id = %requester.user_id, "cancel rejected: {e}"))?;
        if changed {
            metrics::counter!(CANCELLATIONS_TOTAL).increment(1);
            info!(
                booking_id = %id,
                user_id = %requester.user_id,
                slot = %booking.slot,
                admin = requester.is_admin,
                "booking cancelled"
            );
        }
        Ok(())
    }

    /// All of a user's bookings, any status.
    pub fn my_bookings(&self, user_id: UserId) -> Vec<Booking> {
        self.ledger.bookings_for_user(user_id)
    }
}
