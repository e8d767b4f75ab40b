use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::{EngineError, WalHandle};

/// Confirmed occupancy of one calendar day: slot instant → booking.
#[derive(Debug, Default)]
pub struct DayLedger {
    confirmed: BTreeMap<SlotTime, BookingId>,
}

pub type SharedDayLedger = Arc<RwLock<DayLedger>>;

/// A validated request to occupy one slot.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub user_id: UserId,
    pub slot: SlotTime,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub idempotency_key: Option<String>,
}

/// Owns every booking record and is the only source of occupancy.
///
/// Each day's occupancy sits behind its own write lock. `reserve` and
/// `cancel` hold that lock across check, log and apply, which makes them
/// linearizable per day: at most one confirmed booking per instant, and any
/// reader that starts after a write returns sees it.
#[derive(Default)]
pub struct ReservationLedger {
    days: DashMap<CalendarDate, SharedDayLedger>,
    bookings: DashMap<BookingId, Booking>,
    by_user: DashMap<UserId, Vec<BookingId>>,
    idempotency: DashMap<(UserId, String), BookingId>,
    key_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the log. Occupancy is rebuilt without locking since
    /// nothing else can see the ledger yet.
    pub(super) fn from_events(events: &[Event]) -> Self {
        let mut days: HashMap<CalendarDate, DayLedger> = HashMap::new();
        let ledger = Self::new();
        for event in events {
            match event {
                Event::BookingConfirmed { booking, idempotency_key } => {
                    let day = days.entry(booking.date()).or_default();
                    ledger.apply_confirmed(day, booking, idempotency_key.as_deref());
                }
                Event::BookingCancelled { id, cancelled_at } => {
                    let Some(date) = ledger.bookings.get(id).map(|b| b.date()) else {
                        continue;
                    };
                    let day = days.entry(date).or_default();
                    ledger.apply_cancelled(day, *id, *cancelled_at);
                }
                Event::DayAvailabilitySet { .. } | Event::UserRegistered { .. } => {}
            }
        }
        for (date, day) in days {
            ledger.days.insert(date, Arc::new(RwLock::new(day)));
        }
        ledger
    }

    fn day(&self, date: CalendarDate) -> SharedDayLedger {
        self.days.entry(date).or_default().value().clone()
    }

    fn key_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.key_locks.entry(user_id).or_default().value().clone()
    }

    fn existing_day(&self, date: CalendarDate) -> Option<SharedDayLedger> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    fn apply_confirmed(&self, day: &mut DayLedger, booking: &Booking, idempotency_key: Option<&str>) {
        if booking.is_confirmed() {
            day.confirmed.insert(booking.slot, booking.id);
        }
        self.by_user.entry(booking.user_id).or_default().push(booking.id);
        if let Some(key) = idempotency_key {
            self.idempotency.insert((booking.user_id, key.to_string()), booking.id);
        }
        self.bookings.insert(booking.id, booking.clone());
    }

    fn apply_cancelled(&self, day: &mut DayLedger, id: BookingId, cancelled_at: NaiveDateTime) {
        if let Some(mut booking) = self.bookings.get_mut(&id) {
            if day.confirmed.get(&booking.slot) == Some(&id) {
                day.confirmed.remove(&booking.slot);
            }
            booking.status = BookingStatus::Cancelled;
            booking.cancelled_at = Some(cancelled_at);
        }
    }

    /// Atomically claim `req.slot`. Fails with `Conflict` if another
    /// confirmed booking holds the instant. A reused idempotency key returns
    /// the booking it was first bound to.
    ///
    /// Keyed requests serialize on a per-user lock taken before the day
    /// lock, so the same key sent for two different days binds once. Lock
    /// order is user, then day, then the WAL gate.
    pub async fn reserve(&self, wal: &WalHandle, req: Reservation) -> Result<Booking, EngineError> {
        let key_lock = req.idempotency_key.as_ref().map(|_| self.key_lock(req.user_id));
        let _key_guard = match &key_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let day = self.day(req.slot.date());
        let mut guard = day.write().await;

        if let Some(existing) = self.find_by_idempotency_key(req.user_id, req.idempotency_key.as_deref()) {
            return Ok(existing);
        }
        if guard.confirmed.contains_key(&req.slot) {
            return Err(EngineError::Conflict(req.slot));
        }

        let booking = Booking {
            id: Ulid::new(),
            user_id: req.user_id,
            slot: req.slot,
            status: BookingStatus::Confirmed,
            notes: req.notes,
            created_at: req.created_at,
            cancelled_at: None,
        };
        let event = Event::BookingConfirmed {
            booking: booking.clone(),
            idempotency_key: req.idempotency_key.clone(),
        };
        wal.commit(&event, || {
            self.apply_confirmed(&mut guard, &booking, req.idempotency_key.as_deref());
        })
        .await?;
        Ok(booking)
    }

    /// CONFIRMED → CANCELLED. Cancelling an already-cancelled booking is a
    /// successful no-op; ownership is still checked first. The flag is true
    /// when this call made the transition.
    pub async fn cancel(
        &self,
        wal: &WalHandle,
        id: BookingId,
        requester: Requester,
        now: NaiveDateTime,
    ) -> Result<(Booking, bool), EngineError> {
        let date = self
            .bookings
            .get(&id)
            .map(|b| b.date())
            .ok_or(EngineError::NotFound(id))?;
        let day = self.day(date);
        let mut guard = day.write().await;

        let booking = self.get(id).ok_or(EngineError::NotFound(id))?;
        if !requester.may_act_on(&booking) {
            return Err(EngineError::Forbidden(id));
        }
        if !booking.is_confirmed() {
            return Ok((booking, false));
        }

        let event = Event::BookingCancelled { id, cancelled_at: now };
        wal.commit(&event, || self.apply_cancelled(&mut guard, id, now))
            .await?;
        let booking = self.get(id).ok_or(EngineError::NotFound(id))?;
        Ok((booking, true))
    }

    pub fn get(&self, id: BookingId) -> Option<Booking> {
        self.bookings.get(&id).map(|b| b.value().clone())
    }

    pub fn find_by_idempotency_key(&self, user_id: UserId, key: Option<&str>) -> Option<Booking> {
        let key = key?;
        let id = *self.idempotency.get(&(user_id, key.to_string()))?;
        self.get(id)
    }

    /// Instants held by CONFIRMED bookings on `date`.
    pub async fn occupied_slots(&self, date: CalendarDate) -> BTreeSet<SlotTime> {
        let Some(day) = self.existing_day(date) else {
            return BTreeSet::new();
        };
        let guard = day.read().await;
        guard.confirmed.keys().copied().collect()
    }

    /// CONFIRMED bookings on `date`, ascending by slot.
    pub async fn bookings_for_date(&self, date: CalendarDate) -> Vec<Booking> {
        let Some(day) = self.existing_day(date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard
            .confirmed
            .values()
            .filter_map(|id| self.get(*id))
            .collect()
    }

    /// Every booking the user ever made, any status, ascending by slot then
    /// creation time.
    pub fn bookings_for_user(&self, user_id: UserId) -> Vec<Booking> {
        let ids = self
            .by_user
            .get(&user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        let mut bookings: Vec<Booking> = ids.into_iter().filter_map(|id| self.get(id)).collect();
        bookings.sort_by(|a, b| a.slot.cmp(&b.slot).then(a.created_at.cmp(&b.created_at)));
        bookings
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// One `BookingConfirmed` per record, carrying its current status and
    /// key, in creation order.
    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let keys: HashMap<BookingId, String> = self
            .idempotency
            .iter()
            .map(|e| (*e.value(), e.key().1.clone()))
            .collect();
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        bookings
            .into_iter()
            .map(|booking| Event::BookingConfirmed {
                idempotency_key: keys.get(&booking.id).cloned(),
                booking,
            })
            .collect()
    }
}
