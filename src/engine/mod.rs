mod admin;
mod availability;
mod booking;
mod error;
mod ledger;
mod slots;
mod users;

pub use availability::AvailabilityStore;
pub use error::EngineError;
pub use ledger::{Reservation, ReservationLedger};
pub use slots::SlotGenerator;
pub use users::UserDirectory;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::model::Event;
use crate::wal::Wal;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

// ── Group-commit WAL channel ─────────────────────────────

/// One append waiting for the writer. Whoever flips `claimed` first owns it:
/// the writer (it will be written) or a caller that timed out (it never will).
pub(super) struct PendingAppend {
    event: Event,
    claimed: Arc<AtomicBool>,
    response: oneshot::Sender<io::Result<()>>,
}

pub(super) enum WalCommand {
    Append(PendingAppend),
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. Write and fsync the batch as one unit, then answer every sender.
///    A failed batch is rolled back whole, so every sender sees the same
///    outcome and nothing of it survives on disk.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append(first) => {
                let mut batch = Vec::new();
                claim_into(&mut batch, first);
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append(next)) => claim_into(&mut batch, next),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = Instant::now();
                    let result = flush_batch(&mut wal, &batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    if let Err(e) = &result {
                        tracing::error!("WAL flush failed: {e}");
                    }
                    respond_batch(batch, &result);
                }
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn claim_into(batch: &mut Vec<PendingAppend>, pending: PendingAppend) {
    // Already claimed means the caller gave up; skip it.
    if !pending.claimed.swap(true, Ordering::AcqRel) {
        batch.push(pending);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    wal.append_batch(batch.iter().map(|pending| &pending.event))
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for pending in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = pending.response.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append(pending) => {
            let _ = pending
                .response
                .send(Err(io::Error::other("append routed to non-append handler")));
        }
    }
}

/// Handle to the WAL writer task, shared by every store.
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
    timeout: Duration,
    /// Held shared across append+apply, exclusively while compaction
    /// snapshots state, so a snapshot never misses a logged event.
    gate: RwLock<()>,
}

impl WalHandle {
    fn new(tx: mpsc::Sender<WalCommand>, timeout: Duration) -> Self {
        Self {
            tx,
            timeout,
            gate: RwLock::new(()),
        }
    }

    /// Durably log `event`, then run `apply`. Nothing is applied if the log
    /// write fails or is abandoned.
    pub(crate) async fn commit<F: FnOnce()>(&self, event: &Event, apply: F) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        self.append(event).await?;
        apply();
        Ok(())
    }

    async fn append(&self, event: &Event) -> Result<(), EngineError> {
        let claimed = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = oneshot::channel();
        let cmd = WalCommand::Append(PendingAppend {
            event: event.clone(),
            claimed: claimed.clone(),
            response: tx,
        });

        let wait = async {
            self.tx
                .send(cmd)
                .await
                .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
            (&mut rx)
                .await
                .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))
        };

        let result = match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result?,
            Err(_) => {
                if !claimed.swap(true, Ordering::AcqRel) {
                    warn!("WAL append abandoned after {:?}", self.timeout);
                    return Err(EngineError::StoreUnavailable("WAL append timed out".into()));
                }
                // The writer already took it; its outcome is the outcome.
                rx.await.map_err(|_| {
                    EngineError::StoreUnavailable("WAL writer dropped response".into())
                })?
            }
        };
        result.map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    /// Rewrite the log from `snapshot`, taken with all commits paused.
    async fn compact(&self, snapshot: impl FnOnce() -> Vec<Event>) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let events = snapshot();
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The scheduler core: composes the day-availability store, the slot
/// generator and the reservation ledger over one shared WAL. Booking and
/// admin operations live in `booking.rs` and `admin.rs`.
pub struct Engine {
    wal: WalHandle,
    pub availability: AvailabilityStore,
    pub slots: SlotGenerator,
    pub ledger: ReservationLedger,
    pub users: UserDirectory,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, slots: SlotGenerator, clock: Arc<dyn Clock>) -> io::Result<Self> {
        Self::open(wal_path, slots, clock, DEFAULT_STORE_TIMEOUT)
    }

    /// Replay the log at `wal_path`, rebuild every store, and start the
    /// writer task. Must be called inside a tokio runtime.
    pub fn open(
        wal_path: PathBuf,
        slots: SlotGenerator,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.torn_tail {
            warn!(
                "discarding torn WAL tail after byte {} in {}",
                replay.valid_len,
                wal_path.display()
            );
        }
        let wal = Wal::open(&wal_path, replay.valid_len)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            wal: WalHandle::new(wal_tx, store_timeout),
            availability: AvailabilityStore::from_events(&replay.events),
            slots,
            ledger: ReservationLedger::from_events(&replay.events),
            users: UserDirectory::from_events(&replay.events),
            clock,
        };
        info!(
            "replayed {} events from {}",
            replay.events.len(),
            wal_path.display()
        );
        Ok(engine)
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub(crate) fn wal(&self) -> &WalHandle {
        &self.wal
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.wal
            .compact(|| {
                let mut events = self.users.snapshot_events();
                events.extend(self.availability.snapshot_events());
                events.extend(self.ledger.snapshot_events());
                events
            })
            .await
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
