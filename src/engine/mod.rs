mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod schedule;

pub use availability::{check_slot_available, list_available_slots};
pub use conflict::find_conflict;
pub use error::EngineError;
pub use lifecycle::{became_confirmed, transition_reservation};
pub use schedule::generate_slots;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedDayState = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
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
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One booking calendar: reservations grouped by date, each date behind its
/// own lock so check-then-insert on a date is atomic.
pub struct Engine {
    pub state: DashMap<NaiveDate, SharedDayState>,
    pub hours: Arc<BusinessHoursConfig>,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → date
    pub(super) reservation_dates: DashMap<Ulid, NaiveDate>,
    /// Held shared by bookings and exclusively by compaction, so a booking on a
    /// date compaction has not snapshotted cannot append to the old file.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply an event directly to a DayState. Caller holds the lock.
fn apply_to_day(ds: &mut DayState, event: &Event, index: &DashMap<Ulid, NaiveDate>) {
    match event {
        Event::ReservationCreated {
            id,
            window,
            contact,
            created_at,
        } => {
            ds.insert_reservation(Reservation::new(*id, *window, contact.clone(), *created_at));
            index.insert(*id, window.date);
        }
        Event::StatusChanged {
            id,
            status,
            payment_status,
            ..
        } => {
            if let Some(r) = ds.get_mut(*id) {
                r.status = *status;
                r.payment_status = *payment_status;
            }
        }
        Event::MeetingLinked { id, meeting_ref, .. } => {
            if let Some(r) = ds.get_mut(*id) {
                r.meeting_ref = Some(meeting_ref.clone());
            }
        }
        Event::ReservationDeleted { id, .. } => {
            ds.remove_reservation(*id);
            index.remove(id);
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        hours: Arc<BusinessHoursConfig>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            hours,
            notify,
            wal_tx,
            reservation_dates: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // Never use blocking_write here: this may run inside an async context.
        for event in &events {
            let day = engine.day_or_insert(event.date());
            let Ok(mut guard) = day.try_write() else {
                return Err(io::Error::other("replay: day state unexpectedly locked"));
            };
            apply_to_day(&mut guard, event, &engine.reservation_dates);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events, {} reservations",
                events.len(),
                engine.reservation_dates.len()
            );
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_day(&self, date: &NaiveDate) -> Option<SharedDayState> {
        self.state.get(date).map(|e| e.value().clone())
    }

    pub(super) fn day_or_insert(&self, date: NaiveDate) -> SharedDayState {
        self.state
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    pub fn date_of(&self, id: &Ulid) -> Option<NaiveDate> {
        self.reservation_dates.get(id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        ds: &mut DayState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_day(ds, event, &self.reservation_dates);
        self.notify.send(event);
        Ok(())
    }

    /// Lookup reservation → date, acquire that date's write lock.
    pub(super) async fn resolve_write(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<DayState>, EngineError> {
        let date = self.date_of(id).ok_or(EngineError::NotFound(*id))?;
        let day = self.get_day(&date).ok_or(EngineError::NotFound(*id))?;
        let guard = day.write_owned().await;
        // Deleted between index lookup and lock acquisition.
        if guard.get(*id).is_none() {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }
}
