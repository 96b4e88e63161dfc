use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::check_slot_available;
use super::lifecycle::{became_confirmed, transition_reservation};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Book `window` as a new pending reservation.
    ///
    /// The availability check and the insert run under the date's write lock,
    /// so two concurrent requests for the same slot cannot both succeed.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        window: TimeWindow,
        contact: Contact,
    ) -> Result<Reservation, EngineError> {
        validate_contact(&contact)?;
        if self.reservation_dates.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let _gate = self.compaction_gate.read().await;
        let day = self.day_or_insert(window.date);
        let mut guard = day.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many reservations on date"));
        }
        if guard.get(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        if let Err(e) = check_slot_available(&window, window.date, &self.hours, &guard.reservations) {
            if matches!(e, EngineError::Conflict { .. }) {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }

        let event = Event::ReservationCreated {
            id,
            window,
            contact,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!("reservation {id} created for {window}");

        guard
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Drive a reservation through its lifecycle. A transition that changes
    /// nothing succeeds without touching the WAL.
    pub async fn apply_event(
        &self,
        id: Ulid,
        event: LifecycleEvent,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        self.transition_locked(&mut guard, current, event).await
    }

    /// Cancel `id` only if it is still pending and was created at or before
    /// `cutoff`. The check runs under the date's write lock, so a payment that
    /// lands first wins. Returns whether the reservation was cancelled.
    pub async fn cancel_if_stale_pending(&self, id: Ulid, cutoff: Ms) -> Result<bool, EngineError> {
        let mut guard = self.resolve_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if current.status != LifecycleStatus::Pending || current.created_at > cutoff {
            return Ok(false);
        }
        self.transition_locked(&mut guard, current, LifecycleEvent::AdminCancel)
            .await?;
        Ok(true)
    }

    async fn transition_locked(
        &self,
        guard: &mut DayState,
        current: Reservation,
        event: LifecycleEvent,
    ) -> Result<Reservation, EngineError> {
        let id = current.id;
        let next = match transition_reservation(&current, event) {
            Ok(next) => next,
            Err(e) => {
                metrics::counter!(
                    crate::observability::TRANSITIONS_TOTAL,
                    "event" => event.as_str(),
                    "status" => "illegal"
                )
                .increment(1);
                tracing::warn!("{e}");
                return Err(e);
            }
        };

        if next.status == current.status && next.payment_status == current.payment_status {
            tracing::debug!("{event} on {id} is a no-op ({})", current.status);
            return Ok(next);
        }

        let record = Event::StatusChanged {
            id,
            date: current.window.date,
            status: next.status,
            payment_status: next.payment_status,
        };
        self.persist_and_apply(guard, &record).await?;
        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "event" => event.as_str(),
            "status" => "applied"
        )
        .increment(1);

        if became_confirmed(&current, &next) {
            tracing::info!("reservation {id} confirmed for {}", next.window);
        } else {
            tracing::info!(
                "reservation {id}: {event} {} -> {} (payment {})",
                current.status,
                next.status,
                next.payment_status
            );
        }
        Ok(next)
    }

    /// Store a meeting reference on a confirmed or completed reservation.
    /// Returns `false` without writing when one is already attached or the
    /// reservation is not in a state that owns a meeting.
    pub async fn attach_meeting_link(
        &self,
        id: Ulid,
        meeting_ref: String,
    ) -> Result<bool, EngineError> {
        if meeting_ref.trim().is_empty() {
            return Err(EngineError::Validation("meeting reference is empty".into()));
        }
        if meeting_ref.len() > MAX_MEETING_REF_LEN {
            return Err(EngineError::LimitExceeded("meeting reference too long"));
        }
        let mut guard = self.resolve_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if current.meeting_ref.is_some() || !current.blocks_listing() {
            return Ok(false);
        }
        let date = current.window.date;

        let event = Event::MeetingLinked { id, date, meeting_ref };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    /// Hard delete. There is no tombstone: the slot is free again immediately.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<TimeWindow, EngineError> {
        let mut guard = self.resolve_write(&id).await?;
        let window = guard.get(id).map(|r| r.window).ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationDeleted {
            id,
            date: window.date,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!("reservation {id} deleted ({window})");
        Ok(window)
    }

    /// Pending reservations created at or before `cutoff`.
    pub async fn collect_stale_pending(&self, cutoff: Ms) -> Vec<Ulid> {
        let mut stale = Vec::new();
        for day in self.days() {
            let guard = day.read().await;
            stale.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.status == LifecycleStatus::Pending && r.created_at <= cutoff)
                    .map(|r| r.id),
            );
        }
        stale
    }

    /// Confirmed reservations still waiting for a meeting reference.
    pub async fn collect_unprovisioned(&self) -> Vec<Ulid> {
        let mut missing = Vec::new();
        for day in self.days() {
            let guard = day.read().await;
            missing.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.status == LifecycleStatus::Confirmed && r.meeting_ref.is_none())
                    .map(|r| r.id),
            );
        }
        missing
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // The gate keeps bookings on dates outside the snapshot out, and the
        // read guards hold off every other writer until the swap.
        let gate = self.compaction_gate.write().await;
        let mut guards = Vec::new();
        for day in self.days() {
            guards.push(day.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            for r in &guard.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    window: r.window,
                    contact: r.contact.clone(),
                    created_at: r.created_at,
                });
                if r.status != LifecycleStatus::Pending || r.payment_status != PaymentStatus::Pending {
                    events.push(Event::StatusChanged {
                        id: r.id,
                        date: r.window.date,
                        status: r.status,
                        payment_status: r.payment_status,
                    });
                }
                if let Some(meeting_ref) = &r.meeting_ref {
                    events.push(Event::MeetingLinked {
                        id: r.id,
                        date: r.window.date,
                        meeting_ref: meeting_ref.clone(),
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        drop(gate);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(super) fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    if contact.name.trim().is_empty() {
        return Err(EngineError::Validation("contact name is required".into()));
    }
    if contact.email.trim().is_empty() && contact.phone.trim().is_empty() {
        return Err(EngineError::Validation("an email or phone number is required".into()));
    }
    if contact.name.len() > MAX_CONTACT_FIELD_LEN
        || contact.email.len() > MAX_CONTACT_FIELD_LEN
        || contact.phone.len() > MAX_CONTACT_FIELD_LEN
    {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    if contact.message.as_ref().is_some_and(|m| m.len() > MAX_MESSAGE_LEN) {
        return Err(EngineError::LimitExceeded("message too long"));
    }
    Ok(())
}
