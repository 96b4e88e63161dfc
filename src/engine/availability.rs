use chrono::NaiveDate;

use crate::model::*;

use super::conflict::{find_conflict, validate_window};
use super::schedule::generate_slots;
use super::EngineError;

// ── Availability ──────────────────────────────────────────────────
//
// Two occupancy rules on purpose: the public listing only treats paid
// (confirmed/completed) reservations as taken, while booking also refuses
// windows held by a pending reservation.

/// Every generated slot for `date`, marked free unless a confirmed or completed
/// reservation overlaps it.
pub fn list_available_slots(
    date: NaiveDate,
    config: &BusinessHoursConfig,
    reservations: &[Reservation],
) -> Vec<SlotInfo> {
    let blocking: Vec<&TimeWindow> = reservations
        .iter()
        .filter(|r| r.window.date == date && r.blocks_listing())
        .map(|r| &r.window)
        .collect();

    generate_slots(date, config)
        .into_iter()
        .map(|window| {
            let is_available = matches!(find_conflict(&window, blocking.iter().copied()), Ok(None));
            SlotInfo { window, is_available }
        })
        .collect()
}

/// Decide whether `candidate` may be booked on `date`.
///
/// The candidate must match a generated slot exactly, and must not overlap
/// any reservation that is not cancelled (pending ones included).
pub fn check_slot_available(
    candidate: &TimeWindow,
    date: NaiveDate,
    config: &BusinessHoursConfig,
    reservations: &[Reservation],
) -> Result<(), EngineError> {
    validate_window(candidate)?;
    let recognized = candidate.date == date
        && generate_slots(date, config)
            .iter()
            .any(|slot| slot.same_bounds(candidate));
    if !recognized {
        return Err(EngineError::NotASlot(*candidate));
    }

    let blocking = reservations
        .iter()
        .filter(|r| r.window.date == date && r.blocks_booking())
        .map(|r| &r.window);
    match find_conflict(candidate, blocking)? {
        Some(existing) => Err(EngineError::Conflict {
            requested: *candidate,
            existing: *existing,
        }),
        None => Ok(()),
    }
}

impl From<Result<(), EngineError>> for SlotCheck {
    fn from(result: Result<(), EngineError>) -> Self {
        match result {
            Ok(()) => SlotCheck {
                available: true,
                reason: None,
            },
            Err(e) => SlotCheck {
                available: false,
                reason: Some(e.to_string()),
            },
        }
    }
}
