use ulid::Ulid;

use crate::model::{LifecycleEvent, LifecycleStatus, TimeWindow};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// `end <= start`.
    InvalidWindow(TimeWindow),
    /// Window is not one of the generated slots for its date.
    NotASlot(TimeWindow),
    Conflict {
        requested: TimeWindow,
        existing: TimeWindow,
    },
    IllegalTransition {
        id: Ulid,
        from: LifecycleStatus,
        event: LifecycleEvent,
    },
    Validation(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Client-correctable errors, as opposed to storage failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "reservation already exists: {id}"),
            EngineError::InvalidWindow(w) => {
                write!(f, "invalid window {w}: end must be after start")
            }
            EngineError::NotASlot(w) => write!(f, "{w} is not a recognized slot"),
            EngineError::Conflict { requested, existing } => write!(
                f,
                "slot {}-{} on {} conflicts with existing reservation {}-{}",
                requested.start, requested.end, requested.date, existing.start, existing.end
            ),
            EngineError::IllegalTransition { id, from, event } => {
                write!(f, "illegal transition for {id}: {event} while {from}")
            }
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
