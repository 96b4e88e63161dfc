use crate::model::*;

use super::EngineError;

pub(crate) fn validate_window(window: &TimeWindow) -> Result<(), EngineError> {
    if !window.is_well_formed() {
        return Err(EngineError::InvalidWindow(*window));
    }
    Ok(())
}

/// First window in `existing` that overlaps `candidate`, in caller order.
///
/// A malformed candidate (`end <= start`) is an error, not a conflict.
pub fn find_conflict<'a, I>(
    candidate: &TimeWindow,
    existing: I,
) -> Result<Option<&'a TimeWindow>, EngineError>
where
    I: IntoIterator<Item = &'a TimeWindow>,
{
    validate_window(candidate)?;
    Ok(existing.into_iter().find(|w| candidate.overlaps(w)))
}
