use crate::model::*;

use super::EngineError;

/// Apply `event` to a reservation, returning the resulting record.
///
/// ```text
/// pending   --pay_success-->    confirmed (payment completed)
/// pending   --pay_fail-->       pending   (payment failed, retry allowed)
/// pending   --admin_cancel-->   cancelled
/// confirmed --admin_cancel-->   cancelled
/// confirmed --admin_complete--> completed
/// ```
///
/// Repeats that land where the record already is (cancel on cancelled,
/// complete on completed, a duplicate payment callback on a paid booking)
/// return the record unchanged. Everything else is an illegal transition and
/// leaves the input untouched.
pub fn transition_reservation(
    reservation: &Reservation,
    event: LifecycleEvent,
) -> Result<Reservation, EngineError> {
    use LifecycleEvent::*;
    use LifecycleStatus as S;

    let current = (reservation.status, reservation.payment_status);
    let (status, payment_status) = match (reservation.status, reservation.payment_status, event) {
        (S::Pending, _, PaySuccess) => (S::Confirmed, PaymentStatus::Completed),
        (S::Confirmed | S::Completed, PaymentStatus::Completed, PaySuccess) => current,
        (S::Pending, _, PayFail) => (S::Pending, PaymentStatus::Failed),
        (S::Pending | S::Confirmed, payment, AdminCancel) => (S::Cancelled, payment),
        (S::Cancelled, _, AdminCancel) => current,
        (S::Confirmed, payment, AdminComplete) => (S::Completed, payment),
        (S::Completed, _, AdminComplete) => current,
        (from, _, event) => {
            return Err(EngineError::IllegalTransition {
                id: reservation.id,
                from,
                event,
            });
        }
    };

    let mut next = reservation.clone();
    next.status = status;
    next.payment_status = payment_status;
    Ok(next)
}

/// True when the transition freshly confirmed the booking and downstream
/// provisioning should run.
pub fn became_confirmed(before: &Reservation, after: &Reservation) -> bool {
    before.status != LifecycleStatus::Confirmed && after.status == LifecycleStatus::Confirmed
}
