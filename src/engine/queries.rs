use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::{check_slot_available, list_available_slots};
use super::{Engine, SharedDayState};

impl Engine {
    /// Snapshot of all day handles, ordered by date.
    pub(super) fn days(&self) -> Vec<SharedDayState> {
        let mut days: Vec<(NaiveDate, SharedDayState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        days.sort_by_key(|(date, _)| *date);
        days.into_iter().map(|(_, day)| day).collect()
    }

    /// Public slot listing for `date`.
    pub async fn available_slots(&self, date: NaiveDate) -> Vec<SlotInfo> {
        match self.get_day(&date) {
            Some(day) => {
                let guard = day.read().await;
                list_available_slots(date, &self.hours, &guard.reservations)
            }
            None => list_available_slots(date, &self.hours, &[]),
        }
    }

    /// Write-time availability of a single window, without booking it.
    pub async fn check_slot(&self, window: TimeWindow) -> SlotCheck {
        let result = match self.get_day(&window.date) {
            Some(day) => {
                let guard = day.read().await;
                check_slot_available(&window, window.date, &self.hours, &guard.reservations)
            }
            None => check_slot_available(&window, window.date, &self.hours, &[]),
        };
        SlotCheck::from(result)
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let date = self.date_of(id)?;
        let day = self.get_day(&date)?;
        let guard = day.read().await;
        guard.get(*id).cloned()
    }

    pub async fn reservations_for_date(&self, date: NaiveDate) -> Vec<Reservation> {
        match self.get_day(&date) {
            Some(day) => day.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    /// Every reservation, ordered by date then start.
    pub async fn list_reservations(&self) -> Vec<Reservation> {
        let mut all = Vec::new();
        for day in self.days() {
            all.extend(day.read().await.reservations.iter().cloned());
        }
        all
    }

    pub async fn dashboard_stats(&self, today: NaiveDate) -> DashboardStats {
        let mut stats = DashboardStats::default();
        for day in self.days() {
            let guard = day.read().await;
            for r in &guard.reservations {
                stats.total += 1;
                match r.status {
                    LifecycleStatus::Pending => stats.pending += 1,
                    LifecycleStatus::Confirmed => stats.confirmed += 1,
                    LifecycleStatus::Completed => stats.completed += 1,
                    LifecycleStatus::Cancelled => stats.cancelled += 1,
                }
                match r.payment_status {
                    PaymentStatus::Pending => stats.payments_pending += 1,
                    PaymentStatus::Completed => stats.payments_completed += 1,
                    PaymentStatus::Failed => stats.payments_failed += 1,
                }
                if r.status == LifecycleStatus::Confirmed && r.window.date >= today {
                    stats.upcoming += 1;
                }
            }
        }
        stats
    }
}
