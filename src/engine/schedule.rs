use chrono::NaiveDate;

use crate::model::*;

// ── Slot generation ───────────────────────────────────────────────

/// Bookable windows for `date`, ordered by start.
///
/// Walks the morning block `[open, break_start)` then the afternoon block
/// `[break_end, close)` in steps of `slot_minutes`. A trailing partial slot is
/// dropped. Non-working days yield nothing.
pub fn generate_slots(date: NaiveDate, config: &BusinessHoursConfig) -> Vec<TimeWindow> {
    if config.slot_minutes == 0 || !config.is_working_day(date) {
        return Vec::new();
    }
    let mut slots = Vec::new();
    walk_block(date, config.open, config.break_start, config.slot_minutes, &mut slots);
    walk_block(date, config.break_end, config.close, config.slot_minutes, &mut slots);
    slots
}

fn walk_block(
    date: NaiveDate,
    from: ClockTime,
    until: ClockTime,
    step: u32,
    out: &mut Vec<TimeWindow>,
) {
    let mut start = from;
    while let Some(end) = start.add_minutes(step) {
        if end > until {
            break;
        }
        out.push(TimeWindow::new(date, start, end));
        start = end;
    }
}
