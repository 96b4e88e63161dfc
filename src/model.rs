use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Only used for creation timestamps and TTL arithmetic.
pub type Ms = i64;

/// Current wall-clock time as `Ms`.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Time of day in the operating timezone, as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self(minutes as u16))
    }

    pub fn minutes(self) -> u32 {
        self.0 as u32
    }

    pub fn add_minutes(self, minutes: u32) -> Option<Self> {
        Self::from_minutes(self.minutes() + minutes)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(pub String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?} (expected HH:MM)", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for ClockTime {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTimeError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        Self::from_hm(hour, minute).ok_or_else(err)
    }
}

/// Parse a calendar date written as `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Weekday number with 0 = Sunday .. 6 = Saturday.
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Half-open window `[start, end)` on a single calendar date.
///
/// Not validated on construction: candidate windows come straight from client
/// input and are rejected by the overlap validator when `end <= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeWindow {
    pub fn new(date: NaiveDate, start: ClockTime, end: ClockTime) -> Self {
        Self { date, start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.date == other.date && self.start < other.end && self.end > other.start
    }

    pub fn same_bounds(&self, other: &TimeWindow) -> bool {
        self.date == other.date && self.start == other.start && self.end == other.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}-{}", self.date, self.start, self.end)
    }
}

/// Process-wide working-day layout. Read-only once the server is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHoursConfig {
    pub open: ClockTime,
    pub close: ClockTime,
    pub break_start: ClockTime,
    pub break_end: ClockTime,
    pub slot_minutes: u32,
    /// 0 = Sunday .. 6 = Saturday.
    pub working_weekdays: Vec<u8>,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            open: ClockTime(10 * 60),
            close: ClockTime(17 * 60),
            break_start: ClockTime(14 * 60),
            break_end: ClockTime(15 * 60),
            slot_minutes: 30,
            working_weekdays: vec![1, 2, 3, 4, 5, 6],
        }
    }
}

impl BusinessHoursConfig {
    /// Check `open < break_start < break_end < close`, a positive slot length
    /// and weekday numbers in range.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.open < self.break_start
            && self.break_start < self.break_end
            && self.break_end < self.close)
        {
            return Err(format!(
                "business hours must satisfy open < break_start < break_end < close (got {} < {} < {} < {})",
                self.open, self.break_start, self.break_end, self.close
            ));
        }
        if self.slot_minutes == 0 {
            return Err("slot duration must be positive".into());
        }
        if let Some(day) = self.working_weekdays.iter().find(|d| **d > 6) {
            return Err(format!("weekday {day} out of range 0..=6"));
        }
        Ok(())
    }

    /// True when both blocks split into whole slots.
    pub fn divides_evenly(&self) -> bool {
        let morning = self.break_start.minutes() - self.open.minutes();
        let afternoon = self.close.minutes() - self.break_end.minutes();
        self.slot_minutes > 0 && morning % self.slot_minutes == 0 && afternoon % self.slot_minutes == 0
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_weekdays.contains(&weekday_number(date))
    }
}

/// Who booked. Opaque to scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Pending => "pending",
            LifecycleStatus::Confirmed => "confirmed",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive a reservation through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    PaySuccess,
    PayFail,
    AdminCancel,
    AdminComplete,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::PaySuccess => "pay_success",
            LifecycleEvent::PayFail => "pay_fail",
            LifecycleEvent::AdminCancel => "admin_cancel",
            LifecycleEvent::AdminComplete => "admin_complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pay_success" => Some(LifecycleEvent::PaySuccess),
            "pay_fail" => Some(LifecycleEvent::PayFail),
            "admin_cancel" => Some(LifecycleEvent::AdminCancel),
            "admin_complete" => Some(LifecycleEvent::AdminComplete),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consultation booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub contact: Contact,
    pub window: TimeWindow,
    pub status: LifecycleStatus,
    pub payment_status: PaymentStatus,
    /// Externally provisioned meeting link or id.
    pub meeting_ref: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn new(id: Ulid, window: TimeWindow, contact: Contact, created_at: Ms) -> Self {
        Self {
            id,
            contact,
            window,
            status: LifecycleStatus::Pending,
            payment_status: PaymentStatus::Pending,
            meeting_ref: None,
            created_at,
        }
    }

    /// Read-time occupancy: only paid-for reservations show a slot as taken.
    pub fn blocks_listing(&self) -> bool {
        matches!(self.status, LifecycleStatus::Confirmed | LifecycleStatus::Completed)
    }

    /// Write-time occupancy: anything not cancelled, pending holds included.
    pub fn blocks_booking(&self) -> bool {
        self.status != LifecycleStatus::Cancelled
    }
}

/// All reservations on one date, sorted by window start.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub reservations: Vec<Reservation>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by window start (stable for equal starts).
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.window.start <= reservation.window.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        id: Ulid,
        window: TimeWindow,
        contact: Contact,
        created_at: Ms,
    },
    StatusChanged {
        id: Ulid,
        date: NaiveDate,
        status: LifecycleStatus,
        payment_status: PaymentStatus,
    },
    MeetingLinked {
        id: Ulid,
        date: NaiveDate,
        meeting_ref: String,
    },
    ReservationDeleted {
        id: Ulid,
        date: NaiveDate,
    },
}

impl Event {
    pub fn date(&self) -> NaiveDate {
        match self {
            Event::ReservationCreated { window, .. } => window.date,
            Event::StatusChanged { date, .. }
            | Event::MeetingLinked { date, .. }
            | Event::ReservationDeleted { date, .. } => *date,
        }
    }

    pub fn reservation_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { id, .. }
            | Event::StatusChanged { id, .. }
            | Event::MeetingLinked { id, .. }
            | Event::ReservationDeleted { id, .. } => *id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub window: TimeWindow,
    pub is_available: bool,
}

/// Flattened answer to "is this window bookable right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCheck {
    pub available: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardStats {
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub payments_pending: u64,
    pub payments_completed: u64,
    pub payments_failed: u64,
    /// Confirmed reservations dated today or later.
    pub upcoming: u64,
}
