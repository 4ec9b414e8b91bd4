//! Irrigation data model: schedules, log entries and notifications.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IrrigationError, Result};

/// A recurring irrigation plan for one crop on one farm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub farm_id: String,
    pub crop_id: String,
    /// Days between irrigations (>= 1).
    pub frequency_days: u32,
    /// Planned duration in minutes (>= 1).
    pub duration_minutes: u32,
    /// Local time of day the irrigation should start.
    pub time_of_day: NaiveTime,
    pub active: bool,
    /// Always lands on `time_of_day` in the configured offset.
    pub next_due: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub farm_id: String,
    pub crop_id: String,
    pub frequency_days: u32,
    pub duration_minutes: u32,
    pub time_of_day: NaiveTime,
}

impl NewSchedule {
    pub fn validate(&self) -> Result<()> {
        if self.frequency_days == 0 {
            return Err(IrrigationError::InvalidInput("frequency_days must be at least 1".into()));
        }
        if self.duration_minutes == 0 {
            return Err(IrrigationError::InvalidInput("duration_minutes must be at least 1".into()));
        }
        Ok(())
    }
}

/// Schedule joined with the display fields the scanner needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub farm_name: String,
    pub crop_name: String,
    /// Farm owner's registered phone number.
    pub owner_phone: Option<String>,
}

/// A completed irrigation event. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub schedule_id: String,
    pub farm_id: String,
    pub duration_minutes: u32,
    pub water_used: f64,
    pub completed: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub schedule_id: String,
    pub farm_id: String,
    pub duration_minutes: u32,
    pub water_used: f64,
    pub completed: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Notification type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    IrrigationDue,
    IrrigationOverdue,
    WeatherAlert,
    SystemAlert,
    SoilMoistureAlert,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// High and critical alerts also raise a platform notification.
    pub fn is_urgent(self) -> bool {
        matches!(self, Priority::High | Priority::Critical)
    }
}

/// A UI-facing alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    #[serde(default)]
    pub farm_id: Option<String>,
    #[serde(default)]
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub action_required: bool,
    #[serde(default)]
    pub action_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A notification before the store assigns id, timestamp and read state.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub farm_id: Option<String>,
    pub schedule_id: Option<String>,
    pub action_required: bool,
    pub action_data: serde_json::Value,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: &str, message: &str, priority: Priority) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message: message.to_string(),
            priority,
            farm_id: None,
            schedule_id: None,
            action_required: false,
            action_data: serde_json::Value::Null,
        }
    }

    pub fn for_schedule(mut self, farm_id: &str, schedule_id: &str) -> Self {
        self.farm_id = Some(farm_id.to_string());
        self.schedule_id = Some(schedule_id.to_string());
        self
    }

    pub fn with_action(mut self, data: serde_json::Value) -> Self {
        self.action_required = true;
        self.action_data = data;
        self
    }
}

// ─── Calendar helpers ──────────────────────────────────────

/// Combine a local calendar date and time-of-day into a UTC instant.
pub fn at_local(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    // A fixed offset has no gaps or folds, so the mapping is always single.
    offset
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(time)))
}

/// Local calendar date of `now`.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Start of the local calendar day that contains `now`, as UTC.
pub fn start_of_local_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    at_local(local_date(now, offset), NaiveTime::MIN, offset)
}

/// First due instant for a new schedule: today at `time_of_day` if that is
/// still ahead of `after`, otherwise tomorrow.
pub fn next_occurrence(after: DateTime<Utc>, time_of_day: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let today = local_date(after, offset);
    let candidate = at_local(today, time_of_day, offset);
    if candidate > after {
        candidate
    } else {
        at_local(today + Duration::days(1), time_of_day, offset)
    }
}

/// Next due instant after a completion at `now`: local today plus
/// `frequency_days`, at the schedule's time of day. Measured from today,
/// not from the previous due date.
pub fn due_after_completion(
    now: DateTime<Utc>,
    frequency_days: u32,
    time_of_day: NaiveTime,
    offset: FixedOffset,
) -> DateTime<Utc> {
    let date = local_date(now, offset) + Duration::days(i64::from(frequency_days));
    at_local(date, time_of_day, offset)
}

/// Schedules run at minute resolution; drop seconds and below.
pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Parse "HH:MM" (or "HH:MM:SS", seconds discarded) into a time of day.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map(truncate_to_minute)
        .map_err(|e| IrrigationError::InvalidInput(format!("bad time of day '{s}': {e}")))
}
