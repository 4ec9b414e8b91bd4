//! Store seams consumed by the scanner and the completion handler.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use irrigo_core::{LogEntry, NewLogEntry, Result, Schedule, ScheduleView};

/// Schedule reads and the single write the scheduler side performs.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Active schedules joined with farm/crop display names and owner phone.
    async fn active_schedules(&self) -> Result<Vec<ScheduleView>>;

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>>;

    /// Fails with `NotFound` when no schedule has this id.
    async fn update_next_due(&self, id: &str, next_due: DateTime<Utc>) -> Result<()>;
}

/// Append-only irrigation log.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry>;

    async fn logs_for_schedule(&self, schedule_id: &str) -> Result<Vec<LogEntry>>;
}
