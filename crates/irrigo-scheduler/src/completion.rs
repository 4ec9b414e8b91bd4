//! Completion handler: records that a due irrigation happened and moves
//! the schedule forward.
//!
//! The three writes (log, schedule, notifications) are not wrapped in a
//! cross-store transaction; a failure part-way returns the error and leaves
//! whatever already succeeded in place.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use irrigo_core::model::due_after_completion;
use irrigo_core::{IrrigationError, LogEntry, NewLogEntry, Result};
use serde::Serialize;

use crate::notify::SharedNotifications;
use crate::store::{LogStore, ScheduleStore};

/// Result of a successful completion.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub log: LogEntry,
    pub next_due: DateTime<Utc>,
    pub notifications_retired: usize,
}

pub struct CompletionHandler {
    schedules: Arc<dyn ScheduleStore>,
    logs: Arc<dyn LogStore>,
    notifications: SharedNotifications,
    offset: FixedOffset,
}

impl CompletionHandler {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        logs: Arc<dyn LogStore>,
        notifications: SharedNotifications,
        offset: FixedOffset,
    ) -> Self {
        Self {
            schedules,
            logs,
            notifications,
            offset,
        }
    }

    pub async fn complete(&self, schedule_id: &str, water_used: f64, notes: Option<String>) -> Result<Completion> {
        self.complete_at(schedule_id, water_used, notes, Utc::now()).await
    }

    pub async fn complete_at(
        &self,
        schedule_id: &str,
        water_used: f64,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Completion> {
        if !water_used.is_finite() || water_used <= 0.0 {
            return Err(IrrigationError::InvalidInput(format!(
                "water_used must be a positive number, got {water_used}"
            )));
        }

        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| IrrigationError::NotFound(format!("schedule {schedule_id}")))?;

        let log = self
            .logs
            .insert_log(NewLogEntry {
                schedule_id: schedule.id.clone(),
                farm_id: schedule.farm_id.clone(),
                duration_minutes: schedule.duration_minutes,
                water_used,
                completed: true,
                notes: notes.filter(|n| !n.trim().is_empty()),
                created_at: now,
            })
            .await?;

        let next_due = due_after_completion(now, schedule.frequency_days, schedule.time_of_day, self.offset);
        self.schedules.update_next_due(&schedule.id, next_due).await?;

        let notifications_retired = self
            .notifications
            .lock()
            .map_err(|_| IrrigationError::Store("notification lock poisoned".into()))?
            .mark_read_for_schedule(&schedule.id);

        tracing::info!(
            "✅ Irrigation completed for schedule {} ({} L), next due {}",
            schedule.id,
            water_used,
            next_due.to_rfc3339()
        );

        Ok(Completion {
            log,
            next_due,
            notifications_retired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::notify::NotificationCenter;
    use crate::notify::tests::RecordingNotifier;
    use crate::persistence::IrrigationDb;
    use crate::persistence::tests::{seed, utc};
    use chrono::{Duration, NaiveTime, TimeZone};
    use irrigo_core::{NewNotification, NotificationKind, Priority};

    fn setup() -> (Arc<IrrigationDb>, SharedNotifications, CompletionHandler) {
        let db = Arc::new(IrrigationDb::open_in_memory().unwrap());
        let center = NotificationCenter::load(
            Arc::new(MemoryKvStore::new()),
            Arc::new(RecordingNotifier::default()),
            "notifications",
        )
        .shared();
        let handler = CompletionHandler::new(db.clone(), db.clone(), center.clone(), utc());
        (db, center, handler)
    }

    #[tokio::test]
    async fn test_complete_scenario() {
        let (db, center, handler) = setup();
        let today_2pm = Utc.with_ymd_and_hms(2026, 6, 1, 14, 0, 0).unwrap();
        let six = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let schedule = seed(&db, today_2pm - Duration::days(3), six, 2);

        center.lock().unwrap().add(
            NewNotification::new(NotificationKind::IrrigationOverdue, "Overdue", "late", Priority::Critical)
                .for_schedule(&schedule.farm_id, &schedule.id),
            today_2pm - Duration::hours(1),
        );

        let done = handler.complete_at(&schedule.id, 120.0, None, today_2pm).await.unwrap();
        assert_eq!(done.next_due, Utc.with_ymd_and_hms(2026, 6, 3, 6, 0, 0).unwrap());
        assert!(done.next_due > today_2pm);
        assert_eq!(done.log.duration_minutes, schedule.duration_minutes);
        assert!((done.log.water_used - 120.0).abs() < f64::EPSILON);
        assert!(done.log.completed);
        assert_eq!(done.notifications_retired, 1);

        let logs = db.logs_for_schedule(&schedule.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        let stored = db.get_schedule(&schedule.id).await.unwrap().unwrap();
        assert_eq!(stored.next_due, done.next_due);
        assert!(!center.lock().unwrap().has_unread(&schedule.id, NotificationKind::IrrigationOverdue, None));
    }

    #[tokio::test]
    async fn test_next_due_from_today_not_old_due() {
        let (db, _, handler) = setup();
        let now = Utc.with_ymd_and_hms(2026, 6, 20, 9, 0, 0).unwrap();
        let six = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let schedule = seed(&db, now, six, 3);
        // Missed many cycles.
        db.update_next_due(&schedule.id, now - Duration::days(12)).await.unwrap();

        let done = handler.complete_at(&schedule.id, 50.0, Some("late".into()), now).await.unwrap();
        assert_eq!(done.next_due, Utc.with_ymd_and_hms(2026, 6, 23, 6, 0, 0).unwrap());
        assert_eq!(done.log.notes.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_missing_schedule_is_not_found() {
        let (_, _, handler) = setup();
        let err = handler.complete("nope", 10.0, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_water() {
        let (db, _, handler) = setup();
        let schedule = seed(&db, Utc::now(), NaiveTime::from_hms_opt(6, 0, 0).unwrap(), 1);
        for bad in [0.0, -5.0, f64::NAN] {
            let err = handler.complete(&schedule.id, bad, None).await.unwrap_err();
            assert!(matches!(err, IrrigationError::InvalidInput(_)));
        }
        assert!(db.logs_for_schedule(&schedule.id).await.unwrap().is_empty());
    }
}
