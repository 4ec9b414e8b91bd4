//! Due-irrigation scanner: classifies active schedules against the current
//! time and raises due-soon / overdue notifications.
//! Classification is always relative to `now`, so a paused or late tick
//! never accumulates missed alerts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use irrigo_core::config::SchedulerConfig;
use irrigo_core::model::start_of_local_day;
use irrigo_core::{IrrigationError, NewNotification, NotificationKind, Priority, Result, ScheduleView};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{self, SmsSender};
use crate::notify::SharedNotifications;
use crate::store::ScheduleStore;

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub due_soon: usize,
    pub overdue: usize,
    pub skipped_duplicates: usize,
    pub sms_sent: usize,
    pub sms_failed: usize,
    pub pruned: usize,
}

enum Classification {
    DueSoon { minutes_until: i64 },
    Overdue { hours_overdue: i64 },
    Later,
}

pub struct DueScanner {
    schedules: Arc<dyn ScheduleStore>,
    notifications: SharedNotifications,
    sms: Arc<dyn SmsSender>,
    due_window: Duration,
    retention_days: i64,
    offset: FixedOffset,
    scanning: AtomicBool,
}

impl DueScanner {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        notifications: SharedNotifications,
        sms: Arc<dyn SmsSender>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            notifications,
            sms,
            due_window: Duration::minutes(config.due_window_minutes),
            retention_days: config.retention_days,
            offset: config.offset(),
            scanning: AtomicBool::new(false),
        }
    }

    /// Scan at the current wall-clock time.
    pub async fn scan(&self) -> Result<ScanReport> {
        self.scan_at(Utc::now()).await
    }

    /// Scan unless another scan is already running; `None` when skipped.
    pub async fn try_scan(&self) -> Option<Result<ScanReport>> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("⏭️ Scan already in progress, skipping");
            return None;
        }
        let _guard = ScanGuard(&self.scanning);
        Some(self.scan().await)
    }

    /// One pass over all active schedules as of `now`.
    /// A schedule-store read failure aborts the whole pass; SMS failures
    /// are counted and logged per schedule.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let mut report = ScanReport {
            pruned: self.with_center(|c| c.prune_older_than(self.retention_days, now))?,
            ..ScanReport::default()
        };

        let schedules = self.schedules.active_schedules().await?;
        report.scanned = schedules.len();

        for view in &schedules {
            match self.classify(view, now) {
                Classification::DueSoon { minutes_until } => {
                    let since = Some(start_of_local_day(now, self.offset));
                    if self.already_notified(view, NotificationKind::IrrigationDue, since)? {
                        report.skipped_duplicates += 1;
                        continue;
                    }
                    self.with_center(|c| c.add(due_soon_notification(view, minutes_until), now))?;
                    report.due_soon += 1;
                    self.send_sms(view, &dispatch::due_soon_sms(view, minutes_until), &mut report)
                        .await;
                }
                Classification::Overdue { hours_overdue } => {
                    // Overdue alerts stay until acknowledged, regardless of day.
                    if self.already_notified(view, NotificationKind::IrrigationOverdue, None)? {
                        report.skipped_duplicates += 1;
                        continue;
                    }
                    self.with_center(|c| c.add(overdue_notification(view, hours_overdue), now))?;
                    report.overdue += 1;
                    self.send_sms(view, &dispatch::overdue_sms(view, hours_overdue), &mut report)
                        .await;
                }
                Classification::Later => {}
            }
        }

        if report.due_soon + report.overdue > 0 {
            tracing::info!(
                "🔔 Scan: {} schedules, {} due soon, {} overdue, {} duplicates skipped",
                report.scanned,
                report.due_soon,
                report.overdue,
                report.skipped_duplicates
            );
        } else {
            tracing::debug!("Scan: {} schedules, nothing due", report.scanned);
        }
        Ok(report)
    }

    fn classify(&self, view: &ScheduleView, now: DateTime<Utc>) -> Classification {
        let delta = view.schedule.next_due - now;
        if delta <= Duration::zero() {
            Classification::Overdue {
                hours_overdue: round_div(-delta.num_seconds(), 3600),
            }
        } else if delta <= self.due_window {
            Classification::DueSoon {
                minutes_until: round_div(delta.num_seconds(), 60),
            }
        } else {
            Classification::Later
        }
    }

    fn already_notified(
        &self,
        view: &ScheduleView,
        kind: NotificationKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.with_center(|c| c.has_unread(&view.schedule.id, kind, since))
    }

    async fn send_sms(&self, view: &ScheduleView, message: &str, report: &mut ScanReport) {
        let Some(phone) = view.owner_phone.as_deref().filter(|p| !p.trim().is_empty()) else {
            tracing::debug!("No phone on file for farm '{}', SMS skipped", view.farm_name);
            return;
        };
        match self.sms.send(phone, message).await {
            Ok(()) => report.sms_sent += 1,
            Err(e) => {
                report.sms_failed += 1;
                tracing::warn!("⚠️ SMS for schedule {} failed: {e}", view.schedule.id);
            }
        }
    }

    /// Run `f` under the notification lock. The guard never crosses an await.
    fn with_center<T>(&self, f: impl FnOnce(&mut crate::notify::NotificationCenter) -> T) -> Result<T> {
        let mut center = self
            .notifications
            .lock()
            .map_err(|_| IrrigationError::Store("notification lock poisoned".into()))?;
        Ok(f(&mut center))
    }
}

/// Clears the in-progress flag when dropped, including when the scan
/// future is cancelled mid-await.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Integer division rounded half away from zero, for non-negative inputs.
fn round_div(value: i64, unit: i64) -> i64 {
    (value + unit / 2) / unit
}

fn due_soon_notification(view: &ScheduleView, minutes_until: i64) -> NewNotification {
    NewNotification::new(
        NotificationKind::IrrigationDue,
        "Irrigation due soon",
        &format!(
            "{} at {} is due for irrigation in {} minutes",
            view.crop_name, view.farm_name, minutes_until
        ),
        Priority::High,
    )
    .for_schedule(&view.schedule.farm_id, &view.schedule.id)
    .with_action(serde_json::json!({
        "schedule_id": view.schedule.id,
        "farm_name": view.farm_name,
        "crop_name": view.crop_name,
        "duration": view.schedule.duration_minutes,
        "minutes_until": minutes_until,
    }))
}

fn overdue_notification(view: &ScheduleView, hours_overdue: i64) -> NewNotification {
    NewNotification::new(
        NotificationKind::IrrigationOverdue,
        "Irrigation overdue",
        &format!(
            "{} at {} is {} hour(s) overdue for irrigation",
            view.crop_name, view.farm_name, hours_overdue
        ),
        Priority::Critical,
    )
    .for_schedule(&view.schedule.farm_id, &view.schedule.id)
    .with_action(serde_json::json!({
        "schedule_id": view.schedule.id,
        "farm_name": view.farm_name,
        "crop_name": view.crop_name,
        "duration": view.schedule.duration_minutes,
        "hours_overdue": hours_overdue,
    }))
}

/// Spawn the scan loop: first scan after `startup_delay`, then every
/// `interval`. Cancelling the token stops new scans from starting; a scan
/// already in flight runs to completion.
pub fn spawn_scanner(
    scanner: Arc<DueScanner>,
    interval: std::time::Duration,
    startup_delay: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("⏰ Irrigation scanner started (every {}s)", interval.as_secs());

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Irrigation scanner stopped before first scan");
                return;
            }
            _ = tokio::time::sleep(startup_delay) => {}
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match scanner.try_scan().await {
                Some(Err(e)) => tracing::warn!("⚠️ Irrigation scan failed, retrying next interval: {e}"),
                Some(Ok(_)) | None => {}
            }
        }

        tracing::info!("Irrigation scanner stopped");
    })
}
