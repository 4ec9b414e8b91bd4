//! # Irrigo Scheduler
//!
//! Irrigation reminder engine: scans active schedules, raises due-soon and
//! overdue notifications, and records completions.
//!
//! ## Architecture
//! ```text
//! DueScanner (tokio interval + CancellationToken)
//!   ├── ScheduleStore::active_schedules()   (SQLite: irrigation_schedules ⨝ farms ⨝ crops)
//!   ├── classify: due-soon (0 < Δ ≤ 1h) | overdue (Δ ≤ 0) | later
//!   ├── NotificationCenter::add()           (dedup, persist via KvStore, notify listeners)
//!   └── SmsSender::send()                   (per-schedule, failures isolated)
//!
//! CompletionHandler
//!   ├── LogStore::insert_log()
//!   ├── ScheduleStore::update_next_due()    (today + frequency @ time-of-day)
//!   └── NotificationCenter::mark_read_for_schedule()
//! ```

pub mod completion;
pub mod dispatch;
pub mod engine;
pub mod kv;
pub mod notify;
pub mod persistence;
pub mod records;
pub mod store;

pub use completion::{Completion, CompletionHandler};
pub use dispatch::{
    HttpSmsSender, LogSmsSender, NoopNotifier, PlatformNotifier, SmsSender, TracingNotifier,
};
pub use engine::{DueScanner, ScanReport, spawn_scanner};
pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use notify::{ListenerId, NotificationCenter, SharedNotifications};
pub use persistence::IrrigationDb;
pub use records::{CommunityBoard, CostLedger, Repository, SoilMoistureLog};
pub use store::{LogStore, ScheduleStore};
