//! # Irrigo Core
//! Shared configuration, error types and the irrigation data model.

pub mod config;
pub mod error;
pub mod model;

pub use config::IrrigoConfig;
pub use error::{IrrigationError, Result};
pub use model::{
    LogEntry, NewLogEntry, NewNotification, NewSchedule, Notification, NotificationKind,
    Priority, Schedule, ScheduleView,
};
