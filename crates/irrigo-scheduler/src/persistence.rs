//! SQLite-backed persistence for profiles, farms, crops, irrigation schedules and logs.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use irrigo_core::model::{next_occurrence, truncate_to_minute};
use irrigo_core::{IrrigationError, LogEntry, NewLogEntry, NewSchedule, Result, Schedule, ScheduleView};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::store::{LogStore, ScheduleStore};

/// A registered farmer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Farm {
    pub id: String,
    pub owner_id: Option<String>,
    pub name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Crop {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

const SCHEDULE_VIEW_SELECT: &str = "
    SELECT s.id, s.farm_id, s.crop_id, s.frequency_days, s.duration_minutes, s.time_of_day,
           s.active, s.next_due, s.created_at, f.name, c.name, p.phone
    FROM irrigation_schedules s
    JOIN farms f ON f.id = s.farm_id
    JOIN crops c ON c.id = s.crop_id
    LEFT JOIN profiles p ON p.id = f.owner_id";

/// SQLite store for all irrigation records.
pub struct IrrigationDb {
    conn: Mutex<Connection>,
}

impl IrrigationDb {
    /// Open or create the irrigation database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| IrrigationError::Store(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| IrrigationError::Store(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                phone TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS farms (
                id TEXT PRIMARY KEY,
                owner_id TEXT REFERENCES profiles(id) ON DELETE SET NULL,
                name TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS crops (
                id TEXT PRIMARY KEY,
                farm_id TEXT NOT NULL REFERENCES farms(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS irrigation_schedules (
                id TEXT PRIMARY KEY,
                farm_id TEXT NOT NULL REFERENCES farms(id) ON DELETE CASCADE,
                crop_id TEXT NOT NULL REFERENCES crops(id) ON DELETE CASCADE,
                frequency_days INTEGER NOT NULL CHECK (frequency_days >= 1),
                duration_minutes INTEGER NOT NULL CHECK (duration_minutes >= 1),
                time_of_day TEXT NOT NULL,       -- 'HH:MM'
                active INTEGER NOT NULL DEFAULT 1,
                next_due TEXT NOT NULL,          -- RFC 3339, UTC
                created_at TEXT NOT NULL
            );

            -- Append-only; rows survive schedule deletion.
            CREATE TABLE IF NOT EXISTS irrigation_logs (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                farm_id TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                water_used REAL NOT NULL,
                completed INTEGER NOT NULL DEFAULT 1,
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_active ON irrigation_schedules(active);
            CREATE INDEX IF NOT EXISTS idx_logs_schedule ON irrigation_logs(schedule_id);
         ",
            )
            .map_err(|e| IrrigationError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IrrigationError::Store("database lock poisoned".into()))
    }

    // ─── Profiles / Farms / Crops ─────────────────────────────

    pub fn create_profile(&self, full_name: &str, phone: Option<&str>) -> Result<Profile> {
        let profile = Profile {
            id: new_id(),
            full_name: full_name.to_string(),
            phone: phone.map(str::to_string),
            created_at: Utc::now(),
        };
        self.conn()?
            .execute(
                "INSERT INTO profiles (id, full_name, phone, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![profile.id, profile.full_name, profile.phone, profile.created_at.to_rfc3339()],
            )
            .map_err(|e| IrrigationError::Store(format!("Create profile: {e}")))?;
        Ok(profile)
    }

    pub fn create_farm(&self, owner_id: Option<&str>, name: &str, location: &str) -> Result<Farm> {
        if name.trim().is_empty() {
            return Err(IrrigationError::InvalidInput("farm name is required".into()));
        }
        let farm = Farm {
            id: new_id(),
            owner_id: owner_id.map(str::to_string),
            name: name.to_string(),
            location: location.to_string(),
            created_at: Utc::now(),
        };
        self.conn()?
            .execute(
                "INSERT INTO farms (id, owner_id, name, location, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![farm.id, farm.owner_id, farm.name, farm.location, farm.created_at.to_rfc3339()],
            )
            .map_err(|e| IrrigationError::Store(format!("Create farm: {e}")))?;
        Ok(farm)
    }

    pub fn list_farms(&self) -> Result<Vec<Farm>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, owner_id, name, location, created_at FROM farms ORDER BY created_at")
            .map_err(IrrigationError::store)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Farm {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    name: row.get(2)?,
                    location: row.get(3)?,
                    created_at: parse_ts(row, 4)?,
                })
            })
            .map_err(IrrigationError::store)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IrrigationError::store)
    }

    pub fn create_crop(&self, farm_id: &str, name: &str) -> Result<Crop> {
        if name.trim().is_empty() {
            return Err(IrrigationError::InvalidInput("crop name is required".into()));
        }
        let conn = self.conn()?;
        if !exists(&conn, "SELECT 1 FROM farms WHERE id = ?1", farm_id)? {
            return Err(IrrigationError::NotFound(format!("farm {farm_id}")));
        }
        let crop = Crop {
            id: new_id(),
            farm_id: farm_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO crops (id, farm_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![crop.id, crop.farm_id, crop.name, crop.created_at.to_rfc3339()],
        )
        .map_err(|e| IrrigationError::Store(format!("Create crop: {e}")))?;
        Ok(crop)
    }

    // ─── Schedules ─────────────────────────────────────────────

    /// Create a schedule; its first due instant is the next occurrence of
    /// its time of day after `now`.
    pub fn create_schedule(&self, new: &NewSchedule, now: DateTime<Utc>, offset: FixedOffset) -> Result<Schedule> {
        new.validate()?;
        let conn = self.conn()?;
        let crop_farm: Option<String> = conn
            .query_row("SELECT farm_id FROM crops WHERE id = ?1", [&new.crop_id], |r| r.get(0))
            .optional()
            .map_err(IrrigationError::store)?;
        match crop_farm {
            None => return Err(IrrigationError::NotFound(format!("crop {}", new.crop_id))),
            Some(farm) if farm != new.farm_id => {
                return Err(IrrigationError::InvalidInput(format!(
                    "crop {} does not belong to farm {}",
                    new.crop_id, new.farm_id
                )));
            }
            Some(_) => {}
        }

        // Stored as 'HH:MM'; next_due must carry the same time of day.
        let time_of_day = truncate_to_minute(new.time_of_day);
        let schedule = Schedule {
            id: new_id(),
            farm_id: new.farm_id.clone(),
            crop_id: new.crop_id.clone(),
            frequency_days: new.frequency_days,
            duration_minutes: new.duration_minutes,
            time_of_day,
            active: true,
            next_due: next_occurrence(now, time_of_day, offset),
            created_at: now,
        };
        conn.execute(
            "INSERT INTO irrigation_schedules
             (id, farm_id, crop_id, frequency_days, duration_minutes, time_of_day, active, next_due, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)",
            params![
                schedule.id,
                schedule.farm_id,
                schedule.crop_id,
                schedule.frequency_days,
                schedule.duration_minutes,
                schedule.time_of_day.format("%H:%M").to_string(),
                schedule.next_due.to_rfc3339(),
                schedule.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| IrrigationError::Store(format!("Create schedule: {e}")))?;
        tracing::info!("📅 Schedule created: {} (every {}d at {})", schedule.id, schedule.frequency_days, schedule.time_of_day.format("%H:%M"));
        Ok(schedule)
    }

    /// All schedules, active or not, joined with display names.
    pub fn list_schedules(&self) -> Result<Vec<ScheduleView>> {
        self.query_views(&format!("{SCHEDULE_VIEW_SELECT} ORDER BY s.next_due"), [])
    }

    pub fn get_schedule_view(&self, id: &str) -> Result<Option<ScheduleView>> {
        let mut views = self.query_views(&format!("{SCHEDULE_VIEW_SELECT} WHERE s.id = ?1"), [id])?;
        Ok(views.pop())
    }

    /// Soft activate/deactivate.
    pub fn set_schedule_active(&self, id: &str, active: bool) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE irrigation_schedules SET active = ?1 WHERE id = ?2",
                params![active as i32, id],
            )
            .map_err(|e| IrrigationError::Store(format!("Set active: {e}")))?;
        if changed == 0 {
            return Err(IrrigationError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub fn delete_schedule(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute("DELETE FROM irrigation_schedules WHERE id = ?1", [id])
            .map_err(|e| IrrigationError::Store(format!("Delete schedule: {e}")))?;
        Ok(changed > 0)
    }

    fn query_views<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ScheduleView>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(IrrigationError::store)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(ScheduleView {
                    schedule: schedule_from_row(row)?,
                    farm_name: row.get(9)?,
                    crop_name: row.get(10)?,
                    owner_phone: row.get(11)?,
                })
            })
            .map_err(IrrigationError::store)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IrrigationError::store)
    }
}

#[async_trait]
impl ScheduleStore for IrrigationDb {
    async fn active_schedules(&self) -> Result<Vec<ScheduleView>> {
        self.query_views(&format!("{SCHEDULE_VIEW_SELECT} WHERE s.active = 1 ORDER BY s.next_due"), [])
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, farm_id, crop_id, frequency_days, duration_minutes, time_of_day, active, next_due, created_at
             FROM irrigation_schedules WHERE id = ?1",
            [id],
            schedule_from_row,
        )
        .optional()
        .map_err(IrrigationError::store)
    }

    async fn update_next_due(&self, id: &str, next_due: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE irrigation_schedules SET next_due = ?1 WHERE id = ?2",
                params![next_due.to_rfc3339(), id],
            )
            .map_err(|e| IrrigationError::Store(format!("Update next_due: {e}")))?;
        if changed == 0 {
            return Err(IrrigationError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for IrrigationDb {
    async fn insert_log(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let log = LogEntry {
            id: new_id(),
            schedule_id: entry.schedule_id,
            farm_id: entry.farm_id,
            duration_minutes: entry.duration_minutes,
            water_used: entry.water_used,
            completed: entry.completed,
            notes: entry.notes,
            created_at: entry.created_at,
        };
        self.conn()?
            .execute(
                "INSERT INTO irrigation_logs
                 (id, schedule_id, farm_id, duration_minutes, water_used, completed, notes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    log.id,
                    log.schedule_id,
                    log.farm_id,
                    log.duration_minutes,
                    log.water_used,
                    log.completed as i32,
                    log.notes,
                    log.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| IrrigationError::Store(format!("Insert log: {e}")))?;
        Ok(log)
    }

    async fn logs_for_schedule(&self, schedule_id: &str) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, schedule_id, farm_id, duration_minutes, water_used, completed, notes, created_at
                 FROM irrigation_logs WHERE schedule_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(IrrigationError::store)?;
        let rows = stmt
            .query_map([schedule_id], |row| {
                Ok(LogEntry {
                    id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    farm_id: row.get(2)?,
                    duration_minutes: row.get(3)?,
                    water_used: row.get(4)?,
                    completed: row.get::<_, i32>(5)? != 0,
                    notes: row.get(6)?,
                    created_at: parse_ts(row, 7)?,
                })
            })
            .map_err(IrrigationError::store)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(IrrigationError::store)
    }
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let tod: String = row.get(5)?;
    let time_of_day = NaiveTime::parse_from_str(&tod, "%H:%M")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(Schedule {
        id: row.get(0)?,
        farm_id: row.get(1)?,
        crop_id: row.get(2)?,
        frequency_days: row.get(3)?,
        duration_minutes: row.get(4)?,
        time_of_day,
        active: row.get::<_, i32>(6)? != 0,
        next_due: parse_ts(row, 7)?,
        created_at: parse_ts(row, 8)?,
    })
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    conn.query_row(sql, [id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
        .map_err(IrrigationError::store)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
