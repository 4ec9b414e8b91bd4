//! Record services on top of `KvStore`: soil-moisture readings, cost items
//! and community posts. Each keeps one JSON list under a fixed key.

use chrono::{DateTime, NaiveDate, Utc};
use irrigo_core::model::start_of_local_day;
use irrigo_core::{IrrigationError, NewNotification, NotificationKind, Priority, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::kv::{self, KvStore};
use crate::notify::NotificationCenter;

/// Anything stored in a repository carries a string id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync {
    fn id(&self) -> &str;
}

/// Typed list persisted under one key. Every write overwrites the list.
pub struct Repository<T> {
    kv: Arc<dyn KvStore>,
    key: String,
    _marker: PhantomData<T>,
}

impl<T: Record> Repository<T> {
    pub fn new(kv: Arc<dyn KvStore>, key: &str) -> Self {
        Self {
            kv,
            key: key.to_string(),
            _marker: PhantomData,
        }
    }

    /// All records; a corrupt document reads as empty.
    pub fn all(&self) -> Vec<T> {
        kv::load_list(self.kv.as_ref(), &self.key)
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.all().into_iter().find(|r| r.id() == id)
    }

    pub fn insert(&self, record: T) -> Result<T> {
        let mut items = self.all();
        items.push(record.clone());
        kv::save_list(self.kv.as_ref(), &self.key, &items)?;
        Ok(record)
    }

    /// Apply `f` to the record with `id` and persist.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut T)) -> Result<T> {
        let mut items = self.all();
        let record = items
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| IrrigationError::NotFound(format!("{} record {id}", self.key)))?;
        f(record);
        let updated = record.clone();
        kv::save_list(self.kv.as_ref(), &self.key, &items)?;
        Ok(updated)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut items = self.all();
        let before = items.len();
        items.retain(|r| r.id() != id);
        if items.len() == before {
            return Ok(false);
        }
        kv::save_list(self.kv.as_ref(), &self.key, &items)?;
        Ok(true)
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Soil moisture ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoilMoistureReading {
    pub id: String,
    pub farm_id: String,
    /// Volumetric moisture, 0–100.
    pub moisture_percent: f64,
    #[serde(default)]
    pub sensor: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Record for SoilMoistureReading {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Soil readings plus the low-moisture alert rule.
pub struct SoilMoistureLog {
    repo: Repository<SoilMoistureReading>,
    low_moisture_percent: f64,
    offset: chrono::FixedOffset,
}

impl SoilMoistureLog {
    pub const KEY: &'static str = "soil_moisture_readings";

    pub fn new(kv: Arc<dyn KvStore>, low_moisture_percent: f64, offset: chrono::FixedOffset) -> Self {
        Self {
            repo: Repository::new(kv, Self::KEY),
            low_moisture_percent,
            offset,
        }
    }

    /// Store a reading. Below the threshold this raises a soil-moisture
    /// alert, at most one unread per farm per local day.
    pub fn record(
        &self,
        farm_id: &str,
        moisture_percent: f64,
        sensor: Option<String>,
        center: &mut NotificationCenter,
        now: DateTime<Utc>,
    ) -> Result<SoilMoistureReading> {
        if !(0.0..=100.0).contains(&moisture_percent) {
            return Err(IrrigationError::InvalidInput(format!(
                "moisture_percent must be within 0..=100, got {moisture_percent}"
            )));
        }
        let reading = self.repo.insert(SoilMoistureReading {
            id: new_id(),
            farm_id: farm_id.to_string(),
            moisture_percent,
            sensor,
            recorded_at: now,
        })?;

        let since = Some(start_of_local_day(now, self.offset));
        if moisture_percent < self.low_moisture_percent
            && !center.has_unread_for_farm(farm_id, NotificationKind::SoilMoistureAlert, since)
        {
            let mut alert = NewNotification::new(
                NotificationKind::SoilMoistureAlert,
                "Low soil moisture",
                &format!(
                    "Soil moisture reading of {moisture_percent:.1}% is below the {:.0}% threshold",
                    self.low_moisture_percent
                ),
                Priority::High,
            )
            .with_action(serde_json::json!({
                "reading_id": reading.id,
                "moisture_percent": moisture_percent,
                "threshold": self.low_moisture_percent,
            }));
            alert.farm_id = Some(farm_id.to_string());
            center.add(alert, now);
        }
        Ok(reading)
    }

    pub fn readings_for_farm(&self, farm_id: &str) -> Vec<SoilMoistureReading> {
        let mut readings: Vec<_> = self.repo.all().into_iter().filter(|r| r.farm_id == farm_id).collect();
        readings.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        readings
    }

    pub fn latest_for_farm(&self, farm_id: &str) -> Option<SoilMoistureReading> {
        self.readings_for_farm(farm_id).into_iter().next()
    }
}

// ─── Costs ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Water,
    Energy,
    Labor,
    Equipment,
    Maintenance,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostItem {
    pub id: String,
    pub farm_id: String,
    pub category: CostCategory,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    pub incurred_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Record for CostItem {
    fn id(&self) -> &str {
        &self.id
    }
}

pub struct CostLedger {
    repo: Repository<CostItem>,
}

impl CostLedger {
    pub const KEY: &'static str = "irrigation_costs";

    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            repo: Repository::new(kv, Self::KEY),
        }
    }

    pub fn add(
        &self,
        farm_id: &str,
        category: CostCategory,
        amount: f64,
        description: &str,
        incurred_on: NaiveDate,
    ) -> Result<CostItem> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(IrrigationError::InvalidInput(format!("amount must be >= 0, got {amount}")));
        }
        self.repo.insert(CostItem {
            id: new_id(),
            farm_id: farm_id.to_string(),
            category,
            amount,
            description: description.to_string(),
            incurred_on,
            created_at: Utc::now(),
        })
    }

    /// Newest first.
    pub fn for_farm(&self, farm_id: &str) -> Vec<CostItem> {
        let mut items: Vec<_> = self.repo.all().into_iter().filter(|c| c.farm_id == farm_id).collect();
        items.sort_by(|a, b| b.incurred_on.cmp(&a.incurred_on));
        items
    }

    pub fn total_for_farm(&self, farm_id: &str) -> f64 {
        self.for_farm(farm_id).iter().map(|c| c.amount).sum()
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.repo.remove(id)
    }
}

// ─── Community ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunityPost {
    pub id: String,
    pub author: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub likes: u32,
    pub created_at: DateTime<Utc>,
}

impl Record for CommunityPost {
    fn id(&self) -> &str {
        &self.id
    }
}

pub struct CommunityBoard {
    repo: Repository<CommunityPost>,
}

impl CommunityBoard {
    pub const KEY: &'static str = "community_posts";

    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            repo: Repository::new(kv, Self::KEY),
        }
    }

    pub fn post(&self, author: &str, title: &str, body: &str) -> Result<CommunityPost> {
        if title.trim().is_empty() {
            return Err(IrrigationError::InvalidInput("post title is required".into()));
        }
        self.repo.insert(CommunityPost {
            id: new_id(),
            author: author.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            likes: 0,
            created_at: Utc::now(),
        })
    }

    /// Newest first.
    pub fn list(&self) -> Vec<CommunityPost> {
        let mut posts = self.repo.all();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts
    }

    pub fn get(&self, id: &str) -> Option<CommunityPost> {
        self.repo.get(id)
    }

    pub fn like(&self, id: &str) -> Result<CommunityPost> {
        self.repo.update(id, |p| p.likes += 1)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        self.repo.remove(id)
    }
}
