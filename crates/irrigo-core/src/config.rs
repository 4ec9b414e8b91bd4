//! Irrigo configuration system.

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IrrigationError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrrigoConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub soil: SoilConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_data_dir() -> String { "~/.irrigo".into() }

impl Default for IrrigoConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            scheduler: SchedulerConfig::default(),
            sms: SmsConfig::default(),
            notifications: NotificationConfig::default(),
            soil: SoilConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl IrrigoConfig {
    /// Load config from the default path (~/.irrigo/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default().with_env_overrides())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| IrrigationError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| IrrigationError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| IrrigationError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Irrigo home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".irrigo")
    }

    /// Data directory with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).to_string())
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.scan_interval_secs == 0 {
            return Err(IrrigationError::Config("scheduler.scan_interval_secs must be > 0".into()));
        }
        if self.scheduler.due_window_minutes <= 0 {
            return Err(IrrigationError::Config("scheduler.due_window_minutes must be > 0".into()));
        }
        // FixedOffset only accepts offsets strictly inside one day.
        if self.scheduler.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(IrrigationError::Config(format!(
                "scheduler.utc_offset_minutes out of range: {}",
                self.scheduler.utc_offset_minutes
            )));
        }
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("IRRIGO_SMS_API_KEY") {
            if !key.is_empty() {
                self.sms.api_key = key;
            }
        }
        self
    }
}

/// Due-irrigation scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
    /// How far ahead a schedule counts as due soon.
    #[serde(default = "default_due_window")]
    pub due_window_minutes: i64,
    /// Notifications older than this are pruned on every scan.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Offset used for calendar days and schedule time-of-day.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_scan_interval() -> u64 { 300 }
fn default_startup_delay() -> u64 { 5 }
fn default_due_window() -> i64 { 60 }
fn default_retention_days() -> i64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            startup_delay_secs: default_startup_delay(),
            due_window_minutes: default_due_window(),
            retention_days: default_retention_days(),
            utc_offset_minutes: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// SMS gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// HTTP endpoint accepting `{to, from, message}` JSON.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_sms_timeout")]
    pub timeout_secs: u64,
}

fn default_sender() -> String { "IRRIGO".into() }
fn default_sms_timeout() -> u64 { 10 }

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key: String::new(),
            sender: default_sender(),
            timeout_secs: default_sms_timeout(),
        }
    }
}

/// Notification center configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "bool_true")]
    pub platform_enabled: bool,
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
}

fn bool_true() -> bool { true }
fn default_storage_key() -> String { "irrigation_notifications".into() }

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            platform_enabled: true,
            storage_key: default_storage_key(),
        }
    }
}

/// Soil-moisture alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilConfig {
    #[serde(default = "default_low_moisture")]
    pub low_moisture_percent: f64,
}

fn default_low_moisture() -> f64 { 30.0 }

impl Default for SoilConfig {
    fn default() -> Self {
        Self { low_moisture_percent: default_low_moisture() }
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 { 3030 }
fn default_host() -> String { "127.0.0.1".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}
