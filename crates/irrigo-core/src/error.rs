//! Error taxonomy shared by every Irrigo crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrrigationError {
    /// Read or write against a backing store failed. Transient; retried next cycle.
    #[error("store error: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An external side effect (SMS, webhook) failed.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl IrrigationError {
    pub fn store(e: impl std::fmt::Display) -> Self {
        Self::Store(e.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, IrrigationError>;
