use crate::domain::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of record a `NotFound` failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Student,
    Distribution,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Student => f.write_str("student"),
            Entity::Distribution => f.write_str("distribution"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StationError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{entity} not found: {key}")]
    NotFound { entity: Entity, key: String },
    #[error("insufficient payment: owed {owed}, tendered {tendered}, short by {shortfall}")]
    InsufficientPayment {
        owed: Money,
        tendered: Money,
        shortfall: Money,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("station link disconnected after {attempts} attempts")]
    Disconnected { attempts: u32 },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StationError {
    pub fn student_not_found(student_id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: Entity::Student,
            key: student_id.into(),
        }
    }

    pub fn distribution_not_found(id: u64) -> Self {
        Self::NotFound {
            entity: Entity::Distribution,
            key: id.to_string(),
        }
    }

    /// Only store outages are worth retrying; every other failure is a definitive answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, StationError::StoreUnavailable(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for StationError {
    fn from(err: rocksdb::Error) -> Self {
        StationError::StoreUnavailable(err.into_string())
    }
}

pub type Result<T> = std::result::Result<T, StationError>;
