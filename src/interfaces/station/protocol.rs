//! Newline-delimited JSON spoken between stations and the hub.
//!
//! A request is one JSON object on one line; every request gets exactly one reply line.
//! After `subscribe`, the hub also pushes `event` lines on the same connection.

use crate::application::command::{CommandOutcome, StationCommand};
use crate::broadcast::ConnectionId;
use crate::domain::action_log::Actor;
use crate::domain::event::DomainEvent;
use crate::domain::money::Money;
use crate::error::{Entity, Result, StationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StationRequest {
    /// Recent history, oldest first. Zero asks for the hub's maximum.
    Snapshot {
        #[serde(default)]
        limit: usize,
    },
    Subscribe {
        station: String,
    },
    Command {
        actor: Actor,
        command: StationCommand,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StationReply {
    Ok { outcome: CommandOutcome },
    Snapshot { events: Vec<DomainEvent> },
    Subscribed { connection: ConnectionId },
    Event { event: DomainEvent },
    Error { error: WireError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    InsufficientPayment,
    StoreUnavailable,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub owed: Money,
    pub tendered: Money,
    pub shortfall: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Missing {
    pub entity: Entity,
    pub key: String,
}

/// A `StationError` as it travels to a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Shortfall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Missing>,
}

impl WireError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            shortfall: None,
            missing: None,
        }
    }

    pub fn malformed(err: &StationError) -> Self {
        Self::new(ErrorCode::Validation, format!("malformed request: {err}"))
    }

    /// Rebuilds the typed error on the station side.
    pub fn into_error(self) -> StationError {
        match (self.code, self.shortfall, self.missing) {
            (ErrorCode::Validation, _, _) => StationError::Validation(self.message),
            (ErrorCode::NotFound, _, Some(missing)) => StationError::NotFound {
                entity: missing.entity,
                key: missing.key,
            },
            (ErrorCode::InsufficientPayment, Some(s), _) => StationError::InsufficientPayment {
                owed: s.owed,
                tendered: s.tendered,
                shortfall: s.shortfall,
            },
            (ErrorCode::StoreUnavailable, _, _) => StationError::StoreUnavailable(self.message),
            _ => StationError::Internal(self.message),
        }
    }
}

impl From<&StationError> for WireError {
    fn from(err: &StationError) -> Self {
        match err {
            StationError::Validation(message) => Self::new(ErrorCode::Validation, message.clone()),
            StationError::NotFound { entity, key } => Self {
                missing: Some(Missing {
                    entity: *entity,
                    key: key.clone(),
                }),
                ..Self::new(ErrorCode::NotFound, err.to_string())
            },
            StationError::InsufficientPayment {
                owed,
                tendered,
                shortfall,
            } => Self {
                shortfall: Some(Shortfall {
                    owed: *owed,
                    tendered: *tendered,
                    shortfall: *shortfall,
                }),
                ..Self::new(ErrorCode::InsufficientPayment, err.to_string())
            },
            StationError::StoreUnavailable(message) => {
                Self::new(ErrorCode::StoreUnavailable, message.clone())
            }
            other => Self::new(ErrorCode::Internal, other.to_string()),
        }
    }
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}

/// Writes one message followed by a newline and flushes it.
pub async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
