use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Who issued a command: the station it came from and the operator signed in there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub station: String,
    pub operator: String,
}

impl Actor {
    pub fn new(station: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            operator: operator.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    StudentRegistered,
    PaymentProcessed,
    DistributionCreated,
    DistributionVerified,
    ComplimentaryIssued,
    RosterImported,
    StudentUpdated,
    RosterWiped,
    LogsPurged,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::StudentRegistered => "student_registered",
            ActionKind::PaymentProcessed => "payment_processed",
            ActionKind::DistributionCreated => "distribution_created",
            ActionKind::DistributionVerified => "distribution_verified",
            ActionKind::ComplimentaryIssued => "complimentary_issued",
            ActionKind::RosterImported => "roster_imported",
            ActionKind::StudentUpdated => "student_updated",
            ActionKind::RosterWiped => "roster_wiped",
            ActionKind::LogsPurged => "logs_purged",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record of a mutating command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: u64,
    pub kind: ActionKind,
    pub student_id: Option<String>,
    pub detail: Value,
    pub station: String,
    pub operator: String,
    pub recorded_at: DateTime<Utc>,
}

impl ActionLogEntry {
    pub fn new<T: Serialize>(
        id: u64,
        kind: ActionKind,
        student_id: Option<&str>,
        detail: &T,
        actor: &Actor,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id,
            kind,
            student_id: student_id.map(str::to_string),
            detail: serde_json::to_value(detail)?,
            station: actor.station.clone(),
            operator: actor.operator.clone(),
            recorded_at: Utc::now(),
        })
    }
}

/// Filter for querying the action log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub kind: Option<ActionKind>,
    pub student_id: Option<String>,
    /// Newest `limit` entries; zero means no limit.
    pub limit: usize,
}

impl LogFilter {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &ActionLogEntry) -> bool {
        self.kind.is_none_or(|kind| kind == entry.kind)
            && self
                .student_id
                .as_deref()
                .is_none_or(|id| entry.student_id.as_deref() == Some(id))
    }
}
