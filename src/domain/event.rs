//! Domain events broadcast to stations, and the payloads they carry.
//!
//! Every event is rebuilt from exactly one persisted `ActionLogEntry`: the event id is
//! the entry id and the payload is the entry detail. Live events and snapshot catch-up
//! therefore describe the same history and can be de-duplicated by id.

use crate::domain::action_log::{ActionKind, ActionLogEntry};
use crate::domain::distribution::Distribution;
use crate::domain::payment::Payment;
use crate::domain::student::Student;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: u64,
    pub kind: ActionKind,
    pub student_id: Option<String>,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }
}

impl From<&ActionLogEntry> for DomainEvent {
    fn from(entry: &ActionLogEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            student_id: entry.student_id.clone(),
            payload: entry.detail.clone(),
            emitted_at: entry.recorded_at,
        }
    }
}

/// `student_registered`, `student_updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentPayload {
    pub student: Student,
}

/// `payment_processed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    pub payment: Payment,
    pub student: Student,
    pub became_paid: bool,
    pub created_student: bool,
}

/// `distribution_created`, `distribution_verified`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPayload {
    pub distribution: Distribution,
}

/// `complimentary_issued`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplimentaryPayload {
    pub student: Student,
    pub distribution: Distribution,
}

/// A roster row that was skipped during import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    pub line: u64,
    pub student_id: Option<String>,
    pub reason: String,
}

/// Outcome of an import. `created`, `updated` and `unchanged` count distinct students;
/// `rejected` lists rows, ordered by source line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: Vec<RowRejection>,
}

/// `roster_imported`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPayload {
    pub report: ImportReport,
    /// Students created or changed by the batch, in their persisted form.
    pub students: Vec<Student>,
}

/// `roster_wiped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WipePayload {
    pub students_removed: usize,
}

/// `logs_purged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgePayload {
    /// Every entry with a smaller id was deleted.
    pub purged_before: u64,
}
