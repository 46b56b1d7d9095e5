use crate::domain::action_log::Actor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A physical hand-off of an item to a student, pending a second check.
///
/// `verified_at` and `verified_by` are set if and only if `verified` is true, and
/// verification only ever goes from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub id: u64,
    pub student_id: String,
    pub operator: String,
    pub station: String,
    pub distributed_at: DateTime<Utc>,
    pub verified: bool,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Distribution {
    pub fn new(id: u64, student_id: impl Into<String>, actor: &Actor) -> Self {
        Self {
            id,
            student_id: student_id.into(),
            operator: actor.operator.clone(),
            station: actor.station.clone(),
            distributed_at: Utc::now(),
            verified: false,
            verified_by: None,
            verified_at: None,
        }
    }

    /// Marks the hand-off as checked. Returns false, leaving the record untouched, when it
    /// was already verified.
    pub fn verify(&mut self, verifier: &str) -> bool {
        if self.verified {
            return false;
        }
        self.verified = true;
        self.verified_by = Some(verifier.to_string());
        self.verified_at = Some(Utc::now());
        true
    }

    /// The record as it looked before verification.
    pub fn as_created(&self) -> Self {
        Self {
            verified: false,
            verified_by: None,
            verified_at: None,
            ..self.clone()
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.verified == self.verified_at.is_some() && self.verified == self.verified_by.is_some()
    }
}
