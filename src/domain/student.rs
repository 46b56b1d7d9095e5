use crate::domain::money::Money;
use crate::error::{Result, StationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix reserved for synthetic ids minted by complimentary issuance.
pub const COMPLIMENTARY_PREFIX: &str = "COMP-";

const MAX_STUDENT_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Free,
}

/// Order-line flags: which items the student is entitled to pick up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Entitlements {
    pub yearbook: bool,
    pub personalization: bool,
    pub autograph_supplement: bool,
    pub clear_cover: bool,
}

/// A student on the roster.
///
/// `balance` is zero exactly when `status` is `Paid` or `Free`; every mutator below keeps
/// that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    /// Surrogate key assigned by the ledger.
    pub id: u64,
    /// External-facing student id, unique across the roster.
    pub student_id: String,
    pub name: String,
    pub balance: Money,
    pub status: PaymentStatus,
    pub entitlements: Entitlements,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(id: u64, student_id: impl Into<String>, name: impl Into<String>, owed: Money) -> Self {
        let status = if owed.is_zero() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Unpaid
        };
        Self {
            id,
            student_id: student_id.into(),
            name: name.into(),
            balance: owed,
            status,
            entitlements: Entitlements::default(),
            created_at: Utc::now(),
        }
    }

    pub fn complimentary(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            student_id: complimentary_id(id),
            name: name.into(),
            balance: Money::ZERO,
            status: PaymentStatus::Free,
            entitlements: Entitlements::default(),
            created_at: Utc::now(),
        }
    }

    /// Applies a settled amount to the balance. Returns true when this payment moved the
    /// student from `Unpaid` to `Paid`.
    pub fn apply_payment(&mut self, applied: Money) -> bool {
        self.balance = self.balance.saturating_sub(applied);
        if self.balance.is_zero() && self.status == PaymentStatus::Unpaid {
            self.status = PaymentStatus::Paid;
            true
        } else {
            false
        }
    }

    /// Administrative balance change; the status follows the new balance.
    pub fn set_balance(&mut self, balance: Money) {
        self.balance = balance;
        self.status = match (balance.is_zero(), self.status) {
            (false, _) => PaymentStatus::Unpaid,
            (true, PaymentStatus::Free) => PaymentStatus::Free,
            (true, _) => PaymentStatus::Paid,
        };
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, PaymentStatus::Paid | PaymentStatus::Free)
    }

    pub fn is_consistent(&self) -> bool {
        self.balance.is_zero() == self.is_settled()
    }
}

pub fn complimentary_id(surrogate: u64) -> String {
    format!("{COMPLIMENTARY_PREFIX}{surrogate:06}")
}

/// Normalizes an external student id entered at a station or read from a roster file.
pub fn validate_student_id(raw: &str) -> Result<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(StationError::Validation("student id is required".to_string()));
    }
    if id.len() > MAX_STUDENT_ID_LEN {
        return Err(StationError::Validation(format!(
            "student id longer than {MAX_STUDENT_ID_LEN} characters"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(StationError::Validation(
            "student id contains control characters".to_string(),
        ));
    }
    if id.to_ascii_uppercase().starts_with(COMPLIMENTARY_PREFIX) {
        return Err(StationError::Validation(format!(
            "student ids starting with {COMPLIMENTARY_PREFIX} are reserved"
        )));
    }
    Ok(id.to_string())
}

pub fn validate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        Err(StationError::Validation("name is required".to_string()))
    } else {
        Ok(name.to_string())
    }
}
