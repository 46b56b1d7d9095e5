//! Roster rows and how a single row reconciles against an existing student.
//!
//! Rows are keyed by external student id, never by position, so importing the same file
//! twice converges on the same roster. A blank cell means "not provided" and leaves the
//! stored value alone.

use crate::domain::event::RowRejection;
use crate::domain::money::Money;
use crate::domain::student::{Entitlements, Student, validate_name, validate_student_id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ID_COLUMNS: &[&str] = &["student_id", "studentid", "id", "student_number"];
const NAME_COLUMNS: &[&str] = &["name", "student_name", "full_name"];
const BALANCE_COLUMNS: &[&str] = &["balance", "owed", "amount_owed", "balance_owed"];

/// One raw roster record: header name to cell text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosterRow {
    /// Source line, for error reporting.
    pub line: u64,
    pub fields: BTreeMap<String, String>,
}

impl RosterRow {
    pub fn new<I, K, V>(line: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            line,
            fields: fields
                .into_iter()
                .map(|(k, v)| (normalize_header(k.as_ref()), v.into()))
                .collect(),
        }
    }

    /// First non-blank cell among the given column aliases.
    fn cell(&self, columns: &[&str]) -> Option<&str> {
        columns
            .iter()
            .filter_map(|column| self.fields.get(*column))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }
}

pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EntitlementPatch {
    yearbook: Option<bool>,
    personalization: Option<bool>,
    autograph_supplement: Option<bool>,
    clear_cover: Option<bool>,
}

impl EntitlementPatch {
    fn apply(&self, target: &mut Entitlements) {
        if let Some(v) = self.yearbook {
            target.yearbook = v;
        }
        if let Some(v) = self.personalization {
            target.personalization = v;
        }
        if let Some(v) = self.autograph_supplement {
            target.autograph_supplement = v;
        }
        if let Some(v) = self.clear_cover {
            target.clear_cover = v;
        }
    }
}

/// A parsed row: only the fields the row actually provided.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RowUpdate {
    pub line: u64,
    pub student_id: String,
    name: Option<String>,
    balance: Option<Money>,
    entitlements: EntitlementPatch,
}

impl RowUpdate {
    pub fn parse(row: &RosterRow) -> Result<Self, RowRejection> {
        let reject = |student_id: Option<&str>, reason: String| RowRejection {
            line: row.line,
            student_id: student_id.map(str::to_string),
            reason,
        };

        let student_id = row
            .cell(ID_COLUMNS)
            .ok_or_else(|| reject(None, "missing student id".to_string()))?
            .to_string();

        let balance = row
            .cell(BALANCE_COLUMNS)
            .map(|raw| {
                raw.parse::<Money>()
                    .map_err(|e| reject(Some(student_id.as_str()), e.to_string()))
            })
            .transpose()?;

        let flag = |column: &str| -> Result<Option<bool>, RowRejection> {
            row.cell(&[column])
                .map(|raw| {
                    parse_flag(raw).ok_or_else(|| {
                        reject(
                            Some(student_id.as_str()),
                            format!("invalid value '{raw}' for {column}"),
                        )
                    })
                })
                .transpose()
        };
        let entitlements = EntitlementPatch {
            yearbook: flag("yearbook")?,
            personalization: flag("personalization")?,
            autograph_supplement: flag("autograph_supplement")?,
            clear_cover: flag("clear_cover")?,
        };

        Ok(Self {
            line: row.line,
            name: row.cell(NAME_COLUMNS).map(str::to_string),
            student_id,
            balance,
            entitlements,
        })
    }

    /// Applies the provided fields to an existing student.
    pub fn apply(&self, student: &mut Student) {
        if let Some(name) = &self.name {
            student.name = name.clone();
        }
        if let Some(balance) = self.balance {
            student.set_balance(balance);
        }
        self.entitlements.apply(&mut student.entitlements);
    }

    /// Checks that the row carries enough to create a new student.
    pub fn validate_new(&self) -> Result<(), RowRejection> {
        let reject = |reason: String| RowRejection {
            line: self.line,
            student_id: Some(self.student_id.clone()),
            reason,
        };
        validate_student_id(&self.student_id).map_err(|e| reject(e.to_string()))?;
        if self.balance.is_none() {
            return Err(reject("balance is required for a new student".to_string()));
        }
        Ok(())
    }

    /// Builds a new student from a row that passed `validate_new`.
    pub fn create(&self, id: u64) -> Student {
        let name = self
            .name
            .as_deref()
            .and_then(|n| validate_name(n).ok())
            .unwrap_or_else(|| self.student_id.clone());
        let mut student = Student::new(
            id,
            self.student_id.clone(),
            name,
            self.balance.unwrap_or(Money::ZERO),
        );
        self.entitlements.apply(&mut student.entitlements);
        student
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "x" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::student::PaymentStatus;
    use rust_decimal_macros::dec;

    fn row(fields: &[(&str, &str)]) -> RosterRow {
        RosterRow::new(2, fields.iter().copied())
    }

    #[test]
    fn test_headers_are_normalized() {
        let r = row(&[(" Student ID ", "S1"), ("Full-Name", "Ada")]);
        assert_eq!(r.fields.get("student_id").map(String::as_str), Some("S1"));
        assert_eq!(r.fields.get("full_name").map(String::as_str), Some("Ada"));
    }

    #[test]
    fn test_parse_rejects_missing_id_and_bad_numbers() {
        let missing = RowUpdate::parse(&row(&[("student_id", "  "), ("name", "Ada")]));
        assert_eq!(missing.unwrap_err().reason, "missing student id");

        let bad_balance = RowUpdate::parse(&row(&[("student_id", "S1"), ("balance", "ten")]))
            .unwrap_err();
        assert_eq!(bad_balance.student_id.as_deref(), Some("S1"));

        let bad_flag =
            RowUpdate::parse(&row(&[("student_id", "S1"), ("yearbook", "maybe")])).unwrap_err();
        assert!(bad_flag.reason.contains("yearbook"));
    }

    #[test]
    fn test_apply_leaves_absent_fields_alone() {
        let mut student = Student::new(1, "S1", "Ada Lovelace", Money::new(dec!(40)).unwrap());
        student.entitlements.yearbook = true;

        let update =
            RowUpdate::parse(&row(&[("id", "S1"), ("name", ""), ("clear_cover", "x")])).unwrap();
        update.apply(&mut student);

        assert_eq!(student.name, "Ada Lovelace");
        assert_eq!(student.balance, Money::new(dec!(40)).unwrap());
        assert!(student.entitlements.yearbook);
        assert!(student.entitlements.clear_cover);
    }

    #[test]
    fn test_balance_update_rederives_status() {
        let mut student = Student::new(1, "S1", "Ada", Money::new(dec!(40)).unwrap());
        let update = RowUpdate::parse(&row(&[("student_id", "S1"), ("owed", "$0.00")])).unwrap();
        update.apply(&mut student);
        assert_eq!(student.status, PaymentStatus::Paid);
        assert!(student.is_consistent());
    }

    #[test]
    fn test_new_student_requires_balance() {
        let update = RowUpdate::parse(&row(&[("student_id", "S9"), ("name", "Ira")])).unwrap();
        assert!(update.validate_new().is_err());

        let update =
            RowUpdate::parse(&row(&[("student_id", "S9"), ("balance", "1,200.50")])).unwrap();
        assert!(update.validate_new().is_ok());
        let student = update.create(5);
        assert_eq!(student.name, "S9");
        assert_eq!(student.balance, Money::new(dec!(1200.50)).unwrap());
    }
}
