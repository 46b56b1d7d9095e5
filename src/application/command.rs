//! Commands a station can submit and the outcomes the coordinator answers with.

use crate::application::import::RosterRow;
use crate::domain::distribution::Distribution;
use crate::domain::event::{ImportReport, PurgePayload, WipePayload};
use crate::domain::money::Money;
use crate::domain::payment::Payment;
use crate::domain::settlement::{BillCounts, Settlement};
use crate::domain::student::{Entitlements, Student};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum StationCommand {
    RegisterOrCreate {
        student_id: String,
        name: String,
        owed: Money,
    },
    ProcessPayment(PaymentRequest),
    CreateDistribution {
        student_id: String,
    },
    VerifyDistribution {
        distribution_id: u64,
    },
    IssueComplimentary {
        name: String,
    },
    Import {
        rows: Vec<RosterRow>,
    },
    UpdateStudent(StudentEdit),
    WipeRoster,
    PurgeLogs,
}

impl StationCommand {
    pub fn name(&self) -> &'static str {
        match self {
            StationCommand::RegisterOrCreate { .. } => "register_or_create",
            StationCommand::ProcessPayment(_) => "process_payment",
            StationCommand::CreateDistribution { .. } => "create_distribution",
            StationCommand::VerifyDistribution { .. } => "verify_distribution",
            StationCommand::IssueComplimentary { .. } => "issue_complimentary",
            StationCommand::Import { .. } => "import",
            StationCommand::UpdateStudent(_) => "update_student",
            StationCommand::WipeRoster => "wipe_roster",
            StationCommand::PurgeLogs => "purge_logs",
        }
    }
}

/// Cash tendered at a station for one student.
///
/// `owed` (and optionally `name`) register the student on the fly when the id is not on
/// the roster yet. `amount` settles only part of the balance; without it the whole
/// balance is due.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub student_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owed: Option<Money>,
    #[serde(default)]
    pub amount: Option<Money>,
    pub tender: BillCounts,
}

impl PaymentRequest {
    pub fn new(student_id: impl Into<String>, tender: BillCounts) -> Self {
        Self {
            student_id: student_id.into(),
            tender,
            ..Self::default()
        }
    }

    pub fn registering(mut self, name: impl Into<String>, owed: Money) -> Self {
        self.name = Some(name.into());
        self.owed = Some(owed);
        self
    }

    pub fn partial(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// Administrative edit. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StudentEdit {
    pub student_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub balance: Option<Money>,
    #[serde(default)]
    pub entitlements: Option<Entitlements>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub student: Student,
    /// False when the id was already on the roster and nothing changed.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment: Payment,
    pub student: Student,
    pub settlement: Settlement,
    pub became_paid: bool,
    pub created_student: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub distribution: Distribution,
    /// False when a previous verification already stood.
    pub newly_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplimentaryIssue {
    pub student: Student,
    pub distribution: Distribution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOutcome {
    Registration(Registration),
    Payment(PaymentReceipt),
    Distribution(Distribution),
    Verification(Verification),
    Complimentary(ComplimentaryIssue),
    Import(ImportReport),
    Student(Student),
    Wiped(WipePayload),
    Purged(PurgePayload),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::settlement::Denomination;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let raw = json!({
            "command": "process_payment",
            "student_id": "S1",
            "owed": "13",
            "tender": { "ten": 1, "five": 1 }
        });
        let command: StationCommand = serde_json::from_value(raw).unwrap();
        let StationCommand::ProcessPayment(request) = command else {
            panic!("expected a payment");
        };
        assert_eq!(request.owed, Some(Money::from_units(13)));
        assert_eq!(request.tender.get(Denomination::Five), 1);
        assert!(request.amount.is_none());

        let unit: StationCommand = serde_json::from_value(json!({ "command": "wipe_roster" })).unwrap();
        assert_eq!(unit, StationCommand::WipeRoster);
        assert_eq!(unit.name(), "wipe_roster");
    }

    #[test]
    fn test_outcome_is_tagged_by_type() {
        let outcome = CommandOutcome::Purged(PurgePayload { purged_before: 7 });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value, json!({ "type": "purged", "purged_before": 7 }));
    }
}
