use crate::domain::action_log::Actor;
use crate::domain::money::Money;
use crate::domain::settlement::{BillCounts, Settlement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A settled cash payment. Immutable once recorded; corrections are new rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub student_id: String,
    pub operator: String,
    pub station: String,
    pub tender: BillCounts,
    pub applied: Money,
    pub change_due: Money,
    pub change: BillCounts,
    pub coin_remainder: Money,
    pub paid_at: DateTime<Utc>,
}

impl Payment {
    pub fn record(
        id: u64,
        student_id: impl Into<String>,
        actor: &Actor,
        tender: BillCounts,
        settlement: &Settlement,
    ) -> Self {
        Self {
            id,
            student_id: student_id.into(),
            operator: actor.operator.clone(),
            station: actor.station.clone(),
            tender,
            applied: settlement.owed,
            change_due: settlement.change_due,
            change: settlement.change,
            coin_remainder: settlement.coin_remainder,
            paid_at: Utc::now(),
        }
    }
}
