use super::action_log::{ActionLogEntry, LogFilter};
use super::distribution::Distribution;
use super::payment::Payment;
use super::student::Student;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Tables that hand out surrogate ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Students,
    Distributions,
    Payments,
    ActionLogs,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Students => "students",
            Table::Distributions => "distributions",
            Table::Payments => "payments",
            Table::ActionLogs => "action_logs",
        }
    }
}

/// Everything one command writes, applied by the ledger as a single transaction.
///
/// Order of application: wipe, purge, then upserts and inserts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub wipe_roster: bool,
    pub purge_logs_before: Option<u64>,
    pub students: Vec<Student>,
    pub distributions: Vec<Distribution>,
    pub payments: Vec<Payment>,
    pub logs: Vec<ActionLogEntry>,
}

impl ChangeSet {
    pub fn logged(entry: ActionLogEntry) -> Self {
        Self {
            logs: vec![entry],
            ..Self::default()
        }
    }
}

/// The authoritative store behind the coordinator.
///
/// Every call is atomic on its own. `commit` is the only write path.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reserves the next id of a table's sequence. Ids are never handed out twice.
    async fn next_id(&self, table: Table) -> Result<u64>;

    async fn student(&self, student_id: &str) -> Result<Option<Student>>;
    async fn students(&self) -> Result<Vec<Student>>;
    async fn distribution(&self, id: u64) -> Result<Option<Distribution>>;
    async fn distributions_for(&self, student_id: &str) -> Result<Vec<Distribution>>;
    async fn payments_for(&self, student_id: &str) -> Result<Vec<Payment>>;

    /// Newest entries matching the filter, returned oldest first.
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<ActionLogEntry>>;

    /// Applies the change set atomically: either every write lands or none does.
    /// Payments and log entries are immutable; re-inserting an existing id fails.
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

pub type LedgerBox = Arc<dyn LedgerStore>;
