use crate::domain::action_log::{ActionLogEntry, LogFilter};
use crate::domain::distribution::Distribution;
use crate::domain::payment::Payment;
use crate::domain::ports::{ChangeSet, LedgerStore, Table};
use crate::domain::student::Student;
use crate::error::{Result, StationError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    students: BTreeMap<String, Student>,
    distributions: BTreeMap<u64, Distribution>,
    payments: BTreeMap<u64, Payment>,
    logs: BTreeMap<u64, ActionLogEntry>,
}

#[derive(Default)]
struct Sequences {
    students: AtomicU64,
    distributions: AtomicU64,
    payments: AtomicU64,
    action_logs: AtomicU64,
}

impl Sequences {
    fn for_table(&self, table: Table) -> &AtomicU64 {
        match table {
            Table::Students => &self.students,
            Table::Distributions => &self.distributions,
            Table::Payments => &self.payments,
            Table::ActionLogs => &self.action_logs,
        }
    }
}

/// A thread-safe in-memory ledger.
///
/// All four tables sit behind one `RwLock`, so a commit is applied under a single write
/// guard and readers never observe half of a command. Ideal for tests and for a hub that
/// does not need to survive restarts.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    tables: Arc<RwLock<Tables>>,
    sequences: Arc<Sequences>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn next_id(&self, table: Table) -> Result<u64> {
        Ok(self.sequences.for_table(table).fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn student(&self, student_id: &str) -> Result<Option<Student>> {
        let tables = self.tables.read().await;
        Ok(tables.students.get(student_id).cloned())
    }

    async fn students(&self) -> Result<Vec<Student>> {
        let tables = self.tables.read().await;
        Ok(tables.students.values().cloned().collect())
    }

    async fn distribution(&self, id: u64) -> Result<Option<Distribution>> {
        let tables = self.tables.read().await;
        Ok(tables.distributions.get(&id).cloned())
    }

    async fn distributions_for(&self, student_id: &str) -> Result<Vec<Distribution>> {
        let tables = self.tables.read().await;
        Ok(tables
            .distributions
            .values()
            .filter(|d| d.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn payments_for(&self, student_id: &str) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .values()
            .filter(|p| p.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<ActionLogEntry>> {
        let tables = self.tables.read().await;
        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };
        let mut entries: Vec<ActionLogEntry> = tables
            .logs
            .values()
            .rev()
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .cloned()
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut tables = self.tables.write().await;

        // Validate immutability before touching anything.
        if let Some(payment) = changes
            .payments
            .iter()
            .find(|p| tables.payments.contains_key(&p.id))
        {
            return Err(StationError::Internal(format!(
                "payment {} already recorded",
                payment.id
            )));
        }
        if let Some(entry) = changes
            .logs
            .iter()
            .find(|e| tables.logs.contains_key(&e.id))
        {
            return Err(StationError::Internal(format!(
                "log entry {} already recorded",
                entry.id
            )));
        }

        if changes.wipe_roster {
            tables.students.clear();
            tables.distributions.clear();
            tables.payments.clear();
        }
        if let Some(before) = changes.purge_logs_before {
            tables.logs.retain(|id, _| *id >= before);
        }
        for student in changes.students {
            tables.students.insert(student.student_id.clone(), student);
        }
        for distribution in changes.distributions {
            tables.distributions.insert(distribution.id, distribution);
        }
        for payment in changes.payments {
            tables.payments.insert(payment.id, payment);
        }
        for entry in changes.logs {
            tables.logs.insert(entry.id, entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action_log::{ActionKind, Actor};
    use crate::domain::money::Money;
    use serde_json::json;

    fn entry(id: u64, kind: ActionKind, student_id: Option<&str>) -> ActionLogEntry {
        ActionLogEntry::new(id, kind, student_id, &json!({}), &Actor::new("admin", "root"))
            .unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_sequences_are_per_table() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.next_id(Table::Students).await.unwrap(), 1);
        assert_eq!(ledger.next_id(Table::Students).await.unwrap(), 2);
        assert_eq!(ledger.next_id(Table::ActionLogs).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_commit_and_read() {
        let ledger = InMemoryLedger::new();
        let student = Student::new(1, "S1", "Ada", Money::from_units(10));

        let mut changes = ChangeSet::logged(entry(1, ActionKind::StudentRegistered, Some("S1")));
        changes.students.push(student.clone());
        ledger.commit(changes).await.unwrap();

        assert_eq!(ledger.student("S1").await.unwrap(), Some(student));
        assert!(ledger.student("S2").await.unwrap().is_none());
        assert_eq!(ledger.students().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_duplicate_log_atomically() {
        let ledger = InMemoryLedger::new();
        ledger
            .commit(ChangeSet::logged(entry(1, ActionKind::StudentRegistered, None)))
            .await
            .unwrap();

        let mut changes = ChangeSet::logged(entry(1, ActionKind::StudentUpdated, None));
        changes
            .students
            .push(Student::new(2, "S2", "Bea", Money::ZERO));
        assert!(ledger.commit(changes).await.is_err());

        // Nothing from the failed commit is visible.
        assert!(ledger.student("S2").await.unwrap().is_none());
        let logs = ledger.logs(&LogFilter::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, ActionKind::StudentRegistered);
    }

    #[tokio::test]
    async fn test_in_memory_logs_newest_window_oldest_first() {
        let ledger = InMemoryLedger::new();
        for id in 1..=5 {
            let kind = if id % 2 == 0 {
                ActionKind::PaymentProcessed
            } else {
                ActionKind::DistributionCreated
            };
            ledger
                .commit(ChangeSet::logged(entry(id, kind, Some("S1"))))
                .await
                .unwrap();
        }

        let recent = ledger.logs(&LogFilter::recent(3)).await.unwrap();
        let ids: Vec<u64> = recent.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let payments = ledger
            .logs(&LogFilter {
                kind: Some(ActionKind::PaymentProcessed),
                ..LogFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(payments.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[tokio::test]
    async fn test_in_memory_wipe_and_purge() {
        let ledger = InMemoryLedger::new();
        let mut changes = ChangeSet::logged(entry(1, ActionKind::StudentRegistered, Some("S1")));
        changes
            .students
            .push(Student::new(1, "S1", "Ada", Money::from_units(3)));
        ledger.commit(changes).await.unwrap();

        let mut wipe = ChangeSet::logged(entry(2, ActionKind::RosterWiped, None));
        wipe.wipe_roster = true;
        wipe.purge_logs_before = Some(2);
        ledger.commit(wipe).await.unwrap();

        assert!(ledger.students().await.unwrap().is_empty());
        let logs = ledger.logs(&LogFilter::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, 2);
    }
}
