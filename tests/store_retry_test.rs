mod common;

use async_trait::async_trait;
use stationhub::domain::action_log::{ActionLogEntry, Actor, LogFilter};
use stationhub::domain::distribution::Distribution;
use stationhub::domain::money::Money;
use stationhub::domain::payment::Payment;
use stationhub::domain::ports::{ChangeSet, LedgerStore, Table};
use stationhub::domain::student::Student;
use stationhub::error::{Result, StationError};
use stationhub::infrastructure::in_memory::InMemoryLedger;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Wraps the in-memory ledger and fails the first `outages` commits.
struct FlakyLedger {
    inner: InMemoryLedger,
    outages: AtomicU32,
    commits: AtomicU32,
}

impl FlakyLedger {
    fn new(outages: u32) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            outages: AtomicU32::new(outages),
            commits: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn next_id(&self, table: Table) -> Result<u64> {
        self.inner.next_id(table).await
    }

    async fn student(&self, student_id: &str) -> Result<Option<Student>> {
        self.inner.student(student_id).await
    }

    async fn students(&self) -> Result<Vec<Student>> {
        self.inner.students().await
    }

    async fn distribution(&self, id: u64) -> Result<Option<Distribution>> {
        self.inner.distribution(id).await
    }

    async fn distributions_for(&self, student_id: &str) -> Result<Vec<Distribution>> {
        self.inner.distributions_for(student_id).await
    }

    async fn payments_for(&self, student_id: &str) -> Result<Vec<Payment>> {
        self.inner.payments_for(student_id).await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<ActionLogEntry>> {
        self.inner.logs(filter).await
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let remaining = self.outages.load(Ordering::SeqCst);
        if remaining > 0 {
            self.outages.store(remaining - 1, Ordering::SeqCst);
            return Err(StationError::StoreUnavailable("disk busy".to_string()));
        }
        self.inner.commit(changes).await
    }
}

#[tokio::test]
async fn test_transient_outage_is_retried() {
    let ledger = Arc::new(FlakyLedger::new(2));
    let coordinator = common::coordinator_with(ledger.clone(), common::fast_retry(5));

    let registration = coordinator
        .register_or_create(&Actor::new("cash-1", "alice"), "S1", "Ada", Money::from_units(13))
        .await
        .unwrap();

    assert!(registration.created);
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 3);
    assert_eq!(coordinator.recent_logs(0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_the_error() {
    let ledger = Arc::new(FlakyLedger::new(10));
    let coordinator = common::coordinator_with(ledger.clone(), common::fast_retry(3));

    let err = coordinator
        .register_or_create(&Actor::new("cash-1", "alice"), "S1", "Ada", Money::from_units(13))
        .await
        .unwrap_err();

    assert!(matches!(err, StationError::StoreUnavailable(_)));
    assert_eq!(ledger.commits.load(Ordering::SeqCst), 3);
    assert!(coordinator.students().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_commit_emits_nothing() {
    let ledger = Arc::new(FlakyLedger::new(10));
    let coordinator = common::coordinator_with(ledger, common::fast_retry(2));
    let mut live = coordinator.broadcaster().connect("hub");

    let _ = coordinator
        .issue_complimentary(&Actor::new("admin", "root"), "Guest")
        .await;

    let received =
        tokio::time::timeout(std::time::Duration::from_millis(50), live.recv()).await;
    assert!(received.is_err(), "no event may be emitted for an uncommitted command");
}
