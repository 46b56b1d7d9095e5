mod common;

use async_trait::async_trait;
use stationhub::application::command::PaymentRequest;
use stationhub::domain::action_log::{ActionKind, ActionLogEntry, Actor, LogFilter};
use stationhub::domain::distribution::Distribution;
use stationhub::domain::money::Money;
use stationhub::domain::payment::Payment;
use stationhub::domain::ports::{ChangeSet, LedgerStore, Table};
use stationhub::domain::settlement::{BillCounts, Denomination};
use stationhub::domain::student::Student;
use stationhub::error::Result;
use stationhub::infrastructure::in_memory::InMemoryLedger;
use std::sync::Arc;
use std::time::Duration;

/// Holds every commit that records a payment for a while before applying it.
struct SlowPayments {
    inner: InMemoryLedger,
    delay: Duration,
}

#[async_trait]
impl LedgerStore for SlowPayments {
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
        if !changes.payments.is_empty() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.commit(changes).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wipe_waits_for_payment_in_flight() {
    let ledger = Arc::new(SlowPayments {
        inner: InMemoryLedger::new(),
        delay: Duration::from_millis(150),
    });
    let coordinator = common::coordinator_with(ledger, common::fast_retry(3));
    let cash = Actor::new("cash-1", "alice");
    let admin = Actor::new("admin", "root");

    coordinator
        .register_or_create(&cash, "S1", "Ada", Money::from_units(40))
        .await
        .unwrap();

    let paying = Arc::clone(&coordinator);
    let payment = tokio::spawn(async move {
        paying
            .process_payment(
                &cash,
                PaymentRequest::new("S1", BillCounts::default().with(Denomination::Ten, 1))
                    .partial(Money::from_units(10)),
            )
            .await
    });

    // Let the payment load the student and reach its commit before wiping.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let wiped = coordinator.wipe_roster(&admin).await.unwrap();
    payment.await.unwrap().unwrap();

    assert_eq!(wiped.students_removed, 1);
    assert!(coordinator.students().await.unwrap().is_empty());
    assert!(coordinator.payments_for("S1").await.unwrap().is_empty());

    let kinds: Vec<ActionKind> = coordinator
        .recent_logs(0)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            ActionKind::StudentRegistered,
            ActionKind::PaymentProcessed,
            ActionKind::RosterWiped,
        ]
    );
}

#[tokio::test]
async fn test_commands_after_wipe_start_from_empty_roster() {
    let coordinator = common::in_memory_coordinator();
    let admin = Actor::new("admin", "root");
    coordinator
        .register_or_create(&admin, "S1", "Ada", Money::from_units(13))
        .await
        .unwrap();

    coordinator.wipe_roster(&admin).await.unwrap();
    let again = coordinator
        .register_or_create(&admin, "S1", "Ada", Money::from_units(13))
        .await
        .unwrap();

    assert!(again.created);
    assert_eq!(coordinator.students().await.unwrap().len(), 1);
}
