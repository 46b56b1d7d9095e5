use crate::application::command::{
    CommandOutcome, ComplimentaryIssue, PaymentReceipt, PaymentRequest, Registration,
    StationCommand, StudentEdit, Verification,
};
use crate::application::import::{RosterRow, RowUpdate};
use crate::application::locks::StudentLocks;
use crate::broadcast::Broadcaster;
use crate::config::RetryPolicy;
use crate::domain::action_log::{ActionKind, ActionLogEntry, Actor, LogFilter};
use crate::domain::distribution::Distribution;
use crate::domain::event::{
    ComplimentaryPayload, DistributionPayload, DomainEvent, ImportPayload, ImportReport,
    PaymentPayload, PurgePayload, RowRejection, StudentPayload, WipePayload,
};
use crate::domain::money::Money;
use crate::domain::payment::Payment;
use crate::domain::ports::{ChangeSet, LedgerBox, Table};
use crate::domain::settlement::settle;
use crate::domain::student::{Student, validate_name, validate_student_id};
use crate::error::{Result, StationError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;

/// The single writer of the roster.
///
/// `Coordinator` validates station commands, serializes them per student, persists every
/// change through the ledger in one commit and then hands the resulting events to the
/// broadcaster. Commands on different students run concurrently.
pub struct Coordinator {
    ledger: LedgerBox,
    broadcaster: Broadcaster,
    locks: StudentLocks,
    retry: RetryPolicy,
}

impl Coordinator {
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The authoritative store.
    /// * `broadcaster` - Receives the events of every committed command.
    /// * `retry` - Backoff applied while the ledger reports itself unavailable.
    pub fn new(ledger: LedgerBox, broadcaster: Broadcaster, retry: RetryPolicy) -> Self {
        Self {
            ledger,
            broadcaster,
            locks: StudentLocks::new(),
            retry,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Dispatches a wire command to the matching operation.
    pub async fn execute(&self, actor: &Actor, command: StationCommand) -> Result<CommandOutcome> {
        tracing::debug!(command = command.name(), station = %actor.station, "Executing command");
        Ok(match command {
            StationCommand::RegisterOrCreate {
                student_id,
                name,
                owed,
            } => CommandOutcome::Registration(
                self.register_or_create(actor, &student_id, &name, owed).await?,
            ),
            StationCommand::ProcessPayment(request) => {
                CommandOutcome::Payment(self.process_payment(actor, request).await?)
            }
            StationCommand::CreateDistribution { student_id } => {
                CommandOutcome::Distribution(self.create_distribution(actor, &student_id).await?)
            }
            StationCommand::VerifyDistribution { distribution_id } => CommandOutcome::Verification(
                self.verify_distribution(actor, distribution_id).await?,
            ),
            StationCommand::IssueComplimentary { name } => {
                CommandOutcome::Complimentary(self.issue_complimentary(actor, &name).await?)
            }
            StationCommand::Import { rows } => CommandOutcome::Import(self.import(actor, rows).await?),
            StationCommand::UpdateStudent(edit) => {
                CommandOutcome::Student(self.update_student(actor, edit).await?)
            }
            StationCommand::WipeRoster => CommandOutcome::Wiped(self.wipe_roster(actor).await?),
            StationCommand::PurgeLogs => CommandOutcome::Purged(self.purge_logs(actor).await?),
        })
    }

    /// Looks the student up, creating it in `Unpaid` with `owed` if the id is unknown.
    pub async fn register_or_create(
        &self,
        actor: &Actor,
        student_id: &str,
        name: &str,
        owed: Money,
    ) -> Result<Registration> {
        validate_actor(actor)?;
        let student_id = lookup_id(student_id)?;
        let _roster = self.locks.share_roster().await;
        let _guard = self.locks.acquire(&student_id).await;

        if let Some(student) = self.load_student(&student_id).await? {
            tracing::debug!(student_id = %student_id, "Student already on the roster");
            return Ok(Registration {
                student,
                created: false,
            });
        }

        let student_id = validate_student_id(&student_id)?;
        let name = validate_name(name)?;
        let student = Student::new(self.reserve(Table::Students).await?, student_id, name, owed);

        let entry = self
            .entry(
                actor,
                ActionKind::StudentRegistered,
                Some(&student.student_id),
                &StudentPayload {
                    student: student.clone(),
                },
            )
            .await?;
        let mut changes = ChangeSet::logged(entry);
        changes.students.push(student.clone());
        self.commit_and_publish(changes).await?;

        tracing::info!(
            student_id = %student.student_id,
            owed = %student.balance,
            station = %actor.station,
            "Student registered"
        );
        Ok(Registration {
            student,
            created: true,
        })
    }

    /// Settles cash for a student.
    ///
    /// An insufficient tender fails with `InsufficientPayment` and leaves the ledger
    /// untouched. Otherwise a payment row is recorded and the balance drops by the amount
    /// applied, even when a concurrent payment already settled it.
    pub async fn process_payment(
        &self,
        actor: &Actor,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt> {
        validate_actor(actor)?;
        let student_id = lookup_id(&request.student_id)?;
        if request.tender.is_empty() {
            return Err(StationError::Validation("no bills tendered".to_string()));
        }
        if request.amount.is_some_and(|amount| amount.is_zero()) {
            return Err(StationError::Validation(
                "partial payment amount must be positive".to_string(),
            ));
        }

        let _roster = self.locks.share_roster().await;
        let _guard = self.locks.acquire(&student_id).await;

        let (mut student, created_student) = match self.load_student(&student_id).await? {
            Some(student) => (student, false),
            None => {
                let owed = request.owed.ok_or_else(|| {
                    StationError::Validation(format!(
                        "student {student_id} is not on the roster; owed amount required"
                    ))
                })?;
                let student_id = validate_student_id(&student_id)?;
                let name = validate_name(request.name.as_deref().unwrap_or(&student_id))?;
                // Surrogate id is reserved once the tender is known to cover the balance.
                (Student::new(0, student_id, name, owed), true)
            }
        };

        let due = request
            .amount
            .map_or(student.balance, |amount| amount.min(student.balance));
        let settlement = settle(due, &request.tender);
        if !settlement.sufficient {
            tracing::debug!(
                student_id = %student_id,
                owed = %due,
                tendered = %settlement.total,
                "Tender does not cover the amount due"
            );
            return Err(StationError::InsufficientPayment {
                owed: due,
                tendered: settlement.total,
                shortfall: settlement.shortfall(),
            });
        }

        if created_student {
            student.id = self.reserve(Table::Students).await?;
        }
        let became_paid = student.apply_payment(settlement.owed);
        let payment = Payment::record(
            self.reserve(Table::Payments).await?,
            &student.student_id,
            actor,
            request.tender,
            &settlement,
        );

        let entry = self
            .entry(
                actor,
                ActionKind::PaymentProcessed,
                Some(&student.student_id),
                &PaymentPayload {
                    payment: payment.clone(),
                    student: student.clone(),
                    became_paid,
                    created_student,
                },
            )
            .await?;
        let mut changes = ChangeSet::logged(entry);
        changes.students.push(student.clone());
        changes.payments.push(payment.clone());
        self.commit_and_publish(changes).await?;

        tracing::info!(
            student_id = %student.student_id,
            applied = %payment.applied,
            change = %payment.change_due,
            balance = %student.balance,
            became_paid,
            "Payment processed"
        );
        Ok(PaymentReceipt {
            payment,
            student,
            settlement,
            became_paid,
            created_student,
        })
    }

    /// Records an unverified hand-off for an existing student.
    pub async fn create_distribution(&self, actor: &Actor, student_id: &str) -> Result<Distribution> {
        validate_actor(actor)?;
        let student_id = lookup_id(student_id)?;
        let _roster = self.locks.share_roster().await;
        let _guard = self.locks.acquire(&student_id).await;

        if self.load_student(&student_id).await?.is_none() {
            return Err(StationError::student_not_found(student_id));
        }

        let distribution =
            Distribution::new(self.reserve(Table::Distributions).await?, &student_id, actor);
        let entry = self
            .entry(
                actor,
                ActionKind::DistributionCreated,
                Some(&student_id),
                &DistributionPayload {
                    distribution: distribution.clone(),
                },
            )
            .await?;
        let mut changes = ChangeSet::logged(entry);
        changes.distributions.push(distribution.clone());
        self.commit_and_publish(changes).await?;

        tracing::info!(
            student_id = %student_id,
            distribution = distribution.id,
            operator = %actor.operator,
            "Distribution recorded"
        );
        Ok(distribution)
    }

    /// Confirms a hand-off. Verifying twice is a successful no-op that keeps the first
    /// verifier and timestamp.
    pub async fn verify_distribution(
        &self,
        actor: &Actor,
        distribution_id: u64,
    ) -> Result<Verification> {
        validate_actor(actor)?;
        let _roster = self.locks.share_roster().await;
        let located = self
            .load_distribution(distribution_id)
            .await?
            .ok_or_else(|| StationError::distribution_not_found(distribution_id))?;
        let _guard = self.locks.acquire(&located.student_id).await;

        // Re-read under the lock: a concurrent verify may have landed meanwhile.
        let mut distribution = self
            .load_distribution(distribution_id)
            .await?
            .ok_or_else(|| StationError::distribution_not_found(distribution_id))?;

        if !distribution.verify(&actor.operator) {
            tracing::debug!(distribution = distribution_id, "Distribution already verified");
            return Ok(Verification {
                distribution,
                newly_verified: false,
            });
        }

        let entry = self
            .entry(
                actor,
                ActionKind::DistributionVerified,
                Some(&distribution.student_id),
                &DistributionPayload {
                    distribution: distribution.clone(),
                },
            )
            .await?;
        let mut changes = ChangeSet::logged(entry);
        changes.distributions.push(distribution.clone());
        self.commit_and_publish(changes).await?;

        tracing::info!(
            student_id = %distribution.student_id,
            distribution = distribution_id,
            verifier = %actor.operator,
            "Distribution verified"
        );
        Ok(Verification {
            distribution,
            newly_verified: true,
        })
    }

    /// Creates a `Free` student and an already verified distribution for it, in one
    /// commit. History shows the creation, the verification and a summary entry.
    pub async fn issue_complimentary(&self, actor: &Actor, name: &str) -> Result<ComplimentaryIssue> {
        validate_actor(actor)?;
        let name = validate_name(name)?;
        let _roster = self.locks.share_roster().await;

        let student = Student::complimentary(self.reserve(Table::Students).await?, name);
        let _guard = self.locks.acquire(&student.student_id).await;

        let mut distribution = Distribution::new(
            self.reserve(Table::Distributions).await?,
            &student.student_id,
            actor,
        );
        let created = distribution.as_created();
        distribution.verify(&actor.operator);

        let student_id = Some(student.student_id.as_str());
        let created_entry = self
            .entry(
                actor,
                ActionKind::DistributionCreated,
                student_id,
                &DistributionPayload {
                    distribution: created,
                },
            )
            .await?;
        let verified_entry = self
            .entry(
                actor,
                ActionKind::DistributionVerified,
                student_id,
                &DistributionPayload {
                    distribution: distribution.clone(),
                },
            )
            .await?;
        let summary_entry = self
            .entry(
                actor,
                ActionKind::ComplimentaryIssued,
                student_id,
                &ComplimentaryPayload {
                    student: student.clone(),
                    distribution: distribution.clone(),
                },
            )
            .await?;

        let changes = ChangeSet {
            students: vec![student.clone()],
            distributions: vec![distribution.clone()],
            logs: vec![created_entry, verified_entry, summary_entry],
            ..ChangeSet::default()
        };
        self.commit_and_publish(changes).await?;

        tracing::info!(
            student_id = %student.student_id,
            distribution = distribution.id,
            operator = %actor.operator,
            "Complimentary item issued"
        );
        Ok(ComplimentaryIssue {
            student,
            distribution,
        })
    }

    /// Reconciles a batch of roster rows against the ledger.
    ///
    /// Rows are matched by student id. Bad rows are reported and skipped; the rest land
    /// in one commit with a single `roster_imported` entry. Re-running the same batch
    /// reports every student as unchanged and writes nothing but the log entry.
    pub async fn import(&self, actor: &Actor, rows: Vec<RosterRow>) -> Result<ImportReport> {
        self.import_with_rejections(actor, rows, Vec::new()).await
    }

    /// `import` for sources that already turned away records they could not read. Those
    /// rejections are reported alongside the ones found while reconciling.
    pub async fn import_with_rejections(
        &self,
        actor: &Actor,
        rows: Vec<RosterRow>,
        unreadable: Vec<RowRejection>,
    ) -> Result<ImportReport> {
        validate_actor(actor)?;
        let mut report = ImportReport {
            rejected: unreadable,
            ..ImportReport::default()
        };

        let mut updates = Vec::with_capacity(rows.len());
        for row in &rows {
            match RowUpdate::parse(row) {
                Ok(update) => updates.push(update),
                Err(rejection) => report.rejected.push(rejection),
            }
        }

        let _roster = self.locks.share_roster().await;
        let _guards = self
            .locks
            .acquire_many(updates.iter().map(|u| u.student_id.clone()))
            .await;

        let mut originals: BTreeMap<String, Option<Student>> = BTreeMap::new();
        let mut working: BTreeMap<String, Student> = BTreeMap::new();

        for update in updates {
            let current = match working.get(&update.student_id) {
                Some(student) => Some(student.clone()),
                None => match originals.get(&update.student_id) {
                    Some(stored) => stored.clone(),
                    None => {
                        let stored = self.load_student(&update.student_id).await?;
                        originals.insert(update.student_id.clone(), stored.clone());
                        stored
                    }
                },
            };

            let student = match current {
                Some(mut student) => {
                    update.apply(&mut student);
                    student
                }
                None => {
                    if let Err(rejection) = update.validate_new() {
                        report.rejected.push(rejection);
                        continue;
                    }
                    update.create(self.reserve(Table::Students).await?)
                }
            };
            working.insert(update.student_id.clone(), student);
        }

        // Counted per student against what was stored before the batch, so repeated ids
        // within one file do not inflate the report.
        let mut students = Vec::new();
        for (student_id, student) in working {
            match originals.get(&student_id).and_then(Option::as_ref) {
                None => report.created += 1,
                Some(stored) if *stored == student => {
                    report.unchanged += 1;
                    continue;
                }
                Some(_) => report.updated += 1,
            }
            students.push(student);
        }
        report.rejected.sort_by_key(|rejection| rejection.line);

        let entry = self
            .entry(
                actor,
                ActionKind::RosterImported,
                None,
                &ImportPayload {
                    report: report.clone(),
                    students: students.clone(),
                },
            )
            .await?;
        let mut changes = ChangeSet::logged(entry);
        changes.students = students;
        self.commit_and_publish(changes).await?;

        tracing::info!(
            rows = rows.len(),
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            rejected = report.rejected.len(),
            "Roster imported"
        );
        Ok(report)
    }

    /// Administrative partial edit. An edit that changes nothing is not logged.
    pub async fn update_student(&self, actor: &Actor, edit: StudentEdit) -> Result<Student> {
        validate_actor(actor)?;
        let student_id = lookup_id(&edit.student_id)?;
        let name = edit.name.as_deref().map(validate_name).transpose()?;
        let _roster = self.locks.share_roster().await;
        let _guard = self.locks.acquire(&student_id).await;

        let mut student = self
            .load_student(&student_id)
            .await?
            .ok_or_else(|| StationError::student_not_found(&student_id))?;
        let before = student.clone();

        if let Some(name) = name {
            student.name = name;
        }
        if let Some(balance) = edit.balance {
            student.set_balance(balance);
        }
        if let Some(entitlements) = edit.entitlements {
            student.entitlements = entitlements;
        }

        if student == before {
            tracing::debug!(student_id = %student_id, "Edit left the student unchanged");
            return Ok(student);
        }

        let entry = self
            .entry(
                actor,
                ActionKind::StudentUpdated,
                Some(&student_id),
                &StudentPayload {
                    student: student.clone(),
                },
            )
            .await?;
        let mut changes = ChangeSet::logged(entry);
        changes.students.push(student.clone());
        self.commit_and_publish(changes).await?;

        tracing::info!(
            student_id = %student_id,
            balance = %student.balance,
            operator = %actor.operator,
            "Student updated"
        );
        Ok(student)
    }

    /// Deletes every student, distribution and payment. The action log survives.
    ///
    /// Waits for every student command in flight and holds new ones off until the wipe
    /// is committed, so nothing loaded before the wipe is written back after it.
    pub async fn wipe_roster(&self, actor: &Actor) -> Result<WipePayload> {
        validate_actor(actor)?;
        let _roster = self.locks.lock_roster().await;
        let ledger = &self.ledger;
        let students_removed = self.retrying("students", move || ledger.students()).await?.len();
        let payload = WipePayload { students_removed };

        let entry = self
            .entry(actor, ActionKind::RosterWiped, None, &payload)
            .await?;
        let changes = ChangeSet {
            wipe_roster: true,
            ..ChangeSet::logged(entry)
        };
        self.commit_and_publish(changes).await?;

        tracing::warn!(
            students_removed,
            operator = %actor.operator,
            "Roster wiped"
        );
        Ok(payload)
    }

    /// Deletes every log entry older than this command's own entry.
    pub async fn purge_logs(&self, actor: &Actor) -> Result<PurgePayload> {
        validate_actor(actor)?;
        let id = self.reserve(Table::ActionLogs).await?;
        let payload = PurgePayload { purged_before: id };

        let entry = ActionLogEntry::new(id, ActionKind::LogsPurged, None, &payload, actor)?;
        let changes = ChangeSet {
            purge_logs_before: Some(id),
            ..ChangeSet::logged(entry)
        };
        self.commit_and_publish(changes).await?;

        tracing::warn!(purged_before = id, operator = %actor.operator, "Action log purged");
        Ok(payload)
    }

    pub async fn student(&self, student_id: &str) -> Result<Student> {
        let student_id = lookup_id(student_id)?;
        self.load_student(&student_id)
            .await?
            .ok_or_else(|| StationError::student_not_found(student_id))
    }

    pub async fn students(&self) -> Result<Vec<Student>> {
        let ledger = &self.ledger;
        self.retrying("students", move || ledger.students()).await
    }

    pub async fn distributions_for(&self, student_id: &str) -> Result<Vec<Distribution>> {
        let student_id = lookup_id(student_id)?;
        let ledger = &self.ledger;
        let student_id = student_id.as_str();
        self.retrying("distributions", move || ledger.distributions_for(student_id))
            .await
    }

    pub async fn payments_for(&self, student_id: &str) -> Result<Vec<Payment>> {
        let student_id = lookup_id(student_id)?;
        let ledger = &self.ledger;
        let student_id = student_id.as_str();
        self.retrying("payments", move || ledger.payments_for(student_id))
            .await
    }

    /// Newest `limit` log entries, oldest first.
    pub async fn recent_logs(&self, limit: usize) -> Result<Vec<ActionLogEntry>> {
        self.logs(LogFilter::recent(limit)).await
    }

    pub async fn logs(&self, filter: LogFilter) -> Result<Vec<ActionLogEntry>> {
        let ledger = &self.ledger;
        let filter = &filter;
        self.retrying("logs", move || ledger.logs(filter)).await
    }

    /// Recent history rebuilt as events, oldest first, for stations catching up.
    pub async fn snapshot(&self, limit: usize) -> Result<Vec<DomainEvent>> {
        Ok(self
            .recent_logs(limit)
            .await?
            .iter()
            .map(DomainEvent::from)
            .collect())
    }

    async fn load_student(&self, student_id: &str) -> Result<Option<Student>> {
        let ledger = &self.ledger;
        self.retrying("student", move || ledger.student(student_id))
            .await
    }

    async fn load_distribution(&self, id: u64) -> Result<Option<Distribution>> {
        let ledger = &self.ledger;
        self.retrying("distribution", move || ledger.distribution(id))
            .await
    }

    async fn reserve(&self, table: Table) -> Result<u64> {
        let ledger = &self.ledger;
        self.retrying(table.name(), move || ledger.next_id(table))
            .await
    }

    async fn entry<T: Serialize>(
        &self,
        actor: &Actor,
        kind: ActionKind,
        student_id: Option<&str>,
        detail: &T,
    ) -> Result<ActionLogEntry> {
        let id = self.reserve(Table::ActionLogs).await?;
        Ok(ActionLogEntry::new(id, kind, student_id, detail, actor)?)
    }

    async fn commit_and_publish(&self, changes: ChangeSet) -> Result<()> {
        let events: Vec<DomainEvent> = changes.logs.iter().map(DomainEvent::from).collect();
        let ledger = &self.ledger;
        self.retrying("commit", move || ledger.commit(changes.clone()))
            .await?;
        self.broadcaster.emit(events);
        Ok(())
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Ledger unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    tracing::error!(operation, attempts = max_attempts, error = %err, "Ledger unavailable, giving up");
                    return Err(err);
                }
                other => return other,
            }
        }
    }
}

fn validate_actor(actor: &Actor) -> Result<()> {
    if actor.station.trim().is_empty() || actor.operator.trim().is_empty() {
        return Err(StationError::Validation(
            "station and operator are required".to_string(),
        ));
    }
    Ok(())
}

/// Ids used to find an existing student. Complimentary ids are valid here; the stricter
/// `validate_student_id` applies only when a new student is created.
fn lookup_id(raw: &str) -> Result<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(StationError::Validation("student id is required".to_string()));
    }
    Ok(id.to_string())
}
