use crate::domain::action_log::{ActionLogEntry, LogFilter};
use crate::domain::distribution::Distribution;
use crate::domain::payment::Payment;
use crate::domain::ports::{ChangeSet, LedgerStore, Table};
use crate::domain::student::Student;
use crate::error::{Result, StationError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for students, keyed by external student id.
pub const CF_STUDENTS: &str = "students";
/// Column Family for distributions, keyed by big-endian id.
pub const CF_DISTRIBUTIONS: &str = "distributions";
/// Column Family for payments, keyed by big-endian id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for the action log, keyed by big-endian id.
pub const CF_ACTION_LOGS: &str = "action_logs";
/// Column Family holding the id sequences.
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 5] = [
    CF_STUDENTS,
    CF_DISTRIBUTIONS,
    CF_PAYMENTS,
    CF_ACTION_LOGS,
    CF_META,
];

/// A persistent ledger implementation using RocksDB.
///
/// Each table lives in its own Column Family. A commit is one `WriteBatch`, so a command
/// either lands completely or not at all. Sequences are stored in `meta` and advanced
/// under a mutex.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBLedger {
    db: Arc<DB>,
    sequence_lock: Arc<Mutex<()>>,
    commit_lock: Arc<Mutex<()>>,
}

impl RocksDBLedger {
    /// Opens or creates a RocksDB instance at the specified path, creating any missing
    /// column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            sequence_lock: Arc::new(Mutex::new(())),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            StationError::StoreUnavailable(format!("column family '{name}' not found"))
        })
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str, mode: IteratorMode) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (_key, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        row: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, key, serde_json::to_vec(row)?);
        Ok(())
    }

    fn delete_all(&self, batch: &mut WriteBatch, cf_name: &str) -> Result<()> {
        let cf = self.cf(cf_name)?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _value) = item?;
            batch.delete_cf(cf, key);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RocksDBLedger {
    async fn next_id(&self, table: Table) -> Result<u64> {
        let _guard = self.sequence_lock.lock().await;
        let cf = self.cf(CF_META)?;
        let key = table.name().as_bytes();
        let current = match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StationError::Internal(format!("corrupt sequence for {}", table.name()))
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(cf, key, next.to_be_bytes())?;
        Ok(next)
    }

    async fn student(&self, student_id: &str) -> Result<Option<Student>> {
        self.get_json(CF_STUDENTS, student_id.as_bytes())
    }

    async fn students(&self) -> Result<Vec<Student>> {
        self.scan(CF_STUDENTS, IteratorMode::Start)
    }

    async fn distribution(&self, id: u64) -> Result<Option<Distribution>> {
        self.get_json(CF_DISTRIBUTIONS, &id.to_be_bytes())
    }

    async fn distributions_for(&self, student_id: &str) -> Result<Vec<Distribution>> {
        let all: Vec<Distribution> = self.scan(CF_DISTRIBUTIONS, IteratorMode::Start)?;
        Ok(all
            .into_iter()
            .filter(|d| d.student_id == student_id)
            .collect())
    }

    async fn payments_for(&self, student_id: &str) -> Result<Vec<Payment>> {
        let all: Vec<Payment> = self.scan(CF_PAYMENTS, IteratorMode::Start)?;
        Ok(all
            .into_iter()
            .filter(|p| p.student_id == student_id)
            .collect())
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<ActionLogEntry>> {
        let cf = self.cf(CF_ACTION_LOGS)?;
        let limit = if filter.limit == 0 {
            usize::MAX
        } else {
            filter.limit
        };
        let mut entries = Vec::new();
        // Keys are big-endian ids, so iterating from the end walks newest first.
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            if entries.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            let entry: ActionLogEntry = serde_json::from_slice(&value)?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }
        entries.reverse();
        Ok(entries)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let _guard = self.commit_lock.lock().await;

        for payment in &changes.payments {
            if self.exists(CF_PAYMENTS, &payment.id.to_be_bytes())? {
                return Err(StationError::Internal(format!(
                    "payment {} already recorded",
                    payment.id
                )));
            }
        }
        for entry in &changes.logs {
            if self.exists(CF_ACTION_LOGS, &entry.id.to_be_bytes())? {
                return Err(StationError::Internal(format!(
                    "log entry {} already recorded",
                    entry.id
                )));
            }
        }

        let mut batch = WriteBatch::default();
        if changes.wipe_roster {
            self.delete_all(&mut batch, CF_STUDENTS)?;
            self.delete_all(&mut batch, CF_DISTRIBUTIONS)?;
            self.delete_all(&mut batch, CF_PAYMENTS)?;
        }
        if let Some(before) = changes.purge_logs_before {
            let cf = self.cf(CF_ACTION_LOGS)?;
            batch.delete_range_cf(cf, 0u64.to_be_bytes(), before.to_be_bytes());
        }
        for student in &changes.students {
            self.put_json(&mut batch, CF_STUDENTS, student.student_id.as_bytes(), student)?;
        }
        for distribution in &changes.distributions {
            self.put_json(
                &mut batch,
                CF_DISTRIBUTIONS,
                &distribution.id.to_be_bytes(),
                distribution,
            )?;
        }
        for payment in &changes.payments {
            self.put_json(&mut batch, CF_PAYMENTS, &payment.id.to_be_bytes(), payment)?;
        }
        for entry in &changes.logs {
            self.put_json(&mut batch, CF_ACTION_LOGS, &entry.id.to_be_bytes(), entry)?;
        }

        self.db.write(batch)?;
        Ok(())
    }
}
