use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{
    Mutex as AsyncMutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

type Slot = Arc<AsyncMutex<()>>;

/// Per-student mutual exclusion.
///
/// Commands touching the same student id queue up behind each other; commands on
/// different students never contend. Slots are created on demand and removed when the
/// last holder or waiter lets go, so the map only holds students with work in flight.
///
/// Roster-wide changes such as a wipe go through a second, coarser lock: student
/// commands hold it shared for their whole duration, a roster-wide change holds it
/// exclusively. It is always taken before any student lock.
#[derive(Default)]
pub struct StudentLocks {
    slots: Mutex<HashMap<String, Slot>>,
    roster: RwLock<()>,
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared hold on the roster, taken once per student command.
    pub async fn share_roster(&self) -> RwLockReadGuard<'_, ()> {
        self.roster.read().await
    }

    /// Exclusive hold on the roster. Waits for every student command in flight and keeps
    /// new ones out until dropped.
    pub async fn lock_roster(&self) -> RwLockWriteGuard<'_, ()> {
        self.roster.write().await
    }

    pub async fn acquire(&self, student_id: &str) -> StudentGuard<'_> {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(student_id.to_string()).or_default())
        };
        let guard = slot.lock_owned().await;
        StudentGuard {
            locks: self,
            student_id: student_id.to_string(),
            guard,
        }
    }

    /// Locks several students at once, always in sorted order so two batches can never
    /// deadlock each other.
    pub async fn acquire_many<I, S>(&self, student_ids: I) -> Vec<StudentGuard<'_>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered: BTreeSet<String> = student_ids.into_iter().map(Into::into).collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for student_id in &ordered {
            guards.push(self.acquire(student_id).await);
        }
        guards
    }
}

pub struct StudentGuard<'a> {
    locks: &'a StudentLocks,
    student_id: String,
    guard: OwnedMutexGuard<()>,
}

impl Drop for StudentGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots();
        // One reference in the map, one inside our guard: nobody else is waiting.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            slots.remove(&self.student_id);
        }
    }
}
