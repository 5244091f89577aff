//! Table lock manager
//!
//! Statement execution takes whole-table locks: `Shared` for reads,
//! `Exclusive` for writes and structural changes. A request names every
//! table it needs up front; acquisition walks the tables in ascending
//! table-id order, which makes well-formed concurrent requests
//! deadlock-free. Waiting is bounded by a timeout.
//!
//! The lock manager performs no validation; commit-time conflict
//! detection can still reject a transaction that held every lock it
//! wanted. Handles are owned by the session and released at transaction
//! end even if the caller forgot.

use dashmap::DashMap;
use lattice_core::{Error, Result, TableId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared read lock; compatible with other shared holders
    Shared,
    /// Exclusive write lock; compatible with nothing
    Exclusive,
}

#[derive(Debug, Default)]
struct TableLockState {
    /// Current holders: `(owner, mode, count)`
    holders: Vec<(u64, LockMode, usize)>,
}

impl TableLockState {
    fn can_grant(&self, owner: u64, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self
                .holders
                .iter()
                .all(|(o, m, _)| *o == owner || *m != LockMode::Exclusive),
            LockMode::Exclusive => self.holders.iter().all(|(o, _, _)| *o == owner),
        }
    }

    fn grant(&mut self, owner: u64, mode: LockMode) {
        if let Some(held) = self.holders.iter_mut().find(|(o, _, _)| *o == owner) {
            held.2 += 1;
            if mode == LockMode::Exclusive {
                held.1 = LockMode::Exclusive;
            }
        } else {
            self.holders.push((owner, mode, 1));
        }
    }

    fn release(&mut self, owner: u64) {
        if let Some(pos) = self.holders.iter().position(|(o, _, _)| *o == owner) {
            let held = &mut self.holders[pos];
            held.2 -= 1;
            if held.2 == 0 {
                self.holders.remove(pos);
            }
        }
    }
}

#[derive(Debug, Default)]
struct TableLock {
    state: Mutex<TableLockState>,
    cv: Condvar,
}

/// Table-granularity lock manager.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<u64, Arc<TableLock>>,
    timeout: Duration,
}

impl LockManager {
    /// Manager with the default 10 second wait bound.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    /// Manager with an explicit wait bound.
    pub fn with_timeout(timeout: Duration) -> Self {
        LockManager {
            locks: DashMap::new(),
            timeout,
        }
    }

    fn entry(&self, table: TableId) -> Arc<TableLock> {
        self.locks
            .entry(table.0)
            .or_insert_with(|| Arc::new(TableLock::default()))
            .clone()
    }

    /// Acquire exclusive locks on `write` and shared locks on `read` for
    /// `owner`, blocking until every lock is granted. Tables are locked
    /// in ascending table-id order regardless of argument order.
    pub fn lock(
        self: &Arc<Self>,
        owner: u64,
        write: &[TableId],
        read: &[TableId],
    ) -> Result<LockHandle> {
        // Exclusive wins when a table appears on both sides.
        let mut wanted: Vec<(TableId, LockMode)> = Vec::new();
        for &t in write {
            if !wanted.iter().any(|(w, _)| *w == t) {
                wanted.push((t, LockMode::Exclusive));
            }
        }
        for &t in read {
            if !wanted.iter().any(|(w, _)| *w == t) {
                wanted.push((t, LockMode::Shared));
            }
        }
        wanted.sort_by_key(|(t, _)| *t);

        let mut handle = LockHandle {
            manager: self.clone(),
            owner,
            held: Vec::new(),
            released: false,
        };
        for (table, mode) in wanted {
            self.lock_one(owner, table, mode)?;
            handle.held.push(table);
        }
        Ok(handle)
    }

    fn lock_one(&self, owner: u64, table: TableId, mode: LockMode) -> Result<()> {
        let entry = self.entry(table);
        let deadline = Instant::now() + self.timeout;
        let mut state = entry.state.lock();
        while !state.can_grant(owner, mode) {
            let wait = deadline.saturating_duration_since(Instant::now());
            if wait.is_zero() || entry.cv.wait_for(&mut state, wait).timed_out() {
                if state.can_grant(owner, mode) {
                    break;
                }
                return Err(Error::LockTimeout(self.timeout));
            }
        }
        state.grant(owner, mode);
        trace!(owner, table = %table, ?mode, "table lock granted");
        Ok(())
    }

    fn release_one(&self, owner: u64, table: TableId) {
        if let Some(entry) = self.locks.get(&table.0) {
            let entry = entry.clone();
            let mut state = entry.state.lock();
            state.release(owner);
            entry.cv.notify_all();
        }
    }

    /// Whether any lock is currently held on `table`.
    pub fn is_locked(&self, table: TableId) -> bool {
        self.locks
            .get(&table.0)
            .map(|e| !e.state.lock().holders.is_empty())
            .unwrap_or(false)
    }
}

/// The locks one request granted. Dropping the handle releases them;
/// sessions release explicitly at transaction end.
#[derive(Debug)]
pub struct LockHandle {
    manager: Arc<LockManager>,
    owner: u64,
    held: Vec<TableId>,
    released: bool,
}

impl LockHandle {
    /// Release every lock this handle holds. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for table in self.held.drain(..) {
            self.manager.release_one(self.owner, table);
        }
    }

    /// The owner this handle was granted to.
    pub fn owner(&self) -> u64 {
        self.owner
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn manager() -> Arc<LockManager> {
        Arc::new(LockManager::with_timeout(Duration::from_millis(200)))
    }

    #[test]
    fn shared_locks_coexist() {
        let lm = manager();
        let _a = lm.lock(1, &[], &[TableId(10)]).unwrap();
        let _b = lm.lock(2, &[], &[TableId(10)]).unwrap();
        assert!(lm.is_locked(TableId(10)));
    }

    #[test]
    fn exclusive_excludes_and_times_out() {
        let lm = manager();
        let _w = lm.lock(1, &[TableId(10)], &[]).unwrap();
        assert!(matches!(
            lm.lock(2, &[], &[TableId(10)]),
            Err(Error::LockTimeout(_))
        ));
        assert!(matches!(
            lm.lock(2, &[TableId(10)], &[]),
            Err(Error::LockTimeout(_))
        ));
    }

    #[test]
    fn release_unblocks_waiter() {
        let lm = manager();
        let mut held = lm.lock(1, &[TableId(5)], &[]).unwrap();

        let waiter = {
            let lm = lm.clone();
            thread::spawn(move || lm.lock(2, &[TableId(5)], &[]).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(30));
        held.release();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn drop_releases() {
        let lm = manager();
        {
            let _h = lm.lock(1, &[TableId(7)], &[]).unwrap();
            assert!(lm.is_locked(TableId(7)));
        }
        assert!(!lm.is_locked(TableId(7)));
    }

    #[test]
    fn same_owner_may_strengthen() {
        let lm = manager();
        let _r = lm.lock(1, &[], &[TableId(3)]).unwrap();
        let _w = lm.lock(1, &[TableId(3)], &[]).unwrap();
        assert!(lm.is_locked(TableId(3)));
    }

    #[test]
    fn crossing_requests_do_not_deadlock() {
        // Two owners each want both tables; sorted acquisition means one
        // of them gets both, then the other.
        let lm = Arc::new(LockManager::with_timeout(Duration::from_secs(5)));
        let done = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for owner in [1u64, 2u64] {
            let lm = lm.clone();
            let done = done.clone();
            // Present the tables in opposite orders.
            let tables = if owner == 1 {
                [TableId(1), TableId(2)]
            } else {
                [TableId(2), TableId(1)]
            };
            handles.push(thread::spawn(move || {
                let mut h = lm.lock(owner, &tables, &[]).unwrap();
                thread::sleep(Duration::from_millis(20));
                h.release();
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}
