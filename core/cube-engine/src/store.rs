//! FILENAME: core/cube-engine/src/store.rs
//! Cache Store - Where materialized query results live.
//!
//! A store hands out units of work. Inside one, a caller can take advisory
//! locks, set savepoints, and create or read named materializations. Locks
//! are held until the unit of work commits or is dropped; created tables
//! become visible to other units of work only on commit.
//!
//! `MemoryStore` keeps everything in process. Its lock table blocks on a
//! condition variable, so threads sharing one store see the same
//! lock-then-create protocol that separate processes see on a database.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CubeError, Result};
use crate::source::Row;

/// Whether a materialization survives a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Unlogged,
    Logged,
}

impl Default for Durability {
    fn default() -> Self {
        Durability::Unlogged
    }
}

/// One transaction against a cache store.
pub trait UnitOfWork {
    /// Blocks until the lock identified by `key` is held by this unit of
    /// work. Taking a lock already held by this unit is a no-op. Fails with
    /// a store error instead of waiting when the wait would deadlock.
    fn advisory_lock(&mut self, key: i64) -> Result<()>;

    fn savepoint(&mut self, name: &str) -> Result<()>;

    /// Discards everything staged since the savepoint. The savepoint stays.
    fn rollback_to(&mut self, name: &str) -> Result<()>;

    /// Forgets the savepoint, keeping the work staged since.
    fn release(&mut self, name: &str) -> Result<()>;

    fn exists(&mut self, name: &str) -> Result<bool>;

    /// Creates a materialization. Fails if one with that name exists.
    fn create(&mut self, name: &str, rows: Vec<Row>, durability: Durability) -> Result<()>;

    fn read(&mut self, name: &str) -> Result<Option<Arc<Vec<Row>>>>;

    /// Publishes staged work and releases every lock.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A place to keep materializations.
pub trait CacheStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;

    /// Names of committed materializations starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Drops a committed materialization. Returns false if it did not exist.
    fn drop_table(&self, name: &str) -> Result<bool>;
}

// ============================================================================
// MEMORY STORE
// ============================================================================

#[derive(Debug, Clone)]
struct Table {
    rows: Arc<Vec<Row>>,
    durability: Durability,
}

#[derive(Debug, Default)]
struct State {
    tables: FxHashMap<String, Table>,
    /// Advisory lock key -> id of the holding unit of work.
    locks: FxHashMap<i64, u64>,
    /// Unit of work id -> lock key it is blocked on.
    waiting: FxHashMap<u64, i64>,
}

impl State {
    /// Whether `unit` waiting for `key` closes a cycle in the waits-for
    /// graph.
    fn would_deadlock(&self, unit: u64, key: i64) -> bool {
        let mut key = key;
        // Each unit waits on at most one lock, so the chain is a path.
        for _ in 0..=self.waiting.len() {
            let Some(&holder) = self.locks.get(&key) else {
                return false;
            };
            if holder == unit {
                return true;
            }
            match self.waiting.get(&holder) {
                Some(&next) => key = next,
                None => return false,
            }
        }
        false
    }
}

/// An in-process cache store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    lock_released: Condvar,
    next_unit: AtomicU64,
    unavailable: AtomicBool,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Makes every operation fail with a store error, as if the backend
    /// were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `create` fail while reads keep working.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of committed materializations.
    pub fn table_count(&self) -> usize {
        self.state().map(|s| s.tables.len()).unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state().map(|s| s.tables.contains_key(name)).unwrap_or(false)
    }

    pub fn durability_of(&self, name: &str) -> Option<Durability> {
        self.state().ok()?.tables.get(name).map(|t| t.durability)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CubeError::Store("store is unavailable".to_string()));
        }
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| CubeError::Store("store state is poisoned".to_string()))
    }

    fn release_locks(&self, unit: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.locks.retain(|_, holder| *holder != unit);
        drop(state);
        self.lock_released.notify_all();
    }
}

impl CacheStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        self.check_available()?;
        let id = self.next_unit.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryUnit {
            store: self,
            id,
            staged: Vec::new(),
            savepoints: Vec::new(),
            finished: false,
        }))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self.state()?;
        let mut names: Vec<String> = state
            .tables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    fn drop_table(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.state()?.tables.remove(name).is_some())
    }
}

impl<T: CacheStore + ?Sized> CacheStore for Arc<T> {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        (**self).begin()
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }

    fn drop_table(&self, name: &str) -> Result<bool> {
        (**self).drop_table(name)
    }
}

/// A unit of work on a `MemoryStore`.
struct MemoryUnit<'a> {
    store: &'a MemoryStore,
    id: u64,
    staged: Vec<(String, Table)>,
    /// Savepoint name and the staged length when it was taken.
    savepoints: Vec<(String, usize)>,
    finished: bool,
}

impl MemoryUnit<'_> {
    fn savepoint_position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| CubeError::Store(format!("no savepoint named '{}'", name)))
    }

    fn staged(&self, name: &str) -> Option<&Table> {
        self.staged.iter().rev().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn advisory_lock(&mut self, key: i64) -> Result<()> {
        self.store.check_available()?;
        let mut state = self.store.state()?;
        loop {
            match state.locks.get(&key) {
                Some(&holder) if holder == self.id => break,
                Some(&holder) => {
                    if state.would_deadlock(self.id, key) {
                        state.waiting.remove(&self.id);
                        return Err(CubeError::Store(format!(
                            "deadlock detected: lock {} is held by unit {} whose waits lead back to unit {}",
                            key, holder, self.id
                        )));
                    }
                    state.waiting.insert(self.id, key);
                    state = match self.store.lock_released.wait(state) {
                        Ok(state) => state,
                        Err(_) => {
                            return Err(CubeError::Store("store state is poisoned".to_string()))
                        }
                    };
                }
                None => {
                    state.locks.insert(key, self.id);
                    break;
                }
            }
        }
        state.waiting.remove(&self.id);
        Ok(())
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoints.push((name.to_string(), self.staged.len()));
        Ok(())
    }

    fn rollback_to(&mut self, name: &str) -> Result<()> {
        let position = self.savepoint_position(name)?;
        let staged_len = self.savepoints[position].1;
        self.staged.truncate(staged_len);
        self.savepoints.truncate(position + 1);
        Ok(())
    }

    fn release(&mut self, name: &str) -> Result<()> {
        let position = self.savepoint_position(name)?;
        self.savepoints.truncate(position);
        Ok(())
    }

    fn exists(&mut self, name: &str) -> Result<bool> {
        self.store.check_available()?;
        if self.staged(name).is_some() {
            return Ok(true);
        }
        Ok(self.store.state()?.tables.contains_key(name))
    }

    fn create(&mut self, name: &str, rows: Vec<Row>, durability: Durability) -> Result<()> {
        if self.store.read_only.load(Ordering::SeqCst) {
            return Err(CubeError::Store(format!("cannot create '{}': store is read-only", name)));
        }
        if self.exists(name)? {
            return Err(CubeError::Store(format!("'{}' already exists", name)));
        }
        self.staged.push((
            name.to_string(),
            Table {
                rows: Arc::new(rows),
                durability,
            },
        ));
        Ok(())
    }

    fn read(&mut self, name: &str) -> Result<Option<Arc<Vec<Row>>>> {
        self.store.check_available()?;
        if let Some(table) = self.staged(name) {
            return Ok(Some(Arc::clone(&table.rows)));
        }
        Ok(self.store.state()?.tables.get(name).map(|t| Arc::clone(&t.rows)))
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.store.check_available()?;
        {
            let mut state = self.store.state()?;
            for (name, table) in self.staged.drain(..) {
                state.tables.entry(name).or_insert(table);
            }
        }
        self.finished = true;
        self.store.release_locks(self.id);
        Ok(())
    }
}

impl Drop for MemoryUnit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.release_locks(self.id);
        }
    }
}
