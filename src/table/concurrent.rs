//! ATIMEFILE - Shared Table Wrapper
//! Thread-safe wrapper around an `AtimeTable` using Arc + Mutex.
//!
//! ## Concurrency Model
//! - One table-wide lock, held for the whole obtain → mutate → release
//!   sequence of every operation, including reads
//! - Operations on distinct keys are serialized too; the live-count of a
//!   block is never updated by two threads at once

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::types::{Key, Timestamp};

use super::metrics::TableMetrics;
use super::store::BlockStore;
use super::{AtimeTable, CheckReport, DeleteOutcome};

/// Cloneable, thread-safe handle to one atime table.
///
/// ## Example
/// ```no_run
/// use atimefile::config::Config;
/// use atimefile::table::concurrent::SharedAtimeTable;
/// use atimefile::table::memory::MemoryStore;
/// use atimefile::table::AtimeTable;
/// use atimefile::types::Timestamp;
/// use std::thread;
///
/// let config = Config::default();
/// let table = AtimeTable::open(MemoryStore::new(config.block_size), 1, &config).unwrap();
/// let shared = SharedAtimeTable::new(table);
///
/// let worker = shared.clone();
/// thread::spawn(move || {
///     worker.get_or_init(42, Timestamp::now()).unwrap();
/// });
///
/// let atime = shared.lookup(42).unwrap();
/// ```
pub struct SharedAtimeTable<S: BlockStore> {
    inner: Arc<Mutex<AtimeTable<S>>>,
}

impl<S: BlockStore> Clone for SharedAtimeTable<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BlockStore> SharedAtimeTable<S> {
    pub fn new(table: AtimeTable<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(table)),
        }
    }

    // Operations never leave a half-applied mutation behind, so a
    // panicking holder does not invalidate the table.
    fn lock(&self) -> MutexGuard<'_, AtimeTable<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_init(&self, key: Key, fallback: Timestamp) -> Result<Timestamp> {
        self.lock().get_or_init(key, fallback)
    }

    pub fn set(&self, key: Key, value: Timestamp) -> Result<()> {
        self.lock().set(key, value)
    }

    pub fn delete(&self, key: Key) -> Result<DeleteOutcome> {
        self.lock().delete(key)
    }

    pub fn lookup(&self, key: Key) -> Result<Option<Timestamp>> {
        self.lock().lookup(key)
    }

    pub fn check(&self) -> Result<CheckReport> {
        self.lock().check()
    }

    pub fn sync(&self) -> Result<()> {
        self.lock().sync()
    }

    pub fn live_entries(&self) -> u64 {
        self.lock().live_entries()
    }

    /// Run `f` against the metrics while holding the lock.
    pub fn with_metrics<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&TableMetrics) -> R,
    {
        f(self.lock().metrics())
    }

    /// Run `f` with exclusive access to the whole table.
    pub fn with_table<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AtimeTable<S>) -> R,
    {
        f(&mut *self.lock())
    }
}
