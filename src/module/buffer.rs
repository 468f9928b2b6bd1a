//! Per-module sample buffer.
//!
//! A `SampleBuffer` is a cheap, cloneable handle to one module's ordered log
//! of observation rows. The owning worker appends under the write lock; the
//! aggregator copies what it needs out under the read lock. Callers never
//! hold the lock across I/O: the closure passed to [`SampleBuffer::with_rows`]
//! must only inspect and copy.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// One observation: string fields in the module's label order.
pub type Row = Vec<String>;

/// How many rows a buffer keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Retention {
    /// Keep every row for the whole session.
    #[default]
    Unbounded,
    /// Keep at most this many of the newest rows.
    Latest(usize),
}

#[derive(Debug, Default)]
struct Rows {
    rows: VecDeque<Row>,
    retention: Retention,
    appended: u64,
}

/// Append-only, lock-guarded sequence of rows shared between a module's
/// worker and the aggregator.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    inner: Arc<RwLock<Rows>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        let buffer = Self::new();
        buffer.set_retention(retention);
        buffer
    }

    /// Changes the retention policy, evicting immediately if needed.
    pub fn set_retention(&self, retention: Retention) {
        let mut inner = self.inner.write();
        inner.retention = retention;
        evict(&mut inner);
    }

    pub fn retention(&self) -> Retention {
        self.inner.read().retention
    }

    /// Appends a row. Build the row before calling; the write lock is held
    /// only for the push (and eviction).
    pub fn push(&self, row: Row) {
        let mut inner = self.inner.write();
        inner.rows.push_back(row);
        inner.appended += 1;
        evict(&mut inner);
    }

    /// Runs `f` against the retained rows under the read lock.
    pub fn with_rows<R>(&self, f: impl FnOnce(&VecDeque<Row>) -> R) -> R {
        f(&self.inner.read().rows)
    }

    /// Copy of the most recently appended row.
    pub fn latest(&self) -> Option<Row> {
        self.with_rows(|rows| rows.back().cloned())
    }

    /// Number of rows currently retained.
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().rows.is_empty()
    }

    /// Number of rows ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.inner.read().appended
    }

    /// Copy of every retained row, oldest first.
    pub fn snapshot(&self) -> Vec<Row> {
        self.with_rows(|rows| rows.iter().cloned().collect())
    }
}

fn evict(inner: &mut Rows) {
    if let Retention::Latest(limit) = inner.retention {
        let limit = limit.max(1);
        while inner.rows.len() > limit {
            inner.rows.pop_front();
        }
    }
}
