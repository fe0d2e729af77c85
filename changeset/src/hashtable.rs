//! The change hash table: one per attached table, keyed by `rowid`,
//! open-chained, doubling on load.

use common::err::{CsError, CsResult};
use tracing::{debug, warn};

use crate::change::RowChange;

const INITIAL_BUCKETS: usize = 128;

/// Open-chained hash table of `RowChange`, indexed by
/// `rowid mod n_buckets`.
#[derive(Debug)]
pub struct ChangeTable {
    buckets: Vec<Vec<RowChange>>,
    entries: usize,
}

impl Default for ChangeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTable {
    pub fn new() -> Self {
        ChangeTable {
            buckets: (0..INITIAL_BUCKETS).map(|_| Vec::new()).collect(),
            entries: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    #[inline]
    fn bucket_index(&self, rowid: i64) -> usize {
        (rowid as u64 as usize) % self.buckets.len()
    }

    pub fn get(&self, rowid: i64) -> Option<&RowChange> {
        let idx = self.bucket_index(rowid);
        self.buckets[idx].iter().find(|c| c.rowid == rowid)
    }

    /// Grows the bucket array if the load factor calls for it. A
    /// rehash allocation failure is non-fatal: the table keeps its
    /// previous size and continues to accept inserts with degraded
    /// performance.
    pub fn maybe_rehash(&mut self) {
        if self.entries < self.buckets.len() / 2 {
            return;
        }
        let new_count = self.buckets.len().saturating_mul(2);
        let mut new_buckets: Vec<Vec<RowChange>> = Vec::new();
        if new_buckets.try_reserve_exact(new_count).is_err() {
            warn!("change table rehash allocation failed, keeping previous size");
            return;
        }
        new_buckets.extend((0..new_count).map(|_| Vec::new()));

        for mut bucket in std::mem::take(&mut self.buckets) {
            for change in bucket.drain(..) {
                let idx = (change.rowid as u64 as usize) % new_count;
                new_buckets[idx].push(change);
            }
        }
        debug!(
            old = self.buckets.len(),
            new = new_count,
            "change table rehashed"
        );
        self.buckets = new_buckets;
    }

    /// Inserts `change` at the head of its bucket's chain. Caller is
    /// responsible for having already checked `get(change.rowid)`
    /// returns `None` -- the earliest pre-image for a row wins, later
    /// mutations in the same session never overwrite it. An
    /// allocation failure here is fatal and must latch the owning
    /// session's error.
    pub fn insert(&mut self, change: RowChange) -> CsResult<()> {
        let idx = self.bucket_index(change.rowid);
        if self.buckets[idx].try_reserve(1).is_err() {
            return Err(CsError::OutOfMemory);
        }
        self.buckets[idx].insert(0, change);
        self.entries += 1;
        Ok(())
    }

    /// Iterates every `RowChange` in the table, bucket order then
    /// chain order.
    pub fn iter(&self) -> impl Iterator<Item = &RowChange> {
        self.buckets.iter().flat_map(|b| b.iter())
    }
}
