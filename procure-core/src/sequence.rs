//! Sequence Allocator
//!
//! Derives the next identifier in a prefixed, zero-padded numeric series
//! (`PO_003`, `QUO_012`, `MRN_003`) by scanning previously issued values.
//!
//! `next_id` itself is pure and has no concurrency protection: two callers
//! computing against the same snapshot will collide. Every allocation
//! therefore goes through [`SequenceAllocator`], which serializes the
//! read-then-persist window per `(sheet, column)` counter.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::WorkflowError;

/// Next ID in the series: `prefix` + zero-padded `max(parsed suffixes) + 1`.
///
/// A value participates iff it starts with `prefix` and the remainder parses
/// as a non-negative integer; anything else (`PO_abc`, `FOO_003`, blanks) is
/// ignored. Suffixes wider than `width` keep their natural width.
pub fn next_id(existing: &[String], prefix: &str, width: usize) -> String {
    let max = existing
        .iter()
        .filter_map(|v| v.trim().strip_prefix(prefix)?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{:0>width$}", prefix, max + 1, width = width)
}

/// Identity of one counter: the sheet and logical column holding issued IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    pub sheet: String,
    pub column: String,
}

impl SequenceKey {
    pub fn new(sheet: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            column: column.into(),
        }
    }
}

/// Single-writer gate per counter. One instance is shared process-wide so
/// every call site allocating from the same counter contends on the same
/// lock.
pub struct SequenceAllocator {
    locks: Mutex<HashMap<SequenceKey, Arc<Mutex<()>>>>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a counter. Held guards serialize every
    /// read-compute-persist sequence against that counter, including
    /// orchestrations that upload a document between read and persist.
    pub async fn lock(&self, key: &SequenceKey) -> OwnedMutexGuard<()> {
        let gate = {
            let mut locks = self.locks.lock().await;
            locks.entry(key.clone()).or_default().clone()
        };
        gate.lock_owned().await
    }

    /// Allocate the next ID for a counter: under the counter's lock, read the
    /// existing values, compute the successor, persist it, and return it.
    pub async fn allocate<'a, R, P>(
        &self,
        key: SequenceKey,
        prefix: &str,
        width: usize,
        read_existing: R,
        persist: P,
    ) -> Result<String, WorkflowError>
    where
        R: FnOnce() -> BoxFuture<'a, Result<Vec<String>, WorkflowError>> + Send,
        P: FnOnce(String) -> BoxFuture<'a, Result<(), WorkflowError>> + Send,
    {
        let _guard = self.lock(&key).await;
        let existing = read_existing().await?;
        let id = next_id(&existing, prefix, width);
        persist(id.clone()).await?;
        Ok(id)
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new()
    }
}
