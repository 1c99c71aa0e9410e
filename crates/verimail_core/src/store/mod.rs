//! Verdict persistence.
//!
//! Two logically distinct stores sit behind this module: durable verdicts
//! (read on every request, written after every terminal decision) and
//! ephemeral domain facts (MX snapshots, provider identity, catch-all
//! state). The durable side is a capability trait with embedded and remote
//! backends; the [`ResilientStore`] wrapper gives every backend the degraded
//! behavior the pipeline requires (reads fall through, writes buffer).

pub mod embedded;
pub mod facts;
pub mod remote;
pub mod resilient;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Reachability, Verdict};

pub use embedded::SqliteStore;
pub use facts::{DomainFactsCache, MxSnapshot};
pub use remote::RemoteStore;
pub use resilient::ResilientStore;

/// Backend failure. Callers other than the resilient wrapper should rarely
/// see these; the pipeline converts them into degraded-mode behavior.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(String),
    #[error("store returned malformed data: {0}")]
    Corrupt(String),
}

/// A stored verdict plus its age at read time.
#[derive(Debug, Clone)]
pub struct StoredVerdict {
    pub verdict: Verdict,
    pub age: Duration,
}

/// Counts reported by `stats()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_reachability: HashMap<String, u64>,
    pub catch_all: u64,
}

/// Row filter for `scan`, used by operator surfaces and migration.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub reachability: Option<Reachability>,
    pub domain: Option<String>,
    /// Only records verified strictly before this instant.
    pub verified_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Durable verdict storage keyed by normalized address.
///
/// Implementations must be safe under concurrent readers and writers and
/// must not lose a concurrent `put` for the same key; last-writer-wins by
/// `verified_at` is the required resolution.
#[async_trait]
pub trait VerdictStore: Send + Sync {
    /// Fetch a verdict with its age. Stale records are returned as-is;
    /// freshness policy belongs to the dispatcher.
    async fn get(&self, normalized: &str) -> Result<Option<StoredVerdict>, StoreError>;

    /// Upsert by `verdict.normalized`.
    async fn put(&self, verdict: &Verdict) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Verdict>, StoreError>;
}

/// Copy every verdict matching `filter` from one store into another.
///
/// Returns the number of records written. `put` semantics make the copy
/// idempotent and last-writer-wins safe.
pub async fn migrate(
    source: &dyn VerdictStore,
    target: &dyn VerdictStore,
    filter: &ScanFilter,
) -> Result<u64, StoreError> {
    let rows = source.scan(filter).await?;
    let mut written = 0u64;
    for verdict in &rows {
        target.put(verdict).await?;
        written += 1;
    }
    Ok(written)
}
