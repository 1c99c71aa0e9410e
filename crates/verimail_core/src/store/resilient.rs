//! Degraded-mode wrapper around any [`VerdictStore`].
//!
//! A store outage must never fail a verification request: reads degrade to
//! cache misses and writes are buffered in memory until the backend comes
//! back. The buffer is bounded; when full, the oldest pending write is
//! dropped (it would lose the last-writer-wins race anyway). Readiness
//! surfaces observe the degraded flag and buffered count.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::model::Verdict;
use crate::store::{ScanFilter, StoreError, StoreStats, StoredVerdict, VerdictStore};

/// Store health as reported to readiness probes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreHealth {
    pub degraded: bool,
    pub buffered_writes: usize,
}

/// A [`VerdictStore`] that absorbs backend failures.
pub struct ResilientStore {
    inner: Arc<dyn VerdictStore>,
    buffer: Mutex<VecDeque<Verdict>>,
    buffer_cap: usize,
    degraded: AtomicBool,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn VerdictStore>, buffer_cap: usize) -> Self {
        Self {
            inner,
            buffer: Mutex::new(VecDeque::new()),
            buffer_cap: buffer_cap.max(1),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn health(&self) -> StoreHealth {
        StoreHealth {
            degraded: self.degraded.load(Ordering::Relaxed),
            buffered_writes: self.buffer.try_lock().map(|b| b.len()).unwrap_or(0),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn buffer_write(&self, verdict: &Verdict) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.buffer_cap {
            buffer.pop_front();
        }
        buffer.push_back(verdict.clone());
        warn!(
            normalized = %verdict.normalized,
            buffered = buffer.len(),
            "store unavailable, buffered verdict write"
        );
    }

    /// Retry every buffered write. Stops at the first failure and keeps the
    /// remainder for the next attempt.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let mut flushed = 0;
        loop {
            let next = {
                let mut buffer = self.buffer.lock().await;
                buffer.pop_front()
            };
            let Some(verdict) = next else { break };

            if let Err(e) = self.inner.put(&verdict).await {
                let mut buffer = self.buffer.lock().await;
                buffer.push_front(verdict);
                return Err(e);
            }
            flushed += 1;
        }

        if flushed > 0 {
            info!(flushed, "flushed buffered verdict writes");
        }
        self.degraded.store(false, Ordering::Relaxed);
        Ok(flushed)
    }
}

#[async_trait]
impl VerdictStore for ResilientStore {
    /// A failed read is a cache miss, never an error.
    async fn get(&self, normalized: &str) -> Result<Option<StoredVerdict>, StoreError> {
        match self.inner.get(normalized).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(error = %e, "verdict read failed, treating as miss");
                self.degraded.store(true, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// A failed write is buffered, never surfaced.
    async fn put(&self, verdict: &Verdict) -> Result<(), StoreError> {
        if self.is_degraded() {
            // Try to recover first so writes land in order.
            if self.flush().await.is_err() {
                self.buffer_write(verdict).await;
                return Ok(());
            }
        }

        match self.inner.put(verdict).await {
            Ok(()) => {
                self.degraded.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.degraded.store(true, Ordering::Relaxed);
                self.buffer_write(verdict).await;
                Ok(())
            }
        }
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }

    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Verdict>, StoreError> {
        self.inner.scan(filter).await
    }
}
