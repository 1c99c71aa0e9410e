//! Ephemeral per-domain facts: MX snapshot, provider identity, catch-all
//! state. Each attribute carries its own TTL (DNS honours record TTLs capped
//! by config; catch-all defaults to seven days), and look-ups for the same
//! domain coalesce onto a single in-flight operation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::dns::{DnsError, MxResolve};
use crate::model::{CatchAllStatus, MxHost, Provider};
use crate::provider;

/// The cached, classified MX answer for one domain.
#[derive(Debug, Clone)]
pub struct MxSnapshot {
    pub hosts: Arc<Vec<MxHost>>,
    /// Hosts are A/AAAA fallback addresses rather than MX records.
    pub fallback: bool,
    pub provider: Provider,
}

struct MxEntry {
    snapshot: MxSnapshot,
    expires_at: Instant,
}

struct CatchAllEntry {
    status: CatchAllStatus,
    expires_at: Instant,
}

/// Domain-keyed fact cache with per-attribute TTLs and single-flight.
pub struct DomainFactsCache {
    mx: DashMap<String, MxEntry>,
    catch_all: DashMap<String, CatchAllEntry>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    mx_min_ttl: Duration,
    mx_max_ttl: Duration,
    catch_all_ttl: Duration,
}

impl DomainFactsCache {
    pub fn new(mx_max_ttl: Duration, catch_all_ttl: Duration) -> Self {
        Self {
            mx: DashMap::new(),
            catch_all: DashMap::new(),
            flights: DashMap::new(),
            mx_min_ttl: Duration::from_secs(60),
            mx_max_ttl,
            catch_all_ttl,
        }
    }

    fn flight(&self, key: &str) -> Arc<Mutex<()>> {
        self.flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn cached_mx(&self, domain: &str) -> Option<MxSnapshot> {
        let entry = self.mx.get(domain)?;
        if entry.expires_at > Instant::now() {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    /// Resolve MX facts through the cache. Concurrent callers for the same
    /// uncached domain trigger exactly one resolver query.
    pub async fn mx(
        &self,
        domain: &str,
        resolver: &dyn MxResolve,
    ) -> Result<MxSnapshot, DnsError> {
        if let Some(hit) = self.cached_mx(domain) {
            return Ok(hit);
        }

        let flight = self.flight(domain);
        let _guard = flight.lock().await;
        if let Some(hit) = self.cached_mx(domain) {
            return Ok(hit);
        }

        let records = resolver.resolve(domain).await?;
        let snapshot = MxSnapshot {
            provider: provider::classify(&records.hosts, domain),
            hosts: Arc::new(records.hosts),
            fallback: records.fallback,
        };
        let ttl = records.ttl.clamp(self.mx_min_ttl, self.mx_max_ttl);
        debug!(%domain, provider = %snapshot.provider, ttl = ?ttl, "caching MX facts");
        self.mx.insert(
            domain.to_string(),
            MxEntry {
                snapshot: snapshot.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(snapshot)
    }

    /// Current catch-all state; `Unknown` when never probed or expired.
    pub fn catch_all_status(&self, domain: &str) -> CatchAllStatus {
        match self.catch_all.get(domain) {
            Some(entry) if entry.expires_at > Instant::now() => entry.status,
            _ => CatchAllStatus::Unknown,
        }
    }

    /// Record a probe outcome. `Unknown` is never stored; a probe either
    /// resolved the question or found the domain unreachable.
    pub fn set_catch_all(&self, domain: &str, status: CatchAllStatus) {
        if status == CatchAllStatus::Unknown {
            return;
        }
        self.catch_all.insert(
            domain.to_string(),
            CatchAllEntry {
                status,
                expires_at: Instant::now() + self.catch_all_ttl,
            },
        );
    }

    /// Serialize catch-all probing per domain. Callers must re-check
    /// [`catch_all_status`](Self::catch_all_status) after acquiring.
    pub async fn catch_all_flight(&self, domain: &str) -> OwnedMutexGuard<()> {
        self.flight(&format!("catch-all:{domain}")).lock_owned().await
    }

    /// Drop every cached fact; the next look-ups go back to the wire.
    pub fn clear(&self) {
        self.mx.clear();
        self.catch_all.clear();
    }

    /// (cached MX domains, domains with a resolved catch-all state).
    pub fn len(&self) -> (usize, usize) {
        (self.mx.len(), self.catch_all.len())
    }

    pub fn is_empty(&self) -> bool {
        self.mx.is_empty() && self.catch_all.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MxResolve for CountingResolver {
        async fn resolve(&self, domain: &str) -> Result<crate::dns::MxRecords, DnsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Slow enough that concurrent callers overlap.
            tokio::time::sleep(Duration::from_millis(25)).await;
            Ok(crate::dns::MxRecords {
                domain: domain.to_string(),
                hosts: vec![MxHost::new("mx.smallco.test", 10)],
                fallback: false,
                ttl: Duration::from_secs(3600),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_mx_lookups_single_flight() {
        let cache = Arc::new(DomainFactsCache::new(
            Duration::from_secs(86_400),
            Duration::from_secs(604_800),
        ));
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let resolver = resolver.clone();
            tasks.push(tokio::spawn(async move {
                cache.mx("smallco.test", resolver.as_ref()).await.unwrap()
            }));
        }
        for task in tasks {
            let snapshot = task.await.unwrap();
            assert_eq!(snapshot.hosts.len(), 1);
        }

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn catch_all_state_round_trips() {
        let cache = DomainFactsCache::new(Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(cache.catch_all_status("a.test"), CatchAllStatus::Unknown);

        cache.set_catch_all("a.test", CatchAllStatus::Yes);
        assert_eq!(cache.catch_all_status("a.test"), CatchAllStatus::Yes);

        cache.set_catch_all("b.test", CatchAllStatus::Unreachable);
        assert_eq!(cache.catch_all_status("b.test"), CatchAllStatus::Unreachable);

        // Unknown is a non-answer and must not overwrite anything.
        cache.set_catch_all("a.test", CatchAllStatus::Unknown);
        assert_eq!(cache.catch_all_status("a.test"), CatchAllStatus::Yes);
    }

    #[tokio::test]
    async fn catch_all_expires() {
        let cache = DomainFactsCache::new(Duration::from_secs(60), Duration::from_millis(10));
        cache.set_catch_all("a.test", CatchAllStatus::No);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.catch_all_status("a.test"), CatchAllStatus::Unknown);
    }
}
