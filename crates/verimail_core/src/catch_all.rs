//! Catch-all detection.
//!
//! A domain that accepts RCPT TO for a random local part accepts everything,
//! which makes a 250 on the real target meaningless on its own. One probe per
//! domain is performed, serialized per domain, and the answer is memoized in
//! the domain facts cache (default window seven days).

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::model::{CatchAllStatus, MxHost};
use crate::smtp::SmtpProbe;
use crate::store::DomainFactsCache;

/// Length of the random local part. Long enough that a collision with a real
/// mailbox is not a practical concern.
const RANDOM_LOCAL_LEN: usize = 18;

/// Probes and memoizes per-domain catch-all state.
pub struct CatchAllProber {
    probe: Arc<SmtpProbe>,
    facts: Arc<DomainFactsCache>,
}

impl CatchAllProber {
    pub fn new(probe: Arc<SmtpProbe>, facts: Arc<DomainFactsCache>) -> Self {
        Self { probe, facts }
    }

    /// Current state for `domain`, probing if nothing fresh is cached.
    ///
    /// Concurrent callers for the same domain coalesce: exactly one probe
    /// runs, the rest read the memoized answer.
    pub async fn status(&self, domain: &str, mx_hosts: &[MxHost]) -> CatchAllStatus {
        let cached = self.facts.catch_all_status(domain);
        if cached != CatchAllStatus::Unknown {
            return cached;
        }

        let _flight = self.facts.catch_all_flight(domain).await;
        let cached = self.facts.catch_all_status(domain);
        if cached != CatchAllStatus::Unknown {
            return cached;
        }

        let status = self.probe_once(domain, mx_hosts).await;
        self.facts.set_catch_all(domain, status);
        status
    }

    async fn probe_once(&self, domain: &str, mx_hosts: &[MxHost]) -> CatchAllStatus {
        let recipient = format!("{}@{domain}", random_local());
        debug!(%domain, %recipient, "probing catch-all");
        let reply = self.probe.check(&recipient, mx_hosts).await;

        let status = if reply.is_positive() {
            CatchAllStatus::Yes
        } else if reply.is_permanent() {
            CatchAllStatus::No
        } else {
            // Timeouts, refused connections, 4xx deferrals: no round-trip
            // completed, so the question stays open.
            CatchAllStatus::Unreachable
        };
        debug!(%domain, code = reply.code, ?status, "catch-all probe result");
        status
    }
}

fn random_local() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(RANDOM_LOCAL_LEN)
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_locals_are_long_and_unpredictable() {
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let local = random_local();
            assert!(local.len() >= 16);
            assert!(local.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(seen.insert(local), "random local part repeated");
        }
    }
}
