//! # verimail_core
//!
//! Self-hosted email deliverability verification: given an address, decide
//! whether the mailbox is deliverable (`safe`), accepts everything
//! (`risky`/catch-all), does not exist (`invalid`), or cannot be determined
//! (`unknown`) — at high throughput over large lists.
//!
//! The engine is a tiered cascade of increasingly expensive checks:
//!
//! 1. **cache** — persistent verdict store, stale entries refresh in the
//!    background
//! 2. **fast** — syntax, metadata, MX resolution, and provider priors
//! 3. **smtp** — a live RCPT TO conversation (never DATA), preceded by a
//!    catch-all probe when the domain's state is unknown
//! 4. **pattern** — local-part shape heuristics
//! 5. **enrichment** — external person-lookup waterfall
//! 6. **re-verify** — one more SMTP pass for enriched candidates
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use verimail_core::{Dispatcher, MxResolver, SqliteStore, VerifierConfig, VerifyRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = VerifierConfig::default();
//!     let resolver = Arc::new(MxResolver::new(config.dns_timeout, config.dns_attempts));
//!     let store = Arc::new(SqliteStore::open("verified.db")?);
//!     let dispatcher = Dispatcher::new(config, resolver, store, Vec::new())?;
//!
//!     let outcome = dispatcher
//!         .verify(VerifyRequest::new("jane.doe@example.com"))
//!         .await?;
//!     println!("{}: {}", outcome.verdict.normalized, outcome.verdict.reachability);
//!     Ok(())
//! }
//! ```

pub mod catch_all;
pub mod dispatcher;
pub mod dns;
pub mod enrichment;
pub mod metadata;
pub mod model;
pub mod pattern;
pub mod provider;
pub mod smtp;
pub mod store;
pub mod syntax;

use std::time::Duration;

use thiserror::Error;

use crate::smtp::ProbeSettings;

/// Every runtime knob, with the documented defaults.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Domain announced in EHLO/HELO.
    pub helo_domain: String,
    /// Envelope sender used in MAIL FROM.
    pub from_address: String,
    /// SMTP destination port (production: 25).
    pub smtp_port: u16,

    /// Global cap on simultaneous SMTP conversations.
    pub concurrency: usize,
    /// Cap on simultaneous conversations to one destination host.
    pub per_host_concurrency: usize,
    /// Cap on simultaneous external enrichment calls.
    pub enrichment_concurrency: usize,
    /// Requests allowed to queue for SMTP capacity beyond `concurrency`
    /// before new ones are shed with an `overloaded` verdict.
    pub overload_queue: usize,

    /// When false, only the cache and SMTP tiers run.
    pub tiered_enabled: bool,
    /// Fast-tier acceptance threshold.
    pub fast_confidence_threshold: f64,
    /// Pattern-tier acceptance threshold.
    pub pattern_strong_threshold: f64,
    /// Pattern band that qualifies an address for enrichment.
    pub pattern_medium_band: (f64, f64),

    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Budget for one conversation against one target host.
    pub target_budget: Duration,
    /// Overall per-request budget (extended by 10 s when enrichment runs).
    pub request_budget: Duration,

    /// Extra SMTP attempts after a greylist deferral; 0 preserves
    /// throughput and is the default.
    pub greylist_retries: u32,
    pub greylist_delay: Duration,
    /// Attempt STARTTLS when offered.
    pub use_starttls: bool,

    pub dns_timeout: Duration,
    pub dns_attempts: usize,
    /// Cap applied to DNS record TTLs in the domain facts cache.
    pub mx_cache_max_ttl: Duration,
    /// Memoization window for catch-all probe results.
    pub catch_all_ttl: Duration,
    /// Verdict freshness window; older records refresh in the background.
    pub freshness: Duration,

    /// Max recipients per batched SMTP conversation.
    pub batch_conversation_cap: usize,
    /// Max entries in one batch request.
    pub max_batch: usize,

    /// Run the enrichment tiers when providers are configured.
    pub enrichment_enabled: bool,

    /// Bound on verdict writes buffered while the store is down.
    pub write_buffer_cap: usize,
    /// False-positive rate for the disposable-domain Bloom filter.
    pub disposable_fp_rate: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            helo_domain: "verify.localdomain".to_string(),
            from_address: "postmaster@verify.localdomain".to_string(),
            smtp_port: 25,
            concurrency: 20,
            per_host_concurrency: 4,
            enrichment_concurrency: 8,
            overload_queue: 100,
            tiered_enabled: true,
            fast_confidence_threshold: 0.85,
            pattern_strong_threshold: 0.88,
            pattern_medium_band: (0.70, 0.88),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            target_budget: Duration::from_secs(20),
            request_budget: Duration::from_secs(20),
            greylist_retries: 0,
            greylist_delay: Duration::from_secs(35),
            use_starttls: true,
            dns_timeout: Duration::from_secs(5),
            dns_attempts: 2,
            mx_cache_max_ttl: Duration::from_secs(24 * 60 * 60),
            catch_all_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            freshness: Duration::from_secs(30 * 24 * 60 * 60),
            batch_conversation_cap: 750,
            max_batch: 1000,
            enrichment_enabled: false,
            write_buffer_cap: 10_000,
            disposable_fp_rate: 0.0001,
        }
    }
}

impl VerifierConfig {
    /// Probe settings derived from the SMTP-related knobs.
    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            helo_domain: self.helo_domain.clone(),
            from_address: self.from_address.clone(),
            port: self.smtp_port,
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
            target_budget: self.target_budget,
            use_starttls: self.use_starttls,
            greylist_retries: self.greylist_retries,
            greylist_delay: self.greylist_delay,
            max_concurrency: self.concurrency,
            per_host_concurrency: self.per_host_concurrency,
        }
    }
}

/// Errors raised while building the engine. Verification itself never
/// errors except for invalid input; see [`dispatcher::InputError`].
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

// Re-export the main surface.
pub use catch_all::CatchAllProber;
pub use dispatcher::{Dispatcher, InputError};
pub use dns::{DnsError, MxRecords, MxResolve, MxResolver};
pub use enrichment::{HttpLookupConfig, HttpPersonLookup, PersonLookup, PersonMatch, Waterfall};
pub use metadata::{AddressMeta, Classifier};
pub use model::{
    CatchAllStatus, MxHost, NameHint, Provider, Reachability, Tier, Verdict, VerifyOutcome,
    VerifyRequest,
};
pub use smtp::{ReplyCategory, SmtpProbe, SmtpReply};
pub use store::remote::RemoteConfig;
pub use store::resilient::StoreHealth;
pub use store::{
    migrate, DomainFactsCache, RemoteStore, ResilientStore, ScanFilter, SqliteStore, StoreError,
    StoreStats, StoredVerdict, VerdictStore,
};
pub use syntax::{Address, SyntaxViolation};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = VerifierConfig::default();
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.per_host_concurrency, 4);
        assert_eq!(config.enrichment_concurrency, 8);
        assert_eq!(config.fast_confidence_threshold, 0.85);
        assert_eq!(config.pattern_strong_threshold, 0.88);
        assert_eq!(config.pattern_medium_band, (0.70, 0.88));
        assert_eq!(config.batch_conversation_cap, 750);
        assert_eq!(config.max_batch, 1000);
        assert_eq!(config.greylist_retries, 0);
        assert_eq!(config.freshness, Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(config.catch_all_ttl, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.mx_cache_max_ttl, Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn probe_settings_inherit_identity() {
        let mut config = VerifierConfig::default();
        config.helo_domain = "verify.corp.example".to_string();
        config.from_address = "probe@corp.example".to_string();
        let settings = config.probe_settings();
        assert_eq!(settings.helo_domain, "verify.corp.example");
        assert_eq!(settings.from_address, "probe@corp.example");
        assert_eq!(settings.max_concurrency, 20);
    }
}
