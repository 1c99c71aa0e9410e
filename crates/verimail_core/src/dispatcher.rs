//! The tiered dispatcher.
//!
//! Walks each request through the cascade — cache, fast classification, live
//! SMTP, pattern heuristics, enrichment, re-verification — short-circuiting
//! on definitive answers. Batches group addresses by domain so MX resolution,
//! the catch-all probe, and the SMTP conversation are shared. All terminal
//! decisions are written through to the verdict store; stale cache hits are
//! served immediately and refreshed in the background.
//!
//! Tiers run strictly in order within one request. Across requests the only
//! shared mutable state is the verdict store and the domain facts cache;
//! everything else is bounded by the SMTP/enrichment semaphores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::catch_all::CatchAllProber;
use crate::dns::{DnsError, MxResolve};
use crate::enrichment::Waterfall;
use crate::metadata::{AddressMeta, Classifier};
use crate::model::{
    CatchAllStatus, NameHint, Provider, Reachability, Tier, Verdict, VerifyOutcome, VerifyRequest,
};
use crate::pattern;
use crate::smtp::{SmtpProbe, SmtpReply};
use crate::store::{
    DomainFactsCache, MxSnapshot, ResilientStore, StoreError, StoreStats, VerdictStore,
};
use crate::syntax::{self, Address, SyntaxViolation};
use crate::VerifierConfig;

/// Caller mistakes. Everything else comes back as a verdict.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid address: {0}")]
    Address(#[from] SyntaxViolation),
    #[error("batch of {0} entries exceeds the limit of {1}")]
    BatchTooLarge(usize, usize),
}

/// Where a verdict that needs SMTP work stands after the cheap tiers.
enum PreOutcome {
    Done(VerifyOutcome),
    Smtp(Box<SmtpJob>),
}

/// Context carried from the cheap tiers into the SMTP-and-later tiers.
struct SmtpJob {
    address: Address,
    hint: NameHint,
    meta: AddressMeta,
    snapshot: MxSnapshot,
    catch_all: CatchAllStatus,
}

/// The tiered verification orchestrator.
pub struct Dispatcher {
    config: VerifierConfig,
    classifier: Classifier,
    resolver: Arc<dyn MxResolve>,
    facts: Arc<DomainFactsCache>,
    probe: Arc<SmtpProbe>,
    catch_all: CatchAllProber,
    enrichment: Option<Waterfall>,
    store: Arc<ResilientStore>,
    /// Requests currently waiting on or holding SMTP capacity.
    smtp_pressure: AtomicUsize,
}

impl Dispatcher {
    /// Wire up a dispatcher from its capabilities.
    ///
    /// `lookups` may be empty; the enrichment tiers are then skipped even
    /// when enabled in config.
    pub fn new(
        config: VerifierConfig,
        resolver: Arc<dyn MxResolve>,
        store: Arc<dyn VerdictStore>,
        lookups: Vec<Arc<dyn crate::enrichment::PersonLookup>>,
    ) -> Result<Arc<Self>, crate::VerifierError> {
        let classifier = Classifier::bundled(config.disposable_fp_rate)
            .map_err(|e| crate::VerifierError::Init(e.to_string()))?;
        let facts = Arc::new(DomainFactsCache::new(
            config.mx_cache_max_ttl,
            config.catch_all_ttl,
        ));
        let probe = Arc::new(SmtpProbe::new(config.probe_settings()));
        let catch_all = CatchAllProber::new(probe.clone(), facts.clone());
        let enrichment = if config.enrichment_enabled && !lookups.is_empty() {
            Some(Waterfall::new(lookups, config.enrichment_concurrency))
        } else {
            None
        };
        let store = Arc::new(ResilientStore::new(store, config.write_buffer_cap));

        Ok(Arc::new(Self {
            config,
            classifier,
            resolver,
            facts,
            probe,
            catch_all,
            enrichment,
            store,
            smtp_pressure: AtomicUsize::new(0),
        }))
    }

    /// Verify one address through the full cascade.
    pub async fn verify(self: &Arc<Self>, request: VerifyRequest) -> Result<VerifyOutcome, InputError> {
        let address = syntax::parse(&request.address)?;
        let meta = self.classifier.classify(&address.local, &address.domain);

        let budget = self.request_budget();
        match timeout(budget, self.run_tiers(address.clone(), request.hint, true)).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                warn!(address = %address.normalized, ?budget, "request budget exhausted");
                let verdict = self.base_verdict(&address, meta, None, Tier::Smtp);
                Ok(self.finish(verdict, Reachability::Unknown, Some("timeout"), "timeout", false)
                    .await)
            }
        }
    }

    /// Verify a batch, grouped by domain, preserving input order.
    ///
    /// Malformed entries become `invalid` outcomes rather than failing the
    /// batch; only an oversized batch is an input error.
    pub async fn verify_batch(
        self: &Arc<Self>,
        requests: Vec<VerifyRequest>,
    ) -> Result<Vec<VerifyOutcome>, InputError> {
        if requests.len() > self.config.max_batch {
            return Err(InputError::BatchTooLarge(
                requests.len(),
                self.config.max_batch,
            ));
        }

        // Parse everything up front and bucket the valid entries by domain.
        let mut slots: Vec<Option<VerifyOutcome>> = Vec::with_capacity(requests.len());
        let mut by_domain: std::collections::HashMap<String, Vec<(usize, Address, NameHint)>> =
            std::collections::HashMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            match syntax::parse(&request.address) {
                Ok(address) => {
                    slots.push(None);
                    by_domain.entry(address.domain.clone()).or_default().push((
                        index,
                        address,
                        request.hint,
                    ));
                }
                Err(violation) => {
                    let verdict =
                        Verdict::rejected(&request.address, request.address.trim(), violation.to_string());
                    slots.push(Some(VerifyOutcome::new(verdict, "invalid_address")));
                }
            }
        }

        let mut tasks = Vec::with_capacity(by_domain.len());
        for (domain, entries) in by_domain {
            let dispatcher = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                dispatcher.verify_domain_group(&domain, entries).await
            }));
        }

        for task in tasks {
            let results = task.await.unwrap_or_default();
            for (index, outcome) in results {
                slots[index] = Some(outcome);
            }
        }

        Ok(slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    // A panicked group task; answer unknown rather than drop.
                    let verdict = Verdict::rejected("", "", "internal error");
                    VerifyOutcome::new(verdict, "internal_error")
                })
            })
            .collect())
    }

    /// Verdict store statistics for operator surfaces.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats().await
    }

    /// Store health for readiness probes.
    pub fn store_health(&self) -> crate::store::resilient::StoreHealth {
        self.store.health()
    }

    pub fn store(&self) -> Arc<ResilientStore> {
        self.store.clone()
    }

    fn request_budget(&self) -> Duration {
        // All six tiers can only run when enrichment is wired up.
        if self.enrichment.is_some() {
            self.config.request_budget + Duration::from_secs(10)
        } else {
            self.config.request_budget
        }
    }

    // ---------------------------------------------------------------- tiers

    async fn run_tiers(
        self: &Arc<Self>,
        address: Address,
        hint: NameHint,
        use_cache: bool,
    ) -> VerifyOutcome {
        match self.pre_smtp(address, hint, use_cache, true).await {
            PreOutcome::Done(outcome) => outcome,
            PreOutcome::Smtp(job) => self.smtp_and_later(*job, None).await,
        }
    }

    /// Tiers 1 and 2: cache, then syntax/DNS/provider classification.
    async fn pre_smtp(
        self: &Arc<Self>,
        address: Address,
        hint: NameHint,
        use_cache: bool,
        allow_fast: bool,
    ) -> PreOutcome {
        let meta = self.classifier.classify(&address.local, &address.domain);

        // Tier 1: cache.
        if use_cache {
            if let Ok(Some(stored)) = self.store.get(&address.normalized).await {
                if stored.age <= self.config.freshness {
                    debug!(address = %address.normalized, age = ?stored.age, "cache hit");
                    let mut verdict = stored.verdict;
                    verdict.tier = Tier::Cache;
                    return PreOutcome::Done(VerifyOutcome::new(verdict, "cached_result"));
                }

                debug!(address = %address.normalized, age = ?stored.age, "stale cache hit, refreshing");
                self.spawn_background_refresh(address.clone(), hint.clone());
                let mut verdict = stored.verdict;
                verdict.tier = Tier::Cache;
                return PreOutcome::Done(VerifyOutcome::new(verdict, "cached_stale_refreshing"));
            }
        }

        // Tier 2: DNS resolution is needed by every later tier, so its
        // failure modes terminate here no matter what.
        let snapshot = match self.facts.mx(&address.domain, self.resolver.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(e) => return PreOutcome::Done(self.dns_failure(&address, meta, &e).await),
        };

        // Disposable domains never merit a conversation.
        if meta.is_disposable {
            let verdict = self.base_verdict(&address, meta, Some(&snapshot), Tier::Fast);
            return PreOutcome::Done(
                self.finish(
                    verdict,
                    Reachability::Invalid,
                    Some("disposable_domain"),
                    "disposable_domain",
                    true,
                )
                .await,
            );
        }

        // Fast-tier confidence short-circuit. A domain already known to be
        // catch-all never short-circuits here; its 250s prove nothing.
        if allow_fast
            && self.config.tiered_enabled
            && self.facts.catch_all_status(&address.domain) != CatchAllStatus::Yes
        {
            let confidence = fast_confidence(snapshot.provider, meta);
            if confidence >= self.config.fast_confidence_threshold && !meta.is_role {
                debug!(
                    address = %address.normalized,
                    confidence,
                    provider = %snapshot.provider,
                    "fast tier accepted"
                );
                let mut verdict = self.base_verdict(&address, meta, Some(&snapshot), Tier::Fast);
                verdict.is_deliverable = Some(true);
                self.spawn_background_confirm(address.clone(), hint.clone());
                return PreOutcome::Done(
                    self.finish(
                        verdict,
                        Reachability::Safe,
                        None,
                        format!("fast_confidence_{confidence:.2}"),
                        true,
                    )
                    .await,
                );
            }
        }

        PreOutcome::Smtp(Box::new(SmtpJob {
            address,
            hint,
            meta,
            snapshot,
            catch_all: CatchAllStatus::Unknown,
        }))
    }

    /// Tiers 3 through 6 for one address. `batched_reply` carries the RCPT
    /// reply when the conversation already happened in a domain batch.
    async fn smtp_and_later(
        self: &Arc<Self>,
        mut job: SmtpJob,
        batched_reply: Option<SmtpReply>,
    ) -> VerifyOutcome {
        let policy = job.snapshot.provider.policy();

        // Providers whose MXes cannot be probed meaningfully.
        if policy.mark_risky || !policy.probe_smtp {
            let mut verdict =
                self.base_verdict(&job.address, job.meta, Some(&job.snapshot), Tier::Smtp);
            verdict.is_catch_all = None;
            return self
                .finish(
                    verdict,
                    Reachability::Risky,
                    Some("provider_unverifiable"),
                    "provider_policy_risky",
                    true,
                )
                .await;
        }

        let reply = match batched_reply {
            Some(reply) => {
                self.resolve_catch_all(&mut job).await;
                reply
            }
            None => {
                if let Some(outcome) = self.overloaded(&job).await {
                    return outcome;
                }
                let _pressure = PressureGuard::new(&self.smtp_pressure);
                // Catch-all first, so a 250 on the target is interpretable.
                self.resolve_catch_all(&mut job).await;
                self.probe
                    .check(&job.address.normalized, &job.snapshot.hosts)
                    .await
            }
        };

        self.interpret_reply(job, reply).await
    }

    /// Resolve the domain catch-all question per provider policy.
    async fn resolve_catch_all(&self, job: &mut SmtpJob) {
        let policy = job.snapshot.provider.policy();
        if !policy.probe_catch_all {
            // Policy knowledge, not a probe result: the provider rejects
            // unknown mailboxes reliably.
            job.catch_all = CatchAllStatus::No;
            return;
        }
        if job.catch_all == CatchAllStatus::Unknown {
            job.catch_all = self
                .catch_all
                .status(&job.address.domain, &job.snapshot.hosts)
                .await;
        }
    }

    /// Map the RCPT reply per the probe contract, then walk tiers 4-6.
    async fn interpret_reply(
        self: &Arc<Self>,
        job: SmtpJob,
        reply: SmtpReply,
    ) -> VerifyOutcome {
        let mut verdict = self.base_verdict(&job.address, job.meta, Some(&job.snapshot), Tier::Smtp);
        verdict.smtp_code = reply.code;
        verdict.smtp_message = reply.message.clone();
        verdict.is_catch_all = match job.catch_all {
            CatchAllStatus::Yes => Some(true),
            CatchAllStatus::No => Some(false),
            _ => None,
        };

        // Definitive outcomes first.
        if reply.is_invalid_mailbox() {
            return self
                .finish(
                    verdict,
                    Reachability::Invalid,
                    reply.reason_code(),
                    reply.reason_code().unwrap_or("rejected"),
                    true,
                )
                .await;
        }

        if reply.is_full_inbox() {
            // The mailbox exists; it just cannot take more mail right now.
            verdict.is_deliverable = Some(true);
            return self
                .finish(verdict, Reachability::Risky, Some("mailbox_full"), "mailbox_full", true)
                .await;
        }

        if reply.is_positive() {
            if job.catch_all == CatchAllStatus::Yes {
                // Acceptance proves nothing here; see whether the later
                // tiers can establish the mailbox some other way.
                return self.pattern_and_enrichment(job, verdict, true).await;
            }
            if job.meta.is_role {
                verdict.is_deliverable = Some(true);
                return self
                    .finish(verdict, Reachability::Risky, Some("role_account"), "role_account", true)
                    .await;
            }
            verdict.is_deliverable = Some(true);
            return self.finish(verdict, Reachability::Safe, None, "smtp_250", true).await;
        }

        // Everything else is inconclusive for the SMTP tier: greylists,
        // blacklists, ambiguous 5xx, unreachable hosts.
        let reason = if reply.is_blacklisted() {
            "policy_block"
        } else if reply.is_greylisted() {
            "greylisted"
        } else if reply.is_network_failure() {
            "unreachable"
        } else {
            "ambiguous_reply"
        };
        verdict.error = Some(reason.to_string());
        self.pattern_and_enrichment(job, verdict, false).await
    }

    /// Tiers 4-6 for an address the SMTP tier could not settle.
    ///
    /// `accepted_catch_all` distinguishes "250 on a catch-all domain" (base
    /// outcome risky) from a genuinely unknown SMTP result (base outcome
    /// unknown).
    async fn pattern_and_enrichment(
        self: &Arc<Self>,
        job: SmtpJob,
        mut verdict: Verdict,
        accepted_catch_all: bool,
    ) -> VerifyOutcome {
        let finalize_base = |verdict: &mut Verdict| {
            if accepted_catch_all {
                verdict.error = Some("catch_all".to_string());
                (Reachability::Risky, "catch_all_accepts_all")
            } else {
                (Reachability::Unknown, "smtp_inconclusive")
            }
        };

        if !self.config.tiered_enabled {
            let (reachability, reason) = finalize_base(&mut verdict);
            let error = verdict.error.clone();
            return self.finish(verdict, reachability, error.as_deref(), reason, true).await;
        }

        // Tier 4: pattern heuristics.
        if job.meta.is_role {
            verdict.error = Some("role_account".to_string());
            return self
                .finish(verdict, Reachability::Risky, Some("role_account"), "role_account", true)
                .await;
        }

        let scored = pattern::score_with_hint(&job.address.local, &job.hint);
        let corporate = job.snapshot.provider.is_corporate() && !job.meta.is_free;
        // On a known catch-all domain only the re-verification tier may
        // assert safe; heuristics alone cannot.
        let upgradable = job.catch_all != CatchAllStatus::Yes;
        if scored.confidence >= self.config.pattern_strong_threshold && corporate && upgradable {
            verdict.tier = Tier::Pattern;
            verdict.error = None;
            verdict.is_deliverable = Some(true);
            return self
                .finish(
                    verdict,
                    Reachability::Safe,
                    None,
                    format!("pattern_{}_{:.2}", scored.pattern, scored.confidence),
                    true,
                )
                .await;
        }

        // Tier 5: enrichment, only for the plausible-person middle band.
        let (band_low, band_high) = self.config.pattern_medium_band;
        let plausible = scored.confidence >= band_low && scored.confidence < band_high;
        let Some(waterfall) = self.enrichment.as_ref().filter(|_| plausible) else {
            let (reachability, reason) = finalize_base(&mut verdict);
            let error = verdict.error.clone();
            return self.finish(verdict, reachability, error.as_deref(), reason, true).await;
        };

        let hint = if job.hint.is_empty() { None } else { Some(&job.hint) };
        let Some(candidate) = waterfall.search(&job.address, hint, true).await else {
            let (reachability, reason) = finalize_base(&mut verdict);
            let error = verdict.error.clone();
            return self.finish(verdict, reachability, error.as_deref(), reason, true).await;
        };

        info!(
            address = %job.address.normalized,
            source = %candidate.source,
            "enrichment candidate found, re-verifying"
        );

        // Tier 6: one more SMTP pass; only a 250 upgrades to safe.
        let reply = self
            .probe
            .check(&job.address.normalized, &job.snapshot.hosts)
            .await;
        verdict.tier = Tier::ReVerify;
        verdict.smtp_code = reply.code;
        verdict.smtp_message = reply.message.clone();

        if reply.is_positive() {
            verdict.error = None;
            verdict.is_deliverable = Some(true);
            return self
                .finish(
                    verdict,
                    Reachability::Safe,
                    None,
                    format!("enrichment_{}_smtp_confirmed", candidate.source),
                    true,
                )
                .await;
        }
        if reply.is_invalid_mailbox() {
            return self
                .finish(
                    verdict,
                    Reachability::Invalid,
                    reply.reason_code(),
                    format!("enrichment_{}_smtp_rejected", candidate.source),
                    true,
                )
                .await;
        }

        // Enrichment said yes, SMTP still could not: the distinct
        // risky-enriched sub-state.
        self.finish(
            verdict,
            Reachability::Risky,
            Some("risky_enriched"),
            "risky-enriched",
            true,
        )
        .await
    }

    // ------------------------------------------------------------ batching

    /// Process one domain's batch entries: shared MX facts, one catch-all
    /// probe, batched RCPTs in conversation-sized chunks.
    async fn verify_domain_group(
        self: &Arc<Self>,
        domain: &str,
        entries: Vec<(usize, Address, NameHint)>,
    ) -> Vec<(usize, VerifyOutcome)> {
        let mut results = Vec::with_capacity(entries.len());
        let mut jobs: Vec<(usize, SmtpJob)> = Vec::new();

        for (index, address, hint) in entries {
            match self.pre_smtp(address, hint, true, true).await {
                PreOutcome::Done(outcome) => results.push((index, outcome)),
                PreOutcome::Smtp(job) => jobs.push((index, *job)),
            }
        }

        if jobs.is_empty() {
            return results;
        }

        // One catch-all resolution for the whole group.
        let shared_status = {
            let (_, first) = &mut jobs[0];
            self.resolve_catch_all(first).await;
            first.catch_all
        };
        for (_, job) in jobs.iter_mut().skip(1) {
            job.catch_all = shared_status;
        }

        let host = jobs[0].1.snapshot.hosts.first().map(|h| h.host.clone());
        let Some(host) = host else {
            // No hosts survived resolution; let the single path answer.
            for (index, job) in jobs {
                results.push((index, self.smtp_and_later(job, None).await));
            }
            return results;
        };

        debug!(domain, recipients = jobs.len(), "running batched SMTP");
        let mut remaining = jobs;
        while !remaining.is_empty() {
            let take = remaining.len().min(self.config.batch_conversation_cap);
            let chunk: Vec<(usize, SmtpJob)> = remaining.drain(..take).collect();
            let recipients: Vec<String> = chunk
                .iter()
                .map(|(_, job)| job.address.normalized.clone())
                .collect();
            let replies = self.probe.check_batch(&recipients, &host).await;

            for ((index, job), reply) in chunk.into_iter().zip(replies) {
                results.push((index, self.smtp_and_later(job, Some(reply)).await));
            }
        }

        results
    }

    // ----------------------------------------------------------- plumbing

    async fn dns_failure(
        self: &Arc<Self>,
        address: &Address,
        meta: AddressMeta,
        error: &DnsError,
    ) -> VerifyOutcome {
        let verdict = self.base_verdict(address, meta, None, Tier::Fast);
        match error {
            DnsError::NxDomain(_) => {
                self.finish(verdict, Reachability::Invalid, Some("nxdomain"), "nxdomain", true)
                    .await
            }
            DnsError::NoRecords(_) => {
                self.finish(
                    verdict,
                    Reachability::Invalid,
                    Some("no_mx_records"),
                    "no_mx_records",
                    true,
                )
                .await
            }
            DnsError::NullMx(_) => {
                self.finish(verdict, Reachability::Invalid, Some("null_mx"), "null_mx", true)
                    .await
            }
            DnsError::Transient { .. } => {
                // Not persisted: the next request should retry the lookup.
                self.spawn_background_refresh_delayed(
                    address.clone(),
                    NameHint::default(),
                    Duration::from_secs(60),
                );
                self.finish(
                    verdict,
                    Reachability::Unknown,
                    Some("dns_transient"),
                    "dns_transient",
                    false,
                )
                .await
            }
        }
    }

    fn base_verdict(
        &self,
        address: &Address,
        meta: AddressMeta,
        snapshot: Option<&MxSnapshot>,
        tier: Tier,
    ) -> Verdict {
        Verdict {
            email: address.raw.clone(),
            normalized: address.normalized.clone(),
            reachability: Reachability::Unknown,
            is_deliverable: None,
            is_catch_all: None,
            is_disposable: meta.is_disposable,
            is_role: meta.is_role,
            is_free: meta.is_free,
            mx_host: snapshot
                .and_then(|s| s.hosts.first())
                .map(|h| h.host.clone())
                .unwrap_or_default(),
            smtp_code: 0,
            smtp_message: String::new(),
            provider: snapshot.map_or(Provider::Generic, |s| s.provider),
            domain: address.domain.clone(),
            verified_at: Utc::now(),
            error: None,
            tier,
        }
    }

    /// Stamp the final state onto a verdict, optionally write it through,
    /// and wrap it for the caller.
    async fn finish(
        &self,
        mut verdict: Verdict,
        reachability: Reachability,
        error: Option<&str>,
        reason: impl Into<String>,
        persist: bool,
    ) -> VerifyOutcome {
        verdict.reachability = reachability;
        verdict.error = error.map(str::to_string);
        verdict.verified_at = Utc::now();
        if verdict.is_deliverable.is_none() {
            verdict.is_deliverable = match reachability {
                Reachability::Invalid => Some(false),
                Reachability::Safe => Some(true),
                _ => None,
            };
        }

        if persist {
            // The resilient wrapper absorbs outages; this cannot fail.
            let _ = self.store.put(&verdict).await;
        }
        VerifyOutcome::new(verdict, reason)
    }

    /// Unknown-with-overloaded when the SMTP queue is saturated.
    async fn overloaded(&self, job: &SmtpJob) -> Option<VerifyOutcome> {
        let pressure = self.smtp_pressure.load(Ordering::Relaxed);
        let limit = self.config.concurrency + self.config.overload_queue;
        if pressure < limit {
            return None;
        }
        warn!(pressure, limit, "SMTP queue saturated, shedding request");
        let verdict = self.base_verdict(&job.address, job.meta, Some(&job.snapshot), Tier::Smtp);
        Some(
            self.finish(
                verdict,
                Reachability::Unknown,
                Some("overloaded"),
                "overloaded",
                false,
            )
            .await,
        )
    }

    fn spawn_background_refresh(self: &Arc<Self>, address: Address, hint: NameHint) {
        self.spawn_background_refresh_delayed(address, hint, Duration::ZERO);
    }

    fn spawn_background_refresh_delayed(
        self: &Arc<Self>,
        address: Address,
        hint: NameHint,
        delay: Duration,
    ) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let budget = dispatcher.request_budget();
            let work = dispatcher.refresh(address, hint);
            if timeout(budget, work).await.is_err() {
                debug!("background refresh timed out");
            }
        });
    }

    /// Fast-tier acceptance schedules a real SMTP confirmation.
    fn spawn_background_confirm(self: &Arc<Self>, address: Address, hint: NameHint) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let budget = dispatcher.request_budget();
            let work = dispatcher.refresh(address, hint);
            if timeout(budget, work).await.is_err() {
                debug!("background confirmation timed out");
            }
        });
    }

    /// Full re-verification skipping the cache and fast tiers; the result
    /// lands in the store, not with any caller.
    async fn refresh(self: Arc<Self>, address: Address, hint: NameHint) {
        let normalized = address.normalized.clone();
        let outcome = match self.pre_smtp(address, hint, false, false).await {
            PreOutcome::Done(outcome) => outcome,
            PreOutcome::Smtp(job) => self.smtp_and_later(*job, None).await,
        };
        debug!(
            address = %normalized,
            reachability = %outcome.verdict.reachability,
            reason = %outcome.reason,
            "background verification complete"
        );
    }
}

/// RAII counter for SMTP queue pressure.
struct PressureGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> PressureGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for PressureGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fast-tier confidence: the provider prior plus fixed adjustments, clamped
/// to `[0, 1]`.
fn fast_confidence(provider: Provider, meta: AddressMeta) -> f64 {
    let mut confidence = provider.prior();
    match provider {
        Provider::Gmail | Provider::GoogleWorkspace => confidence += 0.30,
        Provider::Microsoft365 => confidence += 0.20,
        _ if meta.is_free => confidence += 0.10,
        _ => {}
    }
    if !meta.is_role && !meta.is_disposable {
        confidence += 0.10;
    }
    if meta.is_disposable {
        confidence -= 0.20;
    }
    if provider == Provider::Generic {
        confidence -= 0.10;
    }
    confidence.clamp(0.0, 1.0)
}
