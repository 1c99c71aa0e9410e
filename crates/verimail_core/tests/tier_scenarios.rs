//! End-to-end tier scenarios against an in-process mock SMTP server.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use support::{is_random_probe_local, test_config, MockSmtp, StaticResolver};
use verimail_core::enrichment::{EnrichmentError, PersonLookup, PersonMatch};
use verimail_core::syntax::Address;
use verimail_core::{
    Dispatcher, MxHost, NameHint, Provider, Reachability, SqliteStore, Tier, VerdictStore,
    VerifyRequest,
};

fn dispatcher_with(
    config: verimail_core::VerifierConfig,
    resolver: StaticResolver,
    lookups: Vec<Arc<dyn PersonLookup>>,
) -> Arc<Dispatcher> {
    let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory store"));
    Dispatcher::new(config, Arc::new(resolver), store, lookups).expect("dispatcher")
}

/// Scenario: a Gmail address clears the fast tier without any SMTP work.
#[tokio::test]
async fn gmail_address_is_fast_tier_safe() {
    let resolver = StaticResolver::new().route_hosts(
        "gmail.com",
        vec![MxHost::new("gmail-smtp-in.l.google.com", 5)],
    );
    // Unroutable port: the test fails loudly if the fast tier ever probes.
    let dispatcher = dispatcher_with(test_config(9), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("Foo.Bar+news@Gmail.COM"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.normalized, "foobar@gmail.com");
    assert_eq!(v.reachability, Reachability::Safe);
    assert_eq!(v.tier, Tier::Fast);
    assert_eq!(v.smtp_code, 0);
    assert!(v.is_free);
    assert_eq!(v.provider, Provider::Gmail);
}

/// Scenario: a role account on a catch-all domain is risky, not safe.
#[tokio::test]
async fn role_account_on_catch_all_domain_is_risky() {
    // Accept every recipient, including the random probe.
    let server = MockSmtp::spawn(|_| (250, "2.1.5 ok".to_string())).await;
    let resolver = StaticResolver::new().route("acme.example", "127.0.0.1");
    let dispatcher = dispatcher_with(test_config(server.port()), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("support@acme.example"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Risky);
    assert_eq!(v.tier, Tier::Smtp);
    assert_eq!(v.is_catch_all, Some(true));
    assert!(v.is_role);
    server.assert_no_data();
}

/// Scenario: SMTP inconclusive + strong name pattern on a corporate domain
/// resolves through the pattern tier.
#[tokio::test]
async fn strong_pattern_on_corporate_domain_is_pattern_tier_safe() {
    let server = MockSmtp::spawn(|recipient| {
        let local = recipient.split('@').next().unwrap_or_default();
        if is_random_probe_local(local) {
            (550, "5.1.1 user unknown".to_string())
        } else {
            (451, "4.7.1 greylisted, try again later".to_string())
        }
    })
    .await;
    let resolver = StaticResolver::new().route("smallco.test", "127.0.0.1");
    let dispatcher = dispatcher_with(test_config(server.port()), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("jane.doe@smallco.test"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Safe);
    assert_eq!(v.tier, Tier::Pattern);
    assert_eq!(v.is_catch_all, Some(false));
    server.assert_no_data();
}

struct FixedLookup {
    calls: AtomicUsize,
}

#[async_trait]
impl PersonLookup for FixedLookup {
    fn name(&self) -> &str {
        "directory"
    }

    fn cost(&self) -> f64 {
        0.001
    }

    async fn search(
        &self,
        _address: &Address,
        _hint: Option<&NameHint>,
    ) -> Result<Option<PersonMatch>, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PersonMatch {
            name: "J Doe".to_string(),
            title: Some("CFO".to_string()),
            confidence: 0.92,
            source: "directory".to_string(),
        }))
    }
}

/// Scenario: medium pattern + enrichment hit + 250 on re-probe upgrades
/// through the re-verification tier.
#[tokio::test]
async fn enrichment_hit_with_smtp_confirmation_is_reverify_safe() {
    // The target defers on its first RCPT and accepts on the second; the
    // random probe is always rejected.
    let target_calls = Arc::new(AtomicUsize::new(0));
    let counting = target_calls.clone();
    let server = MockSmtp::spawn(move |recipient| {
        let local = recipient.split('@').next().unwrap_or_default();
        if is_random_probe_local(local) {
            return (550, "5.1.1 user unknown".to_string());
        }
        if counting.fetch_add(1, Ordering::SeqCst) == 0 {
            (451, "4.2.0 try again later".to_string())
        } else {
            (250, "2.1.5 ok".to_string())
        }
    })
    .await;

    let resolver = StaticResolver::new().route("smallco.test", "127.0.0.1");
    let mut config = test_config(server.port());
    config.enrichment_enabled = true;
    let lookup = Arc::new(FixedLookup {
        calls: AtomicUsize::new(0),
    });
    let dispatcher = dispatcher_with(config, resolver, vec![lookup.clone() as Arc<dyn PersonLookup>]);

    let outcome = dispatcher
        .verify(VerifyRequest::new("jdoe@smallco.test"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Safe);
    assert_eq!(v.tier, Tier::ReVerify);
    assert_eq!(v.smtp_code, 250);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    server.assert_no_data();
}

/// Scenario: NXDOMAIN short-circuits in the fast tier.
#[tokio::test]
async fn nxdomain_is_fast_tier_invalid() {
    let resolver = StaticResolver::new().nxdomain("nxdomain.invalid");
    let dispatcher = dispatcher_with(test_config(9), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("typo@nxdomain.invalid"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Invalid);
    assert_eq!(v.smtp_code, 0);
    assert_eq!(v.tier, Tier::Fast);
    assert_eq!(v.error.as_deref(), Some("nxdomain"));
}

/// Scenario: an English 550 user-unknown is a classified invalid.
#[tokio::test]
async fn user_unknown_550_is_invalid_with_reason() {
    let server = MockSmtp::spawn(|recipient| {
        let local = recipient.split('@').next().unwrap_or_default();
        if is_random_probe_local(local) {
            (550, "5.1.1 no such user".to_string())
        } else {
            (550, "5.1.1 user unknown".to_string())
        }
    })
    .await;
    let resolver = StaticResolver::new().route("bigcorp.test", "127.0.0.1");
    let dispatcher = dispatcher_with(test_config(server.port()), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("alice@bigcorp.test"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Invalid);
    assert_eq!(v.error.as_deref(), Some("mailbox_unknown"));
    assert_eq!(v.tier, Tier::Smtp);
    assert_eq!(v.smtp_code, 550);
    server.assert_no_data();
}

/// A clean 250 on a non-catch-all domain is plain SMTP-tier safe.
#[tokio::test]
async fn clean_accept_is_smtp_tier_safe() {
    let server = MockSmtp::spawn(|recipient| {
        let local = recipient.split('@').next().unwrap_or_default();
        if is_random_probe_local(local) {
            (550, "5.1.1 user unknown".to_string())
        } else {
            (250, "2.1.5 ok".to_string())
        }
    })
    .await;
    let resolver = StaticResolver::new().route("smallco.test", "127.0.0.1");
    let dispatcher = dispatcher_with(test_config(server.port()), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("kai.wong@smallco.test"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Safe);
    assert_eq!(v.tier, Tier::Smtp);
    assert_eq!(v.smtp_code, 250);
    assert_eq!(v.is_catch_all, Some(false));
    assert!(v.is_deliverable == Some(true));
    server.assert_no_data();
}

/// Disposable domains are rejected without any conversation.
#[tokio::test]
async fn disposable_domain_is_invalid_without_smtp() {
    let server = MockSmtp::spawn(|_| (250, "2.1.5 ok".to_string())).await;
    let resolver = StaticResolver::new().route("mailinator.com", "127.0.0.1");
    let dispatcher = dispatcher_with(test_config(server.port()), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("whoever@mailinator.com"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Invalid);
    assert!(v.is_disposable);
    assert_eq!(v.error.as_deref(), Some("disposable_domain"));
    assert_eq!(server.connection_count(), 0, "disposable must not be probed");
}

/// A null MX answer means the domain opted out of mail.
#[tokio::test]
async fn null_mx_is_invalid() {
    let resolver = StaticResolver::new().null_mx("nomail.test");
    let dispatcher = dispatcher_with(test_config(9), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("user@nomail.test"))
        .await
        .unwrap();

    assert_eq!(outcome.verdict.reachability, Reachability::Invalid);
    assert_eq!(outcome.verdict.error.as_deref(), Some("null_mx"));
}

/// Transient DNS failures answer unknown and are not persisted.
#[tokio::test]
async fn dns_transient_is_unknown_and_uncached() {
    let resolver = StaticResolver::new().transient("flaky.test");
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let dispatcher = Dispatcher::new(
        test_config(9),
        Arc::new(resolver),
        store.clone(),
        Vec::new(),
    )
    .unwrap();

    let outcome = dispatcher
        .verify(VerifyRequest::new("user@flaky.test"))
        .await
        .unwrap();

    assert_eq!(outcome.verdict.reachability, Reachability::Unknown);
    assert_eq!(outcome.verdict.error.as_deref(), Some("dns_transient"));
    assert!(store.get("user@flaky.test").await.unwrap().is_none());
}

/// Malformed input is the one explicit error outcome.
#[tokio::test]
async fn malformed_address_is_input_error() {
    let dispatcher = dispatcher_with(test_config(9), StaticResolver::new(), Vec::new());
    let result = dispatcher.verify(VerifyRequest::new("not-an-address")).await;
    assert!(result.is_err());
}

/// Hotmail consumer mailboxes are policy-risky without probing.
#[tokio::test]
async fn hotmail_is_policy_risky_without_probe() {
    let resolver = StaticResolver::new().route_hosts(
        "hotmail.com",
        vec![MxHost::new("hotmail-com.olc.protection.outlook.com", 5)],
    );
    let dispatcher = dispatcher_with(test_config(9), resolver, Vec::new());

    let outcome = dispatcher
        .verify(VerifyRequest::new("someone.real@hotmail.com"))
        .await
        .unwrap();

    let v = &outcome.verdict;
    assert_eq!(v.reachability, Reachability::Risky);
    assert_eq!(v.error.as_deref(), Some("provider_unverifiable"));
    assert_eq!(v.smtp_code, 0);
}
