//! MX resolution with A/AAAA fallback.
//!
//! Resolution follows RFC 5321 section 5.1: MX records sorted by preference,
//! falling back to A/AAAA as an implicit priority-0 exchanger. A lone null MX
//! (`.`, RFC 7505) means the domain has opted out of mail entirely and is
//! reported as its own failure mode.
//!
//! The resolver behind the [`MxResolve`] trait is plain; domain-level
//! memoization and single-flight live in the domain facts cache so that test
//! resolvers get the same treatment as the production one.

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::Record;
use hickory_resolver::{AsyncResolver, TokioAsyncResolver};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::MxHost;

/// How a domain's mail routing failed to resolve.
#[derive(Debug, Clone, Error)]
pub enum DnsError {
    /// NXDOMAIN: the domain does not exist.
    #[error("domain does not exist: {0}")]
    NxDomain(String),

    /// The domain exists but has neither MX nor A/AAAA records.
    #[error("no mail servers found for domain: {0}")]
    NoRecords(String),

    /// Null MX (`.`): the domain explicitly rejects all mail.
    #[error("domain rejects mail via null MX: {0}")]
    NullMx(String),

    /// SERVFAIL, timeout, or transport failure; worth retrying later.
    #[error("DNS lookup failed for {domain}: {message}")]
    Transient { domain: String, message: String },
}

impl DnsError {
    /// Whether a later retry could produce a different answer.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// A resolved MX host set for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecords {
    pub domain: String,
    /// Ordered by preference, de-duplicated. Never empty.
    pub hosts: Vec<MxHost>,
    /// True when the hosts are A/AAAA fallback addresses, not real MXes.
    pub fallback: bool,
    /// Smallest TTL seen across the answer records.
    pub ttl: Duration,
}

/// Capability seam over MX resolution.
#[async_trait]
pub trait MxResolve: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<MxRecords, DnsError>;
}

/// Production resolver on hickory, system config with Cloudflare fallback.
pub struct MxResolver {
    resolver: TokioAsyncResolver,
}

impl MxResolver {
    /// Build a resolver from system DNS configuration, falling back to
    /// Cloudflare when `/etc/resolv.conf` is unusable.
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = attempts;
        // NXDOMAIN answers are stable; keep them around briefly so batch
        // runs against dead domains stay off the wire.
        opts.negative_min_ttl = Some(Duration::from_secs(60));

        let resolver = match hickory_resolver::system_conf::read_system_conf() {
            Ok((config, _)) => AsyncResolver::tokio(config, opts),
            Err(e) => {
                warn!(error = %e, "system DNS configuration unusable, using Cloudflare");
                AsyncResolver::tokio(ResolverConfig::cloudflare(), opts)
            }
        };

        Self { resolver }
    }

    fn map_error(domain: &str, err: &ResolveError) -> DnsError {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                if *response_code == ResponseCode::NXDomain {
                    DnsError::NxDomain(domain.to_string())
                } else {
                    DnsError::NoRecords(domain.to_string())
                }
            }
            ResolveErrorKind::Timeout => DnsError::Transient {
                domain: domain.to_string(),
                message: "query timed out".to_string(),
            },
            _ => DnsError::Transient {
                domain: domain.to_string(),
                message: err.to_string(),
            },
        }
    }

    async fn fallback_a_aaaa(&self, domain: &str) -> Result<MxRecords, DnsError> {
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) => {
                let ttl = min_ttl(lookup.as_lookup().records());
                let hosts: Vec<MxHost> = lookup
                    .iter()
                    .map(|ip| MxHost::new(ip.to_string(), 0))
                    .collect();
                if hosts.is_empty() {
                    return Err(DnsError::NoRecords(domain.to_string()));
                }
                debug!(%domain, count = hosts.len(), "using A/AAAA fallback");
                Ok(MxRecords {
                    domain: domain.to_string(),
                    hosts,
                    fallback: true,
                    ttl,
                })
            }
            Err(e) => Err(Self::map_error(domain, &e)),
        }
    }
}

#[async_trait]
impl MxResolve for MxResolver {
    async fn resolve(&self, domain: &str) -> Result<MxRecords, DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let ttl = min_ttl(lookup.as_lookup().records());
                let mut hosts: Vec<MxHost> = Vec::new();
                for mx in lookup.iter() {
                    let host = mx.exchange().to_utf8();
                    let host = host.trim_end_matches('.').to_string();
                    if host.is_empty() {
                        // Null MX. Only meaningful when it is the whole answer.
                        continue;
                    }
                    if hosts.iter().any(|h: &MxHost| h.host == host) {
                        continue;
                    }
                    hosts.push(MxHost::new(host, mx.preference()));
                }

                if hosts.is_empty() {
                    if lookup.iter().next().is_some() {
                        // The answer existed but held only the null exchanger.
                        return Err(DnsError::NullMx(domain.to_string()));
                    }
                    return self.fallback_a_aaaa(domain).await;
                }

                hosts.sort_by_key(|h| h.preference);
                debug!(%domain, count = hosts.len(), ttl = ?ttl, "resolved MX records");
                Ok(MxRecords {
                    domain: domain.to_string(),
                    hosts,
                    fallback: false,
                    ttl,
                })
            }
            Err(e) => match Self::map_error(domain, &e) {
                // No MX RRset at all: RFC 5321 implicit MX.
                DnsError::NoRecords(_) => self.fallback_a_aaaa(domain).await,
                other => Err(other),
            },
        }
    }
}

fn min_ttl(records: &[Record]) -> Duration {
    let secs = records.iter().map(Record::ttl).min().unwrap_or(300);
    Duration::from_secs(u64::from(secs))
}
