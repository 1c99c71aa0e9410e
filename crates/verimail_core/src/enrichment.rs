//! External person-lookup capability and the cheap-then-expensive waterfall.
//!
//! Providers are black boxes behind [`PersonLookup`]: given an address (and
//! whatever name context the caller supplied), they either return a candidate
//! person or nothing. A provider outage is indistinguishable from "not
//! found" by policy: the tier is skipped, never failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::model::NameHint;
use crate::syntax::Address;

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned malformed data: {0}")]
    Malformed(String),
}

/// A person candidate returned by a lookup provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonMatch {
    pub name: String,
    pub title: Option<String>,
    /// Provider-asserted confidence in `[0, 1]`.
    pub confidence: f64,
    /// Which provider produced the match.
    pub source: String,
}

/// Capability interface over an external person directory.
#[async_trait]
pub trait PersonLookup: Send + Sync {
    /// Short identifier used in logs and verdict reasons.
    fn name(&self) -> &str;

    /// Rough per-call cost tag, used only to order the waterfall.
    fn cost(&self) -> f64;

    async fn search(
        &self,
        address: &Address,
        hint: Option<&NameHint>,
    ) -> Result<Option<PersonMatch>, EnrichmentError>;
}

/// Cheap-first provider waterfall with a shared concurrency cap.
pub struct Waterfall {
    providers: Vec<Arc<dyn PersonLookup>>,
    permits: Arc<Semaphore>,
}

impl Waterfall {
    /// Build a waterfall; providers are consulted in ascending cost order.
    pub fn new(mut providers: Vec<Arc<dyn PersonLookup>>, max_concurrency: usize) -> Self {
        providers.sort_by(|a, b| a.cost().total_cmp(&b.cost()));
        Self {
            providers,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Consult providers until one returns a candidate.
    ///
    /// The expensive tail only runs when `allow_expensive` is true (the
    /// dispatcher gates it on a plausible person pattern). Errors are logged
    /// and treated as `None`; an outage must not convert a verifiable
    /// address into a failure.
    pub async fn search(
        &self,
        address: &Address,
        hint: Option<&NameHint>,
        allow_expensive: bool,
    ) -> Option<PersonMatch> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("enrichment semaphore closed");

        for (index, provider) in self.providers.iter().enumerate() {
            if index > 0 && !allow_expensive {
                debug!(
                    provider = provider.name(),
                    "skipping expensive provider for implausible pattern"
                );
                break;
            }

            match provider.search(address, hint).await {
                Ok(Some(found)) => {
                    debug!(
                        provider = provider.name(),
                        name = %found.name,
                        "enrichment candidate found"
                    );
                    return Some(found);
                }
                Ok(None) => {
                    debug!(provider = provider.name(), "no enrichment candidate");
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "enrichment provider failed, skipping");
                }
            }
        }
        None
    }
}

/// Settings for an HTTP person-lookup endpoint.
#[derive(Debug, Clone)]
pub struct HttpLookupConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: String,
    pub cost: f64,
    pub timeout: Duration,
}

/// JSON person-match API client (`POST {email, first_name, last_name}` ->
/// `{person: {name, title}}`).
pub struct HttpPersonLookup {
    config: HttpLookupConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<&'a str>,
}

#[derive(Deserialize)]
struct LookupResponse {
    person: Option<LookupPerson>,
}

#[derive(Deserialize)]
struct LookupPerson {
    name: String,
    title: Option<String>,
}

impl HttpPersonLookup {
    pub fn new(config: HttpLookupConfig) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EnrichmentError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PersonLookup for HttpPersonLookup {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn cost(&self) -> f64 {
        self.config.cost
    }

    async fn search(
        &self,
        address: &Address,
        hint: Option<&NameHint>,
    ) -> Result<Option<PersonMatch>, EnrichmentError> {
        let body = LookupRequest {
            email: &address.normalized,
            first_name: hint.and_then(|h| h.first.as_deref()),
            last_name: hint.and_then(|h| h.last.as_deref()),
        };

        let response: LookupResponse = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EnrichmentError::Request(e.to_string()))?
            .error_for_status()
            .map_err(|e| EnrichmentError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| EnrichmentError::Malformed(e.to_string()))?;

        let Some(person) = response.person else {
            return Ok(None);
        };

        // Quality gate: a match with no title is usually a stale directory
        // row, and a name sharing nothing with the hint is a mismatch.
        if person.title.is_none() {
            return Ok(None);
        }
        if let Some(hint) = hint {
            let name = person.name.to_ascii_lowercase();
            let first_ok = hint
                .first
                .as_deref()
                .map(|f| name.contains(&f.to_ascii_lowercase()));
            let last_ok = hint
                .last
                .as_deref()
                .map(|l| name.contains(&l.to_ascii_lowercase()));
            if first_ok == Some(false) && last_ok == Some(false) {
                debug!(candidate = %person.name, "enrichment name mismatch, discarding");
                return Ok(None);
            }
        }

        Ok(Some(PersonMatch {
            name: person.name,
            title: person.title,
            confidence: 0.92,
            source: self.config.name.clone(),
        }))
    }
}
