//! Remote verdict store over a PostgREST-style HTTP API.
//!
//! Speaks the same `verified_emails` table as the embedded backend: keyed
//! reads via `email=eq.<key>`, upserts via `on_conflict=email` with
//! merge-duplicates, and exact counts from `Content-Range`. Credentials ride
//! in `apikey`/`Authorization` headers; nothing here retries, since the
//! resilient wrapper owns failure policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Provider, Reachability, Tier, Verdict};
use crate::store::{ScanFilter, StoreError, StoreStats, StoredVerdict, VerdictStore};

const TABLE: &str = "verified_emails";

/// Connection settings for the remote backend.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// REST root, e.g. `https://project.example.co/rest/v1`.
    pub base_url: String,
    pub api_key: String,
    pub timeout: std::time::Duration,
}

/// PostgREST-backed [`VerdictStore`].
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RemoteRow {
    email: String,
    normalized: String,
    reachability: String,
    is_deliverable: Option<bool>,
    is_catch_all: Option<bool>,
    is_disposable: bool,
    is_role: bool,
    is_free: bool,
    mx_host: Option<String>,
    smtp_code: i64,
    smtp_message: Option<String>,
    provider: Option<String>,
    domain: Option<String>,
    verified_at: DateTime<Utc>,
    error: Option<String>,
    #[serde(default)]
    tier: Option<String>,
}

impl From<&Verdict> for RemoteRow {
    fn from(v: &Verdict) -> Self {
        Self {
            email: v.normalized.clone(),
            normalized: v.normalized.clone(),
            reachability: v.reachability.as_str().to_string(),
            is_deliverable: v.is_deliverable,
            is_catch_all: v.is_catch_all,
            is_disposable: v.is_disposable,
            is_role: v.is_role,
            is_free: v.is_free,
            mx_host: Some(v.mx_host.clone()),
            smtp_code: i64::from(v.smtp_code),
            smtp_message: Some(v.smtp_message.clone()),
            provider: Some(v.provider.as_str().to_string()),
            domain: Some(v.domain.clone()),
            verified_at: v.verified_at,
            error: v.error.clone(),
            tier: Some(v.tier.as_str().to_string()),
        }
    }
}

impl From<RemoteRow> for Verdict {
    fn from(r: RemoteRow) -> Self {
        Self {
            email: r.email,
            normalized: r.normalized,
            reachability: r.reachability.parse().unwrap_or(Reachability::Unknown),
            is_deliverable: r.is_deliverable,
            is_catch_all: r.is_catch_all,
            is_disposable: r.is_disposable,
            is_role: r.is_role,
            is_free: r.is_free,
            mx_host: r.mx_host.unwrap_or_default(),
            smtp_code: r.smtp_code.clamp(0, i64::from(u16::MAX)) as u16,
            smtp_message: r.smtp_message.unwrap_or_default(),
            provider: r
                .provider
                .and_then(|p| p.parse().ok())
                .unwrap_or(Provider::Generic),
            domain: r.domain.unwrap_or_default(),
            verified_at: r.verified_at,
            error: r.error,
            tier: r.tier.and_then(|t| t.parse().ok()).unwrap_or(Tier::Smtp),
        }
    }
}

impl RemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| StoreError::Io(format!("invalid api key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| StoreError::Io(format!("invalid api key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{TABLE}", self.base_url)
    }

    async fn count_where(&self, query: &[(&str, String)]) -> Result<u64, StoreError> {
        let response = self
            .client
            .get(self.table_url())
            .query(query)
            .query(&[("select", "email"), ("limit", "1")])
            .header("Prefer", "count=exact")
            .send()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::Io(e.to_string()))?;

        // Content-Range: 0-0/1234
        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Corrupt("missing count in content-range".to_string()))?;
        Ok(total)
    }
}

#[async_trait]
impl VerdictStore for RemoteStore {
    async fn get(&self, normalized: &str) -> Result<Option<StoredVerdict>, StoreError> {
        let rows: Vec<RemoteRow> = self
            .client
            .get(self.table_url())
            .query(&[
                ("email", format!("eq.{normalized}")),
                ("limit", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::Io(e.to_string()))?
            .json()
            .await
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(rows.into_iter().next().map(|row| {
            let verdict: Verdict = row.into();
            let age = (Utc::now() - verdict.verified_at).to_std().unwrap_or_default();
            StoredVerdict { verdict, age }
        }))
    }

    async fn put(&self, verdict: &Verdict) -> Result<(), StoreError> {
        let row = RemoteRow::from(verdict);
        debug!(normalized = %verdict.normalized, "upserting verdict to remote store");
        self.client
            .post(self.table_url())
            .query(&[("on_conflict", "email")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let total = self.count_where(&[]).await?;
        let mut by_reachability = std::collections::HashMap::new();
        for reachability in ["safe", "risky", "invalid", "unknown"] {
            let count = self
                .count_where(&[("reachability", format!("eq.{reachability}"))])
                .await?;
            if count > 0 {
                by_reachability.insert(reachability.to_string(), count);
            }
        }
        let catch_all = self
            .count_where(&[("is_catch_all", "is.true".to_string())])
            .await?;

        Ok(StoreStats {
            total,
            by_reachability,
            catch_all,
        })
    }

    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<Verdict>, StoreError> {
        let mut query: Vec<(&str, String)> = vec![("order", "verified_at.desc".to_string())];
        if let Some(reachability) = filter.reachability {
            query.push(("reachability", format!("eq.{}", reachability.as_str())));
        }
        if let Some(domain) = &filter.domain {
            query.push(("domain", format!("eq.{domain}")));
        }
        if let Some(before) = filter.verified_before {
            query.push(("verified_at", format!("lt.{}", before.to_rfc3339())));
        }
        if let Some(limit) = filter.limit {
            query.push(("limit", limit.to_string()));
        }

        let rows: Vec<RemoteRow> = self
            .client
            .get(self.table_url())
            .query(&query)
            .send()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
            .error_for_status()
            .map_err(|e| StoreError::Io(e.to_string()))?
            .json()
            .await
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        Ok(rows.into_iter().map(Verdict::from).collect())
    }
}
