//! Configuration loading for the operator CLI.
//!
//! Layered with figment: built-in defaults, then an optional `Config.toml`,
//! then `VERIMAIL_*` environment variables.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use verimail_core::VerifierConfig;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub verifier: VerifierSection,
    pub store: StoreSection,
    pub enrichment: EnrichmentSection,
    pub observability: ObservabilitySection,
}

/// Engine knobs, mirroring [`VerifierConfig`] in file-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierSection {
    pub helo_domain: String,
    pub from_address: String,
    pub smtp_port: u16,
    pub concurrency: usize,
    pub per_host_concurrency: usize,
    pub tiered_enabled: bool,
    pub fast_confidence_threshold: f64,
    pub pattern_strong_threshold: f64,
    pub pattern_medium_low: f64,
    pub pattern_medium_high: f64,
    pub greylist_retries: u32,
    pub use_starttls: bool,
    pub request_budget_secs: u64,
    pub freshness_days: u64,
    pub catch_all_days: u64,
    pub mx_cache_hours: u64,
    pub batch_conversation_cap: usize,
    pub max_batch: usize,
}

impl Default for VerifierSection {
    fn default() -> Self {
        let core = VerifierConfig::default();
        Self {
            helo_domain: core.helo_domain,
            from_address: core.from_address,
            smtp_port: core.smtp_port,
            concurrency: core.concurrency,
            per_host_concurrency: core.per_host_concurrency,
            tiered_enabled: core.tiered_enabled,
            fast_confidence_threshold: core.fast_confidence_threshold,
            pattern_strong_threshold: core.pattern_strong_threshold,
            pattern_medium_low: core.pattern_medium_band.0,
            pattern_medium_high: core.pattern_medium_band.1,
            greylist_retries: core.greylist_retries,
            use_starttls: core.use_starttls,
            request_budget_secs: core.request_budget.as_secs(),
            freshness_days: 30,
            catch_all_days: 7,
            mx_cache_hours: 24,
            batch_conversation_cap: core.batch_conversation_cap,
            max_batch: core.max_batch,
        }
    }
}

impl VerifierSection {
    pub fn to_core(&self, enrichment_enabled: bool) -> VerifierConfig {
        VerifierConfig {
            helo_domain: self.helo_domain.clone(),
            from_address: self.from_address.clone(),
            smtp_port: self.smtp_port,
            concurrency: self.concurrency,
            per_host_concurrency: self.per_host_concurrency,
            tiered_enabled: self.tiered_enabled,
            fast_confidence_threshold: self.fast_confidence_threshold,
            pattern_strong_threshold: self.pattern_strong_threshold,
            pattern_medium_band: (self.pattern_medium_low, self.pattern_medium_high),
            greylist_retries: self.greylist_retries,
            use_starttls: self.use_starttls,
            request_budget: Duration::from_secs(self.request_budget_secs),
            freshness: Duration::from_secs(self.freshness_days * 24 * 60 * 60),
            catch_all_ttl: Duration::from_secs(self.catch_all_days * 24 * 60 * 60),
            mx_cache_max_ttl: Duration::from_secs(self.mx_cache_hours * 60 * 60),
            batch_conversation_cap: self.batch_conversation_cap,
            max_batch: self.max_batch,
            enrichment_enabled,
            ..VerifierConfig::default()
        }
    }
}

/// Which verdict store backend to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// `embedded` or `remote`.
    pub backend: String,
    /// Embedded database path.
    pub path: String,
    /// Remote REST root (`https://.../rest/v1`), for `backend = "remote"`.
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "embedded".to_string(),
            path: "verified.db".to_string(),
            remote_url: None,
            remote_api_key: None,
        }
    }
}

/// Person-lookup provider endpoints for the enrichment tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentSection {
    pub enabled: bool,
    pub cheap_endpoint: Option<String>,
    pub cheap_api_key: Option<String>,
    pub expensive_endpoint: Option<String>,
    pub expensive_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySection {
    pub json_logs: bool,
    pub log_level: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

/// Load configuration: defaults, then `Config.toml` (or an explicit path),
/// then `VERIMAIL_*` environment variables.
pub fn load(config_path: Option<&Path>) -> Result<AppConfig, figment::Error> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    match config_path {
        Some(path) => figment = figment.merge(Toml::file(path)),
        None => {
            if Path::new("Config.toml").exists() {
                figment = figment.merge(Toml::file("Config.toml"));
            }
        }
    }

    figment = figment.merge(Env::prefixed("VERIMAIL_").split("__"));
    figment.extract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_consistent_with_core() {
        let config = AppConfig::default();
        assert_eq!(config.verifier.concurrency, 20);
        assert_eq!(config.verifier.max_batch, 1000);
        assert_eq!(config.store.backend, "embedded");
        assert!(!config.enrichment.enabled);
    }

    #[test]
    fn verifier_section_round_trips_to_core() {
        let section = VerifierSection::default();
        let core = section.to_core(true);
        assert_eq!(core.freshness, Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(core.catch_all_ttl, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(core.mx_cache_max_ttl, Duration::from_secs(24 * 60 * 60));
        assert!(core.enrichment_enabled);
    }

    #[test]
    fn toml_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                r#"
                    [verifier]
                    concurrency = 50
                    helo_domain = "verify.corp.example"

                    [store]
                    backend = "remote"
                    remote_url = "https://db.corp.example/rest/v1"
                "#,
            )?;
            let config = load(None).expect("load config");
            assert_eq!(config.verifier.concurrency, 50);
            assert_eq!(config.verifier.helo_domain, "verify.corp.example");
            assert_eq!(config.store.backend, "remote");
            Ok(())
        });
    }
}
