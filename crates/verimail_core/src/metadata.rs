//! Address metadata classification: disposable, role, and free-provider flags.
//!
//! Disposable lookup goes through a Bloom filter so the bundled list can grow
//! to mailchecker scale without a memory cost; role and free-provider lookups
//! are exact sets. All classification is deterministic and I/O free.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use fastbloom::BloomFilter;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Metadata flags for one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMeta {
    pub is_disposable: bool,
    pub is_role: bool,
    pub is_free: bool,
}

/// Classifies addresses against the bundled disposable / free / role lists.
pub struct Classifier {
    disposable: BloomFilter,
    disposable_count: usize,
    free_providers: HashSet<String>,
    role_prefixes: HashSet<String>,
}

impl Classifier {
    /// Build a classifier from newline-delimited list contents.
    ///
    /// Lines are trimmed and lowercased; empty lines and `#` comments are
    /// skipped. Fails if the disposable list is empty.
    pub fn from_lists(
        disposable: &str,
        free_providers: &str,
        role_accounts: &str,
        false_positive_rate: f64,
    ) -> Result<Self> {
        let disposable_domains: Vec<String> = parse_list(disposable).into_iter().collect();
        if disposable_domains.is_empty() {
            return Err(anyhow!("disposable domain list is empty"));
        }

        let filter = BloomFilter::with_false_pos(false_positive_rate).items(disposable_domains.iter());

        let free = parse_list(free_providers);
        let roles = parse_list(role_accounts);
        debug!(
            disposable = disposable_domains.len(),
            free = free.len(),
            roles = roles.len(),
            "classifier lists loaded"
        );

        Ok(Self {
            disposable: filter,
            disposable_count: disposable_domains.len(),
            free_providers: free,
            role_prefixes: roles,
        })
    }

    /// Build a classifier from the lists bundled with the crate.
    pub fn bundled(false_positive_rate: f64) -> Result<Self> {
        Self::from_lists(
            include_str!("../lists/disposable.txt"),
            include_str!("../lists/free_providers.txt"),
            include_str!("../lists/role_accounts.txt"),
            false_positive_rate,
        )
    }

    /// Classify a local part / domain pair.
    pub fn classify(&self, local: &str, domain: &str) -> AddressMeta {
        AddressMeta {
            is_disposable: self.is_disposable(domain),
            is_role: self.is_role(local),
            is_free: self.is_free(domain),
        }
    }

    /// Whether the domain (or its registrable base) is a disposable provider.
    pub fn is_disposable(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        if self.disposable.contains(&domain) {
            return true;
        }
        match base_domain(&domain) {
            Some(base) if base != domain => self.disposable.contains(&base),
            _ => false,
        }
    }

    /// Whether the local part is a role account (`support`, `info`, ...).
    pub fn is_role(&self, local: &str) -> bool {
        self.role_prefixes.contains(&local.to_ascii_lowercase())
    }

    /// Whether the domain (or its registrable base) is a free mailbox provider.
    pub fn is_free(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        if self.free_providers.contains(&domain) {
            return true;
        }
        match base_domain(&domain) {
            Some(base) if base != domain => self.free_providers.contains(&base),
            _ => false,
        }
    }

    /// Number of disposable domains loaded into the filter.
    pub fn disposable_count(&self) -> usize {
        self.disposable_count
    }
}

fn parse_list(content: &str) -> HashSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Last two labels of a domain (`mail.sub.tempmail.com` -> `tempmail.com`).
fn base_domain(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() > 2 {
        Some(labels[labels.len() - 2..].join("."))
    } else {
        None
    }
}
