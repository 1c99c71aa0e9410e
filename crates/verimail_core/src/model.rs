//! Core data model: verdicts, providers, tiers, and domain facts.
//!
//! Every type here is passed by value between components; ownership of the
//! persisted records lives in the verdict store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse deliverability outcome reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    /// Mailbox verified deliverable.
    Safe,
    /// Deliverable but risky for outreach (catch-all, role, greylisted, ...).
    Risky,
    /// Mailbox or domain does not accept mail.
    Invalid,
    /// Could not be determined.
    Unknown,
}

impl Reachability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Risky => "risky",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Reachability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(Self::Safe),
            "risky" => Ok(Self::Risky),
            "invalid" => Ok(Self::Invalid),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown reachability: {other}")),
        }
    }
}

impl std::fmt::Display for Reachability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mail provider identity derived from a domain's MX host set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gmail,
    GoogleWorkspace,
    Microsoft365,
    /// Hotmail / Outlook.com / Live.com consumer mailboxes.
    Hotmail,
    Yahoo,
    Icloud,
    Proofpoint,
    Mimecast,
    Generic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::GoogleWorkspace => "google_workspace",
            Self::Microsoft365 => "microsoft365",
            Self::Hotmail => "hotmail",
            Self::Yahoo => "yahoo",
            Self::Icloud => "icloud",
            Self::Proofpoint => "proofpoint",
            Self::Mimecast => "mimecast",
            Self::Generic => "generic",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gmail" => Ok(Self::Gmail),
            "google_workspace" => Ok(Self::GoogleWorkspace),
            "microsoft365" => Ok(Self::Microsoft365),
            "hotmail" => Ok(Self::Hotmail),
            "yahoo" => Ok(Self::Yahoo),
            "icloud" => Ok(Self::Icloud),
            "proofpoint" => Ok(Self::Proofpoint),
            "mimecast" => Ok(Self::Mimecast),
            "generic" => Ok(Self::Generic),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline stage that produced a verdict. Kept on the record for
/// debugging and for the catch-all coherence rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    Cache,
    Fast,
    Smtp,
    Pattern,
    Enrichment,
    ReVerify,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Fast => "fast",
            Self::Smtp => "smtp",
            Self::Pattern => "pattern",
            Self::Enrichment => "enrichment",
            Self::ReVerify => "re-verify",
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Self::Cache),
            "fast" => Ok(Self::Fast),
            "smtp" => Ok(Self::Smtp),
            "pattern" => Ok(Self::Pattern),
            "enrichment" => Ok(Self::Enrichment),
            "re-verify" => Ok(Self::ReVerify),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a domain accepts mail for arbitrary local parts.
///
/// `Yes`/`No` are only ever set after a completed random-local-part probe
/// round-trip; a probe that could not reach the MX yields `Unreachable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatchAllStatus {
    Unknown,
    Yes,
    No,
    Unreachable,
}

impl CatchAllStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Yes | Self::No)
    }
}

/// A single mail exchanger for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxHost {
    pub host: String,
    /// MX preference; lower wins. A/AAAA fallback entries use 0.
    pub preference: u16,
}

impl MxHost {
    pub fn new(host: impl Into<String>, preference: u16) -> Self {
        Self {
            host: host.into(),
            preference,
        }
    }
}

/// The persisted decision record for one normalized address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Address as submitted by the caller.
    pub email: String,
    /// Canonical form; the verdict key.
    pub normalized: String,
    pub reachability: Reachability,
    /// `None` when deliverability could not be established either way.
    pub is_deliverable: Option<bool>,
    pub is_catch_all: Option<bool>,
    pub is_disposable: bool,
    pub is_role: bool,
    pub is_free: bool,
    /// MX host the decision was made against; empty if none was contacted.
    pub mx_host: String,
    /// Last SMTP reply code observed; 0 if SMTP was never reached.
    pub smtp_code: u16,
    pub smtp_message: String,
    pub provider: Provider,
    pub domain: String,
    pub verified_at: DateTime<Utc>,
    /// Classified reason code (`mailbox_unknown`, `timeout`, ...).
    pub error: Option<String>,
    pub tier: Tier,
}

impl Verdict {
    /// A skeleton verdict for an address that never got past syntax checks.
    pub fn rejected(email: &str, normalized: &str, reason: impl Into<String>) -> Self {
        Self {
            email: email.to_string(),
            normalized: normalized.to_string(),
            reachability: Reachability::Invalid,
            is_deliverable: Some(false),
            is_catch_all: None,
            is_disposable: false,
            is_role: false,
            is_free: false,
            mx_host: String::new(),
            smtp_code: 0,
            smtp_message: String::new(),
            provider: Provider::Generic,
            domain: String::new(),
            verified_at: Utc::now(),
            error: Some(reason.into()),
            tier: Tier::Fast,
        }
    }
}

/// Optional person context supplied with a verification request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameHint {
    pub first: Option<String>,
    pub last: Option<String>,
    pub company: Option<String>,
}

impl NameHint {
    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.last.is_none() && self.company.is_none()
    }
}

/// A single verification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub address: String,
    #[serde(default, skip_serializing_if = "NameHint::is_empty")]
    pub hint: NameHint,
}

impl VerifyRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hint: NameHint::default(),
        }
    }

    pub fn with_hint(address: impl Into<String>, hint: NameHint) -> Self {
        Self {
            address: address.into(),
            hint,
        }
    }
}

/// A verdict plus the debug fields of the request/response contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Why the producing tier decided what it did.
    pub reason: String,
}

impl VerifyOutcome {
    pub fn new(verdict: Verdict, reason: impl Into<String>) -> Self {
        Self {
            verdict,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reachability_round_trips_through_strings() {
        for r in [
            Reachability::Safe,
            Reachability::Risky,
            Reachability::Invalid,
            Reachability::Unknown,
        ] {
            assert_eq!(r.as_str().parse::<Reachability>().unwrap(), r);
        }
    }

    #[test]
    fn tier_serializes_kebab_case() {
        let json = serde_json::to_string(&Tier::ReVerify).unwrap();
        assert_eq!(json, "\"re-verify\"");
        assert_eq!("re-verify".parse::<Tier>().unwrap(), Tier::ReVerify);
    }

    #[test]
    fn provider_round_trips_through_strings() {
        for p in [
            Provider::Gmail,
            Provider::GoogleWorkspace,
            Provider::Microsoft365,
            Provider::Hotmail,
            Provider::Yahoo,
            Provider::Icloud,
            Provider::Proofpoint,
            Provider::Mimecast,
            Provider::Generic,
        ] {
            assert_eq!(p.as_str().parse::<Provider>().unwrap(), p);
        }
    }

    #[test]
    fn catch_all_resolution() {
        assert!(CatchAllStatus::Yes.is_resolved());
        assert!(CatchAllStatus::No.is_resolved());
        assert!(!CatchAllStatus::Unknown.is_resolved());
        assert!(!CatchAllStatus::Unreachable.is_resolved());
    }
}
