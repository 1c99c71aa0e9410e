//! Provider classification from MX host sets.
//!
//! Providers differ wildly in how much an RCPT TO reply can be trusted:
//! Google returns a definitive 550 for unknown mailboxes, Microsoft 365
//! tenants are frequently catch-all, and Hotmail/Outlook.com consumer MXes
//! reject verification probes outright. The classifier maps a domain's MX
//! hosts to an identity, a prior confidence, and a probe policy.

use crate::model::{MxHost, Provider};

/// How to verify addresses hosted at a given provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPolicy {
    /// Whether an SMTP handshake is worth performing at all.
    pub probe_smtp: bool,
    /// Whether a random-local-part catch-all probe is needed.
    pub probe_catch_all: bool,
    /// Provider is auto-marked risky without probing.
    pub mark_risky: bool,
}

impl Provider {
    /// Prior confidence that an RCPT TO acceptance from this provider is
    /// trustworthy, in `[0, 1]`.
    pub fn prior(&self) -> f64 {
        match self {
            Self::Gmail => 0.60,
            Self::GoogleWorkspace => 0.55,
            Self::Microsoft365 => 0.55,
            Self::Hotmail => 0.50,
            Self::Yahoo => 0.65,
            Self::Icloud => 0.65,
            Self::Proofpoint => 0.40,
            Self::Mimecast => 0.40,
            Self::Generic => 0.30,
        }
    }

    pub fn policy(&self) -> ProviderPolicy {
        match self {
            // Google answers 550 reliably for unknown mailboxes; a catch-all
            // probe would only burn a connection.
            Self::Gmail | Self::GoogleWorkspace => ProviderPolicy {
                probe_smtp: true,
                probe_catch_all: false,
                mark_risky: false,
            },
            // Consumer Outlook.com MXes blocklist verification probes.
            Self::Hotmail => ProviderPolicy {
                probe_smtp: false,
                probe_catch_all: false,
                mark_risky: true,
            },
            _ => ProviderPolicy {
                probe_smtp: true,
                probe_catch_all: true,
                mark_risky: false,
            },
        }
    }

    /// Whether this is a corporate (non-consumer) mail setup, which the
    /// pattern tier requires before it will assert `safe` on heuristics.
    pub fn is_corporate(&self) -> bool {
        !matches!(self, Self::Gmail | Self::Hotmail | Self::Yahoo | Self::Icloud)
    }
}

/// Classify a domain by its MX host set.
///
/// Checks hosts in preference order and returns on the first recognized
/// suffix; an empty host set is `Generic`. Pure function.
pub fn classify(mx_hosts: &[MxHost], domain: &str) -> Provider {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();

    for mx in mx_hosts {
        let host = mx.host.trim_end_matches('.').to_ascii_lowercase();

        if host.ends_with(".google.com") || host.ends_with(".googlemail.com") {
            if domain == "gmail.com" || domain == "googlemail.com" {
                return Provider::Gmail;
            }
            return Provider::GoogleWorkspace;
        }

        if host.ends_with(".olc.protection.outlook.com") {
            return Provider::Hotmail;
        }
        if host.ends_with(".protection.outlook.com") {
            return Provider::Microsoft365;
        }
        if host.ends_with(".hotmail.com") || host.ends_with(".outlook.com") {
            return Provider::Hotmail;
        }

        if host.ends_with(".yahoodns.net") {
            return Provider::Yahoo;
        }

        if host.ends_with(".mail.icloud.com") || host.ends_with(".icloud.com") {
            return Provider::Icloud;
        }

        if host.ends_with(".pphosted.com") || host.ends_with(".ppe-hosted.com") {
            return Provider::Proofpoint;
        }

        if host.ends_with(".mimecast.com") || host.ends_with(".mimecast.co.za") {
            return Provider::Mimecast;
        }
    }

    Provider::Generic
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hosts(names: &[&str]) -> Vec<MxHost> {
        names
            .iter()
            .enumerate()
            .map(|(i, h)| MxHost::new(*h, (i as u16 + 1) * 10))
            .collect()
    }

    #[test]
    fn gmail_vs_workspace_split_on_domain() {
        let mx = hosts(&["gmail-smtp-in.l.google.com"]);
        assert_eq!(classify(&mx, "gmail.com"), Provider::Gmail);
        assert_eq!(classify(&mx, "acme.example"), Provider::GoogleWorkspace);
    }

    #[test]
    fn microsoft_b2b_vs_b2c() {
        let b2b = hosts(&["acme-example.mail.protection.outlook.com"]);
        assert_eq!(classify(&b2b, "acme.example"), Provider::Microsoft365);

        let b2c = hosts(&["hotmail-com.olc.protection.outlook.com"]);
        assert_eq!(classify(&b2c, "hotmail.com"), Provider::Hotmail);
    }

    #[test]
    fn gateway_providers() {
        assert_eq!(
            classify(&hosts(&["mxa-001.pphosted.com"]), "corp.example"),
            Provider::Proofpoint
        );
        assert_eq!(
            classify(&hosts(&["us-smtp-inbound-1.mimecast.com"]), "corp.example"),
            Provider::Mimecast
        );
    }

    #[test]
    fn yahoo_and_icloud() {
        assert_eq!(
            classify(&hosts(&["mta5.am0.yahoodns.net"]), "yahoo.com"),
            Provider::Yahoo
        );
        assert_eq!(
            classify(&hosts(&["mx01.mail.icloud.com"]), "icloud.com"),
            Provider::Icloud
        );
    }

    #[test]
    fn unrecognized_is_generic() {
        assert_eq!(classify(&hosts(&["mail.smallco.test"]), "smallco.test"), Provider::Generic);
        assert_eq!(classify(&[], "nodomain.test"), Provider::Generic);
    }

    #[test]
    fn trailing_dots_are_tolerated() {
        let mx = hosts(&["gmail-smtp-in.l.google.com."]);
        assert_eq!(classify(&mx, "gmail.com."), Provider::Gmail);
    }

    #[test]
    fn policies_match_provider_behavior() {
        assert!(!Provider::Gmail.policy().probe_catch_all);
        assert!(Provider::Gmail.policy().probe_smtp);
        assert!(Provider::Hotmail.policy().mark_risky);
        assert!(!Provider::Hotmail.policy().probe_smtp);
        assert!(Provider::Generic.policy().probe_catch_all);
    }

    #[test]
    fn priors_are_probabilities() {
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
            let prior = p.prior();
            assert!((0.0..=1.0).contains(&prior));
        }
        assert!(Provider::Gmail.prior() > Provider::Generic.prior());
    }
}
