//! SMTP reply parsing and reason classification.
//!
//! Servers phrase rejections in free text, in whatever language the operator
//! configured. The dictionary below covers unknown-mailbox, full-mailbox,
//! disabled-account, policy/blacklist, greylist, and relay-denied phrasings
//! across English, French, German, Spanish, Italian, Polish, and Czech.
//! Classification is a pure function of the reply text and code.

use std::sync::LazyLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};

/// Why a server refused (or deferred) a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCategory {
    /// The mailbox does not exist.
    MailboxUnknown,
    /// The mailbox exists but is over quota.
    MailboxFull,
    /// The account exists but was disabled or suspended.
    AccountDisabled,
    /// Our client IP or the probe itself was rejected by policy.
    PolicyBlock,
    /// Transient deferral asking the sender to retry.
    Greylisted,
    /// Server refused to relay for the recipient domain.
    RelayDenied,
}

impl ReplyCategory {
    /// Stable reason code recorded on verdicts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MailboxUnknown => "mailbox_unknown",
            Self::MailboxFull => "mailbox_full",
            Self::AccountDisabled => "account_disabled",
            Self::PolicyBlock => "policy_block",
            Self::Greylisted => "greylisted",
            Self::RelayDenied => "relay_denied",
        }
    }
}

fn set(patterns: &[&str]) -> RegexSet {
    let ci: Vec<String> = patterns.iter().map(|p| format!("(?i){p}")).collect();
    RegexSet::new(ci).expect("reply dictionary patterns must compile")
}

static MAILBOX_UNKNOWN: LazyLock<RegexSet> = LazyLock::new(|| {
    set(&[
        // English
        r"user unknown",
        r"unknown user",
        r"user not found",
        r"no such user",
        r"no such recipient",
        r"no such account",
        r"mailbox not found",
        r"mailbox unavailable",
        r"mailbox .* does not exist",
        r"no mailbox",
        r"is not a valid mailbox",
        r"recipient not found",
        r"recipient rejected",
        r"recipient unknown",
        r"unknown recipient",
        r"recipient address denied",
        r"address unknown",
        r"address rejected",
        r"unknown address",
        r"invalid address",
        r"invalid recipient",
        r"invalid mailbox",
        r"does not exist",
        r"doesn't exist",
        r"undeliverable",
        r"bad destination",
        r"account .* not found",
        r"email address .* not found",
        r"not our customer",
        r"verification failed",
        // French
        r"utilisateur inconnu",
        r"destinataire inconnu",
        r"adresse .* introuvable",
        r"bo[iî]te .* introuvable",
        r"n'existe pas",
        // German
        r"benutzer nicht gefunden",
        r"postfach nicht gefunden",
        r"empf[aä]nger .* unbekannt",
        r"unbekannter empf[aä]nger",
        r"existiert nicht",
        // Spanish
        r"usuario desconocido",
        r"destinatario desconocido",
        r"buz[oó]n no encontrado",
        r"no existe",
        r"direcci[oó]n .* inv[aá]lida",
        // Italian
        r"utente sconosciuto",
        r"destinatario sconosciuto",
        r"casella .* non trovata",
        r"non esiste",
        // Polish
        r"u[zż]ytkownik nieznany",
        r"odbiorca nieznany",
        r"skrzynka .* nie istnieje",
        r"nie istnieje",
        // Czech
        r"u[zž]ivatel nenalezen",
        r"adresa nenalezena",
        r"p[rř][ií]jemce nenalezen",
        r"neexistuje",
    ])
});

static MAILBOX_FULL: LazyLock<RegexSet> = LazyLock::new(|| {
    set(&[
        r"mailbox .*full",
        r"mailbox full",
        r"over.*quota",
        r"quota exceeded",
        r"insufficient.*storage",
        r"not enough space",
        r"exceeded.*storage",
        r"bo[iî]te .* pleine",  // French
        r"postfach .* voll",    // German
        r"buz[oó]n .* lleno",   // Spanish
        r"casella .* piena",    // Italian
        r"skrzynka .* pe[lł]na", // Polish
        r"schr[aá]nka .* pln[aá]", // Czech
    ])
});

static ACCOUNT_DISABLED: LazyLock<RegexSet> = LazyLock::new(|| {
    set(&[
        r"account .*disabled",
        r"account disabled",
        r"account .*suspended",
        r"account .*deactivated",
        r"account .*locked",
        r"mailbox .*disabled",
        r"mailbox .*inactive",
        r"user .*disabled",
        r"temporarily disabled",
        r"compte .*d[eé]sactiv[eé]", // French
        r"konto .*deaktiviert",      // German
        r"cuenta .*deshabilitada",   // Spanish
    ])
});

static POLICY_BLOCK: LazyLock<RegexSet> = LazyLock::new(|| {
    set(&[
        r"spamhaus",
        r"proofpoint",
        r"barracuda",
        r"cloudmark",
        r"sorbs",
        r"spamcop",
        r"dnsbl",
        r"blacklist",
        r"blocklist",
        r"black list",
        r"listed.*rbl",
        r"rbl.*listed",
        r"blocked.*ip",
        r"ip.*blocked",
        r"denied.*ip",
        r"ip.*denied",
        r"reject.*ip",
        r"access denied",
        r"not allowed to send",
        r"service refused",
        r"poor reputation",
        r"cannot find your reverse hostname",
        r"spam", // broad on purpose: any spam-filter mention taints the reply
    ])
});

static GREYLISTED: LazyLock<RegexSet> = LazyLock::new(|| {
    set(&[
        r"greylist",
        r"graylist",
        r"try again later",
        r"please try again",
        r"come back later",
        r"temporarily rejected",
        r"temporarily deferred",
        r"temporary.*failure",
        r"temporary.*error",
        r"too many connections",
        r"rate limit",
        r"defer",
        r"resource temporarily unavailable",
        r"service temporarily unavailable",
        r"r[eé]essayez plus tard",       // French
        r"sp[aä]ter .*erneut",           // German
        r"int[eé]ntelo .*m[aá]s tarde",  // Spanish
        r"riprova pi[uù] tardi",         // Italian
        r"spr[oó]buj p[oó][zź]niej",     // Polish
        r"zkuste to pozd[eě]ji",         // Czech
    ])
});

static RELAY_DENIED: LazyLock<RegexSet> = LazyLock::new(|| {
    set(&[
        r"relay not permitted",
        r"relaying denied",
        r"relay access denied",
        r"unable to relay",
        r"no valid mx",
        r"relais non autoris[eé]", // French
        r"relay .*verweigert",     // German
    ])
});

/// Classify free-text reply content into a reason category.
///
/// Order matters: relay phrasing is more specific than the generic
/// access-denied policy patterns, a disabled-account phrase is more specific
/// than the unknown-mailbox phrases it often also matches, and policy blocks
/// taint a reply regardless of what else it says.
pub fn classify_text(message: &str) -> Option<ReplyCategory> {
    if RELAY_DENIED.is_match(message) {
        return Some(ReplyCategory::RelayDenied);
    }
    if POLICY_BLOCK.is_match(message) {
        return Some(ReplyCategory::PolicyBlock);
    }
    if ACCOUNT_DISABLED.is_match(message) {
        return Some(ReplyCategory::AccountDisabled);
    }
    if MAILBOX_FULL.is_match(message) {
        return Some(ReplyCategory::MailboxFull);
    }
    if GREYLISTED.is_match(message) {
        return Some(ReplyCategory::Greylisted);
    }
    if MAILBOX_UNKNOWN.is_match(message) {
        return Some(ReplyCategory::MailboxUnknown);
    }
    None
}

/// A parsed SMTP reply with its classified reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpReply {
    /// Reply code; 0 for network-level failures that produced no reply.
    pub code: u16,
    pub message: String,
    pub category: Option<ReplyCategory>,
}

impl SmtpReply {
    /// Classify a raw code + message pair.
    pub fn classify(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let category = if (200..300).contains(&code) {
            None
        } else {
            classify_text(&message)
        };
        Self {
            code,
            message,
            category,
        }
    }

    /// A synthetic reply for connect/read failures.
    pub fn network_failure(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            category: None,
        }
    }

    pub fn is_network_failure(&self) -> bool {
        self.code == 0
    }

    /// 2xx acceptance.
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 4xx transient rejection.
    pub fn is_transient(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// 5xx permanent rejection.
    pub fn is_permanent(&self) -> bool {
        (500..600).contains(&self.code)
    }

    /// A 5xx that definitively names a bad mailbox: the unknown-mailbox
    /// dictionary, or a disabled account. Unmatched 5xx text stays ambiguous
    /// even on 550/551/553.
    pub fn is_invalid_mailbox(&self) -> bool {
        self.is_permanent()
            && matches!(
                self.category,
                Some(ReplyCategory::MailboxUnknown) | Some(ReplyCategory::AccountDisabled)
            )
    }

    /// A 4xx deferral: explicit greylist phrasing, or any unclassified 4xx
    /// (servers rarely label their greylisting).
    pub fn is_greylisted(&self) -> bool {
        self.is_transient()
            && matches!(self.category, Some(ReplyCategory::Greylisted) | None)
    }

    /// The reply says more about our probe's reputation than the mailbox.
    pub fn is_blacklisted(&self) -> bool {
        matches!(self.category, Some(ReplyCategory::PolicyBlock))
    }

    pub fn is_full_inbox(&self) -> bool {
        matches!(self.category, Some(ReplyCategory::MailboxFull))
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.category, Some(ReplyCategory::AccountDisabled))
    }

    /// Reason code for verdict records, if any.
    pub fn reason_code(&self) -> Option<&'static str> {
        self.category.map(|c| c.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepted_replies_carry_no_category() {
        let reply = SmtpReply::classify(250, "2.1.5 OK user exists");
        assert!(reply.is_positive());
        assert_eq!(reply.category, None);
    }

    #[test]
    fn unknown_mailbox_in_seven_languages() {
        let cases = [
            "550 5.1.1 user unknown",
            "550 Utilisateur inconnu",
            "550 Benutzer nicht gefunden",
            "550 usuario desconocido",
            "550 utente sconosciuto",
            "550 uzytkownik nieznany",
            "550 uzivatel nenalezen",
        ];
        for msg in cases {
            let reply = SmtpReply::classify(550, msg);
            assert!(reply.is_invalid_mailbox(), "{msg}");
            assert_eq!(reply.reason_code(), Some("mailbox_unknown"), "{msg}");
        }
    }

    #[test]
    fn disabled_wins_over_unknown_phrasing() {
        // "account disabled" also matches nothing in the unknown set, but a
        // combined message must stay disabled.
        let reply = SmtpReply::classify(550, "550 account disabled; mailbox not found");
        assert_eq!(reply.category, Some(ReplyCategory::AccountDisabled));
        assert!(reply.is_invalid_mailbox());
    }

    #[test]
    fn blacklist_taints_any_code() {
        let reply = SmtpReply::classify(554, "554 5.7.1 blocked using zen.spamhaus.org");
        assert!(reply.is_blacklisted());
        assert!(!reply.is_invalid_mailbox());

        let reply = SmtpReply::classify(421, "421 your IP is blacklisted");
        assert!(reply.is_blacklisted());
        assert!(!reply.is_greylisted());
    }

    #[test]
    fn greylist_phrasings() {
        for msg in [
            "451 4.7.1 Greylisted, please try again later",
            "450 temporary failure",
            "451 too many connections from your host",
        ] {
            let reply = SmtpReply::classify(451, msg);
            assert!(reply.is_greylisted(), "{msg}");
        }
    }

    #[test]
    fn unlabeled_4xx_defaults_to_greylist() {
        let reply = SmtpReply::classify(450, "450 whatever");
        assert_eq!(reply.category, None);
        assert!(reply.is_greylisted());
    }

    #[test]
    fn unmatched_550_is_not_definitive() {
        let reply = SmtpReply::classify(550, "550 permanent error #1492");
        assert_eq!(reply.category, None);
        assert!(!reply.is_invalid_mailbox());
        assert!(reply.is_permanent());
    }

    #[test]
    fn full_mailbox_is_not_invalid() {
        let reply = SmtpReply::classify(552, "552 mailbox is full / over quota");
        assert!(reply.is_full_inbox());
        assert!(!reply.is_invalid_mailbox());
    }

    #[test]
    fn relay_denied_detected() {
        let reply = SmtpReply::classify(554, "554 relay access denied");
        assert_eq!(reply.category, Some(ReplyCategory::RelayDenied));
    }

    #[test]
    fn classification_is_deterministic() {
        let msg = "451 4.7.1 Greylisted, come back later";
        let a = SmtpReply::classify(451, msg);
        let b = SmtpReply::classify(451, msg);
        assert_eq!(a, b);
    }

    #[test]
    fn network_failure_has_code_zero() {
        let reply = SmtpReply::network_failure("connection refused");
        assert!(reply.is_network_failure());
        assert!(!reply.is_positive());
        assert!(!reply.is_greylisted());
    }

    #[test]
    fn case_insensitive_matching() {
        let reply = SmtpReply::classify(550, "550 USER UNKNOWN");
        assert!(reply.is_invalid_mailbox());
    }
}
