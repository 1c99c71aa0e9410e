//! Address parsing and canonical normalization.
//!
//! Implements the practical subset of RFC 5322 used for verification: no
//! quoted strings, no comments, no address literals. Normalization folds the
//! aliasing rules of providers that ignore dots and plus-tags in the local
//! part (Gmail), so that `Foo.Bar+news@Gmail.COM` and `foobar@gmail.com`
//! share one verdict key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;
const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Domains whose local parts alias dots and `+tag` suffixes away.
const DOT_ALIASING_DOMAINS: &[&str] = &["gmail.com"];

/// Domain spellings folded onto a canonical domain before any other rule.
const DOMAIN_ALIASES: &[(&str, &str)] = &[("googlemail.com", "gmail.com")];

/// A parsed, normalized email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Input as given (whitespace trimmed).
    pub raw: String,
    /// Local part as given, before alias folding.
    pub local: String,
    /// Lowercased domain after alias folding.
    pub domain: String,
    /// Canonical form used as the verdict key.
    pub normalized: String,
}

/// Why an input string is not a verifiable address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxViolation {
    #[error("empty address")]
    Empty,
    #[error("address exceeds {MAX_ADDRESS_LEN} characters")]
    TooLong,
    #[error("address must contain exactly one '@'")]
    AtSignCount,
    #[error("empty local part")]
    EmptyLocal,
    #[error("local part exceeds {MAX_LOCAL_LEN} characters")]
    LocalTooLong,
    #[error("leading, trailing, or consecutive dot in local part")]
    LocalDots,
    #[error("quoted local parts are not supported")]
    QuotedLocal,
    #[error("invalid character {0:?} in local part")]
    LocalChar(char),
    #[error("empty domain")]
    EmptyDomain,
    #[error("domain exceeds {MAX_DOMAIN_LEN} characters")]
    DomainTooLong,
    #[error("domain must contain at least one dot")]
    NoTld,
    #[error("top-level domain must be at least two alphabetic characters")]
    BadTld,
    #[error("invalid domain label {0:?}")]
    BadLabel(String),
}

/// Parse and normalize an address.
///
/// Deterministic and free of I/O. Normalization is idempotent: parsing the
/// `normalized` field of a returned [`Address`] yields the same value.
pub fn parse(input: &str) -> Result<Address, SyntaxViolation> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(SyntaxViolation::Empty);
    }
    if raw.len() > MAX_ADDRESS_LEN {
        return Err(SyntaxViolation::TooLong);
    }
    if raw.chars().filter(|&c| c == '@').count() != 1 {
        return Err(SyntaxViolation::AtSignCount);
    }

    let (local, domain) = raw.split_once('@').expect("checked above");
    let local = local.to_string();
    let mut domain = domain.trim().to_ascii_lowercase();
    for (alias, canonical) in DOMAIN_ALIASES {
        if domain == *alias {
            domain = (*canonical).to_string();
        }
    }

    validate_local(&local)?;
    validate_domain(&domain)?;

    let normalized_local = if DOT_ALIASING_DOMAINS.contains(&domain.as_str()) {
        let folded: String = local.chars().filter(|&c| c != '.').collect();
        let folded = match folded.split_once('+') {
            Some((base, _tag)) => base.to_string(),
            None => folded,
        };
        folded.to_ascii_lowercase()
    } else {
        local.to_ascii_lowercase()
    };

    Ok(Address {
        raw: raw.to_string(),
        normalized: format!("{normalized_local}@{domain}"),
        local,
        domain,
    })
}

fn validate_local(local: &str) -> Result<(), SyntaxViolation> {
    if local.is_empty() {
        return Err(SyntaxViolation::EmptyLocal);
    }
    if local.len() > MAX_LOCAL_LEN {
        return Err(SyntaxViolation::LocalTooLong);
    }
    if local.starts_with('"') || local.ends_with('"') {
        return Err(SyntaxViolation::QuotedLocal);
    }
    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return Err(SyntaxViolation::LocalDots);
    }
    for c in local.chars() {
        let ok = c.is_ascii_alphanumeric()
            || matches!(
                c,
                '!' | '#'
                    | '$'
                    | '%'
                    | '&'
                    | '\''
                    | '*'
                    | '+'
                    | '-'
                    | '/'
                    | '='
                    | '?'
                    | '^'
                    | '_'
                    | '`'
                    | '{'
                    | '|'
                    | '}'
                    | '~'
                    | '.'
            );
        if !ok {
            return Err(SyntaxViolation::LocalChar(c));
        }
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), SyntaxViolation> {
    if domain.is_empty() {
        return Err(SyntaxViolation::EmptyDomain);
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(SyntaxViolation::DomainTooLong);
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(SyntaxViolation::NoTld);
    }

    let tld = labels[labels.len() - 1];
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SyntaxViolation::BadTld);
    }

    for label in &labels {
        let valid = !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(SyntaxViolation::BadLabel((*label).to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_address() {
        let addr = parse("jane.doe@example.com").unwrap();
        assert_eq!(addr.local, "jane.doe");
        assert_eq!(addr.domain, "example.com");
        assert_eq!(addr.normalized, "jane.doe@example.com");
    }

    #[test]
    fn gmail_folds_dots_and_plus_tags() {
        let addr = parse("Foo.Bar+news@Gmail.COM").unwrap();
        assert_eq!(addr.domain, "gmail.com");
        assert_eq!(addr.normalized, "foobar@gmail.com");
    }

    #[test]
    fn googlemail_aliases_to_gmail() {
        let addr = parse("foo.bar@googlemail.com").unwrap();
        assert_eq!(addr.domain, "gmail.com");
        assert_eq!(addr.normalized, "foobar@gmail.com");
    }

    #[test]
    fn non_gmail_plus_tags_survive() {
        let addr = parse("jane+lists@example.com").unwrap();
        assert_eq!(addr.normalized, "jane+lists@example.com");
    }

    #[test]
    fn domain_is_lowercased() {
        let addr = parse("USER@EXAMPLE.COM").unwrap();
        assert_eq!(addr.domain, "example.com");
        assert_eq!(addr.normalized, "user@example.com");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Foo.Bar+news@Gmail.COM",
            "a.b.c@googlemail.com",
            "Jane_Doe@Corp.Example.ORG",
            "x+y+z@gmail.com",
            "plain@example.io",
        ];
        for raw in samples {
            let once = parse(raw).unwrap();
            let twice = parse(&once.normalized).unwrap();
            assert_eq!(once.normalized, twice.normalized, "input {raw}");
        }
    }

    #[test]
    fn rejects_structural_violations() {
        assert_eq!(parse("").unwrap_err(), SyntaxViolation::Empty);
        assert_eq!(parse("no-at-sign").unwrap_err(), SyntaxViolation::AtSignCount);
        assert_eq!(parse("a@b@c.com").unwrap_err(), SyntaxViolation::AtSignCount);
        assert_eq!(parse("@example.com").unwrap_err(), SyntaxViolation::EmptyLocal);
        assert_eq!(parse("user@").unwrap_err(), SyntaxViolation::EmptyDomain);
        assert_eq!(parse("user@localhost").unwrap_err(), SyntaxViolation::NoTld);
        assert_eq!(parse(".user@example.com").unwrap_err(), SyntaxViolation::LocalDots);
        assert_eq!(parse("us..er@example.com").unwrap_err(), SyntaxViolation::LocalDots);
        assert_eq!(
            parse("\"quoted\"@example.com").unwrap_err(),
            SyntaxViolation::QuotedLocal
        );
        assert_eq!(parse("user@example.c0m").unwrap_err(), SyntaxViolation::BadTld);
        assert_eq!(
            parse("user@-bad.example.com").unwrap_err(),
            SyntaxViolation::BadLabel("-bad".to_string())
        );
    }

    #[test]
    fn rejects_oversized_parts() {
        let local = "a".repeat(65);
        assert_eq!(
            parse(&format!("{local}@example.com")).unwrap_err(),
            SyntaxViolation::LocalTooLong
        );

        let long = format!("{}@{}.com", "a".repeat(64), "b".repeat(250));
        assert_eq!(parse(&long).unwrap_err(), SyntaxViolation::TooLong);
    }

    #[test]
    fn rejects_bad_local_characters() {
        assert_eq!(
            parse("user name@example.com").unwrap_err(),
            SyntaxViolation::LocalChar(' ')
        );
        assert_eq!(
            parse("user,name@example.com").unwrap_err(),
            SyntaxViolation::LocalChar(',')
        );
    }
}
