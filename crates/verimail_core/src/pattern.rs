//! Local-part pattern heuristics.
//!
//! On catch-all and otherwise inconclusive domains the shape of the local
//! part is the cheapest remaining signal: `jane.doe` is almost certainly a
//! person, `x7kq2m9f` almost certainly is not. Scoring is a fixed table over
//! the local part, optionally adjusted by a caller-supplied name hint. Pure
//! and deterministic throughout.

use serde::{Deserialize, Serialize};

use crate::model::NameHint;

/// A scored local-part shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternScore {
    /// Confidence the address belongs to a real person, in `[0, 1]`.
    pub confidence: f64,
    /// Which table row matched (`first.last`, `flast`, `random`, ...).
    pub pattern: &'static str,
    /// How a name hint changed the score, if one was supplied.
    pub name_match: Option<NameMatch>,
}

/// Relationship between a name hint and the local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameMatch {
    /// Local part is exactly a known pattern over the hinted name.
    Exact,
    /// First or last name appears in the local part.
    Partial,
    /// Neither name appears; the hint argues against this address.
    Contradiction,
}

/// Score a local part against the pattern table.
pub fn score(local: &str) -> PatternScore {
    let local = local.to_ascii_lowercase();
    let (confidence, pattern) = score_table(&local);
    PatternScore {
        confidence,
        pattern,
        name_match: None,
    }
}

/// Score a local part, then fold in a name hint when one carries names.
///
/// An exact pattern match floors the confidence at 0.95, a partial match at
/// 0.80, and a contradiction caps it at 0.20.
pub fn score_with_hint(local: &str, hint: &NameHint) -> PatternScore {
    let mut scored = score(local);
    let (Some(first), Some(last)) = (hint.first.as_deref(), hint.last.as_deref()) else {
        return scored;
    };
    let first = first.trim().to_ascii_lowercase();
    let last = last.trim().to_ascii_lowercase();
    if first.is_empty() || last.is_empty() {
        return scored;
    }

    let local = local.to_ascii_lowercase();
    let name_match = match_name(&local, &first, &last);
    scored.confidence = match name_match {
        NameMatch::Exact => scored.confidence.max(0.95),
        NameMatch::Partial => scored.confidence.max(0.80),
        NameMatch::Contradiction => scored.confidence.min(0.20),
    };
    scored.name_match = Some(name_match);
    scored
}

fn match_name(local: &str, first: &str, last: &str) -> NameMatch {
    let initial: String = first.chars().take(1).collect();
    let exact_forms = [
        format!("{first}.{last}"),
        format!("{first}{last}"),
        format!("{initial}.{last}"),
        format!("{initial}{last}"),
        format!("{first}_{last}"),
        format!("{first}-{last}"),
        first.to_string(),
    ];
    if exact_forms.iter().any(|form| local == form) {
        return NameMatch::Exact;
    }
    if local.contains(first) || local.contains(last) {
        return NameMatch::Partial;
    }
    NameMatch::Contradiction
}

fn score_table(local: &str) -> (f64, &'static str) {
    // Dotted and separated forms are unambiguous.
    if let Some((a, b)) = local.split_once('.') {
        if is_alpha(a) && is_alpha(b) && b.len() >= 2 {
            if a.len() == 1 {
                return (0.80, "f.last");
            }
            if a.len() >= 2 && local.matches('.').count() == 1 {
                return (0.90, "first.last");
            }
        }
    }
    for sep in ['_', '-'] {
        if let Some((a, b)) = local.split_once(sep) {
            if is_alpha(a) && is_alpha(b) && a.len() >= 2 && b.len() >= 2 {
                return (0.85, "first_last");
            }
        }
    }

    // Trailing digits after a name: jane2024, bob7.
    let stripped = local.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = local.len() - stripped.len();
    if (1..=4).contains(&digits) && is_alpha(stripped) && stripped.len() >= 2 {
        return (0.50, "first_digits");
    }

    // Undotted alphabetic locals: length is the only remaining signal.
    // Short forms read as initial+surname, mid-length as a bare first name,
    // long as two concatenated names.
    if is_alpha(local) {
        return match local.len() {
            2..=5 => (0.80, "flast"),
            6..=8 => (0.75, "first"),
            9..=20 => (0.85, "firstlast"),
            _ => (0.10, "random"),
        };
    }

    (0.10, "random")
}

fn is_alpha(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic())
}
