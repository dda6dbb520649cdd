//! Identity keys: which postings are the same real-world opening.
//!
//! A key is a SHA-256 over (employer, title, primary location token), each
//! normalized. Nothing volatile (URLs, timestamps, source ids) goes in.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::model::{IdentityKey, Location, RemoteScope};

static BRACKETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").unwrap());
static EMPLOYER_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(inc|incorporated|llc|ltd|limited|gmbh|corp|corporation|co|plc|sa|bv|ag)\s*$").unwrap()
});

const FIELD_SEPARATOR: u8 = 0x1f;

/// Lowercase, map anything non-alphanumeric to a space, collapse runs.
pub fn normalize_text(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn normalize_employer(employer: &str) -> String {
    let mut name = normalize_text(employer);
    // "Acme Co Inc" → "acme"
    while let Some(m) = EMPLOYER_SUFFIX_RE.find(&name) {
        if m.start() == 0 {
            break;
        }
        name.truncate(m.start());
        name = name.trim_end().to_string();
    }
    name
}

/// Bracketed segments usually carry location or requisition noise.
pub fn normalize_title(title: &str) -> String {
    let stripped = BRACKETED_RE.replace_all(title, " ");
    let normalized = normalize_text(&stripped);
    if normalized.is_empty() {
        normalize_text(title)
    } else {
        normalized
    }
}

/// Country-granular anchor for the key.
///
/// Country codes win over macro regions, which win over `global`. Among
/// equals the smallest token is taken so listing order never matters.
pub fn primary_token(locations: &[Location]) -> String {
    let countries = locations.iter().filter_map(|loc| loc.country()).min();
    if let Some(country) = countries {
        return country.to_ascii_lowercase();
    }

    let regions = locations
        .iter()
        .filter_map(|loc| match loc {
            Location::Region { region }
            | Location::Remote {
                scope: RemoteScope::Region { region },
            } => Some(region.as_str()),
            _ => None,
        })
        .min();
    match regions {
        Some(region) => region.to_ascii_lowercase(),
        None => "global".to_string(),
    }
}

pub fn key_for(employer_norm: &str, title_norm: &str, location_token: &str) -> IdentityKey {
    let mut hasher = Sha256::new();
    hasher.update(employer_norm.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(title_norm.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(location_token.as_bytes());
    IdentityKey(hex::encode(hasher.finalize()))
}

pub fn identity_key(employer: &str, title: &str, locations: &[Location]) -> IdentityKey {
    key_for(
        &normalize_employer(employer),
        &normalize_title(title),
        &primary_token(locations),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MacroRegion;

    fn city(city: &str, country: &str) -> Location {
        Location::City {
            country: country.into(),
            city: city.into(),
            region: None,
        }
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_text("  Senior  Data-Engineer! "), "senior data engineer");
        assert_eq!(normalize_employer("Acme, Inc."), "acme");
        assert_eq!(normalize_employer("Stripe"), "stripe");
        assert_eq!(normalize_employer("Inc"), "inc");
        assert_eq!(normalize_title("Data Engineer (Remote, US)"), "data engineer");
        assert_eq!(normalize_title("Werkstudent (m/w/d)"), "werkstudent");
        assert_eq!(normalize_title("(Remote)"), "remote");
    }

    #[test]
    fn same_triple_same_key() {
        let a = identity_key("Acme Inc", "Data Engineer", &[city("new_york", "US")]);
        let b = identity_key("ACME", "data engineer", &[city("new_york", "US")]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn different_field_different_key() {
        let base = identity_key("Acme", "Data Engineer", &[city("new_york", "US")]);
        assert_ne!(base, identity_key("Acme", "Data Scientist", &[city("new_york", "US")]));
        assert_ne!(base, identity_key("Acme", "Data Engineer", &[city("london", "GB")]));
        assert_ne!(base, identity_key("Other", "Data Engineer", &[city("new_york", "US")]));
    }

    #[test]
    fn separator_prevents_field_bleed() {
        assert_ne!(key_for("ab", "c", "us"), key_for("a", "bc", "us"));
    }

    #[test]
    fn primary_token_is_order_independent() {
        let ny = city("new_york", "US");
        let ldn = city("london", "GB");
        assert_eq!(primary_token(&[ny.clone(), ldn.clone()]), "gb");
        assert_eq!(primary_token(&[ldn, ny]), "gb");
    }

    #[test]
    fn primary_token_fallbacks() {
        let emea = Location::Remote {
            scope: RemoteScope::Region {
                region: MacroRegion::Emea,
            },
        };
        assert_eq!(primary_token(&[emea.clone()]), "emea");
        assert_eq!(primary_token(&[emea, city("berlin", "DE")]), "de");
        assert_eq!(primary_token(&[Location::remote_global()]), "global");
        let scoped = Location::Remote {
            scope: RemoteScope::Country {
                country: "US".into(),
            },
        };
        assert_eq!(primary_token(&[scoped]), primary_token(&[city("new_york", "US")]));
    }
}
