use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Locations ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MacroRegion {
    Na,
    Latam,
    Emea,
    Apac,
}

impl MacroRegion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacroRegion::Na => "NA",
            MacroRegion::Latam => "LATAM",
            MacroRegion::Emea => "EMEA",
            MacroRegion::Apac => "APAC",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "NA" | "AMER" | "NORTH AMERICA" => Some(MacroRegion::Na),
            "LATAM" | "LATIN AMERICA" | "SOUTH AMERICA" => Some(MacroRegion::Latam),
            "EMEA" | "EUROPE" | "EU" => Some(MacroRegion::Emea),
            "APAC" | "ASIA" | "ASIA PACIFIC" => Some(MacroRegion::Apac),
            _ => None,
        }
    }
}

impl fmt::Display for MacroRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic breadth of a remote posting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteScope {
    Global,
    Country { country: String },
    Region { region: MacroRegion },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    City {
        country: String,
        city: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
    Country {
        country: String,
    },
    Region {
        region: MacroRegion,
    },
    Remote {
        scope: RemoteScope,
    },
}

impl Location {
    pub fn remote_global() -> Self {
        Location::Remote {
            scope: RemoteScope::Global,
        }
    }

    /// Country the location is pinned to, if any.
    pub fn country(&self) -> Option<&str> {
        match self {
            Location::City { country, .. } | Location::Country { country } => Some(country),
            Location::Remote {
                scope: RemoteScope::Country { country },
            } => Some(country),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::City {
                country,
                city,
                region: Some(region),
            } => write!(f, "city:{city},{region},{country}"),
            Location::City { country, city, .. } => write!(f, "city:{city},{country}"),
            Location::Country { country } => write!(f, "country:{country}"),
            Location::Region { region } => write!(f, "region:{region}"),
            Location::Remote { scope } => match scope {
                RemoteScope::Global => f.write_str("remote:global"),
                RemoteScope::Country { country } => write!(f, "remote:country:{country}"),
                RemoteScope::Region { region } => write!(f, "remote:region:{region}"),
            },
        }
    }
}

// ── Postings ──

/// (source, source-native entity) pair, e.g. `greenhouse/stripe`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub entity: String,
}

impl SourceRef {
    pub fn new(source: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            entity: entity.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.entity)
    }
}

/// One source's view of a job opening, as handed over by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPosting {
    pub source_ref: SourceRef,
    pub external_id: Option<String>,
    pub employer: String,
    pub title: String,
    pub location_raw: String,
    pub description: Option<String>,
    pub url: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub seen_at: DateTime<Utc>,
}

impl RawPosting {
    pub fn description_len(&self) -> usize {
        self.description
            .as_deref()
            .map(|d| d.chars().count())
            .unwrap_or(0)
    }
}

/// A posting after the location normalizer has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPosting {
    pub posting: RawPosting,
    pub locations: Vec<Location>,
    /// The remote entry was defaulted to global for lack of evidence.
    pub remote_unscoped: bool,
}

// ── Canonical records ──

/// Content hash identifying one real-world opening.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(pub(crate) String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Live,
    /// Not re-listed by a source that used to list it; presumed closed.
    Missing,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Live => "live",
            UrlStatus::Missing => "missing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(UrlStatus::Live),
            "missing" => Some(UrlStatus::Missing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalJobRecord {
    pub key: IdentityKey,
    pub employer: String,
    pub title: String,
    pub locations: BTreeSet<Location>,
    pub description: Option<String>,
    pub description_source: Option<String>,
    pub url: String,
    pub sources: BTreeSet<SourceRef>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub url_status: UrlStatus,
    pub missing_since: Option<DateTime<Utc>>,
}

// ── Resume state ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeState {
    pub source_ref: SourceRef,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl ScrapeState {
    pub fn new(source_ref: SourceRef) -> Self {
        Self {
            source_ref,
            last_attempt: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}
