//! Free-text location → structured [`Location`] set.
//!
//! Total: every input, the empty string included, yields at least one entry.
//! Input that resolves to nothing degrades to a single `remote:global`.

pub mod eligibility;
pub mod gazetteer;

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{Location, MacroRegion, NormalizedPosting, RawPosting, RemoteScope};

static SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+or\s+|\s*/\s*|\s*;\s*|\s*\|\s*|\s*\n\s*|\s+&\s+|\s+and\s+|\s*•\s*").unwrap()
});
static REMOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(remote|anywhere|work from home|wfh|distributed|telecommute|worldwide|global)\b").unwrap()
});
static GLOBAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(anywhere|worldwide|global|world)\b").unwrap());
static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(remote|hybrid|onsite|on-site|in-office|office|fully|first|friendly|only|based|within|in|from|the|work from home|wfh|distributed|telecommute|time ?zones?|anywhere|worldwide|global|world|position|role)\b").unwrap()
});

/// Place evidence used to scope a bare "Remote".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Country {
        country: String,
        region: Option<MacroRegion>,
    },
    Region(MacroRegion),
}

impl Anchor {
    pub fn country(code: &str) -> Self {
        Anchor::Country {
            country: code.to_string(),
            region: gazetteer::macro_region(code),
        }
    }

    pub(crate) fn from_location(loc: &Location) -> Option<Self> {
        match loc {
            Location::City { country, .. } | Location::Country { country } => {
                Some(Anchor::country(country))
            }
            Location::Region { region } => Some(Anchor::Region(*region)),
            Location::Remote { .. } => None,
        }
    }
}

/// Normalizer output. `remote_unscoped` marks a remote entry that was
/// defaulted to global for lack of evidence, so a later pass may narrow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub locations: Vec<Location>,
    pub remote_unscoped: bool,
}

#[derive(Debug)]
enum Token {
    Place(Location),
    /// Remote with an explicit scope plus any place named alongside it.
    ScopedRemote(RemoteScope, Option<Location>),
    Placeholder,
    Unresolved,
}

pub fn normalize(raw_location: &str, description: Option<&str>) -> Vec<Location> {
    normalize_detailed(raw_location, description).locations
}

/// Normalize a posting's raw location, using its description as evidence.
pub fn normalize_posting(posting: RawPosting) -> NormalizedPosting {
    let Normalized {
        locations,
        remote_unscoped,
    } = normalize_detailed(&posting.location_raw, posting.description.as_deref());
    NormalizedPosting {
        posting,
        locations,
        remote_unscoped,
    }
}

pub fn normalize_detailed(raw_location: &str, description: Option<&str>) -> Normalized {
    let mut locations = Vec::new();
    let mut placeholder = false;

    for token in split_tokens(raw_location) {
        match classify_token(token) {
            Token::Place(loc) => locations.push(loc),
            Token::ScopedRemote(scope, place) => {
                locations.extend(place);
                locations.push(Location::Remote { scope });
            }
            Token::Placeholder => placeholder = true,
            Token::Unresolved => {}
        }
    }

    if locations.is_empty() && !placeholder {
        // Nothing recognisable: least-confident default, still narrowable.
        placeholder = true;
    }

    let mut remote_unscoped = false;
    if placeholder {
        let anchors: Vec<Anchor> = locations.iter().filter_map(Anchor::from_location).collect();
        let scope = infer_scope(&anchors).or_else(|| {
            if anchors.is_empty() {
                description.and_then(|d| infer_scope(&eligibility::scan(d)))
            } else {
                None
            }
        });
        remote_unscoped = scope.is_none();
        locations.push(Location::Remote {
            scope: scope.unwrap_or(RemoteScope::Global),
        });
    }

    Normalized {
        locations: dedup(locations),
        remote_unscoped,
    }
}

/// Narrow a remote scope from co-located places.
///
/// One country → that country. Several countries (or regions) in a single
/// macro region → the region. Anything broader, or no anchors, → `None`.
pub fn infer_scope(anchors: &[Anchor]) -> Option<RemoteScope> {
    if anchors.is_empty() {
        return None;
    }

    let mut countries = BTreeSet::new();
    // `None` marks a country outside every macro region; it blocks widening.
    let mut regions: BTreeSet<Option<MacroRegion>> = BTreeSet::new();
    let mut has_explicit_region = false;
    for anchor in anchors {
        match anchor {
            Anchor::Country { country, region } => {
                countries.insert(country.as_str());
                regions.insert(*region);
            }
            Anchor::Region(region) => {
                has_explicit_region = true;
                regions.insert(Some(*region));
            }
        }
    }

    if !has_explicit_region && countries.len() == 1 {
        let country = countries.into_iter().next()?;
        return Some(RemoteScope::Country {
            country: country.to_string(),
        });
    }
    match regions.into_iter().collect::<Vec<_>>().as_slice() {
        [Some(region)] => Some(RemoteScope::Region { region: *region }),
        _ => None,
    }
}

fn split_tokens(raw: &str) -> impl Iterator<Item = &str> {
    SPLIT_RE
        .split(raw)
        .map(|t| t.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '-' | '(' | ')' | '.')))
        .filter(|t| !t.is_empty())
}

fn classify_token(token: &str) -> Token {
    if REMOTE_RE.is_match(token) {
        let residual = FILLER_RE.replace_all(token, " ");
        let residual = residual
            .split(|c: char| !(c.is_alphanumeric() || c == ',' || c == ' ' || c == '.'))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let residual = residual.trim_matches(|c: char| c == ',' || c.is_whitespace());

        if residual.is_empty() {
            return if GLOBAL_RE.is_match(token) {
                Token::ScopedRemote(RemoteScope::Global, None)
            } else {
                Token::Placeholder
            };
        }
        return match resolve_place(residual) {
            Some(Location::Country { country }) => {
                Token::ScopedRemote(RemoteScope::Country { country }, None)
            }
            Some(Location::Region { region }) => {
                Token::ScopedRemote(RemoteScope::Region { region }, None)
            }
            Some(city @ Location::City { .. }) => {
                let country = city.country().unwrap_or_default().to_string();
                Token::ScopedRemote(RemoteScope::Country { country }, Some(city))
            }
            _ => Token::Placeholder,
        };
    }

    match resolve_place(strip_hybrid(token)) {
        Some(loc) => Token::Place(loc),
        None => Token::Unresolved,
    }
}

fn strip_hybrid(token: &str) -> &str {
    fn trim(t: &str) -> &str {
        t.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | ':' | '(' | ')' | ','))
    }
    for word in ["hybrid", "onsite", "on-site", "in-office"] {
        let n = word.len();
        if token.get(..n).is_some_and(|p| p.eq_ignore_ascii_case(word)) {
            return trim(&token[n..]);
        }
        let cut = token.len().saturating_sub(n);
        if token.get(cut..).is_some_and(|s| s.eq_ignore_ascii_case(word)) {
            return trim(&token[..cut]);
        }
    }
    token
}

/// Resolve one place token: `"City[, Region][, Country]"`, a country, a
/// macro region or a lone state/province.
fn resolve_place(token: &str) -> Option<Location> {
    let parts: Vec<&str> = token
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let (head, hints) = parts.split_first()?;

    let hint_country = hints
        .iter()
        .rev()
        .find_map(|h| gazetteer::lookup_country(h));
    let hint_sub = hints.iter().find_map(|h| gazetteer::lookup_subnational(h));

    let country_hint = hint_country.or(hint_sub.map(|(_, c)| c));
    if let Some(entry) = gazetteer::lookup_city(head, country_hint) {
        return Some(Location::City {
            country: entry.country.to_string(),
            city: entry.token.to_string(),
            region: entry.region.map(str::to_string),
        });
    }

    if hints.is_empty() {
        if let Some(country) = gazetteer::lookup_country(head) {
            return Some(Location::Country {
                country: country.to_string(),
            });
        }
        if let Some(region) = MacroRegion::parse(head) {
            return Some(Location::Region { region });
        }
        if let Some((_, country)) = gazetteer::lookup_subnational_name(head) {
            return Some(Location::Country {
                country: country.to_string(),
            });
        }
        return None;
    }

    // Unknown city with a recognisable state/province or country after it.
    let token = gazetteer::slug(head);
    if token.is_empty() {
        return None;
    }
    match (hint_sub, hint_country) {
        (Some((region, country)), _) => Some(Location::City {
            country: country.to_string(),
            city: token,
            region: Some(region.to_string()),
        }),
        (None, Some(country)) => Some(Location::City {
            country: country.to_string(),
            city: token,
            region: None,
        }),
        (None, None) => None,
    }
}

/// Drop repeated entries, keeping first-seen order.
fn dedup(locations: Vec<Location>) -> Vec<Location> {
    let mut seen = BTreeSet::new();
    locations
        .into_iter()
        .filter(|loc| seen.insert(loc.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn city(city: &str, region: Option<&str>, country: &str) -> Location {
        Location::City {
            country: country.into(),
            city: city.into(),
            region: region.map(Into::into),
        }
    }

    fn remote_country(country: &str) -> Location {
        Location::Remote {
            scope: RemoteScope::Country {
                country: country.into(),
            },
        }
    }

    #[test]
    fn new_york_or_remote_scopes_to_us() {
        let n = normalize_detailed("New York or Remote", None);
        assert_eq!(
            n.locations,
            vec![city("new_york", Some("NY"), "US"), remote_country("US")]
        );
        assert!(!n.remote_unscoped);
        assert!(!n.locations.contains(&Location::remote_global()));
    }

    #[test]
    fn bare_remote_stays_global() {
        let n = normalize_detailed("Remote", None);
        assert_eq!(n.locations, vec![Location::remote_global()]);
        assert!(n.remote_unscoped);
    }

    #[test]
    fn explicit_worldwide_is_not_a_placeholder() {
        let n = normalize_detailed("Remote - Worldwide", None);
        assert_eq!(n.locations, vec![Location::remote_global()]);
        assert!(!n.remote_unscoped);
    }

    #[test]
    fn empty_and_garbage_degrade_to_global() {
        for input in ["", "   ", "Multiple Locations", "???"] {
            let n = normalize_detailed(input, None);
            assert_eq!(n.locations, vec![Location::remote_global()], "input {:?}", input);
            assert!(n.remote_unscoped);
        }
    }

    #[test]
    fn explicit_remote_scopes() {
        assert_eq!(normalize("Remote - US", None), vec![remote_country("US")]);
        assert_eq!(normalize("US Remote", None), vec![remote_country("US")]);
        assert_eq!(
            normalize("Remote (EMEA)", None),
            vec![Location::Remote {
                scope: RemoteScope::Region {
                    region: MacroRegion::Emea
                }
            }]
        );
    }

    #[test]
    fn unknown_city_with_full_state_name() {
        assert_eq!(
            normalize("Redmond, Washington", None),
            vec![city("redmond", Some("WA"), "US")]
        );
        assert_eq!(
            normalize("Buffalo, New York", None),
            vec![city("buffalo", Some("NY"), "US")]
        );
        assert_eq!(normalize("Boise, Idaho", None), vec![city("boise", Some("ID"), "US")]);
    }

    #[test]
    fn multi_city_single_country() {
        let locs = normalize("San Francisco, CA / Seattle, WA; Remote", None);
        assert_eq!(
            locs,
            vec![
                city("san_francisco", Some("CA"), "US"),
                city("seattle", Some("WA"), "US"),
                remote_country("US"),
            ]
        );
    }

    #[test]
    fn cities_spanning_one_region_scope_to_region() {
        let locs = normalize("London or Berlin or Remote", None);
        assert!(locs.contains(&Location::Remote {
            scope: RemoteScope::Region {
                region: MacroRegion::Emea
            }
        }));
    }

    #[test]
    fn cities_spanning_regions_leave_remote_global() {
        let n = normalize_detailed("New York or London or Remote", None);
        assert!(n.locations.contains(&Location::remote_global()));
        assert!(n.remote_unscoped);
    }

    #[test]
    fn description_narrows_bare_remote() {
        let n = normalize_detailed(
            "Remote",
            Some("Applicants must be authorized to work in the United States."),
        );
        assert_eq!(n.locations, vec![remote_country("US")]);
        assert!(!n.remote_unscoped);
    }

    #[test]
    fn description_listing_two_countries_scopes_to_region() {
        for text in [
            "Candidates must be authorized to work in the US or Canada.",
            "This position is remote within the United States and Canada.",
        ] {
            let n = normalize_detailed("Remote", Some(text));
            assert_eq!(
                n.locations,
                vec![Location::Remote {
                    scope: RemoteScope::Region {
                        region: MacroRegion::Na
                    }
                }],
                "description {:?}",
                text
            );
            assert!(!n.remote_unscoped);
        }
    }

    #[test]
    fn description_ignored_when_cities_present() {
        let locs = normalize(
            "Toronto or Remote",
            Some("You must be authorized to work in the United States."),
        );
        assert_eq!(locs, vec![city("toronto", Some("ON"), "CA"), remote_country("CA")]);
    }

    #[test]
    fn province_list_narrows_to_country_only() {
        let locs = normalize(
            "Remote",
            Some("We can hire in the following provinces: Ontario, Quebec."),
        );
        assert_eq!(locs, vec![remote_country("CA")]);
    }

    #[test]
    fn unknown_city_with_state() {
        assert_eq!(normalize("Boise, ID", None), vec![city("boise", Some("ID"), "US")]);
        assert_eq!(
            normalize("London, Ontario", None),
            vec![city("london", Some("ON"), "CA")]
        );
    }

    #[test]
    fn hybrid_prefix_resolves_city() {
        assert_eq!(normalize("Hybrid - London", None), vec![city("london", None, "GB")]);
    }

    #[test]
    fn duplicates_removed() {
        assert_eq!(
            normalize("NYC / New York, NY", None),
            vec![city("new_york", Some("NY"), "US")]
        );
    }

    #[test]
    fn country_only() {
        assert_eq!(
            normalize("Germany", None),
            vec![Location::Country {
                country: "DE".into()
            }]
        );
    }

    proptest! {
        #[test]
        fn never_empty(raw in ".{0,64}", desc in proptest::option::of(".{0,128}")) {
            let locs = normalize(&raw, desc.as_deref());
            prop_assert!(!locs.is_empty());
        }
    }
}
