//! Work-eligibility phrases in description text.
//!
//! Only consulted when a bare "Remote" has nothing co-located to scope it.
//! Evidence is reported at country (or macro region) granularity. Lists of
//! states/provinces resolve to the owning country, never to the list itself.

use std::sync::LazyLock;

use regex::Regex;

use super::gazetteer;
use super::Anchor;
use crate::model::MacroRegion;

// Each pattern captures the text naming one or more places ("the US or
// Canada"); every listed place is resolved from its leading words.
static PLACE_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:authori[sz]ed|eligible|permitted|legally able|able)\s+to\s+work\s+(?:in|within|from)\s+(?:the\s+)?([a-z][a-z .,]{1,60})",
        r"must\s+(?:be\s+(?:located|based|residing)|reside|live)\s+(?:in|within)\s+(?:the\s+)?([a-z][a-z .,]{1,60})",
        r"(?:candidates?|applicants?|you)\s+(?:must\s+be\s+|should\s+be\s+|are\s+)?based\s+in\s+(?:the\s+)?([a-z][a-z .,]{1,60})",
        r"remote\s+(?:within|in|across|from\s+anywhere\s+in)\s+(?:the\s+)?([a-z][a-z .,]{1,60})",
        r"(?:open\s+to|hiring|accepting)\s+(?:candidates|applicants|applications)\s+(?:in|from)\s+(?:the\s+)?([a-z][a-z .,]{1,60})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static ENUMERATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:following|these|select|approved)\s+(?:u\.?s\.?\s+|canadian\s+)?(?:states|provinces)(?:\s+only)?\s*:?\s*([a-z ,.&]{3,400})").unwrap()
});

const MAX_PLACE_WORDS: usize = 4;

/// Scan a description for eligibility phrases, returning place anchors.
pub fn scan(description: &str) -> Vec<Anchor> {
    let text = description.to_lowercase();
    let mut anchors = Vec::new();

    for re in PLACE_PHRASES.iter() {
        for caps in re.captures_iter(&text) {
            anchors.extend(listed_places(&caps[1]));
        }
    }

    for caps in ENUMERATED_RE.captures_iter(&text) {
        anchors.extend(enumerated_units(&caps[1]));
    }

    anchors
}

/// Split "x, y or the z" into its items and resolve each one. The list ends
/// at the first sentence break.
fn listed_places(captured: &str) -> Vec<Anchor> {
    let sentence = captured.split(". ").next().unwrap_or_default();
    sentence
        .split(',')
        .flat_map(|part| part.split(" or "))
        .flat_map(|part| part.split(" and "))
        .filter_map(|part| {
            let part = part.trim();
            let part = part.strip_prefix("or ").unwrap_or(part);
            let part = part.strip_prefix("and ").unwrap_or(part);
            let part = part.strip_prefix("the ").unwrap_or(part);
            resolve_leading_place(part)
        })
        .collect()
}

/// Longest-prefix match of the captured words against countries and regions.
fn resolve_leading_place(captured: &str) -> Option<Anchor> {
    let words: Vec<&str> = captured
        .split_whitespace()
        .map(|w| w.trim_end_matches(['.', ',']))
        .take(MAX_PLACE_WORDS)
        .collect();

    for n in (1..=words.len()).rev() {
        let candidate = words[..n].join(" ");
        if let Some(country) = gazetteer::lookup_country(&candidate) {
            return Some(Anchor::country(country));
        }
        if let Some(region) = MacroRegion::parse(&candidate) {
            return Some(Anchor::Region(region));
        }
        if let Some((_, country)) = gazetteer::lookup_subnational_name(&candidate) {
            return Some(Anchor::country(country));
        }
    }
    None
}

fn enumerated_units(list: &str) -> Vec<Anchor> {
    list.split([',', '&', '.'])
        .flat_map(|part| part.split(" and "))
        .filter_map(|part| {
            let part = part.trim().trim_start_matches("or ").trim();
            gazetteer::lookup_subnational_name(part)
        })
        .map(|(_, country)| Anchor::country(country))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countries(text: &str) -> Vec<String> {
        scan(text)
            .into_iter()
            .filter_map(|a| match a {
                Anchor::Country { country, .. } => Some(country.to_string()),
                Anchor::Region(_) => None,
            })
            .collect()
    }

    #[test]
    fn work_authorization() {
        assert_eq!(
            countries("Candidates must be authorized to work in the United States."),
            vec!["US"]
        );
        assert_eq!(countries("You must be eligible to work in Canada"), vec!["CA"]);
    }

    #[test]
    fn residency_and_remote_within() {
        assert_eq!(countries("You must reside in the UK for tax reasons"), vec!["GB"]);
        assert_eq!(countries("This role is remote within Germany"), vec!["DE"]);
    }

    #[test]
    fn every_listed_country_is_kept() {
        assert_eq!(
            countries("Candidates must be authorized to work in the US or Canada."),
            vec!["US", "CA"]
        );
        assert_eq!(
            countries("This role is remote within the United States and Canada"),
            vec!["US", "CA"]
        );
        assert_eq!(
            countries("Open to candidates in the UK, Ireland, or Germany. Canada office opens later."),
            vec!["GB", "IE", "DE"]
        );
    }

    #[test]
    fn region_phrases() {
        let anchors = scan("We are hiring candidates in EMEA time zones");
        assert_eq!(anchors, vec![Anchor::Region(MacroRegion::Emea)]);
    }

    #[test]
    fn enumerated_provinces_narrow_to_country_only() {
        let anchors = scan("We can employ in the following provinces: Ontario, British Columbia and Alberta.");
        assert!(!anchors.is_empty());
        assert!(anchors.iter().all(|a| *a == Anchor::country("CA")));
    }

    #[test]
    fn enumerated_states() {
        let anchors = scan("Open only to residents of these states: Texas, Florida, New York");
        assert!(anchors.iter().all(|a| *a == Anchor::country("US")));
        assert_eq!(anchors.len(), 3);
    }

    #[test]
    fn no_phrases_no_evidence() {
        assert!(scan("We build great software with a distributed team.").is_empty());
        assert!(scan("").is_empty());
    }
}
