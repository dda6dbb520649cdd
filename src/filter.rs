//! Relevance gate, run on listing stubs before any detail fetch.

use std::collections::HashSet;

use regex::{Regex, RegexSet};
use tracing::warn;

use crate::config::RelevanceConfig;
use crate::location::gazetteer;
use crate::model::{Location, MacroRegion, RemoteScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    TitleMismatch,
    LocationMismatch,
}

#[derive(Debug)]
pub struct RelevanceGate {
    titles: RegexSet,
    cities: HashSet<String>,
    countries: HashSet<String>,
    regions: HashSet<MacroRegion>,
    accept_global_remote: bool,
}

impl RelevanceGate {
    /// Compile the configured tables. Patterns that fail to compile are
    /// logged here, once, and left out; they never match anything.
    pub fn new(config: &RelevanceConfig) -> Self {
        let valid: Vec<String> = config
            .title_patterns
            .iter()
            .filter_map(|pattern| {
                let pattern = format!("(?i){pattern}");
                match Regex::new(&pattern) {
                    Ok(_) => Some(pattern),
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Dropping malformed title pattern");
                        None
                    }
                }
            })
            .collect();

        let titles = RegexSet::new(&valid).unwrap_or_else(|e| {
            warn!(error = %e, "Title pattern set failed to build, no title will match");
            RegexSet::empty()
        });

        Self {
            titles,
            cities: config
                .target_cities
                .iter()
                .map(|c| gazetteer::slug(c))
                .collect(),
            countries: config
                .target_countries
                .iter()
                .map(|c| c.trim().to_ascii_uppercase())
                .collect(),
            regions: config.target_regions.iter().copied().collect(),
            accept_global_remote: config.accept_global_remote,
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.titles.len()
    }

    pub fn evaluate(&self, title: &str, locations: &[Location]) -> Decision {
        if !self.title_matches(title) {
            Decision::TitleMismatch
        } else if !locations.iter().any(|loc| self.location_matches(loc)) {
            Decision::LocationMismatch
        } else {
            Decision::Keep
        }
    }

    /// Both predicates must hold.
    pub fn should_fetch_full(&self, title: &str, locations: &[Location]) -> bool {
        self.evaluate(title, locations) == Decision::Keep
    }

    pub fn title_matches(&self, title: &str) -> bool {
        self.titles.is_match(title)
    }

    pub fn location_matches(&self, location: &Location) -> bool {
        match location {
            Location::City { city, .. } => self.cities.contains(city),
            Location::Country { country } => self.countries.contains(country),
            Location::Region { region } => self.regions.contains(region),
            Location::Remote { scope } => match scope {
                RemoteScope::Global => self.accept_global_remote,
                RemoteScope::Country { country } => {
                    self.countries.contains(country)
                        || gazetteer::macro_region(country)
                            .is_some_and(|r| self.regions.contains(&r))
                }
                RemoteScope::Region { region } => self.regions.contains(region),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RelevanceGate {
        RelevanceGate::new(&RelevanceConfig {
            title_patterns: vec![r"\bdata\s+engineer".into(), r"\bml\b".into()],
            target_cities: vec!["New York".into()],
            target_countries: vec!["us".into()],
            target_regions: vec![MacroRegion::Emea],
            accept_global_remote: true,
        })
    }

    fn city(city: &str, country: &str) -> Location {
        Location::City {
            country: country.into(),
            city: city.into(),
            region: None,
        }
    }

    fn remote(country: &str) -> Location {
        Location::Remote {
            scope: RemoteScope::Country {
                country: country.into(),
            },
        }
    }

    #[test]
    fn conjunction() {
        let g = gate();
        assert!(g.should_fetch_full("Senior Data Engineer", &[city("new_york", "US")]));
        assert_eq!(
            g.evaluate("Senior Data Engineer", &[city("tokyo", "JP")]),
            Decision::LocationMismatch
        );
        assert_eq!(
            g.evaluate("Account Executive", &[city("new_york", "US")]),
            Decision::TitleMismatch
        );
    }

    #[test]
    fn title_is_case_insensitive() {
        let g = gate();
        assert!(g.title_matches("DATA ENGINEER II"));
        assert!(g.title_matches("Staff ML Platform"));
        assert!(!g.title_matches("Html Developer"));
    }

    #[test]
    fn remote_scopes() {
        let g = gate();
        assert!(g.location_matches(&Location::remote_global()));
        assert!(g.location_matches(&remote("US")));
        assert!(!g.location_matches(&remote("JP")));
        // Country inside a target region.
        assert!(g.location_matches(&remote("DE")));
        assert!(g.location_matches(&Location::Remote {
            scope: RemoteScope::Region {
                region: MacroRegion::Emea
            }
        }));
        assert!(!g.location_matches(&Location::Remote {
            scope: RemoteScope::Region {
                region: MacroRegion::Apac
            }
        }));
    }

    #[test]
    fn global_remote_can_be_refused() {
        let g = RelevanceGate::new(&RelevanceConfig {
            accept_global_remote: false,
            ..RelevanceConfig::default()
        });
        assert!(!g.location_matches(&Location::remote_global()));
    }

    #[test]
    fn country_entries_use_target_countries() {
        let g = gate();
        assert!(g.location_matches(&Location::Country {
            country: "US".into()
        }));
        assert!(!g.location_matches(&Location::Country {
            country: "FR".into()
        }));
    }

    #[test]
    fn malformed_pattern_is_dropped_not_fatal() {
        let g = RelevanceGate::new(&RelevanceConfig {
            title_patterns: vec!["(unclosed".into(), "engineer".into()],
            ..RelevanceConfig::default()
        });
        assert_eq!(g.pattern_count(), 1);
        assert!(g.title_matches("Engineer"));
        assert!(!g.title_matches("(unclosed"));
    }

    #[test]
    fn all_patterns_malformed_matches_nothing() {
        let g = RelevanceGate::new(&RelevanceConfig {
            title_patterns: vec!["[".into()],
            ..RelevanceConfig::default()
        });
        assert!(!g.should_fetch_full("[", &[Location::remote_global()]));
    }
}
