//! Identity & merge: one canonical record per identity key.
//!
//! Two phases so the caller can load prior records between them:
//! [`MergeEngine::group`] validates, narrows and keys the batch, then
//! [`MergeEngine::resolve_all`] folds each group (plus its prior record, if
//! any) into a [`CanonicalJobRecord`]. Both phases are pure.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use rayon::prelude::*;

use crate::config::MergeConfig;
use crate::identity::{self, key_for, normalize_employer, normalize_title};
use crate::location::{self, infer_scope, Anchor};
use crate::model::{
    CanonicalJobRecord, IdentityKey, Location, NormalizedPosting, RawPosting, RemoteScope,
    SourceRef, UrlStatus,
};

// ── Rejections ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyEmployer,
    EmptyTitle,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::EmptyEmployer => "empty employer",
            RejectReason::EmptyTitle => "empty title",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub source_ref: SourceRef,
    pub reason: RejectReason,
    pub title: String,
}

// ── Candidates ──

/// The fields the tie-break looks at, borrowed from a posting or a prior record.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub description: Option<&'a str>,
    pub description_len: usize,
    pub source: &'a str,
    pub entity: &'a str,
    pub url: &'a str,
    pub external_id: Option<&'a str>,
    pub title: &'a str,
    pub employer: &'a str,
}

impl<'a> Candidate<'a> {
    pub fn from_posting(p: &'a RawPosting) -> Self {
        Self {
            description: p.description.as_deref(),
            description_len: p.description_len(),
            source: &p.source_ref.source,
            entity: &p.source_ref.entity,
            url: &p.url,
            external_id: p.external_id.as_deref(),
            title: &p.title,
            employer: &p.employer,
        }
    }

    fn from_record(r: &'a CanonicalJobRecord) -> Self {
        Self {
            description: r.description.as_deref(),
            description_len: r.description.as_deref().map(|d| d.chars().count()).unwrap_or(0),
            source: r.description_source.as_deref().unwrap_or_default(),
            entity: "",
            url: &r.url,
            external_id: None,
            title: &r.title,
            employer: &r.employer,
        }
    }
}

/// A validated, narrowed and keyed batch.
#[derive(Debug, Default)]
pub struct Grouped {
    pub groups: BTreeMap<IdentityKey, Vec<NormalizedPosting>>,
    pub rejections: Vec<Rejection>,
}

impl Grouped {
    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.groups.keys()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub records: Vec<CanonicalJobRecord>,
    pub rejections: Vec<Rejection>,
}

pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Total order over candidates; `Less` means `a` wins.
    ///
    /// Longer description, then source priority rank, then source id, then
    /// entity, url, external id. The last keys only separate postings that
    /// agree on everything the earlier ones look at.
    pub fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        b.description_len
            .cmp(&a.description_len)
            .then_with(|| self.config.rank(a.source).cmp(&self.config.rank(b.source)))
            .then_with(|| a.source.cmp(b.source))
            .then_with(|| a.entity.cmp(b.entity))
            .then_with(|| a.url.cmp(b.url))
            .then_with(|| a.external_id.cmp(&b.external_id))
            .then_with(|| a.description.cmp(&b.description))
            .then_with(|| a.title.cmp(b.title))
            .then_with(|| a.employer.cmp(b.employer))
    }

    /// Reject unusable postings, narrow unscoped remotes from same-opening
    /// siblings, and group the rest by identity key.
    pub fn group(&self, postings: Vec<NormalizedPosting>) -> Grouped {
        let mut rejections = Vec::new();
        // (employer_norm, title_norm) → postings of that opening, any location.
        let mut families: BTreeMap<(String, String), Vec<NormalizedPosting>> = BTreeMap::new();

        for np in postings {
            let employer = normalize_employer(&np.posting.employer);
            let title = normalize_title(&np.posting.title);
            let reason = if employer.is_empty() {
                Some(RejectReason::EmptyEmployer)
            } else if title.is_empty() {
                Some(RejectReason::EmptyTitle)
            } else {
                None
            };
            if let Some(reason) = reason {
                rejections.push(Rejection {
                    source_ref: np.posting.source_ref.clone(),
                    reason,
                    title: np.posting.title.clone(),
                });
                continue;
            }
            families.entry((employer, title)).or_default().push(np);
        }

        let mut groups: BTreeMap<IdentityKey, Vec<NormalizedPosting>> = BTreeMap::new();
        for ((employer, title), mut family) in families {
            narrow_family(&mut family);
            for np in family {
                let key = key_for(&employer, &title, &identity::primary_token(&np.locations));
                groups.entry(key).or_default().push(np);
            }
        }

        Grouped { groups, rejections }
    }

    /// Fold one group and its prior record into the new canonical value.
    pub fn resolve(
        &self,
        key: &IdentityKey,
        postings: &[NormalizedPosting],
        prior: Option<&CanonicalJobRecord>,
    ) -> Option<CanonicalJobRecord> {
        let display = postings
            .iter()
            .map(|np| Candidate::from_posting(&np.posting))
            .min_by(|a, b| self.compare(a, b))?;

        let description_winner = postings
            .iter()
            .map(|np| Candidate::from_posting(&np.posting))
            .chain(prior.map(Candidate::from_record))
            .filter(|c| c.description.is_some())
            .min_by(|a, b| self.compare(a, b));

        let mut locations: BTreeSet<Location> = postings
            .iter()
            .flat_map(|np| np.locations.iter().cloned())
            .collect();
        let mut sources: BTreeSet<SourceRef> = postings
            .iter()
            .map(|np| np.posting.source_ref.clone())
            .collect();

        let seen = postings.iter().map(|np| np.posting.seen_at);
        let mut first_seen = seen.clone().min()?;
        let mut last_seen = seen.max()?;
        let mut posted_at = postings.iter().filter_map(|np| np.posting.posted_at).min();

        if let Some(prior) = prior {
            locations.extend(prior.locations.iter().cloned());
            sources.extend(prior.sources.iter().cloned());
            first_seen = first_seen.min(prior.first_seen);
            last_seen = last_seen.max(prior.last_seen);
            posted_at = match (posted_at, prior.posted_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        Some(CanonicalJobRecord {
            key: key.clone(),
            employer: display.employer.trim().to_string(),
            title: display.title.trim().to_string(),
            locations,
            description: description_winner.and_then(|c| c.description.map(str::to_string)),
            description_source: description_winner
                .map(|c| c.source.to_string())
                .filter(|s| !s.is_empty()),
            url: display.url.to_string(),
            sources,
            first_seen,
            last_seen,
            posted_at,
            url_status: UrlStatus::Live,
            missing_since: None,
        })
    }

    /// Resolve every group in parallel. Output is sorted by key.
    pub fn resolve_all(
        &self,
        grouped: &Grouped,
        priors: &HashMap<IdentityKey, CanonicalJobRecord>,
    ) -> Vec<CanonicalJobRecord> {
        let mut records: Vec<CanonicalJobRecord> = grouped
            .groups
            .par_iter()
            .filter_map(|(key, postings)| self.resolve(key, postings, priors.get(key)))
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    pub fn merge(
        &self,
        postings: Vec<NormalizedPosting>,
        priors: &HashMap<IdentityKey, CanonicalJobRecord>,
    ) -> MergeOutcome {
        let grouped = self.group(postings);
        let records = self.resolve_all(&grouped, priors);
        MergeOutcome {
            records,
            rejections: grouped.rejections,
        }
    }

    /// Normalize raw postings, then merge.
    pub fn merge_raw(
        &self,
        postings: Vec<RawPosting>,
        priors: &HashMap<IdentityKey, CanonicalJobRecord>,
    ) -> MergeOutcome {
        let normalized = postings
            .into_par_iter()
            .map(location::normalize_posting)
            .collect();
        self.merge(normalized, priors)
    }
}

/// Scope each unscoped remote from the places its siblings name.
fn narrow_family(family: &mut [NormalizedPosting]) {
    if !family.iter().any(|np| np.remote_unscoped) {
        return;
    }
    let anchors: Vec<Anchor> = family
        .iter()
        .flat_map(|np| np.locations.iter().filter_map(Anchor::from_location))
        .collect();
    let Some(scope) = infer_scope(&anchors) else {
        return;
    };

    for np in family.iter_mut().filter(|np| np.remote_unscoped) {
        let narrowed = Location::Remote {
            scope: scope.clone(),
        };
        let mut locations = Vec::with_capacity(np.locations.len());
        for loc in np.locations.drain(..) {
            let loc = match loc {
                Location::Remote {
                    scope: RemoteScope::Global,
                } => narrowed.clone(),
                other => other,
            };
            if !locations.contains(&loc) {
                locations.push(loc);
            }
        }
        np.locations = locations;
        np.remote_unscoped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::normalize_posting;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn raw(source: &str, title: &str, location: &str, description: Option<&str>) -> RawPosting {
        RawPosting {
            source_ref: SourceRef::new(source, "acme"),
            external_id: None,
            employer: "Acme".into(),
            title: title.into(),
            location_raw: location.into(),
            description: description.map(Into::into),
            url: format!("https://{source}.example/acme/1"),
            posted_at: None,
            seen_at: at(10),
        }
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(MergeConfig {
            source_priority: vec!["greenhouse".into(), "lever".into()],
        })
    }

    fn no_priors() -> HashMap<IdentityKey, CanonicalJobRecord> {
        HashMap::new()
    }

    #[test]
    fn remote_and_city_sightings_collapse() {
        let mut a = raw("aggregator", "Data Engineer", "Remote", None);
        a.seen_at = at(9);
        let b = raw("greenhouse", "Data Engineer", "New York, NY", None);

        let out = engine().merge_raw(vec![a, b], &no_priors());
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        let expected: BTreeSet<Location> = [
            Location::City {
                country: "US".into(),
                city: "new_york".into(),
                region: Some("NY".into()),
            },
            Location::Remote {
                scope: RemoteScope::Country {
                    country: "US".into(),
                },
            },
        ]
        .into_iter()
        .collect();
        assert_eq!(rec.locations, expected);
        assert!(!rec.locations.contains(&Location::remote_global()));
        assert_eq!(rec.sources.len(), 2);
        assert_eq!(rec.first_seen, at(9));
        assert_eq!(rec.last_seen, at(10));
        assert!(rec.first_seen <= rec.last_seen);
    }

    #[test]
    fn longer_description_wins_in_any_order() {
        let short = raw("greenhouse", "Data Engineer", "Berlin", Some("short"));
        let long = raw("lever", "Data Engineer", "Berlin", Some("a much longer description"));

        for batch in [vec![short.clone(), long.clone()], vec![long, short]] {
            let out = engine().merge_raw(batch, &no_priors());
            let rec = &out.records[0];
            assert_eq!(rec.description.as_deref(), Some("a much longer description"));
            assert_eq!(rec.description_source.as_deref(), Some("lever"));
        }
    }

    #[test]
    fn equal_length_prefers_priority_then_source_id() {
        let e = engine();
        let gh = raw("greenhouse", "Data Engineer", "Berlin", Some("abcd"));
        let lv = raw("lever", "Data Engineer", "Berlin", Some("wxyz"));
        let out = e.merge_raw(vec![lv.clone(), gh.clone()], &no_priors());
        assert_eq!(out.records[0].description.as_deref(), Some("abcd"));

        // Neither listed: lexicographic source id.
        let x = raw("zeta", "Data Engineer", "Berlin", Some("1111"));
        let y = raw("alpha", "Data Engineer", "Berlin", Some("2222"));
        let out = e.merge_raw(vec![x, y], &no_priors());
        assert_eq!(out.records[0].description_source.as_deref(), Some("alpha"));

        // Listed beats unlisted.
        let listed = raw("lever", "Data Engineer", "Berlin", Some("3333"));
        let unlisted = raw("aaa", "Data Engineer", "Berlin", Some("4444"));
        let out = e.merge_raw(vec![unlisted, listed], &no_priors());
        assert_eq!(out.records[0].description_source.as_deref(), Some("lever"));
    }

    #[test]
    fn compare_is_total_and_antisymmetric() {
        let e = engine();
        let p1 = raw("greenhouse", "Data Engineer", "Berlin", Some("abc"));
        let p2 = raw("greenhouse", "Data Engineer", "Berlin", Some("abd"));
        let (a, b) = (Candidate::from_posting(&p1), Candidate::from_posting(&p2));
        assert_eq!(e.compare(&a, &b), e.compare(&b, &a).reverse());
        assert_ne!(e.compare(&a, &b), Ordering::Equal);
        assert_eq!(e.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn idempotent_and_byte_identical() {
        let batch = vec![
            raw("greenhouse", "Data Engineer", "New York or Remote", Some("x")),
            raw("lever", "ML Engineer", "London", Some("yy")),
            raw("lever", "Data Engineer", "Remote", None),
        ];
        let e = engine();
        let first = e.merge_raw(batch.clone(), &no_priors());
        let second = e.merge_raw(batch, &no_priors());
        assert_eq!(first.records, second.records);
        assert_eq!(
            serde_json::to_string(&first.records).unwrap(),
            serde_json::to_string(&second.records).unwrap()
        );
    }

    #[test]
    fn remerge_against_own_output_is_a_fixpoint() {
        let batch = vec![
            raw("greenhouse", "Data Engineer", "Toronto", Some("desc")),
            raw("lever", "Data Engineer", "Toronto", None),
        ];
        let e = engine();
        let first = e.merge_raw(batch.clone(), &no_priors());
        let priors: HashMap<_, _> = first
            .records
            .iter()
            .map(|r| (r.key.clone(), r.clone()))
            .collect();
        let second = e.merge_raw(batch, &priors);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn prior_history_is_kept() {
        let e = engine();
        let mut old = raw("greenhouse", "Data Engineer", "Berlin", Some("the long original text"));
        old.seen_at = at(1);
        old.posted_at = Some(at(1));
        let prior = e.merge_raw(vec![old], &no_priors()).records.remove(0);
        let mut prior = prior;
        prior.url_status = UrlStatus::Missing;
        prior.missing_since = Some(at(5));

        let mut new = raw("lever", "Data Engineer", "Berlin", Some("short"));
        new.seen_at = at(20);
        let priors: HashMap<_, _> = [(prior.key.clone(), prior.clone())].into_iter().collect();
        let rec = e.merge_raw(vec![new], &priors).records.remove(0);

        assert_eq!(rec.key, prior.key);
        assert_eq!(rec.first_seen, at(1));
        assert_eq!(rec.last_seen, at(20));
        assert_eq!(rec.posted_at, Some(at(1)));
        assert_eq!(rec.description.as_deref(), Some("the long original text"));
        assert_eq!(rec.description_source.as_deref(), Some("greenhouse"));
        assert_eq!(rec.url, "https://lever.example/acme/1");
        assert_eq!(rec.sources.len(), 2);
        assert_eq!(rec.url_status, UrlStatus::Live);
        assert_eq!(rec.missing_since, None);
    }

    #[test]
    fn empty_fields_are_rejected_not_fatal() {
        let mut no_employer = raw("lever", "Data Engineer", "Berlin", None);
        no_employer.employer = "   ".into();
        let no_title = raw("lever", "  ", "Berlin", None);
        let good = raw("lever", "Data Engineer", "Berlin", None);

        let out = engine().merge_raw(vec![no_employer, no_title, good], &no_priors());
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejections.len(), 2);
        assert_eq!(out.rejections[0].reason, RejectReason::EmptyEmployer);
        assert_eq!(out.rejections[1].reason, RejectReason::EmptyTitle);
    }

    #[test]
    fn different_countries_stay_separate() {
        let out = engine().merge_raw(
            vec![
                raw("lever", "Data Engineer", "Berlin", None),
                raw("lever", "Data Engineer", "Toronto", None),
            ],
            &no_priors(),
        );
        assert_eq!(out.records.len(), 2);
    }

    #[test]
    fn unscoped_remote_not_narrowed_across_regions() {
        let out = engine().merge_raw(
            vec![
                raw("a", "Data Engineer", "Remote", None),
                raw("b", "Data Engineer", "Berlin", None),
                raw("c", "Data Engineer", "Toronto", None),
            ],
            &no_priors(),
        );
        assert_eq!(out.records.len(), 3);
        assert!(out
            .records
            .iter()
            .any(|r| r.locations.contains(&Location::remote_global())));
    }

    #[test]
    fn narrowing_only_within_same_opening() {
        let grouped = engine().group(vec![
            normalize_posting(raw("a", "Data Engineer", "Remote", None)),
            normalize_posting(raw("b", "Product Manager", "Paris", None)),
        ]);
        let remote = grouped
            .groups
            .values()
            .flatten()
            .find(|np| np.posting.title == "Data Engineer")
            .unwrap();
        assert!(remote.remote_unscoped);
        assert_eq!(remote.locations, vec![Location::remote_global()]);
    }

    proptest! {
        #[test]
        fn input_order_does_not_matter(batch in Just(vec![
            raw("greenhouse", "Data Engineer", "Remote", Some("one")),
            raw("lever", "Data Engineer", "New York, NY", Some("three")),
            raw("indeed", "Data Engineer", "NYC", Some("tw0")),
            raw("lever", "Data Scientist", "London", None),
            raw("greenhouse", "Data Scientist", "London", Some("")),
        ]).prop_shuffle()) {
            let e = engine();
            let baseline = e.merge_raw(vec![
                raw("greenhouse", "Data Engineer", "Remote", Some("one")),
                raw("lever", "Data Engineer", "New York, NY", Some("three")),
                raw("indeed", "Data Engineer", "NYC", Some("tw0")),
                raw("lever", "Data Scientist", "London", None),
                raw("greenhouse", "Data Scientist", "London", Some("")),
            ], &no_priors());
            let shuffled = e.merge_raw(batch, &no_priors());
            prop_assert_eq!(baseline.records, shuffled.records);
        }
    }
}
