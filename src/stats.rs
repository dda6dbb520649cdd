use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::Decision;
use crate::merge::Rejection;
use crate::model::SourceRef;

/// Keeps the first `cap` items pushed and counts the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedSample<T> {
    cap: usize,
    total: usize,
    items: Vec<T>,
}

impl<T> BoundedSample<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            total: 0,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.total += 1;
        if self.items.len() < self.cap {
            self.items.push(item);
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredTitle {
    pub source_ref: SourceRef,
    pub title: String,
    pub reason: String,
}

impl FilteredTitle {
    pub fn new(source_ref: SourceRef, title: &str, decision: Decision) -> Self {
        let reason = match decision {
            Decision::TitleMismatch => "title",
            Decision::LocationMismatch => "location",
            Decision::Keep => "kept",
        };
        Self {
            source_ref,
            title: title.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub source_ref: SourceRef,
    pub title: String,
    pub reason: String,
}

impl From<&Rejection> for RejectedRecord {
    fn from(r: &Rejection) -> Self {
        Self {
            source_ref: r.source_ref.clone(),
            title: r.title.clone(),
            reason: r.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub source_ref: SourceRef,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub entities_total: usize,
    pub entities_skipped_fresh: usize,
    pub entities_succeeded: usize,
    pub entities_failed: usize,
    pub entities_cancelled: usize,
    pub failures: BoundedSample<EntityFailure>,

    pub listings_seen: usize,
    pub filtered_out: usize,
    pub filtered_sample: BoundedSample<FilteredTitle>,
    pub kept: usize,
    pub detail_fetches: usize,
    pub fetch_cost_avoided: f64,

    pub rejected: usize,
    pub rejected_sample: BoundedSample<RejectedRecord>,

    pub records_created: usize,
    pub records_updated: usize,
    pub persist_failures: usize,
    pub marked_missing: usize,

    pub classified: usize,
    pub classification_failures: usize,
    pub classification_cost: f64,
}

impl RunStats {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, sample_size: usize) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            entities_total: 0,
            entities_skipped_fresh: 0,
            entities_succeeded: 0,
            entities_failed: 0,
            entities_cancelled: 0,
            failures: BoundedSample::new(sample_size),
            listings_seen: 0,
            filtered_out: 0,
            filtered_sample: BoundedSample::new(sample_size),
            kept: 0,
            detail_fetches: 0,
            fetch_cost_avoided: 0.0,
            rejected: 0,
            rejected_sample: BoundedSample::new(sample_size),
            records_created: 0,
            records_updated: 0,
            persist_failures: 0,
            marked_missing: 0,
            classified: 0,
            classification_failures: 0,
            classification_cost: 0.0,
        }
    }

    pub fn record_failure(&mut self, source_ref: SourceRef, error: impl Into<String>) {
        self.entities_failed += 1;
        self.failures.push(EntityFailure {
            source_ref,
            error: error.into(),
        });
    }

    pub fn record_rejections(&mut self, rejections: &[Rejection]) {
        self.rejected += rejections.len();
        for r in rejections {
            self.rejected_sample.push(r.into());
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("## Ingest run {}\n", self.run_id));
        out.push_str(&format!("- Started: {}\n", self.started_at.to_rfc3339()));
        if let Some(secs) = self.duration_secs() {
            out.push_str(&format!("- Duration: {:.1}s\n", secs));
        }

        out.push_str("\n### Entities\n");
        out.push_str(&format!(
            "- Total: {}\n- Skipped (fresh): {}\n- Succeeded: {}\n- Failed: {}\n- Cancelled: {}\n",
            self.entities_total,
            self.entities_skipped_fresh,
            self.entities_succeeded,
            self.entities_failed,
            self.entities_cancelled
        ));

        out.push_str("\n### Listings\n");
        out.push_str(&format!(
            "- Seen: {}\n- Filtered out: {} ({:.1}%)\n- Kept: {}\n- Detail fetches: {}\n- Fetch cost avoided: {:.2}\n",
            self.listings_seen,
            self.filtered_out,
            percent(self.filtered_out, self.listings_seen),
            self.kept,
            self.detail_fetches,
            self.fetch_cost_avoided
        ));

        out.push_str("\n### Records\n");
        out.push_str(&format!(
            "- Created: {}\n- Updated: {}\n- Persist failures: {}\n- Marked missing: {}\n- Rejected: {}\n",
            self.records_created,
            self.records_updated,
            self.persist_failures,
            self.marked_missing,
            self.rejected
        ));

        if self.classified + self.classification_failures > 0 {
            out.push_str("\n### Classification\n");
            out.push_str(&format!(
                "- Classified: {}\n- Failures: {}\n- Cost: {:.4}\n",
                self.classified, self.classification_failures, self.classification_cost
            ));
        }

        if !self.failures.items().is_empty() {
            out.push_str("\n### Failed entities\n");
            for f in self.failures.items() {
                out.push_str(&format!("- {}: {}\n", f.source_ref, f.error));
            }
        }

        if !self.filtered_sample.items().is_empty() {
            out.push_str(&format!(
                "\n### Filtered titles (sample {}/{})\n",
                self.filtered_sample.items().len(),
                self.filtered_sample.total()
            ));
            let by_reason = self
                .filtered_sample
                .items()
                .iter()
                .into_group_map_by(|f| f.reason.as_str());
            for (reason, titles) in by_reason.into_iter().sorted_by_key(|(r, _)| *r) {
                out.push_str(&format!(
                    "- {}: {}\n",
                    reason,
                    titles.iter().map(|f| f.title.as_str()).join(" | ")
                ));
            }
        }

        if !self.rejected_sample.items().is_empty() {
            out.push_str("\n### Rejected postings (sample)\n");
            for r in self.rejected_sample.items() {
                out.push_str(&format!("- {} {:?}: {}\n", r.source_ref, r.title, r.reason));
            }
        }

        out
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_bounded() {
        let mut s = BoundedSample::new(2);
        for i in 0..5 {
            s.push(i);
        }
        assert_eq!(s.items(), &[0, 1]);
        assert_eq!(s.total(), 5);
    }

    #[test]
    fn markdown_mentions_counts_and_samples() {
        let mut stats = RunStats::new(Uuid::nil(), Utc::now(), 10);
        stats.listings_seen = 4;
        stats.filtered_out = 1;
        stats.kept = 3;
        stats.filtered_sample.push(FilteredTitle::new(
            SourceRef::new("lever", "acme"),
            "Account Executive",
            Decision::TitleMismatch,
        ));
        stats.record_failure(SourceRef::new("greenhouse", "initech"), "source failure: 404");

        let md = stats.render_markdown();
        assert!(md.contains("- Seen: 4"));
        assert!(md.contains("- Filtered out: 1 (25.0%)"));
        assert!(md.contains("- title: Account Executive"));
        assert!(md.contains("greenhouse/initech: source failure: 404"));
        assert!(!md.contains("### Classification"));
    }

    #[test]
    fn json_round_trip() {
        let stats = RunStats::new(Uuid::new_v4(), Utc::now(), 3);
        let json = serde_json::to_string(&stats).unwrap();
        let back: RunStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
