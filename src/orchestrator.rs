//! One ingest run: stale entities → listing → gate → detail fetch →
//! normalize → merge → persist → record attempts.
//!
//! Entities run concurrently on a bounded pool; within an entity the stages
//! are strictly sequential. Each worker reports one complete outcome over a
//! channel, and merge runs once over everything collected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::Classifier;
use crate::config::Settings;
use crate::filter::{Decision, RelevanceGate};
use crate::location;
use crate::merge::MergeEngine;
use crate::model::{CanonicalJobRecord, IdentityKey, NormalizedPosting, SourceRef};
use crate::retry::{fetch_with_retry, store_with_retry, RetryPolicy};
use crate::source::{Entity, SourceAdapter, SourceJob};
use crate::stats::{FilteredTitle, RunStats};
use crate::store::JobStore;
use crate::tracker::ResumeTracker;

const MAX_PAGES: u32 = 100;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub worker_pool_size: usize,
    pub freshness_window: Duration,
    pub fetch_policy: RetryPolicy,
    pub store_policy: RetryPolicy,
    pub audit_sample_size: usize,
    pub detail_fetch_cost: f64,
    pub show_progress: bool,
    /// Scrape every entity regardless of freshness.
    pub force: bool,
    pub taxonomy: String,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            worker_pool_size: settings.worker_pool_size.max(1),
            freshness_window: settings.freshness_window(),
            fetch_policy: settings.retry_policy(),
            store_policy: settings.store_retry_policy(),
            audit_sample_size: settings.audit_sample_size,
            detail_fetch_cost: settings.detail_fetch_cost,
            show_progress: settings.show_progress,
            force: false,
            taxonomy: settings
                .classifier
                .as_ref()
                .map(|c| c.taxonomy.clone())
                .unwrap_or_default(),
        }
    }
}

// ── Per-entity work ──

#[derive(Debug)]
enum EntityResult {
    Completed(Vec<NormalizedPosting>),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct EntityOutcome {
    source_ref: SourceRef,
    listings_seen: usize,
    filtered: Vec<FilteredTitle>,
    /// Filtered stubs that would have needed a detail fetch.
    fetches_avoided: usize,
    detail_fetches: usize,
    result: EntityResult,
}

impl EntityOutcome {
    fn new(source_ref: SourceRef) -> Self {
        Self {
            source_ref,
            listings_seen: 0,
            filtered: Vec::new(),
            fetches_avoided: 0,
            detail_fetches: 0,
            result: EntityResult::Cancelled,
        }
    }

    fn finish(mut self, result: EntityResult) -> Self {
        self.result = result;
        self
    }
}

struct EntityContext {
    gate: Arc<RelevanceGate>,
    policy: RetryPolicy,
    now: DateTime<Utc>,
}

async fn scrape_entity(
    ctx: &EntityContext,
    adapter: Arc<dyn SourceAdapter>,
    entity: Entity,
    cancel: &CancellationToken,
) -> EntityOutcome {
    let source_ref = adapter.source_ref(&entity);
    let mut outcome = EntityOutcome::new(source_ref.clone());

    // Listing
    let mut stubs = Vec::new();
    for page in 0..MAX_PAGES {
        if cancel.is_cancelled() {
            return outcome.finish(EntityResult::Cancelled);
        }
        let what = format!("{source_ref} listing page {page}");
        let fetched = fetch_with_retry(&ctx.policy, &what, || adapter.list_page(&entity, page)).await;
        match fetched {
            Ok(listing) => {
                stubs.extend(listing.postings);
                if !listing.has_more {
                    break;
                }
                if page + 1 == MAX_PAGES {
                    warn!(source = %source_ref, "Stopped paging at {} pages", MAX_PAGES);
                }
            }
            Err(e) => return outcome.finish(EntityResult::Failed(e.to_string())),
        }
    }
    outcome.listings_seen = stubs.len();

    // Gate on listing-level fields only
    if cancel.is_cancelled() {
        return outcome.finish(EntityResult::Cancelled);
    }
    let mut survivors = Vec::new();
    for mut stub in stubs {
        stub.seen_at = ctx.now;
        let locations = location::normalize(&stub.location_raw, stub.description.as_deref());
        match ctx.gate.evaluate(&stub.title, &locations) {
            Decision::Keep => survivors.push(stub),
            decision => {
                if stub.description.is_none() {
                    outcome.fetches_avoided += 1;
                }
                outcome
                    .filtered
                    .push(FilteredTitle::new(source_ref.clone(), &stub.title, decision));
            }
        }
    }
    debug!(
        source = %source_ref,
        seen = outcome.listings_seen,
        kept = survivors.len(),
        "Relevance gate"
    );

    // Detail fetch for survivors, then normalize with the full text
    let mut kept = Vec::with_capacity(survivors.len());
    for mut stub in survivors {
        if stub.description.is_none() {
            if cancel.is_cancelled() {
                return outcome.finish(EntityResult::Cancelled);
            }
            let what = format!("{source_ref} detail {}", stub.url);
            let fetched =
                fetch_with_retry(&ctx.policy, &what, || adapter.fetch_description(&stub)).await;
            match fetched {
                Ok(text) => {
                    outcome.detail_fetches += 1;
                    stub.description = (!text.trim().is_empty()).then_some(text);
                }
                Err(e) => {
                    return outcome.finish(EntityResult::Failed(format!(
                        "detail fetch for {}: {}",
                        stub.url, e
                    )))
                }
            }
        }
        kept.push(location::normalize_posting(stub));
    }

    outcome.finish(EntityResult::Completed(kept))
}

// ── Run ──

pub struct Orchestrator {
    jobs: Vec<SourceJob>,
    store: Arc<dyn JobStore>,
    gate: Arc<RelevanceGate>,
    merge: MergeEngine,
    tracker: ResumeTracker,
    classifier: Option<Arc<dyn Classifier>>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        jobs: Vec<SourceJob>,
        store: Arc<dyn JobStore>,
        gate: RelevanceGate,
        merge: MergeEngine,
        options: RunOptions,
    ) -> Self {
        Self {
            jobs,
            tracker: ResumeTracker::new(Arc::clone(&store)),
            store,
            gate: Arc::new(gate),
            merge,
            classifier: None,
            options,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub async fn run(&self, cancel: &CancellationToken) -> RunStats {
        self.run_at(Utc::now(), cancel).await
    }

    /// Run with an explicit clock. Nothing here aborts the whole run: each
    /// entity ends up succeeded, failed, cancelled or skipped.
    pub async fn run_at(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> RunStats {
        let t0 = Instant::now();
        let opts = &self.options;
        let mut stats = RunStats::new(Uuid::new_v4(), now, opts.audit_sample_size);
        info!(run_id = %stats.run_id, "Starting ingest run");

        let planned = self.plan(now, &mut stats).await;
        let mut outcomes = self.scrape_all(planned, now, cancel).await;
        outcomes.sort_by(|a, b| a.source_ref.cmp(&b.source_ref));

        let mut completed = Vec::new();
        let mut batch = Vec::new();
        for outcome in outcomes {
            stats.listings_seen += outcome.listings_seen;
            stats.filtered_out += outcome.filtered.len();
            for f in outcome.filtered {
                stats.filtered_sample.push(f);
            }
            stats.detail_fetches += outcome.detail_fetches;
            stats.fetch_cost_avoided += outcome.fetches_avoided as f64 * opts.detail_fetch_cost;

            let source_ref = outcome.source_ref;
            match outcome.result {
                EntityResult::Completed(postings) => {
                    stats.kept += postings.len();
                    batch.extend(postings);
                    completed.push(source_ref);
                }
                EntityResult::Failed(error) => {
                    warn!(source = %source_ref, error = %error, "Entity failed");
                    self.record_attempt(&source_ref, false, Some(error.as_str()), now).await;
                    stats.record_failure(source_ref, error);
                }
                EntityResult::Cancelled => {
                    debug!(source = %source_ref, "Entity cancelled");
                    stats.entities_cancelled += 1;
                }
            }
        }

        // Merge once over every entity's output
        let grouped = self.merge.group(batch);
        stats.record_rejections(&grouped.rejections);
        debug!(keys = grouped.len(), rejected = grouped.rejections.len(), "Grouped batch");

        let mut produced: HashMap<SourceRef, HashSet<IdentityKey>> = HashMap::new();
        for (key, postings) in &grouped.groups {
            for np in postings {
                produced
                    .entry(np.posting.source_ref.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }
        let seen_this_run: HashSet<IdentityKey> = grouped.keys().cloned().collect();

        let mut priors = HashMap::new();
        let mut failed_keys = HashSet::new();
        for key in grouped.keys() {
            let loaded = store_with_retry(&opts.store_policy, "load canonical record", || {
                self.store.get_canonical_record(key)
            })
            .await;
            match loaded {
                Ok(Some(prior)) => {
                    priors.insert(key.clone(), prior);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key.short(), error = %e, "Could not load prior record");
                    failed_keys.insert(key.clone());
                }
            }
        }

        let records = self.merge.resolve_all(&grouped, &priors);
        let to_classify = self
            .persist(records, &priors, &mut failed_keys, &mut stats)
            .await;

        for source_ref in completed {
            let keys = produced.remove(&source_ref).unwrap_or_default();
            let failed = keys.iter().filter(|k| failed_keys.contains(*k)).count();
            if failed > 0 {
                let error = format!("{failed} record(s) failed to persist");
                self.record_attempt(&source_ref, false, Some(error.as_str()), now).await;
                stats.record_failure(source_ref, error);
                continue;
            }

            stats.entities_succeeded += 1;
            self.record_attempt(&source_ref, true, None, now).await;
            match self
                .tracker
                .mark_disappeared(&source_ref, &seen_this_run, now)
                .await
            {
                Ok(n) => stats.marked_missing += n,
                Err(e) => warn!(source = %source_ref, error = %e, "Disappearance check failed"),
            }
        }

        self.classify(to_classify, cancel, &mut stats).await;

        let elapsed = Duration::from_std(t0.elapsed()).unwrap_or_else(|_| Duration::zero());
        stats.finished_at = Some(now + elapsed);
        if let Err(e) =
            store_with_retry(&opts.store_policy, "save run", || self.store.save_run(&stats)).await
        {
            warn!(error = %e, "Could not save run stats");
        }

        info!(
            run_id = %stats.run_id,
            succeeded = stats.entities_succeeded,
            failed = stats.entities_failed,
            skipped = stats.entities_skipped_fresh,
            cancelled = stats.entities_cancelled,
            kept = stats.kept,
            created = stats.records_created,
            updated = stats.records_updated,
            "Ingest run finished"
        );
        stats
    }

    /// Entities due for scraping. A store error reading freshness counts as stale.
    async fn plan(
        &self,
        now: DateTime<Utc>,
        stats: &mut RunStats,
    ) -> Vec<(Arc<dyn SourceAdapter>, Entity)> {
        let mut planned = Vec::new();
        for job in &self.jobs {
            for entity in &job.entities {
                stats.entities_total += 1;
                let source_ref = job.adapter.source_ref(entity);
                if !self.options.force {
                    match self
                        .tracker
                        .is_stale(&source_ref, self.options.freshness_window, now)
                        .await
                    {
                        Ok(false) => {
                            debug!(source = %source_ref, "Fresh, skipping");
                            stats.entities_skipped_fresh += 1;
                            continue;
                        }
                        Ok(true) => {}
                        Err(e) => {
                            warn!(source = %source_ref, error = %e, "Freshness unknown, scraping")
                        }
                    }
                }
                planned.push((Arc::clone(&job.adapter), entity.clone()));
            }
        }
        planned
    }

    async fn scrape_all(
        &self,
        planned: Vec<(Arc<dyn SourceAdapter>, Entity)>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Vec<EntityOutcome> {
        let ctx = Arc::new(EntityContext {
            gate: Arc::clone(&self.gate),
            policy: self.options.fetch_policy,
            now,
        });
        let pool = self.options.worker_pool_size.max(1);
        let semaphore = Arc::new(Semaphore::new(pool));

        let pb = if self.options.show_progress {
            ProgressBar::new(planned.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }

        // Workers send one outcome each; this loop collects them
        let (tx, mut rx) = mpsc::channel::<EntityOutcome>(pool * 2);
        for (adapter, entity) in planned {
            let ctx = Arc::clone(&ctx);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return;
                };
                let outcome = scrape_entity(&ctx, adapter, entity, &cancel).await;
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            pb.set_message(outcome.source_ref.to_string());
            pb.inc(1);
            outcomes.push(outcome);
        }
        pb.finish_and_clear();
        outcomes
    }

    /// Upsert every record with per-record retry. Returns the records whose
    /// description is new this run, for classification.
    async fn persist(
        &self,
        records: Vec<CanonicalJobRecord>,
        priors: &HashMap<IdentityKey, CanonicalJobRecord>,
        failed_keys: &mut HashSet<IdentityKey>,
        stats: &mut RunStats,
    ) -> Vec<CanonicalJobRecord> {
        let mut to_classify = Vec::new();
        for record in records {
            if failed_keys.contains(&record.key) {
                stats.persist_failures += 1;
                continue;
            }
            let result = store_with_retry(&self.options.store_policy, "upsert canonical record", || {
                self.store.upsert_canonical_record(&record)
            })
            .await;
            match result {
                Ok(()) => {
                    let prior = priors.get(&record.key);
                    if prior.is_some() {
                        stats.records_updated += 1;
                    } else {
                        stats.records_created += 1;
                    }
                    if prior.map_or(true, |p| p.description != record.description) {
                        to_classify.push(record);
                    }
                }
                Err(e) => {
                    warn!(key = %record.key.short(), error = %e, "Giving up on record");
                    stats.persist_failures += 1;
                    failed_keys.insert(record.key);
                }
            }
        }
        to_classify
    }

    async fn classify(
        &self,
        records: Vec<CanonicalJobRecord>,
        cancel: &CancellationToken,
        stats: &mut RunStats,
    ) {
        let Some(classifier) = &self.classifier else {
            return;
        };
        let timeout = self.options.fetch_policy.timeout;
        let taxonomy = self.options.taxonomy.as_str();

        for record in records {
            if cancel.is_cancelled() {
                break;
            }
            let Some(description) = record.description.as_deref() else {
                debug!(key = %record.key.short(), "No description, skipping classification");
                continue;
            };
            let call = classifier.classify(&record.title, description, taxonomy);
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(classification)) => {
                    stats.classified += 1;
                    stats.classification_cost += classification.usage.cost;
                    let saved = store_with_retry(&self.options.store_policy, "save classification", || {
                        self.store
                            .save_classification(&record.key, taxonomy, &classification)
                    })
                    .await;
                    if let Err(e) = saved {
                        warn!(key = %record.key.short(), error = %e, "Could not save classification");
                    }
                }
                Ok(Err(e)) => {
                    stats.classification_failures += 1;
                    warn!(key = %record.key.short(), error = %e, "Classification failed");
                }
                Err(_) => {
                    stats.classification_failures += 1;
                    warn!(key = %record.key.short(), "Classification timed out");
                }
            }
        }
    }

    async fn record_attempt(
        &self,
        source_ref: &SourceRef,
        succeeded: bool,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let result = store_with_retry(&self.options.store_policy, "record attempt", || {
            self.tracker.record_attempt(source_ref, succeeded, error, now)
        })
        .await;
        if let Err(e) = result {
            warn!(source = %source_ref, error = %e, "Could not record attempt");
        }
    }
}
