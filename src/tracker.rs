//! Incremental resume: per-entity freshness and disappearance.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{IdentityKey, ScrapeState, SourceRef, UrlStatus};
use crate::store::JobStore;

/// Staleness counts successes only. An entity that never succeeded, or
/// whose last success is older than `window`, is stale.
pub fn is_stale_state(state: Option<&ScrapeState>, window: Duration, now: DateTime<Utc>) -> bool {
    match state.and_then(|s| s.last_success) {
        Some(last_success) => now - last_success > window,
        None => true,
    }
}

pub struct ResumeTracker {
    store: Arc<dyn JobStore>,
}

impl ResumeTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn is_stale(
        &self,
        source_ref: &SourceRef,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let state = self.store.get_scrape_state(source_ref).await?;
        Ok(is_stale_state(state.as_ref(), window, now))
    }

    /// Record an attempt. A failure leaves `last_success` untouched.
    pub async fn record_attempt(
        &self,
        source_ref: &SourceRef,
        succeeded: bool,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ScrapeState, StoreError> {
        let mut state = self
            .store
            .get_scrape_state(source_ref)
            .await?
            .unwrap_or_else(|| ScrapeState::new(source_ref.clone()));

        state.last_attempt = Some(now);
        if succeeded {
            state.last_success = Some(now);
            state.last_error = None;
            state.consecutive_failures = 0;
        } else {
            state.last_error = error.map(str::to_string);
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }

        self.store.upsert_scrape_state(&state).await?;
        debug!(
            source = %source_ref.source,
            entity = %source_ref.entity,
            succeeded,
            failures = state.consecutive_failures,
            "Recorded attempt"
        );
        Ok(state)
    }

    /// Mark live records of `source_ref` that this run did not produce as
    /// missing. Returns how many were marked.
    pub async fn mark_disappeared(
        &self,
        source_ref: &SourceRef,
        produced: &HashSet<IdentityKey>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut marked = 0;
        for mut record in self.store.records_for_entity(source_ref).await? {
            if record.url_status != UrlStatus::Live || produced.contains(&record.key) {
                continue;
            }
            record.url_status = UrlStatus::Missing;
            record.missing_since = Some(now);
            self.store.upsert_canonical_record(&record).await?;
            marked += 1;
        }
        if marked > 0 {
            info!(
                source = %source_ref.source,
                entity = %source_ref.entity,
                marked,
                "Marked disappeared postings missing"
            );
        }
        Ok(marked)
    }
}
