use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{JobStore, StoreCounts};
use crate::classify::Classification;
use crate::error::StoreError;
use crate::model::{CanonicalJobRecord, IdentityKey, ScrapeState, SourceRef, UrlStatus};
use crate::stats::RunStats;

#[derive(Default)]
struct Inner {
    records: BTreeMap<IdentityKey, CanonicalJobRecord>,
    states: BTreeMap<SourceRef, ScrapeState>,
    runs: Vec<RunStats>,
    classifications: BTreeMap<IdentityKey, (String, Classification)>,
    /// Remaining forced failures per key, for exercising retry paths.
    failing_upserts: HashMap<IdentityKey, u32>,
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Make the next `times` upserts of `key` fail.
    pub fn fail_upserts(&self, key: &IdentityKey, times: u32) -> Result<(), StoreError> {
        self.lock()?.failing_upserts.insert(key.clone(), times);
        Ok(())
    }

    pub fn classification(&self, key: &IdentityKey) -> Result<Option<Classification>, StoreError> {
        Ok(self.lock()?.classifications.get(key).map(|(_, c)| c.clone()))
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_canonical_record(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if let Some(remaining) = inner.failing_upserts.get_mut(&record.key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::InvalidValue {
                    column: "key",
                    value: format!("forced failure for {}", record.key.short()),
                });
            }
        }
        inner.records.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn get_canonical_record(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<CanonicalJobRecord>, StoreError> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    async fn upsert_scrape_state(&self, state: &ScrapeState) -> Result<(), StoreError> {
        self.lock()?
            .states
            .insert(state.source_ref.clone(), state.clone());
        Ok(())
    }

    async fn get_scrape_state(
        &self,
        source_ref: &SourceRef,
    ) -> Result<Option<ScrapeState>, StoreError> {
        Ok(self.lock()?.states.get(source_ref).cloned())
    }

    async fn records_for_entity(
        &self,
        source_ref: &SourceRef,
    ) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        Ok(self
            .lock()?
            .records
            .values()
            .filter(|r| r.sources.contains(source_ref))
            .cloned()
            .collect())
    }

    async fn save_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.runs.retain(|r| r.run_id != stats.run_id);
        inner.runs.push(stats.clone());
        Ok(())
    }

    async fn last_run(&self) -> Result<Option<RunStats>, StoreError> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn save_classification(
        &self,
        key: &IdentityKey,
        taxonomy: &str,
        classification: &Classification,
    ) -> Result<(), StoreError> {
        self.lock()?
            .classifications
            .insert(key.clone(), (taxonomy.to_string(), classification.clone()));
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let inner = self.lock()?;
        let live = inner
            .records
            .values()
            .filter(|r| r.url_status == UrlStatus::Live)
            .count();
        Ok(StoreCounts {
            records: inner.records.len(),
            live,
            missing: inner.records.len() - live,
            entities: inner.states.len(),
            failing_entities: inner
                .states
                .values()
                .filter(|s| s.consecutive_failures > 0)
                .count(),
            runs: inner.runs.len(),
            classifications: inner.classifications.len(),
        })
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        let inner = self.lock()?;
        let mut records: Vec<_> = inner.records.values().cloned().collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.key.cmp(&b.key)));
        records.truncate(limit);
        Ok(records)
    }
}
