//! Persistent store contract.
//!
//! Every write is an independent, idempotent upsert keyed by identity key
//! or by (source, entity). No multi-record transaction is assumed.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::classify::Classification;
use crate::error::StoreError;
use crate::model::{CanonicalJobRecord, IdentityKey, ScrapeState, SourceRef};
use crate::stats::RunStats;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub records: usize,
    pub live: usize,
    pub missing: usize,
    pub entities: usize,
    pub failing_entities: usize,
    pub runs: usize,
    pub classifications: usize,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert_canonical_record(&self, record: &CanonicalJobRecord) -> Result<(), StoreError>;

    async fn get_canonical_record(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<CanonicalJobRecord>, StoreError>;

    async fn upsert_scrape_state(&self, state: &ScrapeState) -> Result<(), StoreError>;

    async fn get_scrape_state(&self, source_ref: &SourceRef)
        -> Result<Option<ScrapeState>, StoreError>;

    /// Records whose contributing sources include `source_ref`.
    async fn records_for_entity(
        &self,
        source_ref: &SourceRef,
    ) -> Result<Vec<CanonicalJobRecord>, StoreError>;

    async fn save_run(&self, stats: &RunStats) -> Result<(), StoreError>;

    async fn last_run(&self) -> Result<Option<RunStats>, StoreError>;

    async fn save_classification(
        &self,
        key: &IdentityKey,
        taxonomy: &str,
        classification: &Classification,
    ) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;

    /// Most recently seen first.
    async fn list_records(&self, limit: usize) -> Result<Vec<CanonicalJobRecord>, StoreError>;
}
