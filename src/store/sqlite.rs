use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{JobStore, StoreCounts};
use crate::classify::Classification;
use crate::error::StoreError;
use crate::model::{CanonicalJobRecord, IdentityKey, ScrapeState, SourceRef, UrlStatus};
use crate::stats::RunStats;

const RECORD_COLUMNS: &str = "key, employer, title, locations, description, description_source, \
     url, sources, first_seen, last_seen, posted_at, url_status, missing_since";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS canonical_records (
            key                TEXT PRIMARY KEY,
            employer           TEXT NOT NULL,
            title              TEXT NOT NULL,
            locations          TEXT NOT NULL,
            description        TEXT,
            description_source TEXT,
            url                TEXT NOT NULL,
            sources            TEXT NOT NULL,
            first_seen         TEXT NOT NULL,
            last_seen          TEXT NOT NULL,
            posted_at          TEXT,
            url_status         TEXT NOT NULL CHECK(url_status IN ('live','missing')),
            missing_since      TEXT,
            updated_at         TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_records_last_seen ON canonical_records(last_seen);

        -- One row per contributing (source, entity), for disappearance scans
        CREATE TABLE IF NOT EXISTS record_sources (
            key     TEXT NOT NULL REFERENCES canonical_records(key) ON DELETE CASCADE,
            source  TEXT NOT NULL,
            entity  TEXT NOT NULL,
            PRIMARY KEY (key, source, entity)
        );
        CREATE INDEX IF NOT EXISTS idx_record_sources_entity ON record_sources(source, entity);

        CREATE TABLE IF NOT EXISTS scrape_state (
            source               TEXT NOT NULL,
            entity               TEXT NOT NULL,
            last_attempt         TEXT,
            last_success         TEXT,
            last_error           TEXT,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (source, entity)
        );

        CREATE TABLE IF NOT EXISTS runs (
            run_id      TEXT PRIMARY KEY,
            started_at  TEXT NOT NULL,
            finished_at TEXT,
            stats       TEXT NOT NULL,
            markdown    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS classifications (
            key           TEXT PRIMARY KEY REFERENCES canonical_records(key),
            taxonomy      TEXT NOT NULL,
            labels        TEXT NOT NULL,
            input_tokens  INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cost          REAL NOT NULL,
            classified_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

/// Columns as stored; JSON and enum columns are decoded afterwards so codec
/// errors surface as [`StoreError`] rather than inside the row mapper.
struct RecordRow {
    key: String,
    employer: String,
    title: String,
    locations: String,
    description: Option<String>,
    description_source: Option<String>,
    url: String,
    sources: String,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    url_status: String,
    missing_since: Option<DateTime<Utc>>,
}

impl RecordRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            employer: row.get(1)?,
            title: row.get(2)?,
            locations: row.get(3)?,
            description: row.get(4)?,
            description_source: row.get(5)?,
            url: row.get(6)?,
            sources: row.get(7)?,
            first_seen: row.get(8)?,
            last_seen: row.get(9)?,
            posted_at: row.get(10)?,
            url_status: row.get(11)?,
            missing_since: row.get(12)?,
        })
    }

    fn decode(self) -> Result<CanonicalJobRecord, StoreError> {
        let url_status =
            UrlStatus::parse(&self.url_status).ok_or_else(|| StoreError::InvalidValue {
                column: "url_status",
                value: self.url_status.clone(),
            })?;
        Ok(CanonicalJobRecord {
            key: IdentityKey(self.key),
            employer: self.employer,
            title: self.title,
            locations: serde_json::from_str(&self.locations)?,
            description: self.description,
            description_source: self.description_source,
            url: self.url,
            sources: serde_json::from_str(&self.sources)?,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            posted_at: self.posted_at,
            url_status,
            missing_since: self.missing_since,
        })
    }
}

fn decode_all(rows: Vec<RecordRow>) -> Result<Vec<CanonicalJobRecord>, StoreError> {
    rows.into_iter().map(RecordRow::decode).collect()
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn upsert_canonical_record(&self, record: &CanonicalJobRecord) -> Result<(), StoreError> {
        let locations = serde_json::to_string(&record.locations)?;
        let sources = serde_json::to_string(&record.sources)?;

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO canonical_records (key, employer, title, locations, description,
                description_source, url, sources, first_seen, last_seen, posted_at,
                url_status, missing_since)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(key) DO UPDATE SET
                employer = excluded.employer,
                title = excluded.title,
                locations = excluded.locations,
                description = excluded.description,
                description_source = excluded.description_source,
                url = excluded.url,
                sources = excluded.sources,
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen,
                posted_at = excluded.posted_at,
                url_status = excluded.url_status,
                missing_since = excluded.missing_since,
                updated_at = datetime('now')",
            params![
                record.key.as_str(),
                record.employer,
                record.title,
                locations,
                record.description,
                record.description_source,
                record.url,
                sources,
                record.first_seen,
                record.last_seen,
                record.posted_at,
                record.url_status.as_str(),
                record.missing_since,
            ],
        )?;
        tx.execute(
            "DELETE FROM record_sources WHERE key = ?1",
            params![record.key.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO record_sources (key, source, entity) VALUES (?1, ?2, ?3)",
            )?;
            for s in &record.sources {
                stmt.execute(params![record.key.as_str(), s.source, s.entity])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_canonical_record(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<CanonicalJobRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM canonical_records WHERE key = ?1"),
                params![key.as_str()],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::decode).transpose()
    }

    async fn upsert_scrape_state(&self, state: &ScrapeState) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO scrape_state
                (source, entity, last_attempt, last_success, last_error, consecutive_failures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                state.source_ref.source,
                state.source_ref.entity,
                state.last_attempt,
                state.last_success,
                state.last_error,
                state.consecutive_failures,
            ],
        )?;
        Ok(())
    }

    async fn get_scrape_state(
        &self,
        source_ref: &SourceRef,
    ) -> Result<Option<ScrapeState>, StoreError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT last_attempt, last_success, last_error, consecutive_failures
                 FROM scrape_state WHERE source = ?1 AND entity = ?2",
                params![source_ref.source, source_ref.entity],
                |row| {
                    Ok(ScrapeState {
                        source_ref: source_ref.clone(),
                        last_attempt: row.get(0)?,
                        last_success: row.get(1)?,
                        last_error: row.get(2)?,
                        consecutive_failures: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    async fn records_for_entity(
        &self,
        source_ref: &SourceRef,
    ) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM canonical_records
             WHERE key IN (SELECT key FROM record_sources WHERE source = ?1 AND entity = ?2)
             ORDER BY key"
        ))?;
        let rows = stmt
            .query_map(
                params![source_ref.source, source_ref.entity],
                RecordRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        decode_all(rows)
    }

    async fn save_run(&self, stats: &RunStats) -> Result<(), StoreError> {
        let json = serde_json::to_string(stats)?;
        let markdown = stats.render_markdown();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO runs (run_id, started_at, finished_at, stats, markdown)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stats.run_id.to_string(),
                stats.started_at,
                stats.finished_at,
                json,
                markdown
            ],
        )?;
        Ok(())
    }

    async fn last_run(&self) -> Result<Option<RunStats>, StoreError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT stats FROM runs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    async fn save_classification(
        &self,
        key: &IdentityKey,
        taxonomy: &str,
        classification: &Classification,
    ) -> Result<(), StoreError> {
        let labels = serde_json::to_string(&classification.labels)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO classifications
                (key, taxonomy, labels, input_tokens, output_tokens, cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.as_str(),
                taxonomy,
                labels,
                classification.usage.input_tokens as i64,
                classification.usage.output_tokens as i64,
                classification.usage.cost,
            ],
        )?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<usize, StoreError> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n as usize)
        };
        Ok(StoreCounts {
            records: count("SELECT COUNT(*) FROM canonical_records")?,
            live: count("SELECT COUNT(*) FROM canonical_records WHERE url_status = 'live'")?,
            missing: count("SELECT COUNT(*) FROM canonical_records WHERE url_status = 'missing'")?,
            entities: count("SELECT COUNT(*) FROM scrape_state")?,
            failing_entities: count(
                "SELECT COUNT(*) FROM scrape_state WHERE consecutive_failures > 0",
            )?,
            runs: count("SELECT COUNT(*) FROM runs")?,
            classifications: count("SELECT COUNT(*) FROM classifications")?,
        })
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<CanonicalJobRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM canonical_records
             ORDER BY last_seen DESC, key LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], RecordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        decode_all(rows)
    }
}
