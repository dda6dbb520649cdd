use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::MacroRegion;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "ingest.toml";
const ENV_PREFIX: &str = "INGEST";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_freshness_window_hours")]
    pub freshness_window_hours: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_store_retries")]
    pub store_retries: u32,
    /// Cap on the rejected-title and rejected-record audit samples.
    #[serde(default = "default_audit_sample_size")]
    pub audit_sample_size: usize,
    /// Cost units charged per full-detail fetch; drives the "avoided" figure.
    #[serde(default = "default_detail_fetch_cost")]
    pub detail_fetch_cost: f64,
    #[serde(default = "default_true")]
    pub show_progress: bool,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceConfig {
    /// Role-family regexes, matched case-insensitively against titles.
    #[serde(default = "default_title_patterns")]
    pub title_patterns: Vec<String>,
    #[serde(default)]
    pub target_cities: Vec<String>,
    #[serde(default = "default_target_countries")]
    pub target_countries: Vec<String>,
    #[serde(default)]
    pub target_regions: Vec<MacroRegion>,
    #[serde(default = "default_true")]
    pub accept_global_remote: bool,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            title_patterns: default_title_patterns(),
            target_cities: Vec::new(),
            target_countries: default_target_countries(),
            target_regions: Vec::new(),
            accept_global_remote: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeConfig {
    /// Source ids, highest fidelity first. Unlisted sources rank last.
    #[serde(default)]
    pub source_priority: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: String,
    #[serde(default = "default_taxonomy")]
    pub taxonomy: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Greenhouse,
    Lever,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// Directory of `<entity>.json` files, for `kind = "file"`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Overrides the public API host (tests, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    pub employer: String,
}

impl Settings {
    /// Optional TOML file layered under `INGEST__*` environment variables.
    /// An explicitly given path must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let settings: Settings = Config::builder()
            .add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(path.is_some()),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from an in-memory TOML string (tests, embedded defaults).
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid {
                key: "worker_pool_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.freshness_window_hours == 0 {
            return Err(ConfigError::Invalid {
                key: "freshness_window_hours",
                reason: "must be at least 1".into(),
            });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "fetch_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid {
                    key: "sources",
                    reason: format!("duplicate source id '{}'", source.id),
                });
            }
            if source.kind == SourceKind::File && source.path.is_none() {
                return Err(ConfigError::Invalid {
                    key: "sources.path",
                    reason: format!("file source '{}' needs a path", source.id),
                });
            }
        }
        Ok(())
    }

    pub fn freshness_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.freshness_window_hours as i64)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            timeout: self.fetch_timeout(),
        }
    }

    pub fn store_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.store_retries,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            timeout: self.fetch_timeout(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            worker_pool_size: default_worker_pool_size(),
            freshness_window_hours: default_freshness_window_hours(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            store_retries: default_store_retries(),
            audit_sample_size: default_audit_sample_size(),
            detail_fetch_cost: default_detail_fetch_cost(),
            show_progress: true,
            relevance: RelevanceConfig::default(),
            merge: MergeConfig::default(),
            classifier: None,
            sources: Vec::new(),
        }
    }
}

impl MergeConfig {
    /// Position in `source_priority`; unlisted sources rank after all listed.
    pub fn rank(&self, source: &str) -> usize {
        self.source_priority
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.source_priority.len())
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/jobs.sqlite")
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_freshness_window_hours() -> u64 {
    24
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_store_retries() -> u32 {
    2
}
fn default_audit_sample_size() -> usize {
    50
}
fn default_detail_fetch_cost() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_taxonomy() -> String {
    "default".into()
}
fn default_title_patterns() -> Vec<String> {
    [
        r"\bdata\s+(engineer|scientist|analyst|architect)",
        r"\b(machine learning|ml|ai)\s+engineer",
        r"\banalytics\s+engineer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_target_countries() -> Vec<String> {
    vec!["US".into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_toml() {
        let s = Settings::from_toml("").unwrap();
        assert_eq!(s.worker_pool_size, 4);
        assert_eq!(s.freshness_window(), chrono::Duration::hours(24));
        assert!(s.relevance.accept_global_remote);
        assert!(s.sources.is_empty());
        assert!(s.classifier.is_none());
    }

    #[test]
    fn full_document() {
        let s = Settings::from_toml(
            r#"
            worker_pool_size = 8
            freshness_window_hours = 72

            [relevance]
            title_patterns = ["engineer"]
            target_cities = ["new_york"]
            target_countries = ["US", "CA"]
            target_regions = ["EMEA"]

            [merge]
            source_priority = ["greenhouse", "lever"]

            [[sources]]
            id = "greenhouse"
            kind = "greenhouse"
            entities = [{ id = "stripe", employer = "Stripe" }]

            [[sources]]
            id = "fixtures"
            kind = "file"
            path = "fixtures"
            "#,
        )
        .unwrap();
        assert_eq!(s.worker_pool_size, 8);
        assert_eq!(s.relevance.target_regions, vec![MacroRegion::Emea]);
        assert_eq!(s.sources.len(), 2);
        assert_eq!(s.sources[0].entities[0].employer, "Stripe");
        assert_eq!(s.merge.rank("greenhouse"), 0);
        assert_eq!(s.merge.rank("lever"), 1);
        assert_eq!(s.merge.rank("unknown"), 2);
    }

    #[test]
    fn rejects_zero_pool() {
        let err = Settings::from_toml("worker_pool_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "worker_pool_size", .. }));
    }

    #[test]
    fn file_source_requires_path() {
        let err = Settings::from_toml(
            r#"
            [[sources]]
            id = "f"
            kind = "file"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "sources.path", .. }));
    }

    #[test]
    fn duplicate_source_ids() {
        let err = Settings::from_toml(
            r#"
            [[sources]]
            id = "a"
            kind = "lever"
            [[sources]]
            id = "a"
            kind = "greenhouse"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "sources", .. }));
    }
}
