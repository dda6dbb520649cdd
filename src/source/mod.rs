//! Source adapters: where raw postings come from.

pub mod file;
pub mod greenhouse;
pub mod lever;

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::config::{SourceConfig, SourceKind};
use crate::error::SourceError;
use crate::model::{RawPosting, SourceRef};

pub use file::FileSource;
pub use greenhouse::GreenhouseSource;
pub use lever::LeverSource;

/// One source-native entity (a company board) and its display employer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub employer: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub postings: Vec<RawPosting>,
    pub has_more: bool,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> &str;

    /// Listing stubs for one page, zero-based. Stubs may already carry a
    /// description when the listing endpoint includes one.
    async fn list_page(&self, entity: &Entity, page: u32) -> Result<ListingPage, SourceError>;

    /// Full description for a stub that came without one.
    async fn fetch_description(&self, stub: &RawPosting) -> Result<String, SourceError>;

    fn source_ref(&self, entity: &Entity) -> SourceRef {
        SourceRef::new(self.id(), entity.id.clone())
    }
}

/// A configured source with the entities it should scrape.
pub struct SourceJob {
    pub adapter: Arc<dyn SourceAdapter>,
    pub entities: Vec<Entity>,
}

pub fn build(config: &SourceConfig, client: &reqwest::Client) -> Result<SourceJob, SourceError> {
    let adapter: Arc<dyn SourceAdapter> = match config.kind {
        SourceKind::Greenhouse => Arc::new(GreenhouseSource::new(
            &config.id,
            client.clone(),
            config.base_url.as_deref(),
        )),
        SourceKind::Lever => Arc::new(LeverSource::new(
            &config.id,
            client.clone(),
            config.base_url.as_deref(),
        )),
        SourceKind::File => {
            let path = config.path.as_ref().ok_or_else(|| {
                SourceError::Fatal(format!("file source '{}' has no path", config.id))
            })?;
            Arc::new(FileSource::new(&config.id, path))
        }
    };
    let entities = config
        .entities
        .iter()
        .map(|e| Entity {
            id: e.id.clone(),
            employer: e.employer.clone(),
        })
        .collect();
    Ok(SourceJob { adapter, entities })
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6])\b[^>]*>").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());

/// Board HTML to plain text. Entities are decoded first because some
/// boards double-escape their markup.
pub fn html_to_text(html: &str) -> String {
    let decoded = decode_entities(html);
    let with_breaks = BLOCK_RE.replace_all(&decoded, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, "");
    let text = decode_entities(&stripped);
    let text = SPACES_RE.replace_all(&text, " ");
    let text = BLANKS_RE.replace_all(&text, "\n\n");
    text.lines().map(str::trim).collect::<Vec<_>>().join("\n").trim().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Map a non-success HTTP status to the adapter error taxonomy.
pub(crate) fn status_error(status: reqwest::StatusCode, what: &str) -> SourceError {
    if status.as_u16() == 429 || status.is_server_error() {
        SourceError::Transient(format!("{what}: HTTP {status}"))
    } else {
        SourceError::Fatal(format!("{what}: HTTP {status}"))
    }
}
