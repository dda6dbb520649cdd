use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{Entity, ListingPage, SourceAdapter};
use crate::error::SourceError;
use crate::model::RawPosting;

/// Offline source: `<dir>/<entity>.json` holds a JSON array of postings.
pub struct FileSource {
    id: String,
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FilePosting {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    posted_at: Option<DateTime<Utc>>,
}

impl FileSource {
    pub fn new(id: &str, dir: &Path) -> Self {
        Self {
            id: id.to_string(),
            dir: dir.to_path_buf(),
        }
    }

    async fn read_entity(&self, entity_id: &str) -> Result<Vec<FilePosting>, SourceError> {
        let path = self.dir.join(format!("{entity_id}.json"));
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SourceError::Fatal(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Fatal(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl SourceAdapter for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_page(&self, entity: &Entity, page: u32) -> Result<ListingPage, SourceError> {
        if page > 0 {
            return Ok(ListingPage::default());
        }
        let source_ref = self.source_ref(entity);
        let postings = self
            .read_entity(&entity.id)
            .await?
            .into_iter()
            .map(|p| RawPosting {
                source_ref: source_ref.clone(),
                external_id: p.id,
                employer: entity.employer.clone(),
                title: p.title,
                location_raw: p.location,
                description: p.description,
                url: p.url,
                posted_at: p.posted_at,
                seen_at: Utc::now(),
            })
            .collect();
        Ok(ListingPage {
            postings,
            has_more: false,
        })
    }

    /// A fixture without a description yields empty text; only a posting
    /// that is no longer in the file is an error.
    async fn fetch_description(&self, stub: &RawPosting) -> Result<String, SourceError> {
        let postings = self.read_entity(&stub.source_ref.entity).await?;
        postings
            .into_iter()
            .find(|p| p.url == stub.url && p.id == stub.external_id)
            .map(|p| p.description.unwrap_or_default())
            .ok_or_else(|| SourceError::Fatal(format!("posting not found: {}", stub.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("job_ingest_{}_{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("acme.json"),
            r#"[
                {"id": "1", "title": "Data Engineer", "location": "Remote",
                 "description": "Must be authorized to work in the United States.",
                 "url": "https://acme.example/jobs/1"},
                {"title": "Account Executive", "location": "Austin, TX",
                 "url": "https://acme.example/jobs/2"}
            ]"#,
        )
        .unwrap();
        dir
    }

    fn entity() -> Entity {
        Entity {
            id: "acme".into(),
            employer: "Acme".into(),
        }
    }

    #[tokio::test]
    async fn reads_entity_file() {
        let src = FileSource::new("fixtures", &fixture_dir("list"));
        let page = src.list_page(&entity(), 0).await.unwrap();
        assert_eq!(page.postings.len(), 2);
        assert!(!page.has_more);
        assert_eq!(page.postings[0].employer, "Acme");
        assert_eq!(page.postings[1].external_id, None);
        assert!(src.list_page(&entity(), 1).await.unwrap().postings.is_empty());

        let text = src.fetch_description(&page.postings[0]).await.unwrap();
        assert!(text.contains("United States"));
        assert_eq!(src.fetch_description(&page.postings[1]).await.unwrap(), "");

        let mut gone = page.postings[1].clone();
        gone.url = "https://acme.example/jobs/404".into();
        let err = src.fetch_description(&gone).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let src = FileSource::new("fixtures", &fixture_dir("missing"));
        let err = src
            .list_page(
                &Entity {
                    id: "nobody".into(),
                    employer: "Nobody".into(),
                },
                0,
            )
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
