use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{html_to_text, status_error, Entity, ListingPage, SourceAdapter};
use crate::error::SourceError;
use crate::model::RawPosting;

const DEFAULT_BASE_URL: &str = "https://api.lever.co";
const PAGE_SIZE: usize = 100;

/// Lever postings API. Listings already carry the plain-text description.
pub struct LeverSource {
    id: String,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Posting {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    categories: Categories,
    #[serde(default)]
    description_plain: Option<String>,
    #[serde(default)]
    additional_plain: Option<String>,
    #[serde(default)]
    lists: Vec<PostingList>,
    #[serde(default)]
    hosted_url: String,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Categories {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    all_locations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PostingList {
    #[serde(default)]
    text: String,
    #[serde(default)]
    content: String,
}

impl Posting {
    fn location(&self) -> String {
        if self.categories.all_locations.is_empty() {
            self.categories.location.clone().unwrap_or_default()
        } else {
            self.categories.all_locations.join(" / ")
        }
    }

    fn description(&self) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(d) = self.description_plain.as_deref().map(str::trim) {
            parts.push(d.to_string());
        }
        for list in &self.lists {
            let body = html_to_text(&list.content);
            parts.push(format!("{}\n{}", list.text.trim(), body));
        }
        if let Some(a) = self.additional_plain.as_deref().map(str::trim) {
            parts.push(a.to_string());
        }
        parts.retain(|p| !p.trim().is_empty());
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }
}

impl LeverSource {
    pub fn new(id: &str, client: reqwest::Client, base_url: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn to_posting(&self, entity: &Entity, p: Posting) -> RawPosting {
        RawPosting {
            source_ref: self.source_ref(entity),
            location_raw: p.location(),
            description: p.description(),
            posted_at: p.created_at.and_then(DateTime::from_timestamp_millis),
            external_id: Some(p.id),
            employer: entity.employer.clone(),
            title: p.text,
            url: p.hosted_url,
            seen_at: Utc::now(),
        }
    }
}

#[async_trait]
impl SourceAdapter for LeverSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_page(&self, entity: &Entity, page: u32) -> Result<ListingPage, SourceError> {
        let url = format!("{}/v0/postings/{}", self.base_url, entity.id);
        let skip = page as usize * PAGE_SIZE;
        let response = self
            .client
            .get(&url)
            .query(&[
                ("mode", "json".to_string()),
                ("skip", skip.to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &url));
        }
        let postings: Vec<Posting> = response.json().await?;
        debug!(entity = %entity.id, page, postings = postings.len(), "Lever listing");

        let has_more = postings.len() == PAGE_SIZE;
        Ok(ListingPage {
            postings: postings
                .into_iter()
                .map(|p| self.to_posting(entity, p))
                .collect(),
            has_more,
        })
    }

    async fn fetch_description(&self, stub: &RawPosting) -> Result<String, SourceError> {
        let posting_id = stub.external_id.as_deref().ok_or_else(|| {
            SourceError::Fatal(format!("lever stub without posting id: {}", stub.url))
        })?;
        let url = format!(
            "{}/v0/postings/{}/{}",
            self.base_url, stub.source_ref.entity, posting_id
        );
        let response = self
            .client
            .get(&url)
            .query(&[("mode", "json")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &url));
        }
        let posting: Posting = response.json().await?;
        Ok(posting.description().unwrap_or_default())
    }
}
