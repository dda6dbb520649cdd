use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{html_to_text, status_error, Entity, ListingPage, SourceAdapter};
use crate::error::SourceError;
use crate::model::RawPosting;

const DEFAULT_BASE_URL: &str = "https://boards-api.greenhouse.io";

/// Greenhouse job board API. The listing omits content, so every survivor
/// of the relevance gate costs one detail request.
pub struct GreenhouseSource {
    id: String,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    location: Option<JobLocation>,
    #[serde(default)]
    absolute_url: String,
    #[serde(default)]
    first_published: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobLocation {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct JobDetail {
    #[serde(default)]
    content: Option<String>,
}

impl GreenhouseSource {
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

    fn to_posting(&self, entity: &Entity, job: Job) -> RawPosting {
        let posted_at = job
            .first_published
            .as_deref()
            .or(job.updated_at.as_deref())
            .and_then(parse_timestamp);
        RawPosting {
            source_ref: self.source_ref(entity),
            external_id: Some(job.id.to_string()),
            employer: entity.employer.clone(),
            title: job.title,
            location_raw: job.location.map(|l| l.name).unwrap_or_default(),
            description: None,
            url: job.absolute_url,
            posted_at,
            seen_at: Utc::now(),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl SourceAdapter for GreenhouseSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn list_page(&self, entity: &Entity, page: u32) -> Result<ListingPage, SourceError> {
        // The board endpoint returns every job in one response.
        if page > 0 {
            return Ok(ListingPage::default());
        }
        let url = format!("{}/v1/boards/{}/jobs", self.base_url, entity.id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &url));
        }
        let body: JobsResponse = response.json().await?;
        debug!(entity = %entity.id, jobs = body.jobs.len(), "Greenhouse listing");

        Ok(ListingPage {
            postings: body
                .jobs
                .into_iter()
                .map(|job| self.to_posting(entity, job))
                .collect(),
            has_more: false,
        })
    }

    async fn fetch_description(&self, stub: &RawPosting) -> Result<String, SourceError> {
        let job_id = stub.external_id.as_deref().ok_or_else(|| {
            SourceError::Fatal(format!("greenhouse stub without job id: {}", stub.url))
        })?;
        let url = format!(
            "{}/v1/boards/{}/jobs/{}",
            self.base_url, stub.source_ref.entity, job_id
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), &url));
        }
        let detail: JobDetail = response.json().await?;
        Ok(detail.content.as_deref().map(html_to_text).unwrap_or_default())
    }
}
